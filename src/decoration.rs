//! Service decoration.
//!
//! A decorator receives the service implementation and may return a replacement
//! implementing the same interface, typically a wrapper around the original.
//! Decorators are applied once, when the service is realized, in the order
//! computed from their ordering constraints.

use std::sync::Arc;

use crate::creator::{invoke_guarded, ObjectCreator};
use crate::descriptors::{DecoratorDef, ServiceDef};
use crate::error::IocResult;
use crate::key::AnyArc;
use crate::provider::ServiceResources;

/// A typed decorator for services implementing `I`.
///
/// Returning `Ok(None)` leaves the service undecorated. Register one with
/// [`ModuleDefBuilder::decorate_with`](crate::ModuleDefBuilder::decorate_with);
/// plain closures go through [`ModuleDefBuilder::decorate`](crate::ModuleDefBuilder::decorate).
///
/// # Examples
///
/// ```
/// use ferrous_ioc::{service_interface, IocResult, RegistryBuilder, ServiceDecorator, ServiceResources};
/// use std::sync::Arc;
///
/// service_interface! {
///     pub trait Greeter {
///         fn greet(&self, name: &str) -> String;
///     }
/// }
///
/// struct Hello;
/// impl Greeter for Hello {
///     fn greet(&self, name: &str) -> String {
///         format!("Hello, {name}")
///     }
/// }
///
/// struct Shouting(Arc<dyn Greeter>);
/// impl Greeter for Shouting {
///     fn greet(&self, name: &str) -> String {
///         self.0.greet(name).to_uppercase()
///     }
/// }
///
/// struct ShoutingDecorator;
/// impl ServiceDecorator<dyn Greeter> for ShoutingDecorator {
///     fn decorate(
///         &self,
///         delegate: Arc<dyn Greeter>,
///         _resources: &ServiceResources,
///     ) -> IocResult<Option<Arc<dyn Greeter>>> {
///         Ok(Some(Arc::new(Shouting(delegate))))
///     }
/// }
///
/// let mut builder = RegistryBuilder::new();
/// builder
///     .add_module_fn("app", |module| {
///         module.service::<dyn Greeter, _>("Greeter", |_| Ok(Arc::new(Hello) as Arc<dyn Greeter>));
///         module.decorate_with::<dyn Greeter, _>("Shout", "Greeter", ShoutingDecorator);
///         Ok(())
///     })
///     .unwrap();
/// let registry = builder.build().unwrap();
///
/// let greeter = registry.get_service::<dyn Greeter>("Greeter").unwrap();
/// assert_eq!(greeter.greet("ada"), "HELLO, ADA");
/// ```
pub trait ServiceDecorator<I: ?Sized + Send + Sync + 'static>: Send + Sync {
    /// Returns a replacement for `delegate`, or `None` to keep it.
    fn decorate(&self, delegate: Arc<I>, resources: &ServiceResources) -> IocResult<Option<Arc<I>>>;
}

/// Creator stage that threads the realized service through its decorators.
///
/// Decorators are given outermost first; the last one is applied first so that
/// the first one ends up wrapping all the others. A decorator that returns `None`
/// or an object not implementing the service interface is skipped with a warning.
pub struct InterceptorStackBuilder {
    def: Arc<ServiceDef>,
    resources: ServiceResources,
    decorators: Vec<Arc<DecoratorDef>>,
    inner: Arc<dyn ObjectCreator>,
}

impl InterceptorStackBuilder {
    pub(crate) fn new(
        def: Arc<ServiceDef>,
        resources: ServiceResources,
        decorators: Vec<Arc<DecoratorDef>>,
        inner: Arc<dyn ObjectCreator>,
    ) -> Self {
        Self {
            def,
            resources,
            decorators,
            inner,
        }
    }
}

impl ObjectCreator for InterceptorStackBuilder {
    fn create_object(&self) -> IocResult<AnyArc> {
        let mut current = self.inner.create_object()?;
        let service_id = &self.def.service_id;

        for decorator in self.decorators.iter().rev() {
            let construct = format!("invoking decorator '{}'", decorator.id);
            let replacement = invoke_guarded(service_id, &construct, || {
                (decorator.decorate)(current.clone(), &self.resources)
            })?;

            match replacement {
                None => {
                    tracing::debug!(
                        service_id = %service_id,
                        decorator = %decorator.id,
                        "decorator left service unchanged"
                    );
                }
                Some(replacement) if self.def.interface.is_held_by(&replacement) => {
                    current = replacement;
                }
                Some(_) => {
                    tracing::warn!(
                        service_id = %service_id,
                        decorator = %decorator.id,
                        interface = self.def.interface.name(),
                        "decorator returned an object that does not implement the service interface; ignoring it"
                    );
                }
            }
        }

        Ok(current)
    }
}
