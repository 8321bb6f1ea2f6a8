//! Module configuration.
//!
//! A module groups related service definitions, decorators and advisors. Modules
//! are configured through a [`ModuleDefBuilder`], either directly with
//! [`RegistryBuilder::add_module_fn`](crate::RegistryBuilder::add_module_fn) or by
//! implementing [`ServiceModule`].

use std::any::TypeId;
use std::sync::Arc;

use crate::aop::AdviceReceiver;
use crate::decoration::ServiceDecorator;
use crate::descriptors::{
    AdvisorDef, AdvisorFn, DecoratorDef, DecoratorFn, ServiceDef, ServiceFactory, ServiceMatcher,
    DEFAULT_LIFECYCLE,
};
use crate::error::{IocError, IocResult};
use crate::key::{erase, unerase, AnyArc, InterfaceId, ServiceId};
use crate::provider::{ModuleResources, ServiceResources};
use crate::proxy::{ProxyKit, ServiceInterface};
use crate::registration::{BuilderDef, ModuleDef};

const FACTORY_CONSTRUCT: &str = "invoking service factory";
const BUILDER_METHOD_CONSTRUCT: &str = "invoking module builder method";

/// A reusable unit of service definitions.
///
/// # Example
///
/// ```rust
/// use ferrous_ioc::{
///     service_interface, IocResult, ModuleDefBuilder, RegistryBuilder, ServiceLocator,
///     ServiceModule,
/// };
/// use std::sync::Arc;
///
/// service_interface! {
///     pub trait UserStore {
///         fn count(&self) -> usize;
///     }
/// }
///
/// struct InMemoryStore(Vec<String>);
/// impl UserStore for InMemoryStore {
///     fn count(&self) -> usize {
///         self.0.len()
///     }
/// }
///
/// struct UserModule;
///
/// impl ServiceModule for UserModule {
///     fn configure(self, module: &mut ModuleDefBuilder) -> IocResult<()> {
///         module.service::<dyn UserStore, _>("UserStore", |_| {
///             Ok(Arc::new(InMemoryStore(vec!["ada".into()])) as Arc<dyn UserStore>)
///         });
///         Ok(())
///     }
/// }
///
/// # fn main() -> IocResult<()> {
/// let mut builder = RegistryBuilder::new();
/// builder.add_module(UserModule)?;
/// let registry = builder.build()?;
/// assert_eq!(registry.get_service::<dyn UserStore>("userstore")?.count(), 1);
/// # Ok(())
/// # }
/// ```
pub trait ServiceModule {
    /// Module id used in diagnostics. Defaults to the type's name.
    fn module_id(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }

    /// Adds the module's definitions to `module`.
    fn configure(self, module: &mut ModuleDefBuilder) -> IocResult<()>;
}

struct BuilderRequirement {
    service_id: ServiceId,
    type_id: TypeId,
    type_name: &'static str,
}

/// Collects the definitions of one module.
///
/// Problems such as duplicate service ids are recorded as they are found and
/// reported by [`finish`](ModuleDefBuilder::finish), so definition methods can be
/// chained without intermediate error handling.
pub struct ModuleDefBuilder {
    module_id: String,
    services: Vec<ServiceDef>,
    decorators: Vec<DecoratorDef>,
    advisors: Vec<AdvisorDef>,
    builder: Option<(BuilderDef, TypeId)>,
    builder_requirements: Vec<BuilderRequirement>,
    errors: Vec<IocError>,
}

impl ModuleDefBuilder {
    pub fn new(module_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            services: Vec::new(),
            decorators: Vec::new(),
            advisors: Vec::new(),
            builder: None,
            builder_requirements: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Defines a proxied service implementing `I`.
    ///
    /// The factory runs on first use of a method of the service (or during
    /// startup, for eager-load services), never at definition or lookup time.
    pub fn service<I, F>(&mut self, service_id: &str, factory: F) -> ServiceBindingOptions<'_>
    where
        I: ServiceInterface + ?Sized,
        F: Fn(&ServiceResources) -> IocResult<Arc<I>> + Send + Sync + 'static,
    {
        let factory: ServiceFactory =
            Arc::new(move |resources: &ServiceResources| factory(resources).map(erase::<I>));
        self.push_service(
            service_id,
            InterfaceId::of::<I>(),
            FACTORY_CONSTRUCT,
            false,
            factory,
            Some(ProxyKit::of::<I>()),
        )
    }

    /// Defines a proxied service built by a method of the module builder `B`.
    ///
    /// The module must declare a builder of type `B` with
    /// [`builder`](ModuleDefBuilder::builder).
    pub fn service_from_builder<I, B, F>(
        &mut self,
        service_id: &str,
        method: F,
    ) -> ServiceBindingOptions<'_>
    where
        I: ServiceInterface + ?Sized,
        B: Send + Sync + 'static,
        F: Fn(&B, &ServiceResources) -> IocResult<Arc<I>> + Send + Sync + 'static,
    {
        self.builder_requirements.push(BuilderRequirement {
            service_id: ServiceId::new(service_id),
            type_id: TypeId::of::<B>(),
            type_name: std::any::type_name::<B>(),
        });
        let factory: ServiceFactory = Arc::new(move |resources: &ServiceResources| {
            let builder = resources.module_builder::<B>()?;
            method(&builder, resources).map(erase::<I>)
        });
        self.push_service(
            service_id,
            InterfaceId::of::<I>(),
            BUILDER_METHOD_CONSTRUCT,
            true,
            factory,
            Some(ProxyKit::of::<I>()),
        )
    }

    /// Defines a service that is handed out without a proxy.
    ///
    /// Lookups realize the service immediately. Such services cannot use
    /// lifecycles that need a proxy and cannot receive method advice.
    pub fn unproxied_service<I, F>(&mut self, service_id: &str, factory: F) -> ServiceBindingOptions<'_>
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(&ServiceResources) -> IocResult<Arc<I>> + Send + Sync + 'static,
    {
        let factory: ServiceFactory =
            Arc::new(move |resources: &ServiceResources| factory(resources).map(erase::<I>));
        self.push_service(
            service_id,
            InterfaceId::of::<I>(),
            FACTORY_CONSTRUCT,
            false,
            factory,
            None,
        )
    }

    /// Defines an unproxied service backed by an existing value.
    pub fn instance<T>(&mut self, service_id: &str, value: T) -> ServiceBindingOptions<'_>
    where
        T: Send + Sync + 'static,
    {
        let value = Arc::new(value);
        self.unproxied_service::<T, _>(service_id, move |_| Ok(value.clone()))
    }

    /// Declares the module builder: an object constructed at most once per
    /// registry, on first use by a builder-method service.
    pub fn builder<B, F>(&mut self, ctor: F) -> &mut Self
    where
        B: Send + Sync + 'static,
        F: Fn(&ModuleResources) -> IocResult<B> + Send + Sync + 'static,
    {
        let type_name = std::any::type_name::<B>();
        if let Some((existing, _)) = &self.builder {
            self.errors.push(IocError::ModuleBuilder {
                module_id: self.module_id.clone(),
                message: format!(
                    "declares a second builder ({type_name}); it already has {}",
                    existing.type_name
                ),
            });
            return self;
        }
        let ctor = Arc::new(move |resources: &ModuleResources| {
            ctor(resources).map(|builder| erase(Arc::new(builder)))
        });
        self.builder = Some((BuilderDef { type_name, ctor }, TypeId::of::<B>()));
        self
    }

    /// Adds a decorator for services implementing `I` whose ids match `matcher`.
    ///
    /// The closure receives the current implementation and returns a replacement,
    /// or `None` to leave the service as it is.
    pub fn decorate<I, F>(
        &mut self,
        decorator_id: &str,
        matcher: impl Into<ServiceMatcher>,
        decorate: F,
    ) -> ContributionOptions<'_>
    where
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<I>, &ServiceResources) -> IocResult<Option<Arc<I>>> + Send + Sync + 'static,
    {
        let decorate: DecoratorFn = Arc::new(move |delegate: AnyArc, resources: &ServiceResources| {
            match unerase::<I>(&delegate) {
                Some(typed) => Ok(decorate(typed, resources)?.map(erase::<I>)),
                None => Ok(None),
            }
        });
        let matcher = matcher.into().and(ServiceMatcher::interface::<I>());
        self.push_decorator(decorator_id, matcher, decorate)
    }

    /// Adds a [`ServiceDecorator`] for services implementing `I`.
    pub fn decorate_with<I, D>(
        &mut self,
        decorator_id: &str,
        matcher: impl Into<ServiceMatcher>,
        decorator: D,
    ) -> ContributionOptions<'_>
    where
        I: ?Sized + Send + Sync + 'static,
        D: ServiceDecorator<I> + 'static,
    {
        self.decorate::<I, _>(decorator_id, matcher, move |delegate, resources| {
            decorator.decorate(delegate, resources)
        })
    }

    /// Adds an untyped decorator. It sees every matching service and may return
    /// `None` for services it does not handle.
    pub fn decorate_any<F>(
        &mut self,
        decorator_id: &str,
        matcher: impl Into<ServiceMatcher>,
        decorate: F,
    ) -> ContributionOptions<'_>
    where
        F: Fn(AnyArc, &ServiceResources) -> IocResult<Option<AnyArc>> + Send + Sync + 'static,
    {
        self.push_decorator(decorator_id, matcher.into(), Arc::new(decorate))
    }

    /// Adds an advisor for the proxied services whose ids match `matcher`.
    pub fn advise<F>(
        &mut self,
        advisor_id: &str,
        matcher: impl Into<ServiceMatcher>,
        advise: F,
    ) -> ContributionOptions<'_>
    where
        F: Fn(&mut AdviceReceiver, &ServiceResources) -> IocResult<()> + Send + Sync + 'static,
    {
        let advise: AdvisorFn = Arc::new(
            move |resources: &ServiceResources, receiver: &mut AdviceReceiver| {
                advise(receiver, resources)
            },
        );
        self.advisors.push(AdvisorDef {
            id: advisor_id.to_string(),
            module_id: self.module_id.clone(),
            matcher: matcher.into(),
            constraints: Vec::new(),
            advise,
        });
        let index = self.advisors.len() - 1;
        ContributionOptions {
            constraints: &mut self.advisors[index].constraints,
        }
    }

    /// Validates the collected definitions and produces the module definition.
    pub fn finish(self) -> IocResult<ModuleDef> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        for requirement in &self.builder_requirements {
            match &self.builder {
                None => {
                    return Err(IocError::ModuleBuilder {
                        module_id: self.module_id.clone(),
                        message: format!(
                            "service '{}' is a builder method of {} but the module declares no builder",
                            requirement.service_id, requirement.type_name
                        ),
                    })
                }
                Some((builder, type_id)) if *type_id != requirement.type_id => {
                    return Err(IocError::ModuleBuilder {
                        module_id: self.module_id.clone(),
                        message: format!(
                            "service '{}' is a builder method of {} but the module builder is {}",
                            requirement.service_id, requirement.type_name, builder.type_name
                        ),
                    })
                }
                Some(_) => {}
            }
        }

        Ok(ModuleDef {
            module_id: self.module_id,
            services: self.services.into_iter().map(Arc::new).collect(),
            decorators: self.decorators.into_iter().map(Arc::new).collect(),
            advisors: self.advisors.into_iter().map(Arc::new).collect(),
            builder: self.builder.map(|(builder, _)| builder),
        })
    }

    fn push_service(
        &mut self,
        service_id: &str,
        interface: InterfaceId,
        construct: &'static str,
        uses_module_builder: bool,
        factory: ServiceFactory,
        proxy: Option<ProxyKit>,
    ) -> ServiceBindingOptions<'_> {
        let service_id = ServiceId::new(service_id);
        if self.services.iter().any(|def| def.service_id == service_id) {
            self.errors.push(IocError::DuplicateServiceId {
                service_id: service_id.to_string(),
                existing_module: self.module_id.clone(),
                duplicate_module: self.module_id.clone(),
            });
        }

        self.services.push(ServiceDef {
            service_id,
            module_id: self.module_id.clone(),
            interface,
            lifecycle: DEFAULT_LIFECYCLE.to_string(),
            eager_load: false,
            construct,
            uses_module_builder,
            factory,
            proxy,
        });
        let index = self.services.len() - 1;
        ServiceBindingOptions {
            def: &mut self.services[index],
        }
    }

    fn push_decorator(
        &mut self,
        decorator_id: &str,
        matcher: ServiceMatcher,
        decorate: DecoratorFn,
    ) -> ContributionOptions<'_> {
        self.decorators.push(DecoratorDef {
            id: decorator_id.to_string(),
            module_id: self.module_id.clone(),
            matcher,
            constraints: Vec::new(),
            decorate,
        });
        let index = self.decorators.len() - 1;
        ContributionOptions {
            constraints: &mut self.decorators[index].constraints,
        }
    }
}

/// Options of a service being defined.
pub struct ServiceBindingOptions<'a> {
    def: &'a mut ServiceDef,
}

impl ServiceBindingOptions<'_> {
    /// Realizes the service during [`Registry::perform_registry_startup`](crate::Registry::perform_registry_startup).
    pub fn eager_load(&mut self) -> &mut Self {
        self.def.eager_load = true;
        self
    }

    /// Selects the lifecycle by (case-insensitive) name. Unknown names are
    /// reported when the registry is built.
    pub fn lifecycle(&mut self, name: impl Into<String>) -> &mut Self {
        self.def.lifecycle = name.into();
        self
    }
}

/// Ordering options of a decorator or advisor being defined.
pub struct ContributionOptions<'a> {
    constraints: &'a mut Vec<String>,
}

impl ContributionOptions<'_> {
    /// Places this contribution outside of (ahead of) the ones matching `pattern`.
    pub fn before(&mut self, pattern: &str) -> &mut Self {
        self.constraints.push(format!("before:{pattern}"));
        self
    }

    /// Places this contribution inside of (after) the ones matching `pattern`.
    pub fn after(&mut self, pattern: &str) -> &mut Self {
        self.constraints.push(format!("after:{pattern}"));
        self
    }

    /// Adds a raw `before:<pattern>` or `after:<pattern>` constraint.
    pub fn constraint(&mut self, constraint: impl Into<String>) -> &mut Self {
        self.constraints.push(constraint.into());
        self
    }
}
