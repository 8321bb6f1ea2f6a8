//! Resources handed to factories and module builder constructors.
//!
//! Both resource types hold only a weak reference to the registry, so the
//! creator chains that capture them never keep a shut-down registry alive.

use std::any::TypeId;
use std::sync::{Arc, Weak};

use crate::creator::ObjectCreator;
use crate::descriptors::ServiceDef;
use crate::error::{IocError, IocResult};
use crate::key::{unerase, AnyArc, InterfaceId, ServiceId};
use crate::provider::RegistryInner;
use crate::traits::{downcast_service, LocatedService, ServiceLocatorCore};

/// Resources of one module, passed to its builder constructor.
///
/// Resolves services from the whole registry, the module's builder, symbols and
/// injectable resources.
#[derive(Clone)]
pub struct ModuleResources {
    registry: Weak<RegistryInner>,
    module_index: usize,
    module_id: Arc<str>,
}

impl ModuleResources {
    pub(crate) fn new(registry: Weak<RegistryInner>, module_index: usize, module_id: Arc<str>) -> Self {
        Self {
            registry,
            module_index,
            module_id,
        }
    }

    pub(crate) fn registry(&self) -> IocResult<Arc<RegistryInner>> {
        self.registry
            .upgrade()
            .ok_or_else(|| IocError::RegistryShutdown(format!("module '{}'", self.module_id)))
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// The module's builder object, constructing it on first use.
    pub fn module_builder<B: Send + Sync + 'static>(&self) -> IocResult<Arc<B>> {
        let value = self.registry()?.module_builder(self.module_index)?;
        unerase::<B>(&value).ok_or_else(|| IocError::ModuleBuilder {
            module_id: self.module_id.to_string(),
            message: format!("the module builder is not a {}", std::any::type_name::<B>()),
        })
    }

    /// Fully expanded value of a symbol.
    pub fn symbol(&self, name: &str) -> IocResult<String> {
        self.registry()?.symbols.value_for_symbol(name)
    }

    /// Expands `${...}` references in `input`.
    pub fn expand_symbols(&self, input: &str) -> IocResult<String> {
        self.registry()?.symbols.expand_symbols(input)
    }

    /// An injectable resource of type `T`.
    ///
    /// Resources added with [`RegistryBuilder::add_resource`](crate::RegistryBuilder::add_resource)
    /// take precedence; otherwise the unique service implementing `T` is used.
    pub fn resource<T: ?Sized + Send + Sync + 'static>(&self) -> IocResult<Arc<T>> {
        let registry = self.registry()?;
        let expected = InterfaceId::of::<T>();
        if let Some(located) = registry.resources.get(&TypeId::of::<T>()) {
            return downcast_service(expected.name(), expected, located);
        }
        let located = registry.locate_by_interface(expected)?;
        downcast_service(expected.name(), expected, &located)
    }
}

impl ServiceLocatorCore for ModuleResources {
    fn locate_by_id(&self, service_id: &str, expected: InterfaceId) -> IocResult<LocatedService> {
        self.registry()?.locate_by_id(service_id, expected)
    }

    fn locate_by_interface(&self, expected: InterfaceId) -> IocResult<LocatedService> {
        self.registry()?.locate_by_interface(expected)
    }
}

/// Resources of one service, passed to its factory, decorators and advisors.
///
/// # Examples
///
/// ```
/// use ferrous_ioc::{service_interface, RegistryBuilder, ServiceLocator};
/// use std::sync::Arc;
///
/// service_interface! {
///     pub trait Endpoint {
///         fn url(&self) -> String;
///     }
/// }
///
/// struct Fixed(String);
/// impl Endpoint for Fixed {
///     fn url(&self) -> String {
///         self.0.clone()
///     }
/// }
///
/// let mut builder = RegistryBuilder::new();
/// builder.application_default("api.host", "localhost");
/// builder
///     .add_module_fn("app", |module| {
///         module.service::<dyn Endpoint, _>("Endpoint", |resources| {
///             let url = resources.expand_symbols("http://${api.host}/")?;
///             Ok(Arc::new(Fixed(format!("{url}{}", resources.service_id()))) as Arc<dyn Endpoint>)
///         });
///         Ok(())
///     })
///     .unwrap();
/// let registry = builder.build().unwrap();
///
/// let endpoint = registry.get_service::<dyn Endpoint>("endpoint").unwrap();
/// assert_eq!(endpoint.url(), "http://localhost/Endpoint");
/// ```
#[derive(Clone)]
pub struct ServiceResources {
    module: ModuleResources,
    def: Arc<ServiceDef>,
}

impl ServiceResources {
    pub(crate) fn new(module: ModuleResources, def: Arc<ServiceDef>) -> Self {
        Self { module, def }
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.def.service_id
    }

    pub fn service_def(&self) -> &ServiceDef {
        &self.def
    }

    pub fn module_id(&self) -> &str {
        self.module.module_id()
    }

    /// The defining module's builder object.
    pub fn module_builder<B: Send + Sync + 'static>(&self) -> IocResult<Arc<B>> {
        self.module.module_builder::<B>()
    }

    pub fn symbol(&self, name: &str) -> IocResult<String> {
        self.module.symbol(name)
    }

    pub fn expand_symbols(&self, input: &str) -> IocResult<String> {
        self.module.expand_symbols(input)
    }

    /// See [`ModuleResources::resource`].
    pub fn resource<T: ?Sized + Send + Sync + 'static>(&self) -> IocResult<Arc<T>> {
        self.module.resource::<T>()
    }

    /// Wraps `creator` in a proxy of the service interface that asks the creator
    /// on every method call.
    ///
    /// Meant for lifecycles. Fails if the service interface is not proxiable.
    pub fn create_dynamic_proxy(&self, creator: Arc<dyn ObjectCreator>) -> IocResult<AnyArc> {
        let kit = self.def.proxy.ok_or_else(|| {
            IocError::Configuration(format!(
                "service '{}' needs a proxy but its interface {} is not proxiable",
                self.def.service_id,
                self.def.interface.name()
            ))
        })?;
        Ok(kit.dynamic(self.def.service_id.clone(), self.def.interface, creator))
    }
}

impl ServiceLocatorCore for ServiceResources {
    fn locate_by_id(&self, service_id: &str, expected: InterfaceId) -> IocResult<LocatedService> {
        self.module.locate_by_id(service_id, expected)
    }

    fn locate_by_interface(&self, expected: InterfaceId) -> IocResult<LocatedService> {
        self.module.locate_by_interface(expected)
    }
}
