//! The service registry.
//!
//! A [`Registry`] is built once from module definitions by the
//! [`RegistryBuilder`](crate::RegistryBuilder) and then serves lookups until it
//! is shut down. Lookups of proxied services return a proxy immediately; the
//! implementation is constructed on the first method call.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::creator::invoke_guarded;
use crate::descriptors::{AdvisorDef, DecoratorDef, ServiceDef};
use crate::error::{IocError, IocResult};
use crate::internal::{ConstructionLock, ShutdownHub};
use crate::key::{AnyArc, InterfaceId, ServiceId};
use crate::lifecycle::LifecycleSource;
use crate::observer::Observers;
use crate::ordering::order_by_constraints;
use crate::perthread::PerThreadManager;
use crate::registration::ModuleDef;
use crate::symbols::SymbolSource;
use crate::traits::{LocatedService, RegistryShutdownListener, ServiceLocator, ServiceLocatorCore};

pub mod context;
pub(crate) mod module;

pub use context::{ModuleResources, ServiceResources};
use module::Module;

/// Everything the builder hands over to a new registry.
pub(crate) struct RegistryParts {
    pub(crate) modules: Vec<ModuleDef>,
    pub(crate) lifecycles: LifecycleSource,
    pub(crate) per_thread: Arc<PerThreadManager>,
    pub(crate) symbols: SymbolSource,
    pub(crate) observers: Observers,
    pub(crate) resources: HashMap<TypeId, LocatedService>,
}

/// Public facade over the registry's modules.
///
/// Cheap to clone; clones share the same services. `Registry` is `Send + Sync`
/// and lookups may happen from any number of threads.
///
/// # Examples
///
/// ```
/// use ferrous_ioc::{service_interface, RegistryBuilder};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// service_interface! {
///     pub trait Counter {
///         fn next(&self) -> usize;
///     }
/// }
///
/// struct AtomicCounter(AtomicUsize);
/// impl Counter for AtomicCounter {
///     fn next(&self) -> usize {
///         self.0.fetch_add(1, Ordering::SeqCst) + 1
///     }
/// }
///
/// let built = Arc::new(AtomicUsize::new(0));
/// let built_in_factory = built.clone();
///
/// let mut builder = RegistryBuilder::new();
/// builder
///     .add_module_fn("app", move |module| {
///         module.service::<dyn Counter, _>("Counter", move |_| {
///             built_in_factory.fetch_add(1, Ordering::SeqCst);
///             Ok(Arc::new(AtomicCounter(AtomicUsize::new(0))) as Arc<dyn Counter>)
///         });
///         Ok(())
///     })
///     .unwrap();
/// let registry = builder.build().unwrap();
///
/// let counter = registry.get_service::<dyn Counter>("counter").unwrap();
/// assert_eq!(built.load(Ordering::SeqCst), 0);
/// assert_eq!(counter.next(), 1);
/// assert_eq!(built.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    pub(crate) modules: Vec<Module>,
    pub(crate) service_index: HashMap<ServiceId, usize>,
    pub(crate) decorators: Vec<Arc<DecoratorDef>>,
    pub(crate) advisors: Vec<Arc<AdvisorDef>>,
    pub(crate) lifecycles: LifecycleSource,
    pub(crate) symbols: SymbolSource,
    pub(crate) observers: Observers,
    pub(crate) construction_lock: Arc<ConstructionLock>,
    pub(crate) shutdown: ShutdownHub,
    pub(crate) per_thread: Arc<PerThreadManager>,
    pub(crate) resources: HashMap<TypeId, LocatedService>,
}

impl RegistryInner {
    fn ensure_running(&self, what: &str) -> IocResult<()> {
        if self.shutdown.has_fired() {
            return Err(IocError::RegistryShutdown(what.to_string()));
        }
        Ok(())
    }

    pub(crate) fn available_service_ids(&self) -> String {
        let mut ids: Vec<&ServiceId> = self.service_index.keys().collect();
        ids.sort();
        ids.iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn locate_by_id(
        self: &Arc<Self>,
        service_id: &str,
        expected: InterfaceId,
    ) -> IocResult<LocatedService> {
        self.ensure_running(service_id)?;
        let index = self
            .service_index
            .get(&ServiceId::new(service_id))
            .copied()
            .ok_or_else(|| IocError::ServiceNotFound {
                service_id: service_id.to_string(),
                available: self.available_service_ids(),
            })?;
        self.modules[index].get_service(self, service_id, expected)
    }

    pub(crate) fn locate_by_interface(self: &Arc<Self>, expected: InterfaceId) -> IocResult<LocatedService> {
        self.ensure_running(expected.name())?;
        let mut found: Vec<(usize, ServiceId)> = self
            .modules
            .iter()
            .enumerate()
            .flat_map(|(index, module)| {
                module
                    .find_service_ids_for_interface(expected)
                    .into_iter()
                    .map(move |id| (index, id))
            })
            .collect();

        match found.len() {
            0 => Err(IocError::NoServiceForInterface {
                interface: expected.name(),
            }),
            1 => {
                let (index, service_id) = found.remove(0);
                self.modules[index].get_service(self, service_id.as_str(), expected)
            }
            _ => {
                let mut ids: Vec<String> = found.into_iter().map(|(_, id)| id.to_string()).collect();
                ids.sort_by_key(|id| id.to_lowercase());
                Err(IocError::AmbiguousInterface {
                    interface: expected.name(),
                    ids,
                })
            }
        }
    }

    pub(crate) fn module_builder(self: &Arc<Self>, module_index: usize) -> IocResult<AnyArc> {
        let module = &self.modules[module_index];
        self.ensure_running(module.module_id())?;
        module.module_builder(self)
    }

    pub(crate) fn find_decorators_for_service(&self, def: &ServiceDef) -> IocResult<Vec<Arc<DecoratorDef>>> {
        let matching = self
            .decorators
            .iter()
            .filter(|decorator| decorator.matches(def))
            .cloned()
            .collect();
        order_by_constraints(matching)
    }

    pub(crate) fn find_advisors_for_service(&self, def: &ServiceDef) -> IocResult<Vec<Arc<AdvisorDef>>> {
        let matching = self
            .advisors
            .iter()
            .filter(|advisor| advisor.matches(def))
            .cloned()
            .collect();
        order_by_constraints(matching)
    }
}

impl Registry {
    pub(crate) fn from_parts(parts: RegistryParts) -> Self {
        let mut service_index = HashMap::new();
        let mut decorators = Vec::new();
        let mut advisors = Vec::new();
        for (index, def) in parts.modules.iter().enumerate() {
            for service in &def.services {
                service_index.insert(service.service_id.clone(), index);
            }
            decorators.extend(def.decorators.iter().cloned());
            advisors.extend(def.advisors.iter().cloned());
        }

        let modules = parts
            .modules
            .into_iter()
            .enumerate()
            .map(|(index, def)| Module::new(index, def))
            .collect();

        Self {
            inner: Arc::new(RegistryInner {
                modules,
                service_index,
                decorators,
                advisors,
                lifecycles: parts.lifecycles,
                symbols: parts.symbols,
                observers: parts.observers,
                construction_lock: Arc::new(ConstructionLock::new(())),
                shutdown: ShutdownHub::default(),
                per_thread: parts.per_thread,
                resources: parts.resources,
            }),
        }
    }

    /// Finds a service by (case-insensitive) id.
    ///
    /// `I` must be the interface the service was defined with. For proxied
    /// services this returns the proxy without constructing the implementation.
    pub fn get_service<I>(&self, service_id: &str) -> IocResult<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        ServiceLocator::get_service::<I>(self, service_id)
    }

    /// Finds the unique service defined with interface `I`.
    pub fn get_service_by_type<I>(&self) -> IocResult<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        ServiceLocator::get_service_by_type::<I>(self)
    }

    /// Builds an object that is not a service, letting `build` pull its
    /// dependencies from the registry.
    ///
    /// Failures and panics are reported as construction errors naming `T`.
    pub fn autobuild<T, F>(&self, build: F) -> IocResult<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&Registry) -> IocResult<T>,
    {
        self.inner.ensure_running(std::any::type_name::<T>())?;
        let label = ServiceId::new(std::any::type_name::<T>());
        invoke_guarded(&label, "autobuilding instance", || build(self)).map(Arc::new)
    }

    /// Realizes every eager-load service, failing on the first construction error.
    pub fn perform_registry_startup(&self) -> IocResult<()> {
        self.inner.ensure_running("registry startup")?;
        let mut loaded = 0;
        for module in &self.inner.modules {
            loaded += module.eager_load_services(&self.inner)?;
        }
        tracing::info!(eager_loaded = loaded, "registry startup complete");
        Ok(())
    }

    /// Decorators that apply to `def`, outermost first.
    pub fn find_decorators_for_service(&self, def: &ServiceDef) -> IocResult<Vec<Arc<DecoratorDef>>> {
        self.inner.find_decorators_for_service(def)
    }

    /// Advisors that apply to `def`, outermost first.
    pub fn find_advisors_for_service(&self, def: &ServiceDef) -> IocResult<Vec<Arc<AdvisorDef>>> {
        self.inner.find_advisors_for_service(def)
    }

    /// Registers a listener for [`shutdown`](Registry::shutdown). A listener added
    /// after shutdown is notified immediately.
    pub fn add_registry_shutdown_listener(&self, listener: Arc<dyn RegistryShutdownListener>) {
        self.inner.shutdown.add(listener);
    }

    /// Shuts the registry down.
    ///
    /// Every listener is notified exactly once, even if some of them panic. All
    /// proxies stop working, cached services and per-thread instances are dropped,
    /// and later lookups fail with [`IocError::RegistryShutdown`]. Shutting down a
    /// second time is an error.
    pub fn shutdown(&self) -> IocResult<()> {
        let failures = self
            .inner
            .shutdown
            .fire()
            .ok_or_else(|| IocError::RegistryShutdown("registry".to_string()))?;

        for module in &self.inner.modules {
            module.clear();
        }
        self.inner.per_thread.clear();

        if failures > 0 {
            tracing::warn!(failures, "some registry shutdown listeners failed");
        }
        tracing::info!(modules = self.inner.modules.len(), "registry shut down");
        Ok(())
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.has_fired()
    }

    /// Discards the calling thread's `perthread` service instances. Returns how
    /// many were discarded.
    pub fn cleanup_thread(&self) -> usize {
        self.inner.per_thread.cleanup_thread()
    }

    /// Ids of all defined services, sorted case-insensitively.
    pub fn service_ids(&self) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self.inner.service_index.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn service_def(&self, service_id: &str) -> Option<Arc<ServiceDef>> {
        let index = *self.inner.service_index.get(&ServiceId::new(service_id))?;
        self.inner.modules[index].service_def(service_id).cloned()
    }

    pub fn symbol_source(&self) -> &SymbolSource {
        &self.inner.symbols
    }

    /// Expands `${...}` symbol references in `input`.
    pub fn expand_symbols(&self, input: &str) -> IocResult<String> {
        self.inner.symbols.expand_symbols(input)
    }

    /// Text dump of modules, services and contributions, for debugging.
    #[cfg(feature = "diagnostics")]
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "Registry ({} modules, {} services{})",
            self.inner.modules.len(),
            self.inner.service_index.len(),
            if self.is_shutdown() { ", shut down" } else { "" }
        );
        for module in &self.inner.modules {
            let def = module.def();
            let _ = writeln!(out, "module {}", module.module_id());
            if let Some(builder) = def.builder_type() {
                let _ = writeln!(out, "  builder: {builder}");
            }
            for service in def.services() {
                let _ = writeln!(
                    out,
                    "  service {} [{}] {}{}{}",
                    service.service_id(),
                    service.lifecycle(),
                    service.interface().name(),
                    if service.is_eager_load() { " eager" } else { "" },
                    if module.is_cached(service.service_id()) { " (cached)" } else { "" }
                );
            }
            for decorator in def.decorators() {
                let _ = writeln!(out, "  decorator {} {:?}", decorator.id(), decorator.constraints());
            }
            for advisor in def.advisors() {
                let _ = writeln!(out, "  advisor {} {:?}", advisor.id(), advisor.constraints());
            }
        }
        out
    }
}

impl ServiceLocatorCore for Registry {
    fn locate_by_id(&self, service_id: &str, expected: InterfaceId) -> IocResult<LocatedService> {
        self.inner.locate_by_id(service_id, expected)
    }

    fn locate_by_interface(&self, expected: InterfaceId) -> IocResult<LocatedService> {
        self.inner.locate_by_interface(expected)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.inner.modules.len())
            .field("services", &self.inner.service_index.len())
            .field("decorators", &self.inner.decorators.len())
            .field("advisors", &self.inner.advisors.len())
            .field("observers", &self.inner.observers.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
