//! Runtime state of one module.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::aop::AdvisorStackBuilder;
use crate::creator::{invoke_guarded, JustInTimeCreator, LifecycleWrappedCreator, ObjectCreator};
use crate::decoration::InterceptorStackBuilder;
use crate::descriptors::ServiceDef;
use crate::error::{IocError, IocResult};
use crate::internal::{builder_key, service_key, ConstructionGuard};
use crate::key::{AnyArc, InterfaceId, ServiceId};
use crate::provider::context::{ModuleResources, ServiceResources};
use crate::provider::RegistryInner;
use crate::registration::ModuleDef;
use crate::traits::{EagerLoad, LocatedService};

/// What the module caches for a service: the object handed to callers and, for
/// proxies, the handle that forces realization.
#[derive(Clone)]
struct ServiceEntry {
    value: AnyArc,
    loader: Option<Arc<dyn EagerLoad>>,
}

/// Services, proxies and the builder object of one module.
///
/// Each service's proxy (or, for unproxied services, its value) is created at
/// most once and cached until shutdown.
pub(crate) struct Module {
    index: usize,
    module_id: Arc<str>,
    def: ModuleDef,
    services: Mutex<HashMap<ServiceId, ServiceEntry>>,
    builder: Mutex<Option<AnyArc>>,
}

impl Module {
    pub(crate) fn new(index: usize, def: ModuleDef) -> Self {
        Self {
            index,
            module_id: Arc::from(def.module_id.as_str()),
            def,
            services: Mutex::new(HashMap::new()),
            builder: Mutex::new(None),
        }
    }

    pub(crate) fn module_id(&self) -> &str {
        &self.module_id
    }

    #[cfg_attr(not(feature = "diagnostics"), allow(dead_code))]
    pub(crate) fn def(&self) -> &ModuleDef {
        &self.def
    }

    pub(crate) fn service_def(&self, service_id: &str) -> Option<&Arc<ServiceDef>> {
        self.def.service(service_id)
    }

    pub(crate) fn find_service_ids_for_interface(&self, interface: InterfaceId) -> Vec<ServiceId> {
        self.def
            .services
            .iter()
            .filter(|def| def.interface == interface)
            .map(|def| def.service_id.clone())
            .collect()
    }

    /// True once the proxy (or value) of the service has been created.
    #[cfg_attr(not(feature = "diagnostics"), allow(dead_code))]
    pub(crate) fn is_cached(&self, service_id: &ServiceId) -> bool {
        self.services.lock().contains_key(service_id)
    }

    /// Returns the proxy for a proxied service, or the realized value otherwise.
    pub(crate) fn get_service(
        &self,
        registry: &Arc<RegistryInner>,
        service_id: &str,
        expected: InterfaceId,
    ) -> IocResult<LocatedService> {
        let def = self
            .service_def(service_id)
            .ok_or_else(|| IocError::ServiceNotFound {
                service_id: service_id.to_string(),
                available: registry.available_service_ids(),
            })?;

        if def.interface != expected {
            return Err(IocError::WrongInterface {
                service_id: def.service_id.to_string(),
                requested: expected.name(),
                actual: def.interface.name(),
            });
        }

        let value = self.find_or_create(registry, def)?.value;
        Ok(LocatedService::new(value, def.interface))
    }

    /// Realizes every eager-load service. Returns how many were loaded.
    pub(crate) fn eager_load_services(&self, registry: &Arc<RegistryInner>) -> IocResult<usize> {
        let mut loaded = 0;
        for def in self.def.services.iter().filter(|def| def.eager_load) {
            let entry = self.find_or_create(registry, def)?;
            if let Some(loader) = entry.loader {
                loader.eager_load()?;
            }
            tracing::debug!(module_id = %self.module_id, service_id = %def.service_id, "eager loaded service");
            loaded += 1;
        }
        Ok(loaded)
    }

    /// The module's builder object, constructed on first use.
    ///
    /// A builder constructor that asks for its own module's builder, directly or
    /// through other services, fails with [`IocError::RecursiveModuleBuilder`].
    pub(crate) fn module_builder(&self, registry: &Arc<RegistryInner>) -> IocResult<AnyArc> {
        if let Some(builder) = self.builder.lock().as_ref() {
            return Ok(builder.clone());
        }

        let builder_def = self.def.builder.as_ref().ok_or_else(|| IocError::ModuleBuilder {
            module_id: self.module_id.to_string(),
            message: "the module declares no builder".to_string(),
        })?;

        let _lock = registry.construction_lock.lock();
        if let Some(builder) = self.builder.lock().as_ref() {
            return Ok(builder.clone());
        }

        let recursive = || IocError::RecursiveModuleBuilder {
            module_id: self.module_id.to_string(),
            builder_type: builder_def.type_name,
        };
        let _guard = ConstructionGuard::enter(&builder_key(&self.module_id), &self.module_id)
            .map_err(|_| recursive())?;

        let resources = ModuleResources::new(Arc::downgrade(registry), self.index, self.module_id.clone());
        let label = ServiceId::new(format!("{} builder", self.module_id));
        let builder = invoke_guarded(&label, "constructing module builder", || {
            (builder_def.ctor)(&resources)
        })
        .map_err(|error| match error.root_cause() {
            IocError::RecursiveModuleBuilder { module_id, .. } if **module_id == *self.module_id => {
                recursive()
            }
            _ => error,
        })?;

        tracing::debug!(
            module_id = %self.module_id,
            builder_type = builder_def.type_name,
            "constructed module builder"
        );
        *self.builder.lock() = Some(builder.clone());
        Ok(builder)
    }

    /// Drops cached proxies, values and the builder object.
    pub(crate) fn clear(&self) {
        self.services.lock().clear();
        self.builder.lock().take();
    }

    fn find_or_create(&self, registry: &Arc<RegistryInner>, def: &Arc<ServiceDef>) -> IocResult<ServiceEntry> {
        if let Some(entry) = self.services.lock().get(&def.service_id) {
            return Ok(entry.clone());
        }

        let _lock = registry.construction_lock.lock();
        if let Some(entry) = self.services.lock().get(&def.service_id) {
            return Ok(entry.clone());
        }

        let entry = self.create(registry, def)?;
        self.services.lock().insert(def.service_id.clone(), entry.clone());
        Ok(entry)
    }

    fn create(&self, registry: &Arc<RegistryInner>, def: &Arc<ServiceDef>) -> IocResult<ServiceEntry> {
        let module = ModuleResources::new(Arc::downgrade(registry), self.index, self.module_id.clone());
        let resources = ServiceResources::new(module, def.clone());

        let lifecycle = registry.lifecycles.get(&def.lifecycle).ok_or_else(|| IocError::UnknownLifecycle {
            service_id: def.service_id.to_string(),
            lifecycle: def.lifecycle.clone(),
            available: registry.lifecycles.names().join(", "),
        })?;

        let mut creator = def.create_service_creator(&resources);
        creator = Arc::new(LifecycleWrappedCreator::new(lifecycle, resources.clone(), creator));
        creator = Arc::new(InterceptorStackBuilder::new(
            def.clone(),
            resources.clone(),
            registry.find_decorators_for_service(def)?,
            creator,
        ));
        creator = Arc::new(AdvisorStackBuilder::new(
            def.clone(),
            resources,
            registry.find_advisors_for_service(def)?,
            creator,
        ));
        let creator: Arc<dyn ObjectCreator> = Arc::new(JustInTimeCreator::new(
            def.service_id.clone(),
            creator,
            registry.observers.clone(),
        ));

        match def.proxy {
            Some(kit) => {
                let lazy = kit.lazy(
                    def.service_id.clone(),
                    def.interface,
                    creator,
                    registry.construction_lock.clone(),
                );
                registry.shutdown.add(lazy.listener);
                tracing::trace!(service_id = %def.service_id, "created service proxy");
                Ok(ServiceEntry {
                    value: lazy.proxy,
                    loader: Some(lazy.loader),
                })
            }
            None => {
                let _guard = ConstructionGuard::enter(
                    &service_key(def.service_id.normalized()),
                    def.service_id.as_str(),
                )?;
                let value = creator.create_object()?;
                Ok(ServiceEntry { value, loader: None })
            }
        }
    }
}
