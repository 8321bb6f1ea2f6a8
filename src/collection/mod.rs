//! Registry construction.
//!
//! This module contains the [`RegistryBuilder`], which collects module
//! definitions and registry-wide contributions and validates them into a
//! [`Registry`].

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{IocError, IocResult};
use crate::key::{erase, InterfaceId, ServiceId};
use crate::lifecycle::{LifecycleSource, ServiceLifecycle};
use crate::observer::{Observers, RegistryObserver};
use crate::ordering::validate_constraints;
use crate::perthread::PerThreadManager;
use crate::provider::{Registry, RegistryParts};
use crate::registration::ModuleDef;
use crate::symbols::{MapSymbolProvider, SymbolProvider, SymbolSource};
use crate::traits::LocatedService;

pub mod module_system;
pub use module_system::*;

/// Collects modules and contributions, then builds a [`Registry`].
///
/// Every configuration problem that can be detected without constructing a
/// service is reported by [`build`](RegistryBuilder::build).
///
/// # Examples
///
/// ```
/// use ferrous_ioc::{service_interface, IocResult, RegistryBuilder};
/// use std::sync::Arc;
///
/// service_interface! {
///     pub trait Greeter {
///         fn greet(&self, name: &str) -> String;
///     }
/// }
///
/// struct Hello {
///     greeting: String,
/// }
///
/// impl Greeter for Hello {
///     fn greet(&self, name: &str) -> String {
///         format!("{}, {name}!", self.greeting)
///     }
/// }
///
/// # fn main() -> IocResult<()> {
/// let mut builder = RegistryBuilder::new();
/// builder.application_default("greeting", "Hello");
/// builder.add_module_fn("app", |module| {
///     module
///         .service::<dyn Greeter, _>("Greeter", |resources| {
///             let greeting = resources.symbol("greeting")?;
///             Ok(Arc::new(Hello { greeting }) as Arc<dyn Greeter>)
///         })
///         .eager_load();
///     Ok(())
/// })?;
///
/// let registry = builder.build()?;
/// registry.perform_registry_startup()?;
/// assert_eq!(registry.get_service::<dyn Greeter>("greeter")?.greet("Ada"), "Hello, Ada!");
/// registry.shutdown()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RegistryBuilder {
    modules: Vec<ModuleDef>,
    lifecycles: Vec<(String, Arc<dyn ServiceLifecycle>)>,
    symbol_providers: Vec<Arc<dyn SymbolProvider>>,
    application_defaults: MapSymbolProvider,
    observers: Vec<Arc<dyn RegistryObserver>>,
    resources: HashMap<TypeId, LocatedService>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module configured by a [`ServiceModule`].
    pub fn add_module<M: ServiceModule>(&mut self, module: M) -> IocResult<&mut Self> {
        let mut definitions = ModuleDefBuilder::new(module.module_id());
        module.configure(&mut definitions)?;
        self.modules.push(definitions.finish()?);
        Ok(self)
    }

    /// Adds a module configured by a closure.
    pub fn add_module_fn<F>(&mut self, module_id: &str, configure: F) -> IocResult<&mut Self>
    where
        F: FnOnce(&mut ModuleDefBuilder) -> IocResult<()>,
    {
        let mut definitions = ModuleDefBuilder::new(module_id);
        configure(&mut definitions)?;
        self.modules.push(definitions.finish()?);
        Ok(self)
    }

    /// Adds an already finished module definition.
    pub fn add_module_def(&mut self, module: ModuleDef) -> &mut Self {
        self.modules.push(module);
        self
    }

    /// Contributes a named lifecycle. Names are case-insensitive and may not
    /// shadow `singleton`, `perthread` or another contribution.
    pub fn add_lifecycle(&mut self, name: &str, lifecycle: Arc<dyn ServiceLifecycle>) -> &mut Self {
        self.lifecycles.push((name.to_string(), lifecycle));
        self
    }

    /// Adds a symbol provider. Providers are consulted in the order added, and
    /// all of them before the application defaults.
    pub fn add_symbol_provider(&mut self, provider: Arc<dyn SymbolProvider>) -> &mut Self {
        self.symbol_providers.push(provider);
        self
    }

    /// Sets the lowest-priority value of a symbol.
    pub fn application_default(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.application_defaults.insert(name, value);
        self
    }

    pub fn add_observer(&mut self, observer: Arc<dyn RegistryObserver>) -> &mut Self {
        self.observers.push(observer);
        self
    }

    /// Makes `value` injectable through
    /// [`ServiceResources::resource`](crate::ServiceResources::resource).
    pub fn add_resource<T: ?Sized + Send + Sync + 'static>(&mut self, value: Arc<T>) -> &mut Self {
        self.resources
            .insert(TypeId::of::<T>(), LocatedService::new(erase(value), InterfaceId::of::<T>()));
        self
    }

    /// Validates all definitions and builds the registry.
    ///
    /// No service is constructed here; see
    /// [`Registry::perform_registry_startup`] for eager loading.
    pub fn build(self) -> IocResult<Registry> {
        let per_thread = Arc::new(PerThreadManager::new());
        let mut lifecycles = LifecycleSource::new(per_thread.clone());
        for (name, lifecycle) in self.lifecycles {
            lifecycles.add(&name, lifecycle)?;
        }

        validate_services(&self.modules, &lifecycles)?;
        validate_contributions(&self.modules)?;

        let mut providers = self.symbol_providers;
        if !self.application_defaults.is_empty() {
            providers.push(Arc::new(self.application_defaults));
        }

        let service_count: usize = self.modules.iter().map(|module| module.services.len()).sum();
        tracing::info!(
            modules = self.modules.len(),
            services = service_count,
            "registry built"
        );

        Ok(Registry::from_parts(RegistryParts {
            modules: self.modules,
            lifecycles,
            per_thread,
            symbols: SymbolSource::new(providers),
            observers: Observers::new(self.observers),
            resources: self.resources,
        }))
    }
}

fn validate_services(modules: &[ModuleDef], lifecycles: &LifecycleSource) -> IocResult<()> {
    let mut owners: HashMap<&ServiceId, &str> = HashMap::new();
    for module in modules {
        for def in &module.services {
            if let Some(existing) = owners.insert(&def.service_id, &module.module_id) {
                return Err(IocError::DuplicateServiceId {
                    service_id: def.service_id.to_string(),
                    existing_module: existing.to_string(),
                    duplicate_module: module.module_id.clone(),
                });
            }

            let lifecycle = lifecycles
                .get(&def.lifecycle)
                .ok_or_else(|| IocError::UnknownLifecycle {
                    service_id: def.service_id.to_string(),
                    lifecycle: def.lifecycle.clone(),
                    available: lifecycles.names().join(", "),
                })?;
            if lifecycle.requires_proxy() && !def.is_proxied() {
                return Err(IocError::Configuration(format!(
                    "service '{}' uses lifecycle '{}', which needs a proxiable interface, but {} is not proxiable",
                    def.service_id,
                    def.lifecycle,
                    def.interface.name()
                )));
            }
        }
    }
    Ok(())
}

fn validate_contributions(modules: &[ModuleDef]) -> IocResult<()> {
    let decorators: Vec<_> = modules.iter().flat_map(|m| m.decorators.iter().cloned()).collect();
    let advisors: Vec<_> = modules.iter().flat_map(|m| m.advisors.iter().cloned()).collect();

    for decorator in &decorators {
        decorator.matcher.validate(&decorator.id)?;
    }
    for advisor in &advisors {
        advisor.matcher.validate(&advisor.id)?;
    }
    validate_constraints(&decorators)?;
    validate_constraints(&advisors)?;

    for advisor in &advisors {
        let unproxied = modules
            .iter()
            .flat_map(|m| m.services.iter())
            .find(|def| !def.is_proxied() && advisor.matches(def));
        if let Some(def) = unproxied {
            return Err(IocError::Configuration(format!(
                "advisor '{}' matches service '{}', which is not proxied and cannot be advised",
                advisor.id, def.service_id
            )));
        }
    }
    Ok(())
}
