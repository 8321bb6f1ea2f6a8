//! Service lifecycles.
//!
//! A lifecycle decides when a service's factory runs. It sits directly above the
//! factory in the creator chain, so decorators and advice wrap whatever the
//! lifecycle returns.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::creator::ObjectCreator;
use crate::error::{IocError, IocResult};
use crate::key::AnyArc;
use crate::perthread::{PerThreadCreator, PerThreadManager};
use crate::provider::ServiceResources;

/// Name of the built-in per-thread lifecycle.
pub const PERTHREAD_LIFECYCLE: &str = "perthread";

/// Strategy controlling instantiation of a service.
///
/// # Examples
///
/// A lifecycle that builds a fresh instance per call, by handing out a proxy that
/// asks the factory every time:
///
/// ```
/// use ferrous_ioc::{AnyArc, IocResult, ObjectCreator, ServiceLifecycle, ServiceResources};
/// use std::sync::Arc;
///
/// struct PerCall;
///
/// impl ServiceLifecycle for PerCall {
///     fn create_service(
///         &self,
///         resources: &ServiceResources,
///         creator: Arc<dyn ObjectCreator>,
///     ) -> IocResult<AnyArc> {
///         resources.create_dynamic_proxy(creator)
///     }
///
///     fn requires_proxy(&self) -> bool {
///         true
///     }
/// }
/// ```
pub trait ServiceLifecycle: Send + Sync {
    /// Produces the service object from `creator`, which invokes the raw factory.
    fn create_service(
        &self,
        resources: &ServiceResources,
        creator: Arc<dyn ObjectCreator>,
    ) -> IocResult<AnyArc>;

    /// True if the lifecycle only works for proxiable interfaces.
    fn requires_proxy(&self) -> bool {
        false
    }
}

/// Calls the factory once; the surrounding chain caches the result.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingletonLifecycle;

impl ServiceLifecycle for SingletonLifecycle {
    fn create_service(
        &self,
        _resources: &ServiceResources,
        creator: Arc<dyn ObjectCreator>,
    ) -> IocResult<AnyArc> {
        creator.create_object()
    }
}

/// One instance per thread, discarded by [`Registry::cleanup_thread`](crate::Registry::cleanup_thread).
pub struct PerThreadLifecycle {
    manager: Arc<PerThreadManager>,
}

impl PerThreadLifecycle {
    pub fn new(manager: Arc<PerThreadManager>) -> Self {
        Self { manager }
    }
}

impl ServiceLifecycle for PerThreadLifecycle {
    fn create_service(
        &self,
        resources: &ServiceResources,
        creator: Arc<dyn ObjectCreator>,
    ) -> IocResult<AnyArc> {
        let per_thread = PerThreadCreator::new(
            resources.service_id().clone(),
            self.manager.clone(),
            creator,
        );
        resources.create_dynamic_proxy(Arc::new(per_thread))
    }

    fn requires_proxy(&self) -> bool {
        true
    }
}

/// Lifecycles by case-insensitive name.
#[derive(Clone)]
pub struct LifecycleSource {
    lifecycles: HashMap<String, Arc<dyn ServiceLifecycle>>,
}

impl LifecycleSource {
    /// The built-in `singleton` and `perthread` lifecycles.
    pub fn new(per_thread: Arc<PerThreadManager>) -> Self {
        let mut lifecycles: HashMap<String, Arc<dyn ServiceLifecycle>> = HashMap::new();
        lifecycles.insert(
            crate::descriptors::DEFAULT_LIFECYCLE.to_string(),
            Arc::new(SingletonLifecycle),
        );
        lifecycles.insert(
            PERTHREAD_LIFECYCLE.to_string(),
            Arc::new(PerThreadLifecycle::new(per_thread)),
        );
        Self { lifecycles }
    }

    /// Adds a named lifecycle. Names may not be reused.
    pub fn add(&mut self, name: &str, lifecycle: Arc<dyn ServiceLifecycle>) -> IocResult<()> {
        let key = name.to_lowercase();
        if self.lifecycles.contains_key(&key) {
            return Err(IocError::Configuration(format!(
                "lifecycle '{name}' is already defined"
            )));
        }
        self.lifecycles.insert(key, lifecycle);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ServiceLifecycle>> {
        self.lifecycles.get(&name.to_lowercase()).cloned()
    }

    /// Sorted lifecycle names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lifecycles.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for LifecycleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleSource")
            .field("names", &self.names())
            .finish()
    }
}
