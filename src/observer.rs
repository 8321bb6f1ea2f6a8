//! Observation hooks for service realization.
//!
//! Observers are notified around every realization of a service implementation:
//! when construction starts, when it completes and when it fails. They are meant
//! for tracing and diagnostics and must not call back into the registry.

use std::sync::Arc;
use std::time::Duration;

use crate::error::IocError;
use crate::key::ServiceId;

/// Receives realization events from the registry.
///
/// All methods default to doing nothing, so implementations only override the
/// events they care about.
///
/// # Examples
///
/// ```
/// use ferrous_ioc::{RegistryBuilder, RegistryObserver, ServiceId};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct Counting(AtomicUsize);
///
/// impl RegistryObserver for Counting {
///     fn realized(&self, _service_id: &ServiceId, _duration: Duration) {
///         self.0.fetch_add(1, Ordering::SeqCst);
///     }
/// }
///
/// let observer = Arc::new(Counting::default());
/// let mut builder = RegistryBuilder::new();
/// builder.add_observer(observer.clone());
/// let _registry = builder.build().unwrap();
/// assert_eq!(observer.0.load(Ordering::SeqCst), 0);
/// ```
pub trait RegistryObserver: Send + Sync {
    /// Called before the creator chain of a service runs.
    fn realizing(&self, _service_id: &ServiceId) {}

    /// Called after the service was realized, with the time the chain took.
    fn realized(&self, _service_id: &ServiceId, _duration: Duration) {}

    /// Called when realization failed. The registry will try again on next use.
    fn failed(&self, _service_id: &ServiceId, _error: &IocError) {}
}

/// The registry's observer list.
#[derive(Clone, Default)]
pub(crate) struct Observers {
    observers: Arc<Vec<Arc<dyn RegistryObserver>>>,
}

impl Observers {
    pub(crate) fn new(observers: Vec<Arc<dyn RegistryObserver>>) -> Self {
        Self {
            observers: Arc::new(observers),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn realizing(&self, service_id: &ServiceId) {
        for observer in self.observers.iter() {
            observer.realizing(service_id);
        }
    }

    pub(crate) fn realized(&self, service_id: &ServiceId, duration: Duration) {
        for observer in self.observers.iter() {
            observer.realized(service_id, duration);
        }
    }

    pub(crate) fn failed(&self, service_id: &ServiceId, error: &IocError) {
        for observer in self.observers.iter() {
            observer.failed(service_id, error);
        }
    }
}

/// Observer that reports realization through `tracing`.
///
/// Starts are logged at `TRACE`, completions at `DEBUG` and failures at `WARN`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TracingObserver {
    pub fn new() -> Self {
        Self
    }
}

impl RegistryObserver for TracingObserver {
    fn realizing(&self, service_id: &ServiceId) {
        tracing::trace!(service_id = %service_id, "realizing service");
    }

    fn realized(&self, service_id: &ServiceId, duration: Duration) {
        tracing::debug!(
            service_id = %service_id,
            elapsed_ms = duration.as_secs_f64() * 1000.0,
            "realized service"
        );
    }

    fn failed(&self, service_id: &ServiceId, error: &IocError) {
        tracing::warn!(service_id = %service_id, error = %error, "service realization failed");
    }
}
