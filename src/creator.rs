//! Object creators: the deferred construction steps a service is built from.
//!
//! A service is realized by a chain of creators, innermost to outermost:
//!
//! 1. [`ConstructorCreator`] invokes the service factory.
//! 2. [`LifecycleWrappedCreator`] hands that creator to the service lifecycle.
//! 3. [`InterceptorStackBuilder`](crate::decoration::InterceptorStackBuilder) applies decorators.
//! 4. [`AdvisorStackBuilder`](crate::aop::AdvisorStackBuilder) applies method advice.
//! 5. [`JustInTimeCreator`] runs everything above at most once.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::descriptors::ServiceFactory;
use crate::error::{IocError, IocResult};
use crate::key::{AnyArc, ServiceId};
use crate::lifecycle::ServiceLifecycle;
use crate::observer::Observers;
use crate::provider::ServiceResources;

/// A deferred construction step.
///
/// Closures returning `IocResult<AnyArc>` are creators too, which is convenient
/// for custom lifecycles and tests.
pub trait ObjectCreator: Send + Sync {
    /// Produces the object. May be called more than once, depending on the creator.
    fn create_object(&self) -> IocResult<AnyArc>;
}

impl<F> ObjectCreator for F
where
    F: Fn() -> IocResult<AnyArc> + Send + Sync,
{
    fn create_object(&self) -> IocResult<AnyArc> {
        self()
    }
}

/// Runs `f`, converting both errors and panics into a construction error for
/// `service_id`.
///
/// A panic whose payload is an [`IocError`] (as raised by a proxy whose delegate
/// cannot be resolved) is unwrapped rather than reported as an opaque panic.
/// Shutdown errors pass through unchanged.
pub(crate) fn invoke_guarded<T>(
    service_id: &ServiceId,
    construct: &str,
    f: impl FnOnce() -> IocResult<T>,
) -> IocResult<T> {
    let error = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(error)) => error,
        Err(payload) => error_from_panic(payload),
    };
    if error.is_shutdown() {
        return Err(error);
    }
    Err(IocError::construction(service_id.as_str(), construct, error))
}

pub(crate) fn error_from_panic(payload: Box<dyn Any + Send>) -> IocError {
    let payload = match payload.downcast::<IocError>() {
        Ok(error) => return *error,
        Err(payload) => payload,
    };
    if let Some(message) = payload.downcast_ref::<String>() {
        IocError::Custom(format!("panicked: {message}"))
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        IocError::Custom(format!("panicked: {message}"))
    } else {
        IocError::Custom("panicked with a non-string payload".to_string())
    }
}

/// Invokes a service factory.
pub struct ConstructorCreator {
    service_id: ServiceId,
    construct: &'static str,
    factory: ServiceFactory,
    resources: ServiceResources,
}

impl ConstructorCreator {
    pub(crate) fn new(
        service_id: ServiceId,
        construct: &'static str,
        factory: ServiceFactory,
        resources: ServiceResources,
    ) -> Self {
        Self {
            service_id,
            construct,
            factory,
            resources,
        }
    }
}

impl ObjectCreator for ConstructorCreator {
    fn create_object(&self) -> IocResult<AnyArc> {
        tracing::debug!(service_id = %self.service_id, "{}", self.construct);
        invoke_guarded(&self.service_id, self.construct, || {
            (self.factory)(&self.resources)
        })
    }
}

/// Lets the service lifecycle decide when the inner creator runs.
pub struct LifecycleWrappedCreator {
    lifecycle: Arc<dyn ServiceLifecycle>,
    resources: ServiceResources,
    inner: Arc<dyn ObjectCreator>,
}

impl LifecycleWrappedCreator {
    pub(crate) fn new(
        lifecycle: Arc<dyn ServiceLifecycle>,
        resources: ServiceResources,
        inner: Arc<dyn ObjectCreator>,
    ) -> Self {
        Self {
            lifecycle,
            resources,
            inner,
        }
    }
}

impl ObjectCreator for LifecycleWrappedCreator {
    fn create_object(&self) -> IocResult<AnyArc> {
        self.lifecycle.create_service(&self.resources, self.inner.clone())
    }
}

/// Runs the wrapped chain at most once and caches the result.
///
/// The inner chain is released after the first success so the closures it
/// captured can be dropped. A failure is not cached: a later call runs the chain
/// again.
pub struct JustInTimeCreator {
    service_id: ServiceId,
    creator: Mutex<Option<Arc<dyn ObjectCreator>>>,
    value: OnceCell<AnyArc>,
    observers: Observers,
}

impl JustInTimeCreator {
    pub(crate) fn new(
        service_id: ServiceId,
        creator: Arc<dyn ObjectCreator>,
        observers: Observers,
    ) -> Self {
        Self {
            service_id,
            creator: Mutex::new(Some(creator)),
            value: OnceCell::new(),
            observers,
        }
    }

    /// True once the service has been realized.
    pub fn is_realized(&self) -> bool {
        self.value.get().is_some()
    }
}

impl ObjectCreator for JustInTimeCreator {
    fn create_object(&self) -> IocResult<AnyArc> {
        self.value
            .get_or_try_init(|| {
                let creator = self.creator.lock().clone().ok_or_else(|| {
                    IocError::Custom(format!(
                        "creator for service '{}' was released before realization",
                        self.service_id
                    ))
                })?;

                self.observers.realizing(&self.service_id);
                let started = Instant::now();
                match creator.create_object() {
                    Ok(value) => {
                        self.observers.realized(&self.service_id, started.elapsed());
                        self.creator.lock().take();
                        Ok(value)
                    }
                    Err(error) => {
                        self.observers.failed(&self.service_id, &error);
                        Err(error)
                    }
                }
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::erase;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn just_in_time_runs_once_and_releases_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner: Arc<dyn ObjectCreator> = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, IocError>(erase(Arc::new(5u32)))
        });

        let jit = JustInTimeCreator::new(ServiceId::new("Five"), inner, Observers::default());
        assert!(!jit.is_realized());
        let first = jit.create_object().unwrap();
        let second = jit.create_object().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(jit.is_realized());
        assert!(jit.creator.lock().is_none());
    }

    #[test]
    fn just_in_time_does_not_cache_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let inner: Arc<dyn ObjectCreator> = Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(IocError::custom("not yet"))
            } else {
                Ok(erase(Arc::new(1u8)))
            }
        });

        let jit = JustInTimeCreator::new(ServiceId::new("Flaky"), inner, Observers::default());
        assert!(jit.create_object().is_err());
        assert!(jit.create_object().is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn guarded_invocation_wraps_panics() {
        let id = ServiceId::new("Exploding");
        let err = invoke_guarded::<()>(&id, "invoking factory", || panic!("kaboom")).unwrap_err();
        match err {
            IocError::Construction { service_id, construct, cause } => {
                assert_eq!(service_id, "Exploding");
                assert_eq!(construct, "invoking factory");
                assert!(cause.to_string().contains("kaboom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn guarded_invocation_unwraps_error_payloads() {
        let id = ServiceId::new("Client");
        let err = invoke_guarded::<()>(&id, "invoking factory", || {
            std::panic::panic_any(IocError::RegistryShutdown("Upstream".into()))
        })
        .unwrap_err();
        assert!(err.is_shutdown());

        let err = invoke_guarded::<()>(&id, "invoking factory", || {
            std::panic::panic_any(IocError::custom("inner"))
        })
        .unwrap_err();
        assert_eq!(err.root_cause().to_string(), "inner");
    }
}
