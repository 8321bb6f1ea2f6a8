//! Shutdown and startup capabilities of registry-managed objects.

use crate::error::IocResult;

/// Notified once when the owning registry shuts down.
///
/// Every proxy the registry hands out registers itself as a listener, so after
/// [`Registry::shutdown`](crate::Registry::shutdown) all of them fail fast. Applications
/// may register their own listeners through
/// [`Registry::add_registry_shutdown_listener`](crate::Registry::add_registry_shutdown_listener).
///
/// # Examples
///
/// ```
/// use ferrous_ioc::{RegistryBuilder, RegistryShutdownListener};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// struct FlushOnShutdown(AtomicBool);
///
/// impl RegistryShutdownListener for FlushOnShutdown {
///     fn registry_did_shutdown(&self) {
///         self.0.store(true, Ordering::SeqCst);
///     }
/// }
///
/// let registry = RegistryBuilder::new().build().unwrap();
/// let listener = Arc::new(FlushOnShutdown(AtomicBool::new(false)));
/// registry.add_registry_shutdown_listener(listener.clone());
///
/// registry.shutdown().unwrap();
/// assert!(listener.0.load(Ordering::SeqCst));
/// ```
pub trait RegistryShutdownListener: Send + Sync {
    /// Invoked once, after which the listener should release what it holds.
    fn registry_did_shutdown(&self);

    /// Name used when a failing listener is logged.
    fn describe(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Objects that can be forced from their lazy state during registry startup.
pub trait EagerLoad: Send + Sync {
    /// Realizes the object now instead of on first use.
    fn eager_load(&self) -> IocResult<()>;
}
