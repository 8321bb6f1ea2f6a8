//! Registry shutdown notification.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::traits::RegistryShutdownListener;

/// Listeners waiting for registry shutdown.
///
/// Registration after shutdown is refused: the listener is notified immediately
/// instead, which keeps a proxy built during a shutdown race from staying live.
#[derive(Default)]
pub(crate) struct ShutdownHub {
    inner: Mutex<HubState>,
}

#[derive(Default)]
struct HubState {
    listeners: Vec<Arc<dyn RegistryShutdownListener>>,
    fired: bool,
}

impl ShutdownHub {
    pub(crate) fn add(&self, listener: Arc<dyn RegistryShutdownListener>) {
        let fired = {
            let mut state = self.inner.lock();
            if !state.fired {
                state.listeners.push(listener.clone());
            }
            state.fired
        };
        if fired {
            notify_one(listener.as_ref());
        }
    }

    /// Notifies every listener once. Returns the number of listeners that panicked,
    /// or `None` if the hub had already fired.
    pub(crate) fn fire(&self) -> Option<usize> {
        let listeners = {
            let mut state = self.inner.lock();
            if state.fired {
                return None;
            }
            state.fired = true;
            std::mem::take(&mut state.listeners)
        };

        let failures = listeners
            .iter()
            .filter(|listener| !notify_one(listener.as_ref()))
            .count();
        Some(failures)
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.inner.lock().fired
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

fn notify_one(listener: &dyn RegistryShutdownListener) -> bool {
    match catch_unwind(AssertUnwindSafe(|| listener.registry_did_shutdown())) {
        Ok(()) => true,
        Err(payload) => {
            let message = payload
                .downcast_ref::<String>()
                .map(String::as_str)
                .or_else(|| payload.downcast_ref::<&'static str>().copied())
                .unwrap_or("non-string panic payload");
            tracing::error!(
                listener = listener.describe(),
                "registry shutdown listener failed: {message}"
            );
            false
        }
    }
}
