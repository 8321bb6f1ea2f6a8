//! In-progress markers for recursive construction detection.

use std::cell::RefCell;

use parking_lot::ReentrantMutex;

use crate::error::{IocError, IocResult};

/// Registry-wide lock held while anything is constructed.
///
/// Reentrant because building one service routinely realizes its dependencies on
/// the same thread.
pub(crate) type ConstructionLock = ReentrantMutex<()>;

const MAX_DEPTH: usize = 256;

// Construction keys currently being built on this thread, outermost first.
thread_local! {
    static CONSTRUCTION_TLS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

/// Marks a construction key (service or module builder) as in progress on the current thread.
///
/// All construction runs under the registry's reentrant construction lock, so the only
/// thread that can observe a key as in progress is the one building it. Seeing the key a
/// second time therefore always means recursion, never contention.
pub(crate) struct ConstructionGuard {
    key: String,
}

impl ConstructionGuard {
    /// Pushes `key`, failing if it is already on the stack.
    pub(crate) fn enter(key: &str, service_id: &str) -> IocResult<Self> {
        CONSTRUCTION_TLS.with(|tls| {
            let mut stack = tls.borrow_mut();

            // Depth guard covers recursion through keys that differ on every level.
            if stack.iter().any(|k| k == key) || stack.len() >= MAX_DEPTH {
                let mut path = stack.clone();
                path.push(key.to_string());
                return Err(IocError::RecursiveConstruction {
                    service_id: service_id.to_string(),
                    path,
                });
            }

            stack.push(key.to_string());
            Ok(Self { key: key.to_string() })
        })
    }

    /// Returns true if `key` is being constructed on this thread.
    #[cfg(test)]
    pub(crate) fn is_active(key: &str) -> bool {
        CONSTRUCTION_TLS.with(|tls| tls.borrow().iter().any(|k| k == key))
    }
}

impl Drop for ConstructionGuard {
    fn drop(&mut self) {
        CONSTRUCTION_TLS.with(|tls| {
            let mut stack = tls.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|k| *k == self.key) {
                stack.truncate(pos);
            }
        });
    }
}

/// Construction key for a service.
pub(crate) fn service_key(normalized_id: &str) -> String {
    format!("service:{normalized_id}")
}

/// Construction key for a module builder.
pub(crate) fn builder_key(module_id: &str) -> String {
    format!("module-builder:{}", module_id.to_lowercase())
}
