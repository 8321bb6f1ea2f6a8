//! Per-thread service instances.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::creator::ObjectCreator;
use crate::error::IocResult;
use crate::internal::ConstructionGuard;
use crate::key::{AnyArc, ServiceId};

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(0);

struct Slot {
    epoch: u64,
    value: AnyArc,
}

thread_local! {
    // Keyed by (manager id, slot key). Dropped with the thread.
    static SLOTS: RefCell<HashMap<(u64, u64), Slot>> = RefCell::new(HashMap::new());
}

/// Storage for values that live until their thread is cleaned up or exits.
///
/// Backs the `perthread` lifecycle. Values sit in thread-local storage, so a
/// thread that ends releases its instances without any help. Long-lived worker
/// threads call [`Registry::cleanup_thread`](crate::Registry::cleanup_thread) at
/// the end of each request so the next request starts with fresh instances.
pub struct PerThreadManager {
    id: u64,
    next_key: AtomicU64,
    epoch: AtomicU64,
}

impl Default for PerThreadManager {
    fn default() -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            next_key: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
        }
    }
}

impl PerThreadManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a slot key, unique within this manager.
    pub fn allocate_key(&self) -> u64 {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// The current thread's value for `key`.
    pub fn get(&self, key: u64) -> Option<AnyArc> {
        let epoch = self.current_epoch();
        SLOTS
            .try_with(|slots| {
                slots
                    .borrow()
                    .get(&(self.id, key))
                    .filter(|slot| slot.epoch == epoch)
                    .map(|slot| slot.value.clone())
            })
            .ok()
            .flatten()
    }

    /// Stores the current thread's value for `key`.
    ///
    /// Does nothing once the thread is tearing down its thread-local storage.
    pub fn put(&self, key: u64, value: AnyArc) {
        let slot = Slot {
            epoch: self.current_epoch(),
            value,
        };
        // The replaced value is dropped outside the borrow; its destructor may call back in.
        let _replaced = SLOTS
            .try_with(|slots| slots.borrow_mut().insert((self.id, key), slot))
            .ok()
            .flatten();
    }

    /// Discards every value this manager stored on the current thread. Returns how
    /// many live values were dropped.
    pub fn cleanup_thread(&self) -> usize {
        let epoch = self.current_epoch();
        let removed = self.take_current_thread();
        removed.iter().filter(|slot| slot.epoch == epoch).count()
    }

    /// Discards the values of every thread.
    ///
    /// The current thread's values are dropped now. Other threads drop theirs on
    /// their next use of this manager, at cleanup or when they exit.
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        drop(self.take_current_thread());
    }

    fn take_current_thread(&self) -> Vec<Slot> {
        SLOTS
            .try_with(|slots| {
                let mut slots = slots.borrow_mut();
                let keys: Vec<(u64, u64)> = slots
                    .keys()
                    .filter(|(manager, _)| *manager == self.id)
                    .copied()
                    .collect();
                keys.into_iter()
                    .filter_map(|key| slots.remove(&key))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for PerThreadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerThreadManager")
            .field("id", &self.id)
            .field("epoch", &self.current_epoch())
            .finish()
    }
}

/// Creator that builds one instance per thread through the manager.
pub(crate) struct PerThreadCreator {
    service_id: ServiceId,
    key: u64,
    manager: Arc<PerThreadManager>,
    inner: Arc<dyn ObjectCreator>,
}

impl PerThreadCreator {
    pub(crate) fn new(
        service_id: ServiceId,
        manager: Arc<PerThreadManager>,
        inner: Arc<dyn ObjectCreator>,
    ) -> Self {
        let key = manager.allocate_key();
        Self {
            service_id,
            key,
            manager,
            inner,
        }
    }
}

impl ObjectCreator for PerThreadCreator {
    fn create_object(&self) -> IocResult<AnyArc> {
        if let Some(value) = self.manager.get(self.key) {
            return Ok(value);
        }

        let marker = format!("perthread:{}", self.service_id.normalized());
        let _guard = ConstructionGuard::enter(&marker, self.service_id.as_str())?;
        let value = self.inner.create_object()?;
        tracing::trace!(service_id = %self.service_id, "created per-thread instance");
        self.manager.put(self.key, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IocError;
    use crate::key::erase;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn creator(manager: &Arc<PerThreadManager>, builds: &Arc<AtomicUsize>) -> PerThreadCreator {
        let builds = builds.clone();
        PerThreadCreator::new(
            ServiceId::new("RequestState"),
            manager.clone(),
            Arc::new(move || {
                let n = builds.fetch_add(1, Ordering::SeqCst);
                Ok::<_, IocError>(erase(Arc::new(n)))
            }),
        )
    }

    #[test]
    fn one_instance_per_thread_until_cleanup() {
        let manager = Arc::new(PerThreadManager::new());
        let builds = Arc::new(AtomicUsize::new(0));
        let creator = Arc::new(creator(&manager, &builds));

        let a = creator.create_object().unwrap();
        let b = creator.create_object().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let other = creator.clone();
        let c = thread::spawn(move || other.create_object().unwrap()).join().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(builds.load(Ordering::SeqCst), 2);

        assert_eq!(manager.cleanup_thread(), 1);
        let d = creator.create_object().unwrap();
        assert!(!Arc::ptr_eq(&a, &d));
        assert_eq!(builds.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn keys_are_distinct() {
        let manager = PerThreadManager::new();
        assert_ne!(manager.allocate_key(), manager.allocate_key());
        manager.put(7, erase(Arc::new(1u8)));
        manager.clear();
        assert!(manager.get(7).is_none());
    }

    #[test]
    fn managers_do_not_share_slots() {
        let first = PerThreadManager::new();
        let second = PerThreadManager::new();
        first.put(0, erase(Arc::new(1u8)));

        assert!(second.get(0).is_none());
        assert_eq!(second.cleanup_thread(), 0);
        assert!(first.get(0).is_some());
        assert_eq!(first.cleanup_thread(), 1);
    }

    #[test]
    fn clear_invalidates_values_held_by_other_threads() {
        let manager = Arc::new(PerThreadManager::new());
        let (stored, cleared) = (Arc::new(std::sync::Barrier::new(2)), Arc::new(std::sync::Barrier::new(2)));

        let worker = {
            let (manager, stored, cleared) = (manager.clone(), stored.clone(), cleared.clone());
            thread::spawn(move || {
                manager.put(0, erase(Arc::new(1u8)));
                stored.wait();
                cleared.wait();
                (manager.get(0).is_none(), manager.cleanup_thread())
            })
        };

        stored.wait();
        manager.clear();
        cleared.wait();
        assert_eq!(worker.join().unwrap(), (true, 0));
    }

    #[test]
    fn values_drop_when_their_thread_exits() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let manager = Arc::new(PerThreadManager::new());
        let drops = Arc::new(AtomicUsize::new(0));
        let key = manager.allocate_key();

        let (manager_in_thread, drops_in_thread) = (manager.clone(), drops.clone());
        thread::spawn(move || {
            manager_in_thread.put(key, erase(Arc::new(Tracked(drops_in_thread))));
            assert!(manager_in_thread.get(key).is_some());
        })
        .join()
        .unwrap();

        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
