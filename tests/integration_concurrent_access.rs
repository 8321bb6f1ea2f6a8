/// Concurrent access integration tests
///
/// A proxy shared between threads must realize its service exactly once, and
/// every thread must observe that same implementation.
use ferrous_ioc::{service_interface, Registry, RegistryBuilder, ServiceLocator, PERTHREAD_LIFECYCLE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

service_interface! {
    pub trait Counter {
        fn increment(&self) -> usize;
        fn instance(&self) -> usize;
    }
}

struct AtomicCounter {
    instance: usize,
    count: AtomicUsize,
}

impl Counter for AtomicCounter {
    fn increment(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn instance(&self) -> usize {
        self.instance
    }
}

const THREADS: usize = 16;

fn counting_registry(builds: Arc<AtomicUsize>, lifecycle: &'static str) -> Registry {
    let mut builder = RegistryBuilder::new();
    builder
        .add_module_fn("counters", move |module| {
            module
                .service::<dyn Counter, _>("Counter", move |_| {
                    let instance = builds.fetch_add(1, Ordering::SeqCst);
                    // widen the race window
                    thread::sleep(Duration::from_millis(20));
                    Ok(Arc::new(AtomicCounter {
                        instance,
                        count: AtomicUsize::new(0),
                    }) as Arc<dyn Counter>)
                })
                .lifecycle(lifecycle);
            Ok(())
        })
        .unwrap();
    builder.build().unwrap()
}

#[test]
fn shared_proxy_realizes_once() {
    let builds = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(builds.clone(), "singleton");
    let counter = registry.get_service::<dyn Counter>("Counter").unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = counter.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                counter.increment();
                counter.instance()
            })
        })
        .collect();

    let instances: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(instances.iter().all(|&instance| instance == 0));
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(counter.increment(), THREADS + 1);
}

#[test]
fn concurrent_lookups_return_one_proxy() {
    let builds = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(builds.clone(), "singleton");
    let barrier = Barrier::new(THREADS);

    let proxies: Vec<Arc<dyn Counter>> = crossbeam_utils::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|_| {
                    barrier.wait();
                    let counter = registry.get_service::<dyn Counter>("counter").unwrap();
                    counter.increment();
                    counter
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    for proxy in &proxies[1..] {
        assert!(Arc::ptr_eq(&proxies[0], proxy));
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
    assert_eq!(proxies[0].increment(), THREADS + 1);
}

#[test]
fn perthread_services_are_isolated_per_thread() {
    let builds = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(builds.clone(), PERTHREAD_LIFECYCLE);
    let counter = registry.get_service::<dyn Counter>("Counter").unwrap();
    let barrier = Barrier::new(4);

    crossbeam_utils::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|_| {
                barrier.wait();
                assert_eq!(counter.increment(), 1);
                assert_eq!(counter.increment(), 2);
            });
        }
    })
    .unwrap();

    assert_eq!(builds.load(Ordering::SeqCst), 4);
}

#[test]
fn shutdown_while_threads_are_calling() {
    let builds = Arc::new(AtomicUsize::new(0));
    let registry = counting_registry(builds, "singleton");
    let counter = registry.get_service::<dyn Counter>("Counter").unwrap();
    counter.increment();

    let barrier = Arc::new(Barrier::new(THREADS + 1));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let counter = counter.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| counter.increment())).is_ok()
            })
        })
        .collect();

    barrier.wait();
    registry.shutdown().unwrap();
    // Calls racing the shutdown may go either way, but none may hang.
    for handle in handles {
        handle.join().unwrap();
    }

    let error = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| counter.increment()))
        .unwrap_err()
        .downcast::<ferrous_ioc::IocError>()
        .unwrap();
    assert!(error.is_shutdown());
}

/// Builder object shared by every shard service.
struct ShardPool {
    base: usize,
}

#[test]
fn module_builder_is_constructed_once_under_concurrent_first_use() {
    let constructions = Arc::new(AtomicUsize::new(0));
    let builder_constructions = constructions.clone();

    let mut builder = RegistryBuilder::new();
    builder
        .add_module_fn("shards", move |module| {
            module.builder::<ShardPool, _>(move |_| {
                builder_constructions.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(30));
                Ok(ShardPool { base: 100 })
            });
            for shard in 0..THREADS {
                module.service_from_builder::<dyn Counter, ShardPool, _>(&format!("Shard{shard}"), move |pool, _| {
                    Ok(Arc::new(AtomicCounter {
                        instance: pool.base + shard,
                        count: AtomicUsize::new(0),
                    }) as Arc<dyn Counter>)
                });
            }
            Ok(())
        })
        .unwrap();
    let registry = builder.build().unwrap();
    let barrier = Barrier::new(THREADS);

    let instances: Vec<usize> = crossbeam_utils::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|shard| {
                let (registry, barrier) = (&registry, &barrier);
                scope.spawn(move |_| {
                    let counter = registry.get_service::<dyn Counter>(&format!("shard{shard}")).unwrap();
                    barrier.wait();
                    counter.instance()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
    .unwrap();

    assert_eq!(constructions.load(Ordering::SeqCst), 1);
    assert_eq!(instances, (0..THREADS).map(|shard| 100 + shard).collect::<Vec<_>>());
}
