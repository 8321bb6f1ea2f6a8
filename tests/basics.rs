use ferrous_ioc::{
    service_interface, IocError, Registry, RegistryBuilder, RegistryShutdownListener, ServiceId,
    ServiceLocator,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

service_interface! {
    pub trait Greeter {
        fn greet(&self, name: &str) -> String;
    }
}

service_interface! {
    pub trait Clock {
        fn now(&self) -> u64;
    }
}

struct Hello;
impl Greeter for Hello {
    fn greet(&self, name: &str) -> String {
        format!("Hello, {name}")
    }
}

struct FixedClock(u64);
impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0
    }
}

struct Config {
    port: u16,
}

fn registry_with_builds(builds: Arc<AtomicUsize>) -> Registry {
    let mut builder = RegistryBuilder::new();
    builder
        .add_module_fn("app", move |module| {
            let greeter_builds = builds.clone();
            module.service::<dyn Greeter, _>("Greeter", move |_| {
                greeter_builds.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(Hello) as Arc<dyn Greeter>)
            });
            module.service::<dyn Clock, _>("SystemClock", |_| {
                Ok(Arc::new(FixedClock(1)) as Arc<dyn Clock>)
            });
            module.service::<dyn Clock, _>("TestClock", |_| {
                Ok(Arc::new(FixedClock(2)) as Arc<dyn Clock>)
            });
            module.instance("Config", Config { port: 8080 });
            Ok(())
        })
        .unwrap();
    builder.build().unwrap()
}

fn registry() -> Registry {
    registry_with_builds(Arc::new(AtomicUsize::new(0)))
}

#[test]
fn lookup_ignores_case_and_returns_the_same_proxy() {
    let builds = Arc::new(AtomicUsize::new(0));
    let registry = registry_with_builds(builds.clone());

    let first = registry.get_service::<dyn Greeter>("Greeter").unwrap();
    let second = registry.get_service::<dyn Greeter>("GREETER").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(builds.load(Ordering::SeqCst), 0, "lookup must not construct the service");

    assert_eq!(first.greet("Ada"), "Hello, Ada");
    assert_eq!(second.greet("Bob"), "Hello, Bob");
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_service_lists_the_defined_ids() {
    let registry = registry();
    match registry.get_service::<dyn Greeter>("Nope") {
        Err(IocError::ServiceNotFound { service_id, available }) => {
            assert_eq!(service_id, "Nope");
            assert_eq!(available, "Config, Greeter, SystemClock, TestClock");
        }
        other => panic!("expected missing service, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn wrong_interface_is_reported() {
    let registry = registry();
    match registry.get_service::<dyn Clock>("Greeter") {
        Err(IocError::WrongInterface { service_id, requested, actual }) => {
            assert_eq!(service_id, "Greeter");
            assert!(requested.contains("Clock"));
            assert!(actual.contains("Greeter"));
        }
        other => panic!("expected wrong interface, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn lookup_by_type_needs_exactly_one_service() {
    let registry = registry();

    let greeter = registry.get_service_by_type::<dyn Greeter>().unwrap();
    assert_eq!(greeter.greet("Eve"), "Hello, Eve");

    match registry.get_service_by_type::<dyn Clock>() {
        Err(IocError::AmbiguousInterface { ids, .. }) => assert_eq!(ids, vec!["SystemClock", "TestClock"]),
        other => panic!("expected ambiguity, got {:?}", other.map(|_| ())),
    }

    assert!(matches!(
        registry.get_service_by_type::<u64>(),
        Err(IocError::NoServiceForInterface { .. })
    ));
}

#[test]
fn unproxied_services_are_realized_once() {
    let registry = registry();
    let first = registry.get_service::<Config>("config").unwrap();
    let second = registry.get_service_by_type::<Config>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.port, 8080);
}

#[test]
fn autobuild_injects_from_the_registry() {
    struct Report {
        clock: Arc<dyn Clock>,
    }

    let registry = registry();
    let report = registry
        .autobuild(|registry| {
            Ok(Report {
                clock: registry.get_service::<dyn Clock>("TestClock")?,
            })
        })
        .unwrap();
    assert_eq!(report.clock.now(), 2);

    let failed = registry.autobuild::<Report, _>(|registry| {
        Ok(Report {
            clock: registry.get_service::<dyn Clock>("Sundial")?,
        })
    });
    match failed {
        Err(error @ IocError::Construction { .. }) => {
            assert!(matches!(error.root_cause(), IocError::ServiceNotFound { .. }))
        }
        other => panic!("expected construction error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn introspection_lists_definitions() {
    let registry = registry();
    let ids: Vec<String> = registry.service_ids().iter().map(ServiceId::to_string).collect();
    assert_eq!(ids, vec!["Config", "Greeter", "SystemClock", "TestClock"]);

    let def = registry.service_def("systemclock").unwrap();
    assert_eq!(def.module_id(), "app");
    assert_eq!(def.lifecycle(), "singleton");
    assert!(def.is_proxied());
    assert!(registry.service_def("missing").is_none());
}

#[test]
fn shutdown_disables_the_registry_and_its_proxies() {
    let registry = registry();
    let greeter = registry.get_service::<dyn Greeter>("Greeter").unwrap();
    let unrealized = registry.get_service::<dyn Clock>("TestClock").unwrap();
    assert_eq!(greeter.greet("Ada"), "Hello, Ada");

    registry.shutdown().unwrap();
    assert!(registry.is_shutdown());

    for call in [
        Box::new(|| {
            greeter.greet("Ada");
        }) as Box<dyn Fn()>,
        Box::new(|| {
            unrealized.now();
        }),
    ] {
        let payload = catch_unwind(AssertUnwindSafe(call)).unwrap_err();
        let error = payload.downcast::<IocError>().unwrap();
        assert!(error.is_shutdown(), "unexpected error {error}");
    }

    assert!(matches!(
        registry.get_service::<dyn Greeter>("Greeter"),
        Err(IocError::RegistryShutdown(_))
    ));
    assert!(matches!(registry.shutdown(), Err(IocError::RegistryShutdown(_))));
}

#[test]
fn failing_shutdown_listener_does_not_stop_the_others() {
    struct Panicking;
    impl RegistryShutdownListener for Panicking {
        fn registry_did_shutdown(&self) {
            panic!("listener failure");
        }
    }

    struct Counting(AtomicUsize);
    impl RegistryShutdownListener for Counting {
        fn registry_did_shutdown(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let registry = registry();
    let counting = Arc::new(Counting(AtomicUsize::new(0)));
    registry.add_registry_shutdown_listener(Arc::new(Panicking));
    registry.add_registry_shutdown_listener(counting.clone());

    registry.shutdown().unwrap();
    assert_eq!(counting.0.load(Ordering::SeqCst), 1);

    let late = Arc::new(Counting(AtomicUsize::new(0)));
    registry.add_registry_shutdown_listener(late.clone());
    assert_eq!(late.0.load(Ordering::SeqCst), 1);
}

#[test]
fn factory_failures_are_not_cached() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let factory_attempts = attempts.clone();

    let mut builder = RegistryBuilder::new();
    builder
        .add_module_fn("app", move |module| {
            module.service::<dyn Clock, _>("Flaky", move |_| {
                if factory_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(IocError::custom("database not ready"));
                }
                Ok(Arc::new(FixedClock(9)) as Arc<dyn Clock>)
            });
            Ok(())
        })
        .unwrap();
    let registry = builder.build().unwrap();
    let clock = registry.get_service::<dyn Clock>("Flaky").unwrap();

    let payload = catch_unwind(AssertUnwindSafe(|| clock.now())).unwrap_err();
    let error = payload.downcast::<IocError>().unwrap();
    match *error {
        IocError::Construction { ref service_id, .. } => assert_eq!(service_id, "Flaky"),
        ref other => panic!("expected construction error, got {other}"),
    }
    assert!(error.to_string().contains("database not ready"));

    assert_eq!(clock.now(), 9);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn factories_resolve_dependencies_through_resources() {
    service_interface! {
        pub trait Report {
            fn render(&self) -> String;
        }
    }

    struct ClockReport(Arc<dyn Clock>);
    impl Report for ClockReport {
        fn render(&self) -> String {
            format!("t={}", self.0.now())
        }
    }

    let mut builder = RegistryBuilder::new();
    builder
        .add_module_fn("clocks", |module| {
            module.service::<dyn Clock, _>("Clock", |_| Ok(Arc::new(FixedClock(5)) as Arc<dyn Clock>));
            Ok(())
        })
        .unwrap()
        .add_module_fn("reports", |module| {
            module.service::<dyn Report, _>("Report", |resources| {
                let clock = resources.get_service_by_type::<dyn Clock>()?;
                Ok(Arc::new(ClockReport(clock)) as Arc<dyn Report>)
            });
            Ok(())
        })
        .unwrap();
    let registry = builder.build().unwrap();
    assert_eq!(registry.get_service::<dyn Report>("report").unwrap().render(), "t=5");
}
