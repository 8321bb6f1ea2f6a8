use ferrous_ioc::{service_interface, IocError, Registry, RegistryBuilder, ServiceLocator};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

service_interface! {
    pub trait Ping {
        fn ping(&self) -> u32;
    }
}

service_interface! {
    pub trait Pong {
        fn pong(&self) -> u32;
    }
}

struct Value(u32);
impl Ping for Value {
    fn ping(&self) -> u32 {
        self.0
    }
}
impl Pong for Value {
    fn pong(&self) -> u32 {
        self.0
    }
}

/// Runs `f`, which must panic with an `IocError` payload, and returns the error.
fn panic_error<R>(f: impl FnOnce() -> R) -> IocError {
    let payload = match catch_unwind(AssertUnwindSafe(f)) {
        Ok(_) => panic!("expected the proxy call to fail"),
        Err(payload) => payload,
    };
    match payload.downcast::<IocError>() {
        Ok(error) => *error,
        Err(_) => panic!("panic payload is not an IocError"),
    }
}

fn build(configure: impl FnOnce(&mut ferrous_ioc::ModuleDefBuilder) -> ferrous_ioc::IocResult<()>) -> Registry {
    let mut builder = RegistryBuilder::new();
    builder.add_module_fn("app", configure).unwrap();
    builder.build().unwrap()
}

#[test]
fn mutual_recursion_through_proxies_is_detected() {
    let registry = build(|module| {
        module.service::<dyn Ping, _>("A", |resources| {
            let b = resources.get_service::<dyn Pong>("B")?;
            Ok(Arc::new(Value(b.pong() + 1)) as Arc<dyn Ping>)
        });
        module.service::<dyn Pong, _>("B", |resources| {
            let a = resources.get_service::<dyn Ping>("A")?;
            Ok(Arc::new(Value(a.ping() + 1)) as Arc<dyn Pong>)
        });
        Ok(())
    });

    let a = registry.get_service::<dyn Ping>("A").unwrap();
    let error = panic_error(|| a.ping());

    assert!(matches!(error, IocError::Construction { ref service_id, .. } if service_id == "A"));
    match error.root_cause() {
        IocError::RecursiveConstruction { service_id, path } => {
            assert_eq!(service_id, "A");
            assert_eq!(path, &["service:a", "service:b", "service:a"]);
        }
        other => panic!("expected recursive construction, got {other}"),
    }
}

#[test]
fn self_reference_is_detected() {
    let registry = build(|module| {
        module.service::<dyn Ping, _>("Loop", |resources| {
            let me = resources.get_service::<dyn Ping>("loop")?;
            Ok(Arc::new(Value(me.ping())) as Arc<dyn Ping>)
        });
        Ok(())
    });

    let looping = registry.get_service::<dyn Ping>("Loop").unwrap();
    let error = panic_error(|| looping.ping());
    assert!(matches!(error.root_cause(), IocError::RecursiveConstruction { .. }));
}

#[test]
fn holding_a_proxy_to_a_peer_is_not_recursion() {
    struct Holder(Arc<dyn Pong>);
    impl Ping for Holder {
        fn ping(&self) -> u32 {
            self.0.pong() * 10
        }
    }

    struct Back(Arc<dyn Ping>);
    impl Pong for Back {
        fn pong(&self) -> u32 {
            let _ = &self.0;
            4
        }
    }

    let registry = build(|module| {
        module.service::<dyn Ping, _>("A", |resources| {
            Ok(Arc::new(Holder(resources.get_service::<dyn Pong>("B")?)) as Arc<dyn Ping>)
        });
        module.service::<dyn Pong, _>("B", |resources| {
            Ok(Arc::new(Back(resources.get_service::<dyn Ping>("A")?)) as Arc<dyn Pong>)
        });
        Ok(())
    });

    assert_eq!(registry.get_service::<dyn Ping>("A").unwrap().ping(), 40);
}

#[test]
fn recursion_does_not_poison_later_calls() {
    let first_call = Arc::new(AtomicUsize::new(0));
    let calls = first_call.clone();

    let registry = build(move |module| {
        module.service::<dyn Ping, _>("A", move |resources| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                let me = resources.get_service::<dyn Ping>("A")?;
                return Ok(Arc::new(Value(me.ping())) as Arc<dyn Ping>);
            }
            Ok(Arc::new(Value(7)) as Arc<dyn Ping>)
        });
        Ok(())
    });

    let a = registry.get_service::<dyn Ping>("A").unwrap();
    let error = panic_error(|| a.ping());
    assert!(matches!(error.root_cause(), IocError::RecursiveConstruction { .. }));
    assert_eq!(a.ping(), 7);
}

struct Settings {
    prefix: String,
}

#[test]
fn module_builder_requesting_itself_is_reported() {
    let registry = build(|module| {
        module.builder::<Settings, _>(|resources| {
            let _ = resources.module_builder::<Settings>()?;
            Ok(Settings { prefix: "x".into() })
        });
        module.service_from_builder::<dyn Ping, Settings, _>("A", |settings, _| {
            Ok(Arc::new(Value(settings.prefix.len() as u32)) as Arc<dyn Ping>)
        });
        Ok(())
    });

    let a = registry.get_service::<dyn Ping>("A").unwrap();
    let error = panic_error(|| a.ping());
    match error.root_cause() {
        IocError::RecursiveModuleBuilder { module_id, builder_type } => {
            assert_eq!(module_id, "app");
            assert!(builder_type.ends_with("Settings"));
        }
        other => panic!("expected recursive module builder, got {other}"),
    }
}

#[test]
fn module_builder_recursion_through_a_service_is_reported() {
    let registry = build(|module| {
        module.builder::<Settings, _>(|resources| {
            let helper = resources.get_service::<dyn Pong>("Helper")?;
            Ok(Settings {
                prefix: "p".repeat(helper.pong() as usize),
            })
        });
        module.service::<dyn Pong, _>("Helper", |resources| {
            let settings = resources.module_builder::<Settings>()?;
            Ok(Arc::new(Value(settings.prefix.len() as u32)) as Arc<dyn Pong>)
        });
        module.service_from_builder::<dyn Ping, Settings, _>("A", |settings, _| {
            Ok(Arc::new(Value(settings.prefix.len() as u32)) as Arc<dyn Ping>)
        });
        Ok(())
    });

    let a = registry.get_service::<dyn Ping>("A").unwrap();
    let error = panic_error(|| a.ping());
    assert!(
        matches!(error.root_cause(), IocError::RecursiveModuleBuilder { module_id, .. } if module_id == "app"),
        "unexpected error: {error}"
    );
}

#[test]
fn unproxied_recursion_is_reported_at_lookup() {
    struct Node;

    let registry = build(|module| {
        module.unproxied_service::<Node, _>("Node", |resources| {
            resources.get_service::<Node>("Node")?;
            Ok(Arc::new(Node))
        });
        Ok(())
    });

    match registry.get_service::<Node>("Node") {
        Err(error) => assert!(
            matches!(error.root_cause(), IocError::RecursiveConstruction { .. }),
            "unexpected error: {error}"
        ),
        Ok(_) => panic!("expected recursive construction"),
    }
}
