//! # ferrous-ioc
//!
//! Module-based inversion of control for Rust: a service registry with lazy
//! proxies, pluggable lifecycles, decorators and method advice.
//!
//! ## Features
//!
//! - **Modules**: services are defined in modules, each with a unique,
//!   case-insensitive service id and a declared interface
//! - **Lazy proxies**: lookups return a proxy at once; the implementation is built
//!   on the first method call, exactly once, even under concurrent first use
//! - **Lifecycles**: `singleton` (default), `perthread`, or contributed ones
//! - **Decorators and advice**: wrap services matched by id pattern or interface,
//!   in an order derived from `before:` / `after:` constraints
//! - **Cycle detection**: recursive construction and recursive module builders are
//!   reported as errors instead of deadlocking
//! - **Shutdown**: every proxy is notified, after which it fails fast
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_ioc::{service_interface, RegistryBuilder, ServiceLocator};
//! use std::sync::Arc;
//!
//! service_interface! {
//!     pub trait Database {
//!         fn url(&self) -> String;
//!     }
//! }
//!
//! service_interface! {
//!     pub trait UserService {
//!         fn describe(&self) -> String;
//!     }
//! }
//!
//! struct Postgres;
//! impl Database for Postgres {
//!     fn url(&self) -> String {
//!         "postgres://localhost".to_string()
//!     }
//! }
//!
//! struct Users {
//!     db: Arc<dyn Database>,
//! }
//! impl UserService for Users {
//!     fn describe(&self) -> String {
//!         format!("users at {}", self.db.url())
//!     }
//! }
//!
//! let mut builder = RegistryBuilder::new();
//! builder
//!     .add_module_fn("app", |module| {
//!         module.service::<dyn Database, _>("Database", |_| {
//!             Ok(Arc::new(Postgres) as Arc<dyn Database>)
//!         });
//!         module.service::<dyn UserService, _>("UserService", |resources| {
//!             let db = resources.get_service::<dyn Database>("Database")?;
//!             Ok(Arc::new(Users { db }) as Arc<dyn UserService>)
//!         });
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let registry = builder.build().unwrap();
//! let users = registry.get_service::<dyn UserService>("userservice").unwrap();
//! assert_eq!(users.describe(), "users at postgres://localhost");
//! ```
//!
//! ## Decoration
//!
//! ```rust
//! use ferrous_ioc::{service_interface, RegistryBuilder};
//! use std::sync::Arc;
//!
//! service_interface! {
//!     pub trait Greeter {
//!         fn greet(&self, name: &str) -> String;
//!     }
//! }
//!
//! struct Hello;
//! impl Greeter for Hello {
//!     fn greet(&self, name: &str) -> String {
//!         format!("Hello, {name}")
//!     }
//! }
//!
//! struct Bracketed(Arc<dyn Greeter>);
//! impl Greeter for Bracketed {
//!     fn greet(&self, name: &str) -> String {
//!         format!("[{}]", self.0.greet(name))
//!     }
//! }
//!
//! let mut builder = RegistryBuilder::new();
//! builder
//!     .add_module_fn("app", |module| {
//!         module.service::<dyn Greeter, _>("Greeter", |_| Ok(Arc::new(Hello) as Arc<dyn Greeter>));
//!         module.decorate::<dyn Greeter, _>("Brackets", "Greet*", |delegate, _| {
//!             Ok(Some(Arc::new(Bracketed(delegate)) as Arc<dyn Greeter>))
//!         });
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let registry = builder.build().unwrap();
//! let greeter = registry.get_service::<dyn Greeter>("Greeter").unwrap();
//! assert_eq!(greeter.greet("Ada"), "[Hello, Ada]");
//! ```
//!
//! ## Shutdown
//!
//! After [`Registry::shutdown`], every proxy fails. Because interface methods
//! cannot return registry errors, a failing proxy panics with the [`IocError`] as
//! panic payload.

pub mod aop;
pub mod collection;
pub mod creator;
pub mod decoration;
pub mod descriptors;
pub mod error;
pub mod key;
pub mod lifecycle;
pub mod observer;
pub mod ordering;
pub mod perthread;
pub mod provider;
pub mod proxy;
pub mod symbols;
pub mod traits;

// Internal modules
mod internal;
mod registration;

pub use aop::{AdviceReceiver, AspectInterceptor, LoggingAdvice, MethodAdvice, MethodInvocation};
pub use collection::{
    ContributionOptions, ModuleDefBuilder, RegistryBuilder, ServiceBindingOptions, ServiceModule,
};
pub use creator::ObjectCreator;
pub use decoration::ServiceDecorator;
pub use descriptors::{AdvisorDef, DecoratorDef, ServiceDef, ServiceMatcher, DEFAULT_LIFECYCLE};
pub use error::{IocError, IocResult};
pub use key::{AnyArc, InterfaceId, ServiceId};
pub use lifecycle::{LifecycleSource, ServiceLifecycle, SingletonLifecycle, PERTHREAD_LIFECYCLE};
pub use observer::{RegistryObserver, TracingObserver};
pub use perthread::PerThreadManager;
pub use provider::{ModuleResources, Registry, ServiceResources};
pub use proxy::{DelegateSource, LazyDelegate, ServiceInterface};
pub use registration::ModuleDef;
pub use symbols::{EnvironmentSymbolProvider, MapSymbolProvider, SymbolProvider, SymbolSource};
pub use traits::{EagerLoad, LocatedService, RegistryShutdownListener, ServiceLocator, ServiceLocatorCore};

#[cfg(feature = "config")]
pub use symbols::JsonSymbolProvider;
