//! Service, decorator and advisor definitions.

use std::fmt;
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};

use crate::aop::AdviceReceiver;
use crate::creator::{ConstructorCreator, ObjectCreator};
use crate::error::{IocError, IocResult};
use crate::key::{AnyArc, InterfaceId, ServiceId};
use crate::proxy::ProxyKit;
use crate::provider::ServiceResources;

/// Lifecycle used when a service does not name one.
pub const DEFAULT_LIFECYCLE: &str = "singleton";

pub(crate) type ServiceFactory =
    Arc<dyn Fn(&ServiceResources) -> IocResult<AnyArc> + Send + Sync>;
pub(crate) type DecoratorFn =
    Arc<dyn Fn(AnyArc, &ServiceResources) -> IocResult<Option<AnyArc>> + Send + Sync>;
pub(crate) type AdvisorFn =
    Arc<dyn Fn(&ServiceResources, &mut AdviceReceiver) -> IocResult<()> + Send + Sync>;

/// Immutable description of one service.
///
/// Produced by [`ModuleDefBuilder`](crate::ModuleDefBuilder) while a module is
/// configured and never changed afterwards. The registry asks it for a fresh
/// [`ObjectCreator`] the first time the service is needed.
///
/// # Examples
///
/// ```
/// use ferrous_ioc::{service_interface, ModuleDefBuilder};
/// use std::sync::Arc;
///
/// service_interface! {
///     pub trait Greeter {
///         fn greet(&self, name: &str) -> String;
///     }
/// }
///
/// struct Hello;
/// impl Greeter for Hello {
///     fn greet(&self, name: &str) -> String {
///         format!("Hello, {name}")
///     }
/// }
///
/// let mut module = ModuleDefBuilder::new("app");
/// module
///     .service::<dyn Greeter, _>("Greeter", |_| Ok(Arc::new(Hello) as Arc<dyn Greeter>))
///     .eager_load();
/// let def = module.finish().unwrap();
///
/// let service = def.service("greeter").unwrap();
/// assert_eq!(service.service_id().as_str(), "Greeter");
/// assert_eq!(service.lifecycle(), "singleton");
/// assert!(service.is_eager_load());
/// assert!(service.is_proxied());
/// ```
#[derive(Clone)]
pub struct ServiceDef {
    pub(crate) service_id: ServiceId,
    pub(crate) module_id: String,
    pub(crate) interface: InterfaceId,
    pub(crate) lifecycle: String,
    pub(crate) eager_load: bool,
    pub(crate) construct: &'static str,
    pub(crate) uses_module_builder: bool,
    pub(crate) factory: ServiceFactory,
    pub(crate) proxy: Option<ProxyKit>,
}

impl ServiceDef {
    /// Case-insensitive identity of the service.
    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    /// Id of the module that defines the service.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Declared service interface.
    pub fn interface(&self) -> InterfaceId {
        self.interface
    }

    /// Name of the lifecycle that controls instantiation.
    pub fn lifecycle(&self) -> &str {
        &self.lifecycle
    }

    /// True if the service is realized during registry startup.
    pub fn is_eager_load(&self) -> bool {
        self.eager_load
    }

    /// True if callers receive a lazy proxy rather than the realized value.
    pub fn is_proxied(&self) -> bool {
        self.proxy.is_some()
    }

    /// True if the factory is a builder method of the module's builder object.
    pub fn uses_module_builder(&self) -> bool {
        self.uses_module_builder
    }

    /// Returns a fresh creator that invokes the service's factory with `resources`.
    ///
    /// Failures of the factory, including panics, are reported as
    /// [`IocError::Construction`] naming the service.
    pub fn create_service_creator(&self, resources: &ServiceResources) -> Arc<dyn ObjectCreator> {
        Arc::new(ConstructorCreator::new(
            self.service_id.clone(),
            self.construct,
            self.factory.clone(),
            resources.clone(),
        ))
    }
}

impl fmt::Debug for ServiceDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDef")
            .field("service_id", &self.service_id)
            .field("module_id", &self.module_id)
            .field("interface", &self.interface)
            .field("lifecycle", &self.lifecycle)
            .field("eager_load", &self.eager_load)
            .field("proxied", &self.is_proxied())
            .finish()
    }
}

#[derive(Clone)]
enum Condition {
    Pattern { source: String, glob: Result<GlobMatcher, String> },
    Interface(InterfaceId),
    Predicate(Arc<dyn Fn(&ServiceDef) -> bool + Send + Sync>),
}

/// Selects the services a decorator or advisor applies to.
///
/// All conditions must hold. Patterns are case-insensitive globs over service ids,
/// so `"*"` matches everything and `"*Dao"` matches `UserDao` and `orderdao`.
///
/// # Examples
///
/// ```
/// use ferrous_ioc::ServiceMatcher;
///
/// let matcher = ServiceMatcher::pattern("Greet*");
/// assert!(matcher.matches_id("GREETER"));
/// assert!(!matcher.matches_id("Clock"));
/// ```
#[derive(Clone)]
pub struct ServiceMatcher {
    conditions: Vec<Condition>,
}

impl ServiceMatcher {
    /// Matches every service.
    pub fn any() -> Self {
        Self { conditions: Vec::new() }
    }

    /// Matches service ids against a case-insensitive glob.
    ///
    /// An invalid pattern matches nothing and is reported when the registry is built.
    pub fn pattern(pattern: impl Into<String>) -> Self {
        let source = pattern.into();
        let glob = compile_glob(&source);
        Self {
            conditions: vec![Condition::Pattern { source, glob }],
        }
    }

    /// Matches services declared with interface `I`.
    pub fn interface<I: ?Sized + Send + Sync + 'static>() -> Self {
        Self {
            conditions: vec![Condition::Interface(InterfaceId::of::<I>())],
        }
    }

    /// Matches services accepted by `predicate`.
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&ServiceDef) -> bool + Send + Sync + 'static,
    {
        Self {
            conditions: vec![Condition::Predicate(Arc::new(predicate))],
        }
    }

    /// Requires `other` to match as well.
    pub fn and(mut self, other: ServiceMatcher) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    /// Tests a service definition.
    pub fn matches(&self, def: &ServiceDef) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Pattern { glob, .. } => glob_matches(glob, def.service_id.as_str()),
            Condition::Interface(iface) => def.interface == *iface,
            Condition::Predicate(predicate) => predicate(def),
        })
    }

    /// Tests only the id patterns; other conditions are ignored.
    pub fn matches_id(&self, service_id: &str) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Pattern { glob, .. } => glob_matches(glob, service_id),
            _ => true,
        })
    }

    pub(crate) fn validate(&self, owner: &str) -> IocResult<()> {
        for condition in &self.conditions {
            if let Condition::Pattern { source, glob: Err(reason) } = condition {
                return Err(IocError::Configuration(format!(
                    "'{owner}' uses invalid service id pattern '{source}': {reason}"
                )));
            }
        }
        Ok(())
    }
}

impl From<&str> for ServiceMatcher {
    fn from(pattern: &str) -> Self {
        ServiceMatcher::pattern(pattern)
    }
}

impl From<String> for ServiceMatcher {
    fn from(pattern: String) -> Self {
        ServiceMatcher::pattern(pattern)
    }
}

impl fmt::Debug for ServiceMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for condition in &self.conditions {
            match condition {
                Condition::Pattern { source, .. } => list.entry(&format_args!("pattern({source})")),
                Condition::Interface(iface) => list.entry(&format_args!("interface({iface})")),
                Condition::Predicate(_) => list.entry(&format_args!("predicate")),
            };
        }
        list.finish()
    }
}

pub(crate) fn compile_glob(pattern: &str) -> Result<GlobMatcher, String> {
    GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(false)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|err| err.to_string())
}

fn glob_matches(glob: &Result<GlobMatcher, String>, id: &str) -> bool {
    glob.as_ref().map(|g| g.is_match(id)).unwrap_or(false)
}

/// A contribution that may replace a service implementation with a wrapper.
#[derive(Clone)]
pub struct DecoratorDef {
    pub(crate) id: String,
    pub(crate) module_id: String,
    pub(crate) matcher: ServiceMatcher,
    pub(crate) constraints: Vec<String>,
    pub(crate) decorate: DecoratorFn,
}

impl DecoratorDef {
    /// Unique (case-insensitive) decorator id, used by ordering constraints.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// `before:<pattern>` / `after:<pattern>` constraints.
    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }

    pub fn matches(&self, def: &ServiceDef) -> bool {
        self.matcher.matches(def)
    }
}

impl fmt::Debug for DecoratorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorDef")
            .field("id", &self.id)
            .field("module_id", &self.module_id)
            .field("matcher", &self.matcher)
            .field("constraints", &self.constraints)
            .finish()
    }
}

/// A contribution that adds method advice to matching services.
#[derive(Clone)]
pub struct AdvisorDef {
    pub(crate) id: String,
    pub(crate) module_id: String,
    pub(crate) matcher: ServiceMatcher,
    pub(crate) constraints: Vec<String>,
    pub(crate) advise: AdvisorFn,
}

impl AdvisorDef {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }

    pub fn matches(&self, def: &ServiceDef) -> bool {
        self.matcher.matches(def)
    }
}

impl fmt::Debug for AdvisorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisorDef")
            .field("id", &self.id)
            .field("module_id", &self.module_id)
            .field("matcher", &self.matcher)
            .field("constraints", &self.constraints)
            .finish()
    }
}
