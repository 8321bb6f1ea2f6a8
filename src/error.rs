//! Error types for the IoC registry.

use std::error::Error as StdError;
use std::sync::Arc;

/// Boxed cause carried by construction errors.
pub type ErrorCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Registry errors
///
/// Covers configuration errors (detected at registry build or first use), construction
/// errors (a factory, decorator or advisor failed), and use of a registry after shutdown.
///
/// # Examples
///
/// ```rust
/// use ferrous_ioc::{IocError, RegistryBuilder};
///
/// let registry = RegistryBuilder::new().build().unwrap();
/// match registry.get_service::<String>("Missing") {
///     Err(IocError::ServiceNotFound { service_id, .. }) => assert_eq!(service_id, "Missing"),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Clone, thiserror::Error)]
pub enum IocError {
    /// No module defines the requested service id.
    #[error("Service id '{service_id}' is not defined by any module (defined services: {available})")]
    ServiceNotFound {
        service_id: String,
        available: String,
    },

    /// No service implements the requested interface.
    #[error("No service implements the interface {interface}")]
    NoServiceForInterface { interface: &'static str },

    /// More than one service implements the requested interface.
    #[error("Service interface {interface} is matched by {} services: {}; use an explicit service id", .ids.len(), .ids.join(", "))]
    AmbiguousInterface {
        interface: &'static str,
        ids: Vec<String>,
    },

    /// The service exists but implements a different interface.
    #[error("Service '{service_id}' implements interface {actual}, which is not compatible with the requested interface {requested}")]
    WrongInterface {
        service_id: String,
        requested: &'static str,
        actual: &'static str,
    },

    /// Two service definitions share one id.
    #[error("Service id '{service_id}' has already been defined by module '{existing_module}' and may not be redefined by module '{duplicate_module}'")]
    DuplicateServiceId {
        service_id: String,
        existing_module: String,
        duplicate_module: String,
    },

    /// Construction of a module builder requested that same builder.
    #[error("Construction of module builder {builder_type} for module '{module_id}' is recursive: the builder's constructor requested its own module's builder")]
    RecursiveModuleBuilder {
        module_id: String,
        builder_type: &'static str,
    },

    /// Construction of a service depends on itself.
    #[error("Construction of service '{service_id}' is recursive: {}", .path.join(" -> "))]
    RecursiveConstruction {
        service_id: String,
        path: Vec<String>,
    },

    /// A module needs a builder object but declares no (or more than one) way to make one.
    #[error("Module '{module_id}': {message}")]
    ModuleBuilder { module_id: String, message: String },

    /// A service names a lifecycle that was never contributed.
    #[error("Service '{service_id}' uses unknown lifecycle '{lifecycle}' (available: {available})")]
    UnknownLifecycle {
        service_id: String,
        lifecycle: String,
        available: String,
    },

    /// A decorator or advisor ordering constraint cannot be satisfied.
    #[error("Ordering constraint '{constraint}' of '{id}' is invalid: {reason}")]
    OrderingConstraint {
        id: String,
        constraint: String,
        reason: String,
    },

    /// Ordering constraints form a cycle.
    #[error("Ordering constraints form a cycle between: {}", .ids.join(", "))]
    OrderingCycle { ids: Vec<String> },

    /// A constructor, builder method, decorator or advisor failed.
    #[error("Error {construct} for service '{service_id}': {cause}")]
    Construction {
        service_id: String,
        construct: String,
        #[source]
        cause: ErrorCause,
    },

    /// The registry (or the proxy's owning registry) has been shut down.
    #[error("The registry has been shut down; '{0}' is no longer available")]
    RegistryShutdown(String),

    /// A symbol reference cannot be expanded.
    #[error("Symbol '{symbol}' is not defined{}", expansion_suffix(.path))]
    UnknownSymbol { symbol: String, path: Vec<String> },

    /// Symbol definitions refer to each other.
    #[error("Symbol '{symbol}' is defined in terms of itself: {}", .path.join(" -> "))]
    RecursiveSymbol { symbol: String, path: Vec<String> },

    /// Any other configuration problem detected while building the registry.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An application-level failure raised from a factory or decorator.
    #[error("{0}")]
    Custom(String),
}

impl IocError {
    /// Convenience constructor for application errors raised inside factories.
    pub fn custom(message: impl Into<String>) -> Self {
        IocError::Custom(message.into())
    }

    /// Wraps `cause` as a construction error for `service_id`.
    ///
    /// A cause that already is a construction error for the same service is returned
    /// unchanged, so errors are never double-wrapped.
    pub fn construction(service_id: &str, construct: impl Into<String>, cause: IocError) -> Self {
        let already_wrapped = matches!(
            &cause,
            IocError::Construction { service_id: inner, .. } if inner.eq_ignore_ascii_case(service_id)
        );
        if already_wrapped {
            return cause;
        }
        IocError::Construction {
            service_id: service_id.to_string(),
            construct: construct.into(),
            cause: Arc::new(cause),
        }
    }

    /// Wraps any error type as the cause of a construction failure.
    pub fn construction_from<E>(service_id: &str, construct: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        IocError::Construction {
            service_id: service_id.to_string(),
            construct: construct.into(),
            cause: Arc::new(cause),
        }
    }

    /// True for errors caused by use after shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, IocError::RegistryShutdown(_))
    }

    /// Walks nested construction errors down to the innermost cause that is an `IocError`.
    pub fn root_cause(&self) -> &IocError {
        let mut current = self;
        while let IocError::Construction { cause, .. } = current {
            match cause.downcast_ref::<IocError>() {
                Some(inner) => current = inner,
                None => break,
            }
        }
        current
    }
}

fn expansion_suffix(path: &[String]) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" (expanding {})", path.join(" -> "))
    }
}

/// Result type for registry operations.
pub type IocResult<T> = Result<T, IocError>;
