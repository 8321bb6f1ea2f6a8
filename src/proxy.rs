//! Lazy service proxies.
//!
//! Callers never hold a service implementation directly. They hold a proxy that
//! implements the service interface and forwards every call to a delegate the
//! proxy resolves on first use. The forwarding types are generated per interface
//! by [`service_interface!`](crate::service_interface).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::aop::AspectInterceptor;
use crate::creator::ObjectCreator;
use crate::error::{IocError, IocResult};
use crate::internal::{service_key, ConstructionGuard, ConstructionLock};
use crate::key::{erase, unerase, AnyArc, InterfaceId, ServiceId};
use crate::traits::{EagerLoad, RegistryShutdownListener};

/// Supplies the object a proxy forwards to.
pub trait DelegateSource<I: ?Sized>: Send + Sync {
    /// Returns the current delegate, constructing it if needed.
    fn delegate(&self) -> IocResult<Arc<I>>;
}

/// A service interface the registry can proxy.
///
/// Implemented for `dyn Trait` by [`service_interface!`](crate::service_interface);
/// implementing it by hand is possible but rarely useful.
pub trait ServiceInterface: Send + Sync + 'static {
    /// Names of the interface methods, in declaration order.
    const METHODS: &'static [&'static str];

    /// Wraps `source` in an object implementing the interface by forwarding.
    fn create_proxy(source: Arc<dyn DelegateSource<Self>>) -> Arc<Self>;

    /// Wraps `delegate` so that every method runs through `interceptor`.
    fn create_advised(delegate: Arc<Self>, interceptor: Arc<AspectInterceptor>) -> Arc<Self>;
}

enum DelegateState<I: ?Sized> {
    Unresolved(Arc<dyn ObjectCreator>),
    Resolved(Arc<I>),
    Shutdown,
}

/// The lazily resolved delegate behind a registry proxy.
///
/// Starts unresolved, holding the creator chain. The first call resolves the
/// delegate under the registry's construction lock and drops the chain. After
/// registry shutdown every call fails with [`IocError::RegistryShutdown`], whether
/// or not the delegate had been resolved.
pub struct LazyDelegate<I: ?Sized> {
    service_id: ServiceId,
    declared: InterfaceId,
    state: RwLock<DelegateState<I>>,
    lock: Arc<ConstructionLock>,
}

impl<I: ?Sized + Send + Sync + 'static> LazyDelegate<I> {
    pub(crate) fn new(
        service_id: ServiceId,
        declared: InterfaceId,
        creator: Arc<dyn ObjectCreator>,
        lock: Arc<ConstructionLock>,
    ) -> Self {
        Self {
            service_id,
            declared,
            state: RwLock::new(DelegateState::Unresolved(creator)),
            lock,
        }
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    /// True once the delegate exists and the registry is still running.
    pub fn is_resolved(&self) -> bool {
        matches!(*self.state.read(), DelegateState::Resolved(_))
    }

    fn shutdown_error(&self) -> IocError {
        IocError::RegistryShutdown(self.service_id.to_string())
    }

    fn resolve(&self) -> IocResult<Arc<I>> {
        let _lock = self.lock.lock();
        let _guard = ConstructionGuard::enter(
            &service_key(self.service_id.normalized()),
            self.service_id.as_str(),
        )?;

        let creator = match &*self.state.read() {
            DelegateState::Resolved(delegate) => return Ok(delegate.clone()),
            DelegateState::Shutdown => return Err(self.shutdown_error()),
            DelegateState::Unresolved(creator) => creator.clone(),
        };

        let value = creator.create_object()?;
        let delegate = unerase::<I>(&value).ok_or_else(|| IocError::WrongInterface {
            service_id: self.service_id.to_string(),
            requested: InterfaceId::of::<I>().name(),
            actual: self.declared.name(),
        })?;

        let mut state = self.state.write();
        if matches!(*state, DelegateState::Shutdown) {
            return Err(self.shutdown_error());
        }
        *state = DelegateState::Resolved(delegate.clone());
        Ok(delegate)
    }
}

impl<I: ?Sized + Send + Sync + 'static> DelegateSource<I> for LazyDelegate<I> {
    fn delegate(&self) -> IocResult<Arc<I>> {
        match &*self.state.read() {
            DelegateState::Resolved(delegate) => return Ok(delegate.clone()),
            DelegateState::Shutdown => return Err(self.shutdown_error()),
            DelegateState::Unresolved(_) => {}
        }
        self.resolve()
    }
}

impl<I: ?Sized + Send + Sync + 'static> RegistryShutdownListener for LazyDelegate<I> {
    fn registry_did_shutdown(&self) {
        *self.state.write() = DelegateState::Shutdown;
    }
}

impl<I: ?Sized + Send + Sync + 'static> EagerLoad for LazyDelegate<I> {
    fn eager_load(&self) -> IocResult<()> {
        self.delegate().map(|_| ())
    }
}

impl<I: ?Sized> fmt::Debug for LazyDelegate<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.state.read() {
            DelegateState::Unresolved(_) => "unresolved",
            DelegateState::Resolved(_) => "resolved",
            DelegateState::Shutdown => "shutdown",
        };
        f.debug_struct("LazyDelegate")
            .field("service_id", &self.service_id)
            .field("state", &state)
            .finish()
    }
}

/// Delegate source that asks its creator on every call.
///
/// Used for proxies whose lifecycle decides per call which instance to use.
struct CreatorSource<I: ?Sized> {
    service_id: ServiceId,
    declared: InterfaceId,
    creator: Arc<dyn ObjectCreator>,
    marker: std::marker::PhantomData<fn() -> Arc<I>>,
}

impl<I: ?Sized + Send + Sync + 'static> DelegateSource<I> for CreatorSource<I> {
    fn delegate(&self) -> IocResult<Arc<I>> {
        let value = self.creator.create_object()?;
        unerase::<I>(&value).ok_or_else(|| IocError::WrongInterface {
            service_id: self.service_id.to_string(),
            requested: InterfaceId::of::<I>().name(),
            actual: self.declared.name(),
        })
    }
}

/// Forwarding object generated for each service interface.
#[doc(hidden)]
pub struct ServiceProxy<I: ?Sized> {
    source: Arc<dyn DelegateSource<I>>,
}

impl<I: ?Sized> ServiceProxy<I> {
    pub fn new(source: Arc<dyn DelegateSource<I>>) -> Self {
        Self { source }
    }

    /// Resolves the delegate, panicking with the [`IocError`] as payload on failure.
    pub fn resolve_delegate(&self) -> Arc<I> {
        match self.source.delegate() {
            Ok(delegate) => delegate,
            Err(error) => std::panic::panic_any(error),
        }
    }
}

/// Advised wrapper generated for each service interface.
#[doc(hidden)]
pub struct AdvisedService<I: ?Sized> {
    delegate: Arc<I>,
    interceptor: Arc<AspectInterceptor>,
}

impl<I: ?Sized> AdvisedService<I> {
    pub fn new(delegate: Arc<I>, interceptor: Arc<AspectInterceptor>) -> Self {
        Self {
            delegate,
            interceptor,
        }
    }

    /// Runs `call` against the delegate through the method's advice chain.
    pub fn invoke_advised<R: 'static>(&self, method: &'static str, call: impl FnOnce(&I) -> R) -> R {
        let mut result: Option<R> = None;
        let mut call = Some(call);
        let delegate = &*self.delegate;
        self.interceptor.invoke(method, &mut result, &mut |slot: &mut dyn Any| {
            if let Some(call) = call.take() {
                let value = call(delegate);
                if let Some(slot) = slot.downcast_mut::<Option<R>>() {
                    *slot = Some(value);
                }
            }
        });
        match result {
            Some(value) => value,
            None => std::panic::panic_any(IocError::Custom(format!(
                "advice for method '{method}' of service '{}' neither proceeded nor supplied a return value",
                self.interceptor.service_id()
            ))),
        }
    }
}

/// A proxy bundled with the handles the module keeps for it.
pub(crate) struct LazyProxy {
    pub(crate) proxy: AnyArc,
    pub(crate) listener: Arc<dyn RegistryShutdownListener>,
    pub(crate) loader: Arc<dyn EagerLoad>,
}

/// Type-erased proxy constructors for one service interface.
///
/// Captured when a service is defined, while the interface type is still known.
#[derive(Clone, Copy)]
pub(crate) struct ProxyKit {
    pub(crate) interface: InterfaceId,
    pub(crate) methods: &'static [&'static str],
    lazy: fn(ServiceId, InterfaceId, Arc<dyn ObjectCreator>, Arc<ConstructionLock>) -> LazyProxy,
    dynamic: fn(ServiceId, InterfaceId, Arc<dyn ObjectCreator>) -> AnyArc,
    advised: fn(&AnyArc, Arc<AspectInterceptor>) -> Option<AnyArc>,
}

impl ProxyKit {
    pub(crate) fn of<I: ServiceInterface + ?Sized>() -> Self {
        Self {
            interface: InterfaceId::of::<I>(),
            methods: I::METHODS,
            lazy: lazy_proxy::<I>,
            dynamic: dynamic_proxy::<I>,
            advised: advised_service::<I>,
        }
    }

    /// A lazy proxy over `creator`, whose values are declared to implement `declared`.
    pub(crate) fn lazy(
        &self,
        service_id: ServiceId,
        declared: InterfaceId,
        creator: Arc<dyn ObjectCreator>,
        lock: Arc<ConstructionLock>,
    ) -> LazyProxy {
        (self.lazy)(service_id, declared, creator, lock)
    }

    pub(crate) fn dynamic(
        &self,
        service_id: ServiceId,
        declared: InterfaceId,
        creator: Arc<dyn ObjectCreator>,
    ) -> AnyArc {
        (self.dynamic)(service_id, declared, creator)
    }

    pub(crate) fn advised(&self, target: &AnyArc, interceptor: Arc<AspectInterceptor>) -> Option<AnyArc> {
        (self.advised)(target, interceptor)
    }
}

fn lazy_proxy<I: ServiceInterface + ?Sized>(
    service_id: ServiceId,
    declared: InterfaceId,
    creator: Arc<dyn ObjectCreator>,
    lock: Arc<ConstructionLock>,
) -> LazyProxy {
    let delegate = Arc::new(LazyDelegate::<I>::new(service_id, declared, creator, lock));
    LazyProxy {
        proxy: erase(I::create_proxy(delegate.clone())),
        listener: delegate.clone(),
        loader: delegate,
    }
}

fn dynamic_proxy<I: ServiceInterface + ?Sized>(
    service_id: ServiceId,
    declared: InterfaceId,
    creator: Arc<dyn ObjectCreator>,
) -> AnyArc {
    let source = CreatorSource::<I> {
        service_id,
        declared,
        creator,
        marker: std::marker::PhantomData,
    };
    erase(I::create_proxy(Arc::new(source)))
}

fn advised_service<I: ServiceInterface + ?Sized>(
    target: &AnyArc,
    interceptor: Arc<AspectInterceptor>,
) -> Option<AnyArc> {
    let delegate = unerase::<I>(target)?;
    Some(erase(I::create_advised(delegate, interceptor)))
}

/// Declares a service interface trait together with its registry proxies.
///
/// The generated trait has `Send + Sync` as supertraits. Methods take `&self`,
/// name their arguments with plain identifiers, and return owned (`'static`)
/// values, since a call may be forwarded to a delegate that is resolved only for
/// the duration of the call.
///
/// # Examples
///
/// ```
/// use ferrous_ioc::{service_interface, ServiceInterface};
///
/// service_interface! {
///     /// Formats greetings.
///     pub trait Greeter {
///         fn greet(&self, name: &str) -> String;
///         fn reset(&self);
///     }
/// }
///
/// assert_eq!(<dyn Greeter as ServiceInterface>::METHODS, &["greet", "reset"]);
/// ```
#[macro_export]
macro_rules! service_interface {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident(&self $(, $arg:ident : $arg_ty:ty)* $(,)?) $(-> $ret:ty)?;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis trait $name: ::std::marker::Send + ::std::marker::Sync {
            $(
                $(#[$method_meta])*
                fn $method(&self $(, $arg: $arg_ty)*) $(-> $ret)?;
            )*
        }

        impl $name for $crate::proxy::ServiceProxy<dyn $name> {
            $(
                fn $method(&self $(, $arg: $arg_ty)*) $(-> $ret)? {
                    self.resolve_delegate().$method($($arg),*)
                }
            )*
        }

        impl $name for $crate::proxy::AdvisedService<dyn $name> {
            $(
                fn $method(&self $(, $arg: $arg_ty)*) $(-> $ret)? {
                    self.invoke_advised(
                        ::std::stringify!($method),
                        move |delegate| delegate.$method($($arg),*),
                    )
                }
            )*
        }

        impl $crate::ServiceInterface for dyn $name {
            const METHODS: &'static [&'static str] = &[$(::std::stringify!($method)),*];

            fn create_proxy(
                source: ::std::sync::Arc<dyn $crate::DelegateSource<Self>>,
            ) -> ::std::sync::Arc<Self> {
                ::std::sync::Arc::new($crate::proxy::ServiceProxy::<dyn $name>::new(source))
            }

            fn create_advised(
                delegate: ::std::sync::Arc<Self>,
                interceptor: ::std::sync::Arc<$crate::AspectInterceptor>,
            ) -> ::std::sync::Arc<Self> {
                ::std::sync::Arc::new($crate::proxy::AdvisedService::<dyn $name>::new(
                    delegate,
                    interceptor,
                ))
            }
        }
    };
}
