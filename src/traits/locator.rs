//! Service lookup traits.

use std::sync::Arc;

use crate::error::{IocError, IocResult};
use crate::key::{unerase, AnyArc, InterfaceId};

/// Object-safe service lookup.
///
/// Implemented by [`Registry`](crate::Registry) and by the resources handed to
/// factories and module builder constructors. Lookups return the type-erased
/// storage form; most code uses the typed helpers on [`ServiceLocator`] instead.
pub trait ServiceLocatorCore: Send + Sync {
    /// Finds the service with the given (case-insensitive) id, checking that it
    /// implements `expected`.
    ///
    /// For proxied services the returned value is the proxy; the underlying
    /// implementation is not constructed by this call.
    fn locate_by_id(&self, service_id: &str, expected: InterfaceId) -> IocResult<LocatedService>;

    /// Finds the single service that implements `expected`.
    ///
    /// Fails with [`IocError::NoServiceForInterface`] if no service does and with
    /// [`IocError::AmbiguousInterface`] if several do.
    fn locate_by_interface(&self, expected: InterfaceId) -> IocResult<LocatedService>;
}

/// A service in storage form together with the interface it was registered under.
#[derive(Clone)]
pub struct LocatedService {
    pub value: AnyArc,
    pub interface: InterfaceId,
}

impl LocatedService {
    pub fn new(value: AnyArc, interface: InterfaceId) -> Self {
        Self { value, interface }
    }
}

impl std::fmt::Debug for LocatedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocatedService")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

/// Typed service lookup built on [`ServiceLocatorCore`].
///
/// # Examples
///
/// ```
/// use ferrous_ioc::{service_interface, RegistryBuilder, ServiceLocator};
/// use std::sync::Arc;
///
/// service_interface! {
///     pub trait Clock {
///         fn now(&self) -> u64;
///     }
/// }
///
/// struct FixedClock;
/// impl Clock for FixedClock {
///     fn now(&self) -> u64 {
///         1_700_000_000
///     }
/// }
///
/// let mut builder = RegistryBuilder::new();
/// builder
///     .add_module_fn("app", |module| {
///         module.service::<dyn Clock, _>("Clock", |_| Ok(Arc::new(FixedClock) as Arc<dyn Clock>));
///         Ok(())
///     })
///     .unwrap();
/// let registry = builder.build().unwrap();
///
/// fn lookup(locator: &impl ServiceLocator) -> Arc<dyn Clock> {
///     locator.get_service_by_type::<dyn Clock>().unwrap()
/// }
///
/// assert_eq!(lookup(&registry).now(), 1_700_000_000);
/// ```
pub trait ServiceLocator: ServiceLocatorCore {
    /// Finds a service by id and interface.
    fn get_service<I>(&self, service_id: &str) -> IocResult<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let expected = InterfaceId::of::<I>();
        let located = self.locate_by_id(service_id, expected)?;
        downcast_service(service_id, expected, &located)
    }

    /// Finds the unique service implementing `I`.
    fn get_service_by_type<I>(&self) -> IocResult<Arc<I>>
    where
        I: ?Sized + Send + Sync + 'static,
    {
        let expected = InterfaceId::of::<I>();
        let located = self.locate_by_interface(expected)?;
        downcast_service(expected.name(), expected, &located)
    }
}

impl<T: ServiceLocatorCore + ?Sized> ServiceLocator for T {}

pub(crate) fn downcast_service<I>(
    service_id: &str,
    expected: InterfaceId,
    located: &LocatedService,
) -> IocResult<Arc<I>>
where
    I: ?Sized + Send + Sync + 'static,
{
    unerase::<I>(&located.value).ok_or_else(|| IocError::WrongInterface {
        service_id: service_id.to_string(),
        requested: expected.name(),
        actual: located.interface.name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::erase;

    #[test]
    fn downcast_failure_names_registered_interface() {
        let located = LocatedService::new(erase::<u32>(Arc::new(7)), InterfaceId::of::<u32>());
        assert_eq!(*downcast_service::<u32>("Limit", InterfaceId::of::<u32>(), &located).unwrap(), 7);

        match downcast_service::<String>("Limit", InterfaceId::of::<String>(), &located) {
            Err(IocError::WrongInterface { requested, actual, .. }) => {
                assert!(requested.contains("String"));
                assert_eq!(actual, "u32");
            }
            other => panic!("expected wrong interface, got {other:?}"),
        }
    }
}
