//! Service identity types for the registry.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Type-erased service value as stored by modules and passed along the creator chain.
///
/// For a service interface `I` the payload is always an `Arc<I>`, so the stored value
/// is an `Arc<Arc<I>>` coerced to `Arc<dyn Any + Send + Sync>`. This is the same
/// storage pattern trait registrations use, and it lets unsized interfaces such as
/// `dyn Greeter` travel through `Any`.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

/// Case-insensitive service identifier.
///
/// The original spelling is preserved for display, while equality and hashing use the
/// lower-cased form, so `"Greeter"`, `"greeter"` and `"GREETER"` all name the same
/// service.
///
/// # Examples
///
/// ```rust
/// use ferrous_ioc::ServiceId;
///
/// let a = ServiceId::new("UserRepository");
/// let b = ServiceId::new("userrepository");
/// assert_eq!(a, b);
/// assert_eq!(a.as_str(), "UserRepository");
/// assert_eq!(a.normalized(), "userrepository");
/// ```
#[derive(Clone)]
pub struct ServiceId {
    display: Arc<str>,
    normalized: Arc<str>,
}

impl ServiceId {
    /// Creates a service id, keeping `id` as the display form.
    pub fn new(id: impl AsRef<str>) -> Self {
        let id = id.as_ref();
        Self {
            display: Arc::from(id),
            normalized: Arc::from(id.to_lowercase()),
        }
    }

    /// The id as originally spelled.
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// The lower-cased form used for comparisons.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Case-insensitive comparison against a plain string.
    pub fn matches(&self, other: &str) -> bool {
        *self.normalized == *other.to_lowercase()
    }
}

impl PartialEq for ServiceId {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for ServiceId {}

impl Hash for ServiceId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl PartialOrd for ServiceId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.normalized.cmp(&other.normalized)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({})", self.display)
    }
}

impl From<&str> for ServiceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ServiceId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

/// Identity of a service interface.
///
/// Holds the `TypeId` and `type_name` of the interface plus a type-erased check that
/// tells whether an [`AnyArc`] carries an `Arc<I>`. The check is what lets the
/// decorator stack reject a replacement that does not implement the interface
/// without knowing `I` at that point.
///
/// # Examples
///
/// ```rust
/// use ferrous_ioc::{InterfaceId, AnyArc};
/// use std::sync::Arc;
///
/// trait Clock: Send + Sync {
///     fn now(&self) -> u64;
/// }
///
/// let iface = InterfaceId::of::<dyn Clock>();
/// assert!(iface.name().contains("Clock"));
///
/// let not_a_clock: AnyArc = Arc::new(42i32);
/// assert!(!iface.is_held_by(&not_a_clock));
/// ```
#[derive(Clone, Copy)]
pub struct InterfaceId {
    type_id: TypeId,
    name: &'static str,
    holds: fn(&AnyArc) -> bool,
}

fn holds_arc_of<I: ?Sized + Send + Sync + 'static>(value: &AnyArc) -> bool {
    value.is::<Arc<I>>()
}

impl InterfaceId {
    /// Identity of interface `I`.
    #[inline]
    pub fn of<I: ?Sized + Send + Sync + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<I>(),
            name: std::any::type_name::<I>(),
            holds: holds_arc_of::<I>,
        }
    }

    /// The `TypeId` of the interface type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The fully qualified interface name, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if `value` carries an `Arc` of this interface.
    pub fn is_held_by(&self, value: &AnyArc) -> bool {
        (self.holds)(value)
    }
}

impl PartialEq for InterfaceId {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for InterfaceId {}

impl Hash for InterfaceId {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceId({})", self.name)
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Wraps a typed service in the storage form expected by the registry.
#[inline]
pub fn erase<I: ?Sized + Send + Sync + 'static>(service: Arc<I>) -> AnyArc {
    Arc::new(service)
}

/// Recovers a typed service from its storage form.
#[inline]
pub fn unerase<I: ?Sized + Send + Sync + 'static>(value: &AnyArc) -> Option<Arc<I>> {
    value.downcast_ref::<Arc<I>>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Hello;
    impl Greeter for Hello {
        fn greet(&self) -> String {
            "hello".into()
        }
    }

    #[test]
    fn service_ids_ignore_case() {
        let mut set = HashSet::new();
        set.insert(ServiceId::new("Greeter"));
        assert!(set.contains(&ServiceId::new("GREETER")));
        assert!(ServiceId::new("Greeter").matches("greeter"));
        assert_eq!(ServiceId::new("Greeter").to_string(), "Greeter");
    }

    #[test]
    fn interface_check_sees_through_erasure() {
        let iface = InterfaceId::of::<dyn Greeter>();
        let value = erase::<dyn Greeter>(Arc::new(Hello));
        assert!(iface.is_held_by(&value));

        let greeter = unerase::<dyn Greeter>(&value).unwrap();
        assert_eq!(greeter.greet(), "hello");

        let wrong: AnyArc = Arc::new(7u8);
        assert!(!iface.is_held_by(&wrong));
        assert!(unerase::<dyn Greeter>(&wrong).is_none());
    }

    #[test]
    fn interface_ids_compare_by_type() {
        assert_eq!(InterfaceId::of::<dyn Greeter>(), InterfaceId::of::<dyn Greeter>());
        assert_ne!(InterfaceId::of::<dyn Greeter>(), InterfaceId::of::<String>());
    }
}
