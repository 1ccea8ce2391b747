use std::any::Any;
use std::cmp::Ordering;
use std::sync::Weak;

/// The contract a profiled object offers to the tracking engine.
///
/// Targets are handed to the engine as `Arc<dyn Tracked>`; the engine keeps
/// only a [`Weak`] reference, so tracking never extends a target's lifetime.
/// A target counts as reclaimed once its last strong reference is dropped;
/// the engine notices this only during a scan (an insert-path cleanup or a
/// refresh), never immediately.
///
/// Every method has a default, so the minimal implementation is empty:
///
/// ```
/// use instance_tracker::Tracked;
///
/// struct Opaque;
/// impl Tracked for Opaque {}
/// ```
///
/// The first three methods form the optional self-reporting capability
/// interface consumed during refresh; returning `None` means "capability
/// absent" and the corresponding metric defaults to 0. The remaining methods
/// are analysis hooks consumed only by the sort/group query utilities. All
/// of them may be called on an object that is being concurrently mutated by
/// the profiled program; the engine contains any panic they raise.
pub trait Tracked: Any + Send + Sync {
    /// Current logical size of the object (for collections, the element
    /// count actually in use).
    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Current reserved capacity of the object, in elements.
    fn capacity_count(&self) -> Option<u64> {
        None
    }

    /// Current reserved capacity of the object, in bytes.
    fn capacity_bytes(&self) -> Option<u64> {
        None
    }

    /// Hash of the object's value, for grouping equal-valued instances.
    ///
    /// Defaults to the object's address, pairing with the identity-based
    /// default of [`value_eq`](Self::value_eq).
    fn value_hash(&self) -> u64 {
        (self as *const Self).cast::<()>().addr() as u64
    }

    /// Value equality against another tracked object.
    ///
    /// Defaults to identity: an object equals only itself.
    fn value_eq(&self, other: &dyn Tracked) -> bool {
        std::ptr::addr_eq(self as *const Self, other as *const dyn Tracked)
    }

    /// Human-readable rendition of the object's value.
    fn render(&self) -> String {
        format!(
            "{}@{:x}",
            std::any::type_name::<Self>(),
            (self as *const Self).cast::<()>().addr()
        )
    }

    /// Natural ordering against another tracked object, if the type has
    /// one. `None` means "not comparable", which sorts as a tie.
    fn natural_cmp(&self, other: &dyn Tracked) -> Option<Ordering> {
        _ = other;
        None
    }
}

/// The identity of a (possibly already reclaimed) target.
///
/// The address stays valid as an identity for as long as the weak reference
/// exists: the allocation backing an `Arc` is not reused while any `Weak`
/// to it is alive, so two records can never alias one address.
pub(crate) fn identity_of(target: &Weak<dyn Tracked>) -> usize {
    target.as_ptr().cast::<()>().addr()
}
