//! Type-safe SAI object ID wrappers.
//!
//! Strongly-typed wrappers for SAI object IDs prevent accidental mixing of
//! different object types (e.g., passing a tunnel OID where a virtual-router
//! OID is expected).

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Raw SAI object ID type (matches sai_object_id_t in C).
pub type RawSaiObjectId = u64;

/// Marker trait for SAI object kinds.
pub trait SaiObjectKind: Send + Sync + 'static {
    /// Returns the SAI object type name for debugging.
    fn type_name() -> &'static str;
}

/// A type-safe SAI object ID.
///
/// The phantom type parameter `T` records what kind of SAI object the ID
/// refers to, so IDs of different kinds are incompatible at compile time.
#[derive(Clone, Copy)]
pub struct SaiObjectId<T: SaiObjectKind> {
    raw: RawSaiObjectId,
    _marker: PhantomData<T>,
}

impl<T: SaiObjectKind> SaiObjectId<T> {
    /// The null object ID (SAI_NULL_OBJECT_ID).
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Creates an object ID from a raw value.
    ///
    /// Returns `None` for the null object ID; use [`Self::NULL`] for
    /// explicitly null IDs.
    pub fn from_raw(raw: RawSaiObjectId) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(Self {
                raw,
                _marker: PhantomData,
            })
        }
    }

    /// Returns the raw object ID value.
    pub const fn as_raw(&self) -> RawSaiObjectId {
        self.raw
    }

    /// Returns true if this is a null object ID.
    pub const fn is_null(&self) -> bool {
        self.raw == 0
    }

    /// Returns true if this is a valid (non-null) object ID.
    pub const fn is_valid(&self) -> bool {
        self.raw != 0
    }
}

impl<T: SaiObjectKind> fmt::Debug for SaiObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:016x})", T::type_name(), self.raw)
    }
}

impl<T: SaiObjectKind> fmt::Display for SaiObjectId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.raw)
    }
}

impl<T: SaiObjectKind> PartialEq for SaiObjectId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: SaiObjectKind> Eq for SaiObjectId<T> {}

impl<T: SaiObjectKind> Hash for SaiObjectId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: SaiObjectKind> Default for SaiObjectId<T> {
    fn default() -> Self {
        Self::NULL
    }
}

macro_rules! define_object_kind {
    ($name:ident, $type_name:literal, $oid_alias:ident) => {
        /// Marker type for SAI $type_name objects.
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl SaiObjectKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }
        }

        /// Type alias for $type_name object IDs.
        pub type $oid_alias = SaiObjectId<$name>;
    };
}

// The object kinds the VNET core touches.
define_object_kind!(SwitchKind, "Switch", SwitchOid);
define_object_kind!(VirtualRouterKind, "VirtualRouter", VirtualRouterOid);
define_object_kind!(RouterInterfaceKind, "RouterInterface", RouterInterfaceOid);
define_object_kind!(NextHopKind, "NextHop", NextHopOid);
define_object_kind!(TunnelKind, "Tunnel", TunnelOid);
