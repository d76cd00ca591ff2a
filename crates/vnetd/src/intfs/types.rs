//! Local interface types.

use vnetd_orch_common::{FieldKind, RequestDescription};
use vnetd_sai::{NextHopOid, RouterInterfaceOid};
use vnetd_types::IpPrefix;

/// Table carrying interface definitions.
pub const INTF_TABLE: &str = "INTF_TABLE";

/// Schema of an interface definition event: `<ifname>` with its address.
pub const INTF_REQUEST: RequestDescription = RequestDescription {
    key_fields: &[FieldKind::String],
    attr_fields: &[("ip_prefix", FieldKind::IpPrefix)],
    mandatory: &["ip_prefix"],
    key_separator: ':',
};

/// A provisioned local interface.
#[derive(Debug, Clone)]
pub struct IntfsEntry {
    /// Interface address.
    pub ip_prefix: IpPrefix,
    /// Router interface handle.
    pub rif_id: RouterInterfaceOid,
    /// Next-hop handle bound to this interface.
    pub nh_id: NextHopOid,
    /// Number of routes resolved through this interface.
    pub ref_count: u32,
}

impl IntfsEntry {
    /// Increments the reference count and returns the new value.
    pub fn add_ref(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_add(1);
        self.ref_count
    }

    /// Decrements the reference count.
    ///
    /// Returns the new count, or `None` on underflow.
    pub fn remove_ref(&mut self) -> Option<u32> {
        if self.ref_count == 0 {
            return None;
        }
        self.ref_count -= 1;
        Some(self.ref_count)
    }

    /// Returns true if routes still resolve through this interface.
    pub fn is_in_use(&self) -> bool {
        self.ref_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_counting() {
        let mut entry = IntfsEntry {
            ip_prefix: "10.0.0.1/24".parse().unwrap(),
            rif_id: RouterInterfaceOid::NULL,
            nh_id: NextHopOid::NULL,
            ref_count: 0,
        };

        assert!(!entry.is_in_use());
        assert_eq!(entry.add_ref(), 1);
        assert!(entry.is_in_use());
        assert_eq!(entry.remove_ref(), Some(0));
        assert_eq!(entry.remove_ref(), None);
    }
}
