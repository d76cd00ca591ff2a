//! VNET types and table schemas.

use vnetd_orch_common::{FieldKind, RequestDescription};
use vnetd_types::{IpAddress, IpPrefix, MacAddress};

/// VXLAN Network Identifier.
pub type Vni = u32;

/// VNIs are 24 bits on the wire.
pub const VNET_VNI_MAX: Vni = 0x00ff_ffff;

/// Table carrying VNET definitions.
pub const VNET_TABLE: &str = "VNET_TABLE";

/// Table carrying local (interface-resolved) VNET routes.
pub const VNET_ROUTE_TABLE: &str = "VNET_ROUTE_TABLE";

/// Table carrying tunnel-resolved VNET routes.
pub const VNET_ROUTE_TUNNEL_TABLE: &str = "VNET_ROUTE_TUNNEL_TABLE";

/// Schema of a VNET definition event: `<name>` plus attributes.
pub const VNET_REQUEST: RequestDescription = RequestDescription {
    key_fields: &[FieldKind::String],
    attr_fields: &[
        ("src_mac", FieldKind::MacAddress),
        ("vxlan_tunnel", FieldKind::String),
        ("vni", FieldKind::Uint),
        ("peer_list", FieldKind::StringSet),
    ],
    mandatory: &["vxlan_tunnel", "vni"],
    key_separator: ':',
};

/// Schema of a route event: `<vnet>:<prefix>` plus attributes.
///
/// Both route tables share this shape; which attributes are required is
/// checked by the handler for each table (`endpoint` for tunnel routes,
/// `ifname` for local routes).
pub const VNET_ROUTE_REQUEST: RequestDescription = RequestDescription {
    key_fields: &[FieldKind::String, FieldKind::IpPrefix],
    attr_fields: &[
        ("endpoint", FieldKind::Ip),
        ("ifname", FieldKind::String),
        ("vni", FieldKind::Uint),
        ("mac_address", FieldKind::MacAddress),
    ],
    mandatory: &[],
    key_separator: ':',
};

/// Virtual-router direction within a VNET binding.
///
/// The set of directions instantiated per VNET is fixed for the life of
/// the process (the direction context, configured at construction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VrDirection {
    /// Ingress: overlay-bound traffic; doubles as the encap map source.
    Ingress,
    /// Egress: decapsulated traffic classification.
    Egress,
}

/// Execution backend for VNET bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnetExec {
    /// VRF-backed binding (virtual routers per direction).
    Vrf,
    /// Bridge-backed binding (extension point, not implemented).
    Bridge,
}

/// A remote tunnel termination point for one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelEndpoint {
    /// Remote VTEP address.
    pub ip: IpAddress,
    /// Remote VTEP MAC, if known.
    pub mac: Option<MacAddress>,
    /// Encapsulation VNI; 0 means "use the VNET's VNI".
    pub vni: Vni,
}

/// Key of one VNET route: the owning VNET and the destination prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VnetRouteKey {
    /// Owning VNET name.
    pub vnet: String,
    /// Destination prefix.
    pub prefix: IpPrefix,
}

impl VnetRouteKey {
    pub fn new(vnet: impl Into<String>, prefix: IpPrefix) -> Self {
        Self {
            vnet: vnet.into(),
            prefix,
        }
    }
}

impl std::fmt::Display for VnetRouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.vnet, self.prefix)
    }
}
