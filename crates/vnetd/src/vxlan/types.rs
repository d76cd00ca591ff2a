//! VXLAN tunnel types.

use vnetd_orch_common::{FieldKind, RequestDescription};
use vnetd_sai::TunnelOid;
use vnetd_types::IpAddress;

/// Table carrying tunnel definitions.
pub const VXLAN_TUNNEL_TABLE: &str = "VXLAN_TUNNEL_TABLE";

/// Schema of a tunnel definition event: `<name>` with a source VTEP address.
pub const VXLAN_TUNNEL_REQUEST: RequestDescription = RequestDescription {
    key_fields: &[FieldKind::String],
    attr_fields: &[("src_ip", FieldKind::Ip)],
    mandatory: &["src_ip"],
    key_separator: ':',
};

/// A provisioned VXLAN tunnel.
#[derive(Debug, Clone)]
pub struct VxlanTunnelEntry {
    /// Tunnel name, unique.
    pub name: String,
    /// Local VTEP source address.
    pub src_ip: IpAddress,
    /// Hardware tunnel handle.
    pub tunnel_id: TunnelOid,
}
