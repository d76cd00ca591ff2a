//! The switch hardware capability consumed by the orchestration core.

use crate::error::SaiResult;
use crate::types::{NextHopOid, RouterInterfaceOid, TunnelOid, VirtualRouterOid};
use vnetd_types::{IpAddress, IpPrefix, MacAddress};

/// Attributes for creating a virtual router.
#[derive(Debug, Clone, Default)]
pub struct VirtualRouterAttrs {
    /// Source MAC override for frames routed through this router.
    pub src_mac: Option<MacAddress>,
}

impl VirtualRouterAttrs {
    /// Creates attributes with the given source MAC override.
    pub fn with_src_mac(mac: MacAddress) -> Self {
        Self { src_mac: Some(mac) }
    }
}

/// Attributes for creating a VXLAN tunnel context.
#[derive(Debug, Clone)]
pub struct TunnelAttrs {
    /// Local VTEP source address.
    pub src_ip: IpAddress,
}

/// Attributes for creating a tunnel-encapsulated next hop.
#[derive(Debug, Clone)]
pub struct TunnelNextHopAttrs {
    /// Tunnel the next hop encapsulates into.
    pub tunnel_id: TunnelOid,
    /// Remote tunnel endpoint address.
    pub endpoint: IpAddress,
    /// Remote VTEP MAC, if known.
    pub mac: Option<MacAddress>,
    /// VNI used for encapsulation.
    pub vni: u32,
}

/// A forwarding entry: a destination prefix within one virtual router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteEntry {
    /// Virtual router this entry belongs to.
    pub vr_id: VirtualRouterOid,
    /// Destination IP prefix.
    pub destination: IpPrefix,
}

impl RouteEntry {
    /// Creates a new route entry.
    pub fn new(vr_id: VirtualRouterOid, destination: IpPrefix) -> Self {
        Self {
            vr_id,
            destination,
        }
    }
}

/// The hardware mutation capability.
///
/// Calls are synchronous and non-reentrant; each either succeeds, returning
/// a handle, or fails with a [`crate::SaiError`] and leaves no hardware
/// state behind. The orchestration core owns all sequencing and reference
/// counting above this surface.
pub trait SwitchApi: Send + Sync {
    /// Creates a virtual router and returns its handle.
    fn create_virtual_router(&self, attrs: &VirtualRouterAttrs) -> SaiResult<VirtualRouterOid>;

    /// Removes a virtual router.
    fn remove_virtual_router(&self, vr_id: VirtualRouterOid) -> SaiResult<()>;

    /// Updates the source MAC override of an existing virtual router.
    fn set_virtual_router_src_mac(
        &self,
        vr_id: VirtualRouterOid,
        mac: MacAddress,
    ) -> SaiResult<()>;

    /// Creates a VXLAN tunnel context and returns its handle.
    fn create_tunnel(&self, attrs: &TunnelAttrs) -> SaiResult<TunnelOid>;

    /// Removes a VXLAN tunnel context.
    fn remove_tunnel(&self, tunnel_id: TunnelOid) -> SaiResult<()>;

    /// Creates a router interface and returns its handle.
    fn create_router_interface(&self, vr_id: VirtualRouterOid) -> SaiResult<RouterInterfaceOid>;

    /// Removes a router interface.
    fn remove_router_interface(&self, rif_id: RouterInterfaceOid) -> SaiResult<()>;

    /// Creates a tunnel-encapsulated next hop and returns its handle.
    fn create_tunnel_next_hop(&self, attrs: &TunnelNextHopAttrs) -> SaiResult<NextHopOid>;

    /// Creates a next hop bound to a local router interface.
    fn create_local_next_hop(
        &self,
        rif_id: RouterInterfaceOid,
        ip: IpAddress,
    ) -> SaiResult<NextHopOid>;

    /// Removes a next hop of either kind.
    fn remove_next_hop(&self, nh_id: NextHopOid) -> SaiResult<()>;

    /// Programs a forwarding entry pointing at the given next hop.
    fn create_route_entry(&self, entry: &RouteEntry, nh_id: NextHopOid) -> SaiResult<()>;

    /// Repoints an existing forwarding entry at a different next hop.
    ///
    /// This is a single hardware transaction; the entry is never absent
    /// while the next hop changes.
    fn set_route_next_hop(&self, entry: &RouteEntry, nh_id: NextHopOid) -> SaiResult<()>;

    /// Withdraws a forwarding entry.
    fn remove_route_entry(&self, entry: &RouteEntry) -> SaiResult<()>;
}
