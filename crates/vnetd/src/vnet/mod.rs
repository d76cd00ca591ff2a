//! VNET orchestration: the virtual-network registry and its routes.
//!
//! A VNET is a named overlay tenant network. The registry ([`VnetOrch`])
//! binds each VNET to per-direction virtual routers and a VXLAN tunnel
//! context; the route orchestrator ([`VnetRouteOrch`]) programs unicast
//! routes inside a VNET, sharing tunnel next hops between routes that name
//! the same remote endpoint.
//!
//! Event ordering across tables is not guaranteed: a route may arrive
//! before its VNET, and a VNET before its tunnel. Both orchestrators defer
//! such events and retry them on later passes instead of dropping them.

mod nexthop;
mod object;
mod orch;
mod route;
mod types;

pub use nexthop::{NextHopEntry, NextHopTunnels};
pub use object::{VnetBinding, VnetBridgeObject, VnetEntry, VnetVrfObject};
pub use orch::{VnetOrch, VnetOrchConfig, VnetOrchError, VnetOrchHandle, VnetOrchStats};
pub use route::{
    RouteNextHop, VnetRouteOrch, VnetRouteOrchConfig, VnetRouteOrchError, VnetRouteOrchHandle,
    VnetRouteOrchStats,
};
pub use types::{
    TunnelEndpoint, VnetExec, VnetRouteKey, VrDirection, Vni, VNET_REQUEST, VNET_ROUTE_REQUEST,
    VNET_ROUTE_TABLE, VNET_ROUTE_TUNNEL_TABLE, VNET_TABLE, VNET_VNI_MAX,
};
