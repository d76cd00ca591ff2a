//! vnetd - VNET overlay orchestration daemon.
//!
//! Keeps a switch's forwarding hardware in sync with a declarative
//! description of VXLAN overlay topology: named tenant networks (VNETs),
//! their virtual-router bindings, and the unicast routes reachable
//! through them.
//!
//! # Architecture
//!
//! ```text
//! [config feed] ──> [Consumer] ──> [OrchDaemon]
//!                                      │
//!                  ┌───────────┬───────┴──────┬──────────────┐
//!                  ↓           ↓              ↓              ↓
//!             [IntfsOrch] [VxlanTunnelOrch] [VnetOrch] [VnetRouteOrch]
//!                  └───────────┴──────┬───────┴──────────────┘
//!                                     ↓
//!                                [SwitchApi] ──> ASIC
//! ```
//!
//! Change events arrive as batches of keyed SET/DEL operations per table.
//! The registry (`VnetOrch`) processes VNET definitions; the route
//! orchestrator (`VnetRouteOrch`) processes routes referencing VNETs by
//! name. Events whose cross-table dependency is not satisfied yet (a
//! route before its VNET, a VNET before its tunnel) are deferred and
//! retried on later passes instead of being dropped.
//!
//! All hardware access goes through the `SwitchApi` capability from
//! `vnetd-sai`; no orch talks to the ASIC directly.

pub mod audit;
pub mod daemon;
pub mod intfs;
pub mod vnet;
pub mod vxlan;

// Re-export commonly used types.
pub use vnetd_orch_common::{
    Consumer, ConsumerConfig, KeyOpFieldsValues, Operation, Orch, Request, RequestDescription,
    TaskError, TaskResult, TaskStatus,
};
pub use vnetd_sai::{
    MockSwitchApi, NextHopOid, SaiError, SaiResult, SwitchApi, TunnelOid, VirtualRouterOid,
};
pub use vnetd_types::{IpAddress, IpPrefix, MacAddress};

pub use daemon::{OrchDaemon, OrchDaemonConfig};
pub use intfs::{IntfsOrch, IntfsOrchConfig, IntfsOrchError, IntfsOrchHandle, INTF_TABLE};
pub use vnet::{
    RouteNextHop, TunnelEndpoint, VnetExec, VnetOrch, VnetOrchConfig, VnetOrchError,
    VnetOrchHandle, VnetRouteKey, VnetRouteOrch, VnetRouteOrchConfig, VnetRouteOrchError,
    VnetRouteOrchHandle, VrDirection, Vni, VNET_ROUTE_TABLE, VNET_ROUTE_TUNNEL_TABLE, VNET_TABLE,
    VNET_VNI_MAX,
};
pub use vxlan::{VxlanTunnelOrch, VxlanTunnelOrchError, VxlanTunnelOrchHandle, VXLAN_TUNNEL_TABLE};
