//! Safe wrappers for the SAI APIs the VNET core invokes.
//!
//! The capability surface is deliberately narrow: virtual routers, tunnels,
//! next hops (tunnel-encapsulated and local-interface), and per-router
//! forwarding entries. Everything else in SAI is out of scope for vnetd.

mod switch;

pub use switch::{RouteEntry, SwitchApi, TunnelAttrs, TunnelNextHopAttrs, VirtualRouterAttrs};
