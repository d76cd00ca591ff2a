//! VXLAN tunnel context registry.
//!
//! Tracks the VXLAN tunnels provisioned on the switch, keyed by name.
//! The VNET registry consults this table before binding a VNET to a
//! tunnel: a VNET referencing an unprovisioned tunnel is deferred, not
//! rejected.

mod orch;
mod types;

pub use orch::{VxlanTunnelOrch, VxlanTunnelOrchError, VxlanTunnelOrchHandle, VxlanTunnelOrchStats};
pub use types::{VxlanTunnelEntry, VXLAN_TUNNEL_REQUEST, VXLAN_TUNNEL_TABLE};
