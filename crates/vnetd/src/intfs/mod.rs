//! Local interface registry.
//!
//! Tracks provisioned router interfaces by name and owns the local next-hop
//! handle each one carries. Local VNET routes resolve against this table;
//! a route naming an interface that is not provisioned yet is deferred.

mod orch;
mod types;

pub use orch::{IntfsOrch, IntfsOrchConfig, IntfsOrchError, IntfsOrchHandle, IntfsOrchStats};
pub use types::{IntfsEntry, INTF_REQUEST, INTF_TABLE};
