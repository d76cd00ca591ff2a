//! Typed SAI object IDs and the switch hardware capability used by vnetd.
//!
//! The orchestration core never talks to the ASIC directly; every hardware
//! mutation goes through the [`SwitchApi`] trait defined here. Production
//! deployments back it with the SAI adapter; tests back it with
//! [`MockSwitchApi`], which tracks live objects so leak and atomicity
//! properties can be asserted.
//!
//! Object IDs are phantom-typed ([`SaiObjectId`]) so a virtual-router
//! handle can never be passed where a next-hop handle is expected.

mod error;
pub mod mock;
mod types;

pub mod api;

pub use api::{RouteEntry, SwitchApi, TunnelAttrs, TunnelNextHopAttrs, VirtualRouterAttrs};
pub use error::{SaiError, SaiResult, SaiStatus};
pub use mock::MockSwitchApi;
pub use types::{
    NextHopOid, RawSaiObjectId, RouterInterfaceOid, SaiObjectId, SaiObjectKind, SwitchOid,
    TunnelOid, VirtualRouterOid,
};
