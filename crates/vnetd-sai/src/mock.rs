//! In-memory switch used by orchestration tests.
//!
//! [`MockSwitchApi`] implements [`SwitchApi`] against plain tables, hands
//! out OIDs in the same numbering style syncd uses, and enforces the
//! referential rules a real ASIC enforces (no removing an object that a
//! forwarding entry still points at). Tests assert on the live object
//! counts to prove the orchestrators neither leak nor double-free.

use crate::api::{RouteEntry, SwitchApi, TunnelAttrs, TunnelNextHopAttrs, VirtualRouterAttrs};
use crate::error::{SaiError, SaiResult};
use crate::types::{NextHopOid, RawSaiObjectId, RouterInterfaceOid, TunnelOid, VirtualRouterOid};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use vnetd_types::{IpAddress, IpPrefix, MacAddress};

const VR_OID_BASE: RawSaiObjectId = 0x0300_0000_0000_0000;
const RIF_OID_BASE: RawSaiObjectId = 0x0600_0000_0000_0000;
const NH_OID_BASE: RawSaiObjectId = 0x0400_0000_0000_0000;
const TUNNEL_OID_BASE: RawSaiObjectId = 0x2a00_0000_0000_0000;

/// What a mock next hop resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockNextHop {
    /// Tunnel-encapsulated next hop.
    Tunnel {
        tunnel_id: RawSaiObjectId,
        endpoint: IpAddress,
        mac: Option<MacAddress>,
        vni: u32,
    },
    /// Next hop on a local router interface.
    Local {
        rif_id: RawSaiObjectId,
        ip: IpAddress,
    },
}

#[derive(Debug, Default)]
struct MockState {
    next_index: RawSaiObjectId,
    virtual_routers: HashSet<RawSaiObjectId>,
    vr_src_macs: HashMap<RawSaiObjectId, MacAddress>,
    router_interfaces: HashSet<RawSaiObjectId>,
    tunnels: HashSet<RawSaiObjectId>,
    next_hops: HashMap<RawSaiObjectId, MockNextHop>,
    routes: HashMap<(RawSaiObjectId, IpPrefix), RawSaiObjectId>,
    allow_before_failure: usize,
    failures_pending: usize,
}

impl MockState {
    fn alloc(&mut self, base: RawSaiObjectId) -> RawSaiObjectId {
        self.next_index += 1;
        base | self.next_index
    }

    fn check_create(&mut self, what: &str) -> SaiResult<()> {
        if self.allow_before_failure > 0 {
            self.allow_before_failure -= 1;
            return Ok(());
        }
        if self.failures_pending > 0 {
            self.failures_pending -= 1;
            return Err(SaiError::resource_exhaustion(what.to_string()));
        }
        Ok(())
    }
}

/// A fake switch backing [`SwitchApi`] with in-memory tables.
#[derive(Debug, Default)]
pub struct MockSwitchApi {
    state: Mutex<MockState>,
}

impl MockSwitchApi {
    /// Creates an empty mock switch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms failure injection: the next `allow` create calls succeed, then
    /// the following `count` create calls fail with resource exhaustion.
    pub fn inject_create_failures(&self, allow: usize, count: usize) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.allow_before_failure = allow;
        state.failures_pending = count;
    }

    /// Number of live virtual routers.
    pub fn virtual_router_count(&self) -> usize {
        self.state.lock().expect("mock state poisoned").virtual_routers.len()
    }

    /// Number of live router interfaces.
    pub fn router_interface_count(&self) -> usize {
        self.state.lock().expect("mock state poisoned").router_interfaces.len()
    }

    /// Number of live tunnels.
    pub fn tunnel_count(&self) -> usize {
        self.state.lock().expect("mock state poisoned").tunnels.len()
    }

    /// Number of live next hops.
    pub fn next_hop_count(&self) -> usize {
        self.state.lock().expect("mock state poisoned").next_hops.len()
    }

    /// Number of programmed forwarding entries.
    pub fn route_count(&self) -> usize {
        self.state.lock().expect("mock state poisoned").routes.len()
    }

    /// Returns the next hop a forwarding entry points at, if programmed.
    pub fn route_next_hop(&self, vr_id: VirtualRouterOid, destination: IpPrefix) -> Option<NextHopOid> {
        let state = self.state.lock().expect("mock state poisoned");
        state
            .routes
            .get(&(vr_id.as_raw(), destination))
            .and_then(|raw| NextHopOid::from_raw(*raw))
    }

    /// Returns the resolved form of a live next hop.
    pub fn next_hop(&self, nh_id: NextHopOid) -> Option<MockNextHop> {
        let state = self.state.lock().expect("mock state poisoned");
        state.next_hops.get(&nh_id.as_raw()).cloned()
    }

    /// Returns the source MAC last set on a virtual router.
    pub fn virtual_router_src_mac(&self, vr_id: VirtualRouterOid) -> Option<MacAddress> {
        let state = self.state.lock().expect("mock state poisoned");
        state.vr_src_macs.get(&vr_id.as_raw()).copied()
    }
}

impl SwitchApi for MockSwitchApi {
    fn create_virtual_router(&self, attrs: &VirtualRouterAttrs) -> SaiResult<VirtualRouterOid> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.check_create("virtual router")?;
        let raw = state.alloc(VR_OID_BASE);
        state.virtual_routers.insert(raw);
        if let Some(mac) = attrs.src_mac {
            state.vr_src_macs.insert(raw, mac);
        }
        Ok(VirtualRouterOid::from_raw(raw).unwrap_or_default())
    }

    fn remove_virtual_router(&self, vr_id: VirtualRouterOid) -> SaiResult<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        if state.routes.keys().any(|(vr, _)| *vr == vr_id.as_raw()) {
            return Err(SaiError::object_in_use(vr_id.to_string()));
        }
        if !state.virtual_routers.remove(&vr_id.as_raw()) {
            return Err(SaiError::not_found(vr_id.to_string()));
        }
        Ok(())
    }

    fn set_virtual_router_src_mac(
        &self,
        vr_id: VirtualRouterOid,
        mac: MacAddress,
    ) -> SaiResult<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        if !state.virtual_routers.contains(&vr_id.as_raw()) {
            return Err(SaiError::not_found(vr_id.to_string()));
        }
        state.vr_src_macs.insert(vr_id.as_raw(), mac);
        Ok(())
    }

    fn create_tunnel(&self, _attrs: &TunnelAttrs) -> SaiResult<TunnelOid> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.check_create("tunnel")?;
        let raw = state.alloc(TUNNEL_OID_BASE);
        state.tunnels.insert(raw);
        Ok(TunnelOid::from_raw(raw).unwrap_or_default())
    }

    fn remove_tunnel(&self, tunnel_id: TunnelOid) -> SaiResult<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        let in_use = state.next_hops.values().any(|nh| {
            matches!(nh, MockNextHop::Tunnel { tunnel_id: t, .. } if *t == tunnel_id.as_raw())
        });
        if in_use {
            return Err(SaiError::object_in_use(tunnel_id.to_string()));
        }
        if !state.tunnels.remove(&tunnel_id.as_raw()) {
            return Err(SaiError::not_found(tunnel_id.to_string()));
        }
        Ok(())
    }

    fn create_router_interface(&self, vr_id: VirtualRouterOid) -> SaiResult<RouterInterfaceOid> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.check_create("router interface")?;
        if vr_id.is_valid() && !state.virtual_routers.contains(&vr_id.as_raw()) {
            return Err(SaiError::not_found(vr_id.to_string()));
        }
        let raw = state.alloc(RIF_OID_BASE);
        state.router_interfaces.insert(raw);
        Ok(RouterInterfaceOid::from_raw(raw).unwrap_or_default())
    }

    fn remove_router_interface(&self, rif_id: RouterInterfaceOid) -> SaiResult<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        let in_use = state.next_hops.values().any(|nh| {
            matches!(nh, MockNextHop::Local { rif_id: r, .. } if *r == rif_id.as_raw())
        });
        if in_use {
            return Err(SaiError::object_in_use(rif_id.to_string()));
        }
        if !state.router_interfaces.remove(&rif_id.as_raw()) {
            return Err(SaiError::not_found(rif_id.to_string()));
        }
        Ok(())
    }

    fn create_tunnel_next_hop(&self, attrs: &TunnelNextHopAttrs) -> SaiResult<NextHopOid> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.check_create("tunnel next hop")?;
        if !state.tunnels.contains(&attrs.tunnel_id.as_raw()) {
            return Err(SaiError::not_found(attrs.tunnel_id.to_string()));
        }
        let raw = state.alloc(NH_OID_BASE);
        state.next_hops.insert(
            raw,
            MockNextHop::Tunnel {
                tunnel_id: attrs.tunnel_id.as_raw(),
                endpoint: attrs.endpoint,
                mac: attrs.mac,
                vni: attrs.vni,
            },
        );
        Ok(NextHopOid::from_raw(raw).unwrap_or_default())
    }

    fn create_local_next_hop(
        &self,
        rif_id: RouterInterfaceOid,
        ip: IpAddress,
    ) -> SaiResult<NextHopOid> {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.check_create("local next hop")?;
        if !state.router_interfaces.contains(&rif_id.as_raw()) {
            return Err(SaiError::not_found(rif_id.to_string()));
        }
        let raw = state.alloc(NH_OID_BASE);
        state.next_hops.insert(
            raw,
            MockNextHop::Local {
                rif_id: rif_id.as_raw(),
                ip,
            },
        );
        Ok(NextHopOid::from_raw(raw).unwrap_or_default())
    }

    fn remove_next_hop(&self, nh_id: NextHopOid) -> SaiResult<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        if state.routes.values().any(|nh| *nh == nh_id.as_raw()) {
            return Err(SaiError::object_in_use(nh_id.to_string()));
        }
        if state.next_hops.remove(&nh_id.as_raw()).is_none() {
            return Err(SaiError::not_found(nh_id.to_string()));
        }
        Ok(())
    }

    fn create_route_entry(&self, entry: &RouteEntry, nh_id: NextHopOid) -> SaiResult<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        let key = (entry.vr_id.as_raw(), entry.destination);
        if state.routes.contains_key(&key) {
            return Err(SaiError::already_exists(format!(
                "{}@{}",
                entry.destination, entry.vr_id
            )));
        }
        if !state.virtual_routers.contains(&entry.vr_id.as_raw()) {
            return Err(SaiError::not_found(entry.vr_id.to_string()));
        }
        if !state.next_hops.contains_key(&nh_id.as_raw()) {
            return Err(SaiError::not_found(nh_id.to_string()));
        }
        state.routes.insert(key, nh_id.as_raw());
        Ok(())
    }

    fn set_route_next_hop(&self, entry: &RouteEntry, nh_id: NextHopOid) -> SaiResult<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        if !state.next_hops.contains_key(&nh_id.as_raw()) {
            return Err(SaiError::not_found(nh_id.to_string()));
        }
        let key = (entry.vr_id.as_raw(), entry.destination);
        match state.routes.get_mut(&key) {
            Some(nh) => {
                *nh = nh_id.as_raw();
                Ok(())
            }
            None => Err(SaiError::not_found(format!(
                "{}@{}",
                entry.destination, entry.vr_id
            ))),
        }
    }

    fn remove_route_entry(&self, entry: &RouteEntry) -> SaiResult<()> {
        let mut state = self.state.lock().expect("mock state poisoned");
        let key = (entry.vr_id.as_raw(), entry.destination);
        if state.routes.remove(&key).is_none() {
            return Err(SaiError::not_found(format!(
                "{}@{}",
                entry.destination, entry.vr_id
            )));
        }
        Ok(())
    }
}
