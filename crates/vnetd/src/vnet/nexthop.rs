//! Shared tunnel next-hop cache.
//!
//! Every tunnel route resolves to a next hop keyed by (VNET name, remote
//! endpoint address). Routes in the same VNET naming the same endpoint
//! share one hardware next hop; the cache holds the explicit reference
//! count that ties the object's lifetime to route-table membership.

use super::types::{TunnelEndpoint, Vni};
use std::collections::HashMap;
use vnetd_sai::NextHopOid;
use vnetd_types::{IpAddress, MacAddress};

/// One cached tunnel next hop.
#[derive(Debug, Clone)]
pub struct NextHopEntry {
    /// Hardware next-hop handle.
    pub nh_id: NextHopOid,
    /// Remote endpoint address.
    pub endpoint: IpAddress,
    /// Remote VTEP MAC used at creation, if any.
    pub mac: Option<MacAddress>,
    /// VNI used for encapsulation.
    pub vni: Vni,
    ref_count: u32,
}

impl NextHopEntry {
    /// Creates an entry with a zero reference count.
    pub fn new(nh_id: NextHopOid, endpoint: &TunnelEndpoint, effective_vni: Vni) -> Self {
        Self {
            nh_id,
            endpoint: endpoint.ip,
            mac: endpoint.mac,
            vni: effective_vni,
            ref_count: 0,
        }
    }

    /// Current reference count.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Increments the reference count and returns the new value.
    pub fn incr_ref(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_add(1);
        self.ref_count
    }

    /// Decrements the reference count.
    ///
    /// Returns the new count, or `None` on underflow.
    pub fn decr_ref(&mut self) -> Option<u32> {
        if self.ref_count == 0 {
            return None;
        }
        self.ref_count -= 1;
        Some(self.ref_count)
    }

    /// Returns true if no route references this next hop.
    pub fn is_unreferenced(&self) -> bool {
        self.ref_count == 0
    }
}

/// Per-VNET cache of shared tunnel next hops.
#[derive(Debug, Default)]
pub struct NextHopTunnels {
    tunnels: HashMap<String, HashMap<IpAddress, NextHopEntry>>,
}

impl NextHopTunnels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the cached next hop for (vnet, endpoint).
    pub fn get(&self, vnet: &str, endpoint: IpAddress) -> Option<&NextHopEntry> {
        self.tunnels.get(vnet).and_then(|m| m.get(&endpoint))
    }

    /// Mutable lookup for (vnet, endpoint).
    pub fn get_mut(&mut self, vnet: &str, endpoint: IpAddress) -> Option<&mut NextHopEntry> {
        self.tunnels.get_mut(vnet).and_then(|m| m.get_mut(&endpoint))
    }

    /// Inserts a freshly created next hop.
    pub fn insert(&mut self, vnet: &str, entry: NextHopEntry) {
        self.tunnels
            .entry(vnet.to_string())
            .or_default()
            .insert(entry.endpoint, entry);
    }

    /// Removes the (vnet, endpoint) entry, returning it.
    ///
    /// Empty per-VNET maps are dropped so `count_for_vnet` stays honest.
    pub fn remove(&mut self, vnet: &str, endpoint: IpAddress) -> Option<NextHopEntry> {
        let map = self.tunnels.get_mut(vnet)?;
        let entry = map.remove(&endpoint);
        if map.is_empty() {
            self.tunnels.remove(vnet);
        }
        entry
    }

    /// Number of cached next hops for one VNET.
    pub fn count_for_vnet(&self, vnet: &str) -> usize {
        self.tunnels.get(vnet).map(|m| m.len()).unwrap_or(0)
    }

    /// Total number of cached next hops.
    pub fn total_count(&self) -> usize {
        self.tunnels.values().map(|m| m.len()).sum()
    }
}
