//! Per-VNET hardware bindings.
//!
//! A VNET binding owns the hardware objects that realize one VNET. The
//! VRF-backed variant holds one virtual-router handle per configured
//! direction; the encapsulation map is derived from the ingress handle and
//! the decapsulation map from the egress handle. A bridge-backed variant
//! exists as an extension point.

use super::types::{VnetExec, VrDirection, Vni};
use crate::error_log;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use vnetd_sai::{SaiError, SaiResult, SwitchApi, VirtualRouterAttrs, VirtualRouterOid};
use vnetd_types::MacAddress;

/// VRF-backed VNET binding: one virtual router per configured direction.
#[derive(Debug, Clone)]
pub struct VnetVrfObject {
    vr_ids: BTreeMap<VrDirection, VirtualRouterOid>,
}

impl VnetVrfObject {
    /// Allocates a virtual router for every direction in the context set.
    ///
    /// Atomic: on any allocation failure the handles already created are
    /// released before the error is returned.
    pub fn create(
        sai: &Arc<dyn SwitchApi>,
        vr_contexts: &[VrDirection],
        src_mac: Option<MacAddress>,
    ) -> SaiResult<Self> {
        let attrs = match src_mac {
            Some(mac) => VirtualRouterAttrs::with_src_mac(mac),
            None => VirtualRouterAttrs::default(),
        };

        let mut vr_ids = BTreeMap::new();
        for direction in vr_contexts {
            match sai.create_virtual_router(&attrs) {
                Ok(vr_id) => {
                    vr_ids.insert(*direction, vr_id);
                }
                Err(err) => {
                    for (_, vr_id) in vr_ids {
                        if let Err(cleanup) = sai.remove_virtual_router(vr_id) {
                            error_log!("VnetVrfObject", %cleanup, "rollback of virtual router failed");
                        }
                    }
                    return Err(err);
                }
            }
        }

        Ok(Self { vr_ids })
    }

    /// Releases every virtual-router handle.
    pub fn destroy(&mut self, sai: &Arc<dyn SwitchApi>) -> SaiResult<()> {
        for (_, vr_id) in std::mem::take(&mut self.vr_ids) {
            sai.remove_virtual_router(vr_id)?;
        }
        Ok(())
    }

    /// The primary virtual router: ingress, or egress where no ingress
    /// direction is configured.
    pub fn vr_id(&self) -> VirtualRouterOid {
        self.vr_ids
            .get(&VrDirection::Ingress)
            .or_else(|| self.vr_ids.get(&VrDirection::Egress))
            .copied()
            .unwrap_or_default()
    }

    /// Encapsulation-map identifier (the ingress handle).
    pub fn encap_map_id(&self) -> VirtualRouterOid {
        self.vr_ids
            .get(&VrDirection::Ingress)
            .copied()
            .unwrap_or_default()
    }

    /// Decapsulation-map identifier (the egress handle).
    pub fn decap_map_id(&self) -> VirtualRouterOid {
        self.vr_ids
            .get(&VrDirection::Egress)
            .copied()
            .unwrap_or_default()
    }

    /// Returns true if a handle exists for the given direction.
    pub fn has_direction(&self, direction: VrDirection) -> bool {
        self.vr_ids.contains_key(&direction)
    }

    /// Number of live virtual-router handles.
    pub fn handle_count(&self) -> usize {
        self.vr_ids.len()
    }

    /// Pushes an updated source MAC to every live handle.
    pub fn update_src_mac(
        &self,
        sai: &Arc<dyn SwitchApi>,
        mac: MacAddress,
    ) -> SaiResult<()> {
        for vr_id in self.vr_ids.values() {
            sai.set_virtual_router_src_mac(*vr_id, mac)?;
        }
        Ok(())
    }
}

/// Bridge-backed VNET binding.
///
/// Extension point only; no bridge hardware objects are modelled yet.
#[derive(Debug, Clone, Default)]
pub struct VnetBridgeObject;

/// The binding variants a VNET can carry.
#[derive(Debug, Clone)]
pub enum VnetBinding {
    Vrf(VnetVrfObject),
    Bridge(VnetBridgeObject),
}

impl VnetBinding {
    /// Which execution backend this binding belongs to.
    pub fn exec(&self) -> VnetExec {
        match self {
            VnetBinding::Vrf(_) => VnetExec::Vrf,
            VnetBinding::Bridge(_) => VnetExec::Bridge,
        }
    }

    pub fn vr_id(&self) -> VirtualRouterOid {
        match self {
            VnetBinding::Vrf(vrf) => vrf.vr_id(),
            VnetBinding::Bridge(_) => VirtualRouterOid::NULL,
        }
    }

    pub fn encap_map_id(&self) -> VirtualRouterOid {
        match self {
            VnetBinding::Vrf(vrf) => vrf.encap_map_id(),
            VnetBinding::Bridge(_) => VirtualRouterOid::NULL,
        }
    }

    pub fn decap_map_id(&self) -> VirtualRouterOid {
        match self {
            VnetBinding::Vrf(vrf) => vrf.decap_map_id(),
            VnetBinding::Bridge(_) => VirtualRouterOid::NULL,
        }
    }

    /// Pushes an updated source MAC to the binding's hardware objects.
    pub fn update_src_mac(&self, sai: &Arc<dyn SwitchApi>, mac: MacAddress) -> SaiResult<()> {
        match self {
            VnetBinding::Vrf(vrf) => vrf.update_src_mac(sai, mac),
            VnetBinding::Bridge(_) => Ok(()),
        }
    }

    /// Releases the binding's hardware objects.
    pub fn destroy(&mut self, sai: &Arc<dyn SwitchApi>) -> SaiResult<()> {
        match self {
            VnetBinding::Vrf(vrf) => vrf.destroy(sai),
            VnetBinding::Bridge(_) => Ok(()),
        }
    }
}

/// One registered VNET: configuration, binding, and reference count.
#[derive(Debug, Clone)]
pub struct VnetEntry {
    /// Tunnel this VNET encapsulates into. Immutable after creation.
    pub tunnel: String,
    /// Overlay segment identifier. Immutable after creation.
    pub vni: Vni,
    /// Source MAC override for routed frames.
    pub src_mac: Option<MacAddress>,
    /// Peer VNETs permitted to exchange routes with this one.
    pub peer_list: BTreeSet<String>,
    /// Hardware binding.
    pub binding: VnetBinding,
    /// Number of routes and next hops resolved against this VNET.
    ref_count: u32,
}

impl VnetEntry {
    pub fn new(
        tunnel: impl Into<String>,
        vni: Vni,
        src_mac: Option<MacAddress>,
        peer_list: BTreeSet<String>,
        binding: VnetBinding,
    ) -> Self {
        Self {
            tunnel: tunnel.into(),
            vni,
            src_mac,
            peer_list,
            binding,
            ref_count: 0,
        }
    }

    /// Current reference count.
    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Returns true if the route orchestrator still references this VNET.
    pub fn is_in_use(&self) -> bool {
        self.ref_count > 0
    }

    /// Increments the reference count and returns the new value.
    pub fn incr_ref(&mut self) -> u32 {
        self.ref_count = self.ref_count.saturating_add(1);
        self.ref_count
    }

    /// Decrements the reference count.
    ///
    /// Returns the new count, or an error on underflow.
    pub fn decr_ref(&mut self) -> SaiResult<u32> {
        if self.ref_count == 0 {
            return Err(SaiError::internal("VNET reference count underflow"));
        }
        self.ref_count -= 1;
        Ok(self.ref_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnetd_sai::MockSwitchApi;

    fn sai() -> Arc<dyn SwitchApi> {
        Arc::new(MockSwitchApi::new())
    }

    #[test]
    fn test_create_per_direction() {
        let api = Arc::new(MockSwitchApi::new());
        let sai: Arc<dyn SwitchApi> = api.clone();

        let vrf = VnetVrfObject::create(
            &sai,
            &[VrDirection::Ingress, VrDirection::Egress],
            None,
        )
        .unwrap();

        assert_eq!(vrf.handle_count(), 2);
        assert!(vrf.has_direction(VrDirection::Ingress));
        assert!(vrf.has_direction(VrDirection::Egress));
        assert_eq!(api.virtual_router_count(), 2);

        // Map identifiers derive from the per-direction handles.
        assert_eq!(vrf.encap_map_id(), vrf.vr_id());
        assert_ne!(vrf.encap_map_id(), vrf.decap_map_id());
    }

    #[test]
    fn test_single_direction_context() {
        let vrf = VnetVrfObject::create(&sai(), &[VrDirection::Ingress], None).unwrap();

        assert_eq!(vrf.handle_count(), 1);
        assert!(!vrf.has_direction(VrDirection::Egress));
        assert!(vrf.decap_map_id().is_null());
        assert!(vrf.vr_id().is_valid());
    }

    #[test]
    fn test_create_rolls_back_on_failure() {
        let api = Arc::new(MockSwitchApi::new());
        let sai: Arc<dyn SwitchApi> = api.clone();
        // First allocation succeeds, second fails.
        api.inject_create_failures(1, 1);

        let result = VnetVrfObject::create(
            &sai,
            &[VrDirection::Ingress, VrDirection::Egress],
            None,
        );

        assert!(result.is_err());
        assert_eq!(api.virtual_router_count(), 0);
    }

    #[test]
    fn test_destroy_releases_handles() {
        let api = Arc::new(MockSwitchApi::new());
        let sai: Arc<dyn SwitchApi> = api.clone();

        let mut vrf = VnetVrfObject::create(
            &sai,
            &[VrDirection::Ingress, VrDirection::Egress],
            None,
        )
        .unwrap();
        vrf.destroy(&sai).unwrap();

        assert_eq!(api.virtual_router_count(), 0);
        assert_eq!(vrf.handle_count(), 0);
    }

    #[test]
    fn test_entry_ref_count() {
        let vrf = VnetVrfObject::create(&sai(), &[VrDirection::Ingress], None).unwrap();
        let mut entry = VnetEntry::new(
            "tunnel_v4",
            2000,
            None,
            BTreeSet::new(),
            VnetBinding::Vrf(vrf),
        );

        assert!(!entry.is_in_use());
        assert_eq!(entry.incr_ref(), 1);
        assert_eq!(entry.incr_ref(), 2);
        assert_eq!(entry.decr_ref().unwrap(), 1);
        assert_eq!(entry.decr_ref().unwrap(), 0);
        assert!(entry.decr_ref().is_err());
    }

    #[test]
    fn test_bridge_binding_is_inert() {
        let mut binding = VnetBinding::Bridge(VnetBridgeObject);
        assert_eq!(binding.exec(), VnetExec::Bridge);
        assert!(binding.vr_id().is_null());
        assert!(binding.destroy(&sai()).is_ok());
    }
}
