//! VNET registry orchestration logic.

use super::object::{VnetBinding, VnetEntry, VnetVrfObject};
use super::types::{VnetExec, VrDirection, Vni, VNET_REQUEST, VNET_TABLE, VNET_VNI_MAX};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::vxlan::VxlanTunnelOrch;
use crate::{audit_log, error_log, info_log, warn_log};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use vnetd_orch_common::{Consumer, ConsumerConfig, KeyOpFieldsValues, Orch, Request, TaskError};
use vnetd_sai::{SaiError, SwitchApi, VirtualRouterOid};
use vnetd_types::MacAddress;

#[derive(Debug, Clone, thiserror::Error)]
pub enum VnetOrchError {
    #[error("VNET not found: {0}")]
    VnetNotFound(String),
    #[error("VNET {0} references unprovisioned tunnel {1}")]
    TunnelNotReady(String, String),
    #[error("attribute {1} of VNET {0} cannot change in place")]
    ImmutableAttribute(String, &'static str),
    #[error("VNET in use: {0} ({1} references)")]
    VnetInUse(String, u32),
    #[error("VNI {0} exceeds 24 bits")]
    InvalidVni(u64),
    #[error("reference count underflow on VNET {0}")]
    RefCountUnderflow(String),
    #[error("bridge-backed VNETs are not supported")]
    BridgeUnsupported,
    #[error(transparent)]
    Sai(#[from] SaiError),
}

impl VnetOrchError {
    /// Maps this error onto the common processing taxonomy.
    pub fn to_task_error(&self) -> TaskError {
        match self {
            VnetOrchError::VnetNotFound(name) => TaskError::not_found(name),
            VnetOrchError::TunnelNotReady(_, tunnel) => {
                TaskError::waiting_for(format!("{}:{}", crate::vxlan::VXLAN_TUNNEL_TABLE, tunnel))
            }
            VnetOrchError::ImmutableAttribute(name, attr) => {
                TaskError::immutable_attribute(name, *attr)
            }
            VnetOrchError::VnetInUse(name, refs) => TaskError::in_use(name, *refs),
            VnetOrchError::InvalidVni(_) | VnetOrchError::BridgeUnsupported => {
                TaskError::invalid_entry(self.to_string())
            }
            VnetOrchError::RefCountUnderflow(_) => TaskError::internal(self.to_string()),
            VnetOrchError::Sai(err) if err.is_resource_exhaustion() => {
                TaskError::resource_exhaustion(err.to_string())
            }
            VnetOrchError::Sai(err) => TaskError::switch_api(err.to_string()),
        }
    }
}

/// Configuration for the VNET registry.
#[derive(Debug, Clone)]
pub struct VnetOrchConfig {
    /// Directions instantiated per VNET. Fixed for the process lifetime.
    pub vr_contexts: Vec<VrDirection>,
    /// Execution backend for new VNETs.
    pub exec: VnetExec,
    /// Passes a deferred event survives before it is dropped and logged.
    pub max_defer_passes: u32,
}

impl Default for VnetOrchConfig {
    fn default() -> Self {
        Self {
            vr_contexts: vec![VrDirection::Ingress, VrDirection::Egress],
            exec: VnetExec::Vrf,
            max_defer_passes: 128,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VnetOrchStats {
    pub vnets_created: u64,
    pub vnets_updated: u64,
    pub vnets_removed: u64,
    pub deferred: u64,
    pub dropped: u64,
    pub errors: u64,
}

/// The virtual-network registry.
///
/// Owns the name -> binding table and the virtual-router handles behind
/// it. Route programming reads this table through the name-keyed lookups
/// and pins entries with the reference count; a referenced VNET cannot be
/// removed.
pub struct VnetOrch {
    config: VnetOrchConfig,
    sai: Arc<dyn SwitchApi>,
    tunnel_orch: Arc<RwLock<VxlanTunnelOrch>>,
    consumer: Consumer,
    vnet_table: HashMap<String, VnetEntry>,
    defer_counts: HashMap<String, u32>,
    stats: VnetOrchStats,
}

impl VnetOrch {
    pub fn new(
        config: VnetOrchConfig,
        sai: Arc<dyn SwitchApi>,
        tunnel_orch: Arc<RwLock<VxlanTunnelOrch>>,
    ) -> Self {
        Self {
            config,
            sai,
            tunnel_orch,
            consumer: Consumer::new(ConsumerConfig::new(VNET_TABLE)),
            vnet_table: HashMap::new(),
            defer_counts: HashMap::new(),
            stats: VnetOrchStats::default(),
        }
    }

    /// Returns true if the registry runs VRF-backed bindings.
    pub fn is_vrf_mode(&self) -> bool {
        self.config.exec == VnetExec::Vrf
    }

    /// Returns true if the registry runs bridge-backed bindings.
    pub fn is_bridge_mode(&self) -> bool {
        self.config.exec == VnetExec::Bridge
    }

    /// Returns true if a VNET with this name is registered.
    pub fn vnet_exists(&self, name: &str) -> bool {
        self.vnet_table.contains_key(name)
    }

    /// Number of registered VNETs.
    pub fn vnet_count(&self) -> usize {
        self.vnet_table.len()
    }

    pub fn stats(&self) -> &VnetOrchStats {
        &self.stats
    }

    fn entry(&self, name: &str) -> Result<&VnetEntry, VnetOrchError> {
        self.vnet_table
            .get(name)
            .ok_or_else(|| VnetOrchError::VnetNotFound(name.to_string()))
    }

    /// Primary virtual-router handle of a VNET.
    pub fn get_vr_id(&self, name: &str) -> Result<VirtualRouterOid, VnetOrchError> {
        Ok(self.entry(name)?.binding.vr_id())
    }

    /// Encapsulation-map identifier of a VNET.
    pub fn get_encap_map_id(&self, name: &str) -> Result<VirtualRouterOid, VnetOrchError> {
        Ok(self.entry(name)?.binding.encap_map_id())
    }

    /// Decapsulation-map identifier of a VNET.
    pub fn get_decap_map_id(&self, name: &str) -> Result<VirtualRouterOid, VnetOrchError> {
        Ok(self.entry(name)?.binding.decap_map_id())
    }

    /// Tunnel name of a VNET.
    pub fn get_tunnel_name(&self, name: &str) -> Result<String, VnetOrchError> {
        Ok(self.entry(name)?.tunnel.clone())
    }

    /// VNI of a VNET.
    pub fn get_vni(&self, name: &str) -> Result<Vni, VnetOrchError> {
        Ok(self.entry(name)?.vni)
    }

    /// Peer list of a VNET. Enforcement of peering policy is layered
    /// elsewhere; this is the read primitive.
    pub fn get_peer_list(&self, name: &str) -> Result<BTreeSet<String>, VnetOrchError> {
        Ok(self.entry(name)?.peer_list.clone())
    }

    /// Route-orchestrator reference count of a VNET.
    pub fn ref_count(&self, name: &str) -> Result<u32, VnetOrchError> {
        Ok(self.entry(name)?.ref_count())
    }

    /// Pins a VNET against removal. Called per programmed route.
    pub fn increase_ref(&mut self, name: &str) -> Result<u32, VnetOrchError> {
        self.vnet_table
            .get_mut(name)
            .map(|e| e.incr_ref())
            .ok_or_else(|| VnetOrchError::VnetNotFound(name.to_string()))
    }

    /// Releases one pin on a VNET. Called per withdrawn route.
    pub fn decrease_ref(&mut self, name: &str) -> Result<u32, VnetOrchError> {
        let entry = self
            .vnet_table
            .get_mut(name)
            .ok_or_else(|| VnetOrchError::VnetNotFound(name.to_string()))?;
        entry
            .decr_ref()
            .map_err(|_| VnetOrchError::RefCountUnderflow(name.to_string()))
    }

    /// Enqueues change events for the next processing pass.
    pub fn enqueue(&mut self, events: impl IntoIterator<Item = KeyOpFieldsValues>) {
        self.consumer.add_to_sync(events);
    }

    fn tunnel_ready(&self, tunnel: &str) -> bool {
        self.tunnel_orch
            .read()
            .map(|t| t.tunnel_exists(tunnel))
            .unwrap_or(false)
    }

    /// Registers or updates a VNET from a parsed request.
    fn do_set(&mut self, request: &Request) -> Result<(), VnetOrchError> {
        let name = request.key_string(0).unwrap_or_default().to_string();

        let vni = request.attr_uint("vni").unwrap_or_default();
        if vni > u64::from(VNET_VNI_MAX) {
            return Err(VnetOrchError::InvalidVni(vni));
        }
        let vni = vni as Vni;

        let tunnel = request.attr_string("vxlan_tunnel").unwrap_or_default().to_string();
        let src_mac = request.attr_mac("src_mac");
        let peer_list = request.attr_set("peer_list").cloned().unwrap_or_default();

        if let Some(entry) = self.vnet_table.get_mut(&name) {
            // Structural identity never changes in place.
            if entry.tunnel != tunnel {
                return Err(VnetOrchError::ImmutableAttribute(name, "vxlan_tunnel"));
            }
            if entry.vni != vni {
                return Err(VnetOrchError::ImmutableAttribute(name, "vni"));
            }

            entry.peer_list = peer_list;
            if let Some(mac) = src_mac {
                if entry.src_mac != Some(mac) {
                    entry.binding.update_src_mac(&self.sai, mac)?;
                    entry.src_mac = Some(mac);
                }
            }
            self.stats.vnets_updated += 1;

            audit_log!(
                AuditRecord::new(AuditCategory::ResourceModify, "VnetOrch", "update_vnet")
                    .with_outcome(AuditOutcome::Success)
                    .with_object_id(&name)
                    .with_object_type("vnet")
            );
            return Ok(());
        }

        if self.is_bridge_mode() {
            return Err(VnetOrchError::BridgeUnsupported);
        }

        if !self.tunnel_ready(&tunnel) {
            return Err(VnetOrchError::TunnelNotReady(name, tunnel));
        }

        let vrf = self.create_vrf_object(&name, src_mac)?;
        let entry = VnetEntry::new(&tunnel, vni, src_mac, peer_list, VnetBinding::Vrf(vrf));
        self.vnet_table.insert(name.clone(), entry);
        self.stats.vnets_created += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceCreate, "VnetOrch", "add_vnet")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(&name)
                .with_object_type("vnet")
                .with_details(serde_json::json!({
                    "vxlan_tunnel": tunnel,
                    "vni": vni,
                    "directions": self.config.vr_contexts.len(),
                }))
        );

        Ok(())
    }

    fn create_vrf_object(
        &mut self,
        name: &str,
        src_mac: Option<MacAddress>,
    ) -> Result<VnetVrfObject, VnetOrchError> {
        match VnetVrfObject::create(&self.sai, &self.config.vr_contexts, src_mac) {
            Ok(vrf) => Ok(vrf),
            Err(err) => {
                audit_log!(
                    AuditRecord::new(AuditCategory::ResourceCreate, "VnetOrch", "add_vnet")
                        .with_outcome(AuditOutcome::Failure)
                        .with_object_id(name)
                        .with_object_type("vnet")
                        .with_error(err.to_string())
                );
                Err(err.into())
            }
        }
    }

    /// Removes a VNET from a parsed request.
    fn do_del(&mut self, request: &Request) -> Result<(), VnetOrchError> {
        let name = request.key_string(0).unwrap_or_default().to_string();

        let entry = match self.vnet_table.get(&name) {
            Some(entry) => entry,
            None => {
                info_log!("VnetOrch", vnet = %name, "remove of unknown VNET ignored");
                return Ok(());
            }
        };

        if entry.is_in_use() {
            let err = VnetOrchError::VnetInUse(name.clone(), entry.ref_count());
            audit_log!(
                AuditRecord::new(AuditCategory::ResourceDelete, "VnetOrch", "remove_vnet")
                    .with_outcome(AuditOutcome::Failure)
                    .with_object_id(&name)
                    .with_object_type("vnet")
                    .with_error(err.to_string())
            );
            return Err(err);
        }

        // Release the hardware handles before dropping the entry; a failed
        // release keeps the entry registered.
        let mut binding = entry.binding.clone();
        binding.destroy(&self.sai)?;
        self.vnet_table.remove(&name);
        self.stats.vnets_removed += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceDelete, "VnetOrch", "remove_vnet")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(&name)
                .with_object_type("vnet")
        );

        Ok(())
    }

    /// Drains and applies all pending events; unresolved dependencies are
    /// pushed back for the next pass.
    pub fn process_pending(&mut self) {
        for event in self.consumer.drain() {
            let request = match Request::parse(&VNET_REQUEST, &event) {
                Ok(request) => request,
                Err(err) => {
                    self.stats.errors += 1;
                    error_log!("VnetOrch", key = %event.key, %err, "schema violation, event dropped");
                    continue;
                }
            };

            let result = if request.operation().is_set() {
                self.do_set(&request)
            } else {
                self.do_del(&request)
            };

            match result {
                Ok(()) => {
                    self.defer_counts.remove(&event.key);
                }
                Err(VnetOrchError::TunnelNotReady(name, tunnel)) => {
                    self.defer_event(event, &name, &tunnel);
                }
                Err(err) => {
                    let task_err = err.to_task_error();
                    self.defer_counts.remove(&event.key);
                    self.stats.errors += 1;
                    error_log!(
                        "VnetOrch",
                        key = %event.key,
                        status = ?task_err.to_status(),
                        %task_err,
                        "event failed"
                    );
                }
            }
        }
    }

    fn defer_event(&mut self, event: KeyOpFieldsValues, name: &str, tunnel: &str) {
        let passes = self.defer_counts.entry(event.key.clone()).or_insert(0);
        *passes += 1;
        if *passes > self.config.max_defer_passes {
            self.defer_counts.remove(&event.key);
            self.stats.dropped += 1;
            error_log!(
                "VnetOrch",
                vnet = %name,
                tunnel = %tunnel,
                "dependency still unresolved after retry limit, event dropped"
            );
            audit_log!(
                AuditRecord::new(AuditCategory::ErrorCondition, "VnetOrch", "defer_expired")
                    .with_outcome(AuditOutcome::Failure)
                    .with_object_id(name)
                    .with_object_type("vnet")
                    .with_error(format!("tunnel {} never became ready", tunnel))
            );
            return;
        }

        self.stats.deferred += 1;
        warn_log!("VnetOrch", vnet = %name, tunnel = %tunnel, "tunnel not ready, event deferred");
        self.consumer.retry(event);
    }
}

#[async_trait]
impl Orch for VnetOrch {
    fn name(&self) -> &str {
        "VnetOrch"
    }

    async fn do_task(&mut self) {
        self.process_pending();
    }

    fn priority(&self) -> i32 {
        30
    }

    fn has_pending_tasks(&self) -> bool {
        self.consumer.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.consumer.dump()
    }
}

/// Daemon-loop adapter for the shared registry.
pub struct VnetOrchHandle(pub Arc<RwLock<VnetOrch>>);

#[async_trait]
impl Orch for VnetOrchHandle {
    fn name(&self) -> &str {
        "VnetOrch"
    }

    async fn do_task(&mut self) {
        if let Ok(mut orch) = self.0.write() {
            orch.process_pending();
        }
    }

    fn priority(&self) -> i32 {
        30
    }

    fn has_pending_tasks(&self) -> bool {
        self.0.read().map(|o| o.consumer.has_pending()).unwrap_or(false)
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.0.read().map(|o| o.consumer.dump()).unwrap_or_default()
    }
}
