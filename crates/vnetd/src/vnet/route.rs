//! VNET route orchestration logic.
//!
//! Consumes the two route tables and keeps the forwarding state of every
//! VNET in sync: tunnel routes resolve to shared, reference-counted tunnel
//! next hops; local routes resolve through the interface registry. Routes
//! referencing a VNET or interface that does not exist yet are deferred
//! and retried, because cross-table delivery order is not guaranteed.

use super::nexthop::{NextHopEntry, NextHopTunnels};
use super::types::{
    TunnelEndpoint, VnetRouteKey, Vni, VNET_ROUTE_REQUEST, VNET_ROUTE_TABLE,
    VNET_ROUTE_TUNNEL_TABLE, VNET_VNI_MAX,
};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::intfs::IntfsOrch;
use crate::vnet::orch::VnetOrch;
use crate::vxlan::VxlanTunnelOrch;
use crate::{audit_log, error_log, info_log, warn_log};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use vnetd_orch_common::{Consumer, ConsumerConfig, KeyOpFieldsValues, Orch, Request, TaskError};
use vnetd_sai::{NextHopOid, RouteEntry, SaiError, SwitchApi, TunnelNextHopAttrs};
use vnetd_types::{IpAddress, IpPrefix};

#[derive(Debug, Clone, thiserror::Error)]
pub enum VnetRouteOrchError {
    #[error("VNET not registered yet: {0}")]
    VnetNotReady(String),
    #[error("interface not provisioned yet: {0}")]
    IntfNotReady(String),
    #[error("route event lacks mandatory attribute {0}")]
    MissingAttribute(&'static str),
    #[error("VNI {0} exceeds 24 bits")]
    InvalidVni(u64),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Sai(#[from] SaiError),
}

impl VnetRouteOrchError {
    /// Deferred-and-retried errors, as opposed to terminal ones.
    fn is_deferrable(&self) -> bool {
        matches!(
            self,
            VnetRouteOrchError::VnetNotReady(_) | VnetRouteOrchError::IntfNotReady(_)
        )
    }

    /// Maps this error onto the common processing taxonomy.
    pub fn to_task_error(&self) -> TaskError {
        match self {
            VnetRouteOrchError::VnetNotReady(vnet) => {
                TaskError::waiting_for(format!("{}:{}", super::types::VNET_TABLE, vnet))
            }
            VnetRouteOrchError::IntfNotReady(ifname) => {
                TaskError::waiting_for(format!("{}:{}", crate::intfs::INTF_TABLE, ifname))
            }
            VnetRouteOrchError::MissingAttribute(_) | VnetRouteOrchError::InvalidVni(_) => {
                TaskError::invalid_entry(self.to_string())
            }
            VnetRouteOrchError::Internal(message) => TaskError::internal(message),
            VnetRouteOrchError::Sai(err) if err.is_resource_exhaustion() => {
                TaskError::resource_exhaustion(err.to_string())
            }
            VnetRouteOrchError::Sai(err) => TaskError::switch_api(err.to_string()),
        }
    }
}

/// What a programmed route resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteNextHop {
    /// Shared tunnel next hop, keyed by remote endpoint in the cache.
    Tunnel(IpAddress),
    /// Next hop owned by the named local interface.
    Local { ifname: String, nh_id: NextHopOid },
}

/// Configuration for the route orchestrator.
#[derive(Debug, Clone)]
pub struct VnetRouteOrchConfig {
    /// Passes a deferred event survives before it is dropped and logged.
    pub max_defer_passes: u32,
}

impl Default for VnetRouteOrchConfig {
    fn default() -> Self {
        Self {
            max_defer_passes: 128,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VnetRouteOrchStats {
    pub routes_added: u64,
    pub routes_replaced: u64,
    pub routes_removed: u64,
    pub next_hops_created: u64,
    pub next_hops_removed: u64,
    pub deferred: u64,
    pub dropped: u64,
    pub errors: u64,
}

/// The route orchestrator for VNET-scoped unicast routes.
pub struct VnetRouteOrch {
    config: VnetRouteOrchConfig,
    sai: Arc<dyn SwitchApi>,
    vnet_orch: Arc<RwLock<VnetOrch>>,
    tunnel_orch: Arc<RwLock<VxlanTunnelOrch>>,
    intfs_orch: Arc<RwLock<IntfsOrch>>,
    consumers: Vec<Consumer>,
    routes: HashMap<VnetRouteKey, RouteNextHop>,
    nh_tunnels: NextHopTunnels,
    defer_counts: HashMap<String, u32>,
    stats: VnetRouteOrchStats,
}

impl VnetRouteOrch {
    pub fn new(
        config: VnetRouteOrchConfig,
        sai: Arc<dyn SwitchApi>,
        vnet_orch: Arc<RwLock<VnetOrch>>,
        tunnel_orch: Arc<RwLock<VxlanTunnelOrch>>,
        intfs_orch: Arc<RwLock<IntfsOrch>>,
    ) -> Self {
        Self {
            config,
            sai,
            vnet_orch,
            tunnel_orch,
            intfs_orch,
            consumers: vec![
                Consumer::new(ConsumerConfig::new(VNET_ROUTE_TABLE)),
                Consumer::new(ConsumerConfig::new(VNET_ROUTE_TUNNEL_TABLE)),
            ],
            routes: HashMap::new(),
            nh_tunnels: NextHopTunnels::new(),
            defer_counts: HashMap::new(),
            stats: VnetRouteOrchStats::default(),
        }
    }

    /// Number of programmed routes.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Number of programmed routes in one VNET.
    pub fn route_count_for_vnet(&self, vnet: &str) -> usize {
        self.routes.keys().filter(|k| k.vnet == vnet).count()
    }

    /// Number of live shared tunnel next hops in one VNET.
    pub fn next_hop_count_for_vnet(&self, vnet: &str) -> usize {
        self.nh_tunnels.count_for_vnet(vnet)
    }

    /// What the given route currently resolves to.
    pub fn route_target(&self, key: &VnetRouteKey) -> Option<&RouteNextHop> {
        self.routes.get(key)
    }

    pub fn stats(&self) -> &VnetRouteOrchStats {
        &self.stats
    }

    /// Enqueues change events on the named route table.
    pub fn enqueue(&mut self, table: &str, events: impl IntoIterator<Item = KeyOpFieldsValues>) {
        match self.consumers.iter_mut().find(|c| c.table_name() == table) {
            Some(consumer) => consumer.add_to_sync(events),
            None => warn_log!("VnetRouteOrch", table = %table, "events for unknown table discarded"),
        }
    }

    fn vnet_read(&self) -> Result<RwLockReadGuard<'_, VnetOrch>, VnetRouteOrchError> {
        self.vnet_orch
            .read()
            .map_err(|_| VnetRouteOrchError::Internal("vnet registry lock poisoned".into()))
    }

    fn vnet_write(&self) -> Result<RwLockWriteGuard<'_, VnetOrch>, VnetRouteOrchError> {
        self.vnet_orch
            .write()
            .map_err(|_| VnetRouteOrchError::Internal("vnet registry lock poisoned".into()))
    }

    /// Resolves the VNET context needed to program one route.
    fn vnet_context(&self, vnet: &str) -> Result<VnetContext, VnetRouteOrchError> {
        let registry = self.vnet_read()?;
        if !registry.vnet_exists(vnet) {
            return Err(VnetRouteOrchError::VnetNotReady(vnet.to_string()));
        }
        Ok(VnetContext {
            vr_id: registry_lookup(registry.get_vr_id(vnet))?,
            vni: registry_lookup(registry.get_vni(vnet))?,
            tunnel: registry_lookup(registry.get_tunnel_name(vnet))?,
        })
    }

    /// Looks up or creates the shared tunnel next hop for (vnet, endpoint)
    /// and takes one reference on it.
    fn acquire_tunnel_next_hop(
        &mut self,
        vnet: &str,
        endpoint: &TunnelEndpoint,
        effective_vni: Vni,
        tunnel: &str,
    ) -> Result<NextHopOid, VnetRouteOrchError> {
        if let Some(nh) = self.nh_tunnels.get_mut(vnet, endpoint.ip) {
            nh.incr_ref();
            return Ok(nh.nh_id);
        }

        let tunnel_id = self
            .tunnel_orch
            .read()
            .map_err(|_| VnetRouteOrchError::Internal("tunnel registry lock poisoned".into()))?
            .get_tunnel_id(tunnel)
            .map_err(|err| VnetRouteOrchError::Internal(err.to_string()))?;

        let nh_id = self.sai.create_tunnel_next_hop(&TunnelNextHopAttrs {
            tunnel_id,
            endpoint: endpoint.ip,
            mac: endpoint.mac,
            vni: effective_vni,
        })?;

        let mut entry = NextHopEntry::new(nh_id, endpoint, effective_vni);
        entry.incr_ref();
        self.nh_tunnels.insert(vnet, entry);
        self.stats.next_hops_created += 1;
        Ok(nh_id)
    }

    /// Drops one reference on the (vnet, endpoint) next hop, destroying it
    /// when the last route lets go.
    fn release_tunnel_next_hop(&mut self, vnet: &str, endpoint: IpAddress) {
        let destroy = match self.nh_tunnels.get_mut(vnet, endpoint) {
            Some(nh) => match nh.decr_ref() {
                Some(remaining) => remaining == 0,
                None => {
                    error_log!("VnetRouteOrch", vnet = %vnet, endpoint = %endpoint, "next-hop reference underflow");
                    false
                }
            },
            None => {
                error_log!("VnetRouteOrch", vnet = %vnet, endpoint = %endpoint, "release of unknown next hop");
                return;
            }
        };

        if destroy {
            if let Some(entry) = self.nh_tunnels.remove(vnet, endpoint) {
                match self.sai.remove_next_hop(entry.nh_id) {
                    Ok(()) => self.stats.next_hops_removed += 1,
                    Err(err) => {
                        error_log!("VnetRouteOrch", vnet = %vnet, endpoint = %endpoint, %err, "next-hop removal failed")
                    }
                }
            }
        }
    }

    /// Releases whatever a route previously resolved to.
    fn release_route_target(&mut self, vnet: &str, target: &RouteNextHop) {
        match target {
            RouteNextHop::Tunnel(endpoint) => self.release_tunnel_next_hop(vnet, *endpoint),
            RouteNextHop::Local { ifname, .. } => {
                let result = self
                    .intfs_orch
                    .write()
                    .map_err(|_| ())
                    .and_then(|mut intfs| intfs.decrease_ref(ifname).map_err(|_| ()));
                if result.is_err() {
                    error_log!("VnetRouteOrch", intf = %ifname, "interface reference release failed");
                }
            }
        }
    }

    /// Programs or replaces a tunnel route.
    fn add_tunnel_route(
        &mut self,
        vnet: &str,
        prefix: IpPrefix,
        endpoint: TunnelEndpoint,
    ) -> Result<(), VnetRouteOrchError> {
        let ctx = self.vnet_context(vnet)?;
        let effective_vni = if endpoint.vni == 0 { ctx.vni } else { endpoint.vni };

        let key = VnetRouteKey::new(vnet, prefix);
        match self.routes.get(&key).cloned() {
            Some(RouteNextHop::Tunnel(old_endpoint)) if old_endpoint == endpoint.ip => {
                // Same resolution; nothing to reprogram.
                Ok(())
            }
            Some(old_target) => {
                // Replace: resolve the new next hop first, repoint the
                // entry in one transaction, only then release the old
                // reference. The entry never dangles.
                let nh_id =
                    self.acquire_tunnel_next_hop(vnet, &endpoint, effective_vni, &ctx.tunnel)?;
                let entry = RouteEntry::new(ctx.vr_id, prefix);
                if let Err(err) = self.sai.set_route_next_hop(&entry, nh_id) {
                    self.release_tunnel_next_hop(vnet, endpoint.ip);
                    return Err(err.into());
                }
                self.release_route_target(vnet, &old_target);
                self.routes.insert(key, RouteNextHop::Tunnel(endpoint.ip));
                self.stats.routes_replaced += 1;

                audit_log!(
                    AuditRecord::new(AuditCategory::ResourceModify, "VnetRouteOrch", "replace_route")
                        .with_outcome(AuditOutcome::Success)
                        .with_object_id(format!("{}:{}", vnet, prefix))
                        .with_object_type("vnet_route")
                        .with_details(serde_json::json!({
                            "endpoint": endpoint.ip.to_string(),
                            "vni": effective_vni,
                        }))
                );
                Ok(())
            }
            None => {
                let nh_id =
                    self.acquire_tunnel_next_hop(vnet, &endpoint, effective_vni, &ctx.tunnel)?;
                let entry = RouteEntry::new(ctx.vr_id, prefix);
                if let Err(err) = self.sai.create_route_entry(&entry, nh_id) {
                    self.release_tunnel_next_hop(vnet, endpoint.ip);
                    return Err(err.into());
                }
                self.routes.insert(key, RouteNextHop::Tunnel(endpoint.ip));
                self.pin_vnet(vnet);
                self.stats.routes_added += 1;

                audit_log!(
                    AuditRecord::new(AuditCategory::ResourceCreate, "VnetRouteOrch", "add_route")
                        .with_outcome(AuditOutcome::Success)
                        .with_object_id(format!("{}:{}", vnet, prefix))
                        .with_object_type("vnet_route")
                        .with_details(serde_json::json!({
                            "endpoint": endpoint.ip.to_string(),
                            "vni": effective_vni,
                        }))
                );
                Ok(())
            }
        }
    }

    /// Programs or replaces a local route.
    fn add_local_route(
        &mut self,
        vnet: &str,
        prefix: IpPrefix,
        ifname: &str,
    ) -> Result<(), VnetRouteOrchError> {
        let ctx = self.vnet_context(vnet)?;

        let nh_id = self
            .intfs_orch
            .read()
            .map_err(|_| VnetRouteOrchError::Internal("interface registry lock poisoned".into()))?
            .get_intf_next_hop(ifname)
            .ok_or_else(|| VnetRouteOrchError::IntfNotReady(ifname.to_string()))?;

        let key = VnetRouteKey::new(vnet, prefix);
        match self.routes.get(&key).cloned() {
            Some(RouteNextHop::Local { ifname: old_if, .. }) if old_if == ifname => Ok(()),
            Some(old_target) => {
                let entry = RouteEntry::new(ctx.vr_id, prefix);
                self.sai.set_route_next_hop(&entry, nh_id)?;
                self.pin_intf(ifname);
                self.release_route_target(vnet, &old_target);
                self.routes.insert(
                    key,
                    RouteNextHop::Local {
                        ifname: ifname.to_string(),
                        nh_id,
                    },
                );
                self.stats.routes_replaced += 1;
                Ok(())
            }
            None => {
                let entry = RouteEntry::new(ctx.vr_id, prefix);
                self.sai.create_route_entry(&entry, nh_id)?;
                self.pin_intf(ifname);
                self.pin_vnet(vnet);
                self.routes.insert(
                    key,
                    RouteNextHop::Local {
                        ifname: ifname.to_string(),
                        nh_id,
                    },
                );
                self.stats.routes_added += 1;

                audit_log!(
                    AuditRecord::new(AuditCategory::ResourceCreate, "VnetRouteOrch", "add_route")
                        .with_outcome(AuditOutcome::Success)
                        .with_object_id(format!("{}:{}", vnet, prefix))
                        .with_object_type("vnet_route")
                        .with_details(serde_json::json!({ "ifname": ifname }))
                );
                Ok(())
            }
        }
    }

    /// Withdraws a route. Unknown keys are idempotent success.
    fn del_route(&mut self, vnet: &str, prefix: IpPrefix) -> Result<(), VnetRouteOrchError> {
        let key = VnetRouteKey::new(vnet, prefix);
        let target = match self.routes.get(&key).cloned() {
            Some(target) => target,
            None => {
                info_log!("VnetRouteOrch", route = %key, "remove of unknown route ignored");
                return Ok(());
            }
        };

        // The registry rejects VNET removal while routes exist, so the
        // virtual router must still be there.
        let vr_id = self
            .vnet_read()?
            .get_vr_id(vnet)
            .map_err(|err| VnetRouteOrchError::Internal(err.to_string()))?;

        self.sai.remove_route_entry(&RouteEntry::new(vr_id, prefix))?;
        self.routes.remove(&key);
        self.release_route_target(vnet, &target);
        if let Err(err) = self.vnet_write().and_then(|mut registry| {
            registry
                .decrease_ref(vnet)
                .map_err(|e| VnetRouteOrchError::Internal(e.to_string()))
        }) {
            error_log!("VnetRouteOrch", vnet = %vnet, %err, "VNET reference release failed");
        }
        self.stats.routes_removed += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceDelete, "VnetRouteOrch", "remove_route")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(key.to_string())
                .with_object_type("vnet_route")
        );
        Ok(())
    }

    fn pin_vnet(&mut self, vnet: &str) {
        let result = self
            .vnet_write()
            .and_then(|mut registry| {
                registry
                    .increase_ref(vnet)
                    .map_err(|e| VnetRouteOrchError::Internal(e.to_string()))
            });
        if let Err(err) = result {
            error_log!("VnetRouteOrch", vnet = %vnet, %err, "VNET reference pin failed");
        }
    }

    fn pin_intf(&mut self, ifname: &str) {
        let result = self
            .intfs_orch
            .write()
            .map_err(|_| VnetRouteOrchError::Internal("interface registry lock poisoned".into()))
            .and_then(|mut intfs| {
                intfs
                    .increase_ref(ifname)
                    .map_err(|e| VnetRouteOrchError::Internal(e.to_string()))
            });
        if let Err(err) = result {
            error_log!("VnetRouteOrch", intf = %ifname, %err, "interface reference pin failed");
        }
    }

    /// Tunnel-route table handler.
    fn handle_tunnel_route(&mut self, request: &Request) -> Result<(), VnetRouteOrchError> {
        let (vnet, prefix) = route_key(request)?;
        if request.operation().is_del() {
            return self.del_route(&vnet, prefix);
        }

        let ip = request
            .attr_ip("endpoint")
            .ok_or(VnetRouteOrchError::MissingAttribute("endpoint"))?;
        let vni = request.attr_uint("vni").unwrap_or(0);
        if vni > u64::from(VNET_VNI_MAX) {
            return Err(VnetRouteOrchError::InvalidVni(vni));
        }

        self.add_tunnel_route(
            &vnet,
            prefix,
            TunnelEndpoint {
                ip,
                mac: request.attr_mac("mac_address"),
                vni: vni as Vni,
            },
        )
    }

    /// Local-route table handler.
    fn handle_local_route(&mut self, request: &Request) -> Result<(), VnetRouteOrchError> {
        let (vnet, prefix) = route_key(request)?;
        if request.operation().is_del() {
            return self.del_route(&vnet, prefix);
        }

        let ifname = request
            .attr_string("ifname")
            .ok_or(VnetRouteOrchError::MissingAttribute("ifname"))?
            .to_string();
        self.add_local_route(&vnet, prefix, &ifname)
    }

    /// Drains and applies all pending events from both route tables.
    pub fn process_pending(&mut self) {
        for idx in 0..self.consumers.len() {
            let drained = self.consumers[idx].drain();
            for event in drained {
                self.process_event(idx, event);
            }
        }
    }

    fn process_event(&mut self, idx: usize, event: KeyOpFieldsValues) {
        let table = self.consumers[idx].table_name().to_string();

        let request = match Request::parse(&VNET_ROUTE_REQUEST, &event) {
            Ok(request) => request,
            Err(err) => {
                self.stats.errors += 1;
                error_log!("VnetRouteOrch", table = %table, key = %event.key, %err, "schema violation, event dropped");
                return;
            }
        };

        let result = match table.as_str() {
            VNET_ROUTE_TUNNEL_TABLE => self.handle_tunnel_route(&request),
            VNET_ROUTE_TABLE => self.handle_local_route(&request),
            _ => Err(VnetRouteOrchError::Internal(format!(
                "no handler for table {}",
                table
            ))),
        };

        let defer_key = format!("{}|{}", table, event.key);
        match result {
            Ok(()) => {
                self.defer_counts.remove(&defer_key);
            }
            Err(err) if err.is_deferrable() => self.defer_event(idx, event, defer_key, &err),
            Err(err) => {
                let task_err = err.to_task_error();
                self.defer_counts.remove(&defer_key);
                self.stats.errors += 1;
                error_log!(
                    "VnetRouteOrch",
                    table = %table,
                    key = %event.key,
                    status = ?task_err.to_status(),
                    %task_err,
                    "event failed"
                );
            }
        }
    }

    fn defer_event(
        &mut self,
        idx: usize,
        event: KeyOpFieldsValues,
        defer_key: String,
        reason: &VnetRouteOrchError,
    ) {
        let passes = self.defer_counts.entry(defer_key.clone()).or_insert(0);
        *passes += 1;
        if *passes > self.config.max_defer_passes {
            self.defer_counts.remove(&defer_key);
            self.stats.dropped += 1;
            error_log!(
                "VnetRouteOrch",
                key = %event.key,
                %reason,
                "dependency still unresolved after retry limit, event dropped"
            );
            audit_log!(
                AuditRecord::new(AuditCategory::ErrorCondition, "VnetRouteOrch", "defer_expired")
                    .with_outcome(AuditOutcome::Failure)
                    .with_object_id(&event.key)
                    .with_object_type("vnet_route")
                    .with_error(reason.to_string())
            );
            return;
        }

        self.stats.deferred += 1;
        warn_log!("VnetRouteOrch", key = %event.key, %reason, "dependency not ready, event deferred");
        self.consumers[idx].retry(event);
    }
}

/// VNET context one route programming step needs.
struct VnetContext {
    vr_id: vnetd_sai::VirtualRouterOid,
    vni: Vni,
    tunnel: String,
}

fn registry_lookup<T>(
    result: Result<T, crate::vnet::VnetOrchError>,
) -> Result<T, VnetRouteOrchError> {
    // The VNET was just checked to exist; a failing lookup is a bug.
    result.map_err(|err| VnetRouteOrchError::Internal(err.to_string()))
}

fn route_key(request: &Request) -> Result<(String, IpPrefix), VnetRouteOrchError> {
    let vnet = request
        .key_string(0)
        .ok_or_else(|| VnetRouteOrchError::Internal("route key lacks VNET name".into()))?
        .to_string();
    let prefix = request
        .key_prefix(1)
        .ok_or_else(|| VnetRouteOrchError::Internal("route key lacks prefix".into()))?;
    Ok((vnet, prefix))
}

#[async_trait]
impl Orch for VnetRouteOrch {
    fn name(&self) -> &str {
        "VnetRouteOrch"
    }

    async fn do_task(&mut self) {
        self.process_pending();
    }

    fn priority(&self) -> i32 {
        35
    }

    fn has_pending_tasks(&self) -> bool {
        self.consumers.iter().any(|c| c.has_pending())
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.consumers.iter().flat_map(|c| c.dump()).collect()
    }
}

/// Daemon-loop adapter for a shared route orchestrator.
pub struct VnetRouteOrchHandle(pub Arc<RwLock<VnetRouteOrch>>);

#[async_trait]
impl Orch for VnetRouteOrchHandle {
    fn name(&self) -> &str {
        "VnetRouteOrch"
    }

    async fn do_task(&mut self) {
        if let Ok(mut orch) = self.0.write() {
            orch.process_pending();
        }
    }

    fn priority(&self) -> i32 {
        35
    }

    fn has_pending_tasks(&self) -> bool {
        self.0
            .read()
            .map(|o| o.consumers.iter().any(|c| c.has_pending()))
            .unwrap_or(false)
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.0
            .read()
            .map(|o| o.consumers.iter().flat_map(|c| c.dump()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intfs::IntfsOrchConfig;
    use crate::vnet::orch::VnetOrchConfig;
    use vnetd_sai::mock::MockNextHop;
    use vnetd_sai::MockSwitchApi;

    struct Env {
        sai: Arc<MockSwitchApi>,
        vnet_orch: Arc<RwLock<VnetOrch>>,
        intfs_orch: Arc<RwLock<IntfsOrch>>,
        routes: VnetRouteOrch,
    }

    fn setup() -> Env {
        let sai = Arc::new(MockSwitchApi::new());
        let tunnel_orch = Arc::new(RwLock::new(VxlanTunnelOrch::new(sai.clone())));
        let vnet_orch = Arc::new(RwLock::new(VnetOrch::new(
            VnetOrchConfig::default(),
            sai.clone(),
            tunnel_orch.clone(),
        )));
        let intfs_orch = Arc::new(RwLock::new(IntfsOrch::new(
            IntfsOrchConfig::default(),
            sai.clone(),
        )));
        let routes = VnetRouteOrch::new(
            VnetRouteOrchConfig::default(),
            sai.clone(),
            vnet_orch.clone(),
            tunnel_orch.clone(),
            intfs_orch.clone(),
        );

        tunnel_orch
            .write()
            .unwrap()
            .add_tunnel("tunnel_v4", "10.1.0.32".parse().unwrap())
            .unwrap();

        Env {
            sai,
            vnet_orch,
            intfs_orch,
            routes,
        }
    }

    fn add_vnet(env: &Env, name: &str, vni: &str) {
        let mut registry = env.vnet_orch.write().unwrap();
        registry.enqueue([KeyOpFieldsValues::set(
            name,
            vec![
                ("vxlan_tunnel".to_string(), "tunnel_v4".to_string()),
                ("vni".to_string(), vni.to_string()),
            ],
        )]);
        registry.process_pending();
        assert!(registry.vnet_exists(name));
    }

    fn tunnel_route_set(key: &str, endpoint: &str) -> KeyOpFieldsValues {
        KeyOpFieldsValues::set(key, vec![("endpoint".to_string(), endpoint.to_string())])
    }

    fn route_key_of(key: &str) -> VnetRouteKey {
        let (vnet, prefix) = key.split_once(':').unwrap();
        VnetRouteKey::new(vnet, prefix.parse().unwrap())
    }

    // ========== Shared next hops ==========

    #[test]
    fn test_routes_share_next_hop_per_endpoint() {
        let mut env = setup();
        add_vnet(&env, "Vnet_2000", "2000");

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [
                tunnel_route_set("Vnet_2000:10.0.0.0/24", "1.1.1.1"),
                tunnel_route_set("Vnet_2000:10.0.1.0/24", "1.1.1.1"),
            ],
        );
        env.routes.process_pending();

        assert_eq!(env.routes.route_count(), 2);
        assert_eq!(env.routes.next_hop_count_for_vnet("Vnet_2000"), 1);
        assert_eq!(env.sai.next_hop_count(), 1);
        assert_eq!(env.sai.route_count(), 2);

        // Both entries point at the same hardware next hop.
        let vr = env.vnet_orch.read().unwrap().get_vr_id("Vnet_2000").unwrap();
        let nh_a = env.sai.route_next_hop(vr, "10.0.0.0/24".parse().unwrap());
        let nh_b = env.sai.route_next_hop(vr, "10.0.1.0/24".parse().unwrap());
        assert_eq!(nh_a, nh_b);

        // Delete one: the shared next hop stays for the survivor.
        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [KeyOpFieldsValues::del("Vnet_2000:10.0.0.0/24")],
        );
        env.routes.process_pending();
        assert_eq!(env.routes.route_count(), 1);
        assert_eq!(env.sai.next_hop_count(), 1);

        // Delete the last: the next hop is destroyed.
        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [KeyOpFieldsValues::del("Vnet_2000:10.0.1.0/24")],
        );
        env.routes.process_pending();
        assert_eq!(env.routes.route_count(), 0);
        assert_eq!(env.sai.next_hop_count(), 0);
        assert_eq!(env.sai.route_count(), 0);
        assert_eq!(env.routes.stats().next_hops_removed, 1);
    }

    #[test]
    fn test_same_endpoint_in_different_vnets_not_shared() {
        let mut env = setup();
        add_vnet(&env, "Vnet_a", "1000");
        add_vnet(&env, "Vnet_b", "2000");

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [
                tunnel_route_set("Vnet_a:10.0.0.0/24", "1.1.1.1"),
                tunnel_route_set("Vnet_b:10.0.0.0/24", "1.1.1.1"),
            ],
        );
        env.routes.process_pending();

        assert_eq!(env.sai.next_hop_count(), 2);
    }

    // ========== Deferral ==========

    #[test]
    fn test_route_before_vnet_is_deferred_then_applied_once() {
        let mut env = setup();

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [tunnel_route_set("Vnet_2000:10.0.0.0/24", "1.1.1.1")],
        );
        env.routes.process_pending();

        assert_eq!(env.routes.route_count(), 0);
        assert_eq!(env.routes.stats().deferred, 1);
        assert!(env.routes.has_pending_tasks());

        add_vnet(&env, "Vnet_2000", "2000");
        env.routes.process_pending();

        assert_eq!(env.routes.route_count(), 1);
        assert_eq!(env.sai.route_count(), 1);
        assert_eq!(env.routes.stats().routes_added, 1);

        // A further pass must not duplicate anything.
        env.routes.process_pending();
        assert_eq!(env.sai.route_count(), 1);
        assert_eq!(env.routes.stats().routes_added, 1);
    }

    #[test]
    fn test_defer_limit_drops_route_event() {
        let sai = Arc::new(MockSwitchApi::new());
        let tunnel_orch = Arc::new(RwLock::new(VxlanTunnelOrch::new(sai.clone())));
        let vnet_orch = Arc::new(RwLock::new(VnetOrch::new(
            VnetOrchConfig::default(),
            sai.clone(),
            tunnel_orch.clone(),
        )));
        let intfs_orch = Arc::new(RwLock::new(IntfsOrch::new(
            IntfsOrchConfig::default(),
            sai.clone(),
        )));
        let mut routes = VnetRouteOrch::new(
            VnetRouteOrchConfig {
                max_defer_passes: 1,
            },
            sai,
            vnet_orch,
            tunnel_orch,
            intfs_orch,
        );

        routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [tunnel_route_set("Vnet_none:10.0.0.0/24", "1.1.1.1")],
        );
        routes.process_pending(); // defer 1
        assert!(routes.has_pending_tasks());
        routes.process_pending(); // limit exceeded

        assert!(!routes.has_pending_tasks());
        assert_eq!(routes.stats().dropped, 1);
    }

    #[test]
    fn test_local_route_defers_until_interface_ready() {
        let mut env = setup();
        add_vnet(&env, "Vnet_2000", "2000");

        env.routes.enqueue(
            VNET_ROUTE_TABLE,
            [KeyOpFieldsValues::set(
                "Vnet_2000:10.0.2.0/24",
                vec![("ifname".to_string(), "Vlan100".to_string())],
            )],
        );
        env.routes.process_pending();
        assert_eq!(env.routes.route_count(), 0);
        assert_eq!(env.routes.stats().deferred, 1);

        env.intfs_orch
            .write()
            .unwrap()
            .add_interface("Vlan100", "10.0.2.1/24".parse().unwrap())
            .unwrap();
        env.routes.process_pending();

        assert_eq!(env.routes.route_count(), 1);
        assert_eq!(
            env.intfs_orch.read().unwrap().stats().interfaces_created,
            1
        );
        // The route pins the interface.
        let mut intfs = env.intfs_orch.write().unwrap();
        assert!(matches!(
            intfs.remove_interface("Vlan100"),
            Err(crate::intfs::IntfsOrchError::IntfInUse(_, 1))
        ));
    }

    // ========== Replace ==========

    #[test]
    fn test_replace_endpoint_swaps_next_hop() {
        let mut env = setup();
        add_vnet(&env, "Vnet_2000", "2000");

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [tunnel_route_set("Vnet_2000:10.0.0.0/24", "1.1.1.1")],
        );
        env.routes.process_pending();
        let vr = env.vnet_orch.read().unwrap().get_vr_id("Vnet_2000").unwrap();
        let old_nh = env
            .sai
            .route_next_hop(vr, "10.0.0.0/24".parse().unwrap())
            .unwrap();

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [tunnel_route_set("Vnet_2000:10.0.0.0/24", "2.2.2.2")],
        );
        env.routes.process_pending();

        let new_nh = env
            .sai
            .route_next_hop(vr, "10.0.0.0/24".parse().unwrap())
            .unwrap();
        assert_ne!(old_nh, new_nh);
        // The old endpoint's next hop is gone, exactly one remains.
        assert_eq!(env.sai.next_hop_count(), 1);
        assert_eq!(env.sai.route_count(), 1);
        assert_eq!(env.routes.stats().routes_replaced, 1);
        assert_eq!(env.routes.stats().routes_added, 1);

        // The VNET reference count is unchanged by a replace.
        assert_eq!(env.vnet_orch.read().unwrap().ref_count("Vnet_2000").unwrap(), 1);
    }

    #[test]
    fn test_re_add_same_endpoint_is_noop() {
        let mut env = setup();
        add_vnet(&env, "Vnet_2000", "2000");

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [tunnel_route_set("Vnet_2000:10.0.0.0/24", "1.1.1.1")],
        );
        env.routes.process_pending();
        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [tunnel_route_set("Vnet_2000:10.0.0.0/24", "1.1.1.1")],
        );
        env.routes.process_pending();

        assert_eq!(env.routes.stats().routes_added, 1);
        assert_eq!(env.routes.stats().routes_replaced, 0);
        assert_eq!(env.sai.next_hop_count(), 1);
    }

    #[test]
    fn test_replace_across_variants() {
        let mut env = setup();
        add_vnet(&env, "Vnet_2000", "2000");
        env.intfs_orch
            .write()
            .unwrap()
            .add_interface("Vlan100", "10.0.2.1/24".parse().unwrap())
            .unwrap();

        env.routes.enqueue(
            VNET_ROUTE_TABLE,
            [KeyOpFieldsValues::set(
                "Vnet_2000:10.0.0.0/24",
                vec![("ifname".to_string(), "Vlan100".to_string())],
            )],
        );
        env.routes.process_pending();
        assert!(matches!(
            env.routes.route_target(&route_key_of("Vnet_2000:10.0.0.0/24")),
            Some(RouteNextHop::Local { .. })
        ));

        // A tunnel SET on the same key replaces the local resolution.
        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [tunnel_route_set("Vnet_2000:10.0.0.0/24", "1.1.1.1")],
        );
        env.routes.process_pending();

        assert!(matches!(
            env.routes.route_target(&route_key_of("Vnet_2000:10.0.0.0/24")),
            Some(RouteNextHop::Tunnel(_))
        ));
        assert_eq!(env.sai.route_count(), 1);
        // The interface pin was released.
        assert!(env
            .intfs_orch
            .write()
            .unwrap()
            .remove_interface("Vlan100")
            .is_ok());
    }

    // ========== VNI and MAC resolution ==========

    #[test]
    fn test_next_hop_defaults_to_vnet_vni() {
        let mut env = setup();
        add_vnet(&env, "Vnet_2000", "2000");

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [tunnel_route_set("Vnet_2000:10.0.0.0/24", "1.1.1.1")],
        );
        env.routes.process_pending();

        let vr = env.vnet_orch.read().unwrap().get_vr_id("Vnet_2000").unwrap();
        let nh = env
            .sai
            .route_next_hop(vr, "10.0.0.0/24".parse().unwrap())
            .unwrap();
        match env.sai.next_hop(nh).unwrap() {
            MockNextHop::Tunnel { vni, mac, .. } => {
                assert_eq!(vni, 2000);
                assert!(mac.is_none());
            }
            other => panic!("expected tunnel next hop, got {:?}", other),
        }
    }

    #[test]
    fn test_next_hop_vni_and_mac_override() {
        let mut env = setup();
        add_vnet(&env, "Vnet_2000", "2000");

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [KeyOpFieldsValues::set(
                "Vnet_2000:10.0.0.0/24",
                vec![
                    ("endpoint".to_string(), "1.1.1.1".to_string()),
                    ("vni".to_string(), "5000".to_string()),
                    ("mac_address".to_string(), "00:11:22:33:44:55".to_string()),
                ],
            )],
        );
        env.routes.process_pending();

        let vr = env.vnet_orch.read().unwrap().get_vr_id("Vnet_2000").unwrap();
        let nh = env
            .sai
            .route_next_hop(vr, "10.0.0.0/24".parse().unwrap())
            .unwrap();
        match env.sai.next_hop(nh).unwrap() {
            MockNextHop::Tunnel { vni, mac, .. } => {
                assert_eq!(vni, 5000);
                assert_eq!(mac.unwrap().to_string(), "00:11:22:33:44:55");
            }
            other => panic!("expected tunnel next hop, got {:?}", other),
        }
    }

    // ========== Schema and edge cases ==========

    #[test]
    fn test_tunnel_route_without_endpoint_dropped() {
        let mut env = setup();
        add_vnet(&env, "Vnet_2000", "2000");

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [KeyOpFieldsValues::set("Vnet_2000:10.0.0.0/24", vec![])],
        );
        env.routes.process_pending();

        assert_eq!(env.routes.route_count(), 0);
        assert_eq!(env.routes.stats().errors, 1);
        assert!(!env.routes.has_pending_tasks());
    }

    #[test]
    fn test_route_delete_is_idempotent() {
        let mut env = setup();
        add_vnet(&env, "Vnet_2000", "2000");

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [KeyOpFieldsValues::del("Vnet_2000:10.0.0.0/24")],
        );
        env.routes.process_pending();

        assert_eq!(env.routes.stats().errors, 0);
        assert_eq!(env.routes.stats().routes_removed, 0);
    }

    #[test]
    fn test_route_pins_vnet_against_removal() {
        let mut env = setup();
        add_vnet(&env, "Vnet_2000", "2000");

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [tunnel_route_set("Vnet_2000:10.0.0.0/24", "1.1.1.1")],
        );
        env.routes.process_pending();

        {
            let mut registry = env.vnet_orch.write().unwrap();
            registry.enqueue([KeyOpFieldsValues::del("Vnet_2000")]);
            registry.process_pending();
            assert!(registry.vnet_exists("Vnet_2000"));
        }

        env.routes.enqueue(
            VNET_ROUTE_TUNNEL_TABLE,
            [KeyOpFieldsValues::del("Vnet_2000:10.0.0.0/24")],
        );
        env.routes.process_pending();

        let mut registry = env.vnet_orch.write().unwrap();
        registry.enqueue([KeyOpFieldsValues::del("Vnet_2000")]);
        registry.process_pending();
        assert!(!registry.vnet_exists("Vnet_2000"));
        assert_eq!(env.sai.virtual_router_count(), 0);
    }
}
