//! Local interface orchestration logic.

use super::types::{IntfsEntry, INTF_REQUEST, INTF_TABLE};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::{audit_log, error_log, info_log};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use vnetd_orch_common::{Consumer, ConsumerConfig, KeyOpFieldsValues, Orch, Request};
use vnetd_sai::{NextHopOid, SaiError, SwitchApi, VirtualRouterOid};
use vnetd_types::IpPrefix;

#[derive(Debug, Clone, thiserror::Error)]
pub enum IntfsOrchError {
    #[error("interface not found: {0}")]
    IntfNotFound(String),
    #[error("interface in use: {0} ({1} references)")]
    IntfInUse(String, u32),
    #[error("reference count underflow on {0}")]
    RefCountUnderflow(String),
    #[error(transparent)]
    Sai(#[from] SaiError),
}

/// Configuration for IntfsOrch.
#[derive(Debug, Clone, Default)]
pub struct IntfsOrchConfig {
    /// Virtual router the physical interfaces belong to.
    pub global_vr_id: VirtualRouterOid,
}

#[derive(Debug, Clone, Default)]
pub struct IntfsOrchStats {
    pub interfaces_created: u64,
    pub interfaces_removed: u64,
    pub errors: u64,
}

/// Registry of provisioned local interfaces and their next-hop handles.
pub struct IntfsOrch {
    config: IntfsOrchConfig,
    sai: Arc<dyn SwitchApi>,
    consumer: Consumer,
    interfaces: HashMap<String, IntfsEntry>,
    stats: IntfsOrchStats,
}

impl IntfsOrch {
    pub fn new(config: IntfsOrchConfig, sai: Arc<dyn SwitchApi>) -> Self {
        Self {
            config,
            sai,
            consumer: Consumer::new(ConsumerConfig::new(INTF_TABLE)),
            interfaces: HashMap::new(),
            stats: IntfsOrchStats::default(),
        }
    }

    /// Returns true if the named interface is provisioned.
    pub fn intf_exists(&self, name: &str) -> bool {
        self.interfaces.contains_key(name)
    }

    /// Returns the next-hop handle of a provisioned interface.
    ///
    /// `None` means the interface is not ready yet; callers defer.
    pub fn get_intf_next_hop(&self, name: &str) -> Option<NextHopOid> {
        self.interfaces.get(name).map(|e| e.nh_id)
    }

    /// Number of provisioned interfaces.
    pub fn intf_count(&self) -> usize {
        self.interfaces.len()
    }

    pub fn stats(&self) -> &IntfsOrchStats {
        &self.stats
    }

    /// Increments the route reference count of an interface.
    pub fn increase_ref(&mut self, name: &str) -> Result<u32, IntfsOrchError> {
        self.interfaces
            .get_mut(name)
            .map(|e| e.add_ref())
            .ok_or_else(|| IntfsOrchError::IntfNotFound(name.to_string()))
    }

    /// Decrements the route reference count of an interface.
    pub fn decrease_ref(&mut self, name: &str) -> Result<u32, IntfsOrchError> {
        let entry = self
            .interfaces
            .get_mut(name)
            .ok_or_else(|| IntfsOrchError::IntfNotFound(name.to_string()))?;
        entry
            .remove_ref()
            .ok_or_else(|| IntfsOrchError::RefCountUnderflow(name.to_string()))
    }

    /// Enqueues change events for the next processing pass.
    pub fn enqueue(&mut self, events: impl IntoIterator<Item = KeyOpFieldsValues>) {
        self.consumer.add_to_sync(events);
    }

    /// Provisions an interface: router interface plus its next hop.
    ///
    /// Re-provisioning an existing name refreshes nothing and succeeds.
    pub fn add_interface(&mut self, name: &str, ip_prefix: IpPrefix) -> Result<(), IntfsOrchError> {
        if self.interfaces.contains_key(name) {
            return Ok(());
        }

        let rif_id = self.sai.create_router_interface(self.config.global_vr_id)?;
        let nh_id = match self.sai.create_local_next_hop(rif_id, *ip_prefix.address()) {
            Ok(nh_id) => nh_id,
            Err(err) => {
                // Atomic: do not keep a half-provisioned interface.
                if let Err(cleanup) = self.sai.remove_router_interface(rif_id) {
                    error_log!("IntfsOrch", intf = name, %cleanup, "rollback of router interface failed");
                }
                return Err(err.into());
            }
        };

        self.interfaces.insert(
            name.to_string(),
            IntfsEntry {
                ip_prefix,
                rif_id,
                nh_id,
                ref_count: 0,
            },
        );
        self.stats.interfaces_created += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceCreate, "IntfsOrch", "add_interface")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(name)
                .with_object_type("router_interface")
                .with_details(serde_json::json!({
                    "ip_prefix": ip_prefix.to_string(),
                    "rif_id": rif_id.to_string(),
                    "nh_id": nh_id.to_string(),
                }))
        );

        Ok(())
    }

    /// Removes an interface. Unknown names are a no-op; referenced
    /// interfaces are rejected as in-use.
    pub fn remove_interface(&mut self, name: &str) -> Result<(), IntfsOrchError> {
        let entry = match self.interfaces.get(name) {
            Some(entry) => entry.clone(),
            None => {
                info_log!("IntfsOrch", intf = name, "remove of unknown interface ignored");
                return Ok(());
            }
        };

        if entry.is_in_use() {
            let err = IntfsOrchError::IntfInUse(name.to_string(), entry.ref_count);
            audit_log!(
                AuditRecord::new(AuditCategory::ResourceDelete, "IntfsOrch", "remove_interface")
                    .with_outcome(AuditOutcome::Failure)
                    .with_object_id(name)
                    .with_object_type("router_interface")
                    .with_error(err.to_string())
            );
            return Err(err);
        }

        self.sai.remove_next_hop(entry.nh_id)?;
        self.sai.remove_router_interface(entry.rif_id)?;
        self.interfaces.remove(name);
        self.stats.interfaces_removed += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceDelete, "IntfsOrch", "remove_interface")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(name)
                .with_object_type("router_interface")
        );

        Ok(())
    }

    /// Drains and applies all pending events.
    pub fn process_pending(&mut self) {
        for event in self.consumer.drain() {
            let request = match Request::parse(&INTF_REQUEST, &event) {
                Ok(request) => request,
                Err(err) => {
                    self.stats.errors += 1;
                    error_log!("IntfsOrch", key = %event.key, %err, "schema violation, event dropped");
                    continue;
                }
            };

            let name = request.key_string(0).unwrap_or_default().to_string();
            let result = if request.operation().is_set() {
                match request.attr_prefix("ip_prefix") {
                    Some(prefix) => self.add_interface(&name, prefix),
                    None => continue,
                }
            } else {
                self.remove_interface(&name)
            };

            if let Err(err) = result {
                self.stats.errors += 1;
                error_log!("IntfsOrch", intf = %name, %err, "event failed");
            }
        }
    }
}

#[async_trait]
impl Orch for IntfsOrch {
    fn name(&self) -> &str {
        "IntfsOrch"
    }

    async fn do_task(&mut self) {
        self.process_pending();
    }

    fn priority(&self) -> i32 {
        5
    }

    fn has_pending_tasks(&self) -> bool {
        self.consumer.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.consumer.dump()
    }
}

/// Daemon-loop adapter for a shared interface registry.
pub struct IntfsOrchHandle(pub Arc<RwLock<IntfsOrch>>);

#[async_trait]
impl Orch for IntfsOrchHandle {
    fn name(&self) -> &str {
        "IntfsOrch"
    }

    async fn do_task(&mut self) {
        if let Ok(mut orch) = self.0.write() {
            orch.process_pending();
        }
    }

    fn priority(&self) -> i32 {
        5
    }

    fn has_pending_tasks(&self) -> bool {
        self.0.read().map(|o| o.consumer.has_pending()).unwrap_or(false)
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.0.read().map(|o| o.consumer.dump()).unwrap_or_default()
    }
}
