//! VXLAN tunnel orchestration logic.

use super::types::{VxlanTunnelEntry, VXLAN_TUNNEL_REQUEST, VXLAN_TUNNEL_TABLE};
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::{audit_log, error_log, info_log};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use vnetd_orch_common::{Consumer, ConsumerConfig, KeyOpFieldsValues, Orch, Request};
use vnetd_sai::{SaiError, SwitchApi, TunnelAttrs, TunnelOid};
use vnetd_types::IpAddress;

#[derive(Debug, Clone, thiserror::Error)]
pub enum VxlanTunnelOrchError {
    #[error("tunnel not found: {0}")]
    TunnelNotFound(String),
    #[error("tunnel source address of {0} cannot change")]
    ImmutableSrcIp(String),
    #[error(transparent)]
    Sai(#[from] SaiError),
}

#[derive(Debug, Clone, Default)]
pub struct VxlanTunnelOrchStats {
    pub tunnels_created: u64,
    pub tunnels_removed: u64,
    pub errors: u64,
}

/// Registry of provisioned VXLAN tunnels.
pub struct VxlanTunnelOrch {
    sai: Arc<dyn SwitchApi>,
    consumer: Consumer,
    tunnels: HashMap<String, VxlanTunnelEntry>,
    stats: VxlanTunnelOrchStats,
}

impl VxlanTunnelOrch {
    pub fn new(sai: Arc<dyn SwitchApi>) -> Self {
        Self {
            sai,
            consumer: Consumer::new(ConsumerConfig::new(VXLAN_TUNNEL_TABLE)),
            tunnels: HashMap::new(),
            stats: VxlanTunnelOrchStats::default(),
        }
    }

    /// Returns true if a tunnel with this name is provisioned.
    pub fn tunnel_exists(&self, name: &str) -> bool {
        self.tunnels.contains_key(name)
    }

    /// Returns the hardware handle of a provisioned tunnel.
    pub fn get_tunnel_id(&self, name: &str) -> Result<TunnelOid, VxlanTunnelOrchError> {
        self.tunnels
            .get(name)
            .map(|e| e.tunnel_id)
            .ok_or_else(|| VxlanTunnelOrchError::TunnelNotFound(name.to_string()))
    }

    /// Number of provisioned tunnels.
    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    pub fn stats(&self) -> &VxlanTunnelOrchStats {
        &self.stats
    }

    /// Enqueues change events for the next processing pass.
    pub fn enqueue(&mut self, events: impl IntoIterator<Item = KeyOpFieldsValues>) {
        self.consumer.add_to_sync(events);
    }

    /// Provisions a tunnel, creating the hardware context.
    ///
    /// Re-provisioning an existing name with the same source address is a
    /// no-op; a different source address is rejected.
    pub fn add_tunnel(
        &mut self,
        name: &str,
        src_ip: IpAddress,
    ) -> Result<(), VxlanTunnelOrchError> {
        if let Some(existing) = self.tunnels.get(name) {
            if existing.src_ip == src_ip {
                return Ok(());
            }
            return Err(VxlanTunnelOrchError::ImmutableSrcIp(name.to_string()));
        }

        let tunnel_id = self.sai.create_tunnel(&TunnelAttrs { src_ip })?;
        self.tunnels.insert(
            name.to_string(),
            VxlanTunnelEntry {
                name: name.to_string(),
                src_ip,
                tunnel_id,
            },
        );
        self.stats.tunnels_created += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceCreate, "VxlanTunnelOrch", "add_tunnel")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(name)
                .with_object_type("vxlan_tunnel")
                .with_details(serde_json::json!({
                    "src_ip": src_ip.to_string(),
                    "tunnel_id": tunnel_id.to_string(),
                }))
        );

        Ok(())
    }

    /// Removes a provisioned tunnel. Unknown names are a no-op.
    pub fn remove_tunnel(&mut self, name: &str) -> Result<(), VxlanTunnelOrchError> {
        let entry = match self.tunnels.get(name) {
            Some(entry) => entry.clone(),
            None => {
                info_log!("VxlanTunnelOrch", tunnel = name, "remove of unknown tunnel ignored");
                return Ok(());
            }
        };

        self.sai.remove_tunnel(entry.tunnel_id)?;
        self.tunnels.remove(name);
        self.stats.tunnels_removed += 1;

        audit_log!(
            AuditRecord::new(AuditCategory::ResourceDelete, "VxlanTunnelOrch", "remove_tunnel")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(name)
                .with_object_type("vxlan_tunnel")
        );

        Ok(())
    }

    /// Drains and applies all pending events.
    pub fn process_pending(&mut self) {
        for event in self.consumer.drain() {
            let request = match Request::parse(&VXLAN_TUNNEL_REQUEST, &event) {
                Ok(request) => request,
                Err(err) => {
                    self.stats.errors += 1;
                    error_log!("VxlanTunnelOrch", key = %event.key, %err, "schema violation, event dropped");
                    continue;
                }
            };

            let name = request.key_string(0).unwrap_or_default().to_string();
            let result = if request.operation().is_set() {
                match request.attr_ip("src_ip") {
                    Some(src_ip) => self.add_tunnel(&name, src_ip),
                    None => continue,
                }
            } else {
                self.remove_tunnel(&name)
            };

            if let Err(err) = result {
                self.stats.errors += 1;
                error_log!("VxlanTunnelOrch", tunnel = %name, %err, "event failed");
            }
        }
    }
}

#[async_trait]
impl Orch for VxlanTunnelOrch {
    fn name(&self) -> &str {
        "VxlanTunnelOrch"
    }

    async fn do_task(&mut self) {
        self.process_pending();
    }

    fn priority(&self) -> i32 {
        25
    }

    fn has_pending_tasks(&self) -> bool {
        self.consumer.has_pending()
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.consumer.dump()
    }
}

/// Daemon-loop adapter for a shared tunnel registry.
pub struct VxlanTunnelOrchHandle(pub Arc<RwLock<VxlanTunnelOrch>>);

#[async_trait]
impl Orch for VxlanTunnelOrchHandle {
    fn name(&self) -> &str {
        "VxlanTunnelOrch"
    }

    async fn do_task(&mut self) {
        if let Ok(mut orch) = self.0.write() {
            orch.process_pending();
        }
    }

    fn priority(&self) -> i32 {
        25
    }

    fn has_pending_tasks(&self) -> bool {
        self.0.read().map(|o| o.consumer.has_pending()).unwrap_or(false)
    }

    fn dump_pending_tasks(&self) -> Vec<String> {
        self.0.read().map(|o| o.consumer.dump()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vnetd_sai::MockSwitchApi;

    fn orch_with_mock() -> (VxlanTunnelOrch, Arc<MockSwitchApi>) {
        let sai = Arc::new(MockSwitchApi::new());
        (VxlanTunnelOrch::new(sai.clone()), sai)
    }

    #[test]
    fn test_add_and_lookup_tunnel() {
        let (mut orch, sai) = orch_with_mock();
        orch.add_tunnel("tunnel_v4", "10.1.0.32".parse().unwrap()).unwrap();

        assert!(orch.tunnel_exists("tunnel_v4"));
        assert!(orch.get_tunnel_id("tunnel_v4").unwrap().is_valid());
        assert_eq!(sai.tunnel_count(), 1);
        assert_eq!(orch.stats().tunnels_created, 1);
    }

    #[test]
    fn test_re_add_same_src_is_noop() {
        let (mut orch, sai) = orch_with_mock();
        orch.add_tunnel("tunnel_v4", "10.1.0.32".parse().unwrap()).unwrap();
        orch.add_tunnel("tunnel_v4", "10.1.0.32".parse().unwrap()).unwrap();

        assert_eq!(sai.tunnel_count(), 1);
        assert_eq!(orch.stats().tunnels_created, 1);
    }

    #[test]
    fn test_src_ip_is_immutable() {
        let (mut orch, _sai) = orch_with_mock();
        orch.add_tunnel("tunnel_v4", "10.1.0.32".parse().unwrap()).unwrap();

        let err = orch
            .add_tunnel("tunnel_v4", "10.1.0.33".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, VxlanTunnelOrchError::ImmutableSrcIp(_)));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let (mut orch, _sai) = orch_with_mock();
        assert!(orch.remove_tunnel("missing").is_ok());
    }

    #[test]
    fn test_lookup_unknown_fails() {
        let (orch, _sai) = orch_with_mock();
        assert!(matches!(
            orch.get_tunnel_id("missing"),
            Err(VxlanTunnelOrchError::TunnelNotFound(_))
        ));
    }

    #[test]
    fn test_event_driven_provisioning() {
        let (mut orch, sai) = orch_with_mock();
        orch.enqueue([
            KeyOpFieldsValues::set(
                "tunnel_v4",
                vec![("src_ip".to_string(), "10.1.0.32".to_string())],
            ),
            // Missing mandatory src_ip: dropped, no mutation.
            KeyOpFieldsValues::set("tunnel_bad", vec![]),
        ]);
        orch.process_pending();

        assert!(orch.tunnel_exists("tunnel_v4"));
        assert!(!orch.tunnel_exists("tunnel_bad"));
        assert_eq!(sai.tunnel_count(), 1);
        assert_eq!(orch.stats().errors, 1);
    }
}
