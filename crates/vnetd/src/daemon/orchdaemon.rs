//! OrchDaemon implementation.
//!
//! The daemon is the single logical processing thread of the control
//! plane: it drains every registered orch in priority order, sleeps for a
//! heartbeat, and repeats. Deferred events stay pending inside their
//! orch's consumers and are retried on the next pass, so one unresolved
//! dependency never stalls unrelated work.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::{audit_log, debug_log, info_log};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vnetd_orch_common::Orch;

/// Configuration for the OrchDaemon.
#[derive(Debug, Clone)]
pub struct OrchDaemonConfig {
    /// Pause between processing passes, in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Batch size hint for consumers.
    pub batch_size: usize,
}

impl Default for OrchDaemonConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1000,
            batch_size: 128,
        }
    }
}

/// The orchestration daemon: priority-ordered orchs and the event loop.
pub struct OrchDaemon {
    config: OrchDaemonConfig,
    orchs: BTreeMap<i32, Vec<Box<dyn Orch>>>,
    shutdown: Arc<AtomicBool>,
}

impl OrchDaemon {
    /// Creates a daemon with the given configuration.
    pub fn new(config: OrchDaemonConfig) -> Self {
        Self {
            config,
            orchs: BTreeMap::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Registers an orch; lower priority values process earlier.
    pub fn register_orch(&mut self, orch: Box<dyn Orch>) {
        let priority = orch.priority();
        info_log!("OrchDaemon", orch = orch.name(), priority, "registering orch");

        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, "OrchDaemon", "register_orch")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(orch.name())
                .with_object_type("orch_module")
                .with_details(serde_json::json!({ "priority": priority }))
        );

        self.orchs.entry(priority).or_default().push(orch);
    }

    /// Returns a handle that stops the event loop when set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Number of registered orchs.
    pub fn orch_count(&self) -> usize {
        self.orchs.values().map(|v| v.len()).sum()
    }

    /// Runs one processing pass over all orchs in priority order.
    pub async fn run_pass(&mut self) {
        for orchs in self.orchs.values_mut() {
            for orch in orchs.iter_mut() {
                if orch.has_pending_tasks() {
                    debug_log!("OrchDaemon", orch = orch.name(), "processing pending tasks");
                    orch.do_task().await;
                }
            }
        }
    }

    /// Runs the event loop until the shutdown handle fires.
    pub async fn run(&mut self) {
        info_log!("OrchDaemon", orch_count = self.orch_count(), "event loop started");
        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, "OrchDaemon", "event_loop_started")
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({
                    "heartbeat_interval_ms": self.config.heartbeat_interval_ms,
                    "orch_count": self.orch_count(),
                }))
        );

        while !self.shutdown.load(Ordering::Relaxed) {
            self.run_pass().await;
            tokio::time::sleep(tokio::time::Duration::from_millis(
                self.config.heartbeat_interval_ms,
            ))
            .await;
        }

        info_log!("OrchDaemon", "event loop stopped");
        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, "OrchDaemon", "event_loop_stopped")
                .with_outcome(AuditOutcome::Success)
        );
    }

    /// Dumps daemon state for debugging.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "OrchDaemon: {} orchs, shutdown={}",
            self.orch_count(),
            self.shutdown.load(Ordering::Relaxed)
        )];
        for (priority, orchs) in &self.orchs {
            for orch in orchs {
                lines.push(format!(
                    "  [{:3}] {} - {} pending",
                    priority,
                    orch.name(),
                    orch.dump_pending_tasks().len()
                ));
            }
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct TestOrch {
        name: String,
        priority: i32,
        runs: Arc<AtomicU32>,
        pending: bool,
    }

    #[async_trait]
    impl Orch for TestOrch {
        fn name(&self) -> &str {
            &self.name
        }

        async fn do_task(&mut self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn has_pending_tasks(&self) -> bool {
            self.pending
        }
    }

    fn test_orch(name: &str, priority: i32, pending: bool) -> (Box<dyn Orch>, Arc<AtomicU32>) {
        let runs = Arc::new(AtomicU32::new(0));
        (
            Box::new(TestOrch {
                name: name.to_string(),
                priority,
                runs: runs.clone(),
                pending,
            }),
            runs,
        )
    }

    #[tokio::test]
    async fn test_registration_and_priority_order() {
        let mut daemon = OrchDaemon::new(OrchDaemonConfig::default());
        let (low, _) = test_orch("Low", 100, false);
        let (high, _) = test_orch("High", 5, false);
        daemon.register_orch(low);
        daemon.register_orch(high);

        assert_eq!(daemon.orch_count(), 2);
        let priorities: Vec<i32> = daemon.orchs.keys().copied().collect();
        assert_eq!(priorities, vec![5, 100]);
    }

    #[tokio::test]
    async fn test_run_pass_skips_idle_orchs() {
        let mut daemon = OrchDaemon::new(OrchDaemonConfig::default());
        let (busy, busy_runs) = test_orch("Busy", 0, true);
        let (idle, idle_runs) = test_orch("Idle", 0, false);
        daemon.register_orch(busy);
        daemon.register_orch(idle);

        daemon.run_pass().await;

        assert_eq!(busy_runs.load(Ordering::SeqCst), 1);
        assert_eq!(idle_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let mut daemon = OrchDaemon::new(OrchDaemonConfig {
            heartbeat_interval_ms: 1,
            batch_size: 128,
        });
        let shutdown = daemon.shutdown_handle();
        shutdown.store(true, Ordering::Relaxed);

        // Returns promptly because the flag is already set.
        daemon.run().await;
    }

    #[tokio::test]
    async fn test_dump() {
        let mut daemon = OrchDaemon::new(OrchDaemonConfig::default());
        let (orch, _) = test_orch("VnetOrch", 30, false);
        daemon.register_orch(orch);

        let lines = daemon.dump();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("VnetOrch"));
    }
}
