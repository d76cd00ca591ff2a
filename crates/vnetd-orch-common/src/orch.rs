//! Base Orch trait.

use async_trait::async_trait;

/// Base trait for orchestration agents.
///
/// Each orchestration module implements this trait to participate in the
/// daemon event loop. The daemon calls `do_task()` whenever the module
/// reports pending work, in ascending priority order, on a single logical
/// processing thread.
///
/// Implementations must never panic out of `do_task()`: a failed event is
/// logged and dropped, or deferred for the next pass, but the loop keeps
/// running.
#[async_trait]
pub trait Orch: Send + Sync {
    /// Returns the name of this orch (for logging and debugging).
    fn name(&self) -> &str;

    /// Processes pending events from all of this orch's consumers.
    async fn do_task(&mut self);

    /// Returns the priority of this orch (lower = processed earlier).
    fn priority(&self) -> i32 {
        0
    }

    /// Returns true if this orch has pending work.
    fn has_pending_tasks(&self) -> bool {
        false
    }

    /// Dumps pending work for debugging.
    fn dump_pending_tasks(&self) -> Vec<String> {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingOrch {
        runs: usize,
    }

    #[async_trait]
    impl Orch for CountingOrch {
        fn name(&self) -> &str {
            "CountingOrch"
        }

        async fn do_task(&mut self) {
            self.runs += 1;
        }

        fn has_pending_tasks(&self) -> bool {
            self.runs < 3
        }
    }

    #[tokio::test]
    async fn test_orch_trait_defaults() {
        let mut orch = CountingOrch { runs: 0 };
        assert_eq!(orch.name(), "CountingOrch");
        assert_eq!(orch.priority(), 0);
        assert!(orch.dump_pending_tasks().is_empty());

        while orch.has_pending_tasks() {
            orch.do_task().await;
        }
        assert_eq!(orch.runs, 3);
    }
}
