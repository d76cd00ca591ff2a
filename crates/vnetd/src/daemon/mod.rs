//! Daemon event loop and orch coordination.

mod orchdaemon;

pub use orchdaemon::{OrchDaemon, OrchDaemonConfig};
