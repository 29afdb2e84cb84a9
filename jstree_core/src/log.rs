//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Initializes a process-wide `tracing` subscriber.
///
/// Level is controlled by the `JSTREE_LOG` environment variable (standard
/// `tracing_subscriber::EnvFilter` syntax, e.g. `jstree_core=debug,warn`),
/// defaulting to `error` when unset or malformed. Safe to call more than
/// once; later calls are no-ops.
pub fn init() {
  let filter = EnvFilter::try_from_env("JSTREE_LOG")
    .unwrap_or_else(|_| EnvFilter::new("error"));

  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(true)
    .try_init();
}
