//! Environment-tunable constants.

#![allow(non_snake_case)]

use std::sync::OnceLock;
use std::time::Duration;

/// Mutex/RwLock acquisition timeout in seconds, by default [`u64::MAX`]
/// (effectively unbounded) so a Blackboard reader never panics under
/// ordinary contention.
///
/// NOTE: configurable through `JSTREE_MUTEX_TIMEOUT_SECS`.
pub fn MUTEX_TIMEOUT_SECS() -> u64 {
  static VALUE: OnceLock<u64> = OnceLock::new();

  *VALUE.get_or_init(|| {
    std::env::var("JSTREE_MUTEX_TIMEOUT_SECS")
      .ok()
      .and_then(|v| v.parse::<u64>().ok())
      .unwrap_or(u64::MAX)
  })
}

/// Mutex/RwLock acquisition timeout duration.
pub fn MUTEX_TIMEOUT() -> Duration {
  Duration::from_secs(MUTEX_TIMEOUT_SECS())
}

/// Default timeout for [`crate::bridge::Bridge::run_on_loop_sync`], by
/// default 5 seconds (spec requires a default of at least 1 second).
///
/// NOTE: configurable through `JSTREE_SYNC_CALL_TIMEOUT_MILLIS`.
pub fn SYNC_CALL_TIMEOUT() -> Duration {
  static VALUE: OnceLock<Duration> = OnceLock::new();

  *VALUE.get_or_init(|| {
    let millis = std::env::var("JSTREE_SYNC_CALL_TIMEOUT_MILLIS")
      .ok()
      .and_then(|v| v.parse::<u64>().ok())
      .unwrap_or(5_000);
    Duration::from_millis(millis)
  })
}

/// Buffer size for the Bridge's task channel, by default 1000.
///
/// NOTE: configurable through `JSTREE_CHANNEL_BUF_SIZE`.
pub fn CHANNEL_BUF_SIZE() -> usize {
  static VALUE: OnceLock<usize> = OnceLock::new();

  *VALUE.get_or_init(|| {
    std::env::var("JSTREE_CHANNEL_BUF_SIZE")
      .ok()
      .and_then(|v| v.parse::<usize>().ok())
      .unwrap_or(1000)
  })
}

/// Ceiling the Manager/Ticker shutdown fallback watcher is allowed to take
/// to settle a pending Promise after `Bridge::stop`, by default 5 seconds.
/// Spec §4.6 only requires "order of seconds"; this is deliberately
/// generous rather than tight.
pub fn SHUTDOWN_FALLBACK_CEILING() -> Duration {
  Duration::from_secs(5)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mutex_timeout_is_positive() {
    assert!(MUTEX_TIMEOUT_SECS() > 0);
  }

  #[test]
  fn sync_call_timeout_meets_spec_minimum() {
    assert!(SYNC_CALL_TIMEOUT() >= Duration::from_secs(1));
  }
}
