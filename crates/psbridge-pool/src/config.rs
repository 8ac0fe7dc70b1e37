//! Pool tuning knobs.

use std::time::Duration;

use serde::Deserialize;

/// Tuning constants for the session pool.
///
/// The maintenance algorithm is adaptive, so there is rarely a reason to
/// change these. Sessions are expensive to set up (several seconds of
/// process spawn plus login), which is the whole point of pooling them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Warm sessions to keep available per credential set.
    pub min_warm: usize,
    /// Idle time after which a pooled session is expired.
    pub max_idle_secs: u64,
    /// Total age after which a session is expired regardless of use.
    pub max_lifetime_secs: u64,
    /// Uses after which a session is retired.
    pub max_use_count: u32,
    /// Minimum interval between maintenance passes.
    pub fast_throttle_secs: u64,
    /// Minimum interval between full passes (expiry and trimming).
    pub slow_throttle_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_warm: 2,
            max_idle_secs: 300,
            max_lifetime_secs: 3600,
            max_use_count: 100,
            fast_throttle_secs: 5,
            slow_throttle_secs: 60,
        }
    }
}

impl PoolConfig {
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }

    pub fn fast_throttle(&self) -> Duration {
        Duration::from_secs(self.fast_throttle_secs)
    }

    pub fn slow_throttle(&self) -> Duration {
        Duration::from_secs(self.slow_throttle_secs)
    }
}
