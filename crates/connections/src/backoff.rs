//! Reconnect delay policy: capped exponential back-off with jitter.

use std::time::Duration;

use tb_domain::config::ReconnectConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the un-jittered delay.
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure.
    pub backoff_factor: f64,
    /// Consecutive failures before giving up. `0` retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            backoff_factor: cfg.backoff_factor,
            max_attempts: cfg.max_attempts,
        }
    }
}

impl ReconnectBackoff {
    /// Delay before reconnect `attempt` (0-indexed) of `server_id`.
    ///
    /// The un-jittered delay is `initial_delay * backoff_factor^attempt`,
    /// capped at `max_delay`. Up to 25% is added on top, seeded by the
    /// server id and the attempt, so servers dropped together spread out.
    pub fn delay_for_attempt(&self, server_id: &str, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let capped_ms = (base_ms * self.backoff_factor.powi(exponent))
            .min(self.max_delay.as_millis() as f64);

        let jitter_ms = capped_ms * 0.25 * spread(server_id, attempt);
        Duration::from_millis((capped_ms + jitter_ms) as u64)
    }

    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Stable fraction in `[0, 1)` for a (server, attempt) pair.
///
/// FNV-1a over the id, mixed with the attempt through the splitmix64
/// finalizer.
fn spread(server_id: &str, attempt: u32) -> f64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in server_id.bytes() {
        h ^= u64::from(byte);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h ^= u64::from(attempt).wrapping_mul(0x9e37_79b9_7f4a_7c15);

    h ^= h >> 30;
    h = h.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    h ^= h >> 27;
    h = h.wrapping_mul(0x94d0_49bb_1331_11eb);
    h ^= h >> 31;

    (h >> 11) as f64 / (1u64 << 53) as f64
}
