//! ⏳ How long to wait between flush rounds, and when to give up on a key.
//!
//! Unbounded by default. A key whose item keeps failing is retried forever, which is a known
//! limitation: set `max_attempts` if you'd rather lose a write than loop on it.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total submissions allowed per key before it is abandoned. `None` = never abandon.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// 📈 Wait before retry round `round` (0-based): doubles every round, capped.
    pub fn backoff(&self, round: u32) -> Duration {
        let factor = 1u64.checked_shl(round.min(63)).unwrap_or(u64::MAX);
        let millis = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// 🪦 Has a key that failed `attempts` times run out of chances?
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_backoff_doubles_until_it_hits_the_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(7), Duration::from_millis(10_000));
        assert_eq!(policy.backoff(200), Duration::from_millis(10_000));
    }

    #[test]
    fn the_one_where_unbounded_never_gives_up() {
        let unbounded = RetryPolicy::default();
        assert!(!unbounded.is_exhausted(u32::MAX));

        let bounded = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        assert!(!bounded.is_exhausted(2));
        assert!(bounded.is_exhausted(3));
    }

    #[test]
    fn the_one_where_toml_fills_in_the_blanks() {
        let policy: RetryPolicy = toml::from_str("max_attempts = 5").expect("parses");
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.initial_backoff_ms, 100);
        assert_eq!(policy.max_backoff_ms, 10_000);
    }
}
