//! Retry backoff policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff applied when a flow fails or its completion is
/// rejected.
///
/// The delay before retry `n` (counting from 0) is
/// `min(base_delay * 2^n, max_delay)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,

    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,

    /// Retries allowed before the flow is disposed. `None` means unlimited.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            max_retries: Some(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `retry_count` earlier retries.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Whether a flow that was already retried `retry_count` times must be
    /// given up on.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        self.max_retries.is_some_and(|max| retry_count >= max)
    }

    /// Delays for successive retries, up to the retry ceiling or until the
    /// delay stops growing. Later retries reuse the last delay.
    pub fn schedule(&self) -> Vec<Duration> {
        let mut delays: Vec<Duration> = Vec::new();
        let mut n = 0u32;
        while !self.is_exhausted(n) {
            let delay = self.delay_for(n);
            if delays.last() == Some(&delay) {
                break;
            }
            delays.push(delay);
            n = n.saturating_add(1);
        }
        delays
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
