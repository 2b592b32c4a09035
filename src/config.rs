use crate::{error::ConfigError, limits::Limits};
use core::time::Duration;
use serde::Deserialize;

/// Tuning for both ends of a connection. Durations are in milliseconds.
///
/// ```
/// let config = sapwood::SyncConfig::from_json(r#"{ "debounce_ms": 8, "limits": { "max_depth": 32 } }"#).unwrap();
/// assert_eq!(config.debounce().as_millis(), 8);
/// assert_eq!(config.limits.max_nodes, 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
	/// Quiet time after the last interaction before a batch is flushed. One frame by default.
	pub debounce_ms: u64,
	/// Upper bound on how long a continuously refreshed debounce can postpone a flush.
	pub max_batch_delay_ms: u64,
	pub confirmation_timeout_ms: u64,
	/// Consecutive timeouts before connectivity is reported as degraded.
	pub degraded_after: u32,
	/// Speculative hints below this confidence are ignored.
	pub min_confidence: f32,
	/// Consecutive mispredictions before a speculative hint is dropped.
	pub max_mispredictions: u32,
	pub idle_timeout_ms: u64,
	pub limits: Limits,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			debounce_ms: 16,
			max_batch_delay_ms: 100,
			confirmation_timeout_ms: 2000,
			degraded_after: 3,
			min_confidence: 0.5,
			max_mispredictions: 3,
			idle_timeout_ms: 300_000,
			limits: Limits::default(),
		}
	}
}

impl SyncConfig {
	/// # Errors
	///
	/// Iff `json` isn't an object of known fields with the right types.
	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		Ok(serde_json::from_str(json)?)
	}

	#[must_use]
	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	#[must_use]
	pub fn max_batch_delay(&self) -> Duration {
		Duration::from_millis(self.max_batch_delay_ms)
	}

	#[must_use]
	pub fn confirmation_timeout(&self) -> Duration {
		Duration::from_millis(self.confirmation_timeout_ms)
	}

	#[must_use]
	pub fn idle_timeout(&self) -> Duration {
		Duration::from_millis(self.idle_timeout_ms)
	}
}

#[cfg(test)]
mod tests {
	use super::SyncConfig;

	#[test]
	fn unknown_fields_are_rejected() {
		assert!(SyncConfig::from_json(r#"{ "debounce": 8 }"#).is_err());
		assert!(SyncConfig::from_json(r#"{ "limits": { "depth": 8 } }"#).is_err());
		assert_eq!(SyncConfig::from_json("{}").unwrap(), SyncConfig::default());
	}
}
