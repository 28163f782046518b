use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ProbeError, Result};

/// Path appended to every peer base address to reach its probing endpoint.
pub const DEFAULT_PROBING_PATH: &str = "/net/probing";

/// Probes must complete before the transport reclaims an idle connection,
/// so sampling runs this much faster than the read timeout.
pub const SAMPLING_MARGIN: Duration = Duration::from_secs(1);

/// How warnings are rendered by [`crate::TracingSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStyle {
    /// Key/value fields on every event.
    #[default]
    Structured,
    /// Single formatted message per event.
    Plain,
}

/// Probing and monitoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Read timeout of the surrounding transport
    #[serde(rename = "read_timeout_ms", with = "duration_ms")]
    pub read_timeout: Duration,
    /// Poll interval after an unhealthy observation (and on first poll)
    #[serde(rename = "fast_interval_ms", with = "duration_ms")]
    pub fast_interval: Duration,
    /// Poll interval after a healthy observation
    #[serde(rename = "steady_interval_ms", with = "duration_ms")]
    pub steady_interval: Duration,
    /// Absolute clock difference above which drift is reported
    #[serde(rename = "drift_threshold_ms", with = "duration_ms")]
    pub drift_threshold: Duration,
    /// Path segment reserved for liveness probing
    pub probing_path: String,
    pub log_style: LogStyle,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            fast_interval: Duration::from_secs(5),
            steady_interval: Duration::from_secs(30),
            drift_threshold: Duration::from_secs(1),
            probing_path: DEFAULT_PROBING_PATH.to_string(),
            log_style: LogStyle::default(),
        }
    }
}

impl ProbeConfig {
    /// Interval between low-level reachability attempts.
    pub fn sampling_interval(&self) -> Duration {
        self.read_timeout.saturating_sub(SAMPLING_MARGIN)
    }

    /// Probe endpoint for a peer base address.
    pub fn probe_endpoint(&self, base_address: &str) -> String {
        format!(
            "{}{}",
            base_address.trim().trim_end_matches('/'),
            self.probing_path
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_timeout <= SAMPLING_MARGIN {
            return Err(ProbeError::InvalidConfig(format!(
                "read timeout {:?} must exceed {:?}",
                self.read_timeout, SAMPLING_MARGIN
            )));
        }
        if self.fast_interval.is_zero() || self.steady_interval.is_zero() {
            return Err(ProbeError::InvalidConfig(
                "poll intervals must be non-zero".to_string(),
            ));
        }
        if !self.probing_path.starts_with('/') {
            return Err(ProbeError::InvalidConfig(format!(
                "probing path {:?} must start with '/'",
                self.probing_path
            )));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
