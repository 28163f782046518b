//! Logging and metrics capability injected into the registry and monitors.

use parking_lot::Mutex;
use std::time::Duration;
use tracing::warn;

use crate::config::LogStyle;

/// Histogram of smoothed round-trip times, labelled by `remote_peer_id`.
pub const PEER_RTT_METRIC: &str = "peer_round_trip_time_seconds";

/// Destination for the monitor's warnings and latency observations.
///
/// Implementations are shared by every peer's task and must accept
/// concurrent calls.
pub trait MonitorSink: Send + Sync {
    /// A peer could not be added to the prober.
    fn registration_failed(&self, peer_id: &str, error: &str);

    /// The latest snapshot reported the peer unreachable.
    fn unhealthy(&self, peer_id: &str, smoothed_rtt: Duration, error: &str);

    /// The clock difference against the peer exceeded the drift threshold.
    fn clock_drift(&self, peer_id: &str, skew: Duration, smoothed_rtt: Duration, error: &str);

    /// One latency sample per monitor iteration.
    fn observe_rtt(&self, peer_id: &str, smoothed_rtt: Duration);
}

/// Emits `tracing` warnings and records RTT through the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    style: LogStyle,
}

impl TracingSink {
    pub fn new(style: LogStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> LogStyle {
        self.style
    }

    /// Register the RTT histogram description with the installed recorder.
    pub fn describe_metrics() {
        metrics::describe_histogram!(
            PEER_RTT_METRIC,
            metrics::Unit::Seconds,
            "Smoothed round-trip time observed by the peer prober"
        );
    }
}

impl MonitorSink for TracingSink {
    fn registration_failed(&self, peer_id: &str, error: &str) {
        match self.style {
            LogStyle::Structured => warn!(
                remote_peer_id = %peer_id,
                error = %error,
                "failed to add peer into prober"
            ),
            LogStyle::Plain => warn!("failed to add peer {} into prober: {}", peer_id, error),
        }
    }

    fn unhealthy(&self, peer_id: &str, smoothed_rtt: Duration, error: &str) {
        match self.style {
            LogStyle::Structured => warn!(
                remote_peer_id = %peer_id,
                rtt = ?smoothed_rtt,
                error = %error,
                "prober detected unhealthy status"
            ),
            LogStyle::Plain => warn!(
                "health check for peer {} could not connect (rtt {:?}): {}",
                peer_id, smoothed_rtt, error
            ),
        }
    }

    fn clock_drift(&self, peer_id: &str, skew: Duration, smoothed_rtt: Duration, error: &str) {
        match self.style {
            LogStyle::Structured => warn!(
                remote_peer_id = %peer_id,
                clock_drift = ?skew,
                rtt = ?smoothed_rtt,
                error = %error,
                "prober found high clock drift"
            ),
            LogStyle::Plain => warn!(
                "the clock difference against peer {} is too high [{:?}] (rtt {:?}, last error: {})",
                peer_id, skew, smoothed_rtt, error
            ),
        }
    }

    fn observe_rtt(&self, peer_id: &str, smoothed_rtt: Duration) {
        metrics::histogram!(PEER_RTT_METRIC, "remote_peer_id" => peer_id.to_string())
            .record(smoothed_rtt.as_secs_f64());
    }
}

/// Event captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    RegistrationFailed {
        peer_id: String,
        error: String,
    },
    Unhealthy {
        peer_id: String,
        smoothed_rtt: Duration,
        error: String,
    },
    ClockDrift {
        peer_id: String,
        skew: Duration,
        smoothed_rtt: Duration,
        error: String,
    },
    RttObserved {
        peer_id: String,
        seconds: f64,
    },
}

impl MonitorEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            MonitorEvent::RegistrationFailed { peer_id, .. }
            | MonitorEvent::Unhealthy { peer_id, .. }
            | MonitorEvent::ClockDrift { peer_id, .. }
            | MonitorEvent::RttObserved { peer_id, .. } => peer_id,
        }
    }

    pub fn is_warning(&self) -> bool {
        !matches!(self, MonitorEvent::RttObserved { .. })
    }
}

/// In-memory sink keeping every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<MonitorEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, peer_id: &str) -> Vec<MonitorEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.peer_id() == peer_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn push(&self, event: MonitorEvent) {
        self.events.lock().push(event);
    }
}

impl MonitorSink for RecordingSink {
    fn registration_failed(&self, peer_id: &str, error: &str) {
        self.push(MonitorEvent::RegistrationFailed {
            peer_id: peer_id.to_string(),
            error: error.to_string(),
        });
    }

    fn unhealthy(&self, peer_id: &str, smoothed_rtt: Duration, error: &str) {
        self.push(MonitorEvent::Unhealthy {
            peer_id: peer_id.to_string(),
            smoothed_rtt,
            error: error.to_string(),
        });
    }

    fn clock_drift(&self, peer_id: &str, skew: Duration, smoothed_rtt: Duration, error: &str) {
        self.push(MonitorEvent::ClockDrift {
            peer_id: peer_id.to_string(),
            skew,
            smoothed_rtt,
            error: error.to_string(),
        });
    }

    fn observe_rtt(&self, peer_id: &str, smoothed_rtt: Duration) {
        self.push(MonitorEvent::RttObserved {
            peer_id: peer_id.to_string(),
            seconds: smoothed_rtt.as_secs_f64(),
        });
    }
}
