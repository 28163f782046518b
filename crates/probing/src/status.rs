//! Live reachability status of a single probed peer.
//!
//! A [`PeerStatus`] is written by the probe executor and read by the health
//! monitor through [`PeerStatus::snapshot`]. Once [`PeerStatus::stop`] fires
//! the status is frozen and every [`StopSignal`] derived from it resolves.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::ProbeError;

/// Weight of the newest sample in the smoothed round-trip time.
pub const SRTT_ALPHA: f64 = 0.125;

#[derive(Debug, Clone)]
struct StatusInner {
    healthy: bool,
    srtt: Duration,
    clock_diff: chrono::Duration,
    last_error: Option<String>,
    total: u64,
    loss: u64,
}

impl StatusInner {
    fn fresh() -> Self {
        Self {
            healthy: false,
            srtt: Duration::ZERO,
            clock_diff: chrono::Duration::zero(),
            last_error: Some(ProbeError::NoProbeYet.to_string()),
            total: 0,
            loss: 0,
        }
    }
}

/// Point-in-time copy of a peer's status.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub healthy: bool,
    pub smoothed_rtt: Duration,
    /// Empty when the peer is healthy
    pub last_error: String,
    /// Signed: positive when the local clock is ahead of the peer
    pub clock_difference: chrono::Duration,
    pub total: u64,
    pub loss: u64,
}

impl StatusSnapshot {
    /// Magnitude of the clock difference, regardless of sign.
    pub fn clock_skew(&self) -> Duration {
        let magnitude = if self.clock_difference < chrono::Duration::zero() {
            -self.clock_difference
        } else {
            self.clock_difference
        };
        magnitude.to_std().unwrap_or_default()
    }
}

/// Continuously updated view of one peer's probe outcomes.
pub struct PeerStatus {
    peer_id: String,
    inner: RwLock<StatusInner>,
    stop_tx: watch::Sender<bool>,
}

impl PeerStatus {
    pub fn new(peer_id: impl Into<String>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            peer_id: peer_id.into(),
            inner: RwLock::new(StatusInner::fresh()),
            stop_tx,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Consistent copy of all observed fields.
    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read();
        StatusSnapshot {
            healthy: inner.healthy,
            smoothed_rtt: inner.srtt,
            last_error: inner.last_error.clone().unwrap_or_default(),
            clock_difference: inner.clock_diff,
            total: inner.total,
            loss: inner.loss,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.inner.read().healthy
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.inner.read().srtt
    }

    pub fn clock_difference(&self) -> chrono::Duration {
        self.inner.read().clock_diff
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.read().last_error.clone()
    }

    pub fn total(&self) -> u64 {
        self.inner.read().total
    }

    pub fn loss(&self) -> u64 {
        self.inner.read().loss
    }

    /// Record a successful probe that took `rtt` and was answered with the
    /// peer's wall clock `peer_now`.
    pub fn record(&self, rtt: Duration, peer_now: DateTime<Utc>) {
        self.record_at(rtt, peer_now, Utc::now());
    }

    pub(crate) fn record_at(
        &self,
        rtt: Duration,
        peer_now: DateTime<Utc>,
        local_now: DateTime<Utc>,
    ) {
        let mut inner = self.inner.write();
        if self.is_stopped() {
            return;
        }
        inner.total += 1;
        inner.healthy = true;
        inner.last_error = None;
        // The first sample seeds the average instead of decaying from zero.
        inner.srtt = if inner.srtt.is_zero() {
            rtt
        } else {
            inner
                .srtt
                .mul_f64(1.0 - SRTT_ALPHA)
                .saturating_add(rtt.mul_f64(SRTT_ALPHA))
        };
        let half_rtt =
            chrono::Duration::from_std(inner.srtt / 2).unwrap_or_else(|_| chrono::Duration::zero());
        inner.clock_diff = local_now.signed_duration_since(peer_now) - half_rtt;
    }

    /// Record a failed probe attempt.
    pub fn record_failure(&self, err: impl fmt::Display) {
        let mut detail = err.to_string();
        if detail.is_empty() {
            detail = "unknown probe failure".to_string();
        }

        let mut inner = self.inner.write();
        if self.is_stopped() {
            return;
        }
        inner.total += 1;
        inner.loss += 1;
        inner.healthy = false;
        inner.last_error = Some(detail);
    }

    /// Forget all samples; the peer reads as not yet probed.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        if self.is_stopped() {
            return;
        }
        *inner = StatusInner::fresh();
    }

    /// Fire the one-shot stop signal. Later calls are no-ops.
    pub fn stop(&self) {
        // Held across the send so no update lands once the signal is visible.
        let _guard = self.inner.write();
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Handle that resolves once [`PeerStatus::stop`] is called.
    pub fn stop_notify(&self) -> StopSignal {
        StopSignal(self.stop_tx.subscribe())
    }
}

impl fmt::Debug for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerStatus")
            .field("peer_id", &self.peer_id)
            .field("status", &*self.inner.read())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Receiver side of a peer's stop signal.
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves when the stop signal fires (immediately if it already has).
    pub async fn stopped(&mut self) {
        // A dropped sender means the status is gone, which also ends observation.
        let _ = self.0.wait_for(|stopped| *stopped).await;
    }
}
