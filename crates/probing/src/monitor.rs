//! Per-peer health monitor.
//!
//! Each registered peer gets one [`MonitorTask`] that periodically reads the
//! peer's [`PeerStatus`], reports unhealthy status and clock drift to the
//! [`MonitorSink`], and records the smoothed RTT. The poll cadence adapts to
//! the last observation:
//!
//! - `FastPoll`: initial state and after an unhealthy observation, so a new
//!   or failing peer is reported promptly.
//! - `SteadyPoll`: after a healthy observation, to keep log and metric
//!   volume low for stable peers.
//!
//! The task exits only when the status's stop signal fires, including while
//! it is waiting for the next poll.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::sink::MonitorSink;
use crate::status::{PeerStatus, StatusSnapshot};

/// Poll cadence of a monitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    FastPoll,
    SteadyPoll,
}

/// Interval policy shared by all monitor tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorPolicy {
    pub fast_interval: Duration,
    pub steady_interval: Duration,
    pub drift_threshold: Duration,
}

impl MonitorPolicy {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            fast_interval: config.fast_interval,
            steady_interval: config.steady_interval,
            drift_threshold: config.drift_threshold,
        }
    }
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self::from_config(&ProbeConfig::default())
    }
}

/// Background observer bound to one peer's status handle.
pub struct MonitorTask {
    peer_id: String,
    status: Arc<PeerStatus>,
    policy: MonitorPolicy,
    sink: Arc<dyn MonitorSink>,
    state: PollState,
}

impl MonitorTask {
    pub fn new(
        status: Arc<PeerStatus>,
        policy: MonitorPolicy,
        sink: Arc<dyn MonitorSink>,
    ) -> Self {
        Self {
            peer_id: status.peer_id().to_string(),
            status,
            policy,
            sink,
            state: PollState::FastPoll,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Wait before the next poll.
    pub fn current_interval(&self) -> Duration {
        match self.state {
            PollState::FastPoll => self.policy.fast_interval,
            PollState::SteadyPoll => self.policy.steady_interval,
        }
    }

    /// Apply one observation and return the wait before the next poll.
    pub fn observe(&mut self, snapshot: &StatusSnapshot) -> Duration {
        if snapshot.healthy {
            self.state = PollState::SteadyPoll;
        } else {
            self.sink
                .unhealthy(&self.peer_id, snapshot.smoothed_rtt, &snapshot.last_error);
            self.state = PollState::FastPoll;
        }

        let skew = snapshot.clock_skew();
        if skew > self.policy.drift_threshold {
            self.sink.clock_drift(
                &self.peer_id,
                skew,
                snapshot.smoothed_rtt,
                &snapshot.last_error,
            );
        }

        self.sink.observe_rtt(&self.peer_id, snapshot.smoothed_rtt);
        self.current_interval()
    }

    /// Poll until the peer's stop signal fires.
    pub async fn run(mut self) {
        let mut stop = self.status.stop_notify();
        debug!("Health monitor started for peer {}", self.peer_id);

        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = sleep(self.current_interval()) => {
                    if stop.is_stopped() {
                        break;
                    }
                    let snapshot = self.status.snapshot();
                    self.observe(&snapshot);
                }
            }
        }

        debug!("Health monitor stopped for peer {}", self.peer_id);
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

/// Start monitoring `status` on the current runtime.
pub fn spawn_monitor(
    status: Arc<PeerStatus>,
    policy: MonitorPolicy,
    sink: Arc<dyn MonitorSink>,
) -> JoinHandle<()> {
    MonitorTask::new(status, policy, sink).spawn()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MonitorEvent, RecordingSink};
    use chrono::Utc;
    use tokio::time::timeout;

    const FAST: Duration = Duration::from_secs(5);
    const STEADY: Duration = Duration::from_secs(30);

    fn policy() -> MonitorPolicy {
        MonitorPolicy {
            fast_interval: FAST,
            steady_interval: STEADY,
            drift_threshold: Duration::from_secs(1),
        }
    }

    fn snapshot(healthy: bool, rtt_ms: u64, skew_ms: i64, error: &str) -> StatusSnapshot {
        StatusSnapshot {
            healthy,
            smoothed_rtt: Duration::from_millis(rtt_ms),
            last_error: error.to_string(),
            clock_difference: chrono::Duration::milliseconds(skew_ms),
            total: 1,
            loss: u64::from(!healthy),
        }
    }

    fn task(sink: &Arc<RecordingSink>) -> MonitorTask {
        MonitorTask::new(Arc::new(PeerStatus::new("P1")), policy(), sink.clone())
    }

    fn count(events: &[MonitorEvent], pred: fn(&MonitorEvent) -> bool) -> usize {
        events.iter().filter(|event| pred(event)).count()
    }

    fn is_unhealthy(event: &MonitorEvent) -> bool {
        matches!(event, MonitorEvent::Unhealthy { .. })
    }

    fn is_drift(event: &MonitorEvent) -> bool {
        matches!(event, MonitorEvent::ClockDrift { .. })
    }

    #[test]
    fn starts_in_fast_poll() {
        let sink = Arc::new(RecordingSink::new());
        let task = task(&sink);
        assert_eq!(task.state(), PollState::FastPoll);
        assert_eq!(task.current_interval(), FAST);
    }

    #[test]
    fn interval_follows_latest_health() {
        let sink = Arc::new(RecordingSink::new());
        let mut task = task(&sink);

        assert_eq!(task.observe(&snapshot(true, 10, 0, "")), STEADY);
        assert_eq!(task.state(), PollState::SteadyPoll);
        assert_eq!(task.observe(&snapshot(true, 10, 0, "")), STEADY);
        assert_eq!(task.observe(&snapshot(false, 10, 0, "refused")), FAST);
        assert_eq!(task.state(), PollState::FastPoll);
        assert_eq!(task.observe(&snapshot(false, 10, 0, "refused")), FAST);
        assert_eq!(task.observe(&snapshot(true, 10, 0, "")), STEADY);
    }

    #[test]
    fn unhealthy_then_recovered_peer() {
        let sink = Arc::new(RecordingSink::new());
        let mut task = task(&sink);

        let next = task.observe(&snapshot(false, 0, 0, "dial timeout"));
        assert_eq!(next, FAST);
        let events = sink.events();
        assert_eq!(count(&events, is_unhealthy), 1);
        assert_eq!(
            events[0],
            MonitorEvent::Unhealthy {
                peer_id: "P1".to_string(),
                smoothed_rtt: Duration::ZERO,
                error: "dial timeout".to_string(),
            }
        );

        sink.clear();
        let next = task.observe(&snapshot(true, 12, 50, ""));
        assert_eq!(next, STEADY);
        assert_eq!(
            sink.events(),
            vec![MonitorEvent::RttObserved {
                peer_id: "P1".to_string(),
                seconds: 0.012,
            }]
        );
    }

    #[test]
    fn drift_reported_once_per_iteration_regardless_of_health() {
        let sink = Arc::new(RecordingSink::new());
        let mut task = task(&sink);

        task.observe(&snapshot(true, 12, 1_200, ""));
        let events = sink.events();
        assert_eq!(count(&events, is_drift), 1);
        assert_eq!(count(&events, is_unhealthy), 0);
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            MonitorEvent::ClockDrift {
                peer_id: "P1".to_string(),
                skew: Duration::from_millis(1_200),
                smoothed_rtt: Duration::from_millis(12),
                error: String::new(),
            }
        );

        sink.clear();
        task.observe(&snapshot(false, 12, -1_500, "refused"));
        let events = sink.events();
        assert_eq!(count(&events, is_drift), 1);
        assert_eq!(count(&events, is_unhealthy), 1);
    }

    #[test]
    fn drift_at_threshold_is_not_reported() {
        let sink = Arc::new(RecordingSink::new());
        let mut task = task(&sink);

        task.observe(&snapshot(true, 12, 1_000, ""));
        task.observe(&snapshot(true, 12, -1_000, ""));
        assert_eq!(count(&sink.events(), is_drift), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_happens_at_fast_interval() {
        let sink = Arc::new(RecordingSink::new());
        let status = Arc::new(PeerStatus::new("P1"));
        let now = Utc::now();
        status.record_at(Duration::from_millis(12), now, now);

        let handle = spawn_monitor(status.clone(), policy(), sink.clone());

        sleep(FAST - Duration::from_millis(1)).await;
        assert!(sink.is_empty());

        sleep(Duration::from_millis(2)).await;
        assert_eq!(sink.len(), 1);

        // Healthy: the next poll waits the steady interval.
        sleep(STEADY - Duration::from_millis(2)).await;
        assert_eq!(sink.len(), 1);
        sleep(Duration::from_millis(2)).await;
        assert_eq!(sink.len(), 2);

        status.stop();
        timeout(Duration::from_millis(1), handle)
            .await
            .expect("monitor exits after stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_peer_is_rechecked_at_fast_interval() {
        let sink = Arc::new(RecordingSink::new());
        let status = Arc::new(PeerStatus::new("P1"));
        status.record_failure("connection refused");

        let _handle = spawn_monitor(status.clone(), policy(), sink.clone());

        sleep(FAST * 3 + Duration::from_millis(1)).await;
        let events = sink.events_for("P1");
        assert_eq!(count(&events, is_unhealthy), 3);
        status.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_wait_ends_task_without_events() {
        let sink = Arc::new(RecordingSink::new());
        let status = Arc::new(PeerStatus::new("P1"));
        status.record_failure("dial timeout");

        let handle = spawn_monitor(status.clone(), policy(), sink.clone());

        sleep(Duration::from_secs(2)).await;
        status.stop();
        timeout(Duration::from_millis(1), handle)
            .await
            .expect("monitor exits mid-wait")
            .unwrap();

        sleep(FAST * 4).await;
        assert!(sink.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_as_timer_elapses_emits_nothing_more() {
        for _ in 0..200 {
            let sink = Arc::new(RecordingSink::new());
            let status = Arc::new(PeerStatus::new("P1"));
            status.record_failure("dial timeout");

            let handle = spawn_monitor(status.clone(), policy(), sink.clone());

            sleep(FAST).await;
            status.stop();
            let at_stop = sink.len();
            handle.await.unwrap();

            assert_eq!(sink.len(), at_stop);
        }
    }
}
