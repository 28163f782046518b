//! Low-level probe execution.
//!
//! A [`Probe`] performs a single reachability attempt against one endpoint.
//! [`spawn_probe_loop`] drives it on a fixed sampling interval and feeds the
//! outcome into the peer's [`PeerStatus`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;
use url::Url;

use crate::error::{ProbeError, Result};
use crate::status::PeerStatus;

/// Body served by a probing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReply {
    pub ok: bool,
    /// Responder's wall clock when the reply was produced
    pub now: DateTime<Utc>,
}

impl ProbeReply {
    pub fn healthy_now() -> Self {
        Self {
            ok: true,
            now: Utc::now(),
        }
    }
}

/// A single reachability attempt.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, endpoint: &str) -> Result<ProbeReply>;

    /// Reject targets this probe can never reach.
    fn validate_target(&self, target: &str) -> Result<()> {
        if target.trim().is_empty() {
            return Err(ProbeError::InvalidTarget {
                target: target.to_string(),
                reason: "target is blank".to_string(),
            });
        }
        Ok(())
    }
}

/// Probes peers with `GET <endpoint>` and a JSON [`ProbeReply`].
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// `timeout` bounds each request; it should match the transport's read timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn endpoint_url(target: &str) -> Result<Url> {
        let trimmed = target.trim();
        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };
        let url = Url::parse(&candidate).map_err(|err| ProbeError::InvalidTarget {
            target: target.to_string(),
            reason: err.to_string(),
        })?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ProbeError::InvalidTarget {
                target: target.to_string(),
                reason: format!("unsupported scheme {other}"),
            }),
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, endpoint: &str) -> Result<ProbeReply> {
        let url = Self::endpoint_url(endpoint)?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ProbeError::Status {
                endpoint: endpoint.to_string(),
                status: response.status(),
            });
        }

        let body = response.bytes().await?;
        let reply: ProbeReply = serde_json::from_slice(&body)?;
        if !reply.ok {
            return Err(ProbeError::Unhealthy);
        }
        Ok(reply)
    }

    fn validate_target(&self, target: &str) -> Result<()> {
        if target.trim().is_empty() {
            return Err(ProbeError::InvalidTarget {
                target: target.to_string(),
                reason: "target is blank".to_string(),
            });
        }
        Self::endpoint_url(target).map(|_| ())
    }
}

/// Spawn the sampling loop for one peer.
///
/// Attempts stick to one target while it answers and rotate to the next
/// target after a failure. The loop exits once the status is stopped.
pub fn spawn_probe_loop(
    probe: Arc<dyn Probe>,
    status: Arc<PeerStatus>,
    targets: Vec<String>,
    sampling_interval: Duration,
) -> JoinHandle<()> {
    let mut stop = status.stop_notify();
    tokio::spawn(async move {
        if targets.is_empty() {
            return;
        }

        let mut ticker = interval(sampling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pinned = 0usize;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let endpoint = &targets[pinned];
                    let started = Instant::now();
                    let outcome = tokio::select! {
                        outcome = probe.probe(endpoint) => outcome,
                        _ = stop.stopped() => break,
                    };
                    match outcome {
                        Ok(reply) => status.record(started.elapsed(), reply.now),
                        Err(err) => {
                            debug!(
                                "Probe of peer {} via {} failed: {}",
                                status.peer_id(),
                                endpoint,
                                err
                            );
                            status.record_failure(&err);
                            pinned = (pinned + 1) % targets.len();
                        }
                    }
                }
                _ = stop.stopped() => break,
            }
        }

        debug!("Probe loop for peer {} stopped", status.peer_id());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted outcomes and remembers which endpoints were hit.
    struct ScriptedProbe {
        outcomes: Mutex<VecDeque<Result<ProbeReply>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn new(outcomes: Vec<Result<ProbeReply>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, endpoint: &str) -> Result<ProbeReply> {
            self.calls.lock().push(endpoint.to_string());
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(ProbeReply::healthy_now()))
        }
    }

    #[test]
    fn http_probe_validates_targets() {
        let probe = HttpProbe::new(Duration::from_secs(1)).unwrap();
        assert!(probe.validate_target("10.0.0.1/net/probing").is_ok());
        assert!(probe.validate_target("https://node-b:9000/net/probing").is_ok());
        assert!(matches!(
            probe.validate_target("   "),
            Err(ProbeError::InvalidTarget { .. })
        ));
        assert!(matches!(
            probe.validate_target("ftp://node-b/net/probing"),
            Err(ProbeError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn probe_reply_round_trips_as_json() {
        let reply = ProbeReply::healthy_now();
        let encoded = serde_json::to_string(&reply).unwrap();
        assert!(encoded.contains("\"ok\":true"));
        let decoded: ProbeReply = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, reply);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_rotate_to_next_target() {
        let probe = Arc::new(ScriptedProbe::new(vec![
            Err(ProbeError::Unhealthy),
            Ok(ProbeReply::healthy_now()),
            Ok(ProbeReply::healthy_now()),
        ]));
        let status = Arc::new(PeerStatus::new("p1"));
        let targets = vec!["a/net/probing".to_string(), "b/net/probing".to_string()];

        let handle = spawn_probe_loop(
            probe.clone(),
            status.clone(),
            targets,
            Duration::from_secs(4),
        );

        // Ticks fire at 0s, 4s and 8s.
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(
            *probe.calls.lock(),
            vec!["a/net/probing", "b/net/probing", "b/net/probing"]
        );
        assert!(status.is_healthy());
        assert_eq!(status.total(), 3);
        assert_eq!(status.loss(), 1);

        status.stop();
        tokio::time::timeout(Duration::from_millis(10), handle)
            .await
            .expect("probe loop exits after stop")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failure_marks_status_unhealthy() {
        let probe = Arc::new(ScriptedProbe::new(vec![Err(ProbeError::Status {
            endpoint: "a/net/probing".to_string(),
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        })]));
        let status = Arc::new(PeerStatus::new("p1"));

        let _handle = spawn_probe_loop(
            probe,
            status.clone(),
            vec!["a/net/probing".to_string()],
            Duration::from_secs(4),
        );
        tokio::time::sleep(Duration::from_millis(1)).await;

        let snapshot = status.snapshot();
        assert!(!snapshot.healthy);
        assert!(snapshot.last_error.contains("503"));
        status.stop();
    }
}
