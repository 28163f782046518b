//! Probe registry: one active probe and one health monitor per peer.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ProbeConfig;
use crate::error::{ProbeError, Result};
use crate::monitor::{spawn_monitor, MonitorPolicy};
use crate::probe::{spawn_probe_loop, HttpProbe, Probe};
use crate::sink::{MonitorSink, TracingSink};
use crate::status::PeerStatus;

/// One peer's reachability check and the tasks bound to it.
#[derive(Debug)]
pub struct PeerProbe {
    peer_id: String,
    targets: Vec<String>,
    sampling_interval: Duration,
    status: Arc<PeerStatus>,
    probe_task: JoinHandle<()>,
    monitor_task: Option<JoinHandle<()>>,
}

impl PeerProbe {
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn sampling_interval(&self) -> Duration {
        self.sampling_interval
    }

    pub fn status(&self) -> Arc<PeerStatus> {
        self.status.clone()
    }

    pub fn is_monitored(&self) -> bool {
        self.monitor_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn stop(&self) {
        self.status.stop();
    }

    fn is_running(&self) -> bool {
        !self.probe_task.is_finished()
    }
}

/// Owns every active peer probe.
pub struct ProbeRegistry {
    config: ProbeConfig,
    probe: Arc<dyn Probe>,
    sink: Arc<dyn MonitorSink>,
    probes: RwLock<HashMap<String, PeerProbe>>,
}

impl ProbeRegistry {
    pub fn new(
        config: ProbeConfig,
        probe: Arc<dyn Probe>,
        sink: Arc<dyn MonitorSink>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            probe,
            sink,
            probes: RwLock::new(HashMap::new()),
        })
    }

    /// Registry probing over HTTP and reporting through `tracing`/`metrics`.
    pub fn with_http(config: ProbeConfig) -> Result<Self> {
        let probe = Arc::new(HttpProbe::new(config.read_timeout)?);
        let sink = Arc::new(TracingSink::new(config.log_style));
        Self::new(config, probe, sink)
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Start probing and monitoring a peer.
    ///
    /// Each base address is probed at `<address><probing_path>` every
    /// [`ProbeConfig::sampling_interval`]. A previous probe for the same peer
    /// is stopped and replaced. On failure the error is reported to the sink
    /// and no monitor is started.
    pub fn register_peer(
        &self,
        peer_id: &str,
        base_addresses: &[String],
    ) -> Result<Arc<PeerStatus>> {
        self.probe_endpoints(base_addresses)
            .and_then(|targets| {
                self.insert(peer_id, targets, self.config.sampling_interval(), true)
            })
            .inspect_err(|err| self.sink.registration_failed(peer_id, &err.to_string()))
    }

    fn probe_endpoints(&self, base_addresses: &[String]) -> Result<Vec<String>> {
        base_addresses
            .iter()
            .map(|address| {
                if address.trim().is_empty() {
                    return Err(ProbeError::InvalidTarget {
                        target: address.clone(),
                        reason: "base address is blank".to_string(),
                    });
                }
                Ok(self.config.probe_endpoint(address))
            })
            .collect()
    }

    /// Start probing `targets` as given, without a health monitor.
    pub fn add_peer(
        &self,
        peer_id: &str,
        targets: Vec<String>,
        sampling_interval: Duration,
    ) -> Result<Arc<PeerStatus>> {
        self.insert(peer_id, targets, sampling_interval, false)
    }

    fn insert(
        &self,
        peer_id: &str,
        targets: Vec<String>,
        sampling_interval: Duration,
        monitored: bool,
    ) -> Result<Arc<PeerStatus>> {
        if targets.is_empty() {
            return Err(ProbeError::EmptyTargets);
        }
        for target in &targets {
            self.probe.validate_target(target)?;
        }
        if sampling_interval.is_zero() {
            return Err(ProbeError::InvalidConfig(
                "sampling interval must be non-zero".to_string(),
            ));
        }

        let status = Arc::new(PeerStatus::new(peer_id));
        let probe_task = spawn_probe_loop(
            self.probe.clone(),
            status.clone(),
            targets.clone(),
            sampling_interval,
        );
        let monitor_task = monitored.then(|| {
            spawn_monitor(
                status.clone(),
                MonitorPolicy::from_config(&self.config),
                self.sink.clone(),
            )
        });

        let entry = PeerProbe {
            peer_id: peer_id.to_string(),
            targets,
            sampling_interval,
            status: status.clone(),
            probe_task,
            monitor_task,
        };

        if let Some(previous) = self.probes.write().insert(peer_id.to_string(), entry) {
            previous.stop();
            debug!("Replaced probe for peer {}", peer_id);
        }
        info!(
            "Probing peer {} every {:?} (monitored: {})",
            peer_id, sampling_interval, monitored
        );

        Ok(status)
    }

    /// Live status handle of a registered peer.
    pub fn status(&self, peer_id: &str) -> Result<Arc<PeerStatus>> {
        self.probes
            .read()
            .get(peer_id)
            .map(PeerProbe::status)
            .ok_or_else(|| ProbeError::NotFound(peer_id.to_string()))
    }

    /// Stop probing a peer; its monitor observes the stop signal and exits.
    pub fn remove_peer(&self, peer_id: &str) -> Result<()> {
        let removed = self
            .probes
            .write()
            .remove(peer_id)
            .ok_or_else(|| ProbeError::NotFound(peer_id.to_string()))?;
        removed.stop();
        debug!("Removed peer {} from prober", peer_id);
        Ok(())
    }

    pub fn remove_all(&self) {
        let drained: Vec<PeerProbe> = self
            .probes
            .write()
            .drain()
            .map(|(_, probe)| probe)
            .collect();
        for probe in &drained {
            probe.stop();
        }
        if !drained.is_empty() {
            debug!("Removed {} peers from prober", drained.len());
        }
    }

    /// Discard a peer's samples; it reads as not yet probed until the next attempt.
    pub fn reset(&self, peer_id: &str) -> Result<()> {
        self.status(peer_id)?.reset();
        Ok(())
    }

    /// Liveness signal: latest reachability verdict for a peer.
    pub fn is_healthy(&self, peer_id: &str) -> bool {
        self.probes
            .read()
            .get(peer_id)
            .is_some_and(|probe| probe.status.is_healthy())
    }

    pub fn is_monitored(&self, peer_id: &str) -> bool {
        self.probes
            .read()
            .get(peer_id)
            .is_some_and(PeerProbe::is_monitored)
    }

    /// Targets probed for a peer, with the probing path applied.
    pub fn targets(&self, peer_id: &str) -> Result<Vec<String>> {
        self.probes
            .read()
            .get(peer_id)
            .map(|probe| probe.targets().to_vec())
            .ok_or_else(|| ProbeError::NotFound(peer_id.to_string()))
    }

    pub fn sampling_interval(&self, peer_id: &str) -> Result<Duration> {
        self.probes
            .read()
            .get(peer_id)
            .map(PeerProbe::sampling_interval)
            .ok_or_else(|| ProbeError::NotFound(peer_id.to_string()))
    }

    /// Registered peer IDs, sorted.
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.probes.read().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Peers whose probe task is still sampling.
    pub fn running_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .probes
            .read()
            .values()
            .filter(|probe| probe.is_running())
            .map(|probe| probe.peer_id().to_string())
            .collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.probes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.read().is_empty()
    }
}

impl Drop for ProbeRegistry {
    fn drop(&mut self) {
        for probe in self.probes.get_mut().values() {
            probe.stop();
        }
    }
}
