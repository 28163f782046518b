//! IPPAN Peer Probing
//!
//! Keeps an active reachability probe against every remote peer and a
//! background health monitor that reports unreachable peers, clock drift and
//! round-trip latency.
//!
//! ## Modules
//! - `config`: Probing intervals, thresholds and endpoint path
//! - `status`: Live per-peer status handle and stop signal
//! - `probe`: Probe trait, HTTP prober and the sampling loop
//! - `monitor`: Adaptive per-peer health monitor
//! - `registry`: Peer registration, removal and liveness queries
//! - `sink`: Injected logging and metrics capability
//! - `handler`: HTTP endpoint answering probes from other nodes

pub mod config;
pub mod error;
pub mod handler;
pub mod monitor;
pub mod probe;
pub mod registry;
pub mod sink;
pub mod status;

// ------------------------------------------------------------
// Re-exports for workspace-wide use
// ------------------------------------------------------------

// Configuration & errors
pub use config::{LogStyle, ProbeConfig, DEFAULT_PROBING_PATH, SAMPLING_MARGIN};
pub use error::ProbeError;

// Probing
pub use handler::probing_router;
pub use probe::{spawn_probe_loop, HttpProbe, Probe, ProbeReply};
pub use registry::{PeerProbe, ProbeRegistry};
pub use status::{PeerStatus, StatusSnapshot, StopSignal};

// Monitoring & observability
pub use monitor::{spawn_monitor, MonitorPolicy, MonitorTask, PollState};
pub use sink::{MonitorEvent, MonitorSink, RecordingSink, TracingSink, PEER_RTT_METRIC};
