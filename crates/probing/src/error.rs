use thiserror::Error;

/// Errors produced by the probing layer.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe target list is empty")]
    EmptyTargets,
    #[error("invalid probe target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("no probe registered for peer {0}")]
    NotFound(String),
    #[error("invalid probing configuration: {0}")]
    InvalidConfig(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("endpoint {endpoint} responded with status {status}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },
    #[error("failed to decode probe reply: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("peer reported itself unhealthy")]
    Unhealthy,
    #[error("no probe completed yet")]
    NoProbeYet,
}

pub type Result<T> = std::result::Result<T, ProbeError>;
