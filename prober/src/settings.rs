use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File as ConfigFile};
use ippan_probing::ProbeConfig;
use serde::Deserialize;
use std::path::Path;

/// A cluster member to probe.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerEntry {
    pub id: String,
    pub addresses: Vec<String>,
}

impl PeerEntry {
    /// Parse `ID=ADDR[,ADDR...]` as given on the command line.
    pub fn parse(raw: &str) -> Result<Self> {
        let (id, addresses) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("peer {raw:?} must be written as ID=ADDR[,ADDR...]"))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(anyhow!("peer {raw:?} has an empty id"));
        }
        let addresses = addresses
            .split(',')
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self {
            id: id.to_string(),
            addresses,
        })
    }
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub node_id: String,
    /// Address serving the probing endpoint and `/metrics`
    pub listen_address: String,
    pub peers: Vec<PeerEntry>,
    pub probing: ProbeConfig,

    // Logging
    pub log_level: String,
    pub log_format: String,

    // Observability
    pub prometheus_enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: "prober".to_string(),
            listen_address: "127.0.0.1:9480".to_string(),
            peers: Vec::new(),
            probing: ProbeConfig::default(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            prometheus_enabled: true,
        }
    }
}

impl AppConfig {
    /// Load from an optional config file, then `PROBER_*` environment variables
    /// (nested keys use `__`, e.g. `PROBER_PROBING__FAST_INTERVAL_MS`).
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_path {
            if !path.exists() {
                anyhow::bail!("Configuration file {} not found", path.display());
            }
            builder = builder.add_source(ConfigFile::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("PROBER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("failed to assemble configuration sources")?
            .try_deserialize()
            .context("invalid prober configuration")?;
        config.probing.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn parse_peer_with_multiple_addresses() {
        let peer = PeerEntry::parse("node-b=http://10.0.0.2:9000, http://10.0.0.3:9000").unwrap();
        assert_eq!(peer.id, "node-b");
        assert_eq!(
            peer.addresses,
            vec!["http://10.0.0.2:9000", "http://10.0.0.3:9000"]
        );
    }

    #[test]
    fn parse_peer_rejects_missing_separator_and_id() {
        assert!(PeerEntry::parse("http://10.0.0.2:9000").is_err());
        assert!(PeerEntry::parse("=http://10.0.0.2:9000").is_err());
    }

    #[test]
    fn parse_peer_keeps_empty_address_list() {
        // Rejected later by the registry, which logs the failure.
        let peer = PeerEntry::parse("node-b=").unwrap();
        assert!(peer.addresses.is_empty());
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
node_id = "node-a"
listen_address = "0.0.0.0:9480"
log_format = "compact"

[probing]
fast_interval_ms = 2000
log_style = "plain"

[[peers]]
id = "node-b"
addresses = ["http://10.0.0.2:9000"]
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.listen_address, "0.0.0.0:9480");
        assert_eq!(config.log_format, "compact");
        assert_eq!(config.probing.fast_interval, Duration::from_secs(2));
        assert_eq!(config.probing.steady_interval, Duration::from_secs(30));
        assert_eq!(
            config.peers,
            vec![PeerEntry {
                id: "node-b".to_string(),
                addresses: vec!["http://10.0.0.2:9000".to_string()],
            }]
        );
    }

    #[test]
    fn load_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(AppConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn load_rejects_invalid_probing_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[probing]\nread_timeout_ms = 500").unwrap();
        assert!(AppConfig::load(Some(file.path())).is_err());
    }
}
