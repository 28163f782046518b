use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use clap::{value_parser, Arg, ArgAction, Command};
use ippan_probing::{probing_router, ProbeRegistry, TracingSink, PEER_RTT_METRIC};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod settings;

use settings::{AppConfig, PeerEntry};

/// Lower bound of the RTT histogram; buckets double from here.
const RTT_BUCKET_START: f64 = 0.0001;
const RTT_BUCKET_COUNT: i32 = 14;

fn cli() -> Command {
    Command::new("ippan-prober")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Probe IPPAN peers for reachability, latency and clock drift")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .help("Override the address serving the probing endpoint"),
        )
        .arg(
            Arg::new("peer")
                .long("peer")
                .value_name("ID=ADDR[,ADDR...]")
                .action(ArgAction::Append)
                .help("Additional peer to probe (repeatable)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "compact"])
                .help("Select log output format"),
        )
        .arg(
            Arg::new("disable-metrics")
                .long("disable-metrics")
                .action(ArgAction::SetTrue)
                .help("Disable the Prometheus metrics endpoint"),
        )
}

fn apply_overrides(config: &mut AppConfig, matches: &clap::ArgMatches) -> Result<()> {
    if let Some(listen) = matches.get_one::<String>("listen") {
        config.listen_address = listen.clone();
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.log_format = format.clone();
    }
    if matches.get_flag("disable-metrics") {
        config.prometheus_enabled = false;
    }
    if let Some(peers) = matches.get_many::<String>("peer") {
        for raw in peers {
            config.peers.push(PeerEntry::parse(raw)?);
        }
    }
    Ok(())
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "compact" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().compact())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()?;
    }

    Ok(())
}

fn rtt_buckets() -> Vec<f64> {
    (0..RTT_BUCKET_COUNT)
        .map(|exp| RTT_BUCKET_START * 2f64.powi(exp))
        .collect()
}

fn init_metrics(config: &AppConfig) -> Option<PrometheusHandle> {
    if !config.prometheus_enabled {
        info!("Prometheus metrics exporter disabled via configuration");
        return None;
    }

    let installed = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(PEER_RTT_METRIC.to_string()), &rtt_buckets())
        .and_then(|builder| builder.install_recorder());
    match installed {
        Ok(handle) => {
            info!("Prometheus metrics exporter registered");
            TracingSink::describe_metrics();
            Some(handle)
        }
        Err(err) => {
            warn!("Failed to install Prometheus metrics exporter: {}", err);
            None
        }
    }
}

fn build_router(config: &AppConfig, metrics: Option<PrometheusHandle>) -> Router {
    let mut router = probing_router(&config.probing.probing_path);
    if let Some(handle) = metrics {
        router = router.route("/metrics", get(move || async move { handle.render() }));
    }
    router
}

/// Register every configured peer. Failures are reported by the registry's
/// sink and do not stop the remaining registrations.
fn register_peers(registry: &ProbeRegistry, peers: &[PeerEntry]) -> usize {
    peers
        .iter()
        .filter(|peer| registry.register_peer(&peer.id, &peer.addresses).is_ok())
        .count()
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<PathBuf>("config").map(PathBuf::as_path);
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(&mut config, &matches)?;

    init_logging(&config)?;
    let metrics = init_metrics(&config);

    info!(
        "Starting IPPAN prober {} for node {}",
        env!("CARGO_PKG_VERSION"),
        config.node_id
    );

    let registry = ProbeRegistry::with_http(config.probing.clone())?;
    let registered = register_peers(&registry, &config.peers);
    info!(
        "Monitoring {}/{} configured peers",
        registered,
        config.peers.len()
    );

    let addr: SocketAddr = config
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address {}", config.listen_address))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind probing listener on {addr}"))?;
    info!(
        "Serving probing endpoint on http://{}{}",
        addr, config.probing.probing_path
    );

    axum::serve(listener, build_router(&config, metrics))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", err);
            }
        })
        .await
        .context("probing server terminated unexpectedly")?;

    info!("Shutting down IPPAN prober");
    registry.remove_all();
    Ok(())
}
