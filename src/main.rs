//! Mender - closed-loop fault remediation engine
//!
//! Samples health from a metric source, runs the healing loop on a fixed
//! cadence and serves a read-mostly HTTP status surface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use mender::api::{self, ApiState};
use mender::config::{self, EngineConfig};
use mender::coordinator::{restore_detector, JournalTarget, SelfHealingCoordinator};
use mender::monitor::HealthMonitor;
use mender::storage::open_store;
use mender::telemetry::{HostMetricSource, MetricSource, StdinMetricSource, SyntheticMetricSource};

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "mender")]
#[command(about = "Closed-loop fault remediation engine")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides MENDER_CONFIG and ./mender.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Read JSON-line metric samples from stdin
    #[arg(long, conflicts_with = "synthetic")]
    stdin: bool,

    /// Generate synthetic samples inside the normal envelope
    #[arg(long)]
    synthetic: bool,

    /// Inject a synthetic fault spike as the N-th sample (with --synthetic)
    #[arg(long, value_name = "N", requires = "synthetic")]
    spike_at: Option<u64>,

    /// HTTP listen address (overrides server.addr)
    #[arg(long, value_name = "HOST:PORT", env = "MENDER_ADDR")]
    addr: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load_from_file(p)
            .with_context(|| format!("loading config {}", p.display())),
        None => Ok(EngineConfig::load()),
    }
}

/// Fault spike used by `--spike-at`
fn demo_spike() -> mender::HealthMetrics {
    mender::HealthMetrics {
        memory_usage: 0.97,
        error_rate: 22.0,
        response_time: 9_000.0,
        ..Default::default()
    }
}

fn select_source(args: &CliArgs, config: &EngineConfig) -> Box<dyn MetricSource> {
    if args.stdin {
        info!("Input: stdin (JSON lines)");
        Box::new(StdinMetricSource::new())
    } else if args.synthetic {
        info!(spike_at = ?args.spike_at, "Input: synthetic generator");
        let source = SyntheticMetricSource::new(config.detector.envelope.clone(), config.detector.seed);
        Box::new(match args.spike_at {
            Some(at) => source.with_spike(at, demo_spike()),
            None => source,
        })
    } else {
        info!("Input: host telemetry");
        Box::new(HostMetricSource::new())
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.json);

    let engine_config = load_config(args.config.as_ref())?;
    config::init(engine_config.clone());
    let config = config::get();

    info!(version = env!("CARGO_PKG_VERSION"), "Mender starting");

    let store = open_store(&config.storage)
        .with_context(|| format!("opening pattern store at {}", config.storage.path))?;
    let detector = Arc::new(restore_detector(config.detector.clone(), store.as_ref()));
    let monitor = Arc::new(HealthMonitor::new(config.monitor.clone()));
    let target = Arc::new(
        JournalTarget::open(&config.healing, config.sandbox.default_timeout_ms)
            .context("opening apply journal")?,
    );
    let coordinator = Arc::new(
        SelfHealingCoordinator::new(config, monitor, detector, target)?.with_store(store),
    );

    // Graceful shutdown via Ctrl+C
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for Ctrl+C");
                return;
            }
            info!("Received Ctrl+C, shutting down");
            cancel.cancel();
        });
    }

    let server = if config.server.enabled {
        let addr = args.addr.clone().unwrap_or_else(|| config.server.addr.clone());
        let state = ApiState {
            coordinator: Arc::clone(&coordinator),
        };
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::serve(&addr, state, cancel).await {
                warn!(addr = %addr, error = %e, "HTTP API stopped");
            }
        }))
    } else {
        None
    };

    let source = select_source(&args, config);
    let result = Arc::clone(&coordinator).run(source, cancel.clone()).await;
    cancel.cancel();

    if let Some(server) = server {
        if let Err(e) = server.await {
            warn!(error = %e, "HTTP task ended abnormally");
        }
    }

    let stats = coordinator.healing_stats();
    info!(
        anomalies = stats.anomalies_detected,
        bugs = stats.bugs_found,
        applied = stats.patches_applied,
        rejected = stats.apply_failures,
        "Mender stopped"
    );
    result.map_err(Into::into)
}
