use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use panelcast::metrics::{CpuProvider, GpuProvider, MetricsProvider};
use panelcast::orchestrator::{self, RenderOrchestrator, RenderPipeline};
use panelcast::{Compositor, FrameSourceManager, MetricsCollector, ServiceConfig};

/// Render system telemetry onto a USB/HID cooler LCD panel.
#[derive(Debug, Parser)]
#[command(name = "panelcast", version, about)]
struct Cli {
    /// Service configuration file (YAML).
    #[arg(short, long, env = "PANELCAST_CONFIG")]
    config: PathBuf,

    /// Default log filter; `RUST_LOG` takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Err(err) = run(cli).await {
        tracing::error!("{err:#}");
        std::process::exit(1);
    }
}

fn init_tracing(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    let config = ServiceConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Device discovery, media decoding and provider detection all block.
    let setup_path = config_path.clone();
    let setup_config = config.clone();
    let (pipeline, providers) = tokio::task::spawn_blocking(move || -> Result<_> {
        let connectors = orchestrator::default_connectors().context("initialising USB/HID")?;
        let session = orchestrator::open_device(&setup_config, &connectors)
            .context("opening panel")?;
        let (width, height) = (session.profile().width, session.profile().height);

        let frames = FrameSourceManager::from_config_file(&setup_path, width, height)
            .context("loading background")?;
        let compositor = Compositor::new(frames.display());

        let providers: Vec<Box<dyn MetricsProvider>> =
            vec![Box::new(CpuProvider::new()), Box::new(GpuProvider::new())];
        Ok((RenderPipeline::new(session, frames, compositor), providers))
    })
    .await
    .context("setup task failed")??;

    info!(
        profile = %pipeline.session().profile(),
        config = %config_path.display(),
        "Panel ready"
    );

    let collector = MetricsCollector::spawn(providers, config.metrics_interval());
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                signal_cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });

    let summary = RenderOrchestrator::new(pipeline, collector, config.shutdown_timeout())
        .run(cancel)
        .await
        .context("render loop")?;

    info!(frames = summary.frames, skipped = summary.skipped, "Stopped");
    Ok(())
}
