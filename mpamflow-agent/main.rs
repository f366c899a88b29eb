use anyhow::Context;
use axum::{response::IntoResponse, routing::get, Router};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use mpamflow::common::{DevMem, SoftIrqController, SysfsCacheTopology};
use mpamflow::config::detect_online_cpus;
use mpamflow::sim::Simulation;
use mpamflow::{
    CpuSource, Mpam, MpamMetricExporter, MpamSupervisor, Platform, PlatformConfig, StaticPolicy,
    SupervisorConfig,
};

#[derive(Parser, Debug)]
#[command(name = "mpamflow")]
#[command(about = "Discovery and partition control for Arm MPAM memory-system components")]
struct Args {
    #[arg(long, help = "Platform description (JSON) listing the MSCs")]
    platform: PathBuf,

    #[arg(
        long,
        help = "Run against simulated MSCs built from the platform description"
    )]
    simulate: bool,

    #[arg(long, default_value_t = 8080, help = "Port for the /metrics endpoint")]
    port: u16,

    #[arg(
        long,
        default_value_t = 1000,
        help = "Supervisor interval: hotplug polling, error lines and metrics"
    )]
    interval_ms: u64,

    #[arg(
        short,
        long,
        help = "Enable verbose logging (shows every MSC register access)"
    )]
    verbose: bool,
}

struct AppState {
    mpam_exporter: Arc<MpamMetricExporter>,
}

async fn metrics_handler(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    let metric_families = state.mpam_exporter.registry().gather();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode MPAM metrics: {}", e);
    }

    let content_type = encoder.format_type().to_string();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

fn check_permissions() -> anyhow::Result<()> {
    let devmem = "/dev/mem";
    match std::fs::OpenOptions::new().read(true).write(true).open(devmem) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(anyhow::anyhow!(
            "Permission denied accessing {devmem}; run as root or use --simulate"
        )),
        Err(e) => Err(e).with_context(|| format!("Cannot open {devmem}")),
    }
}

/// Build the machine the agent drives
///
/// Error lines are serviced by polling the returned controller.
fn init_platform(
    args: &Args,
    config: &PlatformConfig,
) -> anyhow::Result<(Platform, CpuSource, Arc<SoftIrqController>)> {
    let possible_cpus = config.possible_cpus();

    if args.simulate {
        let sim = Simulation::from_config(config);
        let online = Arc::new(parking_lot::Mutex::new(possible_cpus.clone()));
        let irqs = Arc::clone(&sim.irqs);
        return Ok((sim.platform(possible_cpus), CpuSource::Fixed(online), irqs));
    }

    check_permissions()?;
    let irqs = Arc::new(SoftIrqController::new());
    let platform = Platform {
        windows: Arc::new(DevMem::instance()),
        caches: Arc::new(SysfsCacheTopology::default()),
        irqs: Arc::clone(&irqs) as _,
        possible_cpus,
        pin_threads: true,
    };
    Ok((platform, CpuSource::sysfs(), irqs))
}

/// Discover every MSC and bring the online CPUs up
fn init_mpam(mpam: &Mpam, config: &PlatformConfig, online: &CpuSource) -> anyhow::Result<()> {
    let online = match online {
        CpuSource::Fixed(mask) => mask.lock().clone(),
        CpuSource::Sysfs(_) => detect_online_cpus(),
    };

    let discovered = mpam
        .discover_platform(config)
        .and_then(|()| mpam.discovery_complete(&online));
    if let Err(e) = discovered {
        mpam.discovery_failed();
        return Err(e).context("MPAM discovery failed");
    }

    mpam.flush_work();
    if mpam.is_enabled() {
        // Push the static configuration out now that the policy holds it
        mpam.reset_devices()
            .context("Failed to apply static partition configuration")?;
    } else {
        tracing::warn!("Not every MSC could be probed yet, MPAM stays disabled");
    }
    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    tracing::info!("Installing signal handlers...");

    let ctrl_c = async {
        tracing::debug!("Waiting for Ctrl+C...");
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Ctrl+C received!");
    };

    #[cfg(unix)]
    let terminate = async {
        tracing::debug!("Waiting for SIGTERM...");
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
        tracing::info!("SIGTERM received!");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Shutdown triggered by Ctrl+C");
        },
        _ = terminate => {
            tracing::warn!("Shutdown triggered by SIGTERM");
        },
    }

    tracing::warn!("Shutdown signal received, initiating graceful shutdown...");
    cancel_token.cancel();
    tracing::warn!("Cancellation token activated");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging based on verbose flag
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(log_level).init();

    let config = PlatformConfig::load(&args.platform)
        .with_context(|| format!("Failed to load {}", args.platform.display()))?;
    let (platform, cpus, irqs) = init_platform(&args, &config)?;
    let policy = Arc::new(StaticPolicy::new(config.partition_entries()));
    let mpam = Mpam::new(platform, policy);

    tracing::info!(
        "{} MSCs described, {} possible CPUs, simulate: {}",
        config.devices.len(),
        config.possible_cpus().weight(),
        args.simulate
    );

    // Discovery blocks on the per-CPU executors
    let setup = (mpam.clone(), config.clone(), cpus.clone());
    tokio::task::spawn_blocking(move || {
        let (mpam, config, cpus) = setup;
        init_mpam(&mpam, &config, &cpus)
    })
    .await
    .context("Discovery task panicked")??;

    let exporter = Arc::new(MpamMetricExporter::new(mpam.clone())?);
    let supervisor = MpamSupervisor::new(
        SupervisorConfig {
            interval: Duration::from_millis(args.interval_ms),
        },
        mpam.clone(),
        cpus,
    )
    .with_exporter(Arc::clone(&exporter))
    .with_irqs(irqs);

    let cancel_token = CancellationToken::new();
    let supervisor_handle = supervisor.start(cancel_token.clone());

    let app_state = Arc::new(AppState {
        mpam_exporter: exporter,
    });

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::warn!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;

    tracing::info!("Server shutdown complete, waiting for supervisor to finish...");

    let _ = supervisor_handle.await;
    tokio::task::spawn_blocking(move || mpam.shutdown()).await?;

    tracing::info!("All tasks completed, exiting");

    Ok(())
}
