// Supervisor loop
// Follows CPU hotplug, services error lines and refreshes metrics on a
// single interval

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::common::cpumask::CpuMask;
use crate::common::irq::SoftIrqController;
use crate::orchestrator::Mpam;
use crate::prom::MpamMetricExporter;

/// Where the supervisor learns which CPUs are online
#[derive(Clone)]
pub enum CpuSource {
    /// A sysfs cpu-list file such as /sys/devices/system/cpu/online
    Sysfs(PathBuf),
    /// A mask someone else updates, for simulation
    Fixed(Arc<Mutex<CpuMask>>),
}

impl CpuSource {
    pub fn sysfs() -> Self {
        CpuSource::Sysfs(PathBuf::from("/sys/devices/system/cpu/online"))
    }

    fn online(&self) -> Option<CpuMask> {
        match self {
            CpuSource::Sysfs(path) => std::fs::read_to_string(path)
                .ok()
                .and_then(|s| CpuMask::parse_cpu_list(&s)),
            CpuSource::Fixed(mask) => Some(mask.lock().clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct MpamSupervisor {
    config: SupervisorConfig,
    mpam: Mpam,
    cpus: CpuSource,
    irqs: Option<Arc<SoftIrqController>>,
    exporter: Option<Arc<MpamMetricExporter>>,
}

impl MpamSupervisor {
    pub fn new(config: SupervisorConfig, mpam: Mpam, cpus: CpuSource) -> Self {
        Self {
            config,
            mpam,
            cpus,
            irqs: None,
            exporter: None,
        }
    }

    /// Poll these error lines every tick
    pub fn with_irqs(mut self, irqs: Arc<SoftIrqController>) -> Self {
        self.irqs = Some(irqs);
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<MpamMetricExporter>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn exporter(&self) -> Option<Arc<MpamMetricExporter>> {
        self.exporter.clone()
    }

    /// Start the supervisor loop
    pub fn start(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tracing::warn!("Starting MPAM supervisor");

        tokio::spawn(async move {
            self.supervise_loop(cancel_token).await;
        })
    }

    async fn supervise_loop(self, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    tracing::info!("Supervisor loop cancelled");
                    break;
                }
                _ = interval.tick() => {}
            }

            // Lifecycle work blocks on the per-CPU executors
            let this = self.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || this.supervise_once()).await {
                tracing::error!("Supervisor tick failed: {}", e);
            }

            if let Some(exporter) = &self.exporter {
                exporter.collect().await;
            }
        }
    }

    /// Replay CPU hotplug since the last tick, then service error lines
    pub fn supervise_once(&self) {
        if let Some(online) = self.cpus.online() {
            let online = online.and(&self.mpam.possible_cpus());
            let current = self.mpam.online_cpus();

            for cpu in current.difference(&online).iter() {
                if let Err(e) = self.mpam.cpu_offline(cpu) {
                    tracing::warn!("Offlining CPU {} failed: {}", cpu, e);
                }
            }
            for cpu in online.difference(&current).iter() {
                if let Err(e) = self.mpam.cpu_online(cpu) {
                    tracing::warn!("Onlining CPU {} failed: {}", cpu, e);
                }
            }
        }

        if let Some(irqs) = &self.irqs {
            for line in irqs.lines() {
                irqs.raise(line);
            }
        }
    }
}
