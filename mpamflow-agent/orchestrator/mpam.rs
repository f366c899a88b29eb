//! The MPAM context: discovery, configuration and teardown

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::common::cacheinfo::CacheTopology;
use crate::common::cpumask::CpuMask;
use crate::common::executor::CoreExecutors;
use crate::common::hotplug::CpuHotplug;
use crate::common::irq::IrqController;
use crate::common::mmio::WindowMapper;
use crate::config::PlatformConfig;
use crate::error::{MpamError, Result};
use crate::msc::error_irq::ErrorStats;
use crate::msc::partition::ComponentConfig;
use crate::orchestrator::broadcast::{update_component, Broadcast, ConfigUpdate};
use crate::policy::{ClassSummary, PartitionPolicy, SystemView};
use crate::topology::{
    ClassHandle, ClassType, ComponentHandle, DeviceHandle, SysProps, Topology, TopologyBuilder,
};

/// How the agent reaches the machine
pub struct Platform {
    pub windows: Arc<dyn WindowMapper>,
    pub caches: Arc<dyn CacheTopology>,
    pub irqs: Arc<dyn IrqController>,
    pub possible_cpus: CpuMask,
    /// Pin executor threads to their CPU
    pub pin_threads: bool,
}

pub(crate) struct Running {
    pub topology: Arc<Topology>,
    pub executors: Arc<CoreExecutors>,
}

pub(crate) enum Discovery {
    Idle,
    Building(TopologyBuilder),
    Running(Running),
    Failed,
}

pub(crate) struct Inner {
    pub platform: Platform,
    pub policy: Arc<dyn PartitionPolicy>,
    /// Serialises topology changes: discovery, lifecycle events, enablement
    pub discovery: Mutex<Discovery>,
    pub hotplug: CpuHotplug,
    pub stats: Arc<ErrorStats>,
    pub enabled: AtomicBool,
    pub online: Mutex<CpuMask>,
    pub pending_work: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    pub(crate) fn running(&self) -> Result<(Arc<Topology>, Arc<CoreExecutors>)> {
        match &*self.discovery.lock() {
            Discovery::Running(running) => Ok((
                Arc::clone(&running.topology),
                Arc::clone(&running.executors),
            )),
            _ => Err(MpamError::NotFound("no discovered topology".into())),
        }
    }

    /// Remove the error handlers enablement installed
    fn free_error_irqs(&self, running: &Running) {
        for device in running.topology.devices() {
            let state = device.lock();
            if let (true, Some(irq)) = (state.enable_error_irq, state.error_irq) {
                self.platform
                    .irqs
                    .free_irq(irq.line, &error_irq_name(device.handle()));
            }
        }
    }
}

/// Handle to the MPAM driver state, cheap to clone
#[derive(Clone)]
pub struct Mpam {
    pub(crate) inner: Arc<Inner>,
}

impl Mpam {
    pub fn new(platform: Platform, policy: Arc<dyn PartitionPolicy>) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                policy,
                discovery: Mutex::new(Discovery::Idle),
                hotplug: CpuHotplug::new(),
                stats: Arc::new(ErrorStats::new()),
                enabled: AtomicBool::new(false),
                online: Mutex::new(CpuMask::new()),
                pending_work: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Begin discovery with the limits the CPUs report
    ///
    /// `max_partid` is `None` when the CPUs do not implement MPAM.
    pub fn discovery_start(&self, max_partid: Option<u16>, max_pmg: u8) -> Result<()> {
        let max_partid = max_partid
            .ok_or_else(|| MpamError::DiscoveryFailed("CPUs do not support MPAM".into()))?;

        let mut discovery = self.inner.discovery.lock();
        match &*discovery {
            Discovery::Idle | Discovery::Failed => {}
            _ => {
                return Err(MpamError::DiscoveryFailed(
                    "discovery already started".into(),
                ))
            }
        }
        *discovery = Discovery::Building(TopologyBuilder::new(
            SysProps::new(max_partid, max_pmg),
            self.inner.platform.possible_cpus.clone(),
        ));
        tracing::info!(
            "Discovery started: max_partid {}, max_pmg {}",
            max_partid,
            max_pmg
        );
        Ok(())
    }

    fn with_builder<R>(&self, f: impl FnOnce(&mut TopologyBuilder) -> Result<R>) -> Result<R> {
        match &mut *self.inner.discovery.lock() {
            Discovery::Building(builder) => f(builder),
            _ => Err(MpamError::DiscoveryFailed(
                "MSCs can only be added during discovery".into(),
            )),
        }
    }

    /// Register the MSC at `base`
    pub fn device_create(
        &self,
        level: u8,
        class_type: ClassType,
        component_id: u32,
        fw_affinity: Option<&CpuMask>,
        base: u64,
    ) -> Result<DeviceHandle> {
        let windows = Arc::clone(&self.inner.platform.windows);
        self.with_builder(|builder| {
            builder.device_create(
                level,
                class_type,
                component_id,
                fw_affinity,
                windows.as_ref(),
                base,
            )
        })
    }

    pub fn set_error_irq(&self, device: DeviceHandle, line: u32, flags: u32) -> Result<()> {
        self.with_builder(|builder| builder.set_error_irq(device, line, flags))
    }

    pub fn set_overflow_irq(&self, device: DeviceHandle, line: u32, flags: u32) -> Result<()> {
        self.with_builder(|builder| builder.set_overflow_irq(device, line, flags))
    }

    /// Register every MSC of a platform description
    ///
    /// An MSC that cannot be created is skipped; the others are kept.
    pub fn discover_platform(&self, config: &PlatformConfig) -> Result<()> {
        self.discovery_start(config.max_partid, config.max_pmg)?;

        for msc in &config.devices {
            let device = match self.device_create(
                msc.level,
                msc.class,
                msc.component_id,
                msc.affinity.as_ref(),
                msc.base_address,
            ) {
                Ok(device) => device,
                Err(e) => {
                    tracing::warn!("Skipping MSC at 0x{:x}: {}", msc.base_address, e);
                    continue;
                }
            };
            if let Some(irq) = msc.error_irq {
                self.set_error_irq(device, irq.line, irq.flags())?;
            }
            if let Some(irq) = msc.overflow_irq {
                self.set_overflow_irq(device, irq.line, irq.flags())?;
            }
        }
        Ok(())
    }

    /// Freeze the topology, start the executors and bring `online` CPUs up
    pub fn discovery_complete(&self, online: &CpuMask) -> Result<()> {
        {
            let mut discovery = self.inner.discovery.lock();
            let builder = match std::mem::replace(&mut *discovery, Discovery::Idle) {
                Discovery::Building(builder) => builder,
                other => {
                    *discovery = other;
                    return Err(MpamError::DiscoveryFailed("discovery not started".into()));
                }
            };

            let topology = match builder.build() {
                Ok(topology) => Arc::new(topology),
                Err(e) => {
                    *discovery = Discovery::Failed;
                    return Err(e);
                }
            };
            let platform = &self.inner.platform;
            let executors =
                match CoreExecutors::spawn(&platform.possible_cpus, platform.pin_threads) {
                    Ok(executors) => Arc::new(executors),
                    Err(e) => {
                        *discovery = Discovery::Failed;
                        return Err(e);
                    }
                };

            tracing::info!(
                "Discovery complete: {} classes, {} MSCs",
                topology.classes().len(),
                topology.devices().len()
            );
            *discovery = Discovery::Running(Running {
                topology,
                executors,
            });
        }

        let online = online.and(&self.inner.platform.possible_cpus);
        for cpu in online.iter() {
            if let Err(e) = self.cpu_online(cpu) {
                tracing::warn!("Bringing up CPU {} failed: {}", cpu, e);
            }
        }
        Ok(())
    }

    /// Tear down everything discovery built
    pub fn discovery_failed(&self) {
        let previous = std::mem::replace(&mut *self.inner.discovery.lock(), Discovery::Failed);
        if let Discovery::Running(running) = previous {
            self.inner.free_error_irqs(&running);
            running.executors.shutdown();
        }
        self.inner.online.lock().clear_all();
        tracing::warn!("Discovery failed, topology torn down");
    }

    /// Program one value into every MSC of a component
    pub fn apply(
        &self,
        class: ClassHandle,
        component: ComponentHandle,
        cfg: ComponentConfig,
    ) -> Result<()> {
        self.update(class, component, ConfigUpdate::Apply(cfg))
    }

    /// Reset every MSC of a component
    pub fn reset_component(&self, class: ClassHandle, component: ComponentHandle) -> Result<()> {
        self.update(class, component, ConfigUpdate::Reset)
    }

    fn update(
        &self,
        class: ClassHandle,
        component: ComponentHandle,
        update: ConfigUpdate,
    ) -> Result<()> {
        let hotplug = self.inner.hotplug.lock()?;
        let (topology, executors) = self.inner.running()?;
        if topology.lookup(class, component).is_none() {
            return Err(MpamError::NotFound(format!(
                "component {component:?} of class {class:?}"
            )));
        }

        let broadcast = Arc::new(Broadcast {
            topology,
            policy: Arc::clone(&self.inner.policy),
            component,
            update,
        });
        update_component(&executors, &hotplug, broadcast)
    }

    /// Reset every component of every class
    pub fn reset_devices(&self) -> Result<()> {
        let hotplug = self.inner.hotplug.lock()?;
        let (topology, executors) = self.inner.running()?;

        for class in topology.classes() {
            for &component in class.components() {
                let broadcast = Arc::new(Broadcast {
                    topology: Arc::clone(&topology),
                    policy: Arc::clone(&self.inner.policy),
                    component,
                    update: ConfigUpdate::Reset,
                });
                update_component(&executors, &hotplug, broadcast)?;
            }
        }
        Ok(())
    }

    /// Wait for deferred work such as enablement to finish
    pub fn flush_work(&self) {
        loop {
            let pending: Vec<_> = self.inner.pending_work.lock().drain(..).collect();
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                let _ = handle.join();
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn topology(&self) -> Option<Arc<Topology>> {
        self.inner.running().ok().map(|(topology, _)| topology)
    }

    pub fn executors(&self) -> Option<Arc<CoreExecutors>> {
        self.inner.running().ok().map(|(_, executors)| executors)
    }

    pub fn possible_cpus(&self) -> CpuMask {
        self.inner.platform.possible_cpus.clone()
    }

    pub fn online_cpus(&self) -> CpuMask {
        self.inner.online.lock().clone()
    }

    pub fn error_stats(&self) -> Arc<ErrorStats> {
        Arc::clone(&self.inner.stats)
    }

    /// What the policy layer was handed, once enabled
    pub fn system_view(&self) -> Option<SystemView> {
        if !self.is_enabled() {
            return None;
        }
        self.topology().map(|topology| system_view(&topology))
    }

    /// Release interrupt handlers and stop the executors
    pub fn shutdown(&self) {
        self.flush_work();
        let previous = std::mem::replace(&mut *self.inner.discovery.lock(), Discovery::Idle);
        if let Discovery::Running(running) = previous {
            self.inner.free_error_irqs(&running);
            running.executors.shutdown();
        }
        tracing::info!("MPAM shut down");
    }
}

pub(crate) fn error_irq_name(device: DeviceHandle) -> String {
    format!("mpam:{device}")
}

pub(crate) fn system_view(topology: &Topology) -> SystemView {
    let sysprops = topology.sysprops();
    SystemView {
        max_partid: sysprops.max_partid,
        max_pmg: sysprops.max_pmg,
        llc_size: sysprops.llc_size,
        classes: topology
            .classes()
            .iter()
            .filter_map(|class| {
                class.props().map(|props| ClassSummary {
                    handle: class.handle(),
                    class_type: class.class_type(),
                    level: class.level(),
                    props,
                })
            })
            .collect(),
    }
}
