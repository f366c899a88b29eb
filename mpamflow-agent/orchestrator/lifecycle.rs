//! CPU online/offline handling and system-wide enablement
//!
//! The first CPU to reach an MSC probes it and resets it. Once every MSC
//! has been probed, enablement reconciles the class capabilities, installs
//! the error interrupt handlers and hands over to the policy layer. The last
//! CPU to leave an MSC turns its error interrupt off.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::common::executor::CoreExecutors;
use crate::common::irq::{IrqHandler, IrqReturn, IrqTrigger};
use crate::error::{MpamError, Result};
use crate::msc::error_irq::{handle_error_irq, ErrorStats};
use crate::msc::partition::{disable_error_irq, enable_error_irq};
use crate::msc::probe::probe;
use crate::orchestrator::broadcast::reset_msc;
use crate::orchestrator::mpam::{error_irq_name, system_view, Discovery, Inner, Mpam, Running};
use crate::policy::PartitionPolicy;
use crate::topology::reconcile::reconcile_all;
use crate::topology::{ClassType, ComponentHandle, DeviceHandle, Topology};

#[derive(Default)]
struct OnlineOutcome {
    newly_probed: bool,
    first_error: Option<MpamError>,
}

/// Probe and reset the MSCs `cpu` is the first to reach; runs on `cpu`
fn online_devices(
    topology: &Topology,
    policy: &dyn PartitionPolicy,
    components: &[ComponentHandle],
    cpu: u32,
) -> OnlineOutcome {
    let mut outcome = OnlineOutcome::default();

    for &component in components {
        for device in topology.devices_of(component) {
            if !device.fw_affinity().test(cpu) {
                continue;
            }
            let mut access = match device.access() {
                Ok(access) => access,
                Err(e) => {
                    outcome.first_error.get_or_insert(e);
                    continue;
                }
            };

            if !access.state().probed {
                match topology.update_sysprops(|sysprops| probe(&mut access, sysprops)) {
                    Ok(()) => outcome.newly_probed = true,
                    Err(e) => {
                        tracing::warn!("{} left unprobed: {}", device.handle(), e);
                        outcome.first_error.get_or_insert(e);
                        continue;
                    }
                }
            }

            if access.state().online_affinity.is_empty() {
                reset_msc(topology, policy, &access);
            }
            access.state_mut().online_affinity.set(cpu);
        }
    }
    outcome
}

/// Drop `cpu` from every MSC it was serving; runs on `cpu`
fn offline_devices(topology: &Topology, cpu: u32) {
    for device in topology.devices() {
        if !device.lock().online_affinity.test(cpu) {
            continue;
        }
        let mut access = match device.access() {
            Ok(access) => access,
            Err(e) => {
                tracing::warn!("{} not reachable while offlining CPU {}: {}", device.handle(), cpu, e);
                continue;
            }
        };
        access.state_mut().online_affinity.clear(cpu);
        if access.state().online_affinity.is_empty() {
            disable_error_irq(&access);
            tracing::debug!("{} has no online CPU left", device.handle());
        }
    }
}

/// Run the error handler of `handle` on a CPU that currently serves it
///
/// An MSC with no online CPU has its interrupt disabled and is left alone.
fn service_error_irq(
    topology: &Arc<Topology>,
    executors: &CoreExecutors,
    stats: &Arc<ErrorStats>,
    handle: DeviceHandle,
) -> IrqReturn {
    let serving = topology.device(handle).lock().online_affinity.first();
    let Some(cpu) = serving else {
        return IrqReturn::None;
    };

    let topology = Arc::clone(topology);
    let stats = Arc::clone(stats);
    executors
        .run_on(cpu, move || handle_error_irq(topology.device(handle), &stats))
        .unwrap_or_else(|e| {
            tracing::warn!("{}: error interrupt not serviced: {}", handle, e);
            IrqReturn::None
        })
}

impl Inner {
    /// Learn which cache component `cpu` belongs to for every cache class
    fn sync_cache_affinity(&self, topology: &Topology, cpu: u32) {
        let caches = &self.platform.caches;
        for class in topology.classes() {
            if class.class_type() != ClassType::Cache {
                continue;
            }
            let Some(cache_id) = caches.cache_id(cpu, class.level()) else {
                continue;
            };
            let Some(component) = topology.component_get(class.handle(), cache_id) else {
                continue;
            };
            if let Some(size) = caches.cache_size(cpu, class.level()) {
                topology.update_sysprops(|sysprops| sysprops.track_cache_size(size));
            }
            topology.extend_cache_affinity(component.handle(), cpu);
        }
    }

    fn cpu_online(self: &Arc<Self>, cpu: u32) -> Result<()> {
        let _hotplug = self.hotplug.lock()?;
        let outcome = {
            let discovery = self.discovery.lock();
            let Discovery::Running(running) = &*discovery else {
                return Err(MpamError::NotFound("no discovered topology".into()));
            };
            let topology = Arc::clone(&running.topology);

            self.sync_cache_affinity(&topology, cpu);
            let components: Vec<ComponentHandle> = topology
                .classes()
                .iter()
                .flat_map(|class| topology.components_of(class.handle()))
                .filter(|component| component.reaches(cpu))
                .map(|component| component.handle())
                .collect();

            let policy = Arc::clone(&self.policy);
            let outcome = running.executors.run_on(cpu, move || {
                online_devices(&topology, policy.as_ref(), &components, cpu)
            })?;
            self.online.lock().set(cpu);
            outcome
        };

        if outcome.newly_probed {
            self.schedule_enable();
        }
        self.policy.cpu_online(cpu);
        tracing::debug!("CPU {} online", cpu);

        match outcome.first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn cpu_offline(&self, cpu: u32) -> Result<()> {
        let _hotplug = self.hotplug.lock()?;
        {
            let discovery = self.discovery.lock();
            let Discovery::Running(running) = &*discovery else {
                return Err(MpamError::NotFound("no discovered topology".into()));
            };
            let topology = Arc::clone(&running.topology);
            running
                .executors
                .run_on(cpu, move || offline_devices(&topology, cpu))?;
            self.online.lock().clear(cpu);
        }

        self.policy.cpu_offline(cpu);
        tracing::debug!("CPU {} offline", cpu);
        Ok(())
    }

    /// Run the enablement check off the calling thread
    fn schedule_enable(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("mpam-enable".into())
            .spawn(move || inner.enable());
        match spawned {
            Ok(handle) => self.pending_work.lock().push(handle),
            Err(e) => tracing::error!("Failed to schedule MPAM enable: {}", e),
        }
    }

    fn enable(&self) {
        let hotplug = match self.hotplug.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("MPAM enable: {}", e);
                return;
            }
        };

        let view = {
            let discovery = self.discovery.lock();
            let Discovery::Running(running) = &*discovery else {
                return;
            };
            if self.enabled.load(Ordering::Acquire) {
                return;
            }
            if !running.topology.all_probed() {
                tracing::debug!("Not every MSC is probed yet, enable deferred");
                return;
            }

            reconcile_all(&running.topology);
            self.register_error_irqs(running);
            self.enabled.store(true, Ordering::Release);
            system_view(&running.topology)
        };
        drop(hotplug);

        tracing::info!(
            "MPAM enabled: max_partid {}, max_pmg {}, llc_size {}",
            view.max_partid,
            view.max_pmg,
            view.llc_size
        );
        if let Err(e) = self.policy.init(&view) {
            tracing::error!("Partition policy failed to initialise: {}", e);
        }
    }

    /// Install error handlers and turn on error interrupts where a CPU is
    /// already serving the MSC
    fn register_error_irqs(&self, running: &Running) {
        let topology = &running.topology;
        for device in topology.devices() {
            let Some(irq) = device.lock().error_irq else {
                continue;
            };

            if irq.trigger() == IrqTrigger::Level
                && !topology.possible_cpus().is_subset_of(device.fw_affinity())
            {
                tracing::warn!(
                    "{}: level-triggered error interrupt {} cannot be cleared from every CPU, not registering",
                    device.handle(),
                    irq.line
                );
                continue;
            }
            let Some(target) = device.fw_affinity().first() else {
                continue;
            };

            let handle = device.handle();
            let handler_topology = Arc::clone(topology);
            let executors = Arc::clone(&running.executors);
            let stats = Arc::clone(&self.stats);
            let handler: IrqHandler = Arc::new(move || {
                service_error_irq(&handler_topology, &executors, &stats, handle)
            });

            if let Err(e) = self.platform.irqs.request_irq(
                irq.line,
                irq.trigger(),
                target,
                &error_irq_name(handle),
                handler,
            ) {
                tracing::warn!("{}: failed to register error interrupt: {}", handle, e);
                continue;
            }

            let online = {
                let mut state = device.lock();
                state.enable_error_irq = true;
                state.online_affinity.first()
            };
            if let Some(cpu) = online {
                let topology = Arc::clone(topology);
                let result = running.executors.run_on(cpu, move || -> Result<()> {
                    let access = topology.device(handle).access()?;
                    enable_error_irq(&access);
                    Ok(())
                });
                if let Err(e) = result.and_then(|r| r) {
                    tracing::warn!("{}: failed to enable error interrupt: {}", handle, e);
                }
            }
        }
    }
}

impl Mpam {
    /// Handle `cpu` coming online
    pub fn cpu_online(&self, cpu: u32) -> Result<()> {
        self.inner.cpu_online(cpu)
    }

    /// Handle `cpu` going offline
    pub fn cpu_offline(&self, cpu: u32) -> Result<()> {
        self.inner.cpu_offline(cpu)
    }
}
