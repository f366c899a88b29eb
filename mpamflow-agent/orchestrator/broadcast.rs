//! Pushing one configuration change to every MSC of a component
//!
//! Each MSC must be programmed from a CPU that can reach it. The update
//! runs on the calling CPU first, then on one online CPU of every MSC not
//! yet covered. A CPU that has run the update covers every MSC whose online
//! affinity includes it, so each MSC is programmed exactly once.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::common::affinity::current_cpu;
use crate::common::cpumask::CpuMask;
use crate::common::executor::CoreExecutors;
use crate::common::hotplug::HotplugGuard;
use crate::error::{MpamError, Result};
use crate::msc::device::RegisterAccess;
use crate::msc::partition::{apply_config, reset_device, ComponentConfig};
use crate::policy::PartitionPolicy;
use crate::topology::{ComponentHandle, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigUpdate {
    /// Every partition id back to its default, then whatever the policy
    /// still holds
    Reset,
    Apply(ComponentConfig),
}

pub(crate) struct Broadcast {
    pub topology: Arc<Topology>,
    pub policy: Arc<dyn PartitionPolicy>,
    pub component: ComponentHandle,
    pub update: ConfigUpdate,
}

#[derive(Default)]
struct UpdateState {
    updated_on: CpuMask,
    first_error: Option<MpamError>,
}

impl UpdateState {
    fn record(&mut self, err: MpamError) {
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }
}

/// Reset an MSC, restoring the policy's configuration for each partid
pub(crate) fn reset_msc(
    topology: &Topology,
    policy: &dyn PartitionPolicy,
    access: &RegisterAccess<'_>,
) {
    let device = access.device();
    let class = topology.class(device.class());
    let component = topology.component(device.component());
    let max_partid = topology.sysprops().max_partid;

    tracing::debug!(
        "Resetting {} (partids 0-{}) from CPU {}",
        device.handle(),
        max_partid,
        access.cpu()
    );
    reset_device(access, max_partid, |partid| {
        policy.converted_config(class, component, partid)
    });
}

/// Update every MSC of the component that is reachable from `cpu`
fn apply_local(broadcast: &Broadcast, state: &Mutex<UpdateState>, cpu: u32) {
    for device in broadcast.topology.devices_of(broadcast.component) {
        let online = device.lock().online_affinity.clone();
        {
            let state = state.lock();
            if state.first_error.is_some() {
                return;
            }
            if !online.test(cpu) || online.intersects(&state.updated_on) {
                continue;
            }
        }

        let result = device.access().and_then(|access| match &broadcast.update {
            ConfigUpdate::Reset => {
                reset_msc(&broadcast.topology, broadcast.policy.as_ref(), &access);
                Ok(())
            }
            ConfigUpdate::Apply(cfg) => apply_config(&access, cfg),
        });
        if let Err(e) = result {
            tracing::warn!("Failed to update {} from CPU {}: {}", device.handle(), cpu, e);
            state.lock().record(e);
        }
    }
    state.lock().updated_on.set(cpu);
}

/// Apply `broadcast.update` to every online MSC of the component
///
/// Stops at the first error and returns it; MSCs already updated keep the
/// new configuration. MSCs with no online CPU are skipped, they are reset
/// when their first CPU comes online.
pub(crate) fn update_component(
    executors: &CoreExecutors,
    _hotplug: &HotplugGuard<'_>,
    broadcast: Arc<Broadcast>,
) -> Result<()> {
    let state = Arc::new(Mutex::new(UpdateState::default()));
    let component = broadcast.topology.component(broadcast.component);

    if let Some(cpu) = current_cpu() {
        if component.reaches(cpu) {
            apply_local(&broadcast, &state, cpu);
        }
    }

    for device in broadcast.topology.devices_of(broadcast.component) {
        let online = device.lock().online_affinity.clone();
        {
            let state = state.lock();
            if state.first_error.is_some() {
                break;
            }
            if online.intersects(&state.updated_on) {
                continue;
            }
        }

        let Some(target) = online.first() else {
            tracing::debug!("{} has no online CPU, skipped", device.handle());
            continue;
        };

        let remote = Arc::clone(&broadcast);
        let remote_state = Arc::clone(&state);
        if let Err(e) = executors.run_on(target, move || apply_local(&remote, &remote_state, target)) {
            state.lock().record(e);
        }
    }

    let first_error = state.lock().first_error.take();
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
