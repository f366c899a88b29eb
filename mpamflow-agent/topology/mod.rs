//! Class, component and device hierarchy
//!
//! Discovery fills a [`TopologyBuilder`]; once complete it is frozen into a
//! [`Topology`] that is shared read-only. Classes own components and
//! components own devices, all stored in arenas and referred to by handle.
//! What can still change after the freeze lives behind its own lock: the
//! per-device state, the cache affinities learned as CPUs come online, the
//! system-wide limits and the one-time reconciled class capabilities.

pub mod builder;
pub mod reconcile;
pub mod sysprops;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use crate::common::cpumask::CpuMask;
use crate::msc::device::Device;
use crate::msc::features::MscProps;

pub use builder::TopologyBuilder;
pub use sysprops::SysProps;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassHandle(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentHandle(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub(crate) usize);

impl std::fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msc{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassType {
    Cache,
    Memory,
}

impl ClassType {
    pub fn name(&self) -> &'static str {
        match self {
            ClassType::Cache => "cache",
            ClassType::Memory => "memory",
        }
    }
}

/// One resource type at one level, such as the L3 caches
#[derive(Debug)]
pub struct Class {
    handle: ClassHandle,
    level: u8,
    class_type: ClassType,
    components: Vec<ComponentHandle>,
    fw_affinity: RwLock<CpuMask>,
    props: OnceCell<MscProps>,
}

impl Class {
    pub fn handle(&self) -> ClassHandle {
        self.handle
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn class_type(&self) -> ClassType {
        self.class_type
    }

    pub fn components(&self) -> &[ComponentHandle] {
        &self.components
    }

    pub fn fw_affinity(&self) -> CpuMask {
        self.fw_affinity.read().clone()
    }

    /// Reconciled capabilities, once every MSC has been probed
    pub fn props(&self) -> Option<MscProps> {
        self.props.get().copied()
    }

    /// e.g. "cache3" or "memory0"
    pub fn label(&self) -> String {
        format!("{}{}", self.class_type.name(), self.level)
    }
}

/// One instance of a class, such as a single L3 cache
#[derive(Debug)]
pub struct Component {
    handle: ComponentHandle,
    class: ClassHandle,
    id: u32,
    devices: Vec<DeviceHandle>,
    fw_affinity: RwLock<CpuMask>,
}

impl Component {
    pub fn handle(&self) -> ComponentHandle {
        self.handle
    }

    pub fn class(&self) -> ClassHandle {
        self.class
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn devices(&self) -> &[DeviceHandle] {
        &self.devices
    }

    pub fn fw_affinity(&self) -> CpuMask {
        self.fw_affinity.read().clone()
    }

    pub fn reaches(&self, cpu: u32) -> bool {
        self.fw_affinity.read().test(cpu)
    }
}

pub struct Topology {
    classes: Vec<Class>,
    components: Vec<Component>,
    devices: Vec<Device>,
    sysprops: Mutex<SysProps>,
    possible: CpuMask,
}

impl Topology {
    pub fn classes(&self) -> &[Class] {
        &self.classes
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn class(&self, handle: ClassHandle) -> &Class {
        &self.classes[handle.0]
    }

    pub fn component(&self, handle: ComponentHandle) -> &Component {
        &self.components[handle.0]
    }

    pub fn device(&self, handle: DeviceHandle) -> &Device {
        &self.devices[handle.0]
    }

    pub fn components_of(&self, class: ClassHandle) -> impl Iterator<Item = &Component> {
        self.class(class)
            .components
            .iter()
            .map(move |&h| self.component(h))
    }

    pub fn devices_of(&self, component: ComponentHandle) -> impl Iterator<Item = &Device> {
        self.component(component)
            .devices
            .iter()
            .map(move |&h| self.device(h))
    }

    pub fn find_class(&self, level: u8, class_type: ClassType) -> Option<&Class> {
        self.classes
            .iter()
            .find(|c| c.level == level && c.class_type == class_type)
    }

    /// Check that `component` is a component of `class` in this topology
    pub fn lookup(&self, class: ClassHandle, component: ComponentHandle) -> Option<&Component> {
        self.components
            .get(component.0)
            .filter(|c| c.class == class && class.0 < self.classes.len())
    }

    /// Look up a component by id without creating it
    pub fn component_get(&self, class: ClassHandle, id: u32) -> Option<&Component> {
        self.components_of(class).find(|c| c.id == id)
    }

    pub fn possible_cpus(&self) -> &CpuMask {
        &self.possible
    }

    pub fn sysprops(&self) -> SysProps {
        *self.sysprops.lock()
    }

    pub(crate) fn update_sysprops<R>(&self, f: impl FnOnce(&mut SysProps) -> R) -> R {
        f(&mut self.sysprops.lock())
    }

    pub fn all_probed(&self) -> bool {
        self.devices.iter().all(|d| d.lock().probed)
    }

    /// Learn that `cpu` uses `component` of a cache class
    pub(crate) fn extend_cache_affinity(&self, component: ComponentHandle, cpu: u32) {
        let comp = self.component(component);
        comp.fw_affinity.write().set(cpu);
        self.class(comp.class).fw_affinity.write().set(cpu);
    }

    /// Publish the reconciled capabilities of a class
    ///
    /// Only the first call takes effect; the record is immutable afterwards.
    pub(crate) fn publish_class_props(&self, class: ClassHandle, props: MscProps) -> MscProps {
        *self.class(class).props.get_or_init(|| props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::mmio::FakeWindows;
    use mpamflow_raw::fake::{FakeMsc, FakeMscSpec};

    #[test]
    fn test_frozen_topology_lookup() {
        let windows = FakeWindows::new();
        windows.insert(FakeMsc::new(0x1000, FakeMscSpec::cache(8, 8)));
        windows.insert(FakeMsc::new(0x2000, FakeMscSpec::memory(8, 0)));

        let mut builder = TopologyBuilder::new(SysProps::new(63, 3), CpuMask::first_n(4));
        builder
            .device_create(3, ClassType::Cache, 0, None, &windows, 0x1000)
            .unwrap();
        builder
            .device_create(
                0,
                ClassType::Memory,
                5,
                Some(&CpuMask::parse_cpu_list("0-1").unwrap()),
                &windows,
                0x2000,
            )
            .unwrap();
        let topology = builder.build().unwrap();

        let l3 = topology.find_class(3, ClassType::Cache).unwrap();
        assert_eq!(l3.label(), "cache3");
        assert!(l3.props().is_none());
        // Cache affinity is learned as CPUs come online
        assert!(l3.fw_affinity().is_empty());

        let mem = topology.find_class(0, ClassType::Memory).unwrap();
        let comp = topology.component_get(mem.handle(), 5).unwrap();
        assert_eq!(comp.fw_affinity().to_string(), "0-1");
        assert!(topology.component_get(mem.handle(), 6).is_none());

        topology.extend_cache_affinity(l3.components()[0], 2);
        assert_eq!(l3.fw_affinity().to_string(), "2");
        assert!(topology.component(l3.components()[0]).reaches(2));
        assert!(!topology.all_probed());
    }

    #[test]
    fn test_class_props_publish_once() {
        let windows = FakeWindows::new();
        windows.insert(FakeMsc::new(0x1000, FakeMscSpec::cache(8, 8)));
        let mut builder = TopologyBuilder::new(SysProps::new(63, 3), CpuMask::first_n(1));
        builder
            .device_create(2, ClassType::Cache, 0, None, &windows, 0x1000)
            .unwrap();
        let topology = builder.build().unwrap();
        let class = topology.classes()[0].handle();

        let first = MscProps {
            cmax_wd: 8,
            ..Default::default()
        };
        let second = MscProps {
            cmax_wd: 4,
            ..Default::default()
        };
        assert_eq!(topology.publish_class_props(class, first), first);
        assert_eq!(topology.publish_class_props(class, second), first);
        assert_eq!(topology.class(class).props(), Some(first));
    }
}
