use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};

use mpamflow_raw::RegisterWindow;

use crate::common::cpumask::CpuMask;
use crate::common::mmio::WindowMapper;
use crate::error::{MpamError, Result};
use crate::msc::device::{Device, DeviceState, IrqLine};
use crate::topology::{
    Class, ClassHandle, ClassType, Component, ComponentHandle, DeviceHandle, SysProps, Topology,
};

struct ClassDraft {
    level: u8,
    class_type: ClassType,
    components: Vec<ComponentHandle>,
    fw_affinity: CpuMask,
}

struct ComponentDraft {
    class: ClassHandle,
    id: u32,
    devices: Vec<DeviceHandle>,
    fw_affinity: CpuMask,
}

struct DeviceDraft {
    component: ComponentHandle,
    class: ClassHandle,
    fw_affinity: CpuMask,
    window: Arc<dyn RegisterWindow>,
    error_irq: Option<IrqLine>,
    overflow_irq: Option<IrqLine>,
}

/// Mutable topology used while firmware tables are being walked
pub struct TopologyBuilder {
    classes: Vec<ClassDraft>,
    components: Vec<ComponentDraft>,
    devices: Vec<DeviceDraft>,
    sysprops: SysProps,
    possible: CpuMask,
}

impl TopologyBuilder {
    pub fn new(sysprops: SysProps, possible: CpuMask) -> Self {
        Self {
            classes: Vec::new(),
            components: Vec::new(),
            devices: Vec::new(),
            sysprops,
            possible,
        }
    }

    pub fn sysprops(&self) -> SysProps {
        self.sysprops
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Find the class for `(level, class_type)`, creating it if `alloc`
    pub fn class_get(
        &mut self,
        level: u8,
        class_type: ClassType,
        alloc: bool,
    ) -> Result<ClassHandle> {
        if let Some(idx) = self
            .classes
            .iter()
            .position(|c| c.level == level && c.class_type == class_type)
        {
            return Ok(ClassHandle(idx));
        }
        if !alloc {
            return Err(MpamError::NotFound(format!(
                "{} class at level {}",
                class_type.name(),
                level
            )));
        }

        self.classes.push(ClassDraft {
            level,
            class_type,
            components: Vec::new(),
            fw_affinity: CpuMask::new(),
        });
        Ok(ClassHandle(self.classes.len() - 1))
    }

    /// Find component `id` of `class`, creating it if `alloc`
    pub fn component_get(
        &mut self,
        class: ClassHandle,
        id: u32,
        alloc: bool,
    ) -> Result<ComponentHandle> {
        let draft = self
            .classes
            .get(class.0)
            .ok_or_else(|| MpamError::NotFound(format!("class {}", class.0)))?;
        if let Some(&handle) = draft
            .components
            .iter()
            .find(|h| self.components[h.0].id == id)
        {
            return Ok(handle);
        }
        if !alloc {
            return Err(MpamError::NotFound(format!("component {id}")));
        }

        let handle = ComponentHandle(self.components.len());
        self.components.push(ComponentDraft {
            class,
            id,
            devices: Vec::new(),
            fw_affinity: CpuMask::new(),
        });
        self.classes[class.0].components.push(handle);
        Ok(handle)
    }

    /// Add the MSC at `base` to component `component_id` of the
    /// `(level, class_type)` class
    ///
    /// Without a firmware affinity the MSC is taken to be reachable from
    /// every possible CPU. Non-cache components take their affinity from
    /// their MSCs; cache components learn theirs from the cache topology as
    /// CPUs come online. Nothing is created if the window cannot be mapped.
    pub fn device_create(
        &mut self,
        level: u8,
        class_type: ClassType,
        component_id: u32,
        fw_affinity: Option<&CpuMask>,
        mapper: &dyn WindowMapper,
        base: u64,
    ) -> Result<DeviceHandle> {
        let fw_affinity = match fw_affinity {
            Some(mask) => mask.and(&self.possible),
            None => self.possible.clone(),
        };
        if fw_affinity.is_empty() {
            return Err(MpamError::InvalidConfiguration(format!(
                "MSC at 0x{base:x} is not reachable from any possible CPU"
            )));
        }

        let window = mapper.map(base)?;

        let class = self.class_get(level, class_type, true)?;
        let component = self.component_get(class, component_id, true)?;

        if class_type != ClassType::Cache {
            self.components[component.0]
                .fw_affinity
                .union_with(&fw_affinity);
            self.classes[class.0].fw_affinity.union_with(&fw_affinity);
        }

        let handle = DeviceHandle(self.devices.len());
        self.devices.push(DeviceDraft {
            component,
            class,
            fw_affinity,
            window,
            error_irq: None,
            overflow_irq: None,
        });
        self.components[component.0].devices.push(handle);

        tracing::info!(
            "Created MSC {} at 0x{:x}: {}{} component {}",
            handle,
            base,
            class_type.name(),
            level,
            component_id
        );
        Ok(handle)
    }

    pub fn set_error_irq(&mut self, device: DeviceHandle, line: u32, flags: u32) -> Result<()> {
        self.device_mut(device)?.error_irq = Some(IrqLine::new(line, flags));
        Ok(())
    }

    pub fn set_overflow_irq(&mut self, device: DeviceHandle, line: u32, flags: u32) -> Result<()> {
        self.device_mut(device)?.overflow_irq = Some(IrqLine::new(line, flags));
        Ok(())
    }

    fn device_mut(&mut self, device: DeviceHandle) -> Result<&mut DeviceDraft> {
        self.devices
            .get_mut(device.0)
            .ok_or_else(|| MpamError::NotFound(format!("device {}", device.0)))
    }

    /// Freeze into the shared topology
    pub fn build(self) -> Result<Topology> {
        if self.devices.is_empty() {
            return Err(MpamError::DiscoveryFailed("no MSCs were found".into()));
        }

        let classes = self
            .classes
            .into_iter()
            .enumerate()
            .map(|(idx, c)| Class {
                handle: ClassHandle(idx),
                level: c.level,
                class_type: c.class_type,
                components: c.components,
                fw_affinity: RwLock::new(c.fw_affinity),
                props: OnceCell::new(),
            })
            .collect();

        let components = self
            .components
            .into_iter()
            .enumerate()
            .map(|(idx, c)| Component {
                handle: ComponentHandle(idx),
                class: c.class,
                id: c.id,
                devices: c.devices,
                fw_affinity: RwLock::new(c.fw_affinity),
            })
            .collect();

        let devices = self
            .devices
            .into_iter()
            .enumerate()
            .map(|(idx, d)| {
                let state = DeviceState {
                    error_irq: d.error_irq,
                    overflow_irq: d.overflow_irq,
                    ..Default::default()
                };
                Device::new(
                    DeviceHandle(idx),
                    d.component,
                    d.class,
                    d.fw_affinity,
                    d.window,
                    state,
                )
            })
            .collect();

        Ok(Topology {
            classes,
            components,
            devices,
            sysprops: Mutex::new(self.sysprops),
            possible: self.possible,
        })
    }
}
