//! One MSC and its per-device state

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

use mpamflow_raw::current_arch::regs::MSC_WINDOW_SIZE;
use mpamflow_raw::RegisterWindow;

use crate::common::affinity::current_cpu;
use crate::common::cpumask::CpuMask;
use crate::common::irq::IrqTrigger;
use crate::error::{MpamError, Result};
use crate::msc::features::MscProps;
use crate::topology::{ClassHandle, ComponentHandle, DeviceHandle};

/// Firmware interrupt flag: the line is level triggered
pub const MPAM_IRQ_MODE_LEVEL: u32 = 0x1;
/// Flag bits kept from a firmware interrupt description
pub const MPAM_IRQ_FLAGS_MASK: u32 = 0x7;

/// An interrupt line and its firmware flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqLine {
    pub line: u32,
    pub flags: u32,
}

impl IrqLine {
    pub fn new(line: u32, flags: u32) -> Self {
        Self {
            line,
            flags: flags & MPAM_IRQ_FLAGS_MASK,
        }
    }

    pub fn trigger(&self) -> IrqTrigger {
        if self.flags & MPAM_IRQ_MODE_LEVEL != 0 {
            IrqTrigger::Level
        } else {
            IrqTrigger::Edge
        }
    }
}

/// Mutable state of an MSC, guarded by the device lock
#[derive(Debug, Default)]
pub struct DeviceState {
    /// CPUs of the firmware affinity that are currently online
    pub online_affinity: CpuMask,
    pub probed: bool,
    pub props: MscProps,
    pub error_irq: Option<IrqLine>,
    pub overflow_irq: Option<IrqLine>,
    /// Set once the error line has a handler; resets then set `ECR.INTEN`
    pub enable_error_irq: bool,
    /// Set when the class capabilities have been reconciled
    pub caps_frozen: bool,
}

pub struct Device {
    handle: DeviceHandle,
    component: ComponentHandle,
    class: ClassHandle,
    fw_affinity: CpuMask,
    window: Arc<dyn RegisterWindow>,
    state: Mutex<DeviceState>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle)
            .field("base", &format_args!("0x{:x}", self.base_address()))
            .field("fw_affinity", &self.fw_affinity)
            .finish()
    }
}

impl Device {
    pub(crate) fn new(
        handle: DeviceHandle,
        component: ComponentHandle,
        class: ClassHandle,
        fw_affinity: CpuMask,
        window: Arc<dyn RegisterWindow>,
        state: DeviceState,
    ) -> Self {
        Self {
            handle,
            component,
            class,
            fw_affinity,
            window,
            state: Mutex::new(state),
        }
    }

    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    pub fn component(&self) -> ComponentHandle {
        self.component
    }

    pub fn class(&self) -> ClassHandle {
        self.class
    }

    pub fn base_address(&self) -> u64 {
        self.window.base_address()
    }

    /// CPUs from which the registers are reachable
    pub fn fw_affinity(&self) -> &CpuMask {
        &self.fw_affinity
    }

    /// Lock the device state without touching registers
    pub fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock()
    }

    /// Lock the device for register access from the calling CPU
    ///
    /// Fails with [`MpamError::NotAffine`] unless the calling thread is bound
    /// to a CPU in the firmware affinity.
    pub fn access(&self) -> Result<RegisterAccess<'_>> {
        let cpu = current_cpu();
        match cpu {
            Some(c) if self.fw_affinity.test(c) => Ok(RegisterAccess {
                device: self,
                state: self.state.lock(),
                cpu: c,
            }),
            _ => Err(MpamError::NotAffine {
                base: self.base_address(),
                cpu,
            }),
        }
    }
}

/// Locked register access to a device from a CPU that can reach it
pub struct RegisterAccess<'a> {
    device: &'a Device,
    state: MutexGuard<'a, DeviceState>,
    cpu: u32,
}

impl RegisterAccess<'_> {
    pub fn device(&self) -> &Device {
        self.device
    }

    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut DeviceState {
        &mut self.state
    }

    pub fn read(&self, offset: u16) -> u32 {
        debug_assert!((offset as u32) < MSC_WINDOW_SIZE);
        let value = self.device.window.read32(offset);
        tracing::trace!(
            "MSC 0x{:x} read 0x{:03x} = 0x{:08x}",
            self.device.base_address(),
            offset,
            value
        );
        value
    }

    pub fn write(&self, offset: u16, value: u32) {
        debug_assert!((offset as u32) < MSC_WINDOW_SIZE);
        tracing::trace!(
            "MSC 0x{:x} write 0x{:03x} = 0x{:08x}",
            self.device.base_address(),
            offset,
            value
        );
        self.device.window.write32(offset, value);
    }

    pub fn write_barrier(&self) {
        self.device.window.write_barrier();
    }

    pub fn full_barrier(&self) {
        self.device.window.full_barrier();
    }
}
