//! Hardware error reporting
//!
//! An MSC signals a programming error by latching a code in `MPAMF_ESR` and
//! raising its error interrupt. The handler logs the code and clears the
//! register, which also deasserts a level-triggered line.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use mpamflow_raw::current_arch::errors::{ErrorCode, Esr};
use mpamflow_raw::current_arch::regs::MPAMF_ESR;
use mpamflow_raw::RegisterLayout;

use crate::common::irq::IrqReturn;
use crate::msc::device::Device;
use crate::msc::partition::error_irq_enabled;
use crate::topology::DeviceHandle;

const LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Hardware errors seen per MSC and error code
#[derive(Default)]
pub struct ErrorStats {
    counts: Mutex<HashMap<(DeviceHandle, u8), u64>>,
    last_logged: Mutex<HashMap<(DeviceHandle, u8), Instant>>,
}

impl ErrorStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, device: DeviceHandle, errcode: u8) {
        *self.counts.lock().entry((device, errcode)).or_insert(0) += 1;
    }

    /// Whether a log line for this error is due
    fn should_log(&self, device: DeviceHandle, errcode: u8) -> bool {
        let now = Instant::now();
        let mut last = self.last_logged.lock();
        match last.get(&(device, errcode)) {
            Some(&at) if now.duration_since(at) < LOG_INTERVAL => false,
            _ => {
                last.insert((device, errcode), now);
                true
            }
        }
    }

    pub fn count(&self, device: DeviceHandle, errcode: u8) -> u64 {
        self.counts
            .lock()
            .get(&(device, errcode))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.lock().values().sum()
    }

    pub fn snapshot(&self) -> Vec<((DeviceHandle, u8), u64)> {
        let mut all: Vec<_> = self.counts.lock().iter().map(|(k, v)| (*k, *v)).collect();
        all.sort_unstable();
        all
    }
}

/// Name of a hardware error code for logs and metrics
pub fn error_code_name(errcode: u8) -> String {
    match ErrorCode::from_raw(errcode) {
        Some(code) => code.description().to_string(),
        None => format!("unknown error {errcode}"),
    }
}

/// Service the error interrupt of `device` on the calling CPU
///
/// An MSC with `ECR.INTEN` clear cannot be asserting the line, so a latched
/// `ESR` is left for whoever resets it next.
pub fn handle_error_irq(device: &Device, stats: &ErrorStats) -> IrqReturn {
    let access = match device.access() {
        Ok(access) => access,
        Err(e) => {
            tracing::warn!("Error interrupt for {} not serviceable: {}", device.handle(), e);
            return IrqReturn::None;
        }
    };

    if !error_irq_enabled(&access) {
        return IrqReturn::None;
    }

    let raw = access.read(MPAMF_ESR);
    let esr = Esr::from_reg_value(raw);
    if esr.errcode == 0 {
        return IrqReturn::None;
    }

    stats.record(device.handle(), esr.errcode);
    if stats.should_log(device.handle(), esr.errcode) {
        match esr.code() {
            Some(code) => tracing::error!(
                "MSC at 0x{:x}: unexpected error '{}' [esr:{:x}]",
                device.base_address(),
                code.description(),
                raw
            ),
            None => tracing::error!(
                "MSC at 0x{:x}: unexpected error {} [esr:{:x}]",
                device.base_address(),
                esr.errcode,
                raw
            ),
        }
    }

    access.write(MPAMF_ESR, 0);
    IrqReturn::Handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::affinity::AffinityGuard;
    use crate::common::cpumask::CpuMask;
    use crate::msc::device::DeviceState;
    use crate::topology::{ClassHandle, ComponentHandle};
    use mpamflow_raw::current_arch::regs::MPAMF_ECR;
    use mpamflow_raw::fake::{FakeMsc, FakeMscSpec};
    use mpamflow_raw::RegisterWindow;
    use std::sync::Arc;

    fn device() -> (Device, Arc<FakeMsc>) {
        let msc = Arc::new(FakeMsc::new(0x1000, FakeMscSpec::default()));
        msc.write32(MPAMF_ECR, 1);
        let dev = Device::new(
            DeviceHandle(4),
            ComponentHandle(0),
            ClassHandle(0),
            CpuMask::first_n(1),
            msc.clone(),
            DeviceState::default(),
        );
        (dev, msc)
    }

    #[test]
    fn test_no_error_is_not_ours() {
        let (dev, _msc) = device();
        let stats = ErrorStats::new();
        let _cpu = AffinityGuard::bind(0);

        assert_eq!(handle_error_irq(&dev, &stats), IrqReturn::None);
        assert_eq!(stats.total(), 0);
    }

    #[test]
    fn test_error_is_logged_and_cleared() {
        let (dev, msc) = device();
        let stats = ErrorStats::new();
        let _cpu = AffinityGuard::bind(0);

        msc.inject_error(2, 9);
        assert_eq!(handle_error_irq(&dev, &stats), IrqReturn::Handled);
        assert_eq!(msc.reg(MPAMF_ESR), 0);
        assert_eq!(stats.count(DeviceHandle(4), 2), 1);

        // Rate limited, still counted
        msc.inject_error(2, 9);
        assert_eq!(handle_error_irq(&dev, &stats), IrqReturn::Handled);
        assert_eq!(stats.count(DeviceHandle(4), 2), 2);
    }

    #[test]
    fn test_unknown_error_code() {
        let (dev, msc) = device();
        let stats = ErrorStats::new();
        let _cpu = AffinityGuard::bind(0);

        msc.inject_error(12, 0);
        assert_eq!(handle_error_irq(&dev, &stats), IrqReturn::Handled);
        assert_eq!(stats.snapshot(), vec![((DeviceHandle(4), 12), 1)]);
        assert_eq!(error_code_name(12), "unknown error 12");
        assert_eq!(error_code_name(5), "Out of range Monitor selected");
    }

    #[test]
    fn test_masked_msc_is_not_ours() {
        let (dev, msc) = device();
        let stats = ErrorStats::new();
        let _cpu = AffinityGuard::bind(0);

        msc.write32(MPAMF_ECR, 0);
        assert!(!msc.inject_error(3, 1));
        assert_eq!(handle_error_irq(&dev, &stats), IrqReturn::None);
        assert_eq!(stats.total(), 0);
        assert_ne!(msc.reg(MPAMF_ESR), 0);
    }

    #[test]
    fn test_unreachable_cpu_is_not_serviced() {
        let (dev, msc) = device();
        let stats = ErrorStats::new();
        let _cpu = AffinityGuard::bind(3);

        msc.inject_error(1, 0);
        assert_eq!(handle_error_irq(&dev, &stats), IrqReturn::None);
        assert_ne!(msc.reg(MPAMF_ESR), 0);
    }
}
