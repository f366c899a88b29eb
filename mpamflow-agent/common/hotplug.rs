use parking_lot::{Mutex, MutexGuard};

use crate::common::executor::on_executor;
use crate::error::{MpamError, Result};

/// Serialises CPU online/offline handling against configuration broadcasts
#[derive(Default)]
pub struct CpuHotplug {
    lock: Mutex<()>,
}

/// Proof that no CPU can come or go while it is held
pub struct HotplugGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl CpuHotplug {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block CPU hotplug until the guard is dropped
    ///
    /// Refused on a per-CPU executor: the holder may wait on executors, so
    /// an executor waiting for the holder would never finish.
    pub fn lock(&self) -> Result<HotplugGuard<'_>> {
        if on_executor() {
            return Err(MpamError::Executor(
                "CPU hotplug lock taken from an executor".into(),
            ));
        }
        Ok(HotplugGuard {
            _guard: self.lock.lock(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::cpumask::CpuMask;
    use crate::common::executor::CoreExecutors;
    use std::sync::Arc;

    #[test]
    fn test_lock_refused_on_executor() {
        let hotplug = Arc::new(CpuHotplug::new());
        let executors = CoreExecutors::spawn(&CpuMask::first_n(1), false).unwrap();

        let remote = Arc::clone(&hotplug);
        let refused = executors
            .run_on(0, move || remote.lock().is_err())
            .unwrap();
        assert!(refused);

        assert!(hotplug.lock().is_ok());
    }
}
