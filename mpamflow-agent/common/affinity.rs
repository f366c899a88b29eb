use std::cell::Cell;

use nix::sched::{sched_getaffinity, sched_setaffinity, CpuSet};
use nix::unistd::Pid;

use crate::error::{MpamError, Result};

thread_local! {
    static CURRENT_CPU: Cell<Option<u32>> = const { Cell::new(None) };
}

/// CPU the calling thread is bound to, if any
///
/// MSC register access is only permitted from a thread bound to a CPU in
/// the MSC's firmware affinity.
pub fn current_cpu() -> Option<u32> {
    CURRENT_CPU.with(|c| c.get())
}

/// Binds the calling thread to one CPU until dropped
///
/// [`AffinityGuard::new`] pins the thread with `sched_setaffinity`.
/// [`AffinityGuard::bind`] only records the logical CPU, which is how the
/// simulated platform and the tests run.
pub struct AffinityGuard {
    old_affinity: Option<CpuSet>,
    old_cpu: Option<u32>,
}

impl AffinityGuard {
    pub fn new(cpu: u32) -> Result<Self> {
        let old_affinity = sched_getaffinity(Pid::from_raw(0))
            .map_err(|e| MpamError::Affinity(format!("Failed to get affinity: {e}")))?;

        let mut new_affinity = CpuSet::new();
        new_affinity.set(cpu as usize).map_err(|e| {
            MpamError::Affinity(format!("Failed to set CPU {cpu} in set: {e}"))
        })?;

        sched_setaffinity(Pid::from_raw(0), &new_affinity).map_err(|e| {
            MpamError::Affinity(format!("Failed to set affinity to CPU {cpu}: {e}"))
        })?;

        Ok(Self {
            old_affinity: Some(old_affinity),
            old_cpu: CURRENT_CPU.with(|c| c.replace(Some(cpu))),
        })
    }

    pub fn bind(cpu: u32) -> Self {
        Self {
            old_affinity: None,
            old_cpu: CURRENT_CPU.with(|c| c.replace(Some(cpu))),
        }
    }

    /// Pin when `pin` is set, falling back to a logical binding if the
    /// kernel refuses
    pub fn pin_or_bind(cpu: u32, pin: bool) -> Self {
        if !pin {
            return Self::bind(cpu);
        }
        Self::new(cpu).unwrap_or_else(|e| {
            tracing::warn!("Could not pin to CPU {}: {}", cpu, e);
            Self::bind(cpu)
        })
    }
}

impl Drop for AffinityGuard {
    fn drop(&mut self) {
        if let Some(old) = &self.old_affinity {
            let _ = sched_setaffinity(Pid::from_raw(0), old);
        }
        CURRENT_CPU.with(|c| c.set(self.old_cpu));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_nests_and_restores() {
        assert_eq!(current_cpu(), None);
        {
            let _outer = AffinityGuard::bind(3);
            assert_eq!(current_cpu(), Some(3));
            {
                let _inner = AffinityGuard::bind(5);
                assert_eq!(current_cpu(), Some(5));
            }
            assert_eq!(current_cpu(), Some(3));
        }
        assert_eq!(current_cpu(), None);
    }

    #[test]
    fn test_binding_is_per_thread() {
        let _guard = AffinityGuard::bind(1);
        let other = std::thread::spawn(current_cpu).join().unwrap();
        assert_eq!(other, None);
    }

    #[test]
    fn test_pin_rejects_impossible_cpu() {
        let cpu = CpuSet::count() as u32;
        assert!(matches!(
            AffinityGuard::new(cpu),
            Err(MpamError::Affinity(_))
        ));
        assert_eq!(current_cpu(), None);

        let _guard = AffinityGuard::pin_or_bind(cpu, true);
        assert_eq!(current_cpu(), Some(cpu));
    }
}
