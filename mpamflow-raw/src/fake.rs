//! In-memory MSC model for tests and simulation
//!
//! [`FakeMsc`] answers identification reads from a [`FakeMscSpec`], keeps the
//! partition configuration per selected partition id like real hardware does,
//! and records every access so tests can check write ordering.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::current_arch::errors::{Ecr, Esr};
use crate::current_arch::features::{
    CcapIdr, CporIdr, Idr, MbwIdr, MonIdr, MsmonIdr, PriIdr,
};
use crate::current_arch::regs::*;
use crate::current_arch::MPAM_ARCHITECTURE_V1;
use crate::mmio::RegisterWindow;
use crate::register::RegisterLayout;

/// One recorded access to a fake window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeAccess {
    Read(u16),
    Write(u16, u32),
    WriteBarrier,
    FullBarrier,
}

/// Identification register contents of a fake MSC
#[derive(Debug, Clone, Copy)]
pub struct FakeMscSpec {
    pub aidr: u32,
    pub idr: Idr,
    pub ccap: CcapIdr,
    pub cpor: CporIdr,
    pub mbw: MbwIdr,
    pub pri: PriIdr,
    pub msmon: MsmonIdr,
    pub csumon: MonIdr,
    pub mbwumon: MonIdr,
}

impl Default for FakeMscSpec {
    fn default() -> Self {
        Self {
            aidr: MPAM_ARCHITECTURE_V1,
            idr: Idr {
                partid_max: 63,
                pmg_max: 3,
                ..Default::default()
            },
            ccap: CcapIdr::default(),
            cpor: CporIdr::default(),
            mbw: MbwIdr::default(),
            pri: PriIdr::default(),
            msmon: MsmonIdr::default(),
            csumon: MonIdr::default(),
            mbwumon: MonIdr::default(),
        }
    }
}

impl FakeMscSpec {
    /// Cache MSC with capacity and portion partitioning
    pub fn cache(cmax_wd: u8, cpbm_wd: u16) -> Self {
        let mut spec = Self::default();
        spec.idr.has_ccap_part = true;
        spec.idr.has_cpor_part = true;
        spec.ccap.cmax_wd = cmax_wd;
        spec.cpor.cpbm_wd = cpbm_wd;
        spec
    }

    /// Memory MSC with bandwidth maximum and portion bitmap
    pub fn memory(bwa_wd: u8, bwpbm_wd: u16) -> Self {
        let mut spec = Self::default();
        spec.idr.has_mbw_part = true;
        spec.mbw = MbwIdr {
            bwa_wd,
            has_max: true,
            has_pbm: bwpbm_wd != 0,
            bwpbm_wd,
            ..Default::default()
        };
        spec
    }

    /// Add cache-storage and bandwidth-usage monitors
    pub fn with_monitors(mut self, csu: u16, mbwu: u16) -> Self {
        self.idr.has_msmon = true;
        self.msmon.msmon_csu = csu != 0;
        self.msmon.msmon_mbwu = mbwu != 0;
        self.csumon.num_mon = csu;
        self.mbwumon.num_mon = mbwu;
        self
    }

    /// Add priority partitioning
    pub fn with_priority(mut self, pri: PriIdr) -> Self {
        self.idr.has_pri_part = true;
        self.pri = pri;
        self
    }

    pub fn with_partid_max(mut self, partid_max: u16, pmg_max: u8) -> Self {
        self.idr.partid_max = partid_max;
        self.idr.pmg_max = pmg_max;
        self
    }
}

type IrqHook = Arc<dyn Fn() + Send + Sync>;

struct FakeState {
    regs: HashMap<u16, u32>,
    partitions: HashMap<(u16, u16), u32>,
    selected: u16,
    log: Vec<FakeAccess>,
}

/// A software MSC implementing [`RegisterWindow`]
pub struct FakeMsc {
    base: u64,
    spec: FakeMscSpec,
    state: Mutex<FakeState>,
    irq_hook: Mutex<Option<IrqHook>>,
}

fn is_partition_reg(offset: u16) -> bool {
    offset >= MPAMCFG_CMAX
}

impl FakeMsc {
    pub fn new(base: u64, spec: FakeMscSpec) -> Self {
        let mut regs = HashMap::new();
        regs.insert(MPAMF_AIDR, spec.aidr);
        regs.insert(MPAMF_IDR, spec.idr.to_reg_value());
        regs.insert(MPAMF_CCAP_IDR, spec.ccap.to_reg_value());
        regs.insert(MPAMF_CPOR_IDR, spec.cpor.to_reg_value());
        regs.insert(MPAMF_MBW_IDR, spec.mbw.to_reg_value());
        regs.insert(MPAMF_PRI_IDR, spec.pri.to_reg_value());
        regs.insert(MPAMF_MSMON_IDR, spec.msmon.to_reg_value());
        regs.insert(MPAMF_CSUMON_IDR, spec.csumon.to_reg_value());
        regs.insert(MPAMF_MBWUMON_IDR, spec.mbwumon.to_reg_value());

        Self {
            base,
            spec,
            state: Mutex::new(FakeState {
                regs,
                partitions: HashMap::new(),
                selected: 0,
                log: Vec::new(),
            }),
            irq_hook: Mutex::new(None),
        }
    }

    pub fn spec(&self) -> &FakeMscSpec {
        &self.spec
    }

    /// Install the callback that models this MSC asserting its error line
    pub fn set_irq_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.irq_hook.lock() = Some(Arc::new(hook));
    }

    /// Latch an error in `MPAMF_ESR` and assert the line if `ECR.INTEN` is set
    ///
    /// Returns whether the line was asserted.
    pub fn inject_error(&self, errcode: u8, partid: u16) -> bool {
        let inten = {
            let mut state = self.state.lock();
            let esr = Esr {
                partid_mon: partid,
                errcode,
                ..Default::default()
            };
            state.regs.insert(MPAMF_ESR, esr.to_reg_value());
            let ecr = state.regs.get(&MPAMF_ECR).copied().unwrap_or(0);
            Ecr::from_reg_value(ecr).inten
        };

        if !inten {
            return false;
        }
        let hook = self.irq_hook.lock().clone();
        if let Some(hook) = hook {
            hook();
        }
        true
    }

    /// Current value of a non-partitioned register
    pub fn reg(&self, offset: u16) -> u32 {
        self.state.lock().regs.get(&offset).copied().unwrap_or(0)
    }

    /// Value a configuration register holds for `partid`
    pub fn partition_reg(&self, partid: u16, offset: u16) -> Option<u32> {
        self.state.lock().partitions.get(&(partid, offset)).copied()
    }

    /// Snapshot of every configuration register of every partition
    pub fn partition_state(&self) -> HashMap<(u16, u16), u32> {
        self.state.lock().partitions.clone()
    }

    /// All recorded accesses, oldest first
    pub fn log(&self) -> Vec<FakeAccess> {
        self.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Number of recorded configuration writes (everything except ID/error
    /// register traffic)
    pub fn config_writes(&self) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|a| matches!(a, FakeAccess::Write(off, _) if *off >= MPAMCFG_PART_SEL))
            .count()
    }
}

impl RegisterWindow for FakeMsc {
    fn read32(&self, offset: u16) -> u32 {
        let mut state = self.state.lock();
        state.log.push(FakeAccess::Read(offset));
        if is_partition_reg(offset) {
            let partid = state.selected;
            return state.partitions.get(&(partid, offset)).copied().unwrap_or(0);
        }
        state.regs.get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: u16, value: u32) {
        let mut state = self.state.lock();
        state.log.push(FakeAccess::Write(offset, value));
        if offset == MPAMCFG_PART_SEL {
            state.selected = (value & 0xFFFF) as u16;
        }
        if is_partition_reg(offset) {
            let partid = state.selected;
            state.partitions.insert((partid, offset), value);
        } else {
            state.regs.insert(offset, value);
        }
    }

    fn write_barrier(&self) {
        self.state.lock().log.push(FakeAccess::WriteBarrier);
    }

    fn full_barrier(&self) {
        self.state.lock().log.push(FakeAccess::FullBarrier);
    }

    fn base_address(&self) -> u64 {
        self.base
    }
}
