//! Programming partition configuration into an MSC

use mpamflow_raw::current_arch::cfg::{bitmap_tail, fraction_max, PartSel, Pri};
use mpamflow_raw::current_arch::errors::{Ecr, MPAMF_ECR_INTEN};
use mpamflow_raw::current_arch::regs::*;
use mpamflow_raw::{genmask, RegisterLayout};

use crate::error::{MpamError, Result};
use crate::msc::device::RegisterAccess;
use crate::msc::features::{Feature, FeatureSet, MscProps};

/// One configuration value for one partition id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentConfig {
    pub feature: Feature,
    pub partid: u16,
    pub value: Option<u32>,
}

impl ComponentConfig {
    pub fn new(feature: Feature, partid: u16, value: u32) -> Self {
        Self {
            feature,
            partid,
            value: Some(value),
        }
    }
}

/// Write an all-ones bitmap exactly `wd` bits wide
fn reset_bitmap(access: &RegisterAccess<'_>, base: u16, wd: u16) {
    let full_words = wd / 32;
    for i in 0..full_words {
        access.write(base + i * 4, u32::MAX);
    }
    if let Some(tail) = bitmap_tail(wd) {
        access.write(base + full_words * 4, tail);
    }
}

/// Highest priority a `wd`-bit field can express
fn highest_priority(wd: u8, zero_is_low: bool) -> u16 {
    if !zero_is_low || wd == 0 {
        return 0;
    }
    genmask(wd.min(16) as u32 - 1, 0) as u16
}

/// Return `partid` to the unrestricted default
pub fn reset_partid(access: &RegisterAccess<'_>, partid: u16) {
    let props = access.state().props;
    if !props.has_part_sel() {
        return;
    }

    access.write(MPAMCFG_PART_SEL, PartSel { partid }.to_reg_value());
    access.write_barrier();

    if props.has(Feature::CporPart) {
        reset_bitmap(access, MPAMCFG_CPBM, props.cpbm_wd);
    }
    if props.has(Feature::MbwPart) {
        reset_bitmap(access, MPAMCFG_MBW_PBM, props.mbw_pbm_bits);
    }
    if props.has(Feature::CcapPart) {
        access.write(MPAMCFG_CMAX, fraction_max(props.cmax_wd));
    }
    if props.has(Feature::MbwMin) {
        access.write(MPAMCFG_MBW_MIN, 0);
    }
    if props.has(Feature::MbwMax) {
        access.write(MPAMCFG_MBW_MAX, fraction_max(props.bwa_wd));
    }
    if props.has(Feature::MbwProp) {
        access.write(MPAMCFG_MBW_PROP, 0);
    }
    if props.features.intersects(FeatureSet::INTPRI_PART | FeatureSet::DSPRI_PART) {
        access.write(MPAMCFG_PRI, default_priority(&props).to_reg_value());
    }

    access.full_barrier();
}

fn default_priority(props: &MscProps) -> Pri {
    let mut pri = Pri::default();
    if props.has(Feature::IntpriPart) {
        pri.intpri = highest_priority(
            props.intpri_wd,
            props.features.contains(FeatureSet::INTPRI_PART_0_LOW),
        );
    }
    if props.has(Feature::DspriPart) {
        pri.dspri = highest_priority(
            props.dspri_wd,
            props.features.contains(FeatureSet::DSPRI_PART_0_LOW),
        );
    }
    pri
}

/// Register that holds `feature`, if it can be configured directly
fn config_register(feature: Feature) -> Option<u16> {
    match feature {
        Feature::CporPart => Some(MPAMCFG_CPBM),
        Feature::MbwPart => Some(MPAMCFG_MBW_PBM),
        Feature::MbwMax => Some(MPAMCFG_MBW_MAX),
        _ => None,
    }
}

/// Program one configuration value
///
/// Registers are left untouched unless the value can be applied.
pub fn apply_config(access: &RegisterAccess<'_>, cfg: &ComponentConfig) -> Result<()> {
    let props = access.state().props;
    if !props.has(cfg.feature) {
        return Err(MpamError::UnsupportedFeature(cfg.feature.name()));
    }
    let value = cfg.value.ok_or_else(|| {
        MpamError::InvalidConfiguration(format!(
            "no value for {} on partid {}",
            cfg.feature.name(),
            cfg.partid
        ))
    })?;
    let reg = config_register(cfg.feature)
        .ok_or(MpamError::UnknownFeature(cfg.feature.name()))?;

    access.write(MPAMCFG_PART_SEL, PartSel { partid: cfg.partid }.to_reg_value());
    access.write_barrier();
    access.write(reg, value);
    access.full_barrier();
    Ok(())
}

/// Reset every partition id up to `max_partid`, reapplying whatever
/// `reapply` still holds for it
///
/// Re-enables error interrupts first if a handler has been registered.
/// Failures to reapply are logged once and do not stop the reset.
pub fn reset_device(
    access: &RegisterAccess<'_>,
    max_partid: u16,
    mut reapply: impl FnMut(u16) -> Option<ComponentConfig>,
) {
    if access.state().enable_error_irq {
        enable_error_irq(access);
    }

    let mut warned = false;
    for partid in 0..=max_partid {
        reset_partid(access, partid);

        if let Some(cfg) = reapply(partid) {
            if let Err(e) = apply_config(access, &cfg) {
                if !warned {
                    tracing::warn!(
                        "MSC at 0x{:x}: failed to reapply config for partid {}: {}",
                        access.device().base_address(),
                        partid,
                        e
                    );
                    warned = true;
                }
            }
        }
    }
}

/// Let the MSC raise error interrupts
pub fn enable_error_irq(access: &RegisterAccess<'_>) {
    access.write(MPAMF_ECR, Ecr { inten: true }.to_reg_value());
}

/// Stop the MSC raising error interrupts
pub fn disable_error_irq(access: &RegisterAccess<'_>) {
    access.write(MPAMF_ECR, 0);
}

/// Whether the MSC currently has error interrupts enabled
pub fn error_irq_enabled(access: &RegisterAccess<'_>) -> bool {
    access.read(MPAMF_ECR) & MPAMF_ECR_INTEN != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::affinity::AffinityGuard;
    use crate::common::cpumask::CpuMask;
    use crate::msc::device::{Device, DeviceState};
    use crate::msc::probe::probe;
    use crate::topology::{ClassHandle, ComponentHandle, DeviceHandle, SysProps};
    use mpamflow_raw::current_arch::features::PriIdr;
    use mpamflow_raw::fake::{FakeAccess, FakeMsc, FakeMscSpec};
    use std::sync::Arc;

    fn probed(spec: FakeMscSpec) -> (Device, Arc<FakeMsc>) {
        let msc = Arc::new(FakeMsc::new(0x1000, spec));
        let dev = Device::new(
            DeviceHandle(0),
            ComponentHandle(0),
            ClassHandle(0),
            CpuMask::first_n(1),
            msc.clone(),
            DeviceState::default(),
        );
        let _cpu = AffinityGuard::bind(0);
        probe(&mut dev.access().unwrap(), &mut SysProps::new(63, 3)).unwrap();
        msc.clear_log();
        (dev, msc)
    }

    #[test]
    fn test_reset_writes_defaults() {
        let (dev, msc) = probed(FakeMscSpec::cache(8, 40));
        let _cpu = AffinityGuard::bind(0);

        reset_partid(&dev.access().unwrap(), 3);

        assert_eq!(msc.partition_reg(3, MPAMCFG_CPBM), Some(u32::MAX));
        assert_eq!(msc.partition_reg(3, MPAMCFG_CPBM + 4), Some(0xFF));
        assert_eq!(msc.partition_reg(3, MPAMCFG_CPBM + 8), None);
        assert_eq!(msc.partition_reg(3, MPAMCFG_CMAX), Some(0xFF00));
    }

    #[test]
    fn test_reset_ordering() {
        let (dev, msc) = probed(FakeMscSpec::memory(8, 0));
        let _cpu = AffinityGuard::bind(0);

        reset_partid(&dev.access().unwrap(), 1);

        assert_eq!(
            msc.log(),
            vec![
                FakeAccess::Write(MPAMCFG_PART_SEL, 1),
                FakeAccess::WriteBarrier,
                FakeAccess::Write(MPAMCFG_MBW_MAX, 0xFF00),
                FakeAccess::FullBarrier,
            ]
        );
    }

    #[test]
    fn test_reset_priority_honours_polarity() {
        let (dev, msc) = probed(FakeMscSpec::default().with_priority(PriIdr {
            has_intpri: true,
            intpri_0_is_low: true,
            intpri_wd: 3,
            has_dspri: true,
            dspri_0_is_low: false,
            dspri_wd: 4,
        }));
        let _cpu = AffinityGuard::bind(0);

        reset_partid(&dev.access().unwrap(), 0);

        let pri = Pri::from_reg_value(msc.partition_reg(0, MPAMCFG_PRI).unwrap());
        assert_eq!(pri.intpri, 0x7);
        assert_eq!(pri.dspri, 0);
    }

    #[test]
    fn test_nothing_to_reset_without_part_sel() {
        let (dev, msc) = probed(FakeMscSpec::default().with_monitors(4, 4));
        let _cpu = AffinityGuard::bind(0);

        reset_partid(&dev.access().unwrap(), 0);
        assert!(msc.log().is_empty());
    }

    #[test]
    fn test_apply_config() {
        let (dev, msc) = probed(FakeMscSpec::memory(8, 16));
        let _cpu = AffinityGuard::bind(0);
        let access = dev.access().unwrap();

        apply_config(&access, &ComponentConfig::new(Feature::MbwMax, 5, 0x8000)).unwrap();
        assert_eq!(msc.partition_reg(5, MPAMCFG_MBW_MAX), Some(0x8000));
        assert_eq!(
            msc.log(),
            vec![
                FakeAccess::Write(MPAMCFG_PART_SEL, 5),
                FakeAccess::WriteBarrier,
                FakeAccess::Write(MPAMCFG_MBW_MAX, 0x8000),
                FakeAccess::FullBarrier,
            ]
        );
    }

    #[test]
    fn test_apply_rejections_leave_registers_alone() {
        let (dev, msc) = probed(FakeMscSpec::cache(8, 16));
        let _cpu = AffinityGuard::bind(0);
        let access = dev.access().unwrap();

        assert!(matches!(
            apply_config(&access, &ComponentConfig::new(Feature::MbwMax, 0, 1)),
            Err(MpamError::UnsupportedFeature("mbw_max"))
        ));
        let no_value = ComponentConfig {
            feature: Feature::CporPart,
            partid: 0,
            value: None,
        };
        assert!(matches!(
            apply_config(&access, &no_value),
            Err(MpamError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            apply_config(&access, &ComponentConfig::new(Feature::CcapPart, 0, 1)),
            Err(MpamError::UnknownFeature("ccap_part"))
        ));
        assert!(msc.log().is_empty());
        assert!(msc.partition_state().is_empty());
    }

    #[test]
    fn test_reset_apply_reset_round_trip() {
        let (dev, msc) = probed(FakeMscSpec::cache(8, 16).with_partid_max(7, 0));
        let _cpu = AffinityGuard::bind(0);
        let access = dev.access().unwrap();

        reset_device(&access, 7, |_| None);
        let pristine = msc.partition_state();

        apply_config(&access, &ComponentConfig::new(Feature::CporPart, 2, 0x3)).unwrap();
        assert_ne!(msc.partition_state(), pristine);

        reset_device(&access, 7, |_| None);
        assert_eq!(msc.partition_state(), pristine);
    }

    #[test]
    fn test_reset_reapplies_and_enables_errors() {
        let (dev, msc) = probed(FakeMscSpec::cache(8, 16).with_partid_max(3, 0));
        let _cpu = AffinityGuard::bind(0);
        let mut access = dev.access().unwrap();

        reset_device(&access, 3, |_| None);
        assert!(!error_irq_enabled(&access));

        access.state_mut().enable_error_irq = true;
        reset_device(&access, 3, |partid| {
            (partid == 1).then(|| ComponentConfig::new(Feature::CporPart, 1, 0xF))
        });
        assert!(error_irq_enabled(&access));
        assert_eq!(msc.partition_reg(1, MPAMCFG_CPBM), Some(0xF));
        assert_eq!(msc.partition_reg(2, MPAMCFG_CPBM), Some(0xFFFF));

        disable_error_irq(&access);
        assert!(!error_irq_enabled(&access));
    }
}
