//! Squash per-MSC capabilities into one record per class
//!
//! The class record is what every MSC in the class can do: bitmap features
//! survive only if every MSC has the same bitmap width, numeric widths and
//! counts take the minimum, and priority features survive only if every MSC
//! agrees on the polarity.

use crate::msc::features::{FeatureSet, MscProps};
use crate::topology::{ClassHandle, Topology};

/// Resolve differences between the running class record and one MSC
fn device_class_mismatch(class: &mut MscProps, dev: &MscProps) {
    if class.cpbm_wd != dev.cpbm_wd {
        class.clear(FeatureSet::CPOR_PART);
    }
    if class.mbw_pbm_bits != dev.mbw_pbm_bits {
        class.clear(FeatureSet::MBW_PART);
    }

    class.cmax_wd = class.cmax_wd.min(dev.cmax_wd);
    class.bwa_wd = class.bwa_wd.min(dev.bwa_wd);
    class.intpri_wd = class.intpri_wd.min(dev.intpri_wd);
    class.dspri_wd = class.dspri_wd.min(dev.dspri_wd);
    class.num_csu_mon = class.num_csu_mon.min(dev.num_csu_mon);
    class.num_mbwu_mon = class.num_mbwu_mon.min(dev.num_mbwu_mon);

    let intpri_low = FeatureSet::INTPRI_PART_0_LOW;
    if class.features.contains(intpri_low) != dev.features.contains(intpri_low) {
        class.clear(FeatureSet::INTPRI_PART | intpri_low);
    }
    let dspri_low = FeatureSet::DSPRI_PART_0_LOW;
    if class.features.contains(dspri_low) != dev.features.contains(dspri_low) {
        class.clear(FeatureSet::DSPRI_PART | dspri_low);
    }

    class.features &= dev.features;
}

/// Reconcile a sequence of MSC records, seeded from the first
pub fn reconcile_props<'a>(mut devices: impl Iterator<Item = &'a MscProps>) -> Option<MscProps> {
    let mut class = *devices.next()?;
    for dev in devices {
        device_class_mismatch(&mut class, dev);
    }
    Some(class)
}

/// Reconcile one class and publish the result
///
/// Freezes the capability record of every MSC in the class. Returns the
/// published record, which is the first one computed if the class was
/// already reconciled.
pub fn reconcile_class(topology: &Topology, class: ClassHandle) -> Option<MscProps> {
    let mut records = Vec::new();
    for comp in topology.components_of(class) {
        for dev in topology.devices_of(comp.handle()) {
            let mut state = dev.lock();
            state.caps_frozen = true;
            records.push(state.props);
        }
    }

    let props = reconcile_props(records.iter())?;
    let published = topology.publish_class_props(class, props);
    if published != props {
        tracing::warn!(
            "Class {} was already reconciled, keeping the first result",
            topology.class(class).label()
        );
    }
    tracing::info!(
        "Class {}: features {:?}",
        topology.class(class).label(),
        published.feature_names()
    );
    Some(published)
}

/// Reconcile every class
pub fn reconcile_all(topology: &Topology) {
    for class in topology.classes() {
        reconcile_class(topology, class.handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msc::features::Feature;

    fn cache(cmax_wd: u8, cpbm_wd: u16) -> MscProps {
        MscProps {
            features: FeatureSet::CCAP_PART | FeatureSet::CPOR_PART,
            cmax_wd,
            cpbm_wd,
            ..Default::default()
        }
    }

    #[test]
    fn test_bitmap_width_mismatch_drops_portion() {
        let devices = [cache(8, 13), cache(8, 17)];
        let class = reconcile_props(devices.iter()).unwrap();

        assert!(!class.has(Feature::CporPart));
        assert!(class.has(Feature::CcapPart));
        assert_eq!(class.cmax_wd, 8);
    }

    #[test]
    fn test_equal_widths_keep_features() {
        let devices = [cache(8, 16), cache(8, 16), cache(8, 16)];
        let class = reconcile_props(devices.iter()).unwrap();
        assert_eq!(class, cache(8, 16));
    }

    #[test]
    fn test_numeric_parameters_take_minimum() {
        let a = MscProps {
            features: FeatureSet::MBW_MAX | FeatureSet::MSMON_CSU | FeatureSet::MSMON_MBWU,
            bwa_wd: 12,
            num_csu_mon: 16,
            num_mbwu_mon: 4,
            ..Default::default()
        };
        let b = MscProps {
            bwa_wd: 8,
            num_csu_mon: 8,
            num_mbwu_mon: 6,
            ..a
        };
        let class = reconcile_props([a, b].iter()).unwrap();

        assert_eq!(class.bwa_wd, 8);
        assert_eq!(class.num_csu_mon, 8);
        assert_eq!(class.num_mbwu_mon, 4);
        assert!(class.has(Feature::MbwMax));
    }

    #[test]
    fn test_feature_missing_on_one_device_is_dropped() {
        let a = cache(8, 8);
        let mut b = cache(8, 8);
        b.clear(FeatureSet::CCAP_PART);

        let class = reconcile_props([a, b].iter()).unwrap();
        assert!(!class.has(Feature::CcapPart));
        assert!(class.has(Feature::CporPart));
    }

    #[test]
    fn test_priority_polarity_mismatch() {
        let high = MscProps {
            features: FeatureSet::INTPRI_PART | FeatureSet::DSPRI_PART,
            intpri_wd: 4,
            dspri_wd: 4,
            ..Default::default()
        };
        let low = MscProps {
            features: FeatureSet::INTPRI_PART
                | FeatureSet::INTPRI_PART_0_LOW
                | FeatureSet::DSPRI_PART,
            intpri_wd: 3,
            dspri_wd: 2,
            ..Default::default()
        };

        let class = reconcile_props([high, low].iter()).unwrap();
        assert!(!class.has(Feature::IntpriPart));
        assert!(!class.features.contains(FeatureSet::INTPRI_PART_0_LOW));
        assert!(class.has(Feature::DspriPart));
        assert_eq!(class.dspri_wd, 2);
    }

    #[test]
    fn test_never_probed_device_empties_class() {
        let class = reconcile_props([cache(8, 8), MscProps::default()].iter()).unwrap();
        assert!(class.features.is_empty());
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let devices = [cache(8, 13), cache(6, 17), cache(8, 13)];
        let once = reconcile_props(devices.iter()).unwrap();
        let again = reconcile_props([once].iter().chain(devices.iter())).unwrap();
        assert_eq!(once, again);
    }

    #[test]
    fn test_empty_class() {
        assert!(reconcile_props(std::iter::empty()).is_none());
    }
}
