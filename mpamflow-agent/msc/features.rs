//! What an MSC, or a whole class of them, can do

use bitflags::bitflags;

bitflags! {
    /// Features an MSC supports and that have a usable width or count
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct FeatureSet: u32 {
        const CCAP_PART = 1 << 0;
        const CPOR_PART = 1 << 1;
        const MBW_PART = 1 << 2;
        const MBW_MIN = 1 << 3;
        const MBW_MAX = 1 << 4;
        const MBW_PROP = 1 << 5;
        const INTPRI_PART = 1 << 6;
        const INTPRI_PART_0_LOW = 1 << 7;
        const DSPRI_PART = 1 << 8;
        const DSPRI_PART_0_LOW = 1 << 9;
        const MSMON_CSU = 1 << 10;
        const MSMON_MBWU = 1 << 11;
    }
}

impl FeatureSet {
    /// Features that need `MPAMCFG_PART_SEL` to program
    pub const PARTITIONING: FeatureSet = FeatureSet::CCAP_PART
        .union(FeatureSet::CPOR_PART)
        .union(FeatureSet::MBW_PART)
        .union(FeatureSet::MBW_MIN)
        .union(FeatureSet::MBW_MAX)
        .union(FeatureSet::MBW_PROP)
        .union(FeatureSet::INTPRI_PART)
        .union(FeatureSet::DSPRI_PART);
}

crate::feature_enum! {
    /// A single configurable or monitorable feature
    pub enum Feature: FeatureSet {
        CcapPart => ("ccap_part", FeatureSet::CCAP_PART),
        CporPart => ("cpor_part", FeatureSet::CPOR_PART),
        MbwPart => ("mbw_part", FeatureSet::MBW_PART),
        MbwMin => ("mbw_min", FeatureSet::MBW_MIN),
        MbwMax => ("mbw_max", FeatureSet::MBW_MAX),
        MbwProp => ("mbw_prop", FeatureSet::MBW_PROP),
        IntpriPart => ("intpri_part", FeatureSet::INTPRI_PART),
        DspriPart => ("dspri_part", FeatureSet::DSPRI_PART),
        MsmonCsu => ("msmon_csu", FeatureSet::MSMON_CSU),
        MsmonMbwu => ("msmon_mbwu", FeatureSet::MSMON_MBWU),
    }
}

/// Capability record of one MSC, or the reconciled record of a class
///
/// Widths and counts are only meaningful while the matching feature is
/// present. A never-probed MSC has the default record: nothing present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MscProps {
    pub features: FeatureSet,
    pub cmax_wd: u8,
    pub cpbm_wd: u16,
    pub mbw_pbm_bits: u16,
    pub bwa_wd: u8,
    pub intpri_wd: u8,
    pub dspri_wd: u8,
    pub num_csu_mon: u16,
    pub num_mbwu_mon: u16,
}

impl MscProps {
    pub fn has(&self, feature: Feature) -> bool {
        self.features.contains(feature.flag())
    }

    pub fn has_part_sel(&self) -> bool {
        self.features.intersects(FeatureSet::PARTITIONING)
    }

    pub fn set(&mut self, flags: FeatureSet) {
        self.features.insert(flags);
    }

    pub fn clear(&mut self, flags: FeatureSet) {
        self.features.remove(flags);
    }

    /// Names of the features present, in declaration order
    pub fn feature_names(&self) -> Vec<&'static str> {
        Feature::present_in(self.features).map(|f| f.name()).collect()
    }
}
