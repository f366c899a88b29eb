// MPAM metrics: per-MSC state, per-class reconciled capabilities and
// system-wide limits

use crate::metric_enum;

metric_enum! {
    /// Gauges exported once per MSC
    pub enum DeviceMetric {
        Probed => ("mpam_msc_probed", "1 once the MSC has been probed"),
        OnlineCpus => ("mpam_msc_online_cpus", "Online CPUs currently serving the MSC"),
        ErrorIrqEnabled => (
            "mpam_msc_error_irq_enabled",
            "1 while the MSC error interrupt is registered"
        ),
    }
}

metric_enum! {
    /// Reconciled widths and counts exported once per class
    pub enum ClassMetric {
        Features => ("mpam_class_features", "Reconciled feature bits of the class"),
        CmaxWidth => ("mpam_class_cmax_wd", "Cache capacity fraction width"),
        CpbmWidth => ("mpam_class_cpbm_wd", "Cache portion bitmap width"),
        MbwPbmBits => ("mpam_class_mbw_pbm_bits", "Bandwidth portion bitmap width"),
        BwaWidth => ("mpam_class_bwa_wd", "Bandwidth fraction width"),
        IntpriWidth => ("mpam_class_intpri_wd", "Internal priority width"),
        DspriWidth => ("mpam_class_dspri_wd", "Downstream priority width"),
        CsuMonitors => ("mpam_class_num_csu_mon", "Cache storage usage monitors"),
        MbwuMonitors => ("mpam_class_num_mbwu_mon", "Bandwidth usage monitors"),
    }
}

metric_enum! {
    pub enum SystemMetric {
        Enabled => ("mpam_enabled", "1 once every MSC is probed and reconciled"),
        MaxPartid => ("mpam_max_partid", "Largest partition id every MSC supports"),
        MaxPmg => ("mpam_max_pmg", "Largest performance monitoring group"),
        LlcSize => ("mpam_llc_size_bytes", "Largest cache seen at a controlled level"),
        OnlineCpus => ("mpam_online_cpus", "CPUs the lifecycle has brought online"),
        RemoteCalls => ("mpam_remote_calls", "Jobs dispatched to another CPU"),
    }
}

impl ClassMetric {
    /// Value of this metric for a reconciled capability record
    pub fn value(&self, props: &crate::msc::features::MscProps) -> f64 {
        match self {
            ClassMetric::Features => props.features.bits() as f64,
            ClassMetric::CmaxWidth => props.cmax_wd as f64,
            ClassMetric::CpbmWidth => props.cpbm_wd as f64,
            ClassMetric::MbwPbmBits => props.mbw_pbm_bits as f64,
            ClassMetric::BwaWidth => props.bwa_wd as f64,
            ClassMetric::IntpriWidth => props.intpri_wd as f64,
            ClassMetric::DspriWidth => props.dspri_wd as f64,
            ClassMetric::CsuMonitors => props.num_csu_mon as f64,
            ClassMetric::MbwuMonitors => props.num_mbwu_mon as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msc::features::{FeatureSet, MscProps};

    #[test]
    fn test_class_metric_values() {
        let props = MscProps {
            features: FeatureSet::CPOR_PART | FeatureSet::CCAP_PART,
            cmax_wd: 8,
            cpbm_wd: 16,
            ..Default::default()
        };
        assert_eq!(ClassMetric::CmaxWidth.value(&props), 8.0);
        assert_eq!(ClassMetric::CpbmWidth.value(&props), 16.0);
        assert_eq!(ClassMetric::MbwuMonitors.value(&props), 0.0);
        assert_eq!(
            ClassMetric::Features.value(&props),
            (FeatureSet::CPOR_PART | FeatureSet::CCAP_PART).bits() as f64
        );
    }

    #[test]
    fn test_metric_names_are_unique() {
        let mut names: Vec<&str> = DeviceMetric::ALL.iter().map(|m| m.name()).collect();
        names.extend(ClassMetric::ALL.iter().map(|m| m.name()));
        names.extend(SystemMetric::ALL.iter().map(|m| m.name()));
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert!(SystemMetric::ALL.iter().all(|m| !m.help().is_empty()));
    }
}
