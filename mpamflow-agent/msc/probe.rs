use mpamflow_raw::current_arch::features::{
    CcapIdr, CporIdr, Idr, MbwIdr, MonIdr, MsmonIdr, PriIdr,
};
use mpamflow_raw::current_arch::regs::*;
use mpamflow_raw::current_arch::MPAM_ARCHITECTURE_V1;
use mpamflow_raw::RegisterLayout;

use crate::error::{MpamError, Result};
use crate::msc::device::RegisterAccess;
use crate::msc::features::{FeatureSet, MscProps};
use crate::topology::SysProps;

/// Read the identification registers of an MSC into its capability record
///
/// Narrows the system-wide partid and pmg limits to what this MSC
/// supports. A feature is only recorded when it is present and its width or
/// count is non-zero.
pub fn probe(access: &mut RegisterAccess<'_>, sysprops: &mut SysProps) -> Result<()> {
    let base = access.device().base_address();
    if access.state().caps_frozen {
        return Err(MpamError::CapabilitiesFrozen(base));
    }

    let aidr = access.read(MPAMF_AIDR);
    if aidr != MPAM_ARCHITECTURE_V1 {
        tracing::warn!("MSC at 0x{:x}: unsupported architecture 0x{:x}", base, aidr);
        return Err(MpamError::ArchitectureMismatch { base, aidr });
    }

    let idr = Idr::from_reg_value(access.read(MPAMF_IDR));
    sysprops.narrow(idr.partid_max, idr.pmg_max);

    let mut props = MscProps::default();

    if idr.has_ccap_part {
        let ccap = CcapIdr::from_reg_value(access.read(MPAMF_CCAP_IDR));
        props.cmax_wd = ccap.cmax_wd;
        if props.cmax_wd != 0 {
            props.set(FeatureSet::CCAP_PART);
        }
    }

    if idr.has_cpor_part {
        let cpor = CporIdr::from_reg_value(access.read(MPAMF_CPOR_IDR));
        props.cpbm_wd = cpor.cpbm_wd;
        if props.cpbm_wd != 0 {
            props.set(FeatureSet::CPOR_PART);
        }
    }

    if idr.has_mbw_part {
        let mbw = MbwIdr::from_reg_value(access.read(MPAMF_MBW_IDR));
        props.bwa_wd = mbw.bwa_wd;
        if mbw.has_pbm {
            props.mbw_pbm_bits = mbw.bwpbm_wd;
            if props.mbw_pbm_bits != 0 {
                props.set(FeatureSet::MBW_PART);
            }
        }
        if props.bwa_wd != 0 {
            if mbw.has_min {
                props.set(FeatureSet::MBW_MIN);
            }
            if mbw.has_max {
                props.set(FeatureSet::MBW_MAX);
            }
            if mbw.has_prop {
                props.set(FeatureSet::MBW_PROP);
            }
        }
    }

    if idr.has_pri_part {
        let pri = PriIdr::from_reg_value(access.read(MPAMF_PRI_IDR));
        if pri.has_intpri && pri.intpri_wd != 0 {
            props.intpri_wd = pri.intpri_wd;
            props.set(FeatureSet::INTPRI_PART);
            if pri.intpri_0_is_low {
                props.set(FeatureSet::INTPRI_PART_0_LOW);
            }
        }
        if pri.has_dspri && pri.dspri_wd != 0 {
            props.dspri_wd = pri.dspri_wd;
            props.set(FeatureSet::DSPRI_PART);
            if pri.dspri_0_is_low {
                props.set(FeatureSet::DSPRI_PART_0_LOW);
            }
        }
    }

    if idr.has_msmon {
        let msmon = MsmonIdr::from_reg_value(access.read(MPAMF_MSMON_IDR));
        if msmon.msmon_csu {
            props.num_csu_mon = MonIdr::from_reg_value(access.read(MPAMF_CSUMON_IDR)).num_mon;
            if props.num_csu_mon != 0 {
                props.set(FeatureSet::MSMON_CSU);
            }
        }
        if msmon.msmon_mbwu {
            props.num_mbwu_mon =
                MonIdr::from_reg_value(access.read(MPAMF_MBWUMON_IDR)).num_mon;
            if props.num_mbwu_mon != 0 {
                props.set(FeatureSet::MSMON_MBWU);
            }
        }
    }

    tracing::debug!(
        "Probed MSC at 0x{:x} from CPU {}: partid_max {} pmg_max {} features {:?}",
        base,
        access.cpu(),
        idr.partid_max,
        idr.pmg_max,
        props.feature_names()
    );

    let state = access.state_mut();
    state.props = props;
    state.probed = true;
    Ok(())
}
