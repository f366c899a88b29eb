//! Identification register layouts
//!
//! Each optional partitioning or monitoring group has a presence bit in
//! `MPAMF_IDR` and its own descriptor register giving widths and counts.

use crate::register::RegisterLayout;

fn bit(value: u32, n: u32) -> bool {
    (value >> n) & 1 != 0
}

fn set_bit(flag: bool, n: u32) -> u32 {
    (flag as u32) << n
}

/// `MPAMF_IDR` layout
///
/// ## Register Format
///
/// | Bits   | Field          | Description                         |
/// |--------|----------------|-------------------------------------|
/// | 0-15   | PARTID_MAX     | Largest supported partition id      |
/// | 16-23  | PMG_MAX        | Largest supported monitoring group  |
/// | 24     | HAS_CCAP_PART  | Cache capacity partitioning         |
/// | 25     | HAS_CPOR_PART  | Cache portion partitioning          |
/// | 26     | HAS_MBW_PART   | Memory bandwidth partitioning       |
/// | 27     | HAS_PRI_PART   | Priority partitioning               |
/// | 29     | HAS_IMPL_IDR   | Implementation-defined ID register  |
/// | 30     | HAS_MSMON      | Resource monitoring                 |
/// | 31     | HAS_PARTID_NRW | PARTID narrowing                    |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Idr {
    pub partid_max: u16,
    pub pmg_max: u8,
    pub has_ccap_part: bool,
    pub has_cpor_part: bool,
    pub has_mbw_part: bool,
    pub has_pri_part: bool,
    pub has_impl_idr: bool,
    pub has_msmon: bool,
    pub has_partid_nrw: bool,
}

impl RegisterLayout for Idr {
    fn to_reg_value(&self) -> u32 {
        (self.partid_max as u32)
            | ((self.pmg_max as u32) << 16)
            | set_bit(self.has_ccap_part, 24)
            | set_bit(self.has_cpor_part, 25)
            | set_bit(self.has_mbw_part, 26)
            | set_bit(self.has_pri_part, 27)
            | set_bit(self.has_impl_idr, 29)
            | set_bit(self.has_msmon, 30)
            | set_bit(self.has_partid_nrw, 31)
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            partid_max: (value & 0xFFFF) as u16,
            pmg_max: ((value >> 16) & 0xFF) as u8,
            has_ccap_part: bit(value, 24),
            has_cpor_part: bit(value, 25),
            has_mbw_part: bit(value, 26),
            has_pri_part: bit(value, 27),
            has_impl_idr: bit(value, 29),
            has_msmon: bit(value, 30),
            has_partid_nrw: bit(value, 31),
        }
    }
}

/// `MPAMF_CCAP_IDR` layout: `CMAX_WD` in bits 0-5
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CcapIdr {
    pub cmax_wd: u8,
}

impl RegisterLayout for CcapIdr {
    fn to_reg_value(&self) -> u32 {
        (self.cmax_wd as u32) & 0x3F
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            cmax_wd: (value & 0x3F) as u8,
        }
    }
}

/// `MPAMF_CPOR_IDR` layout: `CPBM_WD` in bits 0-15
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CporIdr {
    pub cpbm_wd: u16,
}

impl RegisterLayout for CporIdr {
    fn to_reg_value(&self) -> u32 {
        self.cpbm_wd as u32
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            cpbm_wd: (value & 0xFFFF) as u16,
        }
    }
}

/// `MPAMF_MBW_IDR` layout
///
/// ## Register Format
///
/// | Bits   | Field       | Description                             |
/// |--------|-------------|-----------------------------------------|
/// | 0-5    | BWA_WD      | Bandwidth fraction width                |
/// | 10     | HAS_MIN     | Minimum bandwidth control               |
/// | 11     | HAS_MAX     | Maximum bandwidth control               |
/// | 12     | HAS_PBM     | Bandwidth portion bitmap                |
/// | 13     | HAS_PROP    | Proportional stride control             |
/// | 14     | WINDWR      | Writable accounting window              |
/// | 16-28  | BWPBM_WD    | Bandwidth portion bitmap width          |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MbwIdr {
    pub bwa_wd: u8,
    pub has_min: bool,
    pub has_max: bool,
    pub has_pbm: bool,
    pub has_prop: bool,
    pub has_windwr: bool,
    pub bwpbm_wd: u16,
}

impl RegisterLayout for MbwIdr {
    fn to_reg_value(&self) -> u32 {
        ((self.bwa_wd as u32) & 0x3F)
            | set_bit(self.has_min, 10)
            | set_bit(self.has_max, 11)
            | set_bit(self.has_pbm, 12)
            | set_bit(self.has_prop, 13)
            | set_bit(self.has_windwr, 14)
            | (((self.bwpbm_wd as u32) & 0x1FFF) << 16)
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            bwa_wd: (value & 0x3F) as u8,
            has_min: bit(value, 10),
            has_max: bit(value, 11),
            has_pbm: bit(value, 12),
            has_prop: bit(value, 13),
            has_windwr: bit(value, 14),
            bwpbm_wd: ((value >> 16) & 0x1FFF) as u16,
        }
    }
}

/// `MPAMF_PRI_IDR` layout
///
/// ## Register Format
///
/// | Bits   | Field           | Description                          |
/// |--------|-----------------|--------------------------------------|
/// | 0      | HAS_INTPRI      | Internal priority                    |
/// | 1      | INTPRI_0_IS_LOW | Internal priority 0 is the lowest    |
/// | 4-9    | INTPRI_WD       | Internal priority width              |
/// | 16     | HAS_DSPRI       | Downstream priority                  |
/// | 17     | DSPRI_0_IS_LOW  | Downstream priority 0 is the lowest  |
/// | 20-25  | DSPRI_WD        | Downstream priority width            |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriIdr {
    pub has_intpri: bool,
    pub intpri_0_is_low: bool,
    pub intpri_wd: u8,
    pub has_dspri: bool,
    pub dspri_0_is_low: bool,
    pub dspri_wd: u8,
}

impl RegisterLayout for PriIdr {
    fn to_reg_value(&self) -> u32 {
        set_bit(self.has_intpri, 0)
            | set_bit(self.intpri_0_is_low, 1)
            | (((self.intpri_wd as u32) & 0x3F) << 4)
            | set_bit(self.has_dspri, 16)
            | set_bit(self.dspri_0_is_low, 17)
            | (((self.dspri_wd as u32) & 0x3F) << 20)
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            has_intpri: bit(value, 0),
            intpri_0_is_low: bit(value, 1),
            intpri_wd: ((value >> 4) & 0x3F) as u8,
            has_dspri: bit(value, 16),
            dspri_0_is_low: bit(value, 17),
            dspri_wd: ((value >> 20) & 0x3F) as u8,
        }
    }
}

/// `MPAMF_MSMON_IDR` layout: monitor kinds present
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsmonIdr {
    /// Cache storage usage monitors (bit 16)
    pub msmon_csu: bool,
    /// Memory bandwidth usage monitors (bit 17)
    pub msmon_mbwu: bool,
    /// Local capture event (bit 31)
    pub has_local_capt_evnt: bool,
}

impl RegisterLayout for MsmonIdr {
    fn to_reg_value(&self) -> u32 {
        set_bit(self.msmon_csu, 16)
            | set_bit(self.msmon_mbwu, 17)
            | set_bit(self.has_local_capt_evnt, 31)
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            msmon_csu: bit(value, 16),
            msmon_mbwu: bit(value, 17),
            has_local_capt_evnt: bit(value, 31),
        }
    }
}

/// `MPAMF_CSUMON_IDR` / `MPAMF_MBWUMON_IDR` layout: `NUM_MON` in bits 0-15
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonIdr {
    pub num_mon: u16,
}

impl RegisterLayout for MonIdr {
    fn to_reg_value(&self) -> u32 {
        self.num_mon as u32
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            num_mon: (value & 0xFFFF) as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idr_fields() {
        let idr = Idr::from_reg_value(0x4B07_003F);
        assert_eq!(idr.partid_max, 0x3F);
        assert_eq!(idr.pmg_max, 0x07);
        assert!(idr.has_ccap_part);
        assert!(idr.has_cpor_part);
        assert!(!idr.has_mbw_part);
        assert!(idr.has_pri_part);
        assert!(idr.has_msmon);
        assert!(!idr.has_partid_nrw);
    }

    #[test]
    fn test_mbw_idr_bitmap_width() {
        let raw = MbwIdr {
            bwa_wd: 8,
            has_max: true,
            has_pbm: true,
            bwpbm_wd: 0x1FFF,
            ..Default::default()
        }
        .to_reg_value();

        assert_eq!(raw & 0x3F, 8);
        assert_eq!(raw >> 16, 0x1FFF);
        assert_ne!(raw & (1 << 11), 0);
        assert_eq!(raw & (1 << 10), 0);
    }

    #[test]
    fn test_pri_idr_polarity_bits() {
        let pri = PriIdr::from_reg_value((1 << 16) | (1 << 17) | (3 << 20));
        assert!(!pri.has_intpri);
        assert!(pri.has_dspri);
        assert!(pri.dspri_0_is_low);
        assert_eq!(pri.dspri_wd, 3);
    }
}
