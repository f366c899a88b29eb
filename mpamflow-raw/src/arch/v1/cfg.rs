//! Partition configuration register layouts

use crate::register::{genmask, RegisterLayout};

/// `MPAMCFG_PART_SEL` layout
///
/// Selects the partition id that subsequent `MPAMCFG_*` accesses apply to.
/// A write must be ordered before any dependent configuration write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartSel {
    pub partid: u16,
}

impl RegisterLayout for PartSel {
    fn to_reg_value(&self) -> u32 {
        self.partid as u32
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            partid: (value & 0xFFFF) as u16,
        }
    }
}

/// `MPAMCFG_PRI` layout
///
/// | Bits   | Field  | Description          |
/// |--------|--------|----------------------|
/// | 0-15   | INTPRI | Internal priority    |
/// | 16-31  | DSPRI  | Downstream priority  |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pri {
    pub intpri: u16,
    pub dspri: u16,
}

/// Bit offset of `DSPRI` in `MPAMCFG_PRI`
pub const MPAMCFG_PRI_DSPRI_SHIFT: u32 = 16;

impl RegisterLayout for Pri {
    fn to_reg_value(&self) -> u32 {
        (self.intpri as u32) | ((self.dspri as u32) << MPAMCFG_PRI_DSPRI_SHIFT)
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            intpri: (value & 0xFFFF) as u16,
            dspri: (value >> MPAMCFG_PRI_DSPRI_SHIFT) as u16,
        }
    }
}

/// Fixed-point fraction with the `wd` most significant bits of a 16-bit
/// field set, i.e. the largest value a `wd`-bit fraction can express.
///
/// Used for `MPAMCFG_CMAX` and `MPAMCFG_MBW_MAX`.
pub fn fraction_max(wd: u8) -> u32 {
    let wd = wd.min(16) as u32;
    if wd == 0 {
        return 0;
    }
    genmask(15, 16 - wd)
}

/// Value of the last bitmap word for a `wd`-bit portion bitmap, or `None`
/// when `wd` is a multiple of 32 and no partial word exists.
pub fn bitmap_tail(wd: u16) -> Option<u32> {
    match wd % 32 {
        0 => None,
        rem => Some(genmask(rem as u32 - 1, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_max() {
        assert_eq!(fraction_max(0), 0);
        assert_eq!(fraction_max(1), 0x8000);
        assert_eq!(fraction_max(8), 0xFF00);
        assert_eq!(fraction_max(16), 0xFFFF);
    }

    #[test]
    fn test_bitmap_tail() {
        assert_eq!(bitmap_tail(13), Some(0x1FFF));
        assert_eq!(bitmap_tail(32), None);
        assert_eq!(bitmap_tail(33), Some(0x1));
    }

    #[test]
    fn test_pri_layout() {
        let pri = Pri {
            intpri: 0x7,
            dspri: 0x3,
        };
        assert_eq!(pri.to_reg_value(), 0x0003_0007);
        assert_eq!(Pri::from_reg_value(0x0003_0007), pri);
    }
}
