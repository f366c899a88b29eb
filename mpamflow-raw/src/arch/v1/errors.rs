//! Error control and status register layouts

use crate::register::RegisterLayout;

/// `MPAMF_ECR` layout: `INTEN` in bit 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ecr {
    pub inten: bool,
}

/// `MPAMF_ECR.INTEN`
pub const MPAMF_ECR_INTEN: u32 = 1;

impl RegisterLayout for Ecr {
    fn to_reg_value(&self) -> u32 {
        if self.inten {
            MPAMF_ECR_INTEN
        } else {
            0
        }
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            inten: value & MPAMF_ECR_INTEN != 0,
        }
    }
}

/// Error codes reported in `MPAMF_ESR.ERRCODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0,
    PartidSelRange = 1,
    ReqPartidRange = 2,
    MsmonCfgIdRange = 3,
    ReqPmgRange = 4,
    MonitorRange = 5,
    IntPartidRange = 6,
    UnexpectedInternal = 7,
}

impl ErrorCode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => ErrorCode::None,
            1 => ErrorCode::PartidSelRange,
            2 => ErrorCode::ReqPartidRange,
            3 => ErrorCode::MsmonCfgIdRange,
            4 => ErrorCode::ReqPmgRange,
            5 => ErrorCode::MonitorRange,
            6 => ErrorCode::IntPartidRange,
            7 => ErrorCode::UnexpectedInternal,
            _ => return None,
        })
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::None => "No Error",
            ErrorCode::PartidSelRange => "Out of range PARTID selected",
            ErrorCode::ReqPartidRange => "Out of range PARTID requested",
            ErrorCode::MsmonCfgIdRange => "Out of range Monitor:PARTID or PMG written",
            ErrorCode::ReqPmgRange => "Out of range PMG requested",
            ErrorCode::MonitorRange => "Out of range Monitor selected",
            // PARTID narrowing is never enabled, so these two are unexpected
            ErrorCode::IntPartidRange => "Out of range Internal-PARTID written",
            ErrorCode::UnexpectedInternal => "Internal-PARTID set but not expected",
        }
    }

    pub fn all() -> Vec<ErrorCode> {
        (0..8).filter_map(ErrorCode::from_raw).collect()
    }
}

/// `MPAMF_ESR` layout
///
/// ## Register Format
///
/// | Bits   | Field       | Description                          |
/// |--------|-------------|--------------------------------------|
/// | 0-15   | PARTID_MON  | Partition id or monitor of the error |
/// | 16-23  | PMG         | Monitoring group of the error        |
/// | 24-27  | ERRCODE     | Error code, 0 for none               |
/// | 31     | OVRWR       | An earlier error was overwritten     |
///
/// Writing zero clears the error and deasserts a level-triggered line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Esr {
    pub partid_mon: u16,
    pub pmg: u8,
    pub errcode: u8,
    pub overwritten: bool,
}

/// Bit offset of `ERRCODE` in `MPAMF_ESR`
pub const MPAMF_ESR_ERRCODE_SHIFT: u32 = 24;
/// Mask of `ERRCODE` in `MPAMF_ESR`
pub const MPAMF_ESR_ERRCODE: u32 = 0xF << MPAMF_ESR_ERRCODE_SHIFT;

impl Esr {
    pub fn code(&self) -> Option<ErrorCode> {
        ErrorCode::from_raw(self.errcode)
    }
}

impl RegisterLayout for Esr {
    fn to_reg_value(&self) -> u32 {
        (self.partid_mon as u32)
            | ((self.pmg as u32) << 16)
            | (((self.errcode as u32) << MPAMF_ESR_ERRCODE_SHIFT) & MPAMF_ESR_ERRCODE)
            | ((self.overwritten as u32) << 31)
    }

    fn from_reg_value(value: u32) -> Self {
        Self {
            partid_mon: (value & 0xFFFF) as u16,
            pmg: ((value >> 16) & 0xFF) as u8,
            errcode: ((value & MPAMF_ESR_ERRCODE) >> MPAMF_ESR_ERRCODE_SHIFT) as u8,
            overwritten: (value >> 31) & 1 != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esr_errcode_extraction() {
        let esr = Esr::from_reg_value(0x8402_0005);
        assert_eq!(esr.errcode, 4);
        assert_eq!(esr.code(), Some(ErrorCode::ReqPmgRange));
        assert_eq!(esr.pmg, 2);
        assert_eq!(esr.partid_mon, 5);
        assert!(esr.overwritten);
    }

    #[test]
    fn test_unknown_errcode() {
        let esr = Esr::from_reg_value(0x0C00_0000);
        assert_eq!(esr.errcode, 12);
        assert_eq!(esr.code(), None);
    }

    #[test]
    fn test_error_code_table() {
        assert_eq!(ErrorCode::all().len(), 8);
        assert_eq!(
            ErrorCode::PartidSelRange.description(),
            "Out of range PARTID selected"
        );
    }
}
