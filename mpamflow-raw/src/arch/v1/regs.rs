//! Register offsets inside an MSC window

/// Size of the register window of one MSC
pub const MSC_WINDOW_SIZE: u32 = 0x3000;

/// Partitioning feature ID register
pub const MPAMF_IDR: u16 = 0x0000;
/// Architecture ID register
pub const MPAMF_AIDR: u16 = 0x0020;
/// Cache portion partitioning ID register
pub const MPAMF_CPOR_IDR: u16 = 0x0030;
/// Cache capacity partitioning ID register
pub const MPAMF_CCAP_IDR: u16 = 0x0038;
/// Memory bandwidth partitioning ID register
pub const MPAMF_MBW_IDR: u16 = 0x0040;
/// Priority partitioning ID register
pub const MPAMF_PRI_IDR: u16 = 0x0048;
/// Resource monitoring ID register
pub const MPAMF_MSMON_IDR: u16 = 0x0080;
/// Cache storage usage monitor ID register
pub const MPAMF_CSUMON_IDR: u16 = 0x0088;
/// Memory bandwidth usage monitor ID register
pub const MPAMF_MBWUMON_IDR: u16 = 0x0090;
/// Error control register
pub const MPAMF_ECR: u16 = 0x00F0;
/// Error status register
pub const MPAMF_ESR: u16 = 0x00F8;

/// Partition configuration selector
pub const MPAMCFG_PART_SEL: u16 = 0x0100;
/// Cache maximum capacity
pub const MPAMCFG_CMAX: u16 = 0x0108;
/// Memory bandwidth minimum
pub const MPAMCFG_MBW_MIN: u16 = 0x0200;
/// Memory bandwidth maximum
pub const MPAMCFG_MBW_MAX: u16 = 0x0208;
/// Priority partitioning
pub const MPAMCFG_PRI: u16 = 0x0400;
/// Memory bandwidth proportional stride
pub const MPAMCFG_MBW_PROP: u16 = 0x0500;
/// Cache portion bitmap, one 32-bit word per 32 portions
pub const MPAMCFG_CPBM: u16 = 0x1000;
/// Memory bandwidth portion bitmap, one 32-bit word per 32 portions
pub const MPAMCFG_MBW_PBM: u16 = 0x2000;
