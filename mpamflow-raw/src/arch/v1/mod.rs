//! MPAM v1.0 memory-system component register definitions
//!
//! ## Register Groups
//!
//! - **regs** - Register offsets inside the MSC window
//! - **features** - Identification registers (`MPAMF_*IDR`)
//! - **cfg** - Partition configuration registers (`MPAMCFG_*`)
//! - **errors** - Error control and status (`MPAMF_ECR`, `MPAMF_ESR`)
//!
//! ## References
//!
//! - Arm® Architecture Reference Manual Supplement, Memory System Resource
//!   Partitioning and Monitoring (MPAM), for Armv8-A (DDI 0598)

pub mod cfg;
pub mod errors;
pub mod features;
pub mod regs;

/// Value `MPAMF_AIDR` reads back on an MPAM v1.0 MSC
pub const MPAM_ARCHITECTURE_V1: u32 = 0x10;
