//! # mpamflow-raw
//!
//! Register definitions for Arm MPAM (Memory System Resource Partitioning
//! and Monitoring) memory-system components, usually called MSCs.
//!
//! This crate provides type-safe layouts for the MSC identification,
//! configuration and error registers, plus the [`RegisterWindow`] trait
//! through which a mapped MSC page is read and written.
//!
//! ## Features
//!
//! Select the architecture revision via feature flags:
//! - `v1` (default) - MPAM v1.0 register map
//! - `fakes` - an in-memory [`fake::FakeMsc`] for tests and simulation
//!
//! ## Usage
//!
//! ```ignore
//! use mpamflow_raw::current_arch::{features, regs};
//! use mpamflow_raw::{DevMemWindow, RegisterLayout, RegisterWindow};
//!
//! let window = DevMemWindow::map(0x1000_0000)?;
//! let idr = features::Idr::from_reg_value(window.read32(regs::MPAMF_IDR));
//! println!("max partid {}", idr.partid_max);
//! ```

pub mod arch;
pub mod mmio;
pub mod register;

#[cfg(any(test, feature = "fakes"))]
pub mod fake;

pub use mmio::{DevMemWindow, MmioError, RegisterWindow, Result};
pub use register::{genmask, Register, RegisterLayout};

#[cfg(feature = "v1")]
pub use arch::v1 as current_arch;
