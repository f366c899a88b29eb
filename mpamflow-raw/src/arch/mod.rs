//! Architecture-revision register definitions
//!
//! MSC register maps are versioned by the `MPAMF_AIDR` register. This module
//! groups the definitions per architecture revision.
//!
//! ## Supported Revisions
//!
//! - **MPAM v1.0** (`v1` feature)
//! - MPAM v1.1 (`v1_1` feature) - Coming soon

#[cfg(feature = "v1")]
pub mod v1;
