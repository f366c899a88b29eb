// Macros (must be first for visibility)
#[macro_use]
pub mod macros;

pub mod common;
pub mod config;
pub mod error;
pub mod metrics;
pub mod msc;
pub mod orchestrator;
pub mod policy;
pub mod prom;
pub mod sim;
pub mod topology;

pub use config::PlatformConfig;
pub use error::{MpamError, Result};
pub use orchestrator::{CpuSource, Mpam, MpamSupervisor, Platform, SupervisorConfig};
pub use policy::{NullPolicy, PartitionPolicy, StaticPolicy};
pub use prom::MpamMetricExporter;
