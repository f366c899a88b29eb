//! Driving the MPAM topology: discovery, CPU lifecycle, configuration
//! broadcast and the agent's supervisor loop

pub mod broadcast;
pub mod collector;
mod lifecycle;
pub mod mpam;


pub use broadcast::ConfigUpdate;
pub use collector::{CpuSource, MpamSupervisor, SupervisorConfig};
pub use mpam::{Mpam, Platform};
