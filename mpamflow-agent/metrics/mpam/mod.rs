pub mod types;

pub use types::{ClassMetric, DeviceMetric, SystemMetric};
