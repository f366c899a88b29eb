pub mod mpam;

pub use mpam::MpamMetricExporter;
