use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MpamError {
    #[error("Failed to map MSC registers: {0}")]
    Mapping(#[from] mpamflow_raw::MmioError),

    #[error("MSC at 0x{base:x} is not MPAM v1.0 (AIDR 0x{aidr:x})")]
    ArchitectureMismatch { base: u64, aidr: u32 },

    #[error("MSC at 0x{base:x} is not reachable from CPU {cpu:?}")]
    NotAffine { base: u64, cpu: Option<u32> },

    #[error("Feature {0} is not supported by this MSC")]
    UnsupportedFeature(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Feature {0} cannot be configured")]
    UnknownFeature(&'static str),

    #[error("Capabilities of MSC at 0x{0:x} are frozen")]
    CapabilitiesFrozen(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Interrupt error: {0}")]
    Irq(String),

    #[error("Affinity operation failed: {0}")]
    Affinity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Nix error: {0}")]
    Nix(#[from] nix::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

pub type Result<T> = std::result::Result<T, MpamError>;
