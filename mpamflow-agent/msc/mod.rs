//! Memory-system components: the MSCs themselves

pub mod device;
pub mod error_irq;
pub mod features;
pub mod partition;
pub mod probe;

pub use device::{Device, DeviceState, IrqLine, RegisterAccess};
pub use error_irq::{handle_error_irq, ErrorStats};
pub use features::{Feature, FeatureSet, MscProps};
pub use partition::ComponentConfig;
