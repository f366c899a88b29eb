pub mod affinity;
pub mod cacheinfo;
pub mod cpumask;
pub mod executor;
pub mod hotplug;
pub mod irq;
pub mod mmio;

pub use affinity::{current_cpu, AffinityGuard};
pub use cacheinfo::{CacheTopology, StaticCacheTopology, SysfsCacheTopology};
pub use cpumask::CpuMask;
pub use executor::CoreExecutors;
pub use hotplug::{CpuHotplug, HotplugGuard};
pub use irq::{IrqController, IrqHandler, IrqReturn, IrqTrigger, SoftIrqController};
pub use mmio::{DevMem, FakeWindows, WindowMapper};
