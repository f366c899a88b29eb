//! A simulated machine built from a platform description
//!
//! Every MSC becomes a [`FakeMsc`], the cache list becomes a static cache
//! topology and error lines are delivered through a [`SoftIrqController`].

use std::sync::{Arc, Weak};

use mpamflow_raw::current_arch::features::PriIdr;
use mpamflow_raw::fake::{FakeMsc, FakeMscSpec};

use crate::common::cacheinfo::StaticCacheTopology;
use crate::common::cpumask::CpuMask;
use crate::common::irq::SoftIrqController;
use crate::common::mmio::FakeWindows;
use crate::config::{PlatformConfig, SimulatedMsc};
use crate::orchestrator::Platform;

pub struct Simulation {
    pub windows: Arc<FakeWindows>,
    pub caches: Arc<StaticCacheTopology>,
    pub irqs: Arc<SoftIrqController>,
}

/// Identification registers for a simulated MSC
pub fn fake_spec(sim: &SimulatedMsc) -> FakeMscSpec {
    let mut spec = FakeMscSpec::default();
    if let Some(aidr) = sim.aidr {
        spec.aidr = aidr;
    }
    if let Some(partid_max) = sim.partid_max {
        spec.idr.partid_max = partid_max;
    }
    if let Some(pmg_max) = sim.pmg_max {
        spec.idr.pmg_max = pmg_max;
    }

    if sim.cmax_wd != 0 {
        spec.idr.has_ccap_part = true;
        spec.ccap.cmax_wd = sim.cmax_wd;
    }
    if sim.cpbm_wd != 0 {
        spec.idr.has_cpor_part = true;
        spec.cpor.cpbm_wd = sim.cpbm_wd;
    }
    if sim.bwa_wd != 0 || sim.mbw_pbm_bits != 0 || sim.mbw_prop {
        spec.idr.has_mbw_part = true;
        spec.mbw.bwa_wd = sim.bwa_wd;
        spec.mbw.has_max = sim.bwa_wd != 0;
        spec.mbw.has_min = sim.mbw_min && sim.bwa_wd != 0;
        spec.mbw.has_pbm = sim.mbw_pbm_bits != 0;
        spec.mbw.bwpbm_wd = sim.mbw_pbm_bits;
        spec.mbw.has_prop = sim.mbw_prop;
    }
    if sim.intpri_wd != 0 || sim.dspri_wd != 0 {
        spec = spec.with_priority(PriIdr {
            has_intpri: sim.intpri_wd != 0,
            intpri_0_is_low: sim.intpri_0_is_low,
            intpri_wd: sim.intpri_wd,
            has_dspri: sim.dspri_wd != 0,
            dspri_0_is_low: sim.dspri_0_is_low,
            dspri_wd: sim.dspri_wd,
        });
    }
    if sim.csu_monitors != 0 || sim.mbwu_monitors != 0 {
        spec = spec.with_monitors(sim.csu_monitors, sim.mbwu_monitors);
    }
    spec
}

impl Simulation {
    pub fn from_config(config: &PlatformConfig) -> Self {
        let windows = Arc::new(FakeWindows::new());
        let irqs = Arc::new(SoftIrqController::new());

        for msc in &config.devices {
            let fake = windows.insert(FakeMsc::new(msc.base_address, fake_spec(&msc.simulate)));
            if let Some(irq) = msc.error_irq {
                let controller: Weak<SoftIrqController> = Arc::downgrade(&irqs);
                fake.set_irq_hook(move || {
                    if let Some(controller) = controller.upgrade() {
                        controller.raise(irq.line);
                    }
                });
            }
        }

        let mut caches = StaticCacheTopology::new();
        for cache in &config.caches {
            caches.add_cache(&cache.cpus, cache.level, cache.id, cache.size);
        }

        tracing::info!(
            "Simulating {} MSCs and {} caches",
            config.devices.len(),
            config.caches.len()
        );

        Self {
            windows,
            caches: Arc::new(caches),
            irqs,
        }
    }

    pub fn platform(&self, possible_cpus: CpuMask) -> Platform {
        Platform {
            windows: Arc::clone(&self.windows) as _,
            caches: Arc::clone(&self.caches) as _,
            irqs: Arc::clone(&self.irqs) as _,
            possible_cpus,
            pin_threads: false,
        }
    }

    pub fn msc(&self, base: u64) -> Option<Arc<FakeMsc>> {
        self.windows.get(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::cacheinfo::CacheTopology;
    use mpamflow_raw::current_arch::MPAM_ARCHITECTURE_V1;

    #[test]
    fn test_fake_spec_from_widths() {
        let spec = fake_spec(&SimulatedMsc {
            cpbm_wd: 12,
            bwa_wd: 8,
            mbw_min: true,
            csu_monitors: 4,
            ..Default::default()
        });

        assert_eq!(spec.aidr, MPAM_ARCHITECTURE_V1);
        assert!(spec.idr.has_cpor_part);
        assert!(!spec.idr.has_ccap_part);
        assert!(spec.idr.has_mbw_part);
        assert!(spec.mbw.has_max && spec.mbw.has_min && !spec.mbw.has_pbm);
        assert!(!spec.idr.has_pri_part);
        assert!(spec.idr.has_msmon);
        assert_eq!(spec.csumon.num_mon, 4);
    }

    #[test]
    fn test_simulation_wires_error_line() {
        let config = PlatformConfig::from_json(
            r#"{
                "max_partid": 15,
                "possible_cpus": "0-1",
                "devices": [{
                    "class": "memory", "component_id": 0, "affinity": "0-1",
                    "base_address": "0x4000",
                    "error_irq": { "line": 9, "mode": "edge" }
                }],
                "caches": [{ "cpus": "0-1", "level": 2, "id": 7, "size": 1048576 }]
            }"#,
        )
        .unwrap();
        let sim = Simulation::from_config(&config);

        let fake = sim.msc(0x4000).unwrap();
        // No handler yet, and ECR.INTEN is clear
        assert!(!fake.inject_error(1, 0));
        assert_eq!(sim.irqs.handler_count(9), 0);

        assert_eq!(sim.caches.cache_id(1, 2), Some(7));
        assert_eq!(sim.caches.cache_size(0, 2), Some(1 << 20));
    }
}
