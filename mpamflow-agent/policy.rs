//! The layer that decides what to program
//!
//! Once every MSC is probed the policy is handed the system view. During a
//! reset it is asked, per partition id, for any configuration it still
//! wants in place.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::Result;
use crate::msc::features::MscProps;
use crate::msc::partition::ComponentConfig;
use crate::topology::{Class, ClassHandle, ClassType, Component};

/// Capabilities of one class as the policy sees them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSummary {
    pub handle: ClassHandle,
    pub class_type: ClassType,
    pub level: u8,
    pub props: MscProps,
}

/// What discovery found, handed over once everything is probed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemView {
    pub max_partid: u16,
    pub max_pmg: u8,
    pub llc_size: u64,
    pub classes: Vec<ClassSummary>,
}

pub trait PartitionPolicy: Send + Sync {
    /// Capabilities are final; configuration may start
    fn init(&self, view: &SystemView) -> Result<()>;

    /// Configuration to restore for `partid` after `component` is reset
    fn converted_config(
        &self,
        class: &Class,
        component: &Component,
        partid: u16,
    ) -> Option<ComponentConfig>;

    fn cpu_online(&self, _cpu: u32) {}

    fn cpu_offline(&self, _cpu: u32) {}
}

/// Keeps hardware at its reset defaults
#[derive(Debug, Default)]
pub struct NullPolicy;

impl PartitionPolicy for NullPolicy {
    fn init(&self, view: &SystemView) -> Result<()> {
        tracing::info!(
            "MPAM enabled: {} classes, max_partid {}, max_pmg {}",
            view.classes.len(),
            view.max_partid,
            view.max_pmg
        );
        Ok(())
    }

    fn converted_config(&self, _: &Class, _: &Component, _: u16) -> Option<ComponentConfig> {
        None
    }
}

/// Key for a static configuration entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub class_type: ClassType,
    pub level: u8,
    pub component_id: u32,
    pub partid: u16,
}

/// Fixed configuration loaded from the platform description
#[derive(Default)]
pub struct StaticPolicy {
    configs: HashMap<PartitionKey, ComponentConfig>,
    view: RwLock<Option<SystemView>>,
}

impl StaticPolicy {
    pub fn new(entries: impl IntoIterator<Item = (PartitionKey, ComponentConfig)>) -> Self {
        Self {
            configs: entries.into_iter().collect(),
            view: RwLock::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn view(&self) -> Option<SystemView> {
        self.view.read().clone()
    }
}

impl PartitionPolicy for StaticPolicy {
    fn init(&self, view: &SystemView) -> Result<()> {
        for (key, cfg) in &self.configs {
            if key.partid > view.max_partid {
                tracing::warn!(
                    "Static config for partid {} exceeds max_partid {}, it will not be applied",
                    key.partid,
                    view.max_partid
                );
                continue;
            }
            let supported = view.classes.iter().any(|c| {
                c.class_type == key.class_type && c.level == key.level && c.props.has(cfg.feature)
            });
            if !supported {
                tracing::warn!(
                    "Static config for {}{} uses {}, which the class does not support",
                    key.class_type.name(),
                    key.level,
                    cfg.feature.name()
                );
            }
        }
        tracing::info!(
            "Static policy initialised with {} entries, max_partid {}",
            self.configs.len(),
            view.max_partid
        );
        *self.view.write() = Some(view.clone());
        Ok(())
    }

    fn converted_config(
        &self,
        class: &Class,
        component: &Component,
        partid: u16,
    ) -> Option<ComponentConfig> {
        let key = PartitionKey {
            class_type: class.class_type(),
            level: class.level(),
            component_id: component.id(),
            partid,
        };
        self.configs.get(&key).copied()
    }

    fn cpu_online(&self, cpu: u32) {
        tracing::debug!("Policy: CPU {} online", cpu);
    }

    fn cpu_offline(&self, cpu: u32) {
        tracing::debug!("Policy: CPU {} offline", cpu);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::cpumask::CpuMask;
    use crate::common::mmio::FakeWindows;
    use crate::msc::features::Feature;
    use crate::topology::{SysProps, TopologyBuilder};
    use mpamflow_raw::fake::{FakeMsc, FakeMscSpec};

    #[test]
    fn test_static_policy_lookup() {
        let windows = FakeWindows::new();
        windows.insert(FakeMsc::new(0x1000, FakeMscSpec::cache(8, 8)));
        let mut builder = TopologyBuilder::new(SysProps::new(63, 3), CpuMask::first_n(1));
        builder
            .device_create(3, ClassType::Cache, 2, None, &windows, 0x1000)
            .unwrap();
        let topology = builder.build().unwrap();
        let class = &topology.classes()[0];
        let comp = topology.component(class.components()[0]);

        let cfg = ComponentConfig::new(Feature::CporPart, 4, 0xF);
        let key = PartitionKey {
            class_type: ClassType::Cache,
            level: 3,
            component_id: 2,
            partid: 4,
        };
        let policy = StaticPolicy::new([(key, cfg)]);

        assert_eq!(policy.converted_config(class, comp, 4), Some(cfg));
        assert_eq!(policy.converted_config(class, comp, 5), None);
        assert!(NullPolicy.converted_config(class, comp, 4).is_none());

        assert!(policy.view().is_none());
        policy.init(&SystemView::default()).unwrap();
        assert_eq!(policy.view(), Some(SystemView::default()));
    }
}
