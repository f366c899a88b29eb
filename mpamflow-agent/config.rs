use serde::{Deserialize, Deserializer};
use std::path::Path;

use crate::common::cacheinfo::parse_cache_size;
use crate::common::cpumask::CpuMask;
use crate::common::irq::IrqTrigger;
use crate::error::{MpamError, Result};
use crate::msc::device::MPAM_IRQ_MODE_LEVEL;
use crate::msc::features::Feature;
use crate::msc::partition::ComponentConfig;
use crate::policy::PartitionKey;
use crate::topology::ClassType;

const CPU_SYSFS: &str = "/sys/devices/system/cpu";

/// Description of the machine's MSCs, in place of the firmware table
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// Largest partition id the CPUs support; absent when they lack MPAM
    pub max_partid: Option<u16>,
    #[serde(default)]
    pub max_pmg: u8,
    /// Defaults to the possible CPUs sysfs reports
    #[serde(default, deserialize_with = "de_cpu_list")]
    pub possible_cpus: Option<CpuMask>,
    pub devices: Vec<MscConfig>,
    #[serde(default)]
    pub partitions: Vec<PartitionConfig>,
    /// Cache topology for `--simulate`; live runs read sysfs
    #[serde(default)]
    pub caches: Vec<CacheConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MscConfig {
    pub class: ClassType,
    #[serde(default)]
    pub level: u8,
    pub component_id: u32,
    /// Absent for caches whose CPUs come from the cache topology
    #[serde(default, deserialize_with = "de_cpu_list")]
    pub affinity: Option<CpuMask>,
    #[serde(deserialize_with = "de_address")]
    pub base_address: u64,
    pub error_irq: Option<IrqConfig>,
    pub overflow_irq: Option<IrqConfig>,
    /// Identification registers of the simulated MSC
    #[serde(default)]
    pub simulate: SimulatedMsc,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct IrqConfig {
    pub line: u32,
    pub mode: IrqTrigger,
}

impl IrqConfig {
    /// Firmware-style flags for this line
    pub fn flags(&self) -> u32 {
        match self.mode {
            IrqTrigger::Level => MPAM_IRQ_MODE_LEVEL,
            IrqTrigger::Edge => 0,
        }
    }
}

/// What a simulated MSC reports; zero widths leave the feature out
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct SimulatedMsc {
    pub partid_max: Option<u16>,
    pub pmg_max: Option<u8>,
    pub cmax_wd: u8,
    pub cpbm_wd: u16,
    pub bwa_wd: u8,
    pub mbw_pbm_bits: u16,
    pub mbw_min: bool,
    pub mbw_prop: bool,
    pub intpri_wd: u8,
    pub intpri_0_is_low: bool,
    pub dspri_wd: u8,
    pub dspri_0_is_low: bool,
    pub csu_monitors: u16,
    pub mbwu_monitors: u16,
    /// Report an architecture revision other than v1.0
    pub aidr: Option<u32>,
}

/// A static configuration value handed to the policy layer
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PartitionConfig {
    pub class: ClassType,
    #[serde(default)]
    pub level: u8,
    pub component_id: u32,
    pub partid: u16,
    pub feature: Feature,
    pub value: u32,
}

impl PartitionConfig {
    pub fn entry(&self) -> (PartitionKey, ComponentConfig) {
        (
            PartitionKey {
                class_type: self.class,
                level: self.level,
                component_id: self.component_id,
                partid: self.partid,
            },
            ComponentConfig::new(self.feature, self.partid, self.value),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(deserialize_with = "de_required_cpu_list")]
    pub cpus: CpuMask,
    pub level: u8,
    pub id: u32,
    #[serde(default, deserialize_with = "de_size")]
    pub size: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

fn de_address<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse(),
            };
            parsed.map_err(|_| serde::de::Error::custom(format!("invalid address {s:?}")))
        }
    }
}

fn de_size<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => parse_cache_size(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid cache size {s:?}"))),
    }
}

fn de_cpu_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<CpuMask>, D::Error> {
    Option::<String>::deserialize(deserializer)?
        .map(|s| s.parse().map_err(serde::de::Error::custom))
        .transpose()
}

fn de_required_cpu_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<CpuMask, D::Error> {
    String::deserialize(deserializer)?
        .parse()
        .map_err(serde::de::Error::custom)
}

impl PlatformConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json(&text)?;
        tracing::info!(
            "Loaded {} MSCs and {} partition entries from {}",
            config.devices.len(),
            config.partitions.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut bases: Vec<u64> = self.devices.iter().map(|d| d.base_address).collect();
        bases.sort_unstable();
        if let Some(pair) = bases.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(MpamError::Config(format!(
                "Two MSCs share base address 0x{:x}",
                pair[0]
            )));
        }
        Ok(())
    }

    /// Possible CPUs from the description, else from sysfs
    pub fn possible_cpus(&self) -> CpuMask {
        self.possible_cpus
            .clone()
            .unwrap_or_else(detect_possible_cpus)
    }

    /// Static policy entries
    pub fn partition_entries(&self) -> Vec<(PartitionKey, ComponentConfig)> {
        self.partitions.iter().map(PartitionConfig::entry).collect()
    }
}

fn read_cpu_list(name: &str) -> Option<CpuMask> {
    std::fs::read_to_string(format!("{CPU_SYSFS}/{name}"))
        .ok()
        .and_then(|s| CpuMask::parse_cpu_list(&s))
        .filter(|mask| !mask.is_empty())
}

/// Detect online CPUs from /sys/devices/system/cpu/online
pub fn detect_online_cpus() -> CpuMask {
    read_cpu_list("online").unwrap_or_else(|| {
        tracing::warn!("Failed to detect online CPUs, using default: 0-7");
        CpuMask::first_n(8)
    })
}

/// Detect possible CPUs from /sys/devices/system/cpu/possible
pub fn detect_possible_cpus() -> CpuMask {
    read_cpu_list("possible").unwrap_or_else(|| {
        tracing::warn!("Failed to detect possible CPUs, using online CPUs");
        detect_online_cpus()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLATFORM: &str = r#"{
        "max_partid": 31,
        "max_pmg": 1,
        "possible_cpus": "0-3",
        "devices": [
            {
                "class": "cache", "level": 3, "component_id": 0,
                "base_address": "0x10000",
                "error_irq": { "line": 40, "mode": "edge" },
                "simulate": { "cmax_wd": 8, "cpbm_wd": 16 }
            },
            {
                "class": "memory", "component_id": 1, "affinity": "0-1",
                "base_address": 131072,
                "error_irq": { "line": 41, "mode": "level" }
            }
        ],
        "partitions": [
            { "class": "cache", "level": 3, "component_id": 0, "partid": 2,
              "feature": "cpor_part", "value": 255 }
        ],
        "caches": [ { "cpus": "0-3", "level": 3, "id": 0, "size": "32M" } ]
    }"#;

    #[test]
    fn test_parse_platform() {
        let config = PlatformConfig::from_json(PLATFORM).unwrap();

        assert_eq!(config.max_partid, Some(31));
        assert_eq!(config.possible_cpus().to_string(), "0-3");
        assert_eq!(config.devices.len(), 2);

        let cache = &config.devices[0];
        assert_eq!(cache.class, ClassType::Cache);
        assert_eq!(cache.base_address, 0x10000);
        assert!(cache.affinity.is_none());
        assert_eq!(cache.error_irq.unwrap().flags(), 0);
        assert_eq!(cache.simulate.cpbm_wd, 16);

        let memory = &config.devices[1];
        assert_eq!(memory.level, 0);
        assert_eq!(memory.base_address, 0x20000);
        assert_eq!(memory.affinity.as_ref().unwrap().to_string(), "0-1");
        assert_eq!(memory.error_irq.unwrap().flags(), MPAM_IRQ_MODE_LEVEL);

        let (key, cfg) = config.partition_entries()[0];
        assert_eq!(key.partid, 2);
        assert_eq!(cfg.feature, Feature::CporPart);
        assert_eq!(cfg.value, Some(255));

        assert_eq!(config.caches[0].size, 32 * 1024 * 1024);
    }

    #[test]
    fn test_rejects_bad_input() {
        let bad_cpus = PLATFORM.replace("\"0-3\",\n        \"devices\"", "\"3-0\",\n        \"devices\"");
        assert!(PlatformConfig::from_json(&bad_cpus).is_err());

        let duplicate = PLATFORM.replace("131072", "65536");
        assert!(matches!(
            PlatformConfig::from_json(&duplicate),
            Err(MpamError::Config(_))
        ));

        let bad_address = PLATFORM.replace("0x10000", "0xZZ");
        assert!(matches!(
            PlatformConfig::from_json(&bad_address),
            Err(MpamError::Json(_))
        ));
    }
}
