//! Cache topology: which cache instance a CPU uses at each level

use std::collections::HashMap;
use std::path::PathBuf;

use crate::common::cpumask::CpuMask;

pub trait CacheTopology: Send + Sync {
    /// Id of the cache at `level` that `cpu` uses
    fn cache_id(&self, cpu: u32, level: u8) -> Option<u32>;

    /// Size in bytes of the cache at `level` that `cpu` uses
    fn cache_size(&self, cpu: u32, level: u8) -> Option<u64>;
}

/// Reads `/sys/devices/system/cpu/cpuN/cache/indexK`
pub struct SysfsCacheTopology {
    root: PathBuf,
}

impl Default for SysfsCacheTopology {
    fn default() -> Self {
        Self::new("/sys/devices/system/cpu")
    }
}

impl SysfsCacheTopology {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Find the `indexK` directory describing the unified or data cache
    /// at `level`
    fn index_dir(&self, cpu: u32, level: u8) -> Option<PathBuf> {
        let cache_dir = self.root.join(format!("cpu{cpu}")).join("cache");
        let entries = std::fs::read_dir(&cache_dir).ok()?;

        for entry in entries.flatten() {
            let path = entry.path();
            let is_index = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("index"));
            if !is_index {
                continue;
            }
            let lvl = read_trimmed(&path.join("level")).and_then(|s| s.parse::<u8>().ok());
            let kind = read_trimmed(&path.join("type")).unwrap_or_default();
            if lvl == Some(level) && kind != "Instruction" {
                return Some(path);
            }
        }
        None
    }
}

fn read_trimmed(path: &std::path::Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

/// Parse sysfs cache sizes like "1024K" or "32M"
pub fn parse_cache_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let (digits, scale) = match s.chars().last()? {
        'K' => (&s[..s.len() - 1], 1024),
        'M' => (&s[..s.len() - 1], 1024 * 1024),
        'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    digits.parse::<u64>().ok().map(|n| n * scale)
}

impl CacheTopology for SysfsCacheTopology {
    fn cache_id(&self, cpu: u32, level: u8) -> Option<u32> {
        let dir = self.index_dir(cpu, level)?;
        read_trimmed(&dir.join("id"))?.parse().ok()
    }

    fn cache_size(&self, cpu: u32, level: u8) -> Option<u64> {
        let dir = self.index_dir(cpu, level)?;
        parse_cache_size(&read_trimmed(&dir.join("size"))?)
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    id: u32,
    size: u64,
}

/// Cache topology given up front, used by the simulated platform
#[derive(Default)]
pub struct StaticCacheTopology {
    entries: HashMap<(u32, u8), CacheEntry>,
}

impl StaticCacheTopology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that every CPU in `cpus` shares cache `id` at `level`
    pub fn add_cache(&mut self, cpus: &CpuMask, level: u8, id: u32, size: u64) {
        for cpu in cpus.iter() {
            self.entries.insert((cpu, level), CacheEntry { id, size });
        }
    }
}

impl CacheTopology for StaticCacheTopology {
    fn cache_id(&self, cpu: u32, level: u8) -> Option<u32> {
        self.entries.get(&(cpu, level)).map(|e| e.id)
    }

    fn cache_size(&self, cpu: u32, level: u8) -> Option<u64> {
        self.entries.get(&(cpu, level)).map(|e| e.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_size() {
        assert_eq!(parse_cache_size("32K\n"), Some(32 * 1024));
        assert_eq!(parse_cache_size("2M"), Some(2 * 1024 * 1024));
        assert_eq!(parse_cache_size("512"), Some(512));
        assert_eq!(parse_cache_size("K"), None);
    }

    #[test]
    fn test_static_topology() {
        let mut caches = StaticCacheTopology::new();
        caches.add_cache(&CpuMask::parse_cpu_list("0-1").unwrap(), 2, 7, 1 << 20);

        assert_eq!(caches.cache_id(1, 2), Some(7));
        assert_eq!(caches.cache_size(0, 2), Some(1 << 20));
        assert_eq!(caches.cache_id(2, 2), None);
        assert_eq!(caches.cache_id(0, 3), None);
    }

    #[test]
    fn test_sysfs_topology() {
        let root = std::env::temp_dir().join(format!("mpamflow-cache-{}", std::process::id()));
        let index = root.join("cpu0/cache/index2");
        std::fs::create_dir_all(&index).unwrap();
        std::fs::write(index.join("level"), "2\n").unwrap();
        std::fs::write(index.join("type"), "Unified\n").unwrap();
        std::fs::write(index.join("id"), "4\n").unwrap();
        std::fs::write(index.join("size"), "1024K\n").unwrap();

        let caches = SysfsCacheTopology::new(&root);
        assert_eq!(caches.cache_id(0, 2), Some(4));
        assert_eq!(caches.cache_size(0, 2), Some(1024 * 1024));
        assert_eq!(caches.cache_id(0, 3), None);
        assert_eq!(caches.cache_id(1, 2), None);

        let _ = std::fs::remove_dir_all(&root);
    }
}
