/// System-wide limits every MSC found so far can honour
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SysProps {
    pub max_partid: u16,
    pub max_pmg: u8,
    /// Largest cache seen at a cache class's level, in bytes
    pub llc_size: u64,
}

impl SysProps {
    /// Seed from the limits the CPUs report
    pub fn new(max_partid: u16, max_pmg: u8) -> Self {
        Self {
            max_partid,
            max_pmg,
            llc_size: 0,
        }
    }

    /// Never increases either limit
    pub fn narrow(&mut self, partid_max: u16, pmg_max: u8) {
        self.max_partid = self.max_partid.min(partid_max);
        self.max_pmg = self.max_pmg.min(pmg_max);
    }

    pub fn track_cache_size(&mut self, size: u64) {
        self.llc_size = self.llc_size.max(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_narrow_is_monotonic() {
        let mut props = SysProps::new(255, 7);
        props.narrow(63, 15);
        assert_eq!((props.max_partid, props.max_pmg), (63, 7));
        props.narrow(127, 1);
        assert_eq!((props.max_partid, props.max_pmg), (63, 1));
    }

    #[test]
    fn test_llc_size_keeps_largest() {
        let mut props = SysProps::new(0, 0);
        props.track_cache_size(1 << 20);
        props.track_cache_size(1 << 10);
        assert_eq!(props.llc_size, 1 << 20);
    }
}
