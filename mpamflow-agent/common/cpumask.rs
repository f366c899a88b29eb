use std::fmt;
use std::str::FromStr;

use crate::error::MpamError;

/// A set of CPU ids
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuMask {
    words: Vec<u64>,
}

impl CpuMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mask holding CPUs `0..count`
    pub fn first_n(count: u32) -> Self {
        (0..count).collect()
    }

    pub fn set(&mut self, cpu: u32) {
        let (word, bit) = Self::locate(cpu);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << bit;
    }

    pub fn clear(&mut self, cpu: u32) {
        let (word, bit) = Self::locate(cpu);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !(1 << bit);
        }
        self.trim();
    }

    pub fn clear_all(&mut self) {
        self.words.clear();
    }

    pub fn test(&self, cpu: u32) -> bool {
        let (word, bit) = Self::locate(cpu);
        self.words.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn weight(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Lowest CPU in the mask
    pub fn first(&self) -> Option<u32> {
        self.iter().next()
    }

    pub fn intersects(&self, other: &CpuMask) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    pub fn is_subset_of(&self, other: &CpuMask) -> bool {
        self.words.iter().enumerate().all(|(i, &w)| {
            let o = other.words.get(i).copied().unwrap_or(0);
            w & !o == 0
        })
    }

    pub fn union_with(&mut self, other: &CpuMask) {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= b;
        }
    }

    pub fn and(&self, other: &CpuMask) -> CpuMask {
        let mut out = CpuMask {
            words: self
                .words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| a & b)
                .collect(),
        };
        out.trim();
        out
    }

    /// CPUs in `self` but not in `other`
    pub fn difference(&self, other: &CpuMask) -> CpuMask {
        let mut out = CpuMask {
            words: self
                .words
                .iter()
                .enumerate()
                .map(|(i, &w)| w & !other.words.get(i).copied().unwrap_or(0))
                .collect(),
        };
        out.trim();
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..64u32)
                .filter(move |bit| w & (1 << bit) != 0)
                .map(move |bit| i as u32 * 64 + bit)
        })
    }

    /// Parse a sysfs style cpu list like "0-3,8-11"
    pub fn parse_cpu_list(s: &str) -> Option<Self> {
        let mut mask = CpuMask::new();
        let s = s.trim();
        if s.is_empty() {
            return Some(mask);
        }
        for part in s.split(',') {
            let part = part.trim();
            if let Some((start, end)) = part.split_once('-') {
                let start: u32 = start.trim().parse().ok()?;
                let end: u32 = end.trim().parse().ok()?;
                if start > end {
                    return None;
                }
                (start..=end).for_each(|cpu| mask.set(cpu));
            } else {
                mask.set(part.parse().ok()?);
            }
        }
        Some(mask)
    }

    fn locate(cpu: u32) -> (usize, u32) {
        ((cpu / 64) as usize, cpu % 64)
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }
}

impl FromIterator<u32> for CpuMask {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut mask = CpuMask::new();
        for cpu in iter {
            mask.set(cpu);
        }
        mask
    }
}

impl FromStr for CpuMask {
    type Err = MpamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_cpu_list(s)
            .ok_or_else(|| MpamError::Config(format!("Invalid cpu list: {s:?}")))
    }
}

impl fmt::Display for CpuMask {
    /// Formats as a cpu list, the inverse of [`CpuMask::parse_cpu_list`]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cpus: Vec<u32> = self.iter().collect();
        let mut first = true;
        let mut i = 0;
        while i < cpus.len() {
            let start = cpus[i];
            let mut end = start;
            while i + 1 < cpus.len() && cpus[i + 1] == end + 1 {
                i += 1;
                end = cpus[i];
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
            i += 1;
        }
        Ok(())
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuMask({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_list() {
        let mask = CpuMask::parse_cpu_list("0-3,8,70-71\n").unwrap();
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 8, 70, 71]);
        assert_eq!(mask.weight(), 7);
        assert_eq!(mask.to_string(), "0-3,8,70-71");

        assert!(CpuMask::parse_cpu_list("3-1").is_none());
        assert!(CpuMask::parse_cpu_list("x").is_none());
        assert!(CpuMask::parse_cpu_list("").unwrap().is_empty());
    }

    #[test]
    fn test_set_operations() {
        let a: CpuMask = [0, 1, 2].into_iter().collect();
        let b: CpuMask = [2, 3].into_iter().collect();

        assert!(a.intersects(&b));
        assert_eq!(a.and(&b).iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(a.difference(&b).to_string(), "0-1");
        assert!(!a.is_subset_of(&b));
        assert!(a.and(&b).is_subset_of(&a));

        let mut c = a.clone();
        c.union_with(&b);
        assert_eq!(c.to_string(), "0-3");
    }

    #[test]
    fn test_clear_to_empty() {
        let mut mask = CpuMask::new();
        mask.set(100);
        assert_eq!(mask.first(), Some(100));
        mask.clear(100);
        assert!(mask.is_empty());
        assert_eq!(mask, CpuMask::new());
    }
}
