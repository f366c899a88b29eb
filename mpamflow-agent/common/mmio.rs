//! Mapping MSC register windows by physical address

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use mpamflow_raw::fake::FakeMsc;
use mpamflow_raw::{DevMemWindow, MmioError, RegisterWindow};

use crate::error::Result;

/// Hands out the register window of the MSC at a physical address
pub trait WindowMapper: Send + Sync {
    fn map(&self, base: u64) -> Result<Arc<dyn RegisterWindow>>;
}

/// `/dev/mem` mappings, shared process wide and kept for its lifetime
pub struct DevMem {
    windows: RwLock<HashMap<u64, Arc<DevMemWindow>>>,
}

impl DevMem {
    fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
        }
    }

    pub fn instance() -> &'static DevMem {
        static INSTANCE: Lazy<DevMem> = Lazy::new(DevMem::new);
        &INSTANCE
    }

    fn get_window(&self, base: u64) -> Result<Arc<DevMemWindow>> {
        {
            let windows = self.windows.read();
            if let Some(window) = windows.get(&base) {
                return Ok(Arc::clone(window));
            }
        }

        let mut windows = self.windows.write();
        if let Some(window) = windows.get(&base) {
            return Ok(Arc::clone(window));
        }

        let window = Arc::new(DevMemWindow::map(base)?);
        tracing::info!("Mapped MSC window at 0x{:x}", base);
        windows.insert(base, Arc::clone(&window));
        Ok(window)
    }
}

impl WindowMapper for DevMem {
    fn map(&self, base: u64) -> Result<Arc<dyn RegisterWindow>> {
        let window: Arc<dyn RegisterWindow> = self.get_window(base)?;
        Ok(window)
    }
}

impl WindowMapper for &'static DevMem {
    fn map(&self, base: u64) -> Result<Arc<dyn RegisterWindow>> {
        (**self).map(base)
    }
}

/// Simulated MSCs, registered up front by base address
#[derive(Default)]
pub struct FakeWindows {
    windows: RwLock<HashMap<u64, Arc<FakeMsc>>>,
}

impl FakeWindows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, msc: FakeMsc) -> Arc<FakeMsc> {
        let msc = Arc::new(msc);
        self.windows
            .write()
            .insert(msc.base_address(), Arc::clone(&msc));
        msc
    }

    pub fn get(&self, base: u64) -> Option<Arc<FakeMsc>> {
        self.windows.read().get(&base).cloned()
    }

    pub fn all(&self) -> Vec<Arc<FakeMsc>> {
        let mut all: Vec<_> = self.windows.read().values().cloned().collect();
        all.sort_by_key(|m| m.base_address());
        all
    }
}

impl WindowMapper for FakeWindows {
    fn map(&self, base: u64) -> Result<Arc<dyn RegisterWindow>> {
        let msc = self.get(base).ok_or(MmioError::NoSuchWindow { base })?;
        let window: Arc<dyn RegisterWindow> = msc;
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MpamError;
    use mpamflow_raw::fake::FakeMscSpec;

    #[test]
    fn test_devmem_singleton() {
        let a = DevMem::instance();
        let b = DevMem::instance();
        assert!(std::ptr::eq(a, b));
    }

    #[test]
    fn test_fake_windows_lookup() {
        let windows = FakeWindows::new();
        windows.insert(FakeMsc::new(0x4000, FakeMscSpec::default()));

        let window = windows.map(0x4000).unwrap();
        assert_eq!(window.base_address(), 0x4000);

        assert!(matches!(
            windows.map(0x8000),
            Err(MpamError::Mapping(MmioError::NoSuchWindow { base: 0x8000 }))
        ));
    }
}
