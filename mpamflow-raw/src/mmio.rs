//! MMIO (memory-mapped register) read/write primitives
//!
//! An MSC exposes its registers in a single page-sized window. This module
//! defines the [`RegisterWindow`] access trait and a live implementation that
//! maps the window through `/dev/mem`.
//!
//! Locking and CPU-affinity checks are the caller's job: a window performs
//! raw accesses only.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{fence, Ordering};

#[cfg(target_arch = "aarch64")]
use core::arch::asm;

use crate::current_arch::regs::MSC_WINDOW_SIZE;

pub type Result<T> = std::result::Result<T, MmioError>;

/// Errors that can occur while mapping an MSC window
#[derive(Debug, thiserror::Error)]
pub enum MmioError {
    #[error("Failed to open /dev/mem for MSC at 0x{base:X}: {source}")]
    OpenFailed { base: u64, source: std::io::Error },

    #[error("Failed to map MSC window at 0x{base:X}: {source}")]
    MapFailed { base: u64, source: std::io::Error },

    #[error("No MSC window at 0x{base:X}")]
    NoSuchWindow { base: u64 },
}

/// Raw 32-bit access to one MSC register window
///
/// Offsets are byte offsets inside the window and must be below
/// [`MSC_WINDOW_SIZE`].
pub trait RegisterWindow: Send + Sync {
    /// Read a 32-bit register
    fn read32(&self, offset: u16) -> u32;

    /// Write a 32-bit register
    fn write32(&self, offset: u16, value: u32);

    /// Order earlier writes before later writes (`wmb()`)
    fn write_barrier(&self) {
        fence(Ordering::Release);
    }

    /// Complete all earlier accesses before anything that follows (`mb()`)
    fn full_barrier(&self) {
        fence(Ordering::SeqCst);
    }

    /// Physical base address of the window
    fn base_address(&self) -> u64;
}

/// Data synchronization barrier over stores (`dsb st`)
///
/// Device writes before it complete before any later access.
pub fn dsb_st() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: `dsb` does not violate safe Rust guarantees.
    unsafe {
        asm!("dsb st", options(nostack, preserves_flags));
    }
    #[cfg(not(target_arch = "aarch64"))]
    fence(Ordering::Release);
}

/// Full-system data synchronization barrier (`dsb sy`)
pub fn dsb_sy() {
    #[cfg(target_arch = "aarch64")]
    // SAFETY: `dsb` does not violate safe Rust guarantees.
    unsafe {
        asm!("dsb sy", options(nostack, preserves_flags));
    }
    #[cfg(not(target_arch = "aarch64"))]
    fence(Ordering::SeqCst);
}

/// An MSC window mapped from `/dev/mem`
pub struct DevMemWindow {
    base: u64,
    mapping: *mut u8,
    map_len: usize,
    page_offset: usize,
    _file: File,
}

// SAFETY: the mapping is owned by this struct for its whole life and all
// accesses are volatile 32-bit loads/stores; callers serialise them with the
// per-device lock.
unsafe impl Send for DevMemWindow {}
// SAFETY: see above.
unsafe impl Sync for DevMemWindow {}

impl DevMemWindow {
    /// Map the MSC window that starts at physical address `base`
    ///
    /// # Errors
    ///
    /// Returns an error if `/dev/mem` cannot be opened (requires root and a
    /// kernel without `STRICT_DEVMEM` for MMIO ranges) or the mapping fails.
    pub fn map(base: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC) // Uncached device access
            .open("/dev/mem")
            .map_err(|e| MmioError::OpenFailed { base, source: e })?;

        // SAFETY: sysconf has no preconditions.
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
        let page_size = if page_size == 0 { 4096 } else { page_size };
        let aligned = base & !(page_size - 1);
        let page_offset = (base - aligned) as usize;
        let map_len = page_offset + MSC_WINDOW_SIZE as usize;

        // SAFETY: mapping a fresh region chosen by the kernel; the fd stays
        // open for the life of the mapping.
        let mapping = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                aligned as libc::off_t,
            )
        };
        if mapping == libc::MAP_FAILED {
            return Err(MmioError::MapFailed {
                base,
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(Self {
            base,
            mapping: mapping as *mut u8,
            map_len,
            page_offset,
            _file: file,
        })
    }

    fn reg_ptr(&self, offset: u16) -> *mut u32 {
        assert!(
            (offset as u32) + 4 <= MSC_WINDOW_SIZE,
            "MSC register offset 0x{offset:X} outside window"
        );
        // SAFETY: bounds checked above, the mapping covers page_offset +
        // MSC_WINDOW_SIZE bytes.
        unsafe { self.mapping.add(self.page_offset + offset as usize) as *mut u32 }
    }
}

impl RegisterWindow for DevMemWindow {
    fn read32(&self, offset: u16) -> u32 {
        // SAFETY: reg_ptr returns an aligned pointer inside the live mapping.
        unsafe { std::ptr::read_volatile(self.reg_ptr(offset)) }
    }

    fn write32(&self, offset: u16, value: u32) {
        // SAFETY: reg_ptr returns an aligned pointer inside the live mapping.
        unsafe { std::ptr::write_volatile(self.reg_ptr(offset), value) }
    }

    fn write_barrier(&self) {
        dsb_st();
    }

    fn full_barrier(&self) {
        dsb_sy();
    }

    fn base_address(&self) -> u64 {
        self.base
    }
}

impl Drop for DevMemWindow {
    fn drop(&mut self) {
        // SAFETY: unmapping exactly the region returned by mmap.
        unsafe {
            libc::munmap(self.mapping as *mut libc::c_void, self.map_len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmio_error_display() {
        let err = MmioError::OpenFailed {
            base: 0x1000,
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(err.to_string().contains("Failed to open /dev/mem"));
        assert!(err.to_string().contains("0x1000"));
    }

    #[test]
    fn test_barriers_complete_on_host() {
        // Both lower to `dsb` on aarch64 and to fences elsewhere
        dsb_st();
        dsb_sy();
    }
}
