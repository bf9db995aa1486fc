//! Host-only test fixtures shared across module test suites.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::block_device::FileBlockDevice;

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Removes the backing file on drop, so repeated test runs never collide on
/// a leftover swap area.
pub struct TempFileGuard(PathBuf);

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Creates a fresh, zero-filled swap file of `chunk_count` chunks in the
/// system temp directory and opens it as a `FileBlockDevice`.
pub fn temp_swap_file(chunk_count: u32) -> (FileBlockDevice, TempFileGuard) {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!("ipt-vm-core-test-{}-{}.swap", std::process::id(), n));
    let dev = FileBlockDevice::create(&path, chunk_count);
    (dev, TempFileGuard(path))
}
