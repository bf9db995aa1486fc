//! Raw block-device I/O: a primitive capability, not implemented by this
//! crate for production use.
//!
//! `BlockDevice` is the seam the external-collaborator carve-out ("block-device
//! I/O primitives" / "raw block device"). A real kernel implements it over
//! the VFS `lhd0raw:` vnode; the `std`-backed `FileBlockDevice` below exists
//! only so the core's chunk-bookkeeping logic can be exercised against a
//! real file in host tests, the same way the reference kernel's own
//! `#![cfg_attr(not(test), no_std)]` split lets its test builds use `std`.

use crate::config::PAGE_SIZE;
use crate::error::DeviceError;

/// Page-granular transfers against a raw, metadata-free block store.
pub trait BlockDevice {
    /// Total number of `PAGE_SIZE` chunks the device holds.
    fn chunk_count(&self) -> u32;

    /// Read one full page at `chunk_index * PAGE_SIZE` into `dst`.
    fn read_page(&mut self, chunk_index: u32, dst: &mut [u8; PAGE_SIZE]) -> Result<(), DeviceError>;

    /// Write one full page at `chunk_index * PAGE_SIZE` from `src`.
    fn write_page(&mut self, chunk_index: u32, src: &[u8; PAGE_SIZE]) -> Result<(), DeviceError>;
}

#[cfg(any(test, feature = "test-util"))]
pub use self::file_backed::FileBlockDevice;

#[cfg(any(test, feature = "test-util"))]
mod file_backed {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::path::Path;

    /// `std::fs::File`-backed `BlockDevice`, sized to a whole number of
    /// `PAGE_SIZE` chunks. Test-only: production builds supply their own
    /// implementation over the kernel's VFS layer.
    pub struct FileBlockDevice {
        file: File,
        chunk_count: u32,
    }

    impl FileBlockDevice {
        /// Opens `path` read-write and derives the chunk count from the
        /// file's length. Failure to open is fatal.
        pub fn init(path: &Path) -> Self {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .unwrap_or_else(|e| panic!("VM: failed to open swap area {path:?}: {e}"));
            let len = file
                .metadata()
                .unwrap_or_else(|e| panic!("VM: failed to stat swap area {path:?}: {e}"))
                .len();
            let chunk_count = (len / PAGE_SIZE as u64) as u32;
            Self { file, chunk_count }
        }

        /// Creates a fresh, zero-filled swap file of `chunk_count` chunks at
        /// `path`, then opens it. Test-only convenience.
        pub fn create(path: &Path, chunk_count: u32) -> Self {
            {
                let mut file = File::create(path).expect("failed to create swap area");
                let zeros = vec![0u8; PAGE_SIZE];
                for _ in 0..chunk_count {
                    file.write_all(&zeros).expect("failed to extend swap area");
                }
            }
            Self::init(path)
        }
    }

    impl BlockDevice for FileBlockDevice {
        fn chunk_count(&self) -> u32 {
            self.chunk_count
        }

        fn read_page(&mut self, chunk_index: u32, dst: &mut [u8; PAGE_SIZE]) -> Result<(), DeviceError> {
            self.file
                .seek(SeekFrom::Start(chunk_index as u64 * PAGE_SIZE as u64))
                .map_err(|_| DeviceError::ReadFailed)?;
            self.file.read_exact(dst).map_err(|_| DeviceError::ReadFailed)
        }

        fn write_page(&mut self, chunk_index: u32, src: &[u8; PAGE_SIZE]) -> Result<(), DeviceError> {
            self.file
                .seek(SeekFrom::Start(chunk_index as u64 * PAGE_SIZE as u64))
                .map_err(|_| DeviceError::WriteFailed)?;
            self.file.write_all(src).map_err(|_| DeviceError::WriteFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_swap_file;

    #[test]
    fn file_block_device_derives_chunk_count_from_file_size() {
        let (dev, _guard) = temp_swap_file(16);
        assert_eq!(dev.chunk_count(), 16);
    }

    #[test]
    fn file_block_device_roundtrips_a_page() {
        let (mut dev, _guard) = temp_swap_file(4);
        let mut page = [0u8; PAGE_SIZE];
        page[0] = 0xAB;
        page[PAGE_SIZE - 1] = 0xCD;
        dev.write_page(2, &page).unwrap();

        let mut out = [0u8; PAGE_SIZE];
        dev.read_page(2, &mut out).unwrap();
        assert_eq!(out, page);
    }
}
