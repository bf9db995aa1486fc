//! TLB adapter: a primitive capability, not implemented by this crate.
//!
//! `install`/`invalidate` stand in for the hardware TLB interface. A real
//! kernel wires a driver that talks to the MIPS TLB directly; tests use a
//! recording fake so Section 8's scenarios can assert on what was installed.

use alloc::vec::Vec;

/// Installs and invalidates hardware TLB entries.
pub trait Tlb {
    /// Write a `(vaddr, paddr)` translation into the TLB. Replacement of an
    /// existing entry for the same slot is hardware/driver defined.
    fn install(&mut self, vaddr: u32, paddr: u32);

    /// Search for and clear any entry pointing at `paddr`.
    fn invalidate(&mut self, paddr: u32);
}

/// Production-shaped no-op, useful when only the bookkeeping side of a
/// scenario matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTlb;

impl Tlb for NullTlb {
    fn install(&mut self, _vaddr: u32, _paddr: u32) {}
    fn invalidate(&mut self, _paddr: u32) {}
}

/// Records every install/invalidate call, for test assertions.
#[derive(Debug, Default, Clone)]
pub struct RecordingTlb {
    pub installed: Vec<(u32, u32)>,
    pub invalidated: Vec<u32>,
}

impl RecordingTlb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_installed(&self, vaddr: u32, paddr: u32) -> bool {
        self.installed.iter().any(|&(v, p)| v == vaddr && p == paddr)
    }
}

impl Tlb for RecordingTlb {
    fn install(&mut self, vaddr: u32, paddr: u32) {
        self.installed.push((vaddr, paddr));
    }

    fn invalidate(&mut self, paddr: u32) {
        self.invalidated.push(paddr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tlb_tracks_install_and_invalidate() {
        let mut tlb = RecordingTlb::new();
        tlb.install(0x400000, 0x1000);
        tlb.invalidate(0x1000);
        assert!(tlb.is_installed(0x400000, 0x1000));
        assert_eq!(tlb.invalidated, alloc::vec![0x1000]);
    }
}
