//! Minimal stand-in for the external process subsystem's per-process
//! bookkeeping.
//!
//! Address-space construction and process lifecycle control flow are out of
//! scope; but IPT and SwapTable chain-splice code needs somewhere to read
//! and write `n_frames`/`start_frame`/`last_frame`/`n_chunks`/`start_chunk`/
//! `last_chunk` for a given pid. `ProcessTable` reifies that storage as an
//! explicit, fixed-capacity pool instead of an ambient `curthread`.

use crate::config::MAX_PROCESSES;

/// A 6-bit process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u8);

impl ProcessId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Sentinel meaning "no frame/chunk", since 0 is a valid index.
pub const NONE: u32 = u32::MAX;

/// Per-process IPT/swap-table chain bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessDescriptor {
    pub pid: ProcessId,
    pub n_frames: u32,
    pub start_frame: u32,
    pub last_frame: u32,
    pub n_chunks: u32,
    pub start_chunk: u32,
    pub last_chunk: u32,
}

impl ProcessDescriptor {
    fn new(pid: ProcessId) -> Self {
        Self {
            pid,
            n_frames: 0,
            start_frame: NONE,
            last_frame: NONE,
            n_chunks: 0,
            start_chunk: NONE,
            last_chunk: NONE,
        }
    }
}

/// Fixed-capacity pool of `ProcessDescriptor`s, indexed by `ProcessId`.
pub struct ProcessTable {
    slots: [Option<ProcessDescriptor>; MAX_PROCESSES],
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_PROCESSES],
        }
    }

    /// Creates a zeroed descriptor for `pid`. Called once per process
    /// creation by the external subsystem.
    pub fn register(&mut self, pid: ProcessId) {
        self.slots[pid.index()] = Some(ProcessDescriptor::new(pid));
    }

    /// Drops the descriptor for `pid`. Must be called only after its IPT and
    /// swap-table chains are empty.
    pub fn unregister(&mut self, pid: ProcessId) {
        self.slots[pid.index()] = None;
    }

    pub fn get(&self, pid: ProcessId) -> Option<&ProcessDescriptor> {
        self.slots[pid.index()].as_ref()
    }

    pub fn get_mut(&mut self, pid: ProcessId) -> Option<&mut ProcessDescriptor> {
        self.slots[pid.index()].as_mut()
    }

    pub fn expect(&self, pid: ProcessId) -> &ProcessDescriptor {
        self.get(pid)
            .unwrap_or_else(|| panic!("CORRUPT_BOOKKEEPING: pid {:?} is not registered", pid))
    }

    pub fn expect_mut(&mut self, pid: ProcessId) -> &mut ProcessDescriptor {
        self.get_mut(pid)
            .unwrap_or_else(|| panic!("CORRUPT_BOOKKEEPING: pid {:?} is not registered", pid))
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
