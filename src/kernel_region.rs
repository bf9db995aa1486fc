//! Tracks outstanding contiguous kernel-page allocations so `free_kpages`
//! can find the frame run to release by matching the kernel virtual
//! address it was handed at `alloc_kpages` time.
//!
//! Grounded on `original_source/src/kern/vm/paging.c`'s `k_frames` table:
//! a fixed pool, here reworked into the free/in-use singly linked index
//! pools the design notes call for instead of a parallel pointer array.

use alloc::vec;
use alloc::vec::Vec;

use crate::config::MAX_PROCESSES;
use crate::process::ProcessId;

const NONE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy)]
struct Slot {
    in_use: bool,
    next: u32,
    owner_pid: ProcessId,
    base_frame: u32,
    n_frames: u32,
    kvaddr: u32,
}

impl Slot {
    fn free() -> Self {
        Self {
            in_use: false,
            next: NONE,
            owner_pid: ProcessId(0),
            base_frame: 0,
            n_frames: 0,
            kvaddr: 0,
        }
    }
}

/// A released kernel region, describing the frame run to return to the IPT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleasedRegion {
    pub owner_pid: ProcessId,
    pub base_frame: u32,
    pub n_frames: u32,
}

pub struct KernelRegionTable {
    slots: Vec<Slot>,
    free_head: u32,
    in_use_head: u32,
}

impl KernelRegionTable {
    /// Builds a pool of `MAX_PROCESSES` slots, all on the free list.
    pub fn new() -> Self {
        let mut slots = vec![Slot::free(); MAX_PROCESSES];
        for i in 0..MAX_PROCESSES - 1 {
            slots[i].next = i as u32 + 1;
        }
        Self {
            slots,
            free_head: 0,
            in_use_head: NONE,
        }
    }

    /// Records a new outstanding run. Panics if the pool is exhausted
    /// (more distinct kernel runs outstanding than `MAX_PROCESSES`).
    pub fn record(&mut self, owner_pid: ProcessId, base_frame: u32, n_frames: u32, kvaddr: u32) {
        if self.free_head == NONE {
            panic!("CORRUPT_BOOKKEEPING: kernel region pool exhausted");
        }
        let slot = self.free_head;
        self.free_head = self.slots[slot as usize].next;

        self.slots[slot as usize] = Slot {
            in_use: true,
            next: self.in_use_head,
            owner_pid,
            base_frame,
            n_frames,
            kvaddr,
        };
        self.in_use_head = slot;
        log::debug!("kernel_region: recorded run base={base_frame} n={n_frames} kvaddr={kvaddr:#x}");
    }

    /// Finds and removes the run registered under `kvaddr`. A miss is
    /// fatal: it indicates a double free or corrupted bookkeeping.
    pub fn release(&mut self, kvaddr: u32) -> ReleasedRegion {
        let mut prev: Option<u32> = None;
        let mut i = self.in_use_head;
        while i != NONE {
            if self.slots[i as usize].kvaddr == kvaddr {
                let next = self.slots[i as usize].next;
                match prev {
                    Some(p) => self.slots[p as usize].next = next,
                    None => self.in_use_head = next,
                }
                let released = ReleasedRegion {
                    owner_pid: self.slots[i as usize].owner_pid,
                    base_frame: self.slots[i as usize].base_frame,
                    n_frames: self.slots[i as usize].n_frames,
                };
                self.slots[i as usize] = Slot {
                    next: self.free_head,
                    ..Slot::free()
                };
                self.free_head = i;
                log::debug!("kernel_region: released run base={} n={}", released.base_frame, released.n_frames);
                return released;
            }
            prev = Some(i);
            i = self.slots[i as usize].next;
        }
        panic!("CORRUPT_BOOKKEEPING: free_kpages({kvaddr:#x}) matches no outstanding kernel region");
    }
}

impl Default for KernelRegionTable {
    fn default() -> Self {
        Self::new()
    }
}
