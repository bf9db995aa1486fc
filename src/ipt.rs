//! Inverted page table: frame allocation, per-process frame chains,
//! replacement, and the kernel-contiguous-allocation path.
//!
//! Frames are indexed 0..N-1, backed by `IptEntry` (see `bitentry`). Each
//! frame is, at any instant, in exactly one of the free chain or a single
//! process's chain; both chains reuse the same `next` field, matching the
//! packed bit layout documented in `bitentry`.

use alloc::vec;
use alloc::vec::Vec;

use crate::bitentry::IptEntry;
use crate::block_device::BlockDevice;
use crate::config::{MIPS_KSEG0, PAGE_SIZE};
use crate::phys_memory::PhysMemory;
use crate::process::{ProcessId, ProcessTable, NONE};
use crate::stats::StatsSink;
use crate::swap_table::SwapTable;
use crate::tlb::Tlb;

#[cfg(feature = "replace-random")]
use rand::{rngs::SmallRng, Rng, SeedableRng};

/// A physical address, as returned to callers.
pub type PhysAddr = u32;

/// Either reuse a specific frame or let the IPT pick one (free list, then
/// replacement). `Suggested` is how `evict_kernel_run` installs a kernel
/// mapping at a frame index it already owns the watermark for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameChoice {
    Suggested(u32),
    Replace,
}

pub struct Ipt {
    entries: Vec<IptEntry>,
    mem_base: u32,
    free_head: u32,
    free_tail: u32,
    /// Running count of frames on the free chain, maintained by
    /// `link_free_tail`/`unlink_free` so `free_count` is O(1) instead of a
    /// full table scan — `link_free_tail` is called from `remove`, which is
    /// itself on the teardown hot path.
    free_count: u32,
    fifo: Vec<u32>,
    fifo_insert: usize,
    fifo_evict: usize,
    /// Signed so the underflow check in `alloc_contiguous_kernel` is
    /// actually reachable (the source's unsigned comparison never
    /// triggers).
    kernel_watermark: isize,
    #[cfg(feature = "replace-random")]
    rng: SmallRng,
}

impl Ipt {
    /// Creates `n_frames` entries, all free, singly linked through `next`.
    pub fn init(n_frames: u32, mem_base: u32) -> Self {
        assert!(n_frames > 0, "IPT must have at least one frame");
        let mut entries = vec![IptEntry::zero(); n_frames as usize];
        for i in 0..n_frames {
            let mut e = IptEntry::zero();
            if i + 1 < n_frames {
                e.set_chain(true).set_next(i + 1);
            }
            entries[i as usize] = e;
        }
        Self {
            entries,
            mem_base,
            free_head: 0,
            free_tail: n_frames - 1,
            free_count: n_frames,
            fifo: vec![0u32; n_frames as usize],
            fifo_insert: 0,
            fifo_evict: n_frames as usize - 1,
            kernel_watermark: n_frames as isize - 1,
            #[cfg(feature = "replace-random")]
            rng: SmallRng::seed_from_u64(0),
        }
    }

    pub fn n_frames(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn mem_base(&self) -> u32 {
        self.mem_base
    }

    pub fn entry(&self, frame: u32) -> &IptEntry {
        &self.entries[frame as usize]
    }

    pub fn frame_paddr(&self, frame: u32) -> PhysAddr {
        self.paddr_of(frame)
    }

    fn paddr_of(&self, frame: u32) -> PhysAddr {
        frame * PAGE_SIZE as u32 + self.mem_base
    }

    /// Number of frames currently on the free chain. O(1): backed by a
    /// running counter kept in step by `link_free_tail`/`unlink_free`.
    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    /// Walks `pid`'s frame chain looking for `vpn`.
    pub fn lookup(&self, processes: &ProcessTable, pid: ProcessId, vpn: u32) -> Option<(u32, PhysAddr)> {
        let desc = processes.get(pid)?;
        if desc.n_frames == 0 {
            return None;
        }
        let mut i = desc.start_frame;
        loop {
            let e = &self.entries[i as usize];
            if e.vpn() == vpn {
                return Some((i, self.paddr_of(i)));
            }
            if !e.chain() {
                return None;
            }
            i = e.next();
        }
    }

    fn unlink_free(&mut self, frame: u32) {
        if self.free_head == self.free_tail {
            debug_assert_eq!(self.free_head, frame, "frame {frame} is not the sole free entry");
            self.free_count -= 1;
            return;
        }
        if self.free_head == frame {
            self.free_head = self.entries[frame as usize].next();
            self.free_count -= 1;
            return;
        }
        let mut i = self.free_head;
        loop {
            let e = &self.entries[i as usize];
            if !e.chain() {
                panic!("CORRUPT_BOOKKEEPING: frame {frame} was not on the free chain");
            }
            let next = e.next();
            if next == frame {
                break;
            }
            i = next;
        }
        if frame == self.free_tail {
            self.free_tail = i;
            self.entries[i as usize].set_chain(false);
        } else {
            let frame_next = self.entries[frame as usize].next();
            self.entries[i as usize].set_next(frame_next);
        }
        self.free_count -= 1;
    }

    fn link_free_tail(&mut self, frame: u32) {
        let was_empty = self.free_count == 0;
        if was_empty {
            self.free_head = frame;
            self.free_tail = frame;
        } else {
            self.entries[self.free_tail as usize].set_chain(true).set_next(frame);
            self.free_tail = frame;
        }
        self.entries[frame as usize].set_chain(false);
        self.free_count += 1;
    }

    fn append_process_chain(&mut self, processes: &mut ProcessTable, pid: ProcessId, frame: u32) {
        let desc = processes.expect_mut(pid);
        if desc.n_frames == 0 {
            desc.start_frame = frame;
        } else {
            let last = desc.last_frame;
            self.entries[last as usize].set_chain(true).set_next(frame);
        }
        desc.last_frame = frame;
        desc.n_frames += 1;
    }

    /// Advances the FIFO cursor until it finds a non-kernel frame (or, with
    /// `replace-random`, draws uniformly from the non-kernel frames).
    #[cfg(not(feature = "replace-random"))]
    fn replace(&mut self) -> u32 {
        loop {
            self.fifo_evict = (self.fifo_evict + 1) % self.fifo.len();
            let candidate = self.fifo[self.fifo_evict];
            if !self.entries[candidate as usize].kernel() {
                return candidate;
            }
        }
    }

    #[cfg(feature = "replace-random")]
    fn replace(&mut self) -> u32 {
        let n = self.entries.len() as u32;
        loop {
            let candidate = self.rng.gen_range(0..n);
            if !self.entries[candidate as usize].kernel() {
                return candidate;
            }
        }
    }

    fn push_fifo(&mut self, frame: u32) {
        self.fifo[self.fifo_insert] = frame;
        self.fifo_insert = (self.fifo_insert + 1) % self.fifo.len();
    }

    fn register_mapping(&mut self, processes: &mut ProcessTable, pid: ProcessId, frame: u32, vaddr: u32) {
        let vpn = vaddr >> PAGE_SIZE.trailing_zeros();
        self.entries[frame as usize]
            .clear()
            .set_vpn(vpn)
            .set_pid(pid.0 as u32)
            .set_valid(true)
            .set_kernel(vaddr > MIPS_KSEG0);
        self.append_process_chain(processes, pid, frame);
        self.push_fifo(frame);
    }

    /// Evicts `victim` through swap-out, counted as a swap write, and frees
    /// it. Shared by `insert`'s replacement path and `alloc_contiguous_kernel`.
    fn evict_through_swap<D: BlockDevice, M: PhysMemory, T: Tlb, S: StatsSink>(
        &mut self,
        victim: u32,
        processes: &mut ProcessTable,
        swap: &mut SwapTable<D>,
        mem: &mut M,
        tlb: &mut T,
        stats: &mut S,
    ) {
        let victim_entry = self.entries[victim as usize];
        let victim_paddr = self.paddr_of(victim);
        let chunk = swap
            .first_free()
            .unwrap_or_else(|| panic!("OUT_OF_SWAP: no free chunk to evict frame {victim}"));
        swap.swap_out(
            chunk,
            victim_paddr,
            victim_entry.vpn(),
            ProcessId(victim_entry.pid() as u8),
            Some(victim_paddr),
            processes,
            mem,
            tlb,
        )
        .unwrap_or_else(|e| panic!("OUT_OF_SWAP: {e:?}"));
        stats.swap_write();
        self.remove(victim, processes);
    }

    /// Installs a new mapping for `(pid, vaddr)`, obtaining a frame as
    /// described by `choice`: a caller-suggested frame, the free-list head,
    /// or an evicted victim. Evicting a victim writes it to swap (counted as
    /// a swap write) before reuse.
    #[allow(clippy::too_many_arguments)]
    pub fn insert<D: BlockDevice, M: PhysMemory, T: Tlb, S: StatsSink>(
        &mut self,
        pid: ProcessId,
        vaddr: u32,
        choice: FrameChoice,
        processes: &mut ProcessTable,
        swap: &mut SwapTable<D>,
        mem: &mut M,
        tlb: &mut T,
        stats: &mut S,
    ) -> PhysAddr {
        let frame = match choice {
            FrameChoice::Suggested(frame) => {
                self.unlink_free(frame);
                frame
            }
            FrameChoice::Replace => {
                if self.free_head != self.free_tail || !self.entries[self.free_head as usize].valid() {
                    let frame = self.free_head;
                    self.unlink_free(frame);
                    frame
                } else {
                    let victim = self.replace();
                    self.evict_through_swap(victim, processes, swap, mem, tlb, stats);
                    // `evict_through_swap` frees `victim` onto the free chain via
                    // `remove`; pop it back off before `register_mapping` reuses it.
                    self.unlink_free(victim);
                    victim
                }
            }
        };
        self.register_mapping(processes, pid, frame, vaddr);
        log::trace!("ipt: frame {frame} <- pid {:?} vaddr {vaddr:#x}", pid);
        self.paddr_of(frame)
    }

    /// Unlinks `frame_index` from its owning process chain and links it to
    /// the free chain, clearing all field bits.
    pub fn remove(&mut self, frame_index: u32, processes: &mut ProcessTable) {
        let entry = self.entries[frame_index as usize];
        if entry.valid() {
            let pid = ProcessId(entry.pid() as u8);
            if let Some(desc) = processes.get_mut(pid) {
                if desc.n_frames == 1 {
                    desc.start_frame = NONE;
                    desc.last_frame = NONE;
                } else if desc.start_frame == frame_index {
                    desc.start_frame = entry.next();
                } else if desc.last_frame == frame_index {
                    let mut i = desc.start_frame;
                    while self.entries[i as usize].next() != frame_index {
                        i = self.entries[i as usize].next();
                    }
                    desc.last_frame = i;
                    self.entries[i as usize].set_chain(false);
                } else {
                    let mut i = desc.start_frame;
                    while self.entries[i as usize].next() != frame_index {
                        i = self.entries[i as usize].next();
                    }
                    let frame_next = entry.next();
                    self.entries[i as usize].set_next(frame_next);
                }
                desc.n_frames -= 1;
            }
        }
        self.link_free_tail(frame_index);
        self.entries[frame_index as usize].clear();
    }

    /// Removes every frame belonging to `pid`.
    pub fn evict_process(&mut self, pid: ProcessId, processes: &mut ProcessTable) {
        let Some(desc) = processes.get(pid) else { return };
        if desc.n_frames == 0 {
            return;
        }
        let mut remaining = desc.n_frames;
        let mut i = desc.start_frame;
        while remaining > 0 {
            let next = self.entries[i as usize].next();
            self.remove(i, processes);
            i = next;
            remaining -= 1;
        }
    }

    /// Reserves a chunk for every frame in `src_pid`'s chain, tagged with
    /// `dst_pid`, without invalidating the parent's TLB entries. Leaves the
    /// parent's mapping untouched; the child faults pages in lazily.
    pub fn fork_frames<D: BlockDevice, M: PhysMemory, T: Tlb>(
        &mut self,
        src_pid: ProcessId,
        dst_pid: ProcessId,
        processes: &mut ProcessTable,
        swap: &mut SwapTable<D>,
        mem: &mut M,
        tlb: &mut T,
    ) {
        let Some(desc) = processes.get(src_pid) else { return };
        if desc.n_frames == 0 {
            return;
        }
        let mut i = desc.start_frame;
        loop {
            let entry = self.entries[i as usize];
            let chunk = swap
                .first_free()
                .unwrap_or_else(|| panic!("OUT_OF_SWAP: fork_frames for pid {:?}", src_pid));
            swap.swap_out(chunk, self.paddr_of(i), entry.vpn(), dst_pid, None, processes, mem, tlb)
                .unwrap_or_else(|e| panic!("OUT_OF_SWAP: {e:?}"));
            if !entry.chain() {
                break;
            }
            i = entry.next();
        }
    }

    /// Checks and decrements the kernel-reserved watermark for a run of `n`
    /// frames, returning its base frame index. Does no I/O: this is the half
    /// of `alloc_contiguous_kernel` that must run under the kernel-region
    /// lock. Panics if the run would underflow past the low boundary.
    pub fn reserve_kernel_watermark(&mut self, n: u32) -> u32 {
        assert!(n > 0, "reserve_kernel_watermark(0) is nonsensical");
        let top = self.kernel_watermark;
        if top - n as isize + 1 < 0 {
            panic!("CORRUPT_BOOKKEEPING: kernel-reserved watermark would underflow past the low boundary");
        }
        let base = (top - n as isize + 1) as u32;
        self.kernel_watermark -= n as isize;
        base
    }

    /// Evicts any currently-resident frames in `base..base+n`, then installs
    /// each one as a kernel-owned mapping via `insert(.., FrameChoice::Suggested)`,
    /// the same installation path (stamp, process-chain append, FIFO push)
    /// ordinary user mappings go through, so each frame gets a real `vpn`
    /// (its own kernel virtual address, kseg0-based) instead of the `0` that
    /// `.clear()` alone leaves behind. The real vpn matters: these frames are
    /// tied into `owner_pid`'s process chain so `remove`/`free_kpages` can
    /// find and unsplice them, and `lookup` walks that same chain matching on
    /// vpn with no `kernel()` filter; a stale vpn of `0` would let a
    /// legitimate user fault on vaddr `0x0`..`0xFFF` false-hit a kernel-pinned
    /// frame. May block on swap I/O, so callers must release the
    /// kernel-region lock around this call; the watermark itself was already
    /// reserved by `reserve_kernel_watermark` under that lock.
    #[allow(clippy::too_many_arguments)]
    pub fn evict_kernel_run<D: BlockDevice, M: PhysMemory, T: Tlb, S: StatsSink>(
        &mut self,
        base: u32,
        n: u32,
        owner_pid: ProcessId,
        processes: &mut ProcessTable,
        swap: &mut SwapTable<D>,
        mem: &mut M,
        tlb: &mut T,
        stats: &mut S,
    ) {
        for i in base..base + n {
            if self.entries[i as usize].valid() {
                self.evict_through_swap(i, processes, swap, mem, tlb, stats);
            }
            let kvaddr = self.paddr_of(i) + MIPS_KSEG0;
            self.insert(owner_pid, kvaddr, FrameChoice::Suggested(i), processes, swap, mem, tlb, stats);
        }
        log::info!("ipt: reserved {n} kernel frame(s) starting at {base} for pid {owner_pid:?}");
    }

    /// Convenience combining `reserve_kernel_watermark` and
    /// `evict_kernel_run` for callers (tests, mainly) that don't need to
    /// interleave a lock release around the I/O.
    #[allow(clippy::too_many_arguments)]
    pub fn alloc_contiguous_kernel<D: BlockDevice, M: PhysMemory, T: Tlb, S: StatsSink>(
        &mut self,
        n: u32,
        owner_pid: ProcessId,
        processes: &mut ProcessTable,
        swap: &mut SwapTable<D>,
        mem: &mut M,
        tlb: &mut T,
        stats: &mut S,
    ) -> u32 {
        let base = self.reserve_kernel_watermark(n);
        self.evict_kernel_run(base, n, owner_pid, processes, swap, mem, tlb, stats);
        base
    }
}
