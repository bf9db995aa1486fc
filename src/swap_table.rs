//! Swap manager: chunk allocation, per-process chunk chains, ELF prestage,
//! swap-in/out, and fork copy.
//!
//! Mirrors `original_source/src/kern/vm/swapfile.c`'s `swapTableInit`,
//! `swapout`, `swapin`, `getFirstFreeChunckIndex`, `elf_to_swap`,
//! `chunks_fork`, and `all_proc_chunk_out`, replacing its pointer-chasing
//! doubly linked lists with the index-based chains described in the data
//! model: `next`/`prev` indices plus the `chain`/`has_prev` terminus bits.

use alloc::vec;
use alloc::vec::Vec;

use crate::bitentry::StEntry;
use crate::block_device::BlockDevice;
use crate::config::PAGE_SIZE;
use crate::error::VmError;
use crate::phys_memory::PhysMemory;
use crate::process::{ProcessId, ProcessTable, NONE};
use crate::tlb::Tlb;

pub struct SwapTable<D: BlockDevice> {
    device: D,
    entries: Vec<StEntry>,
    free_head: u32,
    free_tail: u32,
    /// Running count of chunks on the free chain, maintained by
    /// `link_free_tail`/`unlink_free` so `free_count`/`first_free` are O(1)
    /// instead of a full table scan — both are called from `swap_in`,
    /// which is on the swap-in hot path.
    free_count: u32,
}

impl<D: BlockDevice> SwapTable<D> {
    /// Derives chunk count from the device and marks every chunk free,
    /// doubly linked in ascending index order.
    pub fn init(device: D) -> Self {
        let n = device.chunk_count();
        assert!(n > 0, "swap device must hold at least one chunk");
        let mut entries = vec![StEntry::zero(); n as usize];
        for i in 0..n {
            let mut e = StEntry::zero();
            e.set_swapped(true);
            if i > 0 {
                e.set_has_prev(true);
            }
            if i + 1 < n {
                e.set_chain(true).set_next(i + 1);
            }
            e.set_prev(if i > 0 { i - 1 } else { NONE });
            entries[i as usize] = e;
        }
        Self {
            device,
            entries,
            free_head: 0,
            free_tail: n - 1,
            free_count: n,
        }
    }

    pub fn n_chunks(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn entry(&self, chunk: u32) -> &StEntry {
        &self.entries[chunk as usize]
    }

    /// O(1): backed by a running counter kept in step by
    /// `link_free_tail`/`unlink_free`.
    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    /// O(1): head of the free chain, without unlinking it.
    pub fn first_free(&self) -> Option<u32> {
        if self.free_count == 0 {
            None
        } else {
            Some(self.free_head)
        }
    }

    fn unlink_free(&mut self, chunk: u32) {
        let e = self.entries[chunk as usize];
        let (prev, next) = (e.has_prev().then(|| e.prev()), e.chain().then(|| e.next()));
        match prev {
            Some(p) => {
                self.entries[p as usize].set_next(next.unwrap_or(0));
                if next.is_none() {
                    self.entries[p as usize].set_chain(false);
                }
            }
            None => self.free_head = next.unwrap_or(chunk),
        }
        match next {
            Some(n) => {
                self.entries[n as usize].set_prev(prev.unwrap_or(NONE));
                self.entries[n as usize].set_has_prev(prev.is_some());
            }
            None => self.free_tail = prev.unwrap_or(chunk),
        }
        self.free_count -= 1;
    }

    fn link_free_tail(&mut self, chunk: u32) {
        let was_empty = self.free_count == 0;
        if was_empty {
            self.free_head = chunk;
            self.free_tail = chunk;
            self.entries[chunk as usize].set_has_prev(false).set_chain(false);
        } else {
            let tail = self.free_tail;
            self.entries[tail as usize].set_chain(true).set_next(chunk);
            self.entries[chunk as usize].set_has_prev(true).set_prev(tail).set_chain(false);
            self.free_tail = chunk;
        }
        self.free_count += 1;
    }

    fn unlink_process(&mut self, chunk: u32, processes: &mut ProcessTable) {
        let e = self.entries[chunk as usize];
        let pid = ProcessId(e.pid() as u8);
        let Some(desc) = processes.get_mut(pid) else {
            return;
        };
        let (prev, next) = (e.has_prev().then(|| e.prev()), e.chain().then(|| e.next()));
        match prev {
            Some(p) => {
                self.entries[p as usize].set_next(next.unwrap_or(0));
                if next.is_none() {
                    self.entries[p as usize].set_chain(false);
                }
            }
            None => desc.start_chunk = next.unwrap_or(NONE),
        }
        match next {
            Some(n) => {
                self.entries[n as usize].set_prev(prev.unwrap_or(NONE));
                self.entries[n as usize].set_has_prev(prev.is_some());
            }
            None => desc.last_chunk = prev.unwrap_or(NONE),
        }
        desc.n_chunks -= 1;
    }

    fn link_process_tail(&mut self, chunk: u32, pid: ProcessId, processes: &mut ProcessTable) {
        let desc = processes.expect_mut(pid);
        if desc.n_chunks == 0 {
            desc.start_chunk = chunk;
            self.entries[chunk as usize].set_has_prev(false);
        } else {
            let tail = desc.last_chunk;
            self.entries[tail as usize].set_chain(true).set_next(chunk);
            self.entries[chunk as usize].set_has_prev(true).set_prev(tail);
        }
        self.entries[chunk as usize].set_chain(false);
        desc.last_chunk = chunk;
        desc.n_chunks += 1;
    }

    /// Traverses `pid`'s chunk chain for the chunk holding `vaddr`'s page.
    pub fn lookup(&self, processes: &ProcessTable, pid: ProcessId, vaddr: u32) -> Option<u32> {
        let desc = processes.get(pid)?;
        if desc.n_chunks == 0 {
            return None;
        }
        let vpn = vaddr >> PAGE_SIZE.trailing_zeros();
        let mut i = desc.start_chunk;
        loop {
            let e = &self.entries[i as usize];
            if e.vpn() == vpn {
                return Some(i);
            }
            if !e.chain() {
                return None;
            }
            i = e.next();
        }
    }

    /// Unlinks `chunk` from the free chain, links it to `pid`'s chain,
    /// writes the page image read from `paddr`, stamps `(vpn, pid,
    /// swapped=0)`, and optionally invalidates the TLB entry for
    /// `invalidate`.
    pub fn swap_out<M: PhysMemory, T: Tlb>(
        &mut self,
        chunk: u32,
        paddr: u32,
        vpn: u32,
        pid: ProcessId,
        invalidate: Option<u32>,
        processes: &mut ProcessTable,
        mem: &mut M,
        tlb: &mut T,
    ) -> Result<(), VmError> {
        if self.first_free() != Some(chunk) && !self.entries[chunk as usize].swapped() {
            return Err(VmError::OutOfSwap);
        }
        let mut page = [0u8; PAGE_SIZE];
        mem.read_frame(paddr, &mut page);
        self.device
            .write_page(chunk, &page)
            .unwrap_or_else(|e| panic!("VM: swap write failed on chunk {chunk}: {e:?}"));

        self.unlink_free(chunk);
        self.entries[chunk as usize]
            .clear()
            .set_vpn(vpn)
            .set_pid(pid.0 as u32)
            .set_swapped(false);
        self.link_process_tail(chunk, pid, processes);

        if let Some(addr) = invalidate {
            tlb.invalidate(addr);
        }
        log::debug!("swap_out: chunk {chunk} <- vpn {vpn:#x} pid {:?}", pid);
        Ok(())
    }

    /// Reads `chunk`'s page image into `paddr`, then frees the chunk.
    pub fn swap_in<M: PhysMemory>(&mut self, chunk: u32, paddr: u32, processes: &mut ProcessTable, mem: &mut M) {
        let mut page = [0u8; PAGE_SIZE];
        self.device
            .read_page(chunk, &mut page)
            .unwrap_or_else(|e| panic!("VM: swap read failed on chunk {chunk}: {e:?}"));
        mem.write_frame(paddr, &page);

        self.unlink_process(chunk, processes);
        self.entries[chunk as usize].clear().set_swapped(true);
        self.link_free_tail(chunk);
        log::debug!("swap_in: chunk {chunk} -> paddr {paddr:#x}");
    }

    /// Stages an ELF segment into swap: full pages copied from `file_data`,
    /// one partial page zero-padded if `filesize % PAGE_SIZE != 0`, and
    /// fully zero pages for the remainder of `memsize`. Each chunk is
    /// stamped with the segment's vpn run and linked to `pid`'s chain.
    /// Reports `SWAP_CHUNK_ZERO_FILLED` for the one partial page and
    /// `SWAP_CHUNK_BLANK` for each fully zero page, per the statistics
    /// producer contract.
    pub fn preload_elf<S: crate::stats::StatsSink>(
        &mut self,
        file_data: &[u8],
        first_vpn: u32,
        memsize: u32,
        filesize: u32,
        pid: ProcessId,
        processes: &mut ProcessTable,
        stats: &mut S,
    ) -> Result<(), VmError> {
        let n_pages = (memsize as usize + PAGE_SIZE - 1) / PAGE_SIZE;
        for k in 0..n_pages {
            let chunk = self.first_free().ok_or(VmError::OutOfSwap)?;
            let file_off = k * PAGE_SIZE;
            let mut page = [0u8; PAGE_SIZE];
            let remaining_file = (filesize as usize).saturating_sub(file_off);
            let copy_len = remaining_file.min(PAGE_SIZE);
            if copy_len > 0 {
                page[..copy_len].copy_from_slice(&file_data[file_off..file_off + copy_len]);
            }
            if copy_len == 0 {
                stats.swap_chunk_blank();
            } else if copy_len < PAGE_SIZE {
                stats.swap_chunk_zero_filled();
            }
            self.device
                .write_page(chunk, &page)
                .unwrap_or_else(|e| panic!("VM: preload_elf write failed on chunk {chunk}: {e:?}"));
            self.unlink_free(chunk);
            self.entries[chunk as usize]
                .clear()
                .set_vpn(first_vpn + k as u32)
                .set_pid(pid.0 as u32)
                .set_swapped(false);
            self.link_process_tail(chunk, pid, processes);
        }
        Ok(())
    }

    /// Copies every in-use chunk belonging to `src_pid` into a fresh chunk
    /// owned by `dst_pid`, same `vpn`, verbatim bytes. Leaves `src_pid`'s
    /// chain untouched.
    pub fn fork(&mut self, src_pid: ProcessId, dst_pid: ProcessId, processes: &mut ProcessTable) -> Result<(), VmError> {
        let Some(desc) = processes.get(src_pid) else {
            return Ok(());
        };
        if desc.n_chunks == 0 {
            return Ok(());
        }
        let mut remaining = desc.n_chunks;
        let mut src = desc.start_chunk;
        while remaining > 0 {
            let src_entry = self.entries[src as usize];
            let dst_chunk = self.first_free().ok_or(VmError::OutOfSwap)?;

            let mut page = [0u8; PAGE_SIZE];
            self.device
                .read_page(src, &mut page)
                .unwrap_or_else(|e| panic!("VM: fork read failed on chunk {src}: {e:?}"));
            self.device
                .write_page(dst_chunk, &page)
                .unwrap_or_else(|e| panic!("VM: fork write failed on chunk {dst_chunk}: {e:?}"));

            self.unlink_free(dst_chunk);
            self.entries[dst_chunk as usize]
                .clear()
                .set_vpn(src_entry.vpn())
                .set_pid(dst_pid.0 as u32)
                .set_swapped(false);
            self.link_process_tail(dst_chunk, dst_pid, processes);

            src = self.entries[src as usize].next();
            remaining -= 1;
        }
        Ok(())
    }

    /// Frees every chunk belonging to `pid`.
    pub fn drop_process(&mut self, pid: ProcessId, processes: &mut ProcessTable) {
        let Some(desc) = processes.get(pid) else { return };
        if desc.n_chunks == 0 {
            return;
        }
        let mut remaining = desc.n_chunks;
        let mut i = desc.start_chunk;
        while remaining > 0 {
            let next = self.entries[i as usize].next();
            self.unlink_process(i, processes);
            self.entries[i as usize].clear().set_swapped(true);
            self.link_free_tail(i);
            i = next;
            remaining -= 1;
        }
    }
}
