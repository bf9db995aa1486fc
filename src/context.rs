//! Top-level glue: wires the IPT, swap table, kernel region table, and
//! process table into one explicitly initialized context, instead of the
//! `lazy_static!` globals the reference kernel uses for its own
//! process-wide ambients — this crate's subsystems are not one of those
//! ambients, so they don't get that treatment here.

use spin::Mutex;

use crate::block_device::BlockDevice;
use crate::config::MIPS_KSEG0;
use crate::error::FaultError;
use crate::fault::{FaultKind, FaultResolver};
use crate::ipt::Ipt;
use crate::kernel_region::KernelRegionTable;
use crate::phys_memory::PhysMemory;
use crate::process::{ProcessId, ProcessTable};
use crate::stats::StatsSink;
use crate::swap_table::SwapTable;
use crate::tlb::Tlb;

/// Owns every paging subsystem plus the process table that stands in for
/// the external process subsystem's bookkeeping. Built once by
/// [`bootstrap`].
pub struct VmContext<D: BlockDevice, M: PhysMemory, T: Tlb, S: StatsSink> {
    pub ipt: Ipt,
    pub swap: SwapTable<D>,
    pub processes: ProcessTable,
    pub mem: M,
    pub tlb: T,
    pub stats: S,
    /// Guards `KernelRegionTable` and (implicitly, by the caller's
    /// discipline) the IPT's kernel-frame watermark.
    kernel_regions: Mutex<KernelRegionTable>,
}

/// Initializes a fresh VM subsystem: `n_frames` physical frames starting at
/// `mem_base`, backed by `device` for swap and `mem` for physical memory
/// content.
pub fn bootstrap<D: BlockDevice, M: PhysMemory, T: Tlb, S: StatsSink>(
    n_frames: u32,
    mem_base: u32,
    device: D,
    mem: M,
    tlb: T,
    stats: S,
) -> VmContext<D, M, T, S> {
    log::info!("vm: bootstrap {n_frames} frame(s) at base {mem_base:#x}");
    VmContext {
        ipt: Ipt::init(n_frames, mem_base),
        swap: SwapTable::init(device),
        processes: ProcessTable::new(),
        mem,
        tlb,
        stats,
        kernel_regions: Mutex::new(KernelRegionTable::new()),
    }
}

impl<D: BlockDevice, M: PhysMemory, T: Tlb, S: StatsSink> VmContext<D, M, T, S> {
    /// Resolves one page fault for `pid` (or `None` for "no current
    /// process/address space").
    pub fn handle_fault(&mut self, kind: FaultKind, vaddr: u32, pid: Option<ProcessId>) -> Result<(), FaultError> {
        FaultResolver::handle_fault(
            kind,
            vaddr,
            pid,
            &mut self.ipt,
            &mut self.swap,
            &mut self.processes,
            &mut self.mem,
            &mut self.tlb,
            &mut self.stats,
        )
    }

    /// Reserves `n` contiguous kernel frames, returning the kernel virtual
    /// address the caller can use directly (MIPS kseg0 is direct-mapped).
    ///
    /// The watermark reservation runs under `kernel_region_lock`; the lock is
    /// released around the swap I/O that eviction may require and
    /// reacquired before the run is recorded: release around blocking I/O,
    /// reacquire before resuming bookkeeping.
    pub fn alloc_kpages(&mut self, owner_pid: ProcessId, n: u32) -> u32 {
        let base_frame = {
            let _kernel_regions = self.kernel_regions.lock();
            self.ipt.reserve_kernel_watermark(n)
        };

        self.ipt.evict_kernel_run(
            base_frame,
            n,
            owner_pid,
            &mut self.processes,
            &mut self.swap,
            &mut self.mem,
            &mut self.tlb,
            &mut self.stats,
        );

        let kvaddr = self.ipt.frame_paddr(base_frame) + MIPS_KSEG0;
        self.kernel_regions.lock().record(owner_pid, base_frame, n, kvaddr);
        kvaddr
    }

    /// Releases a run previously returned by `alloc_kpages`. A `kvaddr` that
    /// does not match any outstanding run is a fatal bookkeeping error.
    pub fn free_kpages(&mut self, kvaddr: u32) {
        let mut kernel_regions = self.kernel_regions.lock();
        let released = kernel_regions.release(kvaddr);
        for offset in 0..released.n_frames {
            self.ipt.remove(released.base_frame + offset, &mut self.processes);
        }
    }

    /// Stages a loadable ELF segment into `pid`'s swap chain ahead of first
    /// touch, so later faults for its pages resolve via swap-in rather than
    /// file I/O. See `SwapTable::preload_elf`.
    pub fn preload_elf(&mut self, file_data: &[u8], first_vpn: u32, memsize: u32, filesize: u32, pid: ProcessId) {
        self.swap
            .preload_elf(file_data, first_vpn, memsize, filesize, pid, &mut self.processes, &mut self.stats)
            .unwrap_or_else(|e| panic!("OUT_OF_SWAP: preload_elf for pid {pid:?}: {e:?}"));
    }

    /// Materializes `dst_pid`'s address-space image in swap from `src_pid`:
    /// resident frames are evicted into `dst_pid`'s swap chain (without
    /// disturbing `src_pid`'s mapping or TLB), and chunks already in swap
    /// are duplicated. `dst_pid` must not already be registered.
    pub fn fork(&mut self, src_pid: ProcessId, dst_pid: ProcessId) {
        self.processes.register(dst_pid);
        self.ipt
            .fork_frames(src_pid, dst_pid, &mut self.processes, &mut self.swap, &mut self.mem, &mut self.tlb);
        self.swap
            .fork(src_pid, dst_pid, &mut self.processes)
            .unwrap_or_else(|e| panic!("OUT_OF_SWAP: fork({src_pid:?} -> {dst_pid:?}): {e:?}"));
    }

    /// Tears down a process's paging state: frees its frames and chunks,
    /// then drops its descriptor.
    pub fn drop_process(&mut self, pid: ProcessId) {
        self.ipt.evict_process(pid, &mut self.processes);
        self.swap.drop_process(pid, &mut self.processes);
        self.processes.unregister(pid);
        log::debug!("vm: tore down paging state for pid {pid:?}");
    }
}
