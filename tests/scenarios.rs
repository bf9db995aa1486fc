//! End-to-end scenarios against a freshly bootstrapped `VmContext`: 8 user
//! frames, 16 swap chunks, a temp-file-backed swap device, an in-memory
//! physical-RAM stand-in, and recording TLB/stats fakes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use ipt_vm_core::block_device::FileBlockDevice;
use ipt_vm_core::{bootstrap, BufferPhysMemory, CountingStats, FaultKind, ProcessId, RecordingTlb, VmContext};

static COUNTER: AtomicU32 = AtomicU32::new(0);

struct TempFile(PathBuf);

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn new_context() -> (VmContext<FileBlockDevice, BufferPhysMemory, RecordingTlb, CountingStats>, TempFile) {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!("ipt-vm-core-scenario-{}-{}.swap", std::process::id(), n));
    let device = FileBlockDevice::create(&path, 16);
    let mem = BufferPhysMemory::new(8, 0x1000_0000);
    let ctx = bootstrap(8, 0x1000_0000, device, mem, RecordingTlb::new(), CountingStats::default());
    (ctx, TempFile(path))
}

#[test]
fn scenario_1_zero_fill_first_touch() {
    let (mut ctx, _tmp) = new_context();
    ctx.processes.register(ProcessId(1));

    let result = ctx.handle_fault(FaultKind::Read, 0x400000, Some(ProcessId(1)));
    assert!(result.is_ok());

    let (frame, paddr) = ctx.ipt.lookup(&ctx.processes, ProcessId(1), 0x400).unwrap();
    assert_eq!(frame, 0);
    assert_eq!(paddr, 0x1000_0000);
    assert_eq!(ctx.stats.page_fault_zeroed, 1);
    assert_eq!(ctx.stats.tlb_reload, 0);
}

#[test]
fn scenario_2_reload_hit() {
    let (mut ctx, _tmp) = new_context();
    ctx.processes.register(ProcessId(1));

    ctx.handle_fault(FaultKind::Read, 0x400000, Some(ProcessId(1))).unwrap();
    ctx.handle_fault(FaultKind::Write, 0x400000, Some(ProcessId(1))).unwrap();

    assert_eq!(ctx.stats.tlb_reload, 1);
    assert_eq!(ctx.stats.page_fault_zeroed, 1);
    assert_eq!(ctx.stats.page_fault_swap, 0);
}

#[test]
fn scenario_3_eviction_under_pressure() {
    let (mut ctx, _tmp) = new_context();
    ctx.processes.register(ProcessId(1));

    for page in 0..8u32 {
        ctx.handle_fault(FaultKind::Read, (0x400 + page) << 12, Some(ProcessId(1))).unwrap();
    }
    ctx.handle_fault(FaultKind::Read, 0x408000, Some(ProcessId(1))).unwrap();

    assert_eq!(ctx.stats.swap_write, 1);
    assert!(ctx.ipt.lookup(&ctx.processes, ProcessId(1), 0x400).is_none());
    let chunk = ctx
        .swap
        .lookup(&ctx.processes, ProcessId(1), 0x400000)
        .expect("frame 0's page must be reachable via swap after eviction");
    assert!(!ctx.swap.entry(chunk).swapped());
}

#[test]
fn scenario_4_kernel_pin_exemption() {
    let (mut ctx, _tmp) = new_context();
    ctx.processes.register(ProcessId(1));

    for page in 0..8u32 {
        ctx.handle_fault(FaultKind::Read, (0x400 + page) << 12, Some(ProcessId(1))).unwrap();
    }
    ctx.handle_fault(FaultKind::Read, 0x408000, Some(ProcessId(1))).unwrap();

    ctx.alloc_kpages(ProcessId(1), 2);
    assert!(ctx.ipt.entry(7).kernel());
    assert!(ctx.ipt.entry(6).kernel());

    // A subsequent fault needing eviction must land on frame 1, not 6/7.
    ctx.handle_fault(FaultKind::Read, 0x409000, Some(ProcessId(1))).unwrap();
    assert!(ctx.ipt.lookup(&ctx.processes, ProcessId(1), 0x401).is_none());
    assert!(ctx.ipt.entry(6).kernel() && ctx.ipt.entry(6).valid());
    assert!(ctx.ipt.entry(7).kernel() && ctx.ipt.entry(7).valid());
}

#[test]
fn scenario_5_fork_copy() {
    let (mut ctx, _tmp) = new_context();
    ctx.processes.register(ProcessId(1));

    // Drive both pages into swap so the fork exercises SwapTable::fork.
    for page in 0..8u32 {
        ctx.handle_fault(FaultKind::Read, (0x400 + page) << 12, Some(ProcessId(1))).unwrap();
    }
    ctx.handle_fault(FaultKind::Read, 0x408000, Some(ProcessId(1))).unwrap();
    ctx.handle_fault(FaultKind::Read, 0x409000, Some(ProcessId(1))).unwrap();
    assert!(ctx.swap.lookup(&ctx.processes, ProcessId(1), 0x400000).is_some());
    assert!(ctx.swap.lookup(&ctx.processes, ProcessId(1), 0x401000).is_some());

    ctx.fork(ProcessId(1), ProcessId(2));

    let src_c0 = ctx.swap.lookup(&ctx.processes, ProcessId(1), 0x400000).unwrap();
    let dst_c0 = ctx.swap.lookup(&ctx.processes, ProcessId(2), 0x400000).unwrap();
    let src_c1 = ctx.swap.lookup(&ctx.processes, ProcessId(1), 0x401000).unwrap();
    let dst_c1 = ctx.swap.lookup(&ctx.processes, ProcessId(2), 0x401000).unwrap();
    assert_ne!(src_c0, dst_c0);
    assert_ne!(src_c1, dst_c1);
    assert_eq!(ctx.swap.entry(dst_c0).pid(), 2);
    assert_eq!(ctx.swap.entry(dst_c1).pid(), 2);
}

#[test]
fn preload_elf_then_fault_resolves_via_swap_not_zero_fill() {
    let (mut ctx, _tmp) = new_context();
    ctx.processes.register(ProcessId(1));

    // One full page of file data plus a 10-byte tail: two chunks expected,
    // the second zero-padded past the file's last 10 bytes.
    let file_data = vec![0x5Au8; 4096 + 10];
    ctx.preload_elf(&file_data, 0x400, 8192, 4106, ProcessId(1));
    assert_eq!(ctx.stats.swap_chunk_zero_filled, 1);

    let result = ctx.handle_fault(FaultKind::Read, 0x400000, Some(ProcessId(1)));
    assert!(result.is_ok());
    assert_eq!(ctx.stats.page_fault_swap, 1);
    assert_eq!(ctx.stats.page_fault_zeroed, 0);

    let result = ctx.handle_fault(FaultKind::Read, 0x401000, Some(ProcessId(1)));
    assert!(result.is_ok());
    assert_eq!(ctx.stats.page_fault_swap, 2);
    assert_eq!(ctx.stats.page_fault_zeroed, 0);
}

#[test]
fn scenario_6_process_teardown() {
    let (mut ctx, _tmp) = new_context();
    ctx.processes.register(ProcessId(1));
    let free_frames_before = ctx.ipt.free_count();
    let free_chunks_before = ctx.swap.free_count();

    for page in 0..8u32 {
        ctx.handle_fault(FaultKind::Read, (0x400 + page) << 12, Some(ProcessId(1))).unwrap();
    }
    ctx.handle_fault(FaultKind::Read, 0x408000, Some(ProcessId(1))).unwrap();
    assert!(ctx.swap.lookup(&ctx.processes, ProcessId(1), 0x400000).is_some());

    ctx.drop_process(ProcessId(1));

    assert_eq!(ctx.ipt.free_count(), free_frames_before);
    assert_eq!(ctx.swap.free_count(), free_chunks_before);
}
