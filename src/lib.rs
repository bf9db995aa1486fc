//! Core of a demand-paged virtual-memory subsystem for a teaching kernel.
//!
//! This crate owns the inverted page table, the swap manager, and the
//! page-fault resolver. It deliberately does not own ELF loading, address
//! space construction, process lifecycle, the TLB hardware driver, raw
//! block-device I/O, direct physical-memory access, or the bootstrap bump
//! allocator: those are primitives or external collaborators, modeled here
//! only as the trait seams (`BlockDevice`, `PhysMemory`, `Tlb`, `StatsSink`)
//! the core calls into.
#![cfg_attr(not(any(test, feature = "test-util")), no_std)]

extern crate alloc;

pub mod bitentry;
pub mod block_device;
pub mod config;
pub mod context;
pub mod error;
pub mod fault;
pub mod ipt;
pub mod kernel_region;
pub mod phys_memory;
pub mod process;
pub mod stats;
pub mod swap_table;
pub mod tlb;

pub use bitentry::{IptEntry, StEntry};
pub use block_device::BlockDevice;
pub use context::{bootstrap, VmContext};
pub use error::{DeviceError, FaultError, VmError};
pub use fault::{FaultKind, FaultResolver};
pub use ipt::Ipt;
pub use kernel_region::KernelRegionTable;
pub use phys_memory::{BufferPhysMemory, NullPhysMemory, PhysMemory};
pub use process::{ProcessDescriptor, ProcessId, ProcessTable};
pub use stats::{CountingStats, NullStats, StatsSink};
pub use swap_table::SwapTable;
pub use tlb::{NullTlb, RecordingTlb, Tlb};

#[cfg(test)]
pub(crate) mod test_support;
