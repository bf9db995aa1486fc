//! Error taxonomy for the paging core.
//!
//! Recoverable conditions are returned as plain enums; invariant violations
//! and device failures are fatal and handled by panicking at the call site
//! rather than being threaded through `Result`.

/// Errors surfaced by `FaultResolver::handle_fault`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// Fault classification was not one of READ/WRITE/READ_ONLY.
    InvalidFaultKind,
    /// No current process/address space, or the fault address is a kernel
    /// address (`vaddr >= MIPS_KSEG0`).
    Fault,
    /// A write landed on a read-only segment. Policy is to terminate the
    /// current process; this crate does not perform the termination itself
    /// since process teardown is out of scope, it only reports the cause.
    ReadOnlyWrite,
}

/// Errors from `SwapTable` operations that are recoverable by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No free swap chunk was available when one was required.
    OutOfSwap,
}

/// Raw block-device transfer failure. Always fatal: any device
/// error is a catastrophic failure signaling kernel halt, so callers should
/// panic rather than propagate this further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    ReadFailed,
    WriteFailed,
    OpenFailed,
}

impl From<VmError> for FaultError {
    fn from(_: VmError) -> Self {
        // Out of swap while resolving a fault is not recoverable at this
        // layer either, but callers that want to map it onto FaultError
        // (e.g. a caller choosing to surface OOM as EFAULT) can do so
        // explicitly via this conversion rather than the core assuming it.
        FaultError::Fault
    }
}
