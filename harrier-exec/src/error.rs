//! Executor error tiers.
//!
//! [`ExecError`] is the fatal tier: a corrupt stream or broken scheduling
//! invariant, after which the executor's state cannot be trusted.
//! [`MemFault`] is the expected tier: a guarded target-memory access hit
//! an unmapped page; callers swallow it and move on.

use harrier_wire::{Fault, Word, WireError};
use thiserror::Error;

/// A guarded target-memory access faulted.
///
/// Not an error in the §7 sense: fuzzed programs routinely point at
/// unmapped pages and execution continues past the access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("target memory access faulted at {addr:#x}+{len}")]
pub struct MemFault {
    /// Faulting target address.
    pub addr: u64,
    /// Length of the attempted access.
    pub len: usize,
}

/// Fatal executor failure. The program stream or the executor's own
/// bookkeeping is broken; the current execute request is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The input stream overran its buffer or the output buffer filled.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// A code word in the stream is outside its defined set.
    #[error("corrupt stream: {0}")]
    Decode(#[from] Fault),
    /// The serialized program exceeds the transport limit.
    #[error("program of {size} bytes exceeds the {limit}-byte buffer")]
    ProgTooLarge {
        /// Received size.
        size: usize,
        /// The transport limit.
        limit: usize,
    },
    /// A blob or checksum argument appeared directly in a call's
    /// argument list; only scalars resolve to register values.
    #[error("argument kind {kind:?} invalid as a call argument")]
    BadCallArg {
        /// The offending kind.
        kind: harrier_wire::ArgKind,
    },
    /// A call names a syscall outside the target's table.
    #[error("call number {num} out of range ({count} syscalls)")]
    BadCallNum {
        /// The offending call number.
        num: Word,
        /// Size of the target's syscall table.
        count: usize,
    },
    /// A call carries more arguments than the format allows.
    #[error("{count} call arguments, limit is {limit}")]
    TooManyArgs {
        /// Count found in the stream.
        count: Word,
        /// The format limit.
        limit: usize,
    },
    /// A copyout index does not fit the result table.
    #[error("copyout index {index} out of range ({limit} slots)")]
    BadCopyoutIndex {
        /// The offending index.
        index: Word,
        /// Capacity of the result table.
        limit: usize,
    },
    /// Every worker is busy and none has completed; the program
    /// over-subscribes the pool.
    #[error("no worker available for the next call")]
    NoFreeWorkers,
    /// A worker's events contradict its bookkeeping.
    #[error("worker {worker} in inconsistent state at completion")]
    BadWorkerState {
        /// Pool index of the worker.
        worker: usize,
    },
    /// More completions drained than calls dispatched.
    #[error("completion drained with no call outstanding")]
    RunningUnderflow,
    /// Fault injection and collide mode cannot be combined.
    #[error("fault injection and collide mode are mutually exclusive")]
    CollideWithFault,
}
