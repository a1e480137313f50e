//! Instruction-stream executor.
//!
//! Parses the wire format produced by the encoder and drives the target:
//! copyins write argument structure into target memory, checksum
//! instructions patch Internet checksums over scattered chunks, call
//! instructions dispatch syscalls onto a fixed worker pool, and copyouts
//! capture values later calls chain on. Completion of each call appends a
//! record of its result and coverage to the output buffer.
//!
//! The stream is trusted the way a kernel trusts its own page tables:
//! structurally invalid input (unknown codes, overruns, exhausted worker
//! pool) aborts execution with an [`ExecError`], while faults on target
//! memory — unmapped pages are an everyday event while fuzzing — are
//! swallowed so the program keeps running.

#![warn(missing_docs)]
#![deny(unused_must_use)]

mod consts;
mod cover;
mod csum;
mod error;
mod exec;
mod mem;
mod output;
mod pool;
pub mod proto;
mod target;

pub use consts::*;
pub use cover::{DedupTable, KcovComparison, CMP_CONST, CMP_SIZE_MASK};
pub use csum::InetChecksum;
pub use error::{ExecError, MemFault};
pub use exec::{ExecOpts, ExecResult, Executor};
pub use output::OutputBuffer;
pub use target::{SyscallOutcome, Target};

#[cfg(any(test, feature = "test-helpers"))]
pub use target::TestTarget;
