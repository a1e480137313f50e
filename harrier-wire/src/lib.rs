//! Wire-format primitives of the harrier program stream.
//!
//! Both halves of the system speak the format defined here: the encoder
//! flattens a program tree into a stream of little-endian `u64` words, and
//! the executor parses that stream in place on the target. Nothing in this
//! crate interprets the stream; it only names the codes, limits and flag
//! words, and moves words in and out of byte buffers.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

#[macro_use]
mod macros;

mod codes;
mod fault;
mod flags;
mod stream;

pub use codes::{
    ArgKind, ChunkKind, CsumKind, Instr, INSTR_COPYIN, INSTR_COPYOUT, INSTR_EOF, NO_COPYOUT,
};
pub use fault::Fault;
pub use flags::{EnvFlags, ExecFlags};
pub use stream::{WireError, WordReader, WordWriter};

/// Stream word type. Every instruction and argument field is one of these.
pub type Word = u64;

/// Size of a stream word, in bytes.
pub const WORD_SIZE: usize = core::mem::size_of::<Word>();

/// Maximum size of a serialized program, in bytes.
pub const EXEC_BUFFER_SIZE: usize = 2 << 20;

/// Maximum number of arguments of a single call.
pub const MAX_ARGS: usize = 9;

/// Number of worker threads available to the executor.
pub const MAX_THREADS: usize = 16;

/// Capacity of the copyout result table.
pub const MAX_COMMANDS: usize = 1000;

/// Per-worker coverage buffer capacity, in entries.
pub const COVER_SIZE: usize = 64 << 10;

/// Slot count of the coverage signal dedup table.
pub const DEDUP_TABLE_SIZE: usize = 8192;

/// Value an unresolved result reference decays to.
pub const DEFAULT_VALUE: Word = !0;

/// Magic tag opening every control request.
pub const IN_MAGIC: u64 = 0xbadc0ffeebadface;

/// Magic tag opening every control reply.
pub const OUT_MAGIC: u32 = 0xbadf00d;

static_assertions::const_assert!(DEDUP_TABLE_SIZE.is_power_of_two());
static_assertions::const_assert!(EXEC_BUFFER_SIZE % WORD_SIZE == 0);
