//! Program tree model and wire-format encoder.
//!
//! A [`Program`] is an ordered list of calls whose arguments form an
//! acyclic graph held in an arena; cross-references (result chaining,
//! checksum chunks) are arena indices, never owned edges. The encoder
//! flattens a program into the instruction stream defined by
//! [`harrier_wire`], assigning copyout slots and memoizing physical
//! addresses along the way. The tree is irreversible by design: nothing
//! here parses a stream back.
//!
//! Construction, mutation and validation of programs belong to the
//! generator upstream; this crate trusts its input to satisfy the tree
//! invariants and reports only buffer exhaustion and structural
//! impossibilities as errors.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod arg;
mod builder;
mod encode;
mod program;

pub use arg::{ArgNode, CsumChunk, Dir, Field};
pub use builder::ProgramBuilder;
pub use encode::{serialize, EncodeError, Layout};
pub use program::{ArgId, Call, Program};
