//! Argument graph nodes.

use crate::ArgId;
use harrier_wire::CsumKind;

/// Data flow direction of an argument relative to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dir {
    /// Written into target memory before the call.
    In,
    /// Produced by the kernel; never copied in.
    Out,
    /// Both.
    InOut,
}

/// One field of a struct argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Byte offset inside the parent struct, padding included.
    pub offset: u64,
    /// The field's node.
    pub arg: ArgId,
}

/// One chunk of a checksummed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsumChunk {
    /// Bytes of another argument, located by its physical address.
    Data {
        /// Referenced node; must occupy pointer-mapped memory.
        arg: ArgId,
        /// Bytes to feed.
        size: u64,
    },
    /// A literal fed in big-endian convention.
    Const {
        /// Literal value.
        value: u64,
        /// Bytes to feed; 2, 4 or 8.
        size: u64,
    },
}

/// Node of the argument graph.
///
/// A closed union: the encoder matches exhaustively, so a new variant
/// cannot be forgotten downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgNode {
    /// Immediate value, optionally a bitfield slice of its storage unit.
    Const {
        /// Storage size in bytes.
        size: u64,
        /// Base value.
        value: u64,
        /// Bit offset of the field inside the storage unit.
        bf_off: u64,
        /// Bit length of the field; 0 means not a bitfield.
        bf_len: u64,
        /// Added `pid` times to the value, for per-process partitioning
        /// of ports and similar resources.
        pid_stride: u64,
        /// Data flow direction.
        dir: Dir,
        /// Struct padding; never copied in.
        pad: bool,
    },
    /// The (possibly transformed) result of an earlier call.
    Result {
        /// Storage size in bytes.
        size: u64,
        /// Referenced node; `None` leaves the literal in place.
        referent: Option<ArgId>,
        /// Value used while unlinked.
        literal: u64,
        /// Divisor applied to the referent's value; 0 skips the division.
        op_div: u64,
        /// Addend applied after the division.
        op_add: u64,
        /// Data flow direction.
        dir: Dir,
    },
    /// Address of a structure in the target data region.
    Pointer {
        /// Page index inside the data region.
        page_index: u64,
        /// Signed byte offset; negative offsets count back from the end
        /// of the page.
        page_offset: i64,
        /// Structure at the resolved address, if any.
        pointee: Option<ArgId>,
    },
    /// Raw byte blob.
    Data {
        /// The bytes.
        bytes: Vec<u8>,
        /// Data flow direction.
        dir: Dir,
    },
    /// Struct: fields at fixed offsets.
    Group {
        /// Fields in declaration order.
        fields: Vec<Field>,
        /// Total size, padding included.
        size: u64,
    },
    /// Union: one active option occupying `size` bytes.
    Union {
        /// The active option.
        option: ArgId,
        /// Declared size of the union.
        size: u64,
    },
    /// Placeholder for a call's return value.
    Return,
    /// Placeholder filled at runtime with a checksum over chunks.
    Csum {
        /// Storage size in bytes; at most 8, exactly 2 for `Inet`.
        size: u64,
        /// Checksum algorithm.
        kind: CsumKind,
        /// Regions to feed, in order.
        chunks: Vec<CsumChunk>,
        /// Data flow direction.
        dir: Dir,
    },
}

impl ArgNode {
    /// Serialized size of the node in target memory, in bytes.
    pub fn size(&self) -> u64 {
        match self {
            ArgNode::Const { size, .. }
            | ArgNode::Result { size, .. }
            | ArgNode::Group { size, .. }
            | ArgNode::Union { size, .. }
            | ArgNode::Csum { size, .. } => *size,
            ArgNode::Pointer { .. } => 8,
            ArgNode::Data { bytes, .. } => bytes.len() as u64,
            ArgNode::Return => 0,
        }
    }

    /// Data flow direction; composites and placeholders default to `In`.
    pub fn dir(&self) -> Dir {
        match self {
            ArgNode::Const { dir, .. }
            | ArgNode::Result { dir, .. }
            | ArgNode::Data { dir, .. }
            | ArgNode::Csum { dir, .. } => *dir,
            ArgNode::Pointer { .. }
            | ArgNode::Group { .. }
            | ArgNode::Union { .. }
            | ArgNode::Return => Dir::In,
        }
    }
}
