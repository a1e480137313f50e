//! Push-style program construction.

use crate::{
    arg::{ArgNode, CsumChunk, Dir, Field},
    ArgId, Call, Program,
};
use harrier_wire::CsumKind;

/// Builds a [`Program`] one node at a time.
///
/// Nodes are appended to the arena and referenced by the returned ids, so
/// back-references are valid by construction: a node can only refer to
/// nodes that already exist.
///
/// ```
/// use harrier_prog::{Dir, ProgramBuilder};
///
/// let mut b = ProgramBuilder::default();
/// let path = b.data_arg(Dir::In, b"/x\0".to_vec());
/// let flags = b.const_arg(8, 0);
/// b.call(2, vec![path, flags]);
/// let prog = b.finish();
/// assert_eq!(prog.calls().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    args: Vec<ArgNode>,
    calls: Vec<Call>,
}

impl ProgramBuilder {
    /// Appends an arbitrary node.
    pub fn arg(&mut self, node: ArgNode) -> ArgId {
        let id = ArgId(self.args.len() as u32);
        self.args.push(node);
        id
    }

    /// Plain immediate of `size` bytes.
    pub fn const_arg(&mut self, size: u64, value: u64) -> ArgId {
        self.arg(ArgNode::Const {
            size,
            value,
            bf_off: 0,
            bf_len: 0,
            pid_stride: 0,
            dir: Dir::In,
            pad: false,
        })
    }

    /// Immediate occupying the bit range `[bf_off, bf_off + bf_len)` of
    /// its storage unit.
    pub fn bitfield_arg(&mut self, size: u64, value: u64, bf_off: u64, bf_len: u64) -> ArgId {
        self.arg(ArgNode::Const {
            size,
            value,
            bf_off,
            bf_len,
            pid_stride: 0,
            dir: Dir::In,
            pad: false,
        })
    }

    /// Immediate whose effective value is `value + pid_stride * pid`.
    pub fn pid_arg(&mut self, size: u64, value: u64, pid_stride: u64) -> ArgId {
        self.arg(ArgNode::Const {
            size,
            value,
            bf_off: 0,
            bf_len: 0,
            pid_stride,
            dir: Dir::In,
            pad: false,
        })
    }

    /// Struct padding hole of `size` bytes.
    pub fn pad_arg(&mut self, size: u64) -> ArgId {
        self.arg(ArgNode::Const {
            size,
            value: 0,
            bf_off: 0,
            bf_len: 0,
            pid_stride: 0,
            dir: Dir::In,
            pad: true,
        })
    }

    /// Byte blob.
    pub fn data_arg(&mut self, dir: Dir, bytes: Vec<u8>) -> ArgId {
        self.arg(ArgNode::Data { bytes, dir })
    }

    /// Pointer into the data region, optionally carrying a pointee.
    pub fn pointer_to(
        &mut self,
        page_index: u64,
        page_offset: i64,
        pointee: Option<ArgId>,
    ) -> ArgId {
        self.arg(ArgNode::Pointer {
            page_index,
            page_offset,
            pointee,
        })
    }

    /// Struct with explicit field offsets; the size covers the last field
    /// plus trailing padding, if any.
    pub fn group(&mut self, fields: Vec<(u64, ArgId)>) -> ArgId {
        let size = fields
            .iter()
            .map(|(off, arg)| off + self.args[arg.index()].size())
            .max()
            .unwrap_or(0);
        let fields = fields
            .into_iter()
            .map(|(offset, arg)| Field { offset, arg })
            .collect();
        self.arg(ArgNode::Group { fields, size })
    }

    /// Union holding `option` in `size` bytes.
    pub fn union(&mut self, size: u64, option: ArgId) -> ArgId {
        self.arg(ArgNode::Union { option, size })
    }

    /// Reference to an earlier node's runtime value, transformed by
    /// `val / op_div + op_add` (`op_div == 0` skips the division).
    pub fn result_of(&mut self, size: u64, referent: ArgId, op_div: u64, op_add: u64) -> ArgId {
        self.arg(ArgNode::Result {
            size,
            referent: Some(referent),
            literal: 0,
            op_div,
            op_add,
            dir: Dir::In,
        })
    }

    /// Unlinked result placeholder holding a literal.
    pub fn result_literal(&mut self, size: u64, literal: u64) -> ArgId {
        self.arg(ArgNode::Result {
            size,
            referent: None,
            literal,
            op_div: 0,
            op_add: 0,
            dir: Dir::In,
        })
    }

    /// Two-byte Internet checksum over `chunks`.
    pub fn csum_inet(&mut self, chunks: Vec<CsumChunk>) -> ArgId {
        self.arg(ArgNode::Csum {
            size: 2,
            kind: CsumKind::Inet,
            chunks,
            dir: Dir::In,
        })
    }

    /// Appends a call and returns its `Return` node, which later calls
    /// may reference via [`Self::result_of`].
    pub fn call(&mut self, num: u64, args: Vec<ArgId>) -> ArgId {
        let ret = self.arg(ArgNode::Return);
        self.calls.push(Call { num, args, ret });
        ret
    }

    /// Finalizes the program.
    pub fn finish(self) -> Program {
        Program {
            args: self.args,
            calls: self.calls,
        }
    }
}
