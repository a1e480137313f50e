//! Program serialization into the instruction stream.
//!
//! One pass per call, in stream order: copyins for pointer-mapped
//! structure, checksum copyins in reverse address order, the call word
//! itself, then copyouts for every value a later call references. Copyout
//! slots come from a single monotone counter shared by return values and
//! memory captures, so the executor's result table needs no per-call
//! bookkeeping.

use crate::{
    arg::{ArgNode, CsumChunk, Dir},
    ArgId, Call, Program,
};
use harrier_wire::{
    ArgKind, ChunkKind, Word, WordWriter, INSTR_COPYIN, INSTR_COPYOUT, INSTR_EOF, MAX_ARGS,
    MAX_COMMANDS, NO_COPYOUT,
};
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Memory geometry of the target's data region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Target page size.
    pub page_size: u64,
    /// Virtual address where the data region is mapped.
    pub data_offset: u64,
}

impl Layout {
    /// Resolves a pointer's page index and signed page offset to a target
    /// virtual address. Negative offsets count back from the end of the
    /// page.
    pub fn physical_addr(&self, page_index: u64, page_offset: i64) -> u64 {
        let base = page_index
            .wrapping_mul(self.page_size)
            .wrapping_add(self.data_offset);
        if page_offset >= 0 {
            base.wrapping_add(page_offset as u64)
        } else {
            base.wrapping_add(self.page_size.wrapping_sub(page_offset.unsigned_abs()))
        }
    }
}

/// Why a program could not be serialized.
///
/// Everything except [`EncodeError::BufferTooSmall`] indicates a tree that
/// violates the construction invariants, i.e. a broken generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The serialization does not fit the output buffer. Nothing was
    /// meaningfully written.
    #[error("serialized program does not fit the output buffer")]
    BufferTooSmall,
    /// A call carries more than [`MAX_ARGS`] arguments.
    #[error("call {call} has {count} arguments, limit is {limit}")]
    TooManyArgs {
        /// Call position in the program.
        call: usize,
        /// Argument count found.
        count: usize,
        /// The [`MAX_ARGS`] limit.
        limit: usize,
    },
    /// A result reference points at a node that never received a copyout
    /// slot.
    #[error("result reference precedes its referent's copyout slot")]
    MissingCopyoutIndex,
    /// A checksum data chunk references a node outside pointer-mapped
    /// memory.
    #[error("checksum chunk references an argument with no physical address")]
    MissingChunkAddress,
    /// More values need preserving than the result table can hold.
    #[error("copyout slots exhausted, limit is {limit}")]
    TooManyCopyouts {
        /// The [`MAX_COMMANDS`] limit.
        limit: usize,
    },
    /// A composite node was used directly as a call argument.
    #[error("composite node used as a call argument")]
    NonScalarCallArg,
}

/// Serializes `prog` into `buf`, returning the number of bytes written.
///
/// `pid` partitions per-process resources (ports and the like) between
/// concurrently fuzzing processes; it only affects `Const` nodes with a
/// nonzero stride.
pub fn serialize(
    prog: &Program,
    layout: &Layout,
    pid: u64,
    buf: &mut [u8],
) -> Result<usize, EncodeError> {
    let mut enc = Encoder {
        prog,
        layout: *layout,
        pid,
        w: WordWriter::new(buf),
        used: prog.used_args(),
        addrs: HashMap::new(),
        copyout: HashMap::new(),
        copyout_seq: 0,
    };
    for (index, call) in prog.calls().iter().enumerate() {
        enc.encode_call(index, call)?;
    }
    enc.w.write_word(INSTR_EOF);
    enc.w.finish().map_err(|_| EncodeError::BufferTooSmall)
}

struct Encoder<'a, 'b> {
    prog: &'a Program,
    layout: Layout,
    pid: u64,
    w: WordWriter<'b>,
    used: HashSet<ArgId>,
    addrs: HashMap<ArgId, u64>,
    copyout: HashMap<ArgId, Word>,
    copyout_seq: Word,
}

impl Encoder<'_, '_> {
    fn encode_call(&mut self, index: usize, call: &Call) -> Result<(), EncodeError> {
        let csum_targets = self.prog.csum_targets(&call.args);

        // Address pass and copyin emission in one walk; checksums are
        // only collected here, their instructions must land last.
        let mut csums = Vec::new();
        for &arg in &call.args {
            self.visit_top(arg, &csum_targets, &mut csums)?;
        }

        // An outer checksum may cover bytes a later checksum writes;
        // descending address order keeps the sequential replay correct.
        for (id, addr) in csums.iter().sorted_by_key(|(_, addr)| *addr).rev() {
            self.emit_csum(*id, *addr)?;
        }

        self.w.write_word(call.num);
        if self.used.contains(&call.ret) {
            let idx = self.next_copyout(call.ret)?;
            self.w.write_word(idx);
        } else {
            self.w.write_word(NO_COPYOUT);
        }
        if call.args.len() > MAX_ARGS {
            return Err(EncodeError::TooManyArgs {
                call: index,
                count: call.args.len(),
                limit: MAX_ARGS,
            });
        }
        self.w.write_word(call.args.len() as Word);
        for &arg in &call.args {
            self.marshal_arg(arg)?;
        }

        for &arg in &call.args {
            self.emit_copyouts(arg)?;
        }
        Ok(())
    }

    /// Finds pointer-mapped structure below a top-level argument.
    fn visit_top(
        &mut self,
        id: ArgId,
        csum_targets: &HashSet<ArgId>,
        csums: &mut Vec<(ArgId, u64)>,
    ) -> Result<(), EncodeError> {
        let prog = self.prog;
        match prog.arg(id) {
            ArgNode::Pointer {
                page_index,
                page_offset,
                pointee: Some(pointee),
            } => {
                let base = self.layout.physical_addr(*page_index, *page_offset);
                self.walk_pointee(*pointee, base, csum_targets, csums)
            }
            ArgNode::Group { fields, .. } => {
                for field in fields {
                    self.visit_top(field.arg, csum_targets, csums)?;
                }
                Ok(())
            }
            ArgNode::Union { option, .. } => self.visit_top(*option, csum_targets, csums),
            _ => Ok(()),
        }
    }

    /// Records addresses and emits copyins for one pointee subtree rooted
    /// at `addr`.
    fn walk_pointee(
        &mut self,
        id: ArgId,
        addr: u64,
        csum_targets: &HashSet<ArgId>,
        csums: &mut Vec<(ArgId, u64)>,
    ) -> Result<(), EncodeError> {
        if self.used.contains(&id) || csum_targets.contains(&id) {
            self.addrs.insert(id, addr);
        }
        let prog = self.prog;
        match prog.arg(id) {
            ArgNode::Group { fields, .. } => {
                for field in fields {
                    self.walk_pointee(
                        field.arg,
                        addr.wrapping_add(field.offset),
                        csum_targets,
                        csums,
                    )?;
                }
                Ok(())
            }
            ArgNode::Union { option, .. } => {
                self.walk_pointee(*option, addr, csum_targets, csums)
            }
            ArgNode::Pointer {
                page_index,
                page_offset,
                pointee,
            } => {
                // The pointer cell itself is structure to copy in.
                self.emit_copyin(id, addr)?;
                if let Some(pointee) = pointee {
                    let base = self.layout.physical_addr(*page_index, *page_offset);
                    self.walk_pointee(*pointee, base, csum_targets, csums)?;
                }
                Ok(())
            }
            ArgNode::Csum { .. } => {
                csums.push((id, addr));
                Ok(())
            }
            ArgNode::Return => Ok(()),
            node @ (ArgNode::Const { .. } | ArgNode::Result { .. } | ArgNode::Data { .. }) => {
                let skip = node.dir() == Dir::Out
                    || match node {
                        ArgNode::Const { pad, .. } => *pad,
                        ArgNode::Data { bytes, .. } => bytes.is_empty(),
                        _ => false,
                    };
                if skip {
                    Ok(())
                } else {
                    self.emit_copyin(id, addr)
                }
            }
        }
    }

    fn emit_copyin(&mut self, id: ArgId, addr: u64) -> Result<(), EncodeError> {
        self.w.write_word(INSTR_COPYIN);
        self.w.write_word(addr);
        self.marshal_arg(id)
    }

    /// Writes one argument encoding, as used both by copyin instructions
    /// and by call argument lists.
    fn marshal_arg(&mut self, id: ArgId) -> Result<(), EncodeError> {
        let prog = self.prog;
        match prog.arg(id) {
            ArgNode::Const {
                size,
                value,
                bf_off,
                bf_len,
                pid_stride,
                ..
            } => {
                let value = value.wrapping_add(pid_stride.wrapping_mul(self.pid));
                self.write_scalar(ArgKind::Const, *size, value, *bf_off, *bf_len);
                Ok(())
            }
            ArgNode::Result {
                size,
                referent: None,
                literal,
                ..
            } => {
                // Unlinked results degenerate to immediates.
                self.write_scalar(ArgKind::Const, *size, *literal, 0, 0);
                Ok(())
            }
            ArgNode::Result {
                size,
                referent: Some(referent),
                op_div,
                op_add,
                ..
            } => {
                let idx = *self
                    .copyout
                    .get(referent)
                    .ok_or(EncodeError::MissingCopyoutIndex)?;
                self.write_scalar(ArgKind::Result, *size, idx, *op_div, *op_add);
                Ok(())
            }
            ArgNode::Pointer {
                page_index,
                page_offset,
                ..
            } => {
                let addr = self.layout.physical_addr(*page_index, *page_offset);
                self.write_scalar(ArgKind::Const, 8, addr, 0, 0);
                Ok(())
            }
            ArgNode::Data { bytes, .. } => {
                self.w.write_word(ArgKind::Data.into());
                self.w.write_word(bytes.len() as Word);
                self.w.write_bytes_padded(bytes);
                Ok(())
            }
            ArgNode::Group { .. } | ArgNode::Union { .. } | ArgNode::Return | ArgNode::Csum { .. } => {
                Err(EncodeError::NonScalarCallArg)
            }
        }
    }

    fn write_scalar(&mut self, kind: ArgKind, size: u64, value: u64, a: u64, b: u64) {
        self.w.write_word(kind.into());
        self.w.write_word(size);
        self.w.write_word(value);
        self.w.write_word(a);
        self.w.write_word(b);
    }

    fn emit_csum(&mut self, id: ArgId, addr: u64) -> Result<(), EncodeError> {
        let prog = self.prog;
        let ArgNode::Csum {
            size, kind, chunks, ..
        } = prog.arg(id)
        else {
            unreachable!("checksum list holds only checksum nodes")
        };
        self.w.write_word(INSTR_COPYIN);
        self.w.write_word(addr);
        self.w.write_word(ArgKind::Csum.into());
        self.w.write_word(*size);
        self.w.write_word((*kind).into());
        self.w.write_word(chunks.len() as Word);
        for chunk in chunks {
            match chunk {
                CsumChunk::Data { arg, size } => {
                    let addr = *self
                        .addrs
                        .get(arg)
                        .ok_or(EncodeError::MissingChunkAddress)?;
                    self.w.write_word(ChunkKind::Data.into());
                    self.w.write_word(addr);
                    self.w.write_word(*size);
                }
                CsumChunk::Const { value, size } => {
                    self.w.write_word(ChunkKind::Const.into());
                    self.w.write_word(*value);
                    self.w.write_word(*size);
                }
            }
        }
        Ok(())
    }

    /// Emits copyouts for every used node below a top-level argument.
    fn emit_copyouts(&mut self, id: ArgId) -> Result<(), EncodeError> {
        let prog = self.prog;
        match prog.arg(id) {
            ArgNode::Pointer {
                pointee: Some(pointee),
                ..
            } => self.walk_copyouts(*pointee),
            ArgNode::Group { fields, .. } => {
                for field in fields {
                    self.emit_copyouts(field.arg)?;
                }
                Ok(())
            }
            ArgNode::Union { option, .. } => self.emit_copyouts(*option),
            _ => Ok(()),
        }
    }

    fn walk_copyouts(&mut self, id: ArgId) -> Result<(), EncodeError> {
        let prog = self.prog;
        let node = prog.arg(id);
        if !matches!(node, ArgNode::Return) && self.used.contains(&id) {
            if let Some(&addr) = self.addrs.get(&id) {
                let idx = self.next_copyout(id)?;
                self.w.write_word(INSTR_COPYOUT);
                self.w.write_word(idx);
                self.w.write_word(addr);
                self.w.write_word(node.size());
            }
        }
        match node {
            ArgNode::Group { fields, .. } => {
                for field in fields {
                    self.walk_copyouts(field.arg)?;
                }
                Ok(())
            }
            ArgNode::Union { option, .. } => self.walk_copyouts(*option),
            ArgNode::Pointer {
                pointee: Some(pointee),
                ..
            } => self.walk_copyouts(*pointee),
            _ => Ok(()),
        }
    }

    fn next_copyout(&mut self, id: ArgId) -> Result<Word, EncodeError> {
        let idx = self.copyout_seq;
        if idx >= MAX_COMMANDS as Word {
            return Err(EncodeError::TooManyCopyouts {
                limit: MAX_COMMANDS,
            });
        }
        self.copyout_seq += 1;
        self.copyout.insert(id, idx);
        Ok(idx)
    }
}
