//! Reserved instruction codes and argument-type codes.

use crate::Word;

/// Terminates the instruction stream.
pub const INSTR_EOF: Word = !0;

/// Writes an argument into target memory before a call.
pub const INSTR_COPYIN: Word = !1;

/// Captures a value from target memory after the owning call completes.
pub const INSTR_COPYOUT: Word = !2;

/// Placed in the copyout-index slot of a call whose return value is unused.
pub const NO_COPYOUT: Word = !0;

code_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[repr(u64)]
    /// Argument-type code. The word following `INSTR_COPYIN`'s address, and
    /// the first word of every call argument.
    pub enum ArgKind {
        /// Immediate value: `size, value, bf_off, bf_len`.
        Const = 0,
        /// Reference to a copyout slot: `size, ref_idx, op_div, op_add`.
        Result = 1,
        /// Raw byte blob: `byte_len, data padded to a word multiple`.
        Data = 2,
        /// Checksum over scattered chunks: `size, kind, n_chunks, chunks`.
        Csum = 3,
    },
    UnknownArgKind
}

code_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[repr(u64)]
    /// Checksum kind carried by an `ArgKind::Csum` argument.
    pub enum CsumKind {
        /// 16-bit ones'-complement Internet checksum.
        Inet = 0,
    },
    UnknownCsumKind
}

code_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    #[repr(u64)]
    /// Kind of one checksum chunk.
    pub enum ChunkKind {
        /// `value` is a target address; feed `size` bytes read from it.
        Data = 0,
        /// `value` is a literal; feed its low `size` bytes, big-endian.
        Const = 1,
    },
    UnknownChunkKind
}

/// One decoded instruction word.
///
/// Reserved codes occupy the top of the word space, so any word below them
/// is a syscall number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    /// End of stream.
    Eof,
    /// `addr, arg` follow.
    Copyin,
    /// `idx, addr, size` follow.
    Copyout,
    /// `copyout_index, num_args, args` follow.
    Call(Word),
}

impl Instr {
    /// Classifies a raw instruction word.
    pub const fn decode(word: Word) -> Self {
        match word {
            INSTR_EOF => Instr::Eof,
            INSTR_COPYIN => Instr::Copyin,
            INSTR_COPYOUT => Instr::Copyout,
            num => Instr::Call(num),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn reserved_codes_sit_at_the_top_of_the_word_space() {
        assert_eq!(INSTR_EOF, u64::MAX);
        assert_eq!(INSTR_COPYIN, u64::MAX - 1);
        assert_eq!(INSTR_COPYOUT, u64::MAX - 2);
        assert_eq!(NO_COPYOUT, u64::MAX);
    }

    #[test]
    fn arg_kind_roundtrip() {
        for kind in ArgKind::iter() {
            assert_eq!(ArgKind::try_from(kind as Word), Ok(kind));
        }
        assert_eq!(ArgKind::try_from(4), Err(crate::Fault::UnknownArgKind));
    }

    #[test]
    fn chunk_and_csum_kinds_roundtrip() {
        for kind in CsumKind::iter() {
            assert_eq!(CsumKind::try_from(kind as Word), Ok(kind));
        }
        for kind in ChunkKind::iter() {
            assert_eq!(ChunkKind::try_from(kind as Word), Ok(kind));
        }
        assert_eq!(CsumKind::try_from(1), Err(crate::Fault::UnknownCsumKind));
        assert_eq!(ChunkKind::try_from(2), Err(crate::Fault::UnknownChunkKind));
    }

    #[test]
    fn instr_decode_reserves_high_codes() {
        assert_eq!(Instr::decode(INSTR_EOF), Instr::Eof);
        assert_eq!(Instr::decode(INSTR_COPYIN), Instr::Copyin);
        assert_eq!(Instr::decode(INSTR_COPYOUT), Instr::Copyout);
        assert_eq!(Instr::decode(0), Instr::Call(0));
        assert_eq!(Instr::decode(!3), Instr::Call(!3));
    }
}
