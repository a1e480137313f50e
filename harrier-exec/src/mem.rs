//! Guarded loads and stores on target memory.
//!
//! Operand sizes outside `{1, 2, 4, 8}` are a corrupt stream and fatal;
//! the memory access itself may always fault and is swallowed, per the
//! two-tier error policy.

use crate::{error::ExecError, target::Target};
use harrier_wire::{Fault, Word, DEFAULT_VALUE};

pub(crate) fn check_size(size: Word) -> Result<usize, Fault> {
    match size {
        1 | 2 | 4 | 8 => Ok(size as usize),
        _ => Err(Fault::BadOperandSize),
    }
}

/// Writes `value` into a `size`-byte field at `addr`. A nonzero `bf_len`
/// replaces only the bit range `[bf_off, bf_off + bf_len)` of the stored
/// unit, read-modify-write.
pub(crate) fn copyin_value<T: Target>(
    target: &T,
    addr: u64,
    value: Word,
    size: Word,
    bf_off: Word,
    bf_len: Word,
) -> Result<(), ExecError> {
    let size = check_size(size)?;
    let stored = if bf_len == 0 {
        Some(value)
    } else {
        let mut cur = [0u8; 8];
        match target.mem_read(addr, &mut cur[..size]) {
            Ok(()) => {
                let word = Word::from_le_bytes(cur);
                Some(splice_bitfield(word, value, bf_off, bf_len))
            }
            Err(fault) => {
                tracing::trace!(%fault, "bitfield load fault swallowed");
                None
            }
        }
    };
    if let Some(word) = stored {
        if let Err(fault) = target.mem_write(addr, &word.to_le_bytes()[..size]) {
            tracing::trace!(%fault, "copyin fault swallowed");
        }
    }
    Ok(())
}

/// Copies a data blob to `addr`.
pub(crate) fn copyin_data<T: Target>(target: &T, addr: u64, bytes: &[u8]) {
    if let Err(fault) = target.mem_write(addr, bytes) {
        tracing::trace!(%fault, "data copyin fault swallowed");
    }
}

/// Loads a `size`-byte value from `addr`. A fault yields the unresolved
/// placeholder so dependent calls still receive a defined value.
pub(crate) fn copyout_value<T: Target>(
    target: &T,
    addr: u64,
    size: Word,
) -> Result<Word, ExecError> {
    let size = check_size(size)?;
    let mut buf = [0u8; 8];
    match target.mem_read(addr, &mut buf[..size]) {
        Ok(()) => Ok(Word::from_le_bytes(buf)),
        Err(fault) => {
            tracing::trace!(%fault, "copyout fault swallowed");
            Ok(DEFAULT_VALUE)
        }
    }
}

fn splice_bitfield(word: Word, value: Word, bf_off: Word, bf_len: Word) -> Word {
    // Degenerate offsets shift the field out of the unit entirely; the
    // store then leaves the word untouched rather than panicking on a
    // 64-bit shift.
    let field = if bf_len >= 64 { !0 } else { (1 << bf_len) - 1 };
    let (mask, bits) = if bf_off >= 64 {
        (0, 0)
    } else {
        (field << bf_off, (value & field) << bf_off)
    };
    (word & !mask) | bits
}
