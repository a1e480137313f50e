//! Per-call output records.
//!
//! The buffer is a stream of little-endian `u32` words. Word zero is the
//! number of completed calls, patched in place after every record so a
//! reader observing a crashed executor still knows how far it got.

use crate::consts::OUTPUT_SIZE;
use crate::error::ExecError;
use harrier_wire::WireError;

/// Bounded `u32`-word output stream with a leading completion counter.
#[derive(Debug)]
pub struct OutputBuffer {
    buf: Vec<u8>,
    completed: u32,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBuffer {
    /// An empty buffer holding only a zero completion counter.
    pub fn new() -> Self {
        let mut out = Self {
            buf: Vec::new(),
            completed: 0,
        };
        out.reset();
        out
    }

    /// Discards all records and zeroes the counter.
    pub(crate) fn reset(&mut self) {
        self.buf.clear();
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        self.completed = 0;
    }

    /// Appends one word.
    pub(crate) fn write_u32(&mut self, word: u32) -> Result<(), ExecError> {
        if self.buf.len() + 4 > OUTPUT_SIZE {
            return Err(ExecError::Wire(WireError::Overflow {
                offset: self.buf.len(),
            }));
        }
        self.buf.extend_from_slice(&word.to_le_bytes());
        Ok(())
    }

    /// Marks one more call as completed.
    pub(crate) fn bump_completed(&mut self) {
        self.completed += 1;
        self.buf[..4].copy_from_slice(&self.completed.to_le_bytes());
    }

    /// Calls completed so far.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// The raw record stream, counter included.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }
}
