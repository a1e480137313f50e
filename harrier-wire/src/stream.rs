//! Word-granular readers and writers over byte buffers.
//!
//! The stream is a flat sequence of little-endian `u64` words; byte blobs
//! are padded up to a word multiple so every cursor position stays
//! word-aligned. The reader fails loudly on overrun (a corrupt stream must
//! not be silently truncated), while the writer records overflow stickily
//! and reports it once at the end, which is what lets the encoder finish
//! its walk before declaring the buffer too small.

use crate::{Word, WORD_SIZE};
use thiserror::Error;

/// Cursor violation while moving words in or out of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    /// A read ran past the end of the input buffer.
    #[error("input stream overrun at byte offset {offset}")]
    Underrun {
        /// Byte offset of the failed access.
        offset: usize,
    },
    /// One or more writes ran past the end of the output buffer.
    #[error("output buffer exhausted at byte offset {offset}")]
    Overflow {
        /// Byte offset of the first failed write.
        offset: usize,
    },
}

/// Reads words from a byte buffer without copying it.
#[derive(Debug, Clone)]
pub struct WordReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WordReader<'a> {
    /// Wraps a buffer, starting at its first word.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current byte offset. Always a word multiple.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Repositions the cursor. `pos` must be a word multiple.
    pub fn seek(&mut self, pos: usize) {
        debug_assert_eq!(pos % WORD_SIZE, 0);
        self.pos = pos;
    }

    /// Reads the next word and advances.
    pub fn read_word(&mut self) -> Result<Word, WireError> {
        let word = self.peek_word()?;
        self.pos += WORD_SIZE;
        Ok(word)
    }

    /// Reads the next word without advancing.
    pub fn peek_word(&self) -> Result<Word, WireError> {
        let end = self.pos.checked_add(WORD_SIZE).filter(|e| *e <= self.data.len());
        let Some(end) = end else {
            return Err(WireError::Underrun { offset: self.pos });
        };
        let mut bytes = [0u8; WORD_SIZE];
        bytes.copy_from_slice(&self.data[self.pos..end]);
        Ok(Word::from_le_bytes(bytes))
    }

    /// Skips `n` whole words.
    pub fn skip_words(&mut self, n: usize) -> Result<(), WireError> {
        let len = n
            .checked_mul(WORD_SIZE)
            .and_then(|len| self.pos.checked_add(len))
            .filter(|end| *end <= self.data.len());
        match len {
            Some(end) => {
                self.pos = end;
                Ok(())
            }
            None => Err(WireError::Underrun { offset: self.pos }),
        }
    }

    /// Returns the next `len` raw bytes and advances by the padded word
    /// count that carries them. The pad bytes are not part of the slice.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let data = self.data;
        let padded = padded_len(len).ok_or(WireError::Underrun { offset: self.pos })?;
        let end = self
            .pos
            .checked_add(padded)
            .filter(|end| *end <= data.len())
            .ok_or(WireError::Underrun { offset: self.pos })?;
        let bytes = &data[self.pos..self.pos + len];
        self.pos = end;
        Ok(bytes)
    }
}

/// Writes words into a byte buffer, tracking overflow stickily.
#[derive(Debug)]
pub struct WordWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
    overflow: Option<usize>,
}

impl<'a> WordWriter<'a> {
    /// Wraps an output buffer.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            overflow: None,
        }
    }

    /// Bytes written so far.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Whether any write has overrun the buffer.
    pub fn overflowed(&self) -> bool {
        self.overflow.is_some()
    }

    /// Appends one word. After the first overflow every write is a no-op.
    pub fn write_word(&mut self, word: Word) {
        if self.overflow.is_some() {
            return;
        }
        let Some(end) = self.pos.checked_add(WORD_SIZE).filter(|e| *e <= self.buf.len())
        else {
            self.overflow = Some(self.pos);
            return;
        };
        self.buf[self.pos..end].copy_from_slice(&word.to_le_bytes());
        self.pos = end;
    }

    /// Appends raw bytes padded with zeros up to a word multiple.
    pub fn write_bytes_padded(&mut self, bytes: &[u8]) {
        if self.overflow.is_some() {
            return;
        }
        let padded = padded_len(bytes.len())
            .and_then(|p| self.pos.checked_add(p))
            .filter(|end| *end <= self.buf.len());
        let Some(end) = padded else {
            self.overflow = Some(self.pos);
            return;
        };
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.buf[self.pos + bytes.len()..end].fill(0);
        self.pos = end;
    }

    /// Finishes the stream, returning the byte length written or the
    /// sticky overflow.
    pub fn finish(self) -> Result<usize, WireError> {
        match self.overflow {
            Some(offset) => Err(WireError::Overflow { offset }),
            None => Ok(self.pos),
        }
    }
}

/// Rounds `len` up to a word multiple.
pub(crate) fn padded_len(len: usize) -> Option<usize> {
    len.checked_add(WORD_SIZE - 1).map(|l| l & !(WORD_SIZE - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn read_back_written_words() {
        let mut buf = [0u8; 32];
        let mut w = WordWriter::new(&mut buf);
        w.write_word(1);
        w.write_word(!0);
        w.write_word(0xdead_beef);
        let len = w.finish().unwrap();
        assert_eq!(len, 24);

        let mut r = WordReader::new(&buf[..len]);
        assert_eq!(r.read_word().unwrap(), 1);
        assert_eq!(r.peek_word().unwrap(), !0);
        assert_eq!(r.read_word().unwrap(), !0);
        assert_eq!(r.read_word().unwrap(), 0xdead_beef);
        assert_eq!(r.read_word(), Err(WireError::Underrun { offset: 24 }));
    }

    #[test]
    fn overflow_is_sticky_and_reported_once() {
        let mut buf = [0u8; 8];
        let mut w = WordWriter::new(&mut buf);
        w.write_word(7);
        w.write_word(8); // overruns
        w.write_word(9); // no-op after overflow
        assert!(w.overflowed());
        assert_eq!(w.finish(), Err(WireError::Overflow { offset: 8 }));
    }

    #[test]
    fn bytes_are_padded_to_a_word_multiple() {
        let mut buf = [0xaau8; 16];
        let mut w = WordWriter::new(&mut buf);
        w.write_bytes_padded(b"/x");
        assert_eq!(w.finish().unwrap(), 8);
        assert_eq!(&buf[..8], &[0x2f, 0x78, 0, 0, 0, 0, 0, 0]);

        let mut r = WordReader::new(&buf[..8]);
        assert_eq!(r.read_bytes(2).unwrap(), b"/x");
        assert_eq!(r.pos(), 8);
    }

    #[test]
    fn zero_length_bytes_consume_no_words() {
        let mut buf = [0u8; 8];
        let mut w = WordWriter::new(&mut buf);
        w.write_bytes_padded(&[]);
        assert_eq!(w.pos(), 0);

        let mut r = WordReader::new(&buf);
        assert_eq!(r.read_bytes(0).unwrap(), &[] as &[u8]);
        assert_eq!(r.pos(), 0);
    }

    proptest! {
        #[test]
        fn words_roundtrip(words in proptest::collection::vec(any::<u64>(), 0..64)) {
            let mut buf = vec![0u8; words.len() * WORD_SIZE];
            let mut w = WordWriter::new(&mut buf);
            for &word in &words {
                w.write_word(word);
            }
            let len = w.finish().unwrap();
            prop_assert_eq!(len, buf.len());

            let mut r = WordReader::new(&buf);
            for &word in &words {
                prop_assert_eq!(r.read_word().unwrap(), word);
            }
            prop_assert!(r.read_word().is_err());
        }

        #[test]
        fn blobs_advance_by_whole_words(bytes in proptest::collection::vec(any::<u8>(), 0..40)) {
            let mut buf = vec![0u8; 48];
            let mut w = WordWriter::new(&mut buf);
            w.write_bytes_padded(&bytes);
            let len = w.finish().unwrap();
            prop_assert_eq!(len % WORD_SIZE, 0);

            let mut r = WordReader::new(&buf[..len]);
            prop_assert_eq!(r.read_bytes(bytes.len()).unwrap(), bytes.as_slice());
            prop_assert_eq!(r.pos(), len);
        }
    }
}
