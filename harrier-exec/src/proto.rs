//! Control protocol framing.
//!
//! The enclosing harness speaks magic-tagged headers over a pair of
//! pipes: one handshake when the target process starts, then one execute
//! request per program, each followed by one reply. The executor proper
//! only consumes the program blob and produces the reply status; this
//! module owns the byte-level framing on both sides.

use crate::exec::ExecOpts;
use harrier_wire::{EnvFlags, ExecFlags, EXEC_BUFFER_SIZE, IN_MAGIC, OUT_MAGIC};
use std::io::{self, Read, Write};
use thiserror::Error;

/// Framing violation on a control pipe.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The pipe broke or short-read.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A request did not open with the expected magic.
    #[error("bad request magic {found:#x}")]
    BadMagic {
        /// The word found instead.
        found: u64,
    },
    /// A reply did not open with the expected magic.
    #[error("bad reply magic {found:#x}")]
    BadReplyMagic {
        /// The word found instead.
        found: u32,
    },
    /// The advertised program size exceeds the transport limit.
    #[error("program of {size} bytes exceeds the {limit}-byte buffer")]
    ProgTooLarge {
        /// Advertised size.
        size: u64,
        /// The transport limit.
        limit: usize,
    },
}

/// First request on a fresh control pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReq {
    /// Environment flags for the lifetime of the process.
    pub env: EnvFlags,
    /// Process slot of the fuzzer.
    pub pid: u64,
}

impl HandshakeReq {
    /// Parses a handshake request.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        let magic = read_u64(r)?;
        if magic != IN_MAGIC {
            return Err(ProtoError::BadMagic { found: magic });
        }
        Ok(Self {
            env: EnvFlags::from_bits_truncate(read_u64(r)?),
            pid: read_u64(r)?,
        })
    }

    /// Writes a handshake request.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        w.write_all(&IN_MAGIC.to_le_bytes())?;
        w.write_all(&self.env.bits().to_le_bytes())?;
        w.write_all(&self.pid.to_le_bytes())?;
        Ok(())
    }
}

/// Acknowledgement of a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeReply;

impl HandshakeReply {
    /// Parses a handshake reply.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        let magic = read_u32(r)?;
        if magic != OUT_MAGIC {
            return Err(ProtoError::BadReplyMagic { found: magic });
        }
        Ok(Self)
    }

    /// Writes a handshake reply.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        w.write_all(&OUT_MAGIC.to_le_bytes())?;
        Ok(())
    }
}

/// One program execution request, program bytes included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteReq {
    /// Environment flags; repeated from the handshake.
    pub env: EnvFlags,
    /// Execution mode flags.
    pub flags: ExecFlags,
    /// Process slot of the fuzzer.
    pub pid: u64,
    /// Call index to inject a fault into.
    pub fault_call: u64,
    /// Fault site within that call.
    pub fault_nth: u64,
    /// The serialized program.
    pub prog: Vec<u8>,
}

impl ExecuteReq {
    /// Parses an execute request, program blob included.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        let magic = read_u64(r)?;
        if magic != IN_MAGIC {
            return Err(ProtoError::BadMagic { found: magic });
        }
        let env = EnvFlags::from_bits_truncate(read_u64(r)?);
        let flags = ExecFlags::from_bits_truncate(read_u64(r)?);
        let pid = read_u64(r)?;
        let fault_call = read_u64(r)?;
        let fault_nth = read_u64(r)?;
        let prog_size = read_u64(r)?;
        if prog_size > EXEC_BUFFER_SIZE as u64 {
            return Err(ProtoError::ProgTooLarge {
                size: prog_size,
                limit: EXEC_BUFFER_SIZE,
            });
        }
        let mut prog = vec![0; prog_size as usize];
        r.read_exact(&mut prog)?;
        Ok(Self {
            env,
            flags,
            pid,
            fault_call,
            fault_nth,
            prog,
        })
    }

    /// Writes an execute request, program blob included.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        w.write_all(&IN_MAGIC.to_le_bytes())?;
        w.write_all(&self.env.bits().to_le_bytes())?;
        w.write_all(&self.flags.bits().to_le_bytes())?;
        w.write_all(&self.pid.to_le_bytes())?;
        w.write_all(&self.fault_call.to_le_bytes())?;
        w.write_all(&self.fault_nth.to_le_bytes())?;
        w.write_all(&(self.prog.len() as u64).to_le_bytes())?;
        w.write_all(&self.prog)?;
        Ok(())
    }

    /// The executor options this request asks for.
    pub fn exec_opts(&self) -> ExecOpts {
        ExecOpts {
            flags: self.flags,
            pid: self.pid,
            fault_call: self.fault_call,
            fault_nth: self.fault_nth,
        }
    }
}

/// Completion notice of one execute request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteReply {
    /// Executor status; 0 is success.
    pub status: u32,
}

impl ExecuteReply {
    /// Parses an execute reply.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, ProtoError> {
        let magic = read_u32(r)?;
        if magic != OUT_MAGIC {
            return Err(ProtoError::BadReplyMagic { found: magic });
        }
        let _done = read_u32(r)?;
        let status = read_u32(r)?;
        Ok(Self { status })
    }

    /// Writes an execute reply.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), ProtoError> {
        w.write_all(&OUT_MAGIC.to_le_bytes())?;
        w.write_all(&1u32.to_le_bytes())?;
        w.write_all(&self.status.to_le_bytes())?;
        Ok(())
    }
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, ProtoError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, ProtoError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
