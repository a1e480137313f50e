use thiserror::Error;

/// Reasons a decoder rejects a stream as corrupt.
///
/// Every variant indicates a broken encoder or a damaged buffer, never an
/// expected runtime condition; the executor treats each as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Fault {
    /// Argument-type code is not one of the defined `ArgKind`s.
    #[error("unknown argument type code")]
    UnknownArgKind,
    /// Checksum kind is not one of the defined `CsumKind`s.
    #[error("unknown checksum kind")]
    UnknownCsumKind,
    /// Checksum chunk kind is not one of the defined `ChunkKind`s.
    #[error("unknown checksum chunk kind")]
    UnknownChunkKind,
    /// Operand size is outside `{1, 2, 4, 8}`.
    #[error("operand size not in {{1, 2, 4, 8}}")]
    BadOperandSize,
}
