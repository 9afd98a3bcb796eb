//! Error types for ubx.

use thiserror::Error;

/// Error type for ubx operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid snapshot magic bytes
    #[error("invalid magic bytes: expected UBX1 header")]
    InvalidMagic,

    /// Unsupported snapshot format version
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u16),

    /// Snapshot smaller than the fixed header
    #[error("truncated snapshot: expected at least {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Unexpected header-bytes field
    #[error("invalid header size field: {0}")]
    InvalidHeaderSize(u32),

    /// Section directory lies outside the snapshot
    #[error("section directory out of bounds")]
    DirectoryOutOfBounds,

    /// A section's byte range lies outside the snapshot
    #[error("section {0} out of bounds")]
    SectionOutOfBounds(u16),

    /// A section or array is not aligned to its element size
    #[error("section {0} misaligned")]
    SectionMisaligned(u16),

    /// Whole-file CRC32 mismatch
    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,

    /// Per-section CRC32 mismatch
    #[error("section {0} checksum mismatch")]
    SectionChecksumMismatch(u16),

    /// String pool is not valid UTF-8
    #[error("string pool is not valid UTF-8")]
    StringPoolNotUtf8,

    /// A hash table capacity is not a power of two
    #[error("section {0} has a non-power-of-two table capacity")]
    BadTableCapacity(u16),

    /// A structural invariant inside a section does not hold
    #[error("corrupt section {section}: {detail}")]
    CorruptSection { section: u16, detail: &'static str },

    /// Compile produced no surviving rules
    #[error("no rules survived compilation")]
    EmptyRuleSet,

    /// Filter-list input exceeds the configured byte limit
    #[error("list {0} exceeds the input size limit")]
    ListTooLarge(usize),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ubx operations.
pub type Result<T> = std::result::Result<T, Error>;
