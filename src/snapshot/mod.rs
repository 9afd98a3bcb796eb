//! UBX snapshot format: serializer and zero-copy loader.
//!
//! A snapshot is a single immutable blob addressed through a section
//! directory. The compiler emits it once; the matcher maps it and reads
//! typed views without copying.
//!
//! # File structure
//!
//! ```text
//! +--------------------+
//! |      HEADER        |  64 bytes (fixed)
//! +--------------------+
//! |  STRPOOL           |
//! |  PSL_SETS          |
//! |  DOMAIN_SETS       |
//! |  TOKEN_DICT        |
//! |  TOKEN_POSTINGS    |
//! |  PATTERN_POOL      |
//! |  RULES (SoA)       |
//! |  ... option tables |
//! |  COSMETIC/...      |
//! +--------------------+
//! |  SECTION DIRECTORY |  24 bytes per entry
//! +--------------------+
//! ```

pub mod format;
mod loader;
pub mod writer;

#[cfg(test)]
mod tests;

pub use format::{RuleAction, RuleFlags, SnapshotFlags, FORMAT_VERSION, MAGIC, NONE_U32};
pub use loader::{PatternView, Snapshot};
pub use writer::{SnapshotInput, SnapshotWriter};
