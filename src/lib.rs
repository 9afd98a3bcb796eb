//! UBX - a content-filtering decision engine for web browsers.
//!
//! Filter lists in the ABP/uBO dialect are compiled ahead of time into a
//! single immutable binary artifact (the UBX snapshot). At runtime the
//! engine maps that artifact and answers, in microseconds and without
//! allocating on the hot path, whether a network request should be
//! allowed, blocked, redirected to a packaged surrogate, or rewritten
//! with tracking parameters removed. It also resolves the cosmetic
//! payload (hide selectors, procedural programs, scriptlet invocations)
//! for a document.
//!
//! # Features
//!
//! - **Compiled snapshots**: section-directory-addressed binary format,
//!   validated once, queried zero-copy
//! - **Tokenized candidate selection**: rarest-token posting lists plus
//!   suffix-walk domain tables
//! - **uBO precedence parity**: IMPORTANT > exception > block, redirect
//!   directives, `removeparam`, `csp`, header rules, badfilter folding
//! - **Atomic hot reload**: snapshots swap without interrupting matching
//! - **Fail-open**: an internal matcher error yields ALLOW, never an
//!   exception in the host's request path
//!
//! # Quick Start
//!
//! ```ignore
//! use ubx::{compile_filter_lists, Engine};
//!
//! let lists = ["||doubleclick.net^\n@@||news.example.com^$document\n"];
//! let compiled = compile_filter_lists(&lists)?;
//!
//! let engine = Engine::new();
//! engine.init(compiled.snapshot)?;
//!
//! let outcome = engine.match_request(
//!     "https://ads.doubleclick.net/pixel.gif",
//!     "image",
//!     Some("https://news.example.com/"),
//!     7, 0, 1,
//! );
//! assert_eq!(outcome.decision, ubx::Decision::Block);
//! ```
//!
//! # Snapshot lifecycle
//!
//! `compile_filter_lists` is deterministic: the same lists, PSL data and
//! compiler version produce byte-identical snapshots. A snapshot that
//! fails validation is rejected wholesale and the engine keeps serving
//! the previous one.

mod decision;
mod error;
mod request;

pub mod compile;
pub mod hash;
pub mod matcher;
pub mod psl;
pub mod snapshot;
pub mod url;

// Re-export core types
pub use decision::{CosmeticOutcome, Decision, HeaderOutcome, MatchOutcome, Scriptlet};
pub use error::{Error, Result};
pub use request::{PartyMask, RequestContext, SchemeMask, TypeMask};

// Re-export the compiler surface
pub use compile::{
    compile_filter_lists, CompileOptions, CompileOutput, CompileStats, Compiler, ListStats,
};

// Re-export the matcher surface
pub use matcher::{DynamicFilter, Engine, MatrixVerdict, SnapshotInfo};

// Re-export snapshot types for advanced usage
pub use snapshot::{Snapshot, SnapshotWriter};
