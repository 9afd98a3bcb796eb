//! Ahead-of-time filter-list compiler.
//!
//! Turns ABP/uBO filter-list text into a UBX snapshot. Compilation is
//! deterministic: the same lists (in the same order), the same PSL data and
//! the same compiler version produce byte-identical snapshots.

mod build;
mod parse;
mod pattern;

pub use parse::{HeaderSpec, NetworkRule, RemoveparamSpec};

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::psl::DEFAULT_PSL;

/// Why a rule was rejected during compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipReason {
    UnknownOption,
    BadDomainOption,
    EmptyPattern,
    RegexTooLong,
    UnsafeRegex,
    BadRegex,
    TooManyRules,
    UnsupportedSyntax,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::UnknownOption => "unknown-option",
            SkipReason::BadDomainOption => "bad-domain-option",
            SkipReason::EmptyPattern => "empty-pattern",
            SkipReason::RegexTooLong => "regex-too-long",
            SkipReason::UnsafeRegex => "unsafe-regex",
            SkipReason::BadRegex => "bad-regex",
            SkipReason::TooManyRules => "too-many-rules",
            SkipReason::UnsupportedSyntax => "unsupported-syntax",
        }
    }
}

/// Per-list compile statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListStats {
    pub lines: u32,
    pub rules_before: u32,
    pub rules_after: u32,
    pub skipped: BTreeMap<&'static str, u32>,
}

impl ListStats {
    pub(crate) fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason.as_str()).or_insert(0) += 1;
        log::debug!("skipped rule: {}", reason.as_str());
    }
}

/// Aggregate compile statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompileStats {
    pub rules_before: u32,
    pub rules_after: u32,
    pub rules_deduped: u32,
    pub badfilter_rules: u32,
    pub badfiltered_rules: u32,
    pub per_list: Vec<ListStats>,
    pub skipped: BTreeMap<&'static str, u32>,
}

/// A compiled snapshot plus its statistics.
#[derive(Debug)]
pub struct CompileOutput {
    pub snapshot: Vec<u8>,
    pub stats: CompileStats,
}

/// Compiler limits and inputs.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// PSL text serialized into the snapshot. Defaults to a small built-in
    /// list; hosts pass the full publicsuffix.org data.
    pub psl_text: String,
    pub max_rules_per_list: usize,
    pub max_list_bytes: usize,
    pub max_regex_len: usize,
    pub with_crc: bool,
    pub build_id: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            psl_text: DEFAULT_PSL.to_string(),
            max_rules_per_list: 500_000,
            max_list_bytes: 32 * 1024 * 1024,
            max_regex_len: 128,
            with_crc: true,
            build_id: 0,
        }
    }
}

/// Filter-list compiler.
pub struct Compiler {
    options: CompileOptions,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Self { options }
    }

    /// Compile `lists` into a snapshot. Individual bad rules are skipped
    /// and counted; the compile only fails when nothing survives.
    pub fn compile(&self, lists: &[&str]) -> Result<CompileOutput> {
        for (i, list) in lists.iter().enumerate() {
            if list.len() > self.options.max_list_bytes {
                return Err(Error::ListTooLarge(i));
            }
        }
        build::compile(lists, &self.options)
    }
}

/// Compile with default options.
pub fn compile_filter_lists(lists: &[&str]) -> Result<CompileOutput> {
    Compiler::new(CompileOptions::default()).compile(lists)
}
