//! UBX snapshot loader.
//!
//! `Snapshot` owns the raw bytes (heap or memory map) and exposes typed,
//! bounds-checked views over them. Everything is validated once at load;
//! a snapshot that survives [`Snapshot::load`] can be queried without
//! further bounds failures. No section is deserialized into mirror
//! structures; the only load-time allocations are the section table and
//! the precompiled regex values.

use memmap2::Mmap;
use regex::Regex;
use std::fs::File;
use std::path::Path;

use super::format::*;
use crate::error::{Error, Result};
use crate::psl::PslView;

enum SnapshotData {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl SnapshotData {
    #[inline]
    fn bytes(&self) -> &[u8] {
        match self {
            SnapshotData::Owned(v) => v,
            SnapshotData::Mapped(m) => m,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SectionRange {
    off: usize,
    len: usize,
}

/// Absolute offsets of the rule SoA arrays.
#[derive(Debug, Clone, Copy, Default)]
struct RuleArrays {
    action: usize,
    flags: usize,
    type_mask: usize,
    party: usize,
    scheme: usize,
    pattern: usize,
    domain: usize,
    option: usize,
    priority: usize,
    list: usize,
}

/// A pattern pool entry view.
pub struct PatternView<'a> {
    pub ops: &'a [u8],
    pub anchor: u8,
    pub flags: u8,
    pub anchor_hash: u64,
}

/// An immutable, validated UBX snapshot.
pub struct Snapshot {
    data: SnapshotData,
    sections: [SectionRange; section::MAX as usize + 1],
    flags: SnapshotFlags,
    build_id: u32,
    rule_count: u32,
    rule_arrays: RuleArrays,
    pattern_count: u32,
    /// Precompiled regex patterns, indexed by pattern id.
    regexes: Vec<Option<Regex>>,
    /// Precompiled removeparam regexes, indexed by spec id.
    removeparam_regexes: Vec<Option<Regex>>,
    /// Precompiled header-value regexes, indexed by spec id.
    header_regexes: Vec<Option<Regex>>,
}

impl Snapshot {
    /// Validate and load a snapshot from owned bytes.
    pub fn load(bytes: Vec<u8>) -> Result<Self> {
        Self::from_data(SnapshotData::Owned(bytes))
    }

    /// Memory-map and load a snapshot file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_data(SnapshotData::Mapped(mmap))
    }

    fn from_data(data: SnapshotData) -> Result<Self> {
        let mut snapshot = Self {
            data,
            sections: [SectionRange::default(); section::MAX as usize + 1],
            flags: SnapshotFlags::empty(),
            build_id: 0,
            rule_count: 0,
            rule_arrays: RuleArrays::default(),
            pattern_count: 0,
            regexes: Vec::new(),
            removeparam_regexes: Vec::new(),
            header_regexes: Vec::new(),
        };
        snapshot.validate_layout()?;
        snapshot.validate_sections()?;
        snapshot.compile_regexes();
        Ok(snapshot)
    }

    /// Total snapshot size in bytes.
    pub fn size(&self) -> usize {
        self.data.bytes().len()
    }

    pub fn build_id(&self) -> u32 {
        self.build_id
    }

    pub fn rule_count(&self) -> u32 {
        self.rule_count
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.data.bytes()
    }

    #[inline]
    fn section(&self, id: u16) -> &[u8] {
        let range = self.sections[id as usize];
        &self.bytes()[range.off..range.off + range.len]
    }

    // ---- header and directory ------------------------------------------

    fn validate_layout(&mut self) -> Result<()> {
        let bytes = self.bytes();
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Truncated {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }
        if bytes[OFF_MAGIC..OFF_MAGIC + 4] != MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = read_u16(bytes, OFF_VERSION);
        if version == 0 || version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let header_bytes = read_u32(bytes, OFF_HEADER_BYTES);
        if header_bytes as usize != HEADER_SIZE {
            return Err(Error::InvalidHeaderSize(header_bytes));
        }

        let section_count = read_u32(bytes, OFF_SECTION_COUNT) as usize;
        let dir_offset = read_u32(bytes, OFF_DIR_OFFSET) as usize;
        let dir_bytes = read_u32(bytes, OFF_DIR_BYTES) as usize;
        if dir_bytes != section_count * DIR_ENTRY_SIZE
            || dir_offset < HEADER_SIZE
            || dir_offset.checked_add(dir_bytes).map_or(true, |end| end > bytes.len())
        {
            return Err(Error::DirectoryOutOfBounds);
        }

        let flags = SnapshotFlags::from_bits_truncate(read_u16(bytes, OFF_FLAGS));
        if flags.contains(SnapshotFlags::HAS_CRC32) {
            let stored = read_u32(bytes, OFF_CRC32);
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&bytes[..OFF_CRC32]);
            hasher.update(&[0u8; 4]);
            hasher.update(&bytes[OFF_CRC32 + 4..]);
            if hasher.finalize() != stored {
                return Err(Error::ChecksumMismatch);
            }
        }

        let mut sections = [SectionRange::default(); section::MAX as usize + 1];
        let mut seen = [false; section::MAX as usize + 1];
        for i in 0..section_count {
            let at = dir_offset + i * DIR_ENTRY_SIZE;
            let id = read_u16(bytes, at);
            let off = read_u32(bytes, at + 4) as usize;
            let len = read_u32(bytes, at + 8) as usize;
            let crc = read_u32(bytes, at + 16);

            if off.checked_add(len).map_or(true, |end| end > bytes.len()) {
                return Err(Error::SectionOutOfBounds(id));
            }
            if flags.contains(SnapshotFlags::HAS_CRC32)
                && crc32fast::hash(&bytes[off..off + len]) != crc
            {
                return Err(Error::SectionChecksumMismatch(id));
            }
            // Unknown sections are ignored for forward compatibility.
            if id == 0 || id > section::MAX {
                continue;
            }
            if seen[id as usize] {
                return Err(Error::CorruptSection {
                    section: id,
                    detail: "duplicate section id",
                });
            }
            seen[id as usize] = true;
            sections[id as usize] = SectionRange { off, len };
        }

        let build_id = read_u32(bytes, OFF_BUILD_ID);
        self.sections = sections;
        self.flags = flags;
        self.build_id = build_id;
        Ok(())
    }

    // ---- per-section validation ----------------------------------------

    fn validate_sections(&mut self) -> Result<()> {
        std::str::from_utf8(self.section(section::STRPOOL))
            .map_err(|_| Error::StringPoolNotUtf8)?;

        self.validate_psl()?;
        self.validate_rules_header()?;
        self.validate_pattern_pool()?;
        self.validate_rule_arrays()?;
        self.validate_domain_sets()?;
        self.validate_token_dict()?;
        self.validate_host_keyed_sections()?;
        Ok(())
    }

    fn strpool_len(&self) -> usize {
        self.sections[section::STRPOOL as usize].len
    }

    fn validate_psl(&self) -> Result<()> {
        let id = section::PSL_SETS;
        let s = self.section(id);
        if s.is_empty() {
            return Ok(());
        }
        if s.len() < PSL_HEADER_SIZE {
            return Err(Error::SectionOutOfBounds(id));
        }
        let caps = [read_u32(s, 0), read_u32(s, 4), read_u32(s, 8)];
        let mut expect = PSL_HEADER_SIZE;
        for cap in caps {
            if cap != 0 && !cap.is_power_of_two() {
                return Err(Error::BadTableCapacity(id));
            }
            expect += cap as usize * 8;
        }
        if s.len() != expect {
            return Err(Error::SectionOutOfBounds(id));
        }
        Ok(())
    }

    fn validate_rules_header(&mut self) -> Result<()> {
        let id = section::RULES;
        let range = self.sections[id as usize];
        let s = self.section(id);
        if s.len() < RULES_HEADER_SIZE {
            return Err(Error::SectionOutOfBounds(id));
        }
        let n = read_u32(s, 0) as usize;
        let rel: Vec<usize> = (0..10).map(|i| read_u32(s, 4 + i * 4) as usize).collect();
        let sizes = [1usize, 4, 2, 1, 1, 4, 4, 4, 2, 2];
        for (i, (&off, &size)) in rel.iter().zip(&sizes).enumerate() {
            if off < RULES_HEADER_SIZE
                || off % size != 0
                || off.checked_add(n * size).map_or(true, |end| end > s.len())
            {
                return Err(if off % size.max(1) != 0 {
                    Error::SectionMisaligned(id)
                } else {
                    Error::CorruptSection {
                        section: id,
                        detail: match i {
                            0 => "action array out of bounds",
                            _ => "rule array out of bounds",
                        },
                    }
                });
            }
        }
        self.rule_count = n as u32;
        self.rule_arrays = RuleArrays {
            action: range.off + rel[0],
            flags: range.off + rel[1],
            type_mask: range.off + rel[2],
            party: range.off + rel[3],
            scheme: range.off + rel[4],
            pattern: range.off + rel[5],
            domain: range.off + rel[6],
            option: range.off + rel[7],
            priority: range.off + rel[8],
            list: range.off + rel[9],
        };
        Ok(())
    }

    fn validate_pattern_pool(&mut self) -> Result<()> {
        let id = section::PATTERN_POOL;
        let s = self.section(id);
        if s.is_empty() {
            self.pattern_count = 0;
            return Ok(());
        }
        if s.len() < PATTERN_HEADER_SIZE {
            return Err(Error::SectionOutOfBounds(id));
        }
        let count = read_u32(s, 0) as usize;
        let ops_base = read_u32(s, 4) as usize;
        let entries_end = PATTERN_HEADER_SIZE + count * PATTERN_ENTRY_SIZE;
        if ops_base != entries_end || ops_base > s.len() {
            return Err(Error::CorruptSection {
                section: id,
                detail: "pattern entries out of bounds",
            });
        }
        let ops_blob_len = s.len() - ops_base;
        for i in 0..count {
            let at = PATTERN_HEADER_SIZE + i * PATTERN_ENTRY_SIZE;
            let ops_off = read_u32(s, at) as usize;
            let ops_len = read_u16(s, at + 4) as usize;
            let anchor = s[at + 6];
            let anchor_hash = read_u64(s, at + 8);
            if ops_off.checked_add(ops_len).map_or(true, |end| end > ops_blob_len) {
                return Err(Error::CorruptSection {
                    section: id,
                    detail: "pattern ops out of bounds",
                });
            }
            let ops = &s[ops_base + ops_off..ops_base + ops_off + ops_len];
            if !validate_ops(ops, anchor, anchor_hash, self.strpool_len()) {
                return Err(Error::CorruptSection {
                    section: id,
                    detail: "malformed pattern program",
                });
            }
        }
        self.pattern_count = count as u32;
        Ok(())
    }

    fn validate_rule_arrays(&self) -> Result<()> {
        let id = section::RULES;
        let constraints_len = self.sections[section::DOMAIN_CONSTRAINT_POOL as usize].len;
        let counts = [
            self.table_count(section::REDIRECT_RESOURCES),
            self.table_count(section::REMOVEPARAM_SPECS),
            self.table_count(section::CSP_SPECS),
            self.table_count(section::HEADER_SPECS),
            self.table_count(section::RESPONSEHEADER_RULES),
        ];
        for rid in 0..self.rule_count {
            let action = RuleAction::from_u8(self.rule_action_raw(rid)).ok_or(
                Error::CorruptSection {
                    section: id,
                    detail: "unknown rule action",
                },
            )?;
            let pattern_id = self.rule_pattern_id(rid);
            if pattern_id != NONE_U32 && pattern_id >= self.pattern_count {
                return Err(Error::CorruptSection {
                    section: id,
                    detail: "pattern id out of range",
                });
            }
            let domain_off = self.rule_domain_offset(rid);
            if domain_off != NONE_U32 && !self.constraint_fits(domain_off as usize, constraints_len)
            {
                return Err(Error::CorruptSection {
                    section: id,
                    detail: "domain constraint out of range",
                });
            }
            let option = self.rule_option_id(rid);
            if option != NONE_U32 {
                let flags = self.rule_flags(rid);
                let limit = match action {
                    RuleAction::RedirectDirective => counts[0],
                    RuleAction::Removeparam => counts[1],
                    RuleAction::CspInject => counts[2],
                    RuleAction::HeaderBlock | RuleAction::HeaderAllow => counts[3],
                    RuleAction::ResponseHeaderRemove => counts[4],
                    // Exception rules borrow the table named by their flag.
                    RuleAction::Allow if flags.contains(RuleFlags::REMOVEPARAM_EXCEPTION) => {
                        counts[1]
                    }
                    RuleAction::Allow if flags.contains(RuleFlags::CSP_EXCEPTION) => counts[2],
                    RuleAction::Allow if flags.contains(RuleFlags::RESPONSEHEADER_EXCEPTION) => {
                        counts[4]
                    }
                    RuleAction::Allow | RuleAction::Block => 0,
                };
                if option as usize >= limit {
                    return Err(Error::CorruptSection {
                        section: id,
                        detail: "option id out of range",
                    });
                }
            }
        }
        Ok(())
    }

    fn constraint_fits(&self, off: usize, pool_len: usize) -> bool {
        if off + 4 > pool_len {
            return false;
        }
        let s = self.section(section::DOMAIN_CONSTRAINT_POOL);
        let include = read_u16(s, off) as usize;
        let exclude = read_u16(s, off + 2) as usize;
        off + 4 + (include + exclude) * 8 <= pool_len
    }

    fn validate_domain_sets(&self) -> Result<()> {
        let id = section::DOMAIN_SETS;
        let s = self.section(id);
        if s.is_empty() {
            return Ok(());
        }
        if s.len() < DOMAIN_SETS_HEADER_SIZE {
            return Err(Error::SectionOutOfBounds(id));
        }
        let allow_cap = read_u32(s, 0) as usize;
        let block_cap = read_u32(s, 4) as usize;
        for cap in [allow_cap, block_cap] {
            if cap != 0 && !cap.is_power_of_two() {
                return Err(Error::BadTableCapacity(id));
            }
        }
        let expect = DOMAIN_SETS_HEADER_SIZE + (allow_cap + block_cap) * DOMAIN_ENTRY_SIZE;
        if s.len() != expect {
            return Err(Error::SectionOutOfBounds(id));
        }
        for i in 0..allow_cap + block_cap {
            let at = DOMAIN_SETS_HEADER_SIZE + i * DOMAIN_ENTRY_SIZE;
            if read_u64(s, at) != 0 {
                self.validate_postings(read_u32(s, at + 8), read_u32(s, at + 12))
                    .map_err(|_| Error::CorruptSection {
                        section: id,
                        detail: "bad posting list",
                    })?;
            }
        }
        Ok(())
    }

    fn validate_token_dict(&self) -> Result<()> {
        let id = section::TOKEN_DICT;
        let s = self.section(id);
        if s.is_empty() {
            return Ok(());
        }
        if s.len() < TOKEN_DICT_HEADER_SIZE {
            return Err(Error::SectionOutOfBounds(id));
        }
        let capacity = read_u32(s, 0) as usize;
        if capacity != 0 && !capacity.is_power_of_two() {
            return Err(Error::BadTableCapacity(id));
        }
        if s.len() != TOKEN_DICT_HEADER_SIZE + capacity * TOKEN_ENTRY_SIZE {
            return Err(Error::SectionOutOfBounds(id));
        }
        for i in 0..capacity {
            let at = TOKEN_DICT_HEADER_SIZE + i * TOKEN_ENTRY_SIZE;
            if read_u32(s, at) != 0 {
                self.validate_postings(read_u32(s, at + 4), read_u32(s, at + 8))
                    .map_err(|_| Error::CorruptSection {
                        section: id,
                        detail: "bad posting list",
                    })?;
            }
        }
        let (fallback_off, fallback_count) = (read_u32(s, 4), read_u32(s, 8));
        self.validate_postings(fallback_off, fallback_count)
            .map_err(|_| Error::CorruptSection {
                section: id,
                detail: "bad fallback posting list",
            })
    }

    fn validate_postings(&self, off: u32, count: u32) -> std::result::Result<(), ()> {
        let blob = self.section(section::TOKEN_POSTINGS);
        let mut pos = off as usize;
        let mut prev: u32 = 0;
        for i in 0..count {
            let delta = read_uleb128(blob, &mut pos).ok_or(())?;
            let id = if i == 0 {
                delta
            } else {
                prev.checked_add(delta).ok_or(())?
            };
            if i > 0 && delta == 0 {
                return Err(());
            }
            if id >= self.rule_count {
                return Err(());
            }
            prev = id;
        }
        Ok(())
    }

    fn validate_host_keyed_sections(&self) -> Result<()> {
        for &(id, entry_size) in &[
            (section::COSMETIC_RULES, COSMETIC_ENTRY_SIZE),
            (section::PROCEDURAL_RULES, COSMETIC_ENTRY_SIZE),
            (section::SCRIPTLET_RULES, SCRIPTLET_ENTRY_SIZE),
        ] {
            let s = self.section(id);
            if s.is_empty() {
                continue;
            }
            if s.len() < 16 {
                return Err(Error::SectionOutOfBounds(id));
            }
            let (generic_count, entry_count, table_cap) = if id == section::COSMETIC_RULES {
                (
                    read_u32(s, 0) as usize,
                    read_u32(s, 4) as usize,
                    read_u32(s, 8) as usize,
                )
            } else {
                (0, read_u32(s, 0) as usize, read_u32(s, 4) as usize)
            };
            if table_cap != 0 && !table_cap.is_power_of_two() {
                return Err(Error::BadTableCapacity(id));
            }
            let entries_off = 16 + generic_count * STRREF_SIZE;
            let table_off = align8_usize(entries_off + entry_count * entry_size);
            if s.len() != table_off + table_cap * HOSTKEY_ENTRY_SIZE {
                return Err(Error::SectionOutOfBounds(id));
            }
            for i in 0..table_cap {
                let at = table_off + i * HOSTKEY_ENTRY_SIZE;
                if read_u64(s, at) != 0 {
                    let first = read_u32(s, at + 8) as usize;
                    let count = read_u32(s, at + 12) as usize;
                    if first + count > entry_count {
                        return Err(Error::CorruptSection {
                            section: id,
                            detail: "host range out of bounds",
                        });
                    }
                }
            }
        }

        // Flat record tables with a leading count.
        for &(id, entry_size) in &[
            (section::REDIRECT_RESOURCES, REDIRECT_ENTRY_SIZE),
            (section::REMOVEPARAM_SPECS, REMOVEPARAM_ENTRY_SIZE),
            (section::CSP_SPECS, STRREF_SIZE),
            (section::HEADER_SPECS, HEADER_SPEC_ENTRY_SIZE),
            (section::RESPONSEHEADER_RULES, STRREF_SIZE),
        ] {
            let s = self.section(id);
            if s.is_empty() {
                continue;
            }
            if s.len() < 4 || s.len() != 4 + read_u32(s, 0) as usize * entry_size {
                return Err(Error::SectionOutOfBounds(id));
            }
        }
        Ok(())
    }

    fn compile_regexes(&mut self) {
        let mut regexes = vec![None; self.pattern_count as usize];
        for (i, regex) in regexes.iter_mut().enumerate() {
            let view = self.pattern(i as u32);
            if view.anchor != anchor::REGEX {
                continue;
            }
            let off = read_u32(view.ops, 0);
            let len = read_u32(view.ops, 4);
            if let Some(source) = self.str_at((off, len)) {
                let case_insensitive = view.flags & PATTERN_MATCH_CASE == 0;
                *regex = regex::RegexBuilder::new(source)
                    .case_insensitive(case_insensitive)
                    .build()
                    .map_err(|e| log::warn!("dropping unparsable regex pattern: {}", e))
                    .ok();
            }
        }
        self.regexes = regexes;

        let count = self.table_count(section::REMOVEPARAM_SPECS);
        let mut rp = vec![None; count];
        for (i, regex) in rp.iter_mut().enumerate() {
            if let Some((kind, spec)) = self.removeparam_spec(i as u32) {
                if kind == removeparam::REGEX {
                    *regex = Regex::new(spec)
                        .map_err(|e| log::warn!("dropping unparsable removeparam regex: {}", e))
                        .ok();
                }
            }
        }
        self.removeparam_regexes = rp;

        let count = self.table_count(section::HEADER_SPECS);
        let mut hr = vec![None; count];
        for (i, regex) in hr.iter_mut().enumerate() {
            if let Some((_, value, op)) = self.header_spec(i as u32) {
                if op == headerop::REGEX {
                    *regex = Regex::new(value)
                        .map_err(|e| log::warn!("dropping unparsable header regex: {}", e))
                        .ok();
                }
            }
        }
        self.header_regexes = hr;
    }

    // ---- accessors ------------------------------------------------------

    /// Resolve a string-pool reference. `None` on a stale or misaligned ref.
    #[inline]
    pub fn str_at(&self, r: (u32, u32)) -> Option<&str> {
        let pool = self.section(section::STRPOOL);
        let start = r.0 as usize;
        let end = start.checked_add(r.1 as usize)?;
        std::str::from_utf8(pool.get(start..end)?).ok()
    }

    pub fn psl(&self) -> PslView<'_> {
        let s = self.section(section::PSL_SETS);
        if s.len() < PSL_HEADER_SIZE {
            return PslView {
                exact: &[],
                wildcard: &[],
                exception: &[],
            };
        }
        let exact_len = read_u32(s, 0) as usize * 8;
        let wildcard_len = read_u32(s, 4) as usize * 8;
        let exception_len = read_u32(s, 8) as usize * 8;
        let exact_off = PSL_HEADER_SIZE;
        let wildcard_off = exact_off + exact_len;
        let exception_off = wildcard_off + wildcard_len;
        PslView {
            exact: &s[exact_off..wildcard_off],
            wildcard: &s[wildcard_off..exception_off],
            exception: &s[exception_off..exception_off + exception_len],
        }
    }

    /// Probe a domain table. Returns the postings (offset, count) on a hit.
    pub fn domain_lookup(&self, allow: bool, hash: u64) -> Option<(u32, u32)> {
        let s = self.section(section::DOMAIN_SETS);
        if s.len() < DOMAIN_SETS_HEADER_SIZE {
            return None;
        }
        let allow_cap = read_u32(s, 0) as usize;
        let block_cap = read_u32(s, 4) as usize;
        let (base, capacity) = if allow {
            (DOMAIN_SETS_HEADER_SIZE, allow_cap)
        } else {
            (DOMAIN_SETS_HEADER_SIZE + allow_cap * DOMAIN_ENTRY_SIZE, block_cap)
        };
        if capacity == 0 {
            return None;
        }
        let mask = capacity - 1;
        let mut idx = hash as usize & mask;
        for _ in 0..capacity {
            let at = base + idx * DOMAIN_ENTRY_SIZE;
            let slot = read_u64(s, at);
            if slot == 0 {
                return None;
            }
            if slot == hash {
                return Some((read_u32(s, at + 8), read_u32(s, at + 12)));
            }
            idx = (idx + 1) & mask;
        }
        None
    }

    /// Probe the token dictionary.
    pub fn token_lookup(&self, hash: u32) -> Option<(u32, u32)> {
        let s = self.section(section::TOKEN_DICT);
        if s.len() < TOKEN_DICT_HEADER_SIZE {
            return None;
        }
        let capacity = read_u32(s, 0) as usize;
        if capacity == 0 {
            return None;
        }
        let mask = capacity - 1;
        let mut idx = hash as usize & mask;
        for _ in 0..capacity {
            let at = TOKEN_DICT_HEADER_SIZE + idx * TOKEN_ENTRY_SIZE;
            let slot = read_u32(s, at);
            if slot == 0 {
                return None;
            }
            if slot == hash {
                return Some((read_u32(s, at + 4), read_u32(s, at + 8)));
            }
            idx = (idx + 1) & mask;
        }
        None
    }

    /// The fallback posting list (offset, count).
    pub fn fallback_postings(&self) -> (u32, u32) {
        let s = self.section(section::TOKEN_DICT);
        if s.len() < TOKEN_DICT_HEADER_SIZE {
            return (0, 0);
        }
        (read_u32(s, 4), read_u32(s, 8))
    }

    /// Decode a posting list into `out` (appending).
    pub fn decode_postings(&self, off: u32, count: u32, out: &mut Vec<u32>) {
        let blob = self.section(section::TOKEN_POSTINGS);
        let mut pos = off as usize;
        let mut prev = 0u32;
        for i in 0..count {
            match read_uleb128(blob, &mut pos) {
                Some(delta) => {
                    let id = if i == 0 { delta } else { prev.wrapping_add(delta) };
                    out.push(id);
                    prev = id;
                }
                None => return,
            }
        }
    }

    // Rule SoA accessors. Array bounds were checked at load.

    #[inline]
    fn rule_action_raw(&self, id: u32) -> u8 {
        self.bytes()[self.rule_arrays.action + id as usize]
    }

    #[inline]
    pub fn rule_action(&self, id: u32) -> RuleAction {
        RuleAction::from_u8(self.rule_action_raw(id)).unwrap_or(RuleAction::Block)
    }

    #[inline]
    pub fn rule_flags(&self, id: u32) -> RuleFlags {
        RuleFlags::from_bits_truncate(read_u32(self.bytes(), self.rule_arrays.flags + 4 * id as usize))
    }

    #[inline]
    pub fn rule_type_mask(&self, id: u32) -> u16 {
        read_u16(self.bytes(), self.rule_arrays.type_mask + 2 * id as usize)
    }

    #[inline]
    pub fn rule_party_mask(&self, id: u32) -> u8 {
        self.bytes()[self.rule_arrays.party + id as usize]
    }

    #[inline]
    pub fn rule_scheme_mask(&self, id: u32) -> u8 {
        self.bytes()[self.rule_arrays.scheme + id as usize]
    }

    #[inline]
    pub fn rule_pattern_id(&self, id: u32) -> u32 {
        read_u32(self.bytes(), self.rule_arrays.pattern + 4 * id as usize)
    }

    #[inline]
    pub fn rule_domain_offset(&self, id: u32) -> u32 {
        read_u32(self.bytes(), self.rule_arrays.domain + 4 * id as usize)
    }

    #[inline]
    pub fn rule_option_id(&self, id: u32) -> u32 {
        read_u32(self.bytes(), self.rule_arrays.option + 4 * id as usize)
    }

    #[inline]
    pub fn rule_priority(&self, id: u32) -> i16 {
        read_i16(self.bytes(), self.rule_arrays.priority + 2 * id as usize)
    }

    #[inline]
    pub fn rule_list_id(&self, id: u32) -> u16 {
        read_u16(self.bytes(), self.rule_arrays.list + 2 * id as usize)
    }

    /// View of a pattern pool entry. `id` must be a validated pattern id.
    pub fn pattern(&self, id: u32) -> PatternView<'_> {
        let s = self.section(section::PATTERN_POOL);
        let at = PATTERN_HEADER_SIZE + id as usize * PATTERN_ENTRY_SIZE;
        let ops_base = read_u32(s, 4) as usize;
        let ops_off = read_u32(s, at) as usize;
        let ops_len = read_u16(s, at + 4) as usize;
        PatternView {
            ops: &s[ops_base + ops_off..ops_base + ops_off + ops_len],
            anchor: s[at + 6],
            flags: s[at + 7],
            anchor_hash: read_u64(s, at + 8),
        }
    }

    /// Precompiled regex for a regex-anchored pattern.
    pub fn pattern_regex(&self, id: u32) -> Option<&Regex> {
        self.regexes.get(id as usize)?.as_ref()
    }

    /// Check a rule's `$domain=` constraint against a document suffix walk.
    ///
    /// With includes present, at least one include hash must appear in the
    /// walk; no exclude hash may appear.
    pub fn domain_constraint_ok(&self, offset: u32, doc_suffixes: &[u64]) -> bool {
        if offset == NONE_U32 {
            return true;
        }
        let s = self.section(section::DOMAIN_CONSTRAINT_POOL);
        let at = offset as usize;
        let include = read_u16(s, at) as usize;
        let exclude = read_u16(s, at + 2) as usize;
        let hashes = at + 4;

        for i in 0..exclude {
            let hash = read_u64(s, hashes + (include + i) * 8);
            if doc_suffixes.contains(&hash) {
                return false;
            }
        }
        if include == 0 {
            return true;
        }
        for i in 0..include {
            let hash = read_u64(s, hashes + i * 8);
            if doc_suffixes.contains(&hash) {
                return true;
            }
        }
        false
    }

    fn table_count(&self, id: u16) -> usize {
        let s = self.section(id);
        if s.len() < 4 {
            0
        } else {
            read_u32(s, 0) as usize
        }
    }

    /// Redirect resource catalog entry: (token, path, mime kind).
    pub fn redirect_resource(&self, idx: u32) -> Option<(&str, &str, u8)> {
        let s = self.section(section::REDIRECT_RESOURCES);
        if idx as usize >= self.table_count(section::REDIRECT_RESOURCES) {
            return None;
        }
        let at = 4 + idx as usize * REDIRECT_ENTRY_SIZE;
        let token = self.str_at((read_u32(s, at), read_u32(s, at + 4)))?;
        let path = self.str_at((read_u32(s, at + 8), read_u32(s, at + 12)))?;
        Some((token, path, s[at + 16]))
    }

    pub fn removeparam_spec(&self, idx: u32) -> Option<(u8, &str)> {
        let s = self.section(section::REMOVEPARAM_SPECS);
        if idx as usize >= self.table_count(section::REMOVEPARAM_SPECS) {
            return None;
        }
        let at = 4 + idx as usize * REMOVEPARAM_ENTRY_SIZE;
        let spec = self.str_at((read_u32(s, at + 4), read_u32(s, at + 8)))?;
        Some((s[at], spec))
    }

    pub fn removeparam_regex(&self, idx: u32) -> Option<&Regex> {
        self.removeparam_regexes.get(idx as usize)?.as_ref()
    }

    pub fn csp_spec(&self, idx: u32) -> Option<&str> {
        let s = self.section(section::CSP_SPECS);
        if idx as usize >= self.table_count(section::CSP_SPECS) {
            return None;
        }
        let at = 4 + idx as usize * STRREF_SIZE;
        self.str_at((read_u32(s, at), read_u32(s, at + 4)))
    }

    pub fn header_spec(&self, idx: u32) -> Option<(&str, &str, u8)> {
        let s = self.section(section::HEADER_SPECS);
        if idx as usize >= self.table_count(section::HEADER_SPECS) {
            return None;
        }
        let at = 4 + idx as usize * HEADER_SPEC_ENTRY_SIZE;
        let name = self.str_at((read_u32(s, at), read_u32(s, at + 4)))?;
        let value = self.str_at((read_u32(s, at + 8), read_u32(s, at + 12)))?;
        Some((name, value, s[at + 16]))
    }

    pub fn header_regex(&self, idx: u32) -> Option<&Regex> {
        self.header_regexes.get(idx as usize)?.as_ref()
    }

    pub fn responseheader_name(&self, idx: u32) -> Option<&str> {
        let s = self.section(section::RESPONSEHEADER_RULES);
        if idx as usize >= self.table_count(section::RESPONSEHEADER_RULES) {
            return None;
        }
        let at = 4 + idx as usize * STRREF_SIZE;
        self.str_at((read_u32(s, at), read_u32(s, at + 4)))
    }

    // Host-keyed cosmetic sections.

    pub fn cosmetic_generic_count(&self) -> u32 {
        let s = self.section(section::COSMETIC_RULES);
        if s.len() < 16 {
            0
        } else {
            read_u32(s, 0)
        }
    }

    pub fn cosmetic_generic(&self, idx: u32) -> Option<&str> {
        let s = self.section(section::COSMETIC_RULES);
        let at = 16 + idx as usize * STRREF_SIZE;
        self.str_at((read_u32(s, at), read_u32(s, at + 4)))
    }

    pub fn cosmetic_host_range(&self, hash: u64) -> Option<(u32, u32)> {
        let s = self.section(section::COSMETIC_RULES);
        if s.len() < 16 {
            return None;
        }
        let generic_count = read_u32(s, 0) as usize;
        let entry_count = read_u32(s, 4) as usize;
        let table_cap = read_u32(s, 8) as usize;
        let table_off = align8_usize(16 + generic_count * STRREF_SIZE + entry_count * COSMETIC_ENTRY_SIZE);
        hostkey_lookup(s, table_off, table_cap, hash)
    }

    pub fn cosmetic_entry(&self, idx: u32) -> Option<(&str, u32)> {
        let s = self.section(section::COSMETIC_RULES);
        let generic_count = read_u32(s, 0) as usize;
        let at = 16 + generic_count * STRREF_SIZE + idx as usize * COSMETIC_ENTRY_SIZE;
        let selector = self.str_at((read_u32(s, at), read_u32(s, at + 4)))?;
        Some((selector, read_u32(s, at + 8)))
    }

    pub fn procedural_host_range(&self, hash: u64) -> Option<(u32, u32)> {
        let s = self.section(section::PROCEDURAL_RULES);
        if s.len() < 16 {
            return None;
        }
        let entry_count = read_u32(s, 0) as usize;
        let table_cap = read_u32(s, 4) as usize;
        let table_off = align8_usize(16 + entry_count * COSMETIC_ENTRY_SIZE);
        hostkey_lookup(s, table_off, table_cap, hash)
    }

    pub fn procedural_entry(&self, idx: u32) -> Option<(&str, u32)> {
        let s = self.section(section::PROCEDURAL_RULES);
        let at = 16 + idx as usize * COSMETIC_ENTRY_SIZE;
        let body = self.str_at((read_u32(s, at), read_u32(s, at + 4)))?;
        Some((body, read_u32(s, at + 8)))
    }

    pub fn scriptlet_global_disable(&self) -> bool {
        let s = self.section(section::SCRIPTLET_RULES);
        s.len() >= 16 && read_u32(s, 8) & SCRIPTLET_GLOBAL_DISABLE != 0
    }

    pub fn scriptlet_host_range(&self, hash: u64) -> Option<(u32, u32)> {
        let s = self.section(section::SCRIPTLET_RULES);
        if s.len() < 16 {
            return None;
        }
        let entry_count = read_u32(s, 0) as usize;
        let table_cap = read_u32(s, 4) as usize;
        let table_off = align8_usize(16 + entry_count * SCRIPTLET_ENTRY_SIZE);
        hostkey_lookup(s, table_off, table_cap, hash)
    }

    pub fn scriptlet_entry(&self, idx: u32) -> Option<(&str, &str, u32)> {
        let s = self.section(section::SCRIPTLET_RULES);
        let at = 16 + idx as usize * SCRIPTLET_ENTRY_SIZE;
        let name = self.str_at((read_u32(s, at), read_u32(s, at + 4)))?;
        let args = self.str_at((read_u32(s, at + 8), read_u32(s, at + 12)))?;
        Some((name, args, read_u32(s, at + 16)))
    }
}

#[inline]
fn align8_usize(v: usize) -> usize {
    (v + 7) & !7
}

fn hostkey_lookup(s: &[u8], table_off: usize, capacity: usize, hash: u64) -> Option<(u32, u32)> {
    if capacity == 0 {
        return None;
    }
    let mask = capacity - 1;
    let mut idx = hash as usize & mask;
    for _ in 0..capacity {
        let at = table_off + idx * HOSTKEY_ENTRY_SIZE;
        let slot = read_u64(s, at);
        if slot == 0 {
            return None;
        }
        if slot == hash {
            return Some((read_u32(s, at + 8), read_u32(s, at + 12)));
        }
        idx = (idx + 1) & mask;
    }
    None
}

/// Structural check of one pattern program against the string pool.
fn validate_ops(ops: &[u8], anchor_kind: u8, anchor_hash: u64, strpool_len: usize) -> bool {
    if anchor_kind == anchor::REGEX {
        if ops.len() != 8 {
            return false;
        }
        let off = read_u32(ops, 0) as usize;
        let len = read_u32(ops, 4) as usize;
        return off.checked_add(len).map_or(false, |end| end <= strpool_len);
    }

    let mut pos = 0;
    let mut saw_done = false;
    while pos < ops.len() {
        match ops[pos] {
            op::DONE => {
                saw_done = true;
                pos += 1;
                if pos != ops.len() {
                    return false;
                }
            }
            op::FIND_LIT => {
                if pos + 9 > ops.len() {
                    return false;
                }
                let off = read_u32(ops, pos + 1) as usize;
                let len = read_u32(ops, pos + 5) as usize;
                if len == 0 || off.checked_add(len).map_or(true, |end| end > strpool_len) {
                    return false;
                }
                pos += 9;
            }
            op::ASSERT_START | op::ASSERT_END | op::ASSERT_BOUNDARY | op::SKIP_ANY => {
                pos += 1;
            }
            op::HOST_ANCHOR => {
                if anchor_hash == 0 {
                    return false;
                }
                pos += 1;
            }
            _ => return false,
        }
    }
    saw_done
}

#[cfg(test)]
mod loader_tests {
    use super::*;

    #[test]
    fn test_reject_garbage() {
        assert!(matches!(
            Snapshot::load(vec![0u8; 10]),
            Err(Error::Truncated { .. })
        ));
        assert!(matches!(
            Snapshot::load(vec![0u8; 128]),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn test_validate_ops() {
        // DONE only
        assert!(validate_ops(&[op::DONE], anchor::NONE, 0, 0));
        // FIND_LIT within pool
        let mut ops = vec![op::FIND_LIT];
        ops.extend_from_slice(&0u32.to_le_bytes());
        ops.extend_from_slice(&3u32.to_le_bytes());
        ops.push(op::DONE);
        assert!(validate_ops(&ops, anchor::NONE, 0, 3));
        assert!(!validate_ops(&ops, anchor::NONE, 0, 2));
        // HOST_ANCHOR requires a nonzero hash
        assert!(!validate_ops(&[op::HOST_ANCHOR, op::DONE], anchor::HOST, 0, 0));
        assert!(validate_ops(&[op::HOST_ANCHOR, op::DONE], anchor::HOST, 7, 0));
        // Trailing bytes after DONE are rejected
        assert!(!validate_ops(&[op::DONE, 0], anchor::NONE, 0, 0));
        // Unknown opcode
        assert!(!validate_ops(&[9, op::DONE], anchor::NONE, 0, 0));
    }
}
