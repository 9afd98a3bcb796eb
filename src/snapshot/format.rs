//! UBX binary format constants and layout helpers.

use bitflags::bitflags;

/// Magic bytes identifying a UBX snapshot.
pub const MAGIC: [u8; 4] = *b"UBX1";

/// Current format version.
pub const FORMAT_VERSION: u16 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 64;

/// Section directory entry size in bytes.
pub const DIR_ENTRY_SIZE: usize = 24;

// Header field offsets.
pub const OFF_MAGIC: usize = 0;
pub const OFF_VERSION: usize = 4;
pub const OFF_FLAGS: usize = 6;
pub const OFF_HEADER_BYTES: usize = 8;
pub const OFF_SECTION_COUNT: usize = 12;
pub const OFF_DIR_OFFSET: usize = 16;
pub const OFF_DIR_BYTES: usize = 20;
pub const OFF_BUILD_ID: usize = 24;
pub const OFF_CRC32: usize = 28;

bitflags! {
    /// Snapshot-level flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SnapshotFlags: u16 {
        /// Whole-file and per-section CRC32s are present.
        const HAS_CRC32 = 1 << 0;
    }
}

/// Stable section identifiers. Unknown ids are skipped on load.
pub mod section {
    pub const STRPOOL: u16 = 1;
    pub const PSL_SETS: u16 = 2;
    pub const DOMAIN_SETS: u16 = 3;
    pub const TOKEN_DICT: u16 = 4;
    pub const TOKEN_POSTINGS: u16 = 5;
    pub const PATTERN_POOL: u16 = 6;
    pub const RULES: u16 = 7;
    pub const DOMAIN_CONSTRAINT_POOL: u16 = 8;
    pub const REDIRECT_RESOURCES: u16 = 9;
    pub const REMOVEPARAM_SPECS: u16 = 10;
    pub const CSP_SPECS: u16 = 11;
    pub const HEADER_SPECS: u16 = 12;
    pub const RESPONSEHEADER_RULES: u16 = 13;
    pub const COSMETIC_RULES: u16 = 14;
    pub const PROCEDURAL_RULES: u16 = 15;
    pub const SCRIPTLET_RULES: u16 = 16;

    /// Highest known id; used to size the loader's section table.
    pub const MAX: u16 = SCRIPTLET_RULES;
}

/// Sentinel for "no pattern / no option / no constraint".
pub const NONE_U32: u32 = u32::MAX;

/// Rule action codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RuleAction {
    Allow = 0,
    Block = 1,
    RedirectDirective = 2,
    Removeparam = 3,
    CspInject = 4,
    HeaderBlock = 5,
    HeaderAllow = 6,
    ResponseHeaderRemove = 7,
}

impl RuleAction {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(RuleAction::Allow),
            1 => Some(RuleAction::Block),
            2 => Some(RuleAction::RedirectDirective),
            3 => Some(RuleAction::Removeparam),
            4 => Some(RuleAction::CspInject),
            5 => Some(RuleAction::HeaderBlock),
            6 => Some(RuleAction::HeaderAllow),
            7 => Some(RuleAction::ResponseHeaderRemove),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Allow-class rules land in the allow domain table and defeat blocks.
    pub fn is_allow_class(self) -> bool {
        matches!(self, RuleAction::Allow | RuleAction::HeaderAllow)
    }
}

bitflags! {
    /// Per-rule flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RuleFlags: u32 {
        const IMPORTANT             = 1 << 0;
        const IS_REGEX              = 1 << 1;
        const MATCH_CASE            = 1 << 2;
        const LEFT_ANCHOR           = 1 << 3;
        const RIGHT_ANCHOR          = 1 << 4;
        const HOST_ANCHOR           = 1 << 5;
        const CSP_EXCEPTION         = 1 << 6;
        const REDIRECT_RULE_EXCEPTION = 1 << 7;
        const ELEMHIDE              = 1 << 8;
        const GENERICHIDE           = 1 << 9;
        const FROM_REDIRECT         = 1 << 10;
        const REMOVEPARAM_EXCEPTION = 1 << 11;
        const RESPONSEHEADER_EXCEPTION = 1 << 12;
    }
}

/// Pattern program opcodes.
pub mod op {
    pub const DONE: u8 = 0;
    /// Operands: strpool offset (u32), length (u32).
    pub const FIND_LIT: u8 = 1;
    pub const ASSERT_START: u8 = 2;
    pub const ASSERT_END: u8 = 3;
    pub const ASSERT_BOUNDARY: u8 = 4;
    pub const SKIP_ANY: u8 = 5;
    pub const HOST_ANCHOR: u8 = 6;
}

/// Pattern anchor kinds.
pub mod anchor {
    pub const NONE: u8 = 0;
    pub const LEFT: u8 = 1;
    pub const HOST: u8 = 2;
    pub const REGEX: u8 = 3;
}

/// Pattern entry flag: compare case-sensitively.
pub const PATTERN_MATCH_CASE: u8 = 1 << 0;

/// Pattern pool entry: ops_off u32, ops_len u16, anchor u8, flags u8,
/// anchor_hash u64.
pub const PATTERN_ENTRY_SIZE: usize = 16;
pub const PATTERN_HEADER_SIZE: usize = 8;

/// Domain table entry: hash u64, postings_off u32, count u32.
pub const DOMAIN_ENTRY_SIZE: usize = 16;
pub const DOMAIN_SETS_HEADER_SIZE: usize = 8;

/// Token table entry: hash u32, postings_off u32, count u32.
pub const TOKEN_ENTRY_SIZE: usize = 12;
/// Token dict header: capacity u32, fallback_off u32, fallback_count u32,
/// reserved u32.
pub const TOKEN_DICT_HEADER_SIZE: usize = 16;

/// PSL header: three capacities plus reserved.
pub const PSL_HEADER_SIZE: usize = 16;

/// Rules section header: rule count plus ten array offsets.
pub const RULES_HEADER_SIZE: usize = 44;

/// Host-keyed table entry (cosmetic/procedural/scriptlet sections):
/// hash u64, first u32, count u32.
pub const HOSTKEY_ENTRY_SIZE: usize = 16;

/// String reference: offset u32, length u32.
pub const STRREF_SIZE: usize = 8;

/// Redirect resource entry: token ref, path ref, mime u8, pad.
pub const REDIRECT_ENTRY_SIZE: usize = 20;

/// Removeparam spec entry: kind u8, pad, strref.
pub const REMOVEPARAM_ENTRY_SIZE: usize = 12;

/// Header spec entry: name ref, value ref, op u8, pad.
pub const HEADER_SPEC_ENTRY_SIZE: usize = 20;

/// Cosmetic/procedural record: selector ref, flags u32.
pub const COSMETIC_ENTRY_SIZE: usize = 12;

/// Scriptlet record: name ref, args ref, flags u32.
pub const SCRIPTLET_ENTRY_SIZE: usize = 20;

/// Removeparam spec kinds.
pub mod removeparam {
    /// Remove every query parameter.
    pub const ALL: u8 = 0;
    /// Remove parameters whose name equals the stored string.
    pub const EXACT: u8 = 1;
    /// Remove parameters whose `name=value` text matches the stored regex.
    pub const REGEX: u8 = 2;
}

/// Header spec match operators.
pub mod headerop {
    pub const PRESENT: u8 = 0;
    pub const EQUALS: u8 = 1;
    pub const REGEX: u8 = 2;
}

/// Cosmetic record flags.
pub const COSMETIC_EXCEPTION: u32 = 1 << 0;

/// Scriptlet record flags.
pub const SCRIPTLET_EXCEPTION: u32 = 1 << 0;
pub const SCRIPTLET_DISABLE_ALL: u32 = 1 << 1;

/// Scriptlet section flag: a bare global `#@#+js()` was compiled in.
pub const SCRIPTLET_GLOBAL_DISABLE: u32 = 1 << 0;

/// Redirect resource mime kinds.
pub mod mime {
    pub const TEXT: u8 = 0;
    pub const SCRIPT: u8 = 1;
    pub const IMAGE: u8 = 2;
    pub const AUDIO: u8 = 3;
    pub const VIDEO: u8 = 4;
    pub const HTML: u8 = 5;
    pub const EMPTY: u8 = 6;
}

#[inline]
pub fn read_u16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(b[off..off + 2].try_into().unwrap())
}

#[inline]
pub fn read_u32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(b[off..off + 4].try_into().unwrap())
}

#[inline]
pub fn read_u64(b: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(b[off..off + 8].try_into().unwrap())
}

#[inline]
pub fn read_i16(b: &[u8], off: usize) -> i16 {
    i16::from_le_bytes(b[off..off + 2].try_into().unwrap())
}

/// Decode one unsigned LEB128 value, advancing `pos`.
#[inline]
pub fn read_uleb128(b: &[u8], pos: &mut usize) -> Option<u32> {
    let mut value: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *b.get(*pos)?;
        *pos += 1;
        value |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
        if shift >= 32 {
            return None;
        }
    }
}

/// Encode one unsigned LEB128 value.
#[inline]
pub fn write_uleb128(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}
