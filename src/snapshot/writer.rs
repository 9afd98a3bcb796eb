//! UBX snapshot serializer.
//!
//! The compiler hands a [`SnapshotInput`] to [`SnapshotWriter::write`],
//! which emits the sections in stable id order, fills the section
//! directory and back-patches the CRC32. Identical inputs produce
//! byte-identical snapshots.

use super::format::*;
use crate::error::Result;

/// Reference into the string pool: (offset, length).
pub type StrRef = (u32, u32);

/// One serialized network rule.
#[derive(Debug, Clone)]
pub struct RuleRecord {
    pub action: RuleAction,
    pub flags: RuleFlags,
    pub type_mask: u16,
    pub party_mask: u8,
    pub scheme_mask: u8,
    pub pattern_id: u32,
    pub domain_offset: u32,
    pub option_id: u32,
    pub priority: i16,
    pub list_id: u16,
}

/// One compiled pattern program.
#[derive(Debug, Clone)]
pub struct PatternRecord {
    /// Encoded opcode stream (operands little-endian).
    pub ops: Vec<u8>,
    pub anchor: u8,
    pub flags: u8,
    pub anchor_hash: u64,
}

/// A `$header=` matching spec.
#[derive(Debug, Clone)]
pub struct HeaderSpecRecord {
    pub name: StrRef,
    pub value: StrRef,
    pub op: u8,
}

/// A host-keyed range over a record array.
#[derive(Debug, Clone, Copy)]
pub struct HostRange {
    pub hash: u64,
    pub first: u32,
    pub count: u32,
}

#[derive(Debug, Default)]
pub struct CosmeticInput {
    /// Selectors applied on every document (post exception subtraction).
    pub generic: Vec<StrRef>,
    /// Host-scoped records: selector plus flags.
    pub entries: Vec<(StrRef, u32)>,
    pub hosts: Vec<HostRange>,
}

#[derive(Debug, Default)]
pub struct ProceduralInput {
    pub entries: Vec<(StrRef, u32)>,
    pub hosts: Vec<HostRange>,
}

#[derive(Debug, Default)]
pub struct ScriptletInput {
    pub global_disable: bool,
    /// Records: name ref, args ref, flags.
    pub entries: Vec<(StrRef, StrRef, u32)>,
    pub hosts: Vec<HostRange>,
}

/// Intermediate representation of a compiled rule set, ready to serialize.
#[derive(Debug, Default)]
pub struct SnapshotInput {
    pub strpool: Vec<u8>,
    pub psl_exact: Vec<u64>,
    pub psl_wildcard: Vec<u64>,
    pub psl_exception: Vec<u64>,
    pub rules: Vec<RuleRecord>,
    pub patterns: Vec<PatternRecord>,
    /// Domain hash to sorted rule ids, allow class.
    pub domain_allow: Vec<(u64, Vec<u32>)>,
    /// Domain hash to sorted rule ids, block class.
    pub domain_block: Vec<(u64, Vec<u32>)>,
    /// Token hash to sorted rule ids.
    pub tokens: Vec<(u32, Vec<u32>)>,
    /// Rules with no usable index key, consulted as a last resort.
    pub fallback: Vec<u32>,
    /// Pre-encoded domain-constraint records.
    pub constraints: Vec<u8>,
    /// Redirect resources: token ref, path ref, mime kind.
    pub redirects: Vec<(StrRef, StrRef, u8)>,
    /// Removeparam specs: kind, spec ref.
    pub removeparams: Vec<(u8, StrRef)>,
    pub csp_specs: Vec<StrRef>,
    pub header_specs: Vec<HeaderSpecRecord>,
    pub responseheader_names: Vec<StrRef>,
    pub cosmetic: CosmeticInput,
    pub procedural: ProceduralInput,
    pub scriptlet: ScriptletInput,
    pub build_id: u32,
    pub with_crc: bool,
}

/// UBX snapshot writer.
pub struct SnapshotWriter {
    buffer: Vec<u8>,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(1024 * 1024),
        }
    }

    /// Serialize `input` into a complete UBX snapshot.
    pub fn write(&mut self, input: &SnapshotInput) -> Result<Vec<u8>> {
        self.buffer.clear();
        self.buffer.resize(HEADER_SIZE, 0);

        // Postings are shared by the domain tables and the token dict, so
        // the blob is assembled first and referenced by section offsets.
        let mut postings = Vec::new();
        let mut allow_entries = encode_posting_entries(&input.domain_allow, &mut postings);
        let mut block_entries = encode_posting_entries(&input.domain_block, &mut postings);
        let mut token_entries: Vec<(u32, u32, u32)> = input
            .tokens
            .iter()
            .map(|(hash, ids)| {
                let (off, count) = encode_postings(ids, &mut postings);
                (*hash, off, count)
            })
            .collect();
        let fallback_ref = encode_postings(&input.fallback, &mut postings);

        allow_entries.sort_unstable_by_key(|e| e.0);
        block_entries.sort_unstable_by_key(|e| e.0);
        token_entries.sort_unstable_by_key(|e| e.0);

        let mut dir: Vec<(u16, u32, u32, u32)> = Vec::new();
        let mut emit = |writer: &mut Self, id: u16, bytes: Vec<u8>| {
            align8(&mut writer.buffer);
            let offset = writer.buffer.len() as u32;
            let crc = if input.with_crc {
                crc32fast::hash(&bytes)
            } else {
                0
            };
            writer.buffer.extend_from_slice(&bytes);
            dir.push((id, offset, bytes.len() as u32, crc));
        };

        emit(self, section::STRPOOL, input.strpool.clone());
        emit(self, section::PSL_SETS, write_psl_sets(input));
        emit(
            self,
            section::DOMAIN_SETS,
            write_domain_sets(&allow_entries, &block_entries),
        );
        emit(
            self,
            section::TOKEN_DICT,
            write_token_dict(&token_entries, fallback_ref),
        );
        emit(self, section::TOKEN_POSTINGS, postings);
        emit(self, section::PATTERN_POOL, write_pattern_pool(&input.patterns));
        emit(self, section::RULES, write_rules(&input.rules));
        emit(
            self,
            section::DOMAIN_CONSTRAINT_POOL,
            input.constraints.clone(),
        );
        emit(
            self,
            section::REDIRECT_RESOURCES,
            write_redirects(&input.redirects),
        );
        emit(
            self,
            section::REMOVEPARAM_SPECS,
            write_removeparams(&input.removeparams),
        );
        emit(self, section::CSP_SPECS, write_strrefs(&input.csp_specs));
        emit(
            self,
            section::HEADER_SPECS,
            write_header_specs(&input.header_specs),
        );
        emit(
            self,
            section::RESPONSEHEADER_RULES,
            write_strrefs(&input.responseheader_names),
        );
        emit(self, section::COSMETIC_RULES, write_cosmetic(&input.cosmetic));
        emit(
            self,
            section::PROCEDURAL_RULES,
            write_procedural(&input.procedural),
        );
        emit(self, section::SCRIPTLET_RULES, write_scriptlet(&input.scriptlet));

        // Section directory.
        align8(&mut self.buffer);
        let dir_offset = self.buffer.len() as u32;
        for (id, offset, length, crc) in &dir {
            let mut entry = [0u8; DIR_ENTRY_SIZE];
            entry[0..2].copy_from_slice(&id.to_le_bytes());
            // entry flags (2..4) reserved, zero
            entry[4..8].copy_from_slice(&offset.to_le_bytes());
            entry[8..12].copy_from_slice(&length.to_le_bytes());
            // uncompressed length (12..16): 0 = stored raw
            entry[16..20].copy_from_slice(&crc.to_le_bytes());
            self.buffer.extend_from_slice(&entry);
        }
        let dir_bytes = (dir.len() * DIR_ENTRY_SIZE) as u32;

        // Header.
        let flags = if input.with_crc {
            SnapshotFlags::HAS_CRC32.bits()
        } else {
            0
        };
        self.buffer[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&MAGIC);
        self.buffer[OFF_VERSION..OFF_VERSION + 2]
            .copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        self.buffer[OFF_FLAGS..OFF_FLAGS + 2].copy_from_slice(&flags.to_le_bytes());
        self.buffer[OFF_HEADER_BYTES..OFF_HEADER_BYTES + 4]
            .copy_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
        self.buffer[OFF_SECTION_COUNT..OFF_SECTION_COUNT + 4]
            .copy_from_slice(&(dir.len() as u32).to_le_bytes());
        self.buffer[OFF_DIR_OFFSET..OFF_DIR_OFFSET + 4]
            .copy_from_slice(&dir_offset.to_le_bytes());
        self.buffer[OFF_DIR_BYTES..OFF_DIR_BYTES + 4].copy_from_slice(&dir_bytes.to_le_bytes());
        self.buffer[OFF_BUILD_ID..OFF_BUILD_ID + 4]
            .copy_from_slice(&input.build_id.to_le_bytes());

        // Whole-file CRC over the buffer with the CRC field zeroed (it is
        // still zero here), then patch it in.
        if input.with_crc {
            let crc = crc32fast::hash(&self.buffer);
            self.buffer[OFF_CRC32..OFF_CRC32 + 4].copy_from_slice(&crc.to_le_bytes());
        }

        Ok(std::mem::take(&mut self.buffer))
    }
}

impl Default for SnapshotWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn align8(buffer: &mut Vec<u8>) {
    while buffer.len() % 8 != 0 {
        buffer.push(0);
    }
}

/// Capacity for an open-addressed table: next power of two >= 2n.
pub fn table_capacity(count: usize) -> usize {
    if count == 0 {
        0
    } else {
        (count * 2).next_power_of_two()
    }
}

/// Build an open-addressed Hash64 set (8-byte slots, 0 = empty).
pub fn build_hash64_set(hashes: &[u64]) -> Vec<u8> {
    let capacity = table_capacity(hashes.len());
    let mut slots = vec![0u64; capacity];
    if capacity > 0 {
        let mask = capacity - 1;
        for &hash in hashes {
            let mut idx = hash as usize & mask;
            while slots[idx] != 0 && slots[idx] != hash {
                idx = (idx + 1) & mask;
            }
            slots[idx] = hash;
        }
    }
    let mut out = Vec::with_capacity(capacity * 8);
    for slot in slots {
        out.extend_from_slice(&slot.to_le_bytes());
    }
    out
}

fn encode_postings(ids: &[u32], blob: &mut Vec<u8>) -> (u32, u32) {
    let offset = blob.len() as u32;
    let mut prev = 0u32;
    for (i, &id) in ids.iter().enumerate() {
        let delta = if i == 0 { id } else { id - prev };
        write_uleb128(blob, delta);
        prev = id;
    }
    (offset, ids.len() as u32)
}

fn encode_posting_entries(
    lists: &[(u64, Vec<u32>)],
    blob: &mut Vec<u8>,
) -> Vec<(u64, u32, u32)> {
    lists
        .iter()
        .map(|(hash, ids)| {
            let (off, count) = encode_postings(ids, blob);
            (*hash, off, count)
        })
        .collect()
}

fn build_domain_table(entries: &[(u64, u32, u32)]) -> Vec<u8> {
    let capacity = table_capacity(entries.len());
    let mut slots = vec![(0u64, 0u32, 0u32); capacity];
    if capacity > 0 {
        let mask = capacity - 1;
        for &(hash, off, count) in entries {
            let mut idx = hash as usize & mask;
            while slots[idx].0 != 0 {
                idx = (idx + 1) & mask;
            }
            slots[idx] = (hash, off, count);
        }
    }
    let mut out = Vec::with_capacity(capacity * DOMAIN_ENTRY_SIZE);
    for (hash, off, count) in slots {
        out.extend_from_slice(&hash.to_le_bytes());
        out.extend_from_slice(&off.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
    }
    out
}

fn write_psl_sets(input: &SnapshotInput) -> Vec<u8> {
    let exact = build_hash64_set(&input.psl_exact);
    let wildcard = build_hash64_set(&input.psl_wildcard);
    let exception = build_hash64_set(&input.psl_exception);

    let mut out = Vec::with_capacity(PSL_HEADER_SIZE + exact.len() + wildcard.len() + exception.len());
    out.extend_from_slice(&((exact.len() / 8) as u32).to_le_bytes());
    out.extend_from_slice(&((wildcard.len() / 8) as u32).to_le_bytes());
    out.extend_from_slice(&((exception.len() / 8) as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&exact);
    out.extend_from_slice(&wildcard);
    out.extend_from_slice(&exception);
    out
}

fn write_domain_sets(allow: &[(u64, u32, u32)], block: &[(u64, u32, u32)]) -> Vec<u8> {
    let allow_table = build_domain_table(allow);
    let block_table = build_domain_table(block);

    let mut out =
        Vec::with_capacity(DOMAIN_SETS_HEADER_SIZE + allow_table.len() + block_table.len());
    out.extend_from_slice(&((allow_table.len() / DOMAIN_ENTRY_SIZE) as u32).to_le_bytes());
    out.extend_from_slice(&((block_table.len() / DOMAIN_ENTRY_SIZE) as u32).to_le_bytes());
    out.extend_from_slice(&allow_table);
    out.extend_from_slice(&block_table);
    out
}

fn write_token_dict(entries: &[(u32, u32, u32)], fallback: (u32, u32)) -> Vec<u8> {
    let capacity = table_capacity(entries.len());
    let mut slots = vec![(0u32, 0u32, 0u32); capacity];
    if capacity > 0 {
        let mask = capacity - 1;
        for &(hash, off, count) in entries {
            let mut idx = hash as usize & mask;
            while slots[idx].0 != 0 {
                idx = (idx + 1) & mask;
            }
            slots[idx] = (hash, off, count);
        }
    }

    let mut out = Vec::with_capacity(TOKEN_DICT_HEADER_SIZE + capacity * TOKEN_ENTRY_SIZE);
    out.extend_from_slice(&(capacity as u32).to_le_bytes());
    out.extend_from_slice(&fallback.0.to_le_bytes());
    out.extend_from_slice(&fallback.1.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    for (hash, off, count) in slots {
        out.extend_from_slice(&hash.to_le_bytes());
        out.extend_from_slice(&off.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
    }
    out
}

fn write_pattern_pool(patterns: &[PatternRecord]) -> Vec<u8> {
    let mut ops_blob = Vec::new();
    let mut entries = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        entries.push((ops_blob.len() as u32, pattern.ops.len() as u16));
        ops_blob.extend_from_slice(&pattern.ops);
    }

    let mut out = Vec::with_capacity(
        PATTERN_HEADER_SIZE + patterns.len() * PATTERN_ENTRY_SIZE + ops_blob.len(),
    );
    out.extend_from_slice(&(patterns.len() as u32).to_le_bytes());
    let ops_base = (PATTERN_HEADER_SIZE + patterns.len() * PATTERN_ENTRY_SIZE) as u32;
    out.extend_from_slice(&ops_base.to_le_bytes());
    for (pattern, (ops_off, ops_len)) in patterns.iter().zip(&entries) {
        out.extend_from_slice(&ops_off.to_le_bytes());
        out.extend_from_slice(&ops_len.to_le_bytes());
        out.push(pattern.anchor);
        out.push(pattern.flags);
        out.extend_from_slice(&pattern.anchor_hash.to_le_bytes());
    }
    out.extend_from_slice(&ops_blob);
    out
}

fn write_rules(rules: &[RuleRecord]) -> Vec<u8> {
    let n = rules.len();
    // Arrays laid out widest-first so each starts aligned to its element.
    let flags_off = RULES_HEADER_SIZE;
    let pattern_off = flags_off + 4 * n;
    let domain_off = pattern_off + 4 * n;
    let option_off = domain_off + 4 * n;
    let type_off = option_off + 4 * n;
    let priority_off = type_off + 2 * n;
    let list_off = priority_off + 2 * n;
    let action_off = list_off + 2 * n;
    let party_off = action_off + n;
    let scheme_off = party_off + n;
    let total = scheme_off + n;

    let mut out = vec![0u8; total];
    out[0..4].copy_from_slice(&(n as u32).to_le_bytes());
    for (i, off) in [
        action_off,
        flags_off,
        type_off,
        party_off,
        scheme_off,
        pattern_off,
        domain_off,
        option_off,
        priority_off,
        list_off,
    ]
    .iter()
    .enumerate()
    {
        let at = 4 + i * 4;
        out[at..at + 4].copy_from_slice(&(*off as u32).to_le_bytes());
    }

    for (i, rule) in rules.iter().enumerate() {
        out[action_off + i] = rule.action.as_u8();
        out[flags_off + 4 * i..flags_off + 4 * i + 4]
            .copy_from_slice(&rule.flags.bits().to_le_bytes());
        out[type_off + 2 * i..type_off + 2 * i + 2]
            .copy_from_slice(&rule.type_mask.to_le_bytes());
        out[party_off + i] = rule.party_mask;
        out[scheme_off + i] = rule.scheme_mask;
        out[pattern_off + 4 * i..pattern_off + 4 * i + 4]
            .copy_from_slice(&rule.pattern_id.to_le_bytes());
        out[domain_off + 4 * i..domain_off + 4 * i + 4]
            .copy_from_slice(&rule.domain_offset.to_le_bytes());
        out[option_off + 4 * i..option_off + 4 * i + 4]
            .copy_from_slice(&rule.option_id.to_le_bytes());
        out[priority_off + 2 * i..priority_off + 2 * i + 2]
            .copy_from_slice(&rule.priority.to_le_bytes());
        out[list_off + 2 * i..list_off + 2 * i + 2]
            .copy_from_slice(&rule.list_id.to_le_bytes());
    }
    out
}

fn write_strref(out: &mut Vec<u8>, r: StrRef) {
    out.extend_from_slice(&r.0.to_le_bytes());
    out.extend_from_slice(&r.1.to_le_bytes());
}

fn write_strrefs(refs: &[StrRef]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + refs.len() * STRREF_SIZE);
    out.extend_from_slice(&(refs.len() as u32).to_le_bytes());
    for &r in refs {
        write_strref(&mut out, r);
    }
    out
}

fn write_redirects(redirects: &[(StrRef, StrRef, u8)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + redirects.len() * REDIRECT_ENTRY_SIZE);
    out.extend_from_slice(&(redirects.len() as u32).to_le_bytes());
    for &(token, path, mime) in redirects {
        write_strref(&mut out, token);
        write_strref(&mut out, path);
        out.push(mime);
        out.extend_from_slice(&[0u8; 3]);
    }
    out
}

fn write_removeparams(specs: &[(u8, StrRef)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + specs.len() * REMOVEPARAM_ENTRY_SIZE);
    out.extend_from_slice(&(specs.len() as u32).to_le_bytes());
    for &(kind, r) in specs {
        out.push(kind);
        out.extend_from_slice(&[0u8; 3]);
        write_strref(&mut out, r);
    }
    out
}

fn write_header_specs(specs: &[HeaderSpecRecord]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + specs.len() * HEADER_SPEC_ENTRY_SIZE);
    out.extend_from_slice(&(specs.len() as u32).to_le_bytes());
    for spec in specs {
        write_strref(&mut out, spec.name);
        write_strref(&mut out, spec.value);
        out.push(spec.op);
        out.extend_from_slice(&[0u8; 3]);
    }
    out
}

fn write_host_table(hosts: &[HostRange]) -> Vec<u8> {
    let capacity = table_capacity(hosts.len());
    let mut slots = vec![HostRange { hash: 0, first: 0, count: 0 }; capacity];
    if capacity > 0 {
        let mask = capacity - 1;
        let mut sorted: Vec<&HostRange> = hosts.iter().collect();
        sorted.sort_unstable_by_key(|h| h.hash);
        for host in sorted {
            let mut idx = host.hash as usize & mask;
            while slots[idx].hash != 0 {
                idx = (idx + 1) & mask;
            }
            slots[idx] = *host;
        }
    }
    let mut out = Vec::with_capacity(capacity * HOSTKEY_ENTRY_SIZE);
    for slot in slots {
        out.extend_from_slice(&slot.hash.to_le_bytes());
        out.extend_from_slice(&slot.first.to_le_bytes());
        out.extend_from_slice(&slot.count.to_le_bytes());
    }
    out
}

fn write_cosmetic(input: &CosmeticInput) -> Vec<u8> {
    let table = write_host_table(&input.hosts);
    let mut out = Vec::new();
    out.extend_from_slice(&(input.generic.len() as u32).to_le_bytes());
    out.extend_from_slice(&(input.entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&((table.len() / HOSTKEY_ENTRY_SIZE) as u32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    for &r in &input.generic {
        write_strref(&mut out, r);
    }
    for &(r, flags) in &input.entries {
        write_strref(&mut out, r);
        out.extend_from_slice(&flags.to_le_bytes());
    }
    align8(&mut out);
    out.extend_from_slice(&table);
    out
}

fn write_procedural(input: &ProceduralInput) -> Vec<u8> {
    let table = write_host_table(&input.hosts);
    let mut out = Vec::new();
    out.extend_from_slice(&(input.entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&((table.len() / HOSTKEY_ENTRY_SIZE) as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 8]);
    for &(r, flags) in &input.entries {
        write_strref(&mut out, r);
        out.extend_from_slice(&flags.to_le_bytes());
    }
    align8(&mut out);
    out.extend_from_slice(&table);
    out
}

fn write_scriptlet(input: &ScriptletInput) -> Vec<u8> {
    let table = write_host_table(&input.hosts);
    let flags = if input.global_disable {
        SCRIPTLET_GLOBAL_DISABLE
    } else {
        0
    };
    let mut out = Vec::new();
    out.extend_from_slice(&(input.entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&((table.len() / HOSTKEY_ENTRY_SIZE) as u32).to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    for &(name, args, flags) in &input.entries {
        write_strref(&mut out, name);
        write_strref(&mut out, args);
        out.extend_from_slice(&flags.to_le_bytes());
    }
    align8(&mut out);
    out.extend_from_slice(&table);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_empty_input() {
        let mut writer = SnapshotWriter::new();
        let data = writer.write(&SnapshotInput::default()).unwrap();
        assert!(data.len() >= HEADER_SIZE);
        assert_eq!(&data[0..4], &MAGIC);
        assert_eq!(read_u16(&data, OFF_VERSION), FORMAT_VERSION);
        assert_eq!(read_u32(&data, OFF_SECTION_COUNT), section::MAX as u32);
    }

    #[test]
    fn test_table_capacity_power_of_two() {
        assert_eq!(table_capacity(0), 0);
        for n in 1..200 {
            let cap = table_capacity(n);
            assert!(cap.is_power_of_two());
            assert!(cap >= 2 * n);
        }
    }

    #[test]
    fn test_deterministic_output() {
        let mut input = SnapshotInput::default();
        input.strpool = b"hello".to_vec();
        input.psl_exact = vec![3, 1, 2];
        input.tokens = vec![(7, vec![0, 5, 9]), (3, vec![2])];
        input.with_crc = true;

        let a = SnapshotWriter::new().write(&input).unwrap();
        let b = SnapshotWriter::new().write(&input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash64_set_probe_layout() {
        let set = build_hash64_set(&[42, 43]);
        assert_eq!(set.len() % 8, 0);
        let slots: Vec<u64> = set
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert!(slots.contains(&42));
        assert!(slots.contains(&43));
    }
}
