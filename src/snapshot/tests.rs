//! Round-trip tests for the snapshot writer and loader.

use super::format::*;
use super::writer::*;
use super::Snapshot;
use crate::hash::{hash64, token_hash};
use crate::request::TypeMask;

struct PoolBuilder {
    pool: Vec<u8>,
}

impl PoolBuilder {
    fn new() -> Self {
        Self { pool: Vec::new() }
    }

    fn intern(&mut self, s: &str) -> StrRef {
        let off = self.pool.len() as u32;
        self.pool.extend_from_slice(s.as_bytes());
        (off, s.len() as u32)
    }
}

fn find_lit(r: StrRef) -> Vec<u8> {
    let mut ops = vec![op::FIND_LIT];
    ops.extend_from_slice(&r.0.to_le_bytes());
    ops.extend_from_slice(&r.1.to_le_bytes());
    ops
}

fn sample_input() -> SnapshotInput {
    let mut pool = PoolBuilder::new();
    let banner = pool.intern("banner");
    let noop_token = pool.intern("noop.js");
    let noop_path = pool.intern("/web_accessible/noop.js");
    let gclid = pool.intern("gclid");
    let selector = pool.intern(".site-ad");
    let generic = pool.intern(".ad");

    let mut input = SnapshotInput::default();

    // Pattern 0: host-anchored host-only rule.
    input.patterns.push(PatternRecord {
        ops: vec![op::HOST_ANCHOR, op::DONE],
        anchor: anchor::HOST,
        flags: 0,
        anchor_hash: hash64("ads.test"),
    });
    // Pattern 1: plain literal.
    let mut ops = find_lit(banner);
    ops.push(op::DONE);
    input.patterns.push(PatternRecord {
        ops,
        anchor: anchor::NONE,
        flags: 0,
        anchor_hash: 0,
    });

    // Rule 0: block ads.test (host-only).
    input.rules.push(RuleRecord {
        action: RuleAction::Block,
        flags: RuleFlags::HOST_ANCHOR,
        type_mask: TypeMask::DEFAULT_NETWORK.bits(),
        party_mask: 0x3,
        scheme_mask: 0x1f,
        pattern_id: 0,
        domain_offset: NONE_U32,
        option_id: NONE_U32,
        priority: 0,
        list_id: 0,
    });
    // Rule 1: token-indexed block on "banner".
    input.rules.push(RuleRecord {
        action: RuleAction::Block,
        flags: RuleFlags::empty(),
        type_mask: TypeMask::DEFAULT_NETWORK.bits(),
        party_mask: 0x3,
        scheme_mask: 0x1f,
        pattern_id: 1,
        domain_offset: 0,
        option_id: NONE_U32,
        priority: 0,
        list_id: 1,
    });
    // Rule 2: removeparam fallback rule.
    input.rules.push(RuleRecord {
        action: RuleAction::Removeparam,
        flags: RuleFlags::empty(),
        type_mask: TypeMask::all().bits(),
        party_mask: 0x3,
        scheme_mask: 0x1f,
        pattern_id: NONE_U32,
        domain_offset: NONE_U32,
        option_id: 0,
        priority: 0,
        list_id: 0,
    });

    // Constraint 0: include example.test, exclude shop.example.test.
    input.constraints.extend_from_slice(&1u16.to_le_bytes());
    input.constraints.extend_from_slice(&1u16.to_le_bytes());
    input
        .constraints
        .extend_from_slice(&hash64("example.test").to_le_bytes());
    input
        .constraints
        .extend_from_slice(&hash64("shop.example.test").to_le_bytes());

    input.domain_block = vec![(hash64("ads.test"), vec![0])];
    input.tokens = vec![(token_hash(b"banner"), vec![1])];
    input.fallback = vec![2];

    input.redirects = vec![(noop_token, noop_path, mime::SCRIPT)];
    input.removeparams = vec![(removeparam::EXACT, gclid)];

    input.cosmetic.generic = vec![generic];
    input.cosmetic.entries = vec![(selector, 0)];
    input.cosmetic.hosts = vec![HostRange {
        hash: hash64("example.test"),
        first: 0,
        count: 1,
    }];

    input.scriptlet.global_disable = true;

    input.psl_exact = vec![hash64("test")];
    input.with_crc = true;
    input.build_id = 7;
    input.strpool = pool.pool;
    input
}

#[test]
fn test_round_trip() {
    let bytes = SnapshotWriter::new().write(&sample_input()).unwrap();
    let snapshot = Snapshot::load(bytes).unwrap();

    assert_eq!(snapshot.rule_count(), 3);
    assert_eq!(snapshot.build_id(), 7);

    // Domain table probe.
    let (off, count) = snapshot.domain_lookup(false, hash64("ads.test")).unwrap();
    let mut ids = Vec::new();
    snapshot.decode_postings(off, count, &mut ids);
    assert_eq!(ids, vec![0]);
    assert!(snapshot.domain_lookup(true, hash64("ads.test")).is_none());
    assert!(snapshot.domain_lookup(false, hash64("other.test")).is_none());

    // Token dictionary probe.
    let (off, count) = snapshot.token_lookup(token_hash(b"banner")).unwrap();
    ids.clear();
    snapshot.decode_postings(off, count, &mut ids);
    assert_eq!(ids, vec![1]);

    // Fallback bucket.
    let (off, count) = snapshot.fallback_postings();
    ids.clear();
    snapshot.decode_postings(off, count, &mut ids);
    assert_eq!(ids, vec![2]);

    // Rule attributes survive.
    assert_eq!(snapshot.rule_action(0), RuleAction::Block);
    assert!(snapshot.rule_flags(0).contains(RuleFlags::HOST_ANCHOR));
    assert_eq!(snapshot.rule_pattern_id(2), NONE_U32);
    assert_eq!(snapshot.rule_list_id(1), 1);

    // Pattern views.
    let p = snapshot.pattern(0);
    assert_eq!(p.anchor, anchor::HOST);
    assert_eq!(p.anchor_hash, hash64("ads.test"));

    // Domain constraints.
    let doc_walk = vec![hash64("www.example.test"), hash64("example.test")];
    assert!(snapshot.domain_constraint_ok(0, &doc_walk));
    let shop_walk = vec![hash64("shop.example.test"), hash64("example.test")];
    assert!(!snapshot.domain_constraint_ok(0, &shop_walk));
    assert!(snapshot.domain_constraint_ok(NONE_U32, &[]));

    // Option tables.
    let (token, path, kind) = snapshot.redirect_resource(0).unwrap();
    assert_eq!(token, "noop.js");
    assert_eq!(path, "/web_accessible/noop.js");
    assert_eq!(kind, mime::SCRIPT);
    assert_eq!(snapshot.removeparam_spec(0), Some((removeparam::EXACT, "gclid")));
    assert!(snapshot.redirect_resource(1).is_none());

    // Cosmetic section.
    assert_eq!(snapshot.cosmetic_generic_count(), 1);
    assert_eq!(snapshot.cosmetic_generic(0), Some(".ad"));
    let (first, count) = snapshot.cosmetic_host_range(hash64("example.test")).unwrap();
    assert_eq!((first, count), (0, 1));
    assert_eq!(snapshot.cosmetic_entry(first), Some((".site-ad", 0)));
    assert!(snapshot.cosmetic_host_range(hash64("nope.test")).is_none());

    assert!(snapshot.scriptlet_global_disable());

    // PSL rides along.
    assert_eq!(snapshot.psl().etld1("sub.example.test"), "example.test");
}

#[test]
fn test_tampered_snapshot_rejected() {
    let bytes = SnapshotWriter::new().write(&sample_input()).unwrap();
    // Flip one byte somewhere in the middle.
    let mut tampered = bytes.clone();
    let mid = tampered.len() / 2;
    tampered[mid] ^= 0xff;
    assert!(Snapshot::load(tampered).is_err());

    // The pristine copy still loads.
    assert!(Snapshot::load(bytes).is_ok());
}

#[test]
fn test_truncated_snapshot_rejected() {
    let bytes = SnapshotWriter::new().write(&sample_input()).unwrap();
    for len in [0, 8, 63, bytes.len() / 2] {
        assert!(Snapshot::load(bytes[..len].to_vec()).is_err());
    }
}

#[test]
fn test_empty_input_round_trip() {
    let mut input = SnapshotInput::default();
    input.with_crc = true;
    let bytes = SnapshotWriter::new().write(&input).unwrap();
    let snapshot = Snapshot::load(bytes).unwrap();
    assert_eq!(snapshot.rule_count(), 0);
    assert!(snapshot.domain_lookup(false, hash64("any.test")).is_none());
    assert!(snapshot.token_lookup(token_hash(b"any")).is_none());
}

#[test]
fn test_mmap_open_round_trip() {
    use std::io::Write;

    let bytes = SnapshotWriter::new().write(&sample_input()).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.ubx");
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&bytes)
        .unwrap();

    let snapshot = Snapshot::open(&path).unwrap();
    assert_eq!(snapshot.rule_count(), 3);
    assert_eq!(snapshot.size(), bytes.len());
}
