//! Compile pipeline: classify and parse lists, fold badfilters, compile
//! patterns, select index tokens, build the indexes and emit the snapshot.

use ahash::{AHashMap, AHashSet};
use std::collections::BTreeMap;
use std::hash::Hasher;

use super::parse::{
    classify, normalize_host, parse_network, parse_scriptlet_body, CosmeticMarker, LineKind,
    NetworkRule, RemoveparamSpec,
};
use super::pattern::{candidate_tokens, compile_pattern, Op, PatternKind};
use super::{CompileOptions, CompileOutput, CompileStats, ListStats, SkipReason};
use crate::error::{Error, Result};
use crate::hash::{hash64, token_hash};
use crate::psl::{PslBuilder, DEFAULT_PSL};
use crate::request::{PartyMask, SchemeMask, TypeMask};
use crate::snapshot::format::{anchor, mime, op, removeparam as rp, headerop, RuleAction, RuleFlags, NONE_U32, PATTERN_MATCH_CASE};
use crate::snapshot::writer::{
    HeaderSpecRecord, HostRange, PatternRecord, RuleRecord, SnapshotInput, SnapshotWriter, StrRef,
};

/// Built-in redirect-resource catalog: token, packaged path, mime kind.
const REDIRECT_CATALOG: &[(&str, &str, u8)] = &[
    ("noop.js", "/web_accessible/noop.js", mime::SCRIPT),
    ("noopjs", "/web_accessible/noop.js", mime::SCRIPT),
    ("noop.txt", "/web_accessible/noop.txt", mime::TEXT),
    ("nooptext", "/web_accessible/noop.txt", mime::TEXT),
    ("noop.html", "/web_accessible/noop.html", mime::HTML),
    ("noopframe", "/web_accessible/noop.html", mime::HTML),
    ("1x1.gif", "/web_accessible/1x1.gif", mime::IMAGE),
    ("1x1-transparent.gif", "/web_accessible/1x1.gif", mime::IMAGE),
    ("2x2.png", "/web_accessible/2x2.png", mime::IMAGE),
    ("2x2-transparent.png", "/web_accessible/2x2.png", mime::IMAGE),
    ("32x32.png", "/web_accessible/32x32.png", mime::IMAGE),
    ("noop-0.1s.mp3", "/web_accessible/noop-0.1s.mp3", mime::AUDIO),
    ("noopmp3-0.1s", "/web_accessible/noop-0.1s.mp3", mime::AUDIO),
    ("noop-1s.mp4", "/web_accessible/noop-1s.mp4", mime::VIDEO),
    ("noopmp4-1s", "/web_accessible/noop-1s.mp4", mime::VIDEO),
    ("empty", "/web_accessible/empty", mime::EMPTY),
];

#[derive(Default)]
struct Interner {
    pool: Vec<u8>,
    map: AHashMap<String, StrRef>,
}

impl Interner {
    fn intern(&mut self, s: &str) -> StrRef {
        if let Some(&r) = self.map.get(s) {
            return r;
        }
        let r = (self.pool.len() as u32, s.len() as u32);
        self.pool.extend_from_slice(s.as_bytes());
        self.map.insert(s.to_string(), r);
        r
    }
}

struct Pending {
    rule: NetworkRule,
    kind: PatternKind,
    list_id: u16,
}

#[derive(Default)]
struct CosmeticAcc {
    generic_hide: Vec<String>,
    generic_exceptions: AHashSet<String>,
    /// host -> (body, is_exception)
    hide: BTreeMap<String, Vec<(String, bool)>>,
    procedural: BTreeMap<String, Vec<(String, bool)>>,
    /// host -> (name or None, args text, is_exception)
    scriptlets: BTreeMap<String, Vec<(Option<String>, String, bool)>>,
    global_scriptlet_disable: bool,
}

/// Where a rule record is indexed.
enum IndexKey {
    Domain(Vec<u64>),
    Token(u32),
    Fallback,
}

pub(super) fn compile(lists: &[&str], options: &CompileOptions) -> Result<CompileOutput> {
    let mut stats = CompileStats::default();
    let mut pending: Vec<Pending> = Vec::new();
    let mut badfilter_keys: AHashSet<u64> = AHashSet::new();
    let mut cosmetics = CosmeticAcc::default();

    for (list_idx, text) in lists.iter().enumerate() {
        let list_id = list_idx as u16;
        let mut ls = ListStats::default();
        let mut list_rules = 0usize;

        for raw_line in text.lines() {
            ls.lines += 1;
            let line = raw_line.trim();
            match classify(line) {
                LineKind::Empty | LineKind::Comment | LineKind::SectionHeader => {}
                LineKind::Hosts(host) => {
                    ls.rules_before += 1;
                    if list_rules >= options.max_rules_per_list {
                        ls.skip(SkipReason::TooManyRules);
                        continue;
                    }
                    match normalize_host(host) {
                        Some(host) => {
                            let rule = NetworkRule {
                                host_anchor: true,
                                pattern: host.clone(),
                                party_mask: PartyMask::all().bits(),
                                ..Default::default()
                            };
                            pending.push(Pending {
                                kind: PatternKind::HostOnly { host },
                                rule,
                                list_id,
                            });
                            list_rules += 1;
                            ls.rules_after += 1;
                        }
                        None => ls.skip(SkipReason::UnsupportedSyntax),
                    }
                }
                LineKind::Cosmetic(cosmetic) => {
                    ls.rules_before += 1;
                    if list_rules >= options.max_rules_per_list {
                        ls.skip(SkipReason::TooManyRules);
                        continue;
                    }
                    match collect_cosmetic(
                        cosmetic.domains,
                        cosmetic.marker,
                        cosmetic.body,
                        &mut cosmetics,
                        &mut pending,
                        list_id,
                    ) {
                        Ok(()) => {
                            list_rules += 1;
                            ls.rules_after += 1;
                        }
                        Err(reason) => ls.skip(reason),
                    }
                }
                LineKind::Network(raw) => {
                    ls.rules_before += 1;
                    if list_rules >= options.max_rules_per_list {
                        ls.skip(SkipReason::TooManyRules);
                        continue;
                    }
                    let rule = match parse_network(raw) {
                        Ok(rule) => rule,
                        Err(reason) => {
                            ls.skip(reason);
                            continue;
                        }
                    };
                    if rule.badfilter {
                        badfilter_keys.insert(rule_key(&rule));
                        stats.badfilter_rules += 1;
                        continue;
                    }
                    let kind = match compile_pattern(&rule, options.max_regex_len) {
                        Ok(kind) => kind,
                        Err(reason) => {
                            ls.skip(reason);
                            continue;
                        }
                    };
                    pending.push(Pending { rule, kind, list_id });
                    list_rules += 1;
                    ls.rules_after += 1;
                }
            }
        }

        stats.rules_before += ls.rules_before;
        for (&reason, &count) in &ls.skipped {
            *stats.skipped.entry(reason).or_insert(0) += count;
        }
        stats.per_list.push(ls);
    }

    // Badfilter fold and exact-duplicate removal.
    let mut seen_keys: AHashSet<u64> = AHashSet::new();
    let mut survivors: Vec<Pending> = Vec::with_capacity(pending.len());
    for p in pending {
        let key = rule_key(&p.rule);
        if badfilter_keys.contains(&key) {
            stats.badfiltered_rules += 1;
            continue;
        }
        if !seen_keys.insert(key) {
            stats.rules_deduped += 1;
            continue;
        }
        survivors.push(p);
    }
    stats.rules_after = survivors.len() as u32;

    let cosmetic_total = cosmetics.generic_hide.len()
        + cosmetics.hide.len()
        + cosmetics.procedural.len()
        + cosmetics.scriptlets.len();
    if survivors.is_empty() && cosmetic_total == 0 {
        return Err(Error::EmptyRuleSet);
    }

    // Rarest-token selection needs global frequencies first.
    let mut token_freq: AHashMap<u32, u32> = AHashMap::new();
    let per_rule_tokens: Vec<Vec<String>> = survivors
        .iter()
        .map(|p| {
            let tokens = candidate_tokens(&p.rule);
            for t in &tokens {
                *token_freq.entry(token_hash(t.as_bytes())).or_insert(0) += 1;
            }
            tokens
        })
        .collect();

    let mut emit = Emitter::default();
    for (p, tokens) in survivors.iter().zip(&per_rule_tokens) {
        emit.emit_rule(p, tokens, &token_freq);
    }

    let psl = if options.psl_text == DEFAULT_PSL {
        PslBuilder::default_sets().clone()
    } else {
        PslBuilder::parse(&options.psl_text)
    };
    let input = emit.finish(psl, &cosmetics, options);

    let snapshot = SnapshotWriter::new().write(&input)?;
    log::info!(
        "compiled {} rules into a {} byte snapshot",
        stats.rules_after,
        snapshot.len()
    );
    Ok(CompileOutput { snapshot, stats })
}

/// Canonical identity of a rule: class, pattern text and canonical options.
/// Used for badfilter folding and duplicate removal.
fn rule_key(rule: &NetworkRule) -> u64 {
    let mut hasher = ahash::AHasher::default();
    hasher.write_u8(rule.exception as u8);
    hasher.write_u8(rule.is_regex as u8);
    hasher.write_u8(rule.host_anchor as u8);
    hasher.write_u8(rule.left_anchor as u8);
    hasher.write_u8(rule.right_anchor as u8);
    hasher.write_u8(rule.elemhide as u8);
    hasher.write_u8(rule.generichide as u8);
    hasher.write(rule.pattern.as_bytes());
    hasher.write_u8(0x1f);
    hasher.write(rule.canonical_options.as_bytes());
    // Synthesized rules carry no canonical option text, so the domain
    // set enters the key directly.
    hasher.write_u8(0x1f);
    for host in &rule.domains_include {
        hasher.write(host.as_bytes());
        hasher.write_u8(b'|');
    }
    for host in &rule.domains_exclude {
        hasher.write_u8(b'~');
        hasher.write(host.as_bytes());
    }
    hasher.finish()
}

fn collect_cosmetic(
    domains: &str,
    marker: CosmeticMarker,
    body: &str,
    acc: &mut CosmeticAcc,
    pending: &mut Vec<Pending>,
    list_id: u16,
) -> std::result::Result<(), SkipReason> {
    let mut include: Vec<String> = Vec::new();
    let mut exclude: Vec<String> = Vec::new();
    for item in domains.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (negated, host) = match item.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, item),
        };
        if host.contains('*') {
            return Err(SkipReason::UnsupportedSyntax);
        }
        let host = normalize_host(host).ok_or(SkipReason::BadDomainOption)?;
        if negated {
            exclude.push(host);
        } else {
            include.push(host);
        }
    }

    let body = body.trim();

    // `example.com#@#generichide` is the cosmetic spelling of the network
    // scope disable; synthesize the equivalent exception rule.
    if marker == CosmeticMarker::Exception
        && matches!(body, "generichide" | "ghide" | "elemhide" | "ehide")
    {
        if include.is_empty() {
            return Err(SkipReason::UnsupportedSyntax);
        }
        let mut rule = NetworkRule {
            exception: true,
            party_mask: PartyMask::all().bits(),
            types: Some(TypeMask::all().bits()),
            domains_include: include,
            ..Default::default()
        };
        match body {
            "elemhide" | "ehide" => rule.elemhide = true,
            _ => rule.generichide = true,
        }
        pending.push(Pending {
            rule,
            kind: PatternKind::MatchAll,
            list_id,
        });
        return Ok(());
    }

    if body.starts_with("+js(") {
        let (name, args) = parse_scriptlet_body(body).ok_or(SkipReason::UnsupportedSyntax)?;
        match marker {
            CosmeticMarker::Exception => {
                if include.is_empty() {
                    if name.is_none() {
                        acc.global_scriptlet_disable = true;
                        return Ok(());
                    }
                    return Err(SkipReason::UnsupportedSyntax);
                }
                for host in include {
                    acc.scriptlets.entry(host).or_default().push((
                        name.clone(),
                        args.join(", "),
                        true,
                    ));
                }
                Ok(())
            }
            CosmeticMarker::Hide => {
                // Scriptlets are hostname-specific only.
                let name = name.ok_or(SkipReason::UnsupportedSyntax)?;
                if include.is_empty() {
                    return Err(SkipReason::UnsupportedSyntax);
                }
                for host in include {
                    acc.scriptlets.entry(host).or_default().push((
                        Some(name.clone()),
                        args.join(", "),
                        false,
                    ));
                }
                Ok(())
            }
            CosmeticMarker::Procedural => Err(SkipReason::UnsupportedSyntax),
        }
    } else {
        match marker {
            CosmeticMarker::Hide => {
                if include.is_empty() {
                    acc.generic_hide.push(body.to_string());
                    // `~host##sel` keeps the selector generic but excepted
                    // on that host.
                    for host in exclude {
                        acc.hide.entry(host).or_default().push((body.to_string(), true));
                    }
                } else {
                    for host in include {
                        acc.hide.entry(host).or_default().push((body.to_string(), false));
                    }
                    // `a.com,~sub.a.com##sel`: excepted on the subdomain.
                    for host in exclude {
                        acc.hide.entry(host).or_default().push((body.to_string(), true));
                    }
                }
                Ok(())
            }
            CosmeticMarker::Exception => {
                if include.is_empty() {
                    acc.generic_exceptions.insert(body.to_string());
                } else {
                    for host in include {
                        acc.hide.entry(host).or_default().push((body.to_string(), true));
                    }
                }
                Ok(())
            }
            CosmeticMarker::Procedural => {
                if include.is_empty() {
                    return Err(SkipReason::UnsupportedSyntax);
                }
                for host in include {
                    acc.procedural
                        .entry(host)
                        .or_default()
                        .push((body.to_string(), false));
                }
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct Emitter {
    interner: Interner,
    rules: Vec<RuleRecord>,
    patterns: Vec<PatternRecord>,
    pattern_ids: AHashMap<(u8, u8, u64, Vec<u8>), u32>,
    constraints: Vec<u8>,
    constraint_ids: AHashMap<Vec<u8>, u32>,
    domain_allow: BTreeMap<u64, Vec<u32>>,
    domain_block: BTreeMap<u64, Vec<u32>>,
    tokens: BTreeMap<u32, Vec<u32>>,
    fallback: Vec<u32>,
    redirects: Vec<(StrRef, StrRef, u8)>,
    redirect_ids: AHashMap<String, u32>,
    removeparams: Vec<(u8, StrRef)>,
    removeparam_ids: AHashMap<(u8, String), u32>,
    csp_specs: Vec<StrRef>,
    csp_ids: AHashMap<String, u32>,
    header_specs: Vec<HeaderSpecRecord>,
    header_ids: AHashMap<(String, Option<String>, bool), u32>,
    responseheader_names: Vec<StrRef>,
    responseheader_ids: AHashMap<String, u32>,
}

impl Emitter {
    fn emit_rule(&mut self, p: &Pending, tokens: &[String], freq: &AHashMap<u32, u32>) {
        let rule = &p.rule;

        let pattern_id = self.pattern_id(p);
        let domain_offset = self.constraint_offset(rule);
        let base_flags = self.base_flags(rule);
        let scheme_mask = scheme_for(rule);
        let party_mask = rule.party_mask;

        let index = self.index_key(p, tokens, freq);

        // `$redirect=` implies a block plus a directive; `$redirect-rule=`
        // is the directive alone.
        if let Some((token, priority)) = &rule.redirect {
            if rule.exception {
                self.push_rule(
                    RuleRecord {
                        action: RuleAction::Allow,
                        flags: base_flags | RuleFlags::REDIRECT_RULE_EXCEPTION,
                        type_mask: rule.types.unwrap_or(TypeMask::DEFAULT_NETWORK.bits()),
                        party_mask,
                        scheme_mask,
                        pattern_id,
                        domain_offset,
                        option_id: NONE_U32,
                        priority: 0,
                        list_id: p.list_id,
                    },
                    &index,
                );
                return;
            }
            if !rule.redirect_rule {
                self.push_rule(
                    RuleRecord {
                        action: RuleAction::Block,
                        flags: base_flags,
                        type_mask: rule.types.unwrap_or(TypeMask::DEFAULT_NETWORK.bits()),
                        party_mask,
                        scheme_mask,
                        pattern_id,
                        domain_offset,
                        option_id: NONE_U32,
                        priority: 0,
                        list_id: p.list_id,
                    },
                    &index,
                );
            }
            let option_id = self.redirect_option(token);
            self.push_rule(
                RuleRecord {
                    action: RuleAction::RedirectDirective,
                    flags: base_flags | RuleFlags::FROM_REDIRECT,
                    type_mask: rule.types.unwrap_or(TypeMask::DEFAULT_NETWORK.bits()),
                    party_mask,
                    scheme_mask,
                    pattern_id,
                    domain_offset,
                    option_id,
                    priority: *priority,
                    list_id: p.list_id,
                },
                &index,
            );
            return;
        }

        let (action, flags, option_id, default_types) = if let Some(spec) = &rule.removeparam {
            if rule.exception {
                let option = match spec {
                    RemoveparamSpec::All => NONE_U32,
                    _ => self.removeparam_option(spec),
                };
                (
                    RuleAction::Allow,
                    base_flags | RuleFlags::REMOVEPARAM_EXCEPTION,
                    option,
                    TypeMask::all(),
                )
            } else {
                (
                    RuleAction::Removeparam,
                    base_flags,
                    self.removeparam_option(spec),
                    TypeMask::all(),
                )
            }
        } else if let Some(csp) = &rule.csp {
            if rule.exception {
                let option = if csp.is_empty() {
                    NONE_U32
                } else {
                    self.csp_option(csp)
                };
                (
                    RuleAction::Allow,
                    base_flags | RuleFlags::CSP_EXCEPTION,
                    option,
                    TypeMask::DOCUMENT,
                )
            } else if csp.is_empty() {
                // An injection needs content.
                return;
            } else {
                (
                    RuleAction::CspInject,
                    base_flags,
                    self.csp_option(csp),
                    TypeMask::DOCUMENT,
                )
            }
        } else if let Some(header) = &rule.header {
            let action = if rule.exception {
                RuleAction::HeaderAllow
            } else {
                RuleAction::HeaderBlock
            };
            let key = (header.name.clone(), header.value.clone(), header.regex);
            let option = if let Some(&id) = self.header_ids.get(&key) {
                id
            } else {
                let id = self.header_specs.len() as u32;
                let name = self.interner.intern(&header.name);
                let value = self.interner.intern(header.value.as_deref().unwrap_or(""));
                let op = if header.regex {
                    headerop::REGEX
                } else if header.value.is_some() {
                    headerop::EQUALS
                } else {
                    headerop::PRESENT
                };
                self.header_specs.push(HeaderSpecRecord { name, value, op });
                self.header_ids.insert(key, id);
                id
            };
            (action, base_flags, option, TypeMask::DOCUMENT)
        } else if let Some(name) = &rule.responseheader {
            let option = if let Some(&id) = self.responseheader_ids.get(name) {
                id
            } else {
                let id = self.responseheader_names.len() as u32;
                let r = self.interner.intern(name);
                self.responseheader_names.push(r);
                self.responseheader_ids.insert(name.clone(), id);
                id
            };
            if rule.exception {
                (
                    RuleAction::Allow,
                    base_flags | RuleFlags::RESPONSEHEADER_EXCEPTION,
                    option,
                    TypeMask::DOCUMENT,
                )
            } else {
                (
                    RuleAction::ResponseHeaderRemove,
                    base_flags,
                    option,
                    TypeMask::DOCUMENT,
                )
            }
        } else if rule.exception {
            let default = if rule.elemhide || rule.generichide {
                TypeMask::all()
            } else {
                TypeMask::DEFAULT_NETWORK
            };
            (RuleAction::Allow, base_flags, NONE_U32, default)
        } else {
            (RuleAction::Block, base_flags, NONE_U32, TypeMask::DEFAULT_NETWORK)
        };

        self.push_rule(
            RuleRecord {
                action,
                flags,
                type_mask: rule.types.unwrap_or(default_types.bits()),
                party_mask,
                scheme_mask,
                pattern_id,
                domain_offset,
                option_id,
                priority: 0,
                list_id: p.list_id,
            },
            &index,
        );
    }

    fn base_flags(&self, rule: &NetworkRule) -> RuleFlags {
        let mut flags = RuleFlags::empty();
        if rule.important && !rule.exception {
            flags |= RuleFlags::IMPORTANT;
        }
        if rule.is_regex {
            flags |= RuleFlags::IS_REGEX;
        }
        if rule.match_case {
            flags |= RuleFlags::MATCH_CASE;
        }
        if rule.left_anchor {
            flags |= RuleFlags::LEFT_ANCHOR;
        }
        if rule.right_anchor {
            flags |= RuleFlags::RIGHT_ANCHOR;
        }
        if rule.host_anchor {
            flags |= RuleFlags::HOST_ANCHOR;
        }
        if rule.elemhide {
            flags |= RuleFlags::ELEMHIDE;
        }
        if rule.generichide {
            flags |= RuleFlags::GENERICHIDE;
        }
        flags
    }

    fn pattern_id(&mut self, p: &Pending) -> u32 {
        let flags = if p.rule.match_case { PATTERN_MATCH_CASE } else { 0 };
        let (ops, anchor_kind, anchor_hash) = match &p.kind {
            PatternKind::MatchAll => return NONE_U32,
            PatternKind::HostOnly { host } => {
                (vec![op::HOST_ANCHOR, op::DONE], anchor::HOST, hash64(host))
            }
            PatternKind::Regex(source) => {
                let r = self.interner.intern(source);
                let mut ops = Vec::with_capacity(8);
                ops.extend_from_slice(&r.0.to_le_bytes());
                ops.extend_from_slice(&r.1.to_le_bytes());
                (ops, anchor::REGEX, 0)
            }
            PatternKind::Program(program) => {
                let mut ops = Vec::new();
                for o in &program.ops {
                    match o {
                        Op::FindLit(lit) => {
                            let r = self.interner.intern(lit);
                            ops.push(op::FIND_LIT);
                            ops.extend_from_slice(&r.0.to_le_bytes());
                            ops.extend_from_slice(&r.1.to_le_bytes());
                        }
                        Op::AssertStart => ops.push(op::ASSERT_START),
                        Op::AssertEnd => ops.push(op::ASSERT_END),
                        Op::AssertBoundary => ops.push(op::ASSERT_BOUNDARY),
                        Op::SkipAny => ops.push(op::SKIP_ANY),
                        Op::HostAnchor => ops.push(op::HOST_ANCHOR),
                    }
                }
                ops.push(op::DONE);
                let hash = program.anchor_host.as_deref().map(hash64).unwrap_or(0);
                (ops, program.anchor, hash)
            }
        };

        let key = (anchor_kind, flags, anchor_hash, ops);
        if let Some(&id) = self.pattern_ids.get(&key) {
            return id;
        }
        let id = self.patterns.len() as u32;
        self.patterns.push(PatternRecord {
            ops: key.3.clone(),
            anchor: anchor_kind,
            flags,
            anchor_hash,
        });
        self.pattern_ids.insert(key, id);
        id
    }

    fn constraint_offset(&mut self, rule: &NetworkRule) -> u32 {
        if rule.domains_include.is_empty() && rule.domains_exclude.is_empty() {
            return NONE_U32;
        }
        let mut record = Vec::with_capacity(
            4 + (rule.domains_include.len() + rule.domains_exclude.len()) * 8,
        );
        record.extend_from_slice(&(rule.domains_include.len() as u16).to_le_bytes());
        record.extend_from_slice(&(rule.domains_exclude.len() as u16).to_le_bytes());
        for host in &rule.domains_include {
            record.extend_from_slice(&hash64(host).to_le_bytes());
        }
        for host in &rule.domains_exclude {
            record.extend_from_slice(&hash64(host).to_le_bytes());
        }

        if let Some(&off) = self.constraint_ids.get(&record) {
            return off;
        }
        let off = self.constraints.len() as u32;
        self.constraints.extend_from_slice(&record);
        self.constraint_ids.insert(record, off);
        off
    }

    fn redirect_option(&mut self, token: &str) -> u32 {
        if let Some(&id) = self.redirect_ids.get(token) {
            return id;
        }
        let entry = REDIRECT_CATALOG
            .iter()
            .find(|(name, _, _)| *name == token)
            .map(|&(name, path, kind)| (name.to_string(), path.to_string(), kind))
            .or_else(|| {
                // Fully-qualified targets pass through untouched.
                (token.starts_with("http://") || token.starts_with("https://"))
                    .then(|| (token.to_string(), token.to_string(), mime::EMPTY))
            });
        match entry {
            Some((name, path, kind)) => {
                let id = self.redirects.len() as u32;
                let token_ref = self.interner.intern(&name);
                let path_ref = self.interner.intern(&path);
                self.redirects.push((token_ref, path_ref, kind));
                self.redirect_ids.insert(name, id);
                id
            }
            None => {
                log::debug!("unknown redirect resource: {}", token);
                NONE_U32
            }
        }
    }

    fn removeparam_option(&mut self, spec: &RemoveparamSpec) -> u32 {
        let (kind, text) = match spec {
            RemoveparamSpec::All => (rp::ALL, String::new()),
            RemoveparamSpec::Exact(name) => (rp::EXACT, name.clone()),
            RemoveparamSpec::Regex(source) => (rp::REGEX, source.clone()),
        };
        let key = (kind, text);
        if let Some(&id) = self.removeparam_ids.get(&key) {
            return id;
        }
        let id = self.removeparams.len() as u32;
        let r = self.interner.intern(&key.1);
        self.removeparams.push((kind, r));
        self.removeparam_ids.insert(key, id);
        id
    }

    fn csp_option(&mut self, directive: &str) -> u32 {
        if let Some(&id) = self.csp_ids.get(directive) {
            return id;
        }
        let id = self.csp_specs.len() as u32;
        let r = self.interner.intern(directive);
        self.csp_specs.push(r);
        self.csp_ids.insert(directive.to_string(), id);
        id
    }

    fn index_key(&self, p: &Pending, tokens: &[String], freq: &AHashMap<u32, u32>) -> IndexKey {
        match &p.kind {
            PatternKind::HostOnly { host } => IndexKey::Domain(vec![hash64(host)]),
            _ => {
                // Rarest usable token wins; ties go to the first seen.
                let best = tokens
                    .iter()
                    .map(|t| token_hash(t.as_bytes()))
                    .min_by_key(|h| freq.get(h).copied().unwrap_or(0));
                if let Some(token) = best {
                    return IndexKey::Token(token);
                }
                if let PatternKind::Program(program) = &p.kind {
                    if let Some(host) = &program.anchor_host {
                        return IndexKey::Domain(vec![hash64(host)]);
                    }
                }
                if !p.rule.domains_include.is_empty() {
                    return IndexKey::Domain(
                        p.rule.domains_include.iter().map(|d| hash64(d)).collect(),
                    );
                }
                IndexKey::Fallback
            }
        }
    }

    fn push_rule(&mut self, record: RuleRecord, index: &IndexKey) {
        let id = self.rules.len() as u32;
        let allow_class = record.action.is_allow_class();
        self.rules.push(record);
        match index {
            IndexKey::Domain(hashes) => {
                let table = if allow_class {
                    &mut self.domain_allow
                } else {
                    &mut self.domain_block
                };
                for &hash in hashes {
                    table.entry(hash).or_default().push(id);
                }
            }
            IndexKey::Token(token) => {
                self.tokens.entry(*token).or_default().push(id);
            }
            IndexKey::Fallback => self.fallback.push(id),
        }
    }

    fn finish(
        mut self,
        psl: PslBuilder,
        cosmetics: &CosmeticAcc,
        options: &CompileOptions,
    ) -> SnapshotInput {
        let mut input = SnapshotInput::default();

        // Generic selectors minus compile-time exceptions, original order.
        let mut seen: AHashSet<&str> = AHashSet::new();
        for selector in &cosmetics.generic_hide {
            if cosmetics.generic_exceptions.contains(selector) || !seen.insert(selector) {
                continue;
            }
            let r = self.interner.intern(selector);
            input.cosmetic.generic.push(r);
        }

        for (host, records) in &cosmetics.hide {
            let first = input.cosmetic.entries.len() as u32;
            for (body, exception) in records {
                let r = self.interner.intern(body);
                let flags = if *exception {
                    crate::snapshot::format::COSMETIC_EXCEPTION
                } else {
                    0
                };
                input.cosmetic.entries.push((r, flags));
            }
            input.cosmetic.hosts.push(HostRange {
                hash: hash64(host),
                first,
                count: records.len() as u32,
            });
        }

        for (host, records) in &cosmetics.procedural {
            let first = input.procedural.entries.len() as u32;
            for (body, exception) in records {
                let r = self.interner.intern(body);
                let flags = if *exception {
                    crate::snapshot::format::COSMETIC_EXCEPTION
                } else {
                    0
                };
                input.procedural.entries.push((r, flags));
            }
            input.procedural.hosts.push(HostRange {
                hash: hash64(host),
                first,
                count: records.len() as u32,
            });
        }

        input.scriptlet.global_disable = cosmetics.global_scriptlet_disable;
        for (host, records) in &cosmetics.scriptlets {
            let first = input.scriptlet.entries.len() as u32;
            for (name, args, exception) in records {
                let mut flags = 0;
                if *exception {
                    flags |= crate::snapshot::format::SCRIPTLET_EXCEPTION;
                }
                if name.is_none() {
                    flags |= crate::snapshot::format::SCRIPTLET_DISABLE_ALL;
                }
                let name_ref = self.interner.intern(name.as_deref().unwrap_or(""));
                let args_ref = self.interner.intern(args);
                input.scriptlet.entries.push((name_ref, args_ref, flags));
            }
            input.scriptlet.hosts.push(HostRange {
                hash: hash64(host),
                first,
                count: records.len() as u32,
            });
        }

        input.strpool = self.interner.pool;
        input.psl_exact = psl.exact;
        input.psl_wildcard = psl.wildcard;
        input.psl_exception = psl.exception;
        input.rules = self.rules;
        input.patterns = self.patterns;
        input.domain_allow = self.domain_allow.into_iter().collect();
        input.domain_block = self.domain_block.into_iter().collect();
        input.tokens = self.tokens.into_iter().collect();
        input.fallback = self.fallback;
        input.constraints = self.constraints;
        input.redirects = self.redirects;
        input.removeparams = self.removeparams;
        input.csp_specs = self.csp_specs;
        input.header_specs = self.header_specs;
        input.responseheader_names = self.responseheader_names;
        input.build_id = options.build_id;
        input.with_crc = options.with_crc;
        input
    }
}

fn scheme_for(rule: &NetworkRule) -> u8 {
    match rule.types {
        Some(types) if types == TypeMask::WEBSOCKET.bits() => {
            (SchemeMask::WS | SchemeMask::WSS).bits()
        }
        _ => SchemeMask::all().bits(),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{compile_filter_lists, Compiler, CompileOptions};
    use crate::error::Error;
    use crate::snapshot::Snapshot;

    #[test]
    fn test_compile_small_list() {
        let list = "\
! title: test list\n\
||doubleclick.net^\n\
@@||news.example.com^$document\n\
||googletagmanager.com/gtm.js$script,redirect=noop.js\n\
*$removeparam=gclid\n\
##.ad\n\
example.com##.site-ad\n\
0.0.0.0 tracker.hosts.test\n";
        let out = compile_filter_lists(&[list]).unwrap();
        assert_eq!(out.stats.per_list.len(), 1);
        assert_eq!(out.stats.per_list[0].rules_before, 7);
        assert!(out.stats.rules_after >= 4);

        let snapshot = Snapshot::load(out.snapshot).unwrap();
        // redirect= contributes a block and a directive rule.
        assert!(snapshot.rule_count() >= 5);
        assert_eq!(snapshot.cosmetic_generic_count(), 1);
    }

    #[test]
    fn test_compile_deterministic() {
        let lists = ["||ads.test^\n||track.test^$script\nexample.com##.ad\n"];
        let a = compile_filter_lists(&lists).unwrap();
        let b = compile_filter_lists(&lists).unwrap();
        assert_eq!(a.snapshot, b.snapshot);
    }

    #[test]
    fn test_badfilter_folding() {
        let list = "||ads.test^$script\n||ads.test^$script,badfilter\n||other.test^\n";
        let out = compile_filter_lists(&[list]).unwrap();
        assert_eq!(out.stats.badfilter_rules, 1);
        assert_eq!(out.stats.badfiltered_rules, 1);
        assert_eq!(out.stats.rules_after, 1);
    }

    #[test]
    fn test_duplicate_removal() {
        let out =
            compile_filter_lists(&["||dup.test^\n||dup.test^\n", "||dup.test^\n"]).unwrap();
        assert_eq!(out.stats.rules_deduped, 2);
        assert_eq!(out.stats.rules_after, 1);
    }

    #[test]
    fn test_unknown_option_counted() {
        let out = compile_filter_lists(&["||x.test^$ppapi\n||ok.test^\n"]).unwrap();
        assert_eq!(out.stats.skipped.get("unknown-option"), Some(&1));
        assert_eq!(out.stats.rules_after, 1);
    }

    #[test]
    fn test_empty_compile_fails() {
        assert!(matches!(
            compile_filter_lists(&["! nothing here\n"]),
            Err(Error::EmptyRuleSet)
        ));
    }

    #[test]
    fn test_list_size_limit() {
        let options = CompileOptions {
            max_list_bytes: 16,
            ..Default::default()
        };
        let compiler = Compiler::new(options);
        assert!(matches!(
            compiler.compile(&["||very-long-rule-list.test^\n"]),
            Err(Error::ListTooLarge(0))
        ));
    }
}
