//! Network request pipeline: candidate gathering, verification, the
//! precedence ladder and redirect/removeparam resolution.

use super::pattern::pattern_matches;
use super::{Engine, MatrixVerdict, Scratch};
use crate::decision::{Decision, MatchOutcome};
use crate::hash::suffix_hashes;
use crate::request::RequestContext;
use crate::snapshot::format::{headerop, removeparam as rp, RuleAction, RuleFlags, NONE_U32};
use crate::snapshot::Snapshot;
use crate::url::{param_name, strip_query_params, tokenize};

/// Allow-rule flags that scope the rule to a modifier; such rules do not
/// participate in the plain ALLOW ladder.
const MODIFIER_EXCEPTIONS: RuleFlags = RuleFlags::CSP_EXCEPTION
    .union(RuleFlags::REDIRECT_RULE_EXCEPTION)
    .union(RuleFlags::REMOVEPARAM_EXCEPTION)
    .union(RuleFlags::RESPONSEHEADER_EXCEPTION)
    .union(RuleFlags::ELEMHIDE)
    .union(RuleFlags::GENERICHIDE);

/// Best candidate of one class: highest priority, then lowest rule id.
#[derive(Default, Clone, Copy)]
pub(super) struct Best(Option<(i16, u32)>);

impl Best {
    fn offer(&mut self, priority: i16, id: u32) {
        match self.0 {
            Some((p, i)) if (priority, std::cmp::Reverse(id)) <= (p, std::cmp::Reverse(i)) => {}
            _ => self.0 = Some((priority, id)),
        }
    }

    pub(super) fn id(&self) -> Option<u32> {
        self.0.map(|(_, id)| id)
    }

    fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

/// Verified candidates of one gather pass, partitioned by effect.
#[derive(Default)]
pub(super) struct Buckets {
    pub important_block: Best,
    pub allow: Best,
    pub block: Best,
    pub removeparam_rules: Vec<u32>,
    pub removeparam_exceptions: Vec<u32>,
    pub redirect_dirs: Vec<u32>,
    pub redirect_exception: bool,
    pub header_important: Best,
    pub header_allow: Best,
    pub header_block: Best,
    pub responseheader_rules: Vec<u32>,
    pub responseheader_exceptions: Vec<u32>,
    pub csp_rules: Vec<u32>,
    pub csp_exceptions: Vec<u32>,
    pub elemhide: bool,
    pub generichide: bool,
}

impl Buckets {
    fn ladder_empty(&self) -> bool {
        self.important_block.is_none()
            && self.allow.is_none()
            && self.block.is_none()
            && self.header_important.is_none()
            && self.header_allow.is_none()
            && self.header_block.is_none()
    }
}

/// Gather and verify candidates for the request into `buckets`.
///
/// `headers` enables header-spec verification for the response pipeline;
/// without it, header-action rules are ignored.
pub(super) fn gather(
    snapshot: &Snapshot,
    ctx: &RequestContext<'_>,
    scratch: &mut Scratch,
    headers: Option<&[(&str, &str)]>,
    buckets: &mut Buckets,
) {
    suffix_hashes(ctx.req_host, ctx.req_etld1.len(), &mut scratch.req_suffixes);
    suffix_hashes(ctx.doc_host, ctx.doc_etld1.len(), &mut scratch.doc_suffixes);
    tokenize(ctx.url, ctx.view.scheme_end + 3, &mut scratch.tokens);

    scratch.candidates.clear();

    // Domain tables, probed with both the request-host walk (host-anchored
    // rules) and the document-host walk (`$domain=`-indexed rules).
    for allow in [true, false] {
        for &hash in scratch.req_suffixes.iter().chain(&scratch.doc_suffixes) {
            if let Some((off, count)) = snapshot.domain_lookup(allow, hash) {
                snapshot.decode_postings(off, count, &mut scratch.candidates);
            }
        }
    }

    // Rarest token: decode only the smallest posting list.
    let mut rarest: Option<(u32, u32)> = None;
    for &token in &scratch.tokens {
        if let Some((off, count)) = snapshot.token_lookup(token) {
            if rarest.map_or(true, |(_, best)| count < best) {
                rarest = Some((off, count));
            }
        }
    }
    if let Some((off, count)) = rarest {
        snapshot.decode_postings(off, count, &mut scratch.candidates);
    }

    scratch.candidates.sort_unstable();
    scratch.candidates.dedup();

    let candidates = std::mem::take(&mut scratch.candidates);
    for &id in &candidates {
        if verify(snapshot, ctx, scratch, headers, id) {
            classify(snapshot, id, buckets, true);
        }
    }
    scratch.candidates = candidates;

    // The fallback bucket holds the few rules with no usable index key.
    // Its block/allow candidates only apply when nothing indexed fired;
    // modifier rules (removeparam and friends) always apply.
    let ladder_open = buckets.ladder_empty();
    let (off, count) = snapshot.fallback_postings();
    scratch.postings.clear();
    snapshot.decode_postings(off, count, &mut scratch.postings);
    let fallback = std::mem::take(&mut scratch.postings);
    for &id in &fallback {
        if verify(snapshot, ctx, scratch, headers, id) {
            classify(snapshot, id, buckets, ladder_open);
        }
    }
    scratch.postings = fallback;
}

fn verify(
    snapshot: &Snapshot,
    ctx: &RequestContext<'_>,
    scratch: &Scratch,
    headers: Option<&[(&str, &str)]>,
    id: u32,
) -> bool {
    if snapshot.rule_type_mask(id) & ctx.type_bit.bits() == 0 {
        return false;
    }
    if snapshot.rule_party_mask(id) & ctx.party_bit.bits() == 0 {
        return false;
    }
    if snapshot.rule_scheme_mask(id) & ctx.scheme_bit.bits() == 0 {
        return false;
    }
    if !snapshot.domain_constraint_ok(snapshot.rule_domain_offset(id), &scratch.doc_suffixes) {
        return false;
    }

    match snapshot.rule_action(id) {
        RuleAction::HeaderBlock | RuleAction::HeaderAllow => match headers {
            Some(headers) => {
                if !header_spec_matches(snapshot, snapshot.rule_option_id(id), headers) {
                    return false;
                }
            }
            None => return false,
        },
        RuleAction::CspInject | RuleAction::ResponseHeaderRemove if headers.is_none() => {
            return false;
        }
        _ => {}
    }

    pattern_matches(
        snapshot,
        snapshot.rule_pattern_id(id),
        ctx.url,
        &ctx.view,
        &scratch.req_suffixes,
    )
}

fn classify(snapshot: &Snapshot, id: u32, buckets: &mut Buckets, ladder_open: bool) {
    let flags = snapshot.rule_flags(id);
    let priority = snapshot.rule_priority(id);
    match snapshot.rule_action(id) {
        RuleAction::Allow => {
            if flags.contains(RuleFlags::REDIRECT_RULE_EXCEPTION) {
                buckets.redirect_exception = true;
            }
            if flags.contains(RuleFlags::REMOVEPARAM_EXCEPTION) {
                buckets.removeparam_exceptions.push(id);
            }
            if flags.contains(RuleFlags::CSP_EXCEPTION) {
                buckets.csp_exceptions.push(id);
            }
            if flags.contains(RuleFlags::RESPONSEHEADER_EXCEPTION) {
                buckets.responseheader_exceptions.push(id);
            }
            if flags.contains(RuleFlags::ELEMHIDE) {
                buckets.elemhide = true;
            }
            if flags.contains(RuleFlags::GENERICHIDE) {
                buckets.generichide = true;
            }
            if ladder_open && !flags.intersects(MODIFIER_EXCEPTIONS) {
                buckets.allow.offer(priority, id);
            }
        }
        RuleAction::Block => {
            if ladder_open {
                if flags.contains(RuleFlags::IMPORTANT) {
                    buckets.important_block.offer(priority, id);
                } else {
                    buckets.block.offer(priority, id);
                }
            }
        }
        RuleAction::RedirectDirective => buckets.redirect_dirs.push(id),
        RuleAction::Removeparam => buckets.removeparam_rules.push(id),
        RuleAction::CspInject => buckets.csp_rules.push(id),
        RuleAction::HeaderBlock => {
            if flags.contains(RuleFlags::IMPORTANT) {
                buckets.header_important.offer(priority, id);
            } else {
                buckets.header_block.offer(priority, id);
            }
        }
        RuleAction::HeaderAllow => buckets.header_allow.offer(priority, id),
        RuleAction::ResponseHeaderRemove => buckets.responseheader_rules.push(id),
    }
}

pub(super) fn header_spec_matches(
    snapshot: &Snapshot,
    option_id: u32,
    headers: &[(&str, &str)],
) -> bool {
    let Some((name, value, op)) = snapshot.header_spec(option_id) else {
        return false;
    };
    for (header_name, header_value) in headers {
        if !header_name.eq_ignore_ascii_case(name) {
            continue;
        }
        let matched = match op {
            headerop::PRESENT => true,
            headerop::EQUALS => *header_value == value,
            headerop::REGEX => snapshot
                .header_regex(option_id)
                .map(|re| re.is_match(header_value))
                .unwrap_or(false),
            _ => false,
        };
        if matched {
            return true;
        }
    }
    false
}

/// The full `match_request` pipeline, stages A0 through A4.
pub(super) fn match_request(
    engine: &Engine,
    url: &str,
    type_name: &str,
    initiator: Option<&str>,
    tab_id: i32,
    frame_id: i32,
    request_id: u64,
) -> MatchOutcome {
    let guard = engine.snapshot();
    let Some(snapshot) = guard.as_deref() else {
        return MatchOutcome::allow();
    };
    let psl = snapshot.psl();
    let Some(ctx) = RequestContext::derive(
        url,
        type_name,
        initiator,
        tab_id,
        frame_id,
        request_id,
        |h| psl.etld1(h),
    ) else {
        return MatchOutcome::allow();
    };

    // A0: trusted-site bypass.
    if engine.is_trusted(ctx.doc_etld1) {
        return MatchOutcome::allow();
    }

    // A1: dynamic-filtering matrix. A broad BLOCK verdict must never
    // cancel a top-level document load.
    match engine.dynamic_verdict(&ctx) {
        MatrixVerdict::Allow => return MatchOutcome::allow(),
        MatrixVerdict::Block if !ctx.type_bit.contains(crate::request::TypeMask::MAIN_FRAME) => {
            return MatchOutcome {
                decision: Decision::Block,
                ..Default::default()
            };
        }
        _ => {}
    }

    if let Some(hit) = engine.cache_lookup(&ctx) {
        return hit;
    }

    let mut scratch = engine.scratch();
    let mut buckets = Buckets::default();
    gather(snapshot, &ctx, &mut scratch, None, &mut buckets);

    // A2: removeparam.
    if let Some(outcome) = apply_removeparam(engine, snapshot, &ctx, &buckets) {
        return outcome;
    }

    // A3: static precedence ladder.
    let (blocked, deciding) = if let Some(id) = buckets.important_block.id() {
        (true, Some(id))
    } else if let Some(id) = buckets.allow.id() {
        (false, Some(id))
    } else if let Some(id) = buckets.block.id() {
        (true, Some(id))
    } else {
        (false, None)
    };

    let outcome = if blocked {
        let rule_id = deciding.unwrap_or(NONE_U32);
        // A4: redirect resolution, only on a BLOCK outcome.
        resolve_redirect(snapshot, &buckets, rule_id)
    } else {
        MatchOutcome {
            decision: Decision::Allow,
            rule_id: deciding,
            list_id: deciding.map(|id| snapshot.rule_list_id(id)),
            redirect_url: None,
        }
    };

    engine.cache_store(&ctx, &outcome);
    outcome
}

fn resolve_redirect(snapshot: &Snapshot, buckets: &Buckets, block_rule: u32) -> MatchOutcome {
    let blocked = MatchOutcome::block(block_rule, snapshot.rule_list_id(block_rule));
    if buckets.redirect_exception || buckets.redirect_dirs.is_empty() {
        return blocked;
    }

    // Highest priority first, then stable rule-id order.
    let mut dirs: Vec<u32> = buckets.redirect_dirs.clone();
    dirs.sort_unstable_by_key(|&id| (std::cmp::Reverse(snapshot.rule_priority(id)), id));
    for id in dirs {
        let option = snapshot.rule_option_id(id);
        if option == NONE_U32 {
            continue;
        }
        if let Some((_, path, _)) = snapshot.redirect_resource(option) {
            return MatchOutcome {
                decision: Decision::Redirect,
                rule_id: Some(id),
                list_id: Some(snapshot.rule_list_id(id)),
                redirect_url: Some(path.to_string()),
            };
        }
    }
    // No resolvable surrogate: fall back to cancel.
    blocked
}

fn apply_removeparam(
    engine: &Engine,
    snapshot: &Snapshot,
    ctx: &RequestContext<'_>,
    buckets: &Buckets,
) -> Option<MatchOutcome> {
    if buckets.removeparam_rules.is_empty() {
        return None;
    }

    // An exception without a spec disables all parameter removal here.
    let mut excepted: Vec<u32> = Vec::new();
    for &id in &buckets.removeparam_exceptions {
        let option = snapshot.rule_option_id(id);
        if option == NONE_U32 {
            return None;
        }
        excepted.push(option);
    }

    let mut specs: Vec<u32> = Vec::new();
    let mut first_rule: Option<u32> = None;
    for &id in &buckets.removeparam_rules {
        let option = snapshot.rule_option_id(id);
        if option == NONE_U32 || excepted.contains(&option) {
            continue;
        }
        specs.push(option);
        first_rule.get_or_insert(id);
    }
    if specs.is_empty() {
        return None;
    }

    let sanitized = strip_query_params(ctx.url, |param| {
        specs
            .iter()
            .any(|&spec| removeparam_spec_matches(snapshot, spec, param))
    })?;

    // Loop guard: a second hit on the same (tab, frame, URL) within the
    // TTL answers ALLOW instead of re-redirecting.
    if engine.removeparam_suppressed(ctx) {
        return Some(MatchOutcome::allow());
    }

    let rule_id = first_rule?;
    Some(MatchOutcome {
        decision: Decision::Removeparam,
        rule_id: Some(rule_id),
        list_id: Some(snapshot.rule_list_id(rule_id)),
        redirect_url: Some(sanitized),
    })
}

fn removeparam_spec_matches(snapshot: &Snapshot, spec_id: u32, param: &str) -> bool {
    let Some((kind, spec)) = snapshot.removeparam_spec(spec_id) else {
        return false;
    };
    match kind {
        rp::ALL => true,
        rp::EXACT => param_name(param) == spec,
        rp::REGEX => snapshot
            .removeparam_regex(spec_id)
            .map(|re| re.is_match(param))
            .unwrap_or(false),
        _ => false,
    }
}
