//! Response-header pipeline: header-based block/allow, safe header
//! removal and CSP injection. Only document responses are evaluated.

use super::network::{gather, Buckets};
use super::Engine;
use crate::decision::HeaderOutcome;
use crate::request::RequestContext;
use crate::snapshot::format::NONE_U32;

/// Headers that `$responseheader=` may strip. Content-Security-Policy is
/// never removable.
const SAFE_REMOVABLE: &[&str] = &["location", "refresh", "report-to", "set-cookie"];

#[allow(clippy::too_many_arguments)]
pub(super) fn match_response_headers(
    engine: &Engine,
    url: &str,
    type_name: &str,
    initiator: Option<&str>,
    tab_id: i32,
    frame_id: i32,
    request_id: u64,
    headers: &[(&str, &str)],
) -> HeaderOutcome {
    let guard = engine.snapshot();
    let Some(snapshot) = guard.as_deref() else {
        return HeaderOutcome::default();
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
        return HeaderOutcome::default();
    };

    // Document gate.
    if !ctx.is_document() {
        return HeaderOutcome::default();
    }
    if engine.is_trusted(ctx.doc_etld1) {
        return HeaderOutcome::default();
    }

    let mut scratch = engine.scratch();
    let mut buckets = Buckets::default();
    gather(snapshot, &ctx, &mut scratch, Some(headers), &mut buckets);
    drop(scratch);

    // Same ladder as the request pipeline, over header-match rules.
    let (cancel, deciding) = if let Some(id) = buckets.header_important.id() {
        (true, Some(id))
    } else if let Some(id) = buckets.header_allow.id() {
        (false, Some(id))
    } else if let Some(id) = buckets.header_block.id() {
        (true, Some(id))
    } else {
        (false, None)
    };

    let mut outcome = HeaderOutcome {
        cancel,
        rule_id: deciding,
        list_id: deciding.map(|id| snapshot.rule_list_id(id)),
        csp: Vec::new(),
        remove_headers: Vec::new(),
    };
    if cancel {
        return outcome;
    }

    // Header removal, restricted to the safe allowlist and to headers
    // actually present. Exceptions disable removal of their named header.
    let mut excepted_names: Vec<&str> = Vec::new();
    for &id in &buckets.responseheader_exceptions {
        if let Some(name) = snapshot.responseheader_name(snapshot.rule_option_id(id)) {
            excepted_names.push(name);
        }
    }
    for &id in &buckets.responseheader_rules {
        let option = snapshot.rule_option_id(id);
        let Some(name) = snapshot.responseheader_name(option) else {
            continue;
        };
        if !SAFE_REMOVABLE.contains(&name) || excepted_names.contains(&name) {
            continue;
        }
        if !headers.iter().any(|(h, _)| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        if !outcome.remove_headers.iter().any(|n| n == name) {
            outcome.remove_headers.push(name.to_string());
        }
        if outcome.rule_id.is_none() {
            outcome.rule_id = Some(id);
            outcome.list_id = Some(snapshot.rule_list_id(id));
        }
    }

    // CSP injection. An empty-content exception disables everything for
    // this scope; a specific exception removes only its directive.
    let mut disable_all_csp = false;
    let mut excepted: Vec<&str> = Vec::new();
    for &id in &buckets.csp_exceptions {
        let option = snapshot.rule_option_id(id);
        if option == NONE_U32 {
            disable_all_csp = true;
            break;
        }
        if let Some(directive) = snapshot.csp_spec(option) {
            excepted.push(directive);
        }
    }
    if !disable_all_csp {
        for &id in &buckets.csp_rules {
            let Some(directive) = snapshot.csp_spec(snapshot.rule_option_id(id)) else {
                continue;
            };
            if excepted.contains(&directive) {
                continue;
            }
            if !outcome.csp.iter().any(|d| d == directive) {
                outcome.csp.push(directive.to_string());
            }
            if outcome.rule_id.is_none() {
                outcome.rule_id = Some(id);
                outcome.list_id = Some(snapshot.rule_list_id(id));
            }
        }
    }

    outcome
}
