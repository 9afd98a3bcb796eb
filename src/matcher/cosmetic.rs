//! Cosmetic resolution: hide selectors, procedural programs and scriptlet
//! invocations for a document.

use super::network::{gather, Buckets};
use super::Engine;
use crate::decision::{CosmeticOutcome, Scriptlet};
use crate::request::RequestContext;
use crate::snapshot::format::{
    COSMETIC_EXCEPTION, SCRIPTLET_DISABLE_ALL, SCRIPTLET_EXCEPTION,
};
use crate::snapshot::Snapshot;

pub(super) fn match_cosmetics(
    engine: &Engine,
    url: &str,
    type_name: &str,
    initiator: Option<&str>,
    tab_id: i32,
    frame_id: i32,
    request_id: u64,
) -> CosmeticOutcome {
    let guard = engine.snapshot();
    let Some(snapshot) = guard.as_deref() else {
        return CosmeticOutcome {
            enable_generic: true,
            ..Default::default()
        };
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
        return CosmeticOutcome {
            enable_generic: true,
            ..Default::default()
        };
    };

    // Scope disables come from exception rules matching the document.
    let mut scratch = engine.scratch();
    let mut buckets = Buckets::default();
    gather(snapshot, &ctx, &mut scratch, None, &mut buckets);
    let doc_suffixes = scratch.doc_suffixes.clone();
    drop(scratch);

    let trusted = engine.is_trusted(ctx.doc_etld1);
    let elemhide = trusted || buckets.elemhide;
    let enable_generic = !elemhide && !buckets.generichide;

    let mut outcome = CosmeticOutcome {
        enable_generic,
        ..Default::default()
    };

    if !elemhide {
        let mut hide: Vec<&str> = Vec::new();
        let mut exceptions: Vec<&str> = Vec::new();
        for &hash in &doc_suffixes {
            if let Some((first, count)) = snapshot.cosmetic_host_range(hash) {
                for i in first..first + count {
                    if let Some((selector, flags)) = snapshot.cosmetic_entry(i) {
                        if flags & COSMETIC_EXCEPTION != 0 {
                            exceptions.push(selector);
                        } else {
                            hide.push(selector);
                        }
                    }
                }
            }
        }
        if enable_generic {
            for i in 0..snapshot.cosmetic_generic_count() {
                if let Some(selector) = snapshot.cosmetic_generic(i) {
                    hide.push(selector);
                }
            }
        }

        let mut selectors: Vec<&str> = Vec::new();
        for selector in hide {
            if !exceptions.contains(&selector) && !selectors.contains(&selector) {
                selectors.push(selector);
            }
        }
        if !selectors.is_empty() {
            outcome.css = format!("{} {{display:none!important;}}", selectors.join(",\n"));
        }

        outcome.procedural = resolve_procedural(snapshot, &doc_suffixes);
    }

    if !trusted {
        outcome.scriptlets = resolve_scriptlets(snapshot, &doc_suffixes);
    }
    outcome
}

fn resolve_procedural(snapshot: &Snapshot, doc_suffixes: &[u64]) -> Vec<String> {
    let mut programs: Vec<&str> = Vec::new();
    let mut exceptions: Vec<&str> = Vec::new();
    for &hash in doc_suffixes {
        if let Some((first, count)) = snapshot.procedural_host_range(hash) {
            for i in first..first + count {
                if let Some((body, flags)) = snapshot.procedural_entry(i) {
                    if flags & COSMETIC_EXCEPTION != 0 {
                        exceptions.push(body);
                    } else {
                        programs.push(body);
                    }
                }
            }
        }
    }
    programs
        .into_iter()
        .filter(|p| !exceptions.contains(p))
        .map(str::to_string)
        .collect()
}

fn resolve_scriptlets(snapshot: &Snapshot, doc_suffixes: &[u64]) -> Vec<Scriptlet> {
    // A global `#@#+js()` turns injection off everywhere.
    if snapshot.scriptlet_global_disable() {
        return Vec::new();
    }

    let mut invocations: Vec<(&str, &str)> = Vec::new();
    let mut disabled_names: Vec<&str> = Vec::new();
    let mut disable_all = false;
    for &hash in doc_suffixes {
        if let Some((first, count)) = snapshot.scriptlet_host_range(hash) {
            for i in first..first + count {
                let Some((name, args, flags)) = snapshot.scriptlet_entry(i) else {
                    continue;
                };
                if flags & SCRIPTLET_DISABLE_ALL != 0 {
                    disable_all = true;
                } else if flags & SCRIPTLET_EXCEPTION != 0 {
                    disabled_names.push(name);
                } else {
                    invocations.push((name, args));
                }
            }
        }
    }
    if disable_all {
        return Vec::new();
    }

    let mut out: Vec<Scriptlet> = Vec::new();
    for (name, args) in invocations {
        if disabled_names.contains(&name) {
            continue;
        }
        let scriptlet = Scriptlet {
            name: name.to_string(),
            args: if args.is_empty() {
                Vec::new()
            } else {
                args.split(',').map(|a| a.trim().to_string()).collect()
            },
        };
        if !out.contains(&scriptlet) {
            out.push(scriptlet);
        }
    }
    out
}
