//! End-to-end scenarios: compile real filter text, load the snapshot,
//! and drive the engine through the public API.

use ubx::{compile_filter_lists, Decision, Engine};

fn engine_with(lists: &[&str]) -> Engine {
    let out = compile_filter_lists(lists).expect("compile");
    let engine = Engine::new();
    engine.init(out.snapshot).expect("init");
    engine
}

#[test]
fn test_pure_block_on_hostname() {
    let engine = engine_with(&["||doubleclick.net^\n"]);
    let outcome = engine.match_request(
        "https://ads.doubleclick.net/pixel.gif",
        "image",
        Some("https://news.example.com/"),
        1,
        0,
        1,
    );
    assert_eq!(outcome.decision, Decision::Block);
    assert!(outcome.rule_id.is_some());
    assert_eq!(outcome.list_id, Some(0));
}

#[test]
fn test_exception_beats_block() {
    let engine = engine_with(&["||doubleclick.net^\n@@||news.example.com^$document\n"]);
    let outcome = engine.match_request("https://news.example.com/", "main_frame", None, 1, 0, 1);
    assert_eq!(outcome.decision, Decision::Allow);
    assert!(outcome.rule_id.is_some());
}

#[test]
fn test_important_defeats_exception() {
    let engine = engine_with(&["@@||tracker.test^\n||tracker.test^$important\n"]);
    let outcome = engine.match_request(
        "https://tracker.test/beacon",
        "ping",
        Some("https://site.test/"),
        1,
        0,
        1,
    );
    assert_eq!(outcome.decision, Decision::Block);
}

#[test]
fn test_redirect_surrogate() {
    let engine = engine_with(&["||googletagmanager.com/gtm.js$script,redirect=noop.js\n"]);
    let outcome = engine.match_request(
        "https://www.googletagmanager.com/gtm.js?id=GTM-XXXX",
        "script",
        Some("https://shop.example.com/"),
        1,
        0,
        1,
    );
    assert_eq!(outcome.decision, Decision::Redirect);
    assert_eq!(outcome.redirect_url.as_deref(), Some("/web_accessible/noop.js"));
}

#[test]
fn test_redirect_rule_exception_cancels_redirect_not_block() {
    let engine = engine_with(&[
        "||gtm.test/ad.js$script,redirect=noop.js\n@@||gtm.test/ad.js$script,redirect-rule=noop.js\n",
    ]);
    let outcome = engine.match_request(
        "https://gtm.test/ad.js",
        "script",
        Some("https://shop.example.com/"),
        1,
        0,
        1,
    );
    // The exception disables the surrogate but the block stands.
    assert_eq!(outcome.decision, Decision::Block);
    assert!(outcome.redirect_url.is_none());
}

#[test]
fn test_removeparam_and_loop_guard() {
    let engine = engine_with(&["*$removeparam=gclid\n"]);
    let url = "https://shop.example.com/p?gclid=abc&x=1";

    let first = engine.match_request(url, "main_frame", None, 7, 0, 1);
    assert_eq!(first.decision, Decision::Removeparam);
    assert_eq!(
        first.redirect_url.as_deref(),
        Some("https://shop.example.com/p?x=1")
    );

    // The same (tab, frame, URL) within the TTL is suppressed.
    let second = engine.match_request(url, "main_frame", None, 7, 0, 2);
    assert_eq!(second.decision, Decision::Allow);

    // A different tab still gets the rewrite.
    let other_tab = engine.match_request(url, "main_frame", None, 8, 0, 3);
    assert_eq!(other_tab.decision, Decision::Removeparam);
}

#[test]
fn test_removeparam_idempotent() {
    let engine = engine_with(&["*$removeparam=gclid\n"]);
    let first = engine.match_request(
        "https://shop.example.com/p?gclid=abc&x=1",
        "main_frame",
        None,
        1,
        0,
        1,
    );
    let sanitized = first.redirect_url.unwrap();
    // The sanitized URL has nothing left to remove.
    let second = engine.match_request(&sanitized, "main_frame", None, 2, 0, 2);
    assert_eq!(second.decision, Decision::Allow);
}

#[test]
fn test_domain_scoped_rule() {
    let engine = engine_with(&["/banner.gif$domain=example.com|~shop.example.com\n"]);

    let blocked = engine.match_request(
        "https://cdn.test/banner.gif",
        "image",
        Some("https://example.com/"),
        1,
        0,
        1,
    );
    assert_eq!(blocked.decision, Decision::Block);

    let allowed = engine.match_request(
        "https://cdn.test/banner.gif",
        "image",
        Some("https://shop.example.com/"),
        1,
        0,
        2,
    );
    assert_eq!(allowed.decision, Decision::Allow);
}

#[test]
fn test_cosmetic_with_generichide() {
    let engine = engine_with(&["##.ad\nexample.com#@#generichide\nexample.com##.site-ad\n"]);

    let outcome = engine.match_cosmetics("https://example.com/", "main_frame", None, 1, 0, 1);
    assert!(!outcome.enable_generic);
    assert!(outcome.css.contains(".site-ad"));
    assert!(!outcome.css.contains(".ad,"));
    assert!(!outcome.css.starts_with(".ad"));

    // Elsewhere the generic selector applies.
    let outcome = engine.match_cosmetics("https://other.test/", "main_frame", None, 1, 0, 2);
    assert!(outcome.enable_generic);
    assert!(outcome.css.contains(".ad"));
}

#[test]
fn test_cosmetic_exception_subtracts() {
    let engine = engine_with(&["example.com##.promo\nsub.example.com#@#.promo\n"]);

    let outcome = engine.match_cosmetics("https://example.com/", "main_frame", None, 1, 0, 1);
    assert!(outcome.css.contains(".promo"));

    let outcome = engine.match_cosmetics("https://sub.example.com/", "main_frame", None, 1, 0, 2);
    assert!(!outcome.css.contains(".promo"));
}

#[test]
fn test_scriptlets_are_site_scoped() {
    let engine = engine_with(&[
        "example.com##+js(set-constant, adsEnabled, false)\nexample.com##+js(no-setTimeout-if, pop)\nexample.com#@#+js(no-setTimeout-if, pop)\n",
    ]);

    let outcome = engine.match_cosmetics("https://www.example.com/", "main_frame", None, 1, 0, 1);
    assert_eq!(outcome.scriptlets.len(), 1);
    assert_eq!(outcome.scriptlets[0].name, "set-constant");
    assert_eq!(outcome.scriptlets[0].args, vec!["adsEnabled", "false"]);

    // No generic scriptlets: other sites get nothing.
    let outcome = engine.match_cosmetics("https://other.test/", "main_frame", None, 1, 0, 2);
    assert!(outcome.scriptlets.is_empty());
}

#[test]
fn test_global_scriptlet_disable() {
    let engine = engine_with(&["example.com##+js(set-constant, x, 1)\n#@#+js()\n"]);
    let outcome = engine.match_cosmetics("https://example.com/", "main_frame", None, 1, 0, 1);
    assert!(outcome.scriptlets.is_empty());
}

#[test]
fn test_elemhide_disables_all_cosmetics() {
    let engine = engine_with(&["##.ad\nexample.com##.site-ad\n@@||example.com^$elemhide\n"]);
    let outcome = engine.match_cosmetics("https://example.com/", "main_frame", None, 1, 0, 1);
    assert!(outcome.css.is_empty());
    assert!(!outcome.enable_generic);
    assert!(outcome.procedural.is_empty());
}

#[test]
fn test_csp_injection_and_exception() {
    let engine = engine_with(&[
        "||forum.test^$csp=script-src 'none'\n||forum.test^$csp=worker-src 'none'\n@@||forum.test/safe^$csp=worker-src 'none'\n",
    ]);

    let outcome = engine.match_response_headers(
        "https://forum.test/thread",
        "main_frame",
        None,
        1,
        0,
        1,
        &[("content-type", "text/html")],
    );
    assert!(!outcome.cancel);
    assert_eq!(outcome.csp.len(), 2);

    // The specific exception removes only its directive.
    let outcome = engine.match_response_headers(
        "https://forum.test/safe",
        "main_frame",
        None,
        1,
        0,
        2,
        &[("content-type", "text/html")],
    );
    assert_eq!(outcome.csp, vec!["script-src 'none'".to_string()]);
}

#[test]
fn test_empty_csp_exception_disables_all() {
    let engine = engine_with(&[
        "||forum.test^$csp=script-src 'none'\n@@||forum.test^$csp\n",
    ]);
    let outcome = engine.match_response_headers(
        "https://forum.test/",
        "main_frame",
        None,
        1,
        0,
        1,
        &[],
    );
    assert!(outcome.csp.is_empty());
}

#[test]
fn test_responseheader_removal_allowlist() {
    let engine = engine_with(&[
        "||cdn.test^$responseheader=refresh\n||cdn.test^$responseheader=content-security-policy\n",
    ]);
    let outcome = engine.match_response_headers(
        "https://cdn.test/page",
        "main_frame",
        None,
        1,
        0,
        1,
        &[("refresh", "0; url=https://ads.test"), ("content-security-policy", "x")],
    );
    // CSP is never removable; refresh is on the allowlist.
    assert_eq!(outcome.remove_headers, vec!["refresh".to_string()]);
}

#[test]
fn test_responseheader_exception() {
    let engine = engine_with(&[
        "||cdn.test^$responseheader=refresh\n||cdn.test^$responseheader=set-cookie\n@@||cdn.test^$responseheader=refresh\n",
    ]);
    let outcome = engine.match_response_headers(
        "https://cdn.test/page",
        "main_frame",
        None,
        1,
        0,
        1,
        &[("refresh", "0; url=https://ads.test"), ("set-cookie", "a=1")],
    );
    // The exception spares refresh; set-cookie removal still applies.
    assert_eq!(outcome.remove_headers, vec!["set-cookie".to_string()]);
    assert!(!outcome.cancel);
}

#[test]
fn test_header_match_block() {
    let engine = engine_with(&["||cdn.test^$header=via:1.1 adproxy\n"]);
    let hit = engine.match_response_headers(
        "https://cdn.test/page",
        "main_frame",
        None,
        1,
        0,
        1,
        &[("via", "1.1 adproxy")],
    );
    assert!(hit.cancel);

    let miss = engine.match_response_headers(
        "https://cdn.test/page",
        "main_frame",
        None,
        1,
        0,
        2,
        &[("via", "1.1 other")],
    );
    assert!(!miss.cancel);
}

#[test]
fn test_header_pipeline_document_gate() {
    let engine = engine_with(&["||cdn.test^$header=via\n"]);
    let outcome = engine.match_response_headers(
        "https://cdn.test/app.js",
        "script",
        Some("https://site.test/"),
        1,
        0,
        1,
        &[("via", "1.1 x")],
    );
    assert!(!outcome.cancel);
    assert!(outcome.csp.is_empty());
}

#[test]
fn test_hosts_file_entries_block() {
    let engine = engine_with(&["0.0.0.0 tracker.hosts.test\n127.0.0.1 pixel.hosts.test\n"]);
    for host in ["tracker.hosts.test", "pixel.hosts.test"] {
        let outcome = engine.match_request(
            &format!("https://{}/t.js", host),
            "script",
            Some("https://site.test/"),
            1,
            0,
            1,
        );
        assert_eq!(outcome.decision, Decision::Block, "{}", host);
    }
}

#[test]
fn test_untyped_rule_spares_main_frame() {
    let engine = engine_with(&["||portal.test^\n"]);
    // Subresources are blocked.
    let sub = engine.match_request(
        "https://portal.test/app.js",
        "script",
        Some("https://portal.test/"),
        1,
        0,
        1,
    );
    assert_eq!(sub.decision, Decision::Block);
    // The top-level document is not.
    let main = engine.match_request("https://portal.test/", "main_frame", None, 1, 0, 2);
    assert_eq!(main.decision, Decision::Allow);
}

#[test]
fn test_third_party_option() {
    let engine = engine_with(&["||widget.test^$third-party\n"]);
    let third = engine.match_request(
        "https://widget.test/w.js",
        "script",
        Some("https://site.test/"),
        1,
        0,
        1,
    );
    assert_eq!(third.decision, Decision::Block);

    let first = engine.match_request(
        "https://widget.test/w.js",
        "script",
        Some("https://widget.test/"),
        1,
        0,
        2,
    );
    assert_eq!(first.decision, Decision::Allow);
}

#[test]
fn test_badfilter_disables_rule_end_to_end() {
    let engine = engine_with(&["||ads.test^\n||ads.test^$badfilter\n||keep.test^\n"]);
    let outcome = engine.match_request(
        "https://ads.test/x.gif",
        "image",
        Some("https://site.test/"),
        1,
        0,
        1,
    );
    assert_eq!(outcome.decision, Decision::Allow);
}

#[test]
fn test_deterministic_compiles() {
    let lists = [
        "||doubleclick.net^\n@@||news.example.com^$document\n##.ad\nexample.com##+js(set-constant, a, 1)\n*$removeparam=gclid\n",
    ];
    let a = compile_filter_lists(&lists).unwrap();
    let b = compile_filter_lists(&lists).unwrap();
    assert_eq!(a.snapshot, b.snapshot);
}

#[test]
fn test_repeated_calls_are_stable() {
    let engine = engine_with(&["||doubleclick.net^\n@@||news.example.com^$document\n"]);
    let mut decisions = Vec::new();
    for i in 0..5 {
        let outcome = engine.match_request(
            "https://ads.doubleclick.net/pixel.gif",
            "image",
            Some("https://news.example.com/"),
            1,
            0,
            i,
        );
        decisions.push((outcome.decision, outcome.rule_id));
    }
    assert!(decisions.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_unknown_type_maps_to_other() {
    let engine = engine_with(&["||ads.test^$other\n"]);
    let outcome = engine.match_request(
        "https://ads.test/x",
        "fancy_new_type",
        Some("https://site.test/"),
        1,
        0,
        1,
    );
    assert_eq!(outcome.decision, Decision::Block);
}

#[test]
fn test_compile_statistics() {
    let out = compile_filter_lists(&[
        "||a.test^\n||b.test^$bogus-option\n||c.test^\n||c.test^$badfilter\n",
        "||a.test^\n",
    ])
    .unwrap();
    assert_eq!(out.stats.per_list.len(), 2);
    assert_eq!(out.stats.badfilter_rules, 1);
    assert_eq!(out.stats.badfiltered_rules, 1);
    assert_eq!(out.stats.rules_deduped, 1);
    assert_eq!(out.stats.skipped.get("unknown-option"), Some(&1));
    assert_eq!(out.stats.rules_after, 1);
}

#[test]
fn test_match_case_rule() {
    let engine = engine_with(&["/TrackPixel$match-case\n"]);
    let hit = engine.match_request(
        "https://cdn.test/TrackPixel.gif",
        "image",
        Some("https://site.test/"),
        1,
        0,
        1,
    );
    assert_eq!(hit.decision, Decision::Block);

    let miss = engine.match_request(
        "https://cdn.test/trackpixel.gif",
        "image",
        Some("https://site.test/"),
        1,
        0,
        2,
    );
    assert_eq!(miss.decision, Decision::Allow);
}

#[test]
fn test_websocket_type() {
    let engine = engine_with(&["||rt.tracker.test^$websocket\n"]);
    let ws = engine.match_request(
        "wss://rt.tracker.test/socket",
        "websocket",
        Some("https://site.test/"),
        1,
        0,
        1,
    );
    assert_eq!(ws.decision, Decision::Block);

    let img = engine.match_request(
        "https://rt.tracker.test/pixel.gif",
        "image",
        Some("https://site.test/"),
        1,
        0,
        2,
    );
    assert_eq!(img.decision, Decision::Allow);
}
