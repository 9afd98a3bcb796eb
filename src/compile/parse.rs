//! Filter-list line classification and network-rule parsing.

use super::SkipReason;
use crate::request::{PartyMask, TypeMask};

/// Coarse classification of one list line.
#[derive(Debug, PartialEq, Eq)]
pub enum LineKind<'a> {
    Empty,
    Comment,
    SectionHeader,
    /// A hosts-file entry: the blocked hostname.
    Hosts(&'a str),
    Cosmetic(CosmeticLine<'a>),
    Network(&'a str),
}

/// A cosmetic line split at its marker.
#[derive(Debug, PartialEq, Eq)]
pub struct CosmeticLine<'a> {
    pub domains: &'a str,
    pub marker: CosmeticMarker,
    pub body: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CosmeticMarker {
    /// `##`
    Hide,
    /// `#@#`
    Exception,
    /// `#?#`
    Procedural,
}

/// Classify a raw line. Whitespace is trimmed by the caller.
pub fn classify(line: &str) -> LineKind<'_> {
    if line.is_empty() {
        return LineKind::Empty;
    }
    if line.starts_with('!') || line.starts_with("# ") || line == "#" {
        return LineKind::Comment;
    }
    if line.starts_with('[') && line.ends_with(']') {
        return LineKind::SectionHeader;
    }
    if let Some(kind) = classify_hosts_line(line) {
        return kind;
    }
    if let Some(cosmetic) = split_cosmetic(line) {
        return LineKind::Cosmetic(cosmetic);
    }
    LineKind::Network(line)
}

fn classify_hosts_line(line: &str) -> Option<LineKind<'_>> {
    let mut fields = line.split_whitespace();
    let addr = fields.next()?;
    if !matches!(addr, "0.0.0.0" | "127.0.0.1" | "::" | "::1") {
        return None;
    }
    // Loopback boilerplate is ignorable, not a filter.
    let host = match fields.next() {
        Some(host) => host,
        None => return Some(LineKind::Comment),
    };
    if !host.contains('.')
        || matches!(
            host,
            "localhost"
                | "localhost.localdomain"
                | "local"
                | "broadcasthost"
                | "ip6-localhost"
                | "ip6-loopback"
        )
    {
        return Some(LineKind::Comment);
    }
    Some(LineKind::Hosts(host))
}

fn split_cosmetic(line: &str) -> Option<CosmeticLine<'_>> {
    let mut search = 0;
    while let Some(rel) = line[search..].find('#') {
        let at = search + rel;
        let rest = &line[at + 1..];
        let (marker, skip) = if rest.starts_with('#') {
            (CosmeticMarker::Hide, 2)
        } else if rest.starts_with("@#") {
            (CosmeticMarker::Exception, 3)
        } else if rest.starts_with("?#") {
            (CosmeticMarker::Procedural, 3)
        } else {
            search = at + 1;
            continue;
        };
        let body = &line[at + skip..];
        if body.is_empty() {
            return None;
        }
        return Some(CosmeticLine {
            domains: &line[..at],
            marker,
            body,
        });
    }
    None
}

/// A `$removeparam` spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveparamSpec {
    All,
    Exact(String),
    Regex(String),
}

/// A `$header=` spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSpec {
    pub name: String,
    pub value: Option<String>,
    pub regex: bool,
}

/// A fully parsed network rule, prior to pattern compilation.
#[derive(Debug, Clone, Default)]
pub struct NetworkRule {
    pub exception: bool,
    /// Core pattern text with anchors stripped.
    pub pattern: String,
    pub is_regex: bool,
    pub match_case: bool,
    pub important: bool,
    pub badfilter: bool,
    pub left_anchor: bool,
    pub right_anchor: bool,
    pub host_anchor: bool,
    /// Explicit type mask; `None` means the action-dependent default.
    pub types: Option<u16>,
    pub party_mask: u8,
    pub domains_include: Vec<String>,
    pub domains_exclude: Vec<String>,
    pub redirect: Option<(String, i16)>,
    /// The redirect is a `redirect-rule` directive (no implied block).
    pub redirect_rule: bool,
    pub removeparam: Option<RemoveparamSpec>,
    /// `Some("")` is an empty-content `$csp` exception.
    pub csp: Option<String>,
    pub header: Option<HeaderSpec>,
    pub responseheader: Option<String>,
    pub elemhide: bool,
    pub generichide: bool,
    /// Canonical option text used for the badfilter key.
    pub canonical_options: String,
}

impl NetworkRule {
    /// True when the rule's only effect is a modifier (no block/allow
    /// semantics of its own beyond the modifier action).
    pub fn has_modifier(&self) -> bool {
        self.redirect.is_some()
            || self.removeparam.is_some()
            || self.csp.is_some()
            || self.header.is_some()
            || self.responseheader.is_some()
    }
}

/// Parse one network filter line.
pub fn parse_network(line: &str) -> Result<NetworkRule, SkipReason> {
    let mut rule = NetworkRule {
        party_mask: PartyMask::all().bits(),
        ..Default::default()
    };

    let mut text = line;
    if let Some(rest) = text.strip_prefix("@@") {
        rule.exception = true;
        text = rest;
    }

    // A whole-line `/regex/` carries no option suffix.
    let (pattern_part, options_part) =
        if text.len() > 2 && text.starts_with('/') && text.ends_with('/') {
            (text, None)
        } else {
            match text.rfind('$') {
                Some(at) if at > 0 && at + 1 < text.len() => {
                    (&text[..at], Some(&text[at + 1..]))
                }
                _ => (text, None),
            }
        };

    let mut canonical: Vec<String> = Vec::new();
    if let Some(options) = options_part {
        parse_options(options, &mut rule, &mut canonical)?;
    }

    normalize_pattern(pattern_part, &mut rule)?;

    canonical.sort_unstable();
    rule.canonical_options = canonical.join(",");
    Ok(rule)
}

fn parse_options(
    options: &str,
    rule: &mut NetworkRule,
    canonical: &mut Vec<String>,
) -> Result<(), SkipReason> {
    let mut positive_types: u16 = 0;
    let mut negative_types: u16 = 0;

    for raw in options.split(',') {
        let opt = raw.trim();
        if opt.is_empty() {
            continue;
        }
        let (negated, name) = match opt.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, opt),
        };

        if let Some((bits, canonical_name)) = type_option(name) {
            if negated {
                negative_types |= bits;
                canonical.push(format!("~{}", canonical_name));
            } else {
                positive_types |= bits;
                canonical.push(canonical_name.to_string());
            }
            continue;
        }

        match name {
            "third-party" | "3p" => {
                rule.party_mask = if negated {
                    PartyMask::FIRST.bits()
                } else {
                    PartyMask::THIRD.bits()
                };
                canonical.push(if negated { "first-party" } else { "third-party" }.to_string());
            }
            "first-party" | "1p" => {
                rule.party_mask = if negated {
                    PartyMask::THIRD.bits()
                } else {
                    PartyMask::FIRST.bits()
                };
                canonical.push(if negated { "third-party" } else { "first-party" }.to_string());
            }
            "important" if !negated => {
                rule.important = true;
                canonical.push("important".into());
            }
            "match-case" if !negated => {
                rule.match_case = true;
                canonical.push("match-case".into());
            }
            "badfilter" if !negated => rule.badfilter = true,
            "elemhide" | "ehide" if !negated => {
                rule.elemhide = true;
                canonical.push("elemhide".into());
            }
            "generichide" | "ghide" if !negated => {
                rule.generichide = true;
                canonical.push("generichide".into());
            }
            "all" if !negated => {
                positive_types |= TypeMask::all().bits();
                canonical.push("all".into());
            }
            _ => {
                if negated {
                    return Err(SkipReason::UnknownOption);
                }
                parse_valued_option(name, rule, canonical)?;
            }
        }
    }

    if positive_types != 0 {
        rule.types = Some(positive_types & !negative_types);
    } else if negative_types != 0 {
        rule.types = Some(TypeMask::DEFAULT_NETWORK.bits() & !negative_types);
    }
    Ok(())
}

fn parse_valued_option(
    opt: &str,
    rule: &mut NetworkRule,
    canonical: &mut Vec<String>,
) -> Result<(), SkipReason> {
    let (name, value) = match opt.find('=') {
        Some(at) => (&opt[..at], Some(&opt[at + 1..])),
        None => (opt, None),
    };

    match name {
        "domain" | "from" => {
            let value = value.ok_or(SkipReason::BadDomainOption)?;
            let mut items: Vec<String> = Vec::new();
            for item in value.split('|') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                let (negated, host) = match item.strip_prefix('~') {
                    Some(rest) => (true, rest),
                    None => (false, item),
                };
                // Entity domains (`example.*`) are not representable in the
                // hashed constraint pool.
                if host.contains('*') {
                    continue;
                }
                let host = normalize_host(host).ok_or(SkipReason::BadDomainOption)?;
                if negated {
                    rule.domains_exclude.push(host);
                } else {
                    rule.domains_include.push(host);
                }
            }
            rule.domains_include.sort_unstable();
            rule.domains_include.dedup();
            rule.domains_exclude.sort_unstable();
            rule.domains_exclude.dedup();
            if rule.domains_include.is_empty() && rule.domains_exclude.is_empty() {
                return Err(SkipReason::BadDomainOption);
            }
            canonical.push(format!(
                "domain={}",
                rule.domains_include
                    .iter()
                    .cloned()
                    .chain(rule.domains_exclude.iter().map(|d| format!("~{}", d)))
                    .collect::<Vec<_>>()
                    .join("|")
            ));
        }
        "redirect" | "redirect-rule" => {
            let value = value.ok_or(SkipReason::UnknownOption)?;
            // A trailing `:N` is a priority; a bare colon (scheme, port)
            // stays part of the token.
            let (token, priority) = match value.rfind(':') {
                Some(at) => match value[at + 1..].parse::<i16>() {
                    Ok(priority) => (&value[..at], priority),
                    Err(_) => (value, 0),
                },
                None => (value, 0),
            };
            if token.is_empty() {
                return Err(SkipReason::UnknownOption);
            }
            rule.redirect = Some((token.to_string(), priority));
            rule.redirect_rule = name == "redirect-rule";
            canonical.push(format!("{}={}", name, value));
        }
        "removeparam" => {
            let spec = match value {
                None | Some("") => RemoveparamSpec::All,
                Some(v) if v.len() > 2 && v.starts_with('/') && v.ends_with('/') => {
                    RemoveparamSpec::Regex(v[1..v.len() - 1].to_string())
                }
                Some(v) if v.starts_with('~') => return Err(SkipReason::UnknownOption),
                Some(v) => RemoveparamSpec::Exact(v.to_string()),
            };
            canonical.push(format!("removeparam={}", value.unwrap_or("")));
            rule.removeparam = Some(spec);
        }
        "csp" => {
            rule.csp = Some(value.unwrap_or("").trim().to_string());
            canonical.push(format!("csp={}", value.unwrap_or("")));
        }
        "header" => {
            let value = value.ok_or(SkipReason::UnknownOption)?;
            let (header_name, header_value) = match value.find(':') {
                Some(at) => (&value[..at], Some(&value[at + 1..])),
                None => (value, None),
            };
            if header_name.is_empty() {
                return Err(SkipReason::UnknownOption);
            }
            let (header_value, regex) = match header_value {
                Some(v) if v.len() > 2 && v.starts_with('/') && v.ends_with('/') => {
                    (Some(v[1..v.len() - 1].to_string()), true)
                }
                Some(v) => (Some(v.to_string()), false),
                None => (None, false),
            };
            rule.header = Some(HeaderSpec {
                name: header_name.to_ascii_lowercase(),
                value: header_value,
                regex,
            });
            canonical.push(format!("header={}", value));
        }
        "responseheader" => {
            let value = value.ok_or(SkipReason::UnknownOption)?;
            if value.is_empty() {
                return Err(SkipReason::UnknownOption);
            }
            rule.responseheader = Some(value.to_ascii_lowercase());
            canonical.push(format!("responseheader={}", value));
        }
        _ => return Err(SkipReason::UnknownOption),
    }
    Ok(())
}

fn type_option(name: &str) -> Option<(u16, &'static str)> {
    let (mask, canonical) = match name {
        "script" => (TypeMask::SCRIPT, "script"),
        "image" => (TypeMask::IMAGE, "image"),
        "stylesheet" | "css" => (TypeMask::STYLESHEET, "stylesheet"),
        "xmlhttprequest" | "xhr" => (TypeMask::XHR, "xmlhttprequest"),
        "subdocument" | "frame" => (TypeMask::SUB_FRAME, "subdocument"),
        "main_frame" => (TypeMask::MAIN_FRAME, "main_frame"),
        "document" | "doc" => (TypeMask::DOCUMENT, "document"),
        "font" => (TypeMask::FONT, "font"),
        "media" => (TypeMask::MEDIA, "media"),
        "ping" | "beacon" => (TypeMask::PING, "ping"),
        "websocket" => (TypeMask::WEBSOCKET, "websocket"),
        "other" => (TypeMask::OTHER, "other"),
        "object" => (TypeMask::OBJECT, "object"),
        _ => return None,
    };
    Some((mask.bits(), canonical))
}

fn normalize_pattern(pattern: &str, rule: &mut NetworkRule) -> Result<(), SkipReason> {
    let mut text = pattern;

    if text.len() > 2 && text.starts_with('/') && text.ends_with('/') {
        rule.is_regex = true;
        rule.pattern = text[1..text.len() - 1].to_string();
        return Ok(());
    }

    if let Some(rest) = text.strip_prefix("||") {
        rule.host_anchor = true;
        text = rest;
    } else if let Some(rest) = text.strip_prefix('|') {
        rule.left_anchor = true;
        text = rest;
    }
    if let Some(rest) = text.strip_suffix('|') {
        rule.right_anchor = true;
        text = rest;
    }

    // Collapse wildcard runs, drop redundant edge wildcards.
    let mut collapsed = String::with_capacity(text.len());
    let mut prev_star = false;
    for c in text.chars() {
        if c == '*' {
            if prev_star {
                continue;
            }
            prev_star = true;
        } else {
            prev_star = false;
        }
        collapsed.push(c);
    }
    let mut core = collapsed.as_str();
    if let Some(rest) = core.strip_prefix('*') {
        core = rest;
        rule.left_anchor = false;
        rule.host_anchor = false;
    }
    if let Some(rest) = core.strip_suffix('*') {
        core = rest;
        rule.right_anchor = false;
    }

    if !rule.match_case {
        rule.pattern = core.to_ascii_lowercase();
    } else {
        rule.pattern = core.to_string();
    }

    if rule.pattern.is_empty() && !rule.has_modifier() && !rule.exception && !rule.badfilter {
        // A bare catch-all block is never intended.
        return Err(SkipReason::EmptyPattern);
    }
    Ok(())
}

/// Lowercase and punycode a hostname from an option or cosmetic prefix.
pub fn normalize_host(host: &str) -> Option<String> {
    let host = host.trim().trim_matches('.');
    if host.is_empty() {
        return None;
    }
    if host.is_ascii() {
        Some(host.to_ascii_lowercase())
    } else {
        idna::domain_to_ascii(host).ok()
    }
}

/// Parse a `+js(name, args...)` scriptlet body. An empty argument list
/// yields `(None, [])`, the disable-everything form.
pub fn parse_scriptlet_body(body: &str) -> Option<(Option<String>, Vec<String>)> {
    let inner = body.strip_prefix("+js(")?.strip_suffix(')')?;
    let inner = inner.trim();
    if inner.is_empty() {
        return Some((None, Vec::new()));
    }
    let mut parts = inner.split(',').map(|p| p.trim().to_string());
    let name = parts.next()?;
    Some((Some(name), parts.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(""), LineKind::Empty);
        assert_eq!(classify("! comment"), LineKind::Comment);
        assert_eq!(classify("[Adblock Plus 2.0]"), LineKind::SectionHeader);
        assert_eq!(classify("0.0.0.0 ads.example.com"), LineKind::Hosts("ads.example.com"));
        assert_eq!(classify("0.0.0.0 localhost"), LineKind::Comment);
        assert_eq!(classify("127.0.0.1 ip6-loopback"), LineKind::Comment);
        assert!(matches!(classify("||example.com^"), LineKind::Network(_)));
        assert!(matches!(classify("example.com##.ad"), LineKind::Cosmetic(_)));
    }

    #[test]
    fn test_split_cosmetic_markers() {
        let c = split_cosmetic("example.com#@#.ad").unwrap();
        assert_eq!(c.marker, CosmeticMarker::Exception);
        assert_eq!(c.domains, "example.com");
        assert_eq!(c.body, ".ad");

        let c = split_cosmetic("##.ad").unwrap();
        assert_eq!(c.marker, CosmeticMarker::Hide);
        assert_eq!(c.domains, "");

        let c = split_cosmetic("example.com#?#div:has(.sponsor)").unwrap();
        assert_eq!(c.marker, CosmeticMarker::Procedural);
    }

    #[test]
    fn test_parse_basic_block() {
        let rule = parse_network("||doubleclick.net^").unwrap();
        assert!(rule.host_anchor);
        assert!(!rule.exception);
        assert_eq!(rule.pattern, "doubleclick.net^");
        assert!(rule.types.is_none());
    }

    #[test]
    fn test_parse_exception_with_document() {
        let rule = parse_network("@@||news.example.com^$document").unwrap();
        assert!(rule.exception);
        assert_eq!(rule.types, Some(TypeMask::DOCUMENT.bits()));
    }

    #[test]
    fn test_parse_types_and_party() {
        let rule = parse_network("||tracker.test^$script,image,3p").unwrap();
        assert_eq!(
            rule.types,
            Some(TypeMask::SCRIPT.bits() | TypeMask::IMAGE.bits())
        );
        assert_eq!(rule.party_mask, PartyMask::THIRD.bits());

        let rule = parse_network("||cdn.test^$~third-party").unwrap();
        assert_eq!(rule.party_mask, PartyMask::FIRST.bits());
    }

    #[test]
    fn test_parse_negated_types() {
        let rule = parse_network("||ads.test^$~script").unwrap();
        let mask = rule.types.unwrap();
        assert_eq!(mask & TypeMask::SCRIPT.bits(), 0);
        assert_ne!(mask & TypeMask::IMAGE.bits(), 0);
        assert_eq!(mask & TypeMask::MAIN_FRAME.bits(), 0);
    }

    #[test]
    fn test_parse_domain_option() {
        let rule = parse_network("/banner.gif$domain=example.com|~shop.example.com").unwrap();
        assert_eq!(rule.domains_include, vec!["example.com"]);
        assert_eq!(rule.domains_exclude, vec!["shop.example.com"]);
    }

    #[test]
    fn test_parse_redirect() {
        let rule = parse_network("||googletagmanager.com/gtm.js$script,redirect=noop.js").unwrap();
        assert_eq!(rule.redirect, Some(("noop.js".to_string(), 0)));
        assert!(!rule.redirect_rule);

        let rule = parse_network("||a.test^$redirect-rule=noop.js:10").unwrap();
        assert_eq!(rule.redirect, Some(("noop.js".to_string(), 10)));
        assert!(rule.redirect_rule);
    }

    #[test]
    fn test_parse_removeparam() {
        let rule = parse_network("*$removeparam=gclid").unwrap();
        assert_eq!(rule.removeparam, Some(RemoveparamSpec::Exact("gclid".into())));
        assert!(rule.pattern.is_empty());

        let rule = parse_network("||shop.test^$removeparam=/^utm_/").unwrap();
        assert_eq!(rule.removeparam, Some(RemoveparamSpec::Regex("^utm_".into())));

        let rule = parse_network("@@||safe.test^$removeparam").unwrap();
        assert_eq!(rule.removeparam, Some(RemoveparamSpec::All));
        assert!(rule.exception);
    }

    #[test]
    fn test_parse_csp_and_headers() {
        let rule = parse_network("||forum.test^$csp=script-src 'none'").unwrap();
        assert_eq!(rule.csp.as_deref(), Some("script-src 'none'"));

        let rule = parse_network("@@||trusted.test^$csp").unwrap();
        assert_eq!(rule.csp.as_deref(), Some(""));

        let rule = parse_network("||ads.test^$header=via:1.1 proxy").unwrap();
        let header = rule.header.unwrap();
        assert_eq!(header.name, "via");
        assert_eq!(header.value.as_deref(), Some("1.1 proxy"));

        let rule = parse_network("||cdn.test^$responseheader=refresh").unwrap();
        assert_eq!(rule.responseheader.as_deref(), Some("refresh"));
    }

    #[test]
    fn test_parse_badfilter_and_canonical_options() {
        let a = parse_network("||ads.test^$image,script,badfilter").unwrap();
        let b = parse_network("||ads.test^$script,image").unwrap();
        assert!(a.badfilter);
        assert!(!b.badfilter);
        assert_eq!(a.canonical_options, b.canonical_options);
    }

    #[test]
    fn test_parse_unknown_option_is_skipped() {
        assert_eq!(
            parse_network("||x.test^$ppapi").unwrap_err(),
            SkipReason::UnknownOption
        );
    }

    #[test]
    fn test_parse_regex_rule() {
        let rule = parse_network(r"/ads[0-9]+\.js/").unwrap();
        assert!(rule.is_regex);
        assert_eq!(rule.pattern, r"ads[0-9]+\.js");
    }

    #[test]
    fn test_wildcard_collapse() {
        let rule = parse_network("**banner**ads**").unwrap();
        assert_eq!(rule.pattern, "banner*ads");
        assert!(!rule.left_anchor);
        assert!(!rule.right_anchor);
    }

    #[test]
    fn test_anchor_extraction() {
        let rule = parse_network("|https://example.com/ad|").unwrap();
        assert!(rule.left_anchor);
        assert!(rule.right_anchor);
        assert_eq!(rule.pattern, "https://example.com/ad");
    }

    #[test]
    fn test_scriptlet_body() {
        let (name, args) = parse_scriptlet_body("+js(set-constant, adsEnabled, false)").unwrap();
        assert_eq!(name.as_deref(), Some("set-constant"));
        assert_eq!(args, vec!["adsEnabled", "false"]);

        let (name, args) = parse_scriptlet_body("+js()").unwrap();
        assert!(name.is_none());
        assert!(args.is_empty());

        assert!(parse_scriptlet_body(".ad").is_none());
    }
}
