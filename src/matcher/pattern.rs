//! Pattern bytecode verification.
//!
//! Walks a compiled pattern program over a URL, maintaining a cursor.
//! Matching is case-insensitive by folding the URL byte under comparison
//! against the stored lowercased literal; the URL itself is never copied
//! or lowercased.

use crate::snapshot::format::{anchor, op, read_u32, NONE_U32, PATTERN_MATCH_CASE};
use crate::snapshot::Snapshot;
use crate::url::UrlView;

/// Does the rule's pattern match the URL? `req_suffixes` is the Hash64
/// suffix walk of the request host (for HOST_ANCHOR checks).
pub fn pattern_matches(
    snapshot: &Snapshot,
    pattern_id: u32,
    url: &str,
    view: &UrlView<'_>,
    req_suffixes: &[u64],
) -> bool {
    if pattern_id == NONE_U32 {
        return true;
    }
    let pattern = snapshot.pattern(pattern_id);

    if pattern.anchor == anchor::REGEX {
        return snapshot
            .pattern_regex(pattern_id)
            .map(|re| re.is_match(url))
            .unwrap_or(false);
    }

    let bytes = url.as_bytes();
    let case_sensitive = pattern.flags & PATTERN_MATCH_CASE != 0;
    let ops = pattern.ops;

    let mut cursor = 0usize;
    // While anchored, a literal must match exactly at the cursor; SKIP_ANY
    // re-enables forward searching.
    let mut anchored = false;
    // After HOST_ANCHOR, the next literal must start on a label boundary
    // inside the host span.
    let mut host_mode = false;

    let mut pos = 0usize;
    while pos < ops.len() {
        match ops[pos] {
            op::DONE => return true,
            op::ASSERT_START => {
                if cursor != 0 {
                    return false;
                }
                anchored = true;
                pos += 1;
            }
            op::ASSERT_END => {
                if cursor != bytes.len() {
                    return false;
                }
                pos += 1;
            }
            op::ASSERT_BOUNDARY => {
                if cursor < bytes.len() {
                    let c = bytes[cursor];
                    if c.is_ascii_alphanumeric() || c == b'%' {
                        return false;
                    }
                    cursor += 1;
                }
                anchored = true;
                pos += 1;
            }
            op::SKIP_ANY => {
                anchored = false;
                host_mode = false;
                pos += 1;
            }
            op::HOST_ANCHOR => {
                if !req_suffixes.contains(&pattern.anchor_hash) {
                    return false;
                }
                cursor = view.host_start;
                anchored = true;
                host_mode = true;
                pos += 1;
            }
            op::FIND_LIT => {
                let off = read_u32(ops, pos + 1);
                let len = read_u32(ops, pos + 5);
                let lit = match snapshot.str_at((off, len)) {
                    Some(s) => s.as_bytes(),
                    None => return false,
                };
                if host_mode {
                    match find_in_host(bytes, view, lit, case_sensitive) {
                        Some(start) => cursor = start + lit.len(),
                        None => return false,
                    }
                    host_mode = false;
                } else if anchored {
                    if !match_at(bytes, cursor, lit, case_sensitive) {
                        return false;
                    }
                    cursor += lit.len();
                } else {
                    match find_from(bytes, cursor, lit, case_sensitive) {
                        Some(start) => cursor = start + lit.len(),
                        None => return false,
                    }
                    anchored = true;
                }
                pos += 9;
            }
            _ => return false,
        }
    }
    // A validated program always ends in DONE.
    false
}

#[inline]
fn fold(b: u8) -> u8 {
    let is_upper = b.wrapping_sub(b'A') < 26;
    b + ((is_upper as u8) << 5)
}

#[inline]
fn byte_eq(url_byte: u8, lit_byte: u8, case_sensitive: bool) -> bool {
    if case_sensitive {
        url_byte == lit_byte
    } else {
        fold(url_byte) == lit_byte
    }
}

#[inline]
fn match_at(url: &[u8], at: usize, lit: &[u8], case_sensitive: bool) -> bool {
    if at + lit.len() > url.len() {
        return false;
    }
    url[at..at + lit.len()]
        .iter()
        .zip(lit)
        .all(|(&u, &l)| byte_eq(u, l, case_sensitive))
}

/// Forward search with a first-byte filter.
#[inline]
fn find_from(url: &[u8], from: usize, lit: &[u8], case_sensitive: bool) -> Option<usize> {
    if lit.is_empty() {
        return Some(from);
    }
    let first = lit[0];
    let mut i = from;
    while i + lit.len() <= url.len() {
        if byte_eq(url[i], first, case_sensitive) && match_at(url, i, lit, case_sensitive) {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Search inside the host span for a match starting at the host start or
/// just after a dot. The match itself may extend past the host into the
/// path (`||example.com/ad.js`).
fn find_in_host(url: &[u8], view: &UrlView<'_>, lit: &[u8], case_sensitive: bool) -> Option<usize> {
    let mut start = view.host_start;
    while start <= view.host_end {
        let boundary = start == view.host_start || url[start - 1] == b'.';
        if boundary && match_at(url, start, lit, case_sensitive) {
            return Some(start);
        }
        start += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_filter_lists;
    use crate::hash::suffix_hashes;

    /// Compile a single rule and return (snapshot, its pattern id).
    fn snapshot_for(rule: &str) -> Snapshot {
        let list = format!("{}\n", rule);
        let out = compile_filter_lists(&[list.as_str()]).unwrap();
        Snapshot::load(out.snapshot).unwrap()
    }

    fn matches(rule: &str, url: &str) -> bool {
        let snapshot = snapshot_for(rule);
        let view = UrlView::parse(url).unwrap();
        let mut suffixes = Vec::new();
        suffix_hashes(view.host(), 0, &mut suffixes);
        (0..snapshot.rule_count()).any(|id| {
            pattern_matches(&snapshot, snapshot.rule_pattern_id(id), url, &view, &suffixes)
        })
    }

    #[test]
    fn test_host_anchor_with_path() {
        assert!(matches(
            "||googletagmanager.com/gtm.js",
            "https://www.googletagmanager.com/gtm.js?id=GTM-X"
        ));
        assert!(!matches(
            "||googletagmanager.com/gtm.js",
            "https://www.googletagmanager.com/other.js"
        ));
        // Label boundary: "notgoogletagmanager.com" must not match.
        assert!(!matches(
            "||googletagmanager.com/gtm.js",
            "https://notgoogletagmanager.com/gtm.js"
        ));
    }

    #[test]
    fn test_plain_literal_search() {
        assert!(matches("/banner.", "https://cdn.test/banner.gif"));
        assert!(!matches("/banner.", "https://cdn.test/header.gif"));
    }

    #[test]
    fn test_case_insensitive_by_default() {
        assert!(matches("/banner.", "https://cdn.test/BANNER.GIF"));
    }

    #[test]
    fn test_match_case() {
        assert!(matches("/Banner.$match-case", "https://cdn.test/Banner.gif"));
        assert!(!matches("/Banner.$match-case", "https://cdn.test/banner.gif"));
    }

    #[test]
    fn test_boundary_separator() {
        // '^' matches a separator or the end of the URL.
        assert!(matches("/ad^", "https://x.test/ad?x=1"));
        assert!(matches("/ad^", "https://x.test/ad"));
        assert!(!matches("/ad^", "https://x.test/adjacent"));
        // '%' does not count as a separator.
        assert!(!matches("/ad^", "https://x.test/ad%20s"));
    }

    #[test]
    fn test_wildcard() {
        assert!(matches("/ads/*/banner", "https://x.test/ads/v2/banner.gif"));
        assert!(!matches("/ads/*/banner", "https://x.test/ads/banner"));
    }

    #[test]
    fn test_left_and_right_anchor() {
        assert!(matches("|https://cdn.test/app.js|", "https://cdn.test/app.js"));
        assert!(!matches("|https://cdn.test/app.js|", "https://cdn.test/app.js?x"));
        assert!(!matches("|http://cdn.test", "https://cdn.test/"));
    }

    #[test]
    fn test_regex_pattern() {
        assert!(matches(r"/ads[0-9]+\.js/", "https://x.test/ads12.js"));
        assert!(!matches(r"/ads[0-9]+\.js/", "https://x.test/ads.js"));
    }
}
