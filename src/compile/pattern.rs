//! Pattern compilation: ABP pattern text to verification programs, plus
//! index-token selection.

use super::parse::NetworkRule;
use super::SkipReason;

/// How a rule's pattern is represented in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternKind {
    /// Matches every URL (pattern id sentinel).
    MatchAll,
    /// `||host^` and friends: a pure hostname suffix test.
    HostOnly { host: String },
    /// An opcode program.
    Program(ProgramPattern),
    /// A whole-URL regex.
    Regex(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramPattern {
    pub ops: Vec<Op>,
    pub anchor: u8,
    /// Anchor hostname for host-anchored programs.
    pub anchor_host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    FindLit(String),
    AssertStart,
    AssertEnd,
    AssertBoundary,
    SkipAny,
    HostAnchor,
}

/// Compile a parsed rule's pattern.
pub fn compile_pattern(rule: &NetworkRule, max_regex_len: usize) -> Result<PatternKind, SkipReason> {
    if rule.is_regex {
        if rule.pattern.len() > max_regex_len {
            return Err(SkipReason::RegexTooLong);
        }
        if !is_safe_regex(&rule.pattern) {
            return Err(SkipReason::UnsafeRegex);
        }
        if regex::Regex::new(&rule.pattern).is_err() {
            return Err(SkipReason::BadRegex);
        }
        return Ok(PatternKind::Regex(rule.pattern.clone()));
    }

    if rule.pattern.is_empty() {
        return Ok(PatternKind::MatchAll);
    }

    let mut host_anchor = rule.host_anchor;
    let mut anchor_host = None;
    if host_anchor {
        let host_end = rule
            .pattern
            .find(['/', '^', '*', '?'])
            .unwrap_or(rule.pattern.len());
        let host = rule.pattern[..host_end].trim_matches('.');
        if host.is_empty() {
            host_anchor = false;
        } else {
            let rest = &rule.pattern[host_end..];
            if (rest.is_empty() || rest == "^") && !rule.right_anchor {
                return Ok(PatternKind::HostOnly {
                    host: host.to_ascii_lowercase(),
                });
            }
            anchor_host = Some(host.to_ascii_lowercase());
        }
    }

    let mut ops = Vec::new();
    let anchor = if host_anchor {
        ops.push(Op::HostAnchor);
        crate::snapshot::format::anchor::HOST
    } else if rule.left_anchor {
        ops.push(Op::AssertStart);
        crate::snapshot::format::anchor::LEFT
    } else {
        crate::snapshot::format::anchor::NONE
    };

    let mut literal = String::new();
    for c in rule.pattern.chars() {
        match c {
            '*' => {
                if !literal.is_empty() {
                    ops.push(Op::FindLit(std::mem::take(&mut literal)));
                }
                ops.push(Op::SkipAny);
            }
            '^' => {
                if !literal.is_empty() {
                    ops.push(Op::FindLit(std::mem::take(&mut literal)));
                }
                ops.push(Op::AssertBoundary);
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        ops.push(Op::FindLit(literal));
    }
    if rule.right_anchor {
        ops.push(Op::AssertEnd);
    }

    Ok(PatternKind::Program(ProgramPattern {
        ops,
        anchor,
        anchor_host,
    }))
}

/// Extract the usable index tokens of a pattern: alphanumeric runs of
/// length >= 3 whose ends are hard boundaries in the pattern. A run
/// touching a wildcard or an unanchored pattern edge may continue inside a
/// URL, so it cannot serve as an index key.
pub fn candidate_tokens(rule: &NetworkRule) -> Vec<String> {
    if rule.is_regex {
        return Vec::new();
    }
    let bytes = rule.pattern.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_alphanumeric() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
            i += 1;
        }
        if i - start < crate::url::MIN_TOKEN_LEN {
            continue;
        }
        let left_ok = if start == 0 {
            rule.host_anchor || rule.left_anchor
        } else {
            bytes[start - 1] != b'*'
        };
        let right_ok = if i == bytes.len() {
            rule.right_anchor
        } else {
            bytes[i] != b'*'
        };
        if left_ok && right_ok {
            tokens.push(rule.pattern[start..i].to_ascii_lowercase());
        }
    }
    tokens
}

/// Conservative safety predicate for authored regexes: bounded repetition,
/// bounded nesting and alternation, no backreferences.
pub fn is_safe_regex(source: &str) -> bool {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut max_depth = 0usize;
    let mut alternations = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if let Some(&next) = bytes.get(i + 1) {
                    if next.is_ascii_digit() {
                        return false; // backreference
                    }
                    i += 2;
                    continue;
                }
                return false;
            }
            b'(' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            b')' => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            b'|' => alternations += 1,
            b'{' => {
                let close = match source[i..].find('}') {
                    Some(rel) => i + rel,
                    None => return false,
                };
                let body = &source[i + 1..close];
                let mut parts = body.splitn(2, ',');
                let low: u32 = match parts.next().unwrap_or("").trim() {
                    "" => 0,
                    s => match s.parse() {
                        Ok(v) => v,
                        Err(_) => return false,
                    },
                };
                let high: u32 = match parts.next() {
                    Some("") | None => low.max(1),
                    Some(s) => match s.trim().parse() {
                        Ok(v) => v,
                        Err(_) => return false,
                    },
                };
                if high > 256 || low > high {
                    return false;
                }
                i = close;
            }
            _ => {}
        }
        i += 1;
    }
    depth == 0 && max_depth <= 8 && alternations <= 32
}

#[cfg(test)]
mod tests {
    use super::super::parse::parse_network;
    use super::*;
    use crate::snapshot::format::anchor;

    fn kind_of(line: &str) -> PatternKind {
        compile_pattern(&parse_network(line).unwrap(), 128).unwrap()
    }

    #[test]
    fn test_host_only() {
        assert_eq!(
            kind_of("||doubleclick.net^"),
            PatternKind::HostOnly {
                host: "doubleclick.net".into()
            }
        );
        assert_eq!(
            kind_of("||doubleclick.net"),
            PatternKind::HostOnly {
                host: "doubleclick.net".into()
            }
        );
    }

    #[test]
    fn test_host_anchored_program() {
        match kind_of("||googletagmanager.com/gtm.js") {
            PatternKind::Program(p) => {
                assert_eq!(p.anchor, anchor::HOST);
                assert_eq!(p.anchor_host.as_deref(), Some("googletagmanager.com"));
                assert_eq!(p.ops[0], Op::HostAnchor);
                assert_eq!(p.ops[1], Op::FindLit("googletagmanager.com/gtm.js".into()));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_boundary_and_wildcard_program() {
        match kind_of("/banner^*ads") {
            PatternKind::Program(p) => {
                assert_eq!(
                    p.ops,
                    vec![
                        Op::FindLit("/banner".into()),
                        Op::AssertBoundary,
                        Op::SkipAny,
                        Op::FindLit("ads".into()),
                    ]
                );
                assert_eq!(p.anchor, anchor::NONE);
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_left_right_anchor_program() {
        match kind_of("|https://cdn.test/app.js|") {
            PatternKind::Program(p) => {
                assert_eq!(p.anchor, anchor::LEFT);
                assert_eq!(p.ops.first(), Some(&Op::AssertStart));
                assert_eq!(p.ops.last(), Some(&Op::AssertEnd));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_match_all() {
        assert_eq!(kind_of("*$removeparam=gclid"), PatternKind::MatchAll);
    }

    #[test]
    fn test_regex_kind_and_limits() {
        assert_eq!(
            kind_of(r"/ads[0-9]+/"),
            PatternKind::Regex("ads[0-9]+".into())
        );
        let rule = parse_network(r"/(a+)+b\1/").unwrap();
        assert_eq!(
            compile_pattern(&rule, 128).unwrap_err(),
            SkipReason::UnsafeRegex
        );
        let long = format!("/{}/", "a".repeat(300));
        let rule = parse_network(&long).unwrap();
        assert_eq!(
            compile_pattern(&rule, 128).unwrap_err(),
            SkipReason::RegexTooLong
        );
    }

    #[test]
    fn test_candidate_tokens() {
        let rule = parse_network("/banner.gif$domain=example.com").unwrap();
        assert_eq!(candidate_tokens(&rule), vec!["banner", "gif"]);

        // "gif" is usable, the run before the wildcard is not.
        let rule = parse_network("/banner*.gif").unwrap();
        assert_eq!(candidate_tokens(&rule), vec!["gif"]);

        // Unanchored edges are unusable.
        let rule = parse_network("banner").unwrap();
        assert!(candidate_tokens(&rule).is_empty());

        // Host-anchored start is a hard boundary.
        let rule = parse_network("||example.com/pixel/img").unwrap();
        assert_eq!(candidate_tokens(&rule), vec!["example", "com", "pixel"]);
    }

    #[test]
    fn test_safe_regex_predicate() {
        assert!(is_safe_regex(r"ads[0-9]+\.js"));
        assert!(is_safe_regex(r"^https?://(www\.)?track"));
        assert!(!is_safe_regex(r"(a)\1"));
        assert!(!is_safe_regex(r"a{1,10000}"));
        assert!(!is_safe_regex("(((((((((a)))))))))"));
        assert!(!is_safe_regex("(a"));
    }
}
