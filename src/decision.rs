//! Match decisions and per-call outcome records.

use std::fmt;

/// Decision returned for a network request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Decision {
    /// Let the request through
    #[default]
    Allow = 0,
    /// Cancel the request
    Block = 1,
    /// Substitute a packaged surrogate resource
    Redirect = 2,
    /// Rewrite the URL with tracking parameters removed
    Removeparam = 3,
}

impl Decision {
    /// Convert from the wire encoding.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Decision::Allow),
            1 => Some(Decision::Block),
            2 => Some(Decision::Redirect),
            3 => Some(Decision::Removeparam),
            _ => None,
        }
    }

    /// Wire encoding of the decision.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Block => "BLOCK",
            Decision::Redirect => "REDIRECT",
            Decision::Removeparam => "REMOVEPARAM",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of [`crate::Engine::match_request`].
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub decision: Decision,
    /// Deciding rule, if any.
    pub rule_id: Option<u32>,
    /// Provenance of the deciding rule.
    pub list_id: Option<u16>,
    /// Present only for `Redirect` and `Removeparam`. A leading `/` marks a
    /// packaged resource path to be resolved by the host.
    pub redirect_url: Option<String>,
}

impl MatchOutcome {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn block(rule_id: u32, list_id: u16) -> Self {
        Self {
            decision: Decision::Block,
            rule_id: Some(rule_id),
            list_id: Some(list_id),
            redirect_url: None,
        }
    }
}

/// Result of [`crate::Engine::match_response_headers`].
#[derive(Debug, Clone, Default)]
pub struct HeaderOutcome {
    /// Cancel the response outright.
    pub cancel: bool,
    pub rule_id: Option<u32>,
    pub list_id: Option<u16>,
    /// Content-Security-Policy directives to append.
    pub csp: Vec<String>,
    /// Response headers to strip (always within the safe allowlist).
    pub remove_headers: Vec<String>,
}

/// A scriptlet invocation to inject at document-start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scriptlet {
    pub name: String,
    pub args: Vec<String>,
}

/// Result of [`crate::Engine::match_cosmetics`].
#[derive(Debug, Clone, Default)]
pub struct CosmeticOutcome {
    /// Combined stylesheet for the document.
    pub css: String,
    /// Whether generic selectors may be applied.
    pub enable_generic: bool,
    /// Procedural cosmetic programs, as authored.
    pub procedural: Vec<String>,
    /// Hostname-specific scriptlet invocations.
    pub scriptlets: Vec<Scriptlet>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_wire_encoding() {
        assert_eq!(Decision::Allow.as_u8(), 0);
        assert_eq!(Decision::Block.as_u8(), 1);
        assert_eq!(Decision::Redirect.as_u8(), 2);
        assert_eq!(Decision::Removeparam.as_u8(), 3);
        assert_eq!(Decision::from_u8(2), Some(Decision::Redirect));
        assert_eq!(Decision::from_u8(9), None);
    }

    #[test]
    fn test_decision_display() {
        assert_eq!(Decision::Block.to_string(), "BLOCK");
        assert_eq!(Decision::Removeparam.to_string(), "REMOVEPARAM");
    }
}
