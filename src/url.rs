//! Fast URL span parsing, tokenization and query rewriting.
//!
//! The hot path never runs a general URL parser: it only needs the scheme,
//! host and authority boundaries, located with a single forward scan.

use crate::hash::token_hash;

/// Maximum number of index tokens drawn from one URL.
pub const MAX_TOKENS: usize = 32;

/// Minimum token length.
pub const MIN_TOKEN_LEN: usize = 3;

/// Byte spans of the interesting parts of a URL.
#[derive(Debug, Clone, Copy)]
pub struct UrlView<'a> {
    pub raw: &'a str,
    pub scheme_end: usize,
    pub host_start: usize,
    pub host_end: usize,
}

impl<'a> UrlView<'a> {
    /// Locate scheme and host boundaries. Returns `None` for URLs without
    /// an authority component (`about:blank`, `data:` and friends).
    pub fn parse(url: &'a str) -> Option<Self> {
        let scheme_end = url.find("://")?;
        if scheme_end == 0 {
            return None;
        }
        let mut host_start = scheme_end + 3;

        let authority_end = url[host_start..]
            .find(['/', '?', '#'])
            .map(|i| host_start + i)
            .unwrap_or(url.len());

        // Skip userinfo if present.
        if let Some(at) = url[host_start..authority_end].rfind('@') {
            host_start += at + 1;
        }

        let host_end = url[host_start..authority_end]
            .find(':')
            .map(|i| host_start + i)
            .unwrap_or(authority_end);

        Some(Self {
            raw: url,
            scheme_end,
            host_start,
            host_end,
        })
    }

    pub fn scheme(&self) -> &'a str {
        &self.raw[..self.scheme_end]
    }

    pub fn host(&self) -> &'a str {
        &self.raw[self.host_start..self.host_end]
    }
}

/// Hash the alphanumeric tokens of `url` into `out`, in order of
/// appearance after the scheme. At most [`MAX_TOKENS`] tokens, each at
/// least [`MIN_TOKEN_LEN`] bytes, case-folded by the hasher.
pub fn tokenize(url: &str, from: usize, out: &mut Vec<u32>) {
    out.clear();
    let bytes = url.as_bytes();
    let mut i = from.min(bytes.len());
    while i < bytes.len() && out.len() < MAX_TOKENS {
        while i < bytes.len() && !bytes[i].is_ascii_alphanumeric() {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphanumeric() {
            i += 1;
        }
        if i - start >= MIN_TOKEN_LEN {
            out.push(token_hash(&bytes[start..i]));
        }
    }
}

/// Rewrite `url` with every query parameter for which `remove` returns
/// true deleted. The closure receives the raw `name=value` segment.
///
/// Returns `None` when the URL has no query or nothing was removed.
pub fn strip_query_params(url: &str, mut remove: impl FnMut(&str) -> bool) -> Option<String> {
    let q = url.find('?')?;
    let frag = url[q..].find('#').map(|i| q + i).unwrap_or(url.len());
    let query = &url[q + 1..frag];
    if query.is_empty() {
        return None;
    }

    let mut kept: Vec<&str> = Vec::new();
    let mut removed = false;
    for param in query.split('&') {
        if !param.is_empty() && remove(param) {
            removed = true;
        } else {
            kept.push(param);
        }
    }
    if !removed {
        return None;
    }

    let mut out = String::with_capacity(url.len());
    out.push_str(&url[..q]);
    if !kept.is_empty() {
        out.push('?');
        out.push_str(&kept.join("&"));
    }
    out.push_str(&url[frag..]);
    Some(out)
}

/// Name part of a raw `name=value` query segment.
pub fn param_name(param: &str) -> &str {
    param.split('=').next().unwrap_or(param)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spans() {
        let v = UrlView::parse("https://ads.example.com/pixel.gif?x=1").unwrap();
        assert_eq!(v.scheme(), "https");
        assert_eq!(v.host(), "ads.example.com");
    }

    #[test]
    fn test_parse_port_and_userinfo() {
        let v = UrlView::parse("http://user:pw@test.org:8080/x").unwrap();
        assert_eq!(v.host(), "test.org");

        let v = UrlView::parse("ws://echo.example.com:9000").unwrap();
        assert_eq!(v.scheme(), "ws");
        assert_eq!(v.host(), "echo.example.com");
    }

    #[test]
    fn test_parse_no_authority() {
        assert!(UrlView::parse("about:blank").is_none());
        assert!(UrlView::parse("://nope").is_none());
    }

    #[test]
    fn test_tokenize_bounds() {
        let url = "https://example.com/ads/banner.gif?id=ab";
        let v = UrlView::parse(url).unwrap();
        let mut out = Vec::new();
        tokenize(url, v.scheme_end + 3, &mut out);
        // example, com, ads, banner, gif ("id" and "ab" are too short)
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], token_hash(b"example"));
        assert_eq!(out[4], token_hash(b"gif"));
    }

    #[test]
    fn test_tokenize_cap() {
        let mut url = String::from("https://x.test/");
        for i in 0..50 {
            url.push_str(&format!("seg{:03}/", i));
        }
        let mut out = Vec::new();
        tokenize(&url, 8, &mut out);
        assert_eq!(out.len(), MAX_TOKENS);
    }

    #[test]
    fn test_strip_query_params() {
        let url = "https://shop.example.com/p?gclid=abc&x=1";
        let out = strip_query_params(url, |p| param_name(p) == "gclid").unwrap();
        assert_eq!(out, "https://shop.example.com/p?x=1");

        // Removing everything drops the '?'.
        let out = strip_query_params(url, |_| true).unwrap();
        assert_eq!(out, "https://shop.example.com/p");

        // Nothing matched: no rewrite.
        assert!(strip_query_params(url, |p| param_name(p) == "zz").is_none());
        assert!(strip_query_params("https://a.test/x", |_| true).is_none());
    }

    #[test]
    fn test_strip_preserves_fragment() {
        let url = "https://a.test/p?utm=1&keep=2#frag";
        let out = strip_query_params(url, |p| param_name(p) == "utm").unwrap();
        assert_eq!(out, "https://a.test/p?keep=2#frag");
    }

    #[test]
    fn test_strip_idempotent() {
        let url = "https://a.test/p?gclid=1&x=2";
        let once = strip_query_params(url, |p| param_name(p) == "gclid").unwrap();
        assert!(strip_query_params(&once, |p| param_name(p) == "gclid").is_none());
    }
}
