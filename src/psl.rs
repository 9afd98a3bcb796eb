//! Public Suffix List support.
//!
//! The PSL is compiled into three Hash64 sets (exact suffixes, wildcard
//! suffixes, exceptions) that ride inside the snapshot. At match time the
//! registrable domain (eTLD+1) is resolved with a label walk over those
//! sets; no suffix strings are kept in memory.

use once_cell::sync::Lazy;

use crate::hash::hash64;

static DEFAULT_SETS: Lazy<PslBuilder> = Lazy::new(|| PslBuilder::parse(DEFAULT_PSL));

/// A compact default suffix list for tests and the CLI. Hosts embedding the
/// engine are expected to compile with the full publicsuffix.org data.
pub const DEFAULT_PSL: &str = "\
com\nnet\norg\nio\nco\ngov\nedu\nmil\nint\ninfo\nbiz\nxyz\napp\ndev\n\
site\nonline\nstore\nblog\nme\ntv\ncc\nus\nuk\nco.uk\norg.uk\nac.uk\n\
de\nfr\nnl\nit\nes\npt\nse\nno\nfi\ndk\npl\ncz\nru\nua\njp\nco.jp\n\
ne.jp\ncn\ncom.cn\nau\ncom.au\nnet.au\nbr\ncom.br\nin\nco.in\nca\neu\n\
ch\nat\nbe\ntest\nexample\ninvalid\nlocalhost\ngithub.io\n*.ck\n!www.ck\n";

/// Parsed PSL data: three deduplicated, sorted hash sets.
#[derive(Debug, Default, Clone)]
pub struct PslBuilder {
    pub exact: Vec<u64>,
    pub wildcard: Vec<u64>,
    pub exception: Vec<u64>,
}

impl PslBuilder {
    /// Parse publicsuffix.org formatted text.
    ///
    /// Comment lines (`//`) and section markers are skipped. Non-ASCII
    /// entries are punycoded so lookups against ASCII hostnames work.
    pub fn parse(text: &str) -> Self {
        let mut builder = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            let entry = line.split_whitespace().next().unwrap_or("");
            if entry.is_empty() {
                continue;
            }

            let (set, suffix) = if let Some(rest) = entry.strip_prefix('!') {
                (&mut builder.exception, rest)
            } else if let Some(rest) = entry.strip_prefix("*.") {
                (&mut builder.wildcard, rest)
            } else {
                (&mut builder.exact, entry)
            };

            let suffix = suffix.trim_matches('.');
            if suffix.is_empty() {
                continue;
            }

            if suffix.is_ascii() {
                set.push(hash64(suffix));
            } else if let Ok(ascii) = idna::domain_to_ascii(suffix) {
                set.push(hash64(&ascii));
            }
        }

        builder.exact.sort_unstable();
        builder.exact.dedup();
        builder.wildcard.sort_unstable();
        builder.wildcard.dedup();
        builder.exception.sort_unstable();
        builder.exception.dedup();
        builder
    }

    /// The sets for [`DEFAULT_PSL`], parsed once and shared.
    pub fn default_sets() -> &'static PslBuilder {
        &DEFAULT_SETS
    }
}

/// Read-only view over the three serialized PSL hash sets.
///
/// Each set is an open-addressed array of little-endian u64 slots with a
/// power-of-two capacity; 0 marks an empty slot.
#[derive(Clone, Copy)]
pub struct PslView<'a> {
    pub exact: &'a [u8],
    pub wildcard: &'a [u8],
    pub exception: &'a [u8],
}

#[inline]
fn set_contains(table: &[u8], hash: u64) -> bool {
    let capacity = table.len() / 8;
    if capacity == 0 {
        return false;
    }
    let mask = capacity - 1;
    let mut idx = hash as usize & mask;
    for _ in 0..capacity {
        let off = idx * 8;
        let slot = u64::from_le_bytes(table[off..off + 8].try_into().unwrap());
        if slot == 0 {
            return false;
        }
        if slot == hash {
            return true;
        }
        idx = (idx + 1) & mask;
    }
    false
}

impl<'a> PslView<'a> {
    /// Registrable domain (eTLD+1) of `host`, as a subslice of the input.
    ///
    /// Returns the host unchanged when it is itself a public suffix, a
    /// single label, or an IP literal; returns `""` only for empty input.
    /// The result is idempotent: `etld1(etld1(h)) == etld1(h)`.
    pub fn etld1<'h>(&self, host: &'h str) -> &'h str {
        let host = host.trim_end_matches('.');
        if host.is_empty() || is_ip_literal(host) {
            return host;
        }

        // Label start offsets, most specific first.
        let mut starts = [0usize; 64];
        let mut count = 0;
        starts[count] = 0;
        count += 1;
        for (i, b) in host.bytes().enumerate() {
            if b == b'.' && count < starts.len() {
                starts[count] = i + 1;
                count += 1;
            }
        }

        // Exception rules win outright: the registrable domain is the
        // exception itself.
        for &start in starts.iter().take(count) {
            if set_contains(self.exception, hash64(&host[start..])) {
                return &host[start..];
            }
        }

        // Longest public suffix wins; rule sets may have gaps, so every
        // suffix is tested.
        let mut public_idx = None;
        for i in (0..count).rev() {
            let suffix = &host[starts[i]..];
            let by_exact = set_contains(self.exact, hash64(suffix));
            let by_wildcard =
                i + 1 < count && set_contains(self.wildcard, hash64(&host[starts[i + 1]..]));
            if by_exact || by_wildcard {
                public_idx = Some(i);
            }
        }

        match public_idx {
            Some(0) => host,
            Some(i) => &host[starts[i - 1]..],
            // Default rule "*": the TLD is the last label.
            None if count >= 2 => &host[starts[count - 2]..],
            None => host,
        }
    }
}

fn is_ip_literal(host: &str) -> bool {
    if host.contains(':') {
        return true;
    }
    host.bytes().all(|b| b.is_ascii_digit() || b == b'.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::writer::build_hash64_set;

    fn view_from(builder: &PslBuilder) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        (
            build_hash64_set(&builder.exact),
            build_hash64_set(&builder.wildcard),
            build_hash64_set(&builder.exception),
        )
    }

    #[test]
    fn test_etld1_basic() {
        let builder = PslBuilder::parse(DEFAULT_PSL);
        let (exact, wildcard, exception) = view_from(&builder);
        let psl = PslView {
            exact: &exact,
            wildcard: &wildcard,
            exception: &exception,
        };

        assert_eq!(psl.etld1("ads.doubleclick.net"), "doubleclick.net");
        assert_eq!(psl.etld1("doubleclick.net"), "doubleclick.net");
        assert_eq!(psl.etld1("www.bbc.co.uk"), "bbc.co.uk");
        assert_eq!(psl.etld1("com"), "com");
        assert_eq!(psl.etld1(""), "");
    }

    #[test]
    fn test_etld1_wildcard_and_exception() {
        let builder = PslBuilder::parse(DEFAULT_PSL);
        let (exact, wildcard, exception) = view_from(&builder);
        let psl = PslView {
            exact: &exact,
            wildcard: &wildcard,
            exception: &exception,
        };

        // *.ck makes foo.ck a public suffix.
        assert_eq!(psl.etld1("a.foo.ck"), "a.foo.ck");
        // !www.ck cancels the wildcard.
        assert_eq!(psl.etld1("www.ck"), "www.ck");
        assert_eq!(psl.etld1("sub.www.ck"), "www.ck");
    }

    #[test]
    fn test_etld1_idempotent() {
        let builder = PslBuilder::parse(DEFAULT_PSL);
        let (exact, wildcard, exception) = view_from(&builder);
        let psl = PslView {
            exact: &exact,
            wildcard: &wildcard,
            exception: &exception,
        };

        for host in ["a.b.example.com", "example.co.uk", "com", "10.0.0.1", "x"] {
            let once = psl.etld1(host);
            assert_eq!(psl.etld1(once), once);
        }
    }

    #[test]
    fn test_ip_literals_pass_through() {
        let psl = PslView {
            exact: &[],
            wildcard: &[],
            exception: &[],
        };
        assert_eq!(psl.etld1("192.168.0.1"), "192.168.0.1");
        assert_eq!(psl.etld1("::1"), "::1");
    }

    #[test]
    fn test_parse_skips_comments() {
        let builder = PslBuilder::parse("// comment\ncom\n\n*.ck\n!www.ck\n");
        assert_eq!(builder.exact.len(), 1);
        assert_eq!(builder.wildcard.len(), 1);
        assert_eq!(builder.exception.len(), 1);
    }
}
