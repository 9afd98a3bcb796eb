//! The runtime matcher.
//!
//! [`Engine`] owns the active snapshot behind an atomic indirection plus
//! all mutable control-plane state: the decision cache, the trusted-site
//! set, the removeparam redirect guard and reusable scratch buffers.
//! There are no process globals; tests construct their own engines.
//!
//! Every entry point is synchronous, self-contained and fail-open: an
//! internal error yields ALLOW for that request, never an exception.

mod cosmetic;
mod headers;
mod network;
mod pattern;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use quick_cache::sync::Cache;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::decision::{CosmeticOutcome, Decision, HeaderOutcome, MatchOutcome};
use crate::error::Result;
use crate::hash::hash64;
use crate::request::RequestContext;
use crate::snapshot::format::NONE_U32;
use crate::snapshot::Snapshot;

/// Decision cache capacity.
const DECISION_CACHE_SIZE: usize = 4096;

/// Removeparam redirect-guard TTL.
const REMOVEPARAM_TTL: Duration = Duration::from_secs(10);

/// Guard map size that triggers a lazy prune.
const GUARD_PRUNE_LEN: usize = 512;

/// Verdict of the host's dynamic-filtering matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatrixVerdict {
    #[default]
    Noop,
    Allow,
    Block,
}

/// Host-provided dynamic-filtering collaborator, consulted before static
/// filtering. Implementations must not let overly broad rules block
/// main-frame requests; the engine enforces this guard as well.
pub trait DynamicFilter: Send + Sync {
    fn verdict(&self, ctx: &RequestContext<'_>) -> MatrixVerdict;
}

/// Snapshot metadata for the host UI.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotInfo {
    pub initialized: bool,
    pub size: usize,
    pub build_id: u32,
    pub rule_count: u32,
}

#[derive(Clone, Copy)]
struct CachedDecision {
    decision: u8,
    rule_id: u32,
    list_id: u16,
}

pub(crate) struct Scratch {
    pub tokens: Vec<u32>,
    pub req_suffixes: Vec<u64>,
    pub doc_suffixes: Vec<u64>,
    pub candidates: Vec<u32>,
    pub postings: Vec<u32>,
}

impl Default for Scratch {
    fn default() -> Self {
        Self {
            tokens: Vec::with_capacity(crate::url::MAX_TOKENS),
            req_suffixes: Vec::with_capacity(16),
            doc_suffixes: Vec::with_capacity(16),
            candidates: Vec::with_capacity(64),
            postings: Vec::with_capacity(64),
        }
    }
}

/// The content-filtering engine.
///
/// Lifecycle: `Empty -> Loaded -> Loaded' -> ...`. An empty engine answers
/// ALLOW for every query. [`Engine::init`] installs a fully validated
/// snapshot atomically and clears the decision cache; a rejected snapshot
/// leaves the previous one active.
pub struct Engine {
    snapshot: ArcSwapOption<Snapshot>,
    cache: Cache<u64, CachedDecision>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    trusted: RwLock<ahash::AHashSet<u64>>,
    removeparam_guard: Mutex<ahash::AHashMap<(i32, i32, u64), Instant>>,
    dynamic: RwLock<Option<Box<dyn DynamicFilter>>>,
    scratch: Mutex<Scratch>,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwapOption::empty(),
            cache: Cache::new(DECISION_CACHE_SIZE),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            trusted: RwLock::new(ahash::AHashSet::new()),
            removeparam_guard: Mutex::new(ahash::AHashMap::new()),
            dynamic: RwLock::new(None),
            scratch: Mutex::new(Scratch::default()),
        }
    }

    /// Validate `bytes` and install them as the active snapshot.
    ///
    /// On error the previous snapshot stays active.
    pub fn init(&self, bytes: Vec<u8>) -> Result<()> {
        let snapshot = Snapshot::load(bytes).map_err(|e| {
            log::warn!("snapshot rejected: {}", e);
            e
        })?;
        self.install(snapshot);
        Ok(())
    }

    /// Memory-map a snapshot file and install it.
    pub fn open(&self, path: &std::path::Path) -> Result<()> {
        let snapshot = Snapshot::open(path)?;
        self.install(snapshot);
        Ok(())
    }

    fn install(&self, snapshot: Snapshot) {
        self.snapshot.store(Some(Arc::new(snapshot)));
        // A cached decision must never outlive the snapshot it came from.
        self.cache.clear();
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        log::debug!("snapshot installed");
    }

    /// Drop the active snapshot, returning to the empty state.
    pub fn reset(&self) {
        self.snapshot.store(None);
        self.cache.clear();
    }

    pub fn is_initialized(&self) -> bool {
        self.snapshot.load().is_some()
    }

    pub fn snapshot_info(&self) -> SnapshotInfo {
        match self.snapshot.load().as_deref() {
            Some(s) => SnapshotInfo {
                initialized: true,
                size: s.size(),
                build_id: s.build_id(),
                rule_count: s.rule_count(),
            },
            None => SnapshotInfo::default(),
        }
    }

    /// Registrable domain of `host` under the active snapshot's PSL.
    /// Stable and idempotent; an empty engine echoes the host back.
    pub fn get_etld1(&self, host: &str) -> String {
        match self.snapshot.load().as_deref() {
            Some(s) => s.psl().etld1(host).to_ascii_lowercase(),
            None => host.to_ascii_lowercase(),
        }
    }

    /// Add a site (any host; its eTLD+1 is stored) to the trusted set.
    pub fn add_trusted_site(&self, host: &str) {
        let etld1 = self.get_etld1(host);
        self.trusted.write().insert(hash64(&etld1));
        self.cache.clear();
    }

    pub fn remove_trusted_site(&self, host: &str) {
        let etld1 = self.get_etld1(host);
        self.trusted.write().remove(&hash64(&etld1));
        self.cache.clear();
    }

    /// Install or clear the dynamic-filtering collaborator.
    pub fn set_dynamic_filter(&self, filter: Option<Box<dyn DynamicFilter>>) {
        *self.dynamic.write() = filter;
        self.cache.clear();
    }

    /// Decide a network request: ALLOW, BLOCK, REDIRECT or REMOVEPARAM,
    /// with the deciding rule when one exists.
    pub fn match_request(
        &self,
        url: &str,
        type_name: &str,
        initiator: Option<&str>,
        tab_id: i32,
        frame_id: i32,
        request_id: u64,
    ) -> MatchOutcome {
        catch_unwind(AssertUnwindSafe(|| {
            network::match_request(self, url, type_name, initiator, tab_id, frame_id, request_id)
        }))
        .unwrap_or_else(|_| {
            log::warn!("match_request failed internally; failing open");
            MatchOutcome::allow()
        })
    }

    /// Evaluate response headers for a document load.
    #[allow(clippy::too_many_arguments)]
    pub fn match_response_headers(
        &self,
        url: &str,
        type_name: &str,
        initiator: Option<&str>,
        tab_id: i32,
        frame_id: i32,
        request_id: u64,
        headers: &[(&str, &str)],
    ) -> HeaderOutcome {
        catch_unwind(AssertUnwindSafe(|| {
            headers::match_response_headers(
                self, url, type_name, initiator, tab_id, frame_id, request_id, headers,
            )
        }))
        .unwrap_or_else(|_| {
            log::warn!("match_response_headers failed internally; failing open");
            HeaderOutcome::default()
        })
    }

    /// Resolve the cosmetic payload for a document.
    pub fn match_cosmetics(
        &self,
        url: &str,
        type_name: &str,
        initiator: Option<&str>,
        tab_id: i32,
        frame_id: i32,
        request_id: u64,
    ) -> CosmeticOutcome {
        catch_unwind(AssertUnwindSafe(|| {
            cosmetic::match_cosmetics(self, url, type_name, initiator, tab_id, frame_id, request_id)
        }))
        .unwrap_or_else(|_| {
            log::warn!("match_cosmetics failed internally; failing open");
            CosmeticOutcome {
                enable_generic: true,
                ..Default::default()
            }
        })
    }

    /// Decision-cache hit rate, NaN before any lookup.
    pub fn cache_stats(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            f64::NAN
        } else {
            hits as f64 / total as f64
        }
    }

    // ---- internals shared with the pipeline modules --------------------

    pub(crate) fn snapshot(&self) -> arc_swap::Guard<Option<Arc<Snapshot>>> {
        self.snapshot.load()
    }

    pub(crate) fn scratch(&self) -> parking_lot::MutexGuard<'_, Scratch> {
        self.scratch.lock()
    }

    pub(crate) fn is_trusted(&self, etld1: &str) -> bool {
        if etld1.is_empty() {
            return false;
        }
        self.trusted.read().contains(&hash64(etld1))
    }

    pub(crate) fn dynamic_verdict(&self, ctx: &RequestContext<'_>) -> MatrixVerdict {
        match self.dynamic.read().as_ref() {
            Some(filter) => filter.verdict(ctx),
            None => MatrixVerdict::Noop,
        }
    }

    fn cache_key(ctx: &RequestContext<'_>) -> u64 {
        use std::hash::Hasher;
        let mut hasher = ahash::AHasher::default();
        hasher.write_u64(hash64(ctx.doc_etld1));
        hasher.write_u64(hash64(ctx.req_etld1));
        hasher.write_u16(ctx.type_bit.bits());
        hasher.write_u8(ctx.party_bit.bits());
        hasher.write_u8(ctx.scheme_bit.bits());
        hasher.write(ctx.url.as_bytes());
        hasher.finish()
    }

    pub(crate) fn cache_lookup(&self, ctx: &RequestContext<'_>) -> Option<MatchOutcome> {
        match self.cache.get(&Self::cache_key(ctx)) {
            Some(hit) => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                Some(MatchOutcome {
                    decision: Decision::from_u8(hit.decision).unwrap_or(Decision::Allow),
                    rule_id: (hit.rule_id != NONE_U32).then_some(hit.rule_id),
                    list_id: (hit.rule_id != NONE_U32).then_some(hit.list_id),
                    redirect_url: None,
                })
            }
            None => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache terminal ALLOW/BLOCK outcomes; URL-rewriting decisions are
    /// recomputed every time.
    pub(crate) fn cache_store(&self, ctx: &RequestContext<'_>, outcome: &MatchOutcome) {
        if !matches!(outcome.decision, Decision::Allow | Decision::Block) {
            return;
        }
        self.cache.insert(
            Self::cache_key(ctx),
            CachedDecision {
                decision: outcome.decision.as_u8(),
                rule_id: outcome.rule_id.unwrap_or(NONE_U32),
                list_id: outcome.list_id.unwrap_or(0),
            },
        );
    }

    /// Check-and-mark the removeparam redirect guard. Returns true when a
    /// rewrite for this (tab, frame, URL) happened within the TTL, in
    /// which case the caller answers ALLOW to break the loop.
    pub(crate) fn removeparam_suppressed(&self, ctx: &RequestContext<'_>) -> bool {
        let key = (ctx.tab_id, ctx.frame_id, hash64(ctx.url));
        let now = Instant::now();
        let mut guard = self.removeparam_guard.lock();
        if guard.len() > GUARD_PRUNE_LEN {
            guard.retain(|_, at| now.duration_since(*at) < REMOVEPARAM_TTL);
        }
        match guard.get(&key) {
            Some(at) if now.duration_since(*at) < REMOVEPARAM_TTL => true,
            _ => {
                guard.insert(key, now);
                false
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile_filter_lists;

    fn engine_with(lists: &[&str]) -> Engine {
        let out = compile_filter_lists(lists).unwrap();
        let engine = Engine::new();
        engine.init(out.snapshot).unwrap();
        engine
    }

    #[test]
    fn test_empty_engine_allows_everything() {
        let engine = Engine::new();
        assert!(!engine.is_initialized());
        let outcome = engine.match_request(
            "https://ads.doubleclick.net/pixel.gif",
            "image",
            Some("https://news.example.com/"),
            1,
            0,
            1,
        );
        assert_eq!(outcome.decision, Decision::Allow);
        assert!(!engine.snapshot_info().initialized);
    }

    #[test]
    fn test_init_and_reset() {
        let engine = engine_with(&["||ads.test^\n"]);
        assert!(engine.is_initialized());
        assert!(engine.snapshot_info().rule_count >= 1);

        let blocked =
            engine.match_request("https://ads.test/x.gif", "image", Some("https://a.test/"), 1, 0, 1);
        assert_eq!(blocked.decision, Decision::Block);

        engine.reset();
        assert!(!engine.is_initialized());
        let allowed =
            engine.match_request("https://ads.test/x.gif", "image", Some("https://a.test/"), 1, 0, 2);
        assert_eq!(allowed.decision, Decision::Allow);
    }

    #[test]
    fn test_bad_snapshot_keeps_previous() {
        let engine = engine_with(&["||ads.test^\n"]);
        assert!(engine.init(vec![0u8; 256]).is_err());
        assert!(engine.is_initialized());
        let outcome =
            engine.match_request("https://ads.test/x.gif", "image", Some("https://a.test/"), 1, 0, 1);
        assert_eq!(outcome.decision, Decision::Block);
    }

    #[test]
    fn test_swap_changes_decisions_and_clears_cache() {
        let engine = engine_with(&["||ads.test^\n"]);
        let url = "https://ads.test/x.gif";
        assert_eq!(
            engine
                .match_request(url, "image", Some("https://a.test/"), 1, 0, 1)
                .decision,
            Decision::Block
        );
        // Second call hits the decision cache.
        engine.match_request(url, "image", Some("https://a.test/"), 1, 0, 2);
        assert!(engine.cache_stats() > 0.0);

        let out = compile_filter_lists(&["||other.test^\n"]).unwrap();
        engine.init(out.snapshot).unwrap();
        assert_eq!(
            engine
                .match_request(url, "image", Some("https://a.test/"), 1, 0, 3)
                .decision,
            Decision::Allow
        );
    }

    #[test]
    fn test_trusted_site_bypass() {
        let engine = engine_with(&["||ads.test^\n"]);
        engine.add_trusted_site("www.news.test");
        let outcome = engine.match_request(
            "https://ads.test/x.gif",
            "image",
            Some("https://news.test/"),
            1,
            0,
            1,
        );
        assert_eq!(outcome.decision, Decision::Allow);

        engine.remove_trusted_site("news.test");
        let outcome = engine.match_request(
            "https://ads.test/x.gif",
            "image",
            Some("https://news.test/"),
            1,
            0,
            2,
        );
        assert_eq!(outcome.decision, Decision::Block);
    }

    #[test]
    fn test_dynamic_filter_short_circuit() {
        struct BlockAll;
        impl DynamicFilter for BlockAll {
            fn verdict(&self, _ctx: &RequestContext<'_>) -> MatrixVerdict {
                MatrixVerdict::Block
            }
        }

        let engine = engine_with(&["||unrelated.test^\n"]);
        engine.set_dynamic_filter(Some(Box::new(BlockAll)));

        let outcome =
            engine.match_request("https://x.test/a.js", "script", Some("https://a.test/"), 1, 0, 1);
        assert_eq!(outcome.decision, Decision::Block);
        assert!(outcome.rule_id.is_none());

        // The broad-rule guard: a matrix BLOCK never cancels a main_frame.
        let outcome = engine.match_request("https://x.test/", "main_frame", None, 1, 0, 2);
        assert_eq!(outcome.decision, Decision::Allow);
    }

    #[test]
    fn test_get_etld1_idempotent() {
        let engine = engine_with(&["||ads.test^\n"]);
        let once = engine.get_etld1("a.b.example.com");
        assert_eq!(once, "example.com");
        assert_eq!(engine.get_etld1(&once), once);
    }
}
