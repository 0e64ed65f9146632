use crate::cache::{CacheConfig, ResponseCache, SharedResponseCache};
use crate::error::Error;
use crate::fingerprint::Fingerprint;
use crate::queue::PrefetchQueue;
use crate::request_options::RequestOptions;
use crate::transport::Transport;
use chrono::Duration;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use strum_macros::{Display, EnumString};
use surf::Url;

/// When a candidate target moves from unconsidered to scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PrefetchStrategy {
    /// Pointer hover (debounced) or first touch.
    Hover,
    /// Viewport-intersection signals with a lookahead margin.
    Visible,
    /// High-priority targets scheduled immediately at registration.
    Eager,
}

/// Lifecycle of a candidate target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetState {
    Unconsidered,
    Scheduled,
    Fetching,
    Cached,
    Skipped,
}

/// A navigational target the embedder has observed.
#[derive(Clone, Debug)]
pub struct PrefetchTarget {
    pub url: String,
    /// Explicitly marked for eager prefetch.
    pub high_priority: bool,
    /// Explicit opt-out marker on the element.
    pub opt_out: bool,
}

impl PrefetchTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            high_priority: false,
            opt_out: false,
        }
    }

    pub fn high_priority(mut self) -> Self {
        self.high_priority = true;
        self
    }

    pub fn opt_out(mut self) -> Self {
        self.opt_out = true;
        self
    }
}

struct TargetEntry {
    state: TargetState,
    attempts: u32,
    opt_out: bool,
}

impl TargetEntry {
    fn from_target(target: &PrefetchTarget) -> Self {
        Self {
            state: TargetState::Unconsidered,
            attempts: 0,
            opt_out: target.opt_out,
        }
    }
}

/// Configuration for the prefetch engine.
#[derive(Clone, Debug)]
pub struct PrefetchConfig {
    /// Cap on simultaneous speculative fetches.
    pub max_concurrent: usize,
    /// Quiet period before a hover schedules a prefetch, so fly-over
    /// pointer movement does not fire.
    pub hover_debounce: Duration,
    /// How far ahead of the viewport the embedder should report
    /// visibility, in pixels.
    pub lookahead_margin_px: u32,
    /// Origin for same-origin eligibility; absolute URLs on a different
    /// origin are skipped. Relative URLs always pass.
    pub origin: Option<String>,
    /// Speculative attempts per target before it is marked skipped.
    pub max_attempts: u32,
    /// TTL/size bounds for the speculative value store.
    pub store: CacheConfig,
    pub strategy: PrefetchStrategy,
    pub enabled: bool,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            hover_debounce: Duration::milliseconds(50),
            lookahead_margin_px: 200,
            origin: None,
            max_attempts: 3,
            store: CacheConfig::default(),
            strategy: PrefetchStrategy::Hover,
            enabled: true,
        }
    }
}

impl PrefetchConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_concurrent == 0 {
            return Err(Error::Configuration(
                "max concurrent prefetch must be at least 1".to_string(),
            ));
        }
        if self.hover_debounce < Duration::zero() {
            return Err(Error::Configuration(format!(
                "hover debounce must not be negative, got {}ms",
                self.hover_debounce.num_milliseconds()
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::Configuration(
                "max prefetch attempts must be at least 1".to_string(),
            ));
        }
        self.store.validate()
    }
}

/// Speculative cache warmer.
///
/// Pointer, touch and visibility signals feed a per-target state machine;
/// eligible targets go through the bounded prefetch queue and land in a
/// separate short-lived store that real navigations consult before hitting
/// the network. Prefetch is best-effort: failures are logged and the target
/// becomes eligible again, never surfaced to the caller.
pub struct Prefetcher {
    config: PrefetchConfig,
    targets: DashMap<String, TargetEntry>,
    fetched: DashMap<Fingerprint, ()>,
    store: SharedResponseCache,
    queue: PrefetchQueue,
    transport: Arc<dyn Transport>,
    enabled: AtomicBool,
    strategy: RwLock<PrefetchStrategy>,
    /// Active hover markers, keyed by URL. Entries are removed when the
    /// hover resolves, is superseded or the pointer leaves, so the map only
    /// holds URLs with a timer pending. Generations come from one shared
    /// counter so a marker re-created after a leave can never collide with
    /// an older timer.
    hover_generations: DashMap<String, u64>,
    hover_seq: AtomicU64,
    enqueued_total: AtomicU64,
    completed_total: AtomicU64,
    failed_total: AtomicU64,
    skipped_total: AtomicU64,
}

impl Prefetcher {
    /// Build the engine. Callers validate the config beforehand (see
    /// [`PrefetchConfig::validate`]).
    pub fn new(config: PrefetchConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let store = Arc::new(ResponseCache::new(config.store.clone()));
        let queue = PrefetchQueue::start(config.max_concurrent);

        Arc::new(Self {
            enabled: AtomicBool::new(config.enabled),
            strategy: RwLock::new(config.strategy),
            config,
            targets: DashMap::new(),
            fetched: DashMap::new(),
            store,
            queue,
            transport,
            hover_generations: DashMap::new(),
            hover_seq: AtomicU64::new(0),
            enqueued_total: AtomicU64::new(0),
            completed_total: AtomicU64::new(0),
            failed_total: AtomicU64::new(0),
            skipped_total: AtomicU64::new(0),
        })
    }

    /// Register a candidate target. With the eager strategy, high-priority
    /// targets are scheduled immediately.
    pub fn register_target(self: &Arc<Self>, target: PrefetchTarget) {
        let url = target.url.clone();
        self.targets
            .entry(url.clone())
            .or_insert_with(|| TargetEntry::from_target(&target));

        if self.strategy() == PrefetchStrategy::Eager && target.high_priority {
            self.schedule(&url);
        }
    }

    /// Pointer entered a target. Debounced so fly-over movement does not
    /// trigger a fetch.
    pub fn on_pointer_hover(self: &Arc<Self>, url: &str) {
        if !self.is_enabled() || self.strategy() != PrefetchStrategy::Hover {
            return;
        }

        let generation = self.hover_seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.hover_generations.insert(url.to_string(), generation);

        let this = Arc::clone(self);
        let url = url.to_string();
        let wait = self.config.hover_debounce.to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            // Resolve and drop the marker in one step; a superseded timer
            // finds a newer generation and leaves it for the current one.
            let fired = this
                .hover_generations
                .remove_if(&url, |_, g| *g == generation)
                .is_some();
            if fired {
                this.schedule(&url);
            }
        });
    }

    /// Pointer left a target before the hover debounce elapsed.
    pub fn on_pointer_leave(&self, url: &str) {
        self.hover_generations.remove(url);
    }

    /// First touch on a touch device schedules immediately.
    pub fn on_touch_start(self: &Arc<Self>, url: &str) {
        if !self.is_enabled() || self.strategy() != PrefetchStrategy::Hover {
            return;
        }
        self.schedule(url);
    }

    /// Target entered the (margin-extended) viewport.
    pub fn on_visible(self: &Arc<Self>, url: &str) {
        if !self.is_enabled() || self.strategy() != PrefetchStrategy::Visible {
            return;
        }
        self.schedule(url);
    }

    /// Move a target to `Scheduled` and hand it to the queue, if eligible.
    pub fn schedule(self: &Arc<Self>, url: &str) {
        if !self.is_enabled() {
            return;
        }

        let fingerprint = Fingerprint::from_request(&RequestOptions::get(url));

        {
            let mut entry = self
                .targets
                .entry(url.to_string())
                .or_insert_with(|| TargetEntry::from_target(&PrefetchTarget::new(url)));

            if entry.state != TargetState::Unconsidered {
                return;
            }

            if entry.opt_out || !self.is_eligible_url(url) {
                entry.state = TargetState::Skipped;
                self.skipped_total.fetch_add(1, Ordering::Relaxed);
                log::debug!("Prefetch target skipped: {}", url);
                return;
            }

            if self.fetched.contains_key(&fingerprint) || self.store.get(&fingerprint).is_some() {
                entry.state = TargetState::Cached;
                return;
            }

            entry.state = TargetState::Scheduled;
        }

        let this = Arc::clone(self);
        let fetch_url = url.to_string();
        let accepted = self.queue.enqueue(Box::pin(async move {
            this.fetch_target(fetch_url, fingerprint).await;
        }));

        if accepted {
            self.enqueued_total.fetch_add(1, Ordering::Relaxed);
        } else if let Some(mut entry) = self.targets.get_mut(url) {
            entry.state = TargetState::Unconsidered;
        }
    }

    async fn fetch_target(self: Arc<Self>, url: String, fingerprint: Fingerprint) {
        if let Some(mut entry) = self.targets.get_mut(&url) {
            entry.state = TargetState::Fetching;
        }

        let request = RequestOptions::get(url.clone());
        match self.transport.execute(&request, true).await {
            Ok(value) => {
                self.store.put(fingerprint.clone(), Arc::new(value));
                self.fetched.insert(fingerprint, ());
                if let Some(mut entry) = self.targets.get_mut(&url) {
                    entry.state = TargetState::Cached;
                }
                self.completed_total.fetch_add(1, Ordering::Relaxed);
                log::debug!("Prefetched: {}", url);
            }
            Err(e) => {
                self.failed_total.fetch_add(1, Ordering::Relaxed);
                if let Some(mut entry) = self.targets.get_mut(&url) {
                    entry.attempts += 1;
                    if entry.attempts >= self.config.max_attempts {
                        entry.state = TargetState::Skipped;
                        log::warn!(
                            "Prefetch target {} failed {} times, giving up",
                            url,
                            entry.attempts
                        );
                    } else {
                        // Transient failure: eligible again for a later
                        // attempt.
                        entry.state = TargetState::Unconsidered;
                        log::debug!("Prefetch failed for {} ({}), will retry", url, e);
                    }
                }
            }
        }
    }

    fn is_eligible_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => {
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return false;
                }
                match &self.config.origin {
                    Some(origin) => parsed.origin().ascii_serialization() == *origin,
                    // Absolute URL with no configured origin: nothing to
                    // compare against, treat as cross-origin.
                    None => false,
                }
            }
            // Relative URLs are same-origin by construction.
            Err(_) => !url.contains(':'),
        }
    }

    /// Speculative store lookup for a real navigation.
    pub fn cached(&self, fingerprint: &Fingerprint) -> Option<Arc<Value>> {
        self.store.get(fingerprint)
    }

    pub fn state_of(&self, url: &str) -> Option<TargetState> {
        self.targets.get(url).map(|entry| entry.state)
    }

    pub fn set_strategy(&self, strategy: PrefetchStrategy) {
        *self.strategy.write().expect("strategy lock poisoned") = strategy;
        log::info!("Prefetch strategy set to {}", strategy);
    }

    pub fn strategy(&self) -> PrefetchStrategy {
        *self.strategy.read().expect("strategy lock poisoned")
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Margin the embedder should configure on its intersection wiring.
    pub fn lookahead_margin_px(&self) -> u32 {
        self.config.lookahead_margin_px
    }

    pub fn stats(&self) -> PrefetchStats {
        PrefetchStats {
            known_targets: self.targets.len(),
            enqueued: self.enqueued_total.load(Ordering::Relaxed),
            completed: self.completed_total.load(Ordering::Relaxed),
            failed: self.failed_total.load(Ordering::Relaxed),
            skipped: self.skipped_total.load(Ordering::Relaxed),
            running: self.queue.running(),
            queued: self.queue.queued(),
            stored: self.store.len(),
        }
    }

    /// Forget every target, fetched fingerprint and stored value.
    pub fn clear(&self) {
        self.targets.clear();
        self.fetched.clear();
        self.hover_generations.clear();
        self.store.clear();
        log::info!("Prefetch state cleared");
    }

    /// Stop the queue dispatcher. In-flight prefetches finish.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}

/// Prefetch engine statistics.
#[derive(Debug, Clone)]
pub struct PrefetchStats {
    pub known_targets: usize,
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub running: usize,
    pub queued: usize,
    pub stored: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration as StdDuration;

    struct CountingTransport {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn execute(&self, request: &RequestOptions, prefetch: bool) -> Result<Value, Error> {
            assert!(prefetch, "prefetcher must tag speculative requests");
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(Error::Network("boom".to_string()))
            } else {
                Ok(json!({ "url": request.url() }))
            }
        }
    }

    fn config() -> PrefetchConfig {
        PrefetchConfig {
            hover_debounce: Duration::milliseconds(10),
            ..PrefetchConfig::default()
        }
    }

    async fn settle() {
        tokio::time::sleep(StdDuration::from_millis(80)).await;
    }

    #[tokio::test]
    async fn test_hover_schedules_after_debounce() {
        let transport = CountingTransport::new();
        let prefetcher = Prefetcher::new(config(), transport.clone());

        prefetcher.on_pointer_hover("/api/products");
        settle().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            prefetcher.state_of("/api/products"),
            Some(TargetState::Cached)
        );
    }

    #[tokio::test]
    async fn test_fly_over_does_not_fetch() {
        let transport = CountingTransport::new();
        let prefetcher = Prefetcher::new(config(), transport.clone());

        prefetcher.on_pointer_hover("/api/products");
        prefetcher.on_pointer_leave("/api/products");
        settle().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hover_markers_pruned_after_settling() {
        let transport = CountingTransport::new();
        let prefetcher = Prefetcher::new(config(), transport.clone());

        prefetcher.on_pointer_hover("/api/a");
        prefetcher.on_pointer_hover("/api/b");
        prefetcher.on_pointer_leave("/api/b");
        settle().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        // Resolved and abandoned hovers both release their markers.
        assert!(prefetcher.hover_generations.is_empty());

        // A fresh hover after a leave still fires.
        prefetcher.on_pointer_hover("/api/b");
        settle().await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert!(prefetcher.hover_generations.is_empty());
    }

    #[tokio::test]
    async fn test_ineligible_schemes_skipped() {
        let transport = CountingTransport::new();
        let prefetcher = Prefetcher::new(config(), transport.clone());

        prefetcher.schedule("mailto:ada@example.com");
        prefetcher.schedule("tel:+15551234");
        settle().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            prefetcher.state_of("mailto:ada@example.com"),
            Some(TargetState::Skipped)
        );
    }

    #[tokio::test]
    async fn test_cross_origin_skipped_same_origin_allowed() {
        let transport = CountingTransport::new();
        let cfg = PrefetchConfig {
            origin: Some("https://app.example.com".to_string()),
            ..config()
        };
        let prefetcher = Prefetcher::new(cfg, transport.clone());

        prefetcher.schedule("https://evil.example.net/steal");
        prefetcher.schedule("https://app.example.com/api/products");
        settle().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            prefetcher.state_of("https://evil.example.net/steal"),
            Some(TargetState::Skipped)
        );
    }

    #[tokio::test]
    async fn test_opt_out_skipped() {
        let transport = CountingTransport::new();
        let prefetcher = Prefetcher::new(config(), transport.clone());

        prefetcher.register_target(PrefetchTarget::new("/api/private").opt_out());
        prefetcher.schedule("/api/private");
        settle().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_already_fetched_not_refetched() {
        let transport = CountingTransport::new();
        let prefetcher = Prefetcher::new(config(), transport.clone());

        prefetcher.schedule("/api/products");
        settle().await;
        prefetcher.schedule("/api/products");
        settle().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_returns_target_to_unconsidered() {
        let transport = CountingTransport::new();
        transport.fail.store(true, Ordering::SeqCst);
        let prefetcher = Prefetcher::new(config(), transport.clone());

        prefetcher.schedule("/api/flaky");
        settle().await;
        assert_eq!(
            prefetcher.state_of("/api/flaky"),
            Some(TargetState::Unconsidered)
        );

        // Recovers once the network does.
        transport.fail.store(false, Ordering::SeqCst);
        prefetcher.schedule("/api/flaky");
        settle().await;
        assert_eq!(prefetcher.state_of("/api/flaky"), Some(TargetState::Cached));
    }

    #[tokio::test]
    async fn test_persistent_failure_gives_up() {
        let transport = CountingTransport::new();
        transport.fail.store(true, Ordering::SeqCst);
        let prefetcher = Prefetcher::new(config(), transport.clone());

        for _ in 0..3 {
            prefetcher.schedule("/api/dead");
            settle().await;
        }

        assert_eq!(prefetcher.state_of("/api/dead"), Some(TargetState::Skipped));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);

        // A further schedule is a no-op.
        prefetcher.schedule("/api/dead");
        settle().await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_eager_registration_fetches_high_priority_only() {
        let transport = CountingTransport::new();
        let cfg = PrefetchConfig {
            strategy: PrefetchStrategy::Eager,
            ..config()
        };
        let prefetcher = Prefetcher::new(cfg, transport.clone());

        prefetcher.register_target(PrefetchTarget::new("/api/landing").high_priority());
        prefetcher.register_target(PrefetchTarget::new("/api/rarely-used"));
        settle().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            prefetcher.state_of("/api/landing"),
            Some(TargetState::Cached)
        );
    }

    #[tokio::test]
    async fn test_disabled_engine_ignores_signals() {
        let transport = CountingTransport::new();
        let prefetcher = Prefetcher::new(config(), transport.clone());
        prefetcher.set_enabled(false);

        prefetcher.on_pointer_hover("/api/products");
        prefetcher.on_touch_start("/api/products");
        prefetcher.schedule("/api/products");
        settle().await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_visible_strategy_gating() {
        let transport = CountingTransport::new();
        let prefetcher = Prefetcher::new(config(), transport.clone());

        // Hover strategy active: visibility signals are ignored.
        prefetcher.on_visible("/api/products");
        settle().await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

        prefetcher.set_strategy(PrefetchStrategy::Visible);
        prefetcher.on_visible("/api/products");
        settle().await;
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_config_validation() {
        let cfg = PrefetchConfig {
            max_concurrent: 0,
            ..PrefetchConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
