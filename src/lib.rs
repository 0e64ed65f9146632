pub mod cache;
pub mod cancellation;
pub mod debounce;
pub mod deduplication;
mod error;
pub mod fingerprint;
pub mod prefetch;
pub mod queue;
mod request_options;
pub mod transport;


use cache::{CacheConfig, ResponseCache, SharedResponseCache, SweeperHandle};
use chrono::Duration;
use debounce::DebounceScheduler;
use deduplication::{InFlightTracker, SharedInFlightTracker, SharedOutcome};
pub use error::{Error, ErrorKind};
use fingerprint::Fingerprint;
use futures::future::join_all;
use prefetch::{PrefetchConfig, Prefetcher};
pub use prefetch::{PrefetchStats, PrefetchStrategy, PrefetchTarget, TargetState};
pub use request_options::{Method, RequestOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use transport::{SurfTransport, Transport};

// Re-export cache types
pub use cache::CacheStats;
pub use deduplication::InFlightStats;

/// Configuration surface for the orchestration layer.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Freshness window for cached responses.
    pub cache_ttl: Duration,
    /// Entry cap before oldest-first eviction.
    pub max_cache_entries: usize,
    /// Default quiet window for debounced requests.
    pub debounce_delay: Duration,
    /// Budget per underlying network operation.
    pub request_timeout: Duration,
    /// Cap on simultaneous speculative fetches.
    pub max_concurrent_prefetch: usize,
    pub prefetch_strategy: PrefetchStrategy,
    /// Origin for prefetch same-origin eligibility.
    pub origin: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::milliseconds(5000),
            max_cache_entries: 100,
            debounce_delay: Duration::milliseconds(300),
            request_timeout: Duration::milliseconds(30_000),
            max_concurrent_prefetch: 3,
            prefetch_strategy: PrefetchStrategy::Hover,
            origin: None,
        }
    }
}

impl OrchestratorConfig {
    /// Reject invalid option values at construction time rather than
    /// clamping them silently.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cache_ttl <= Duration::zero() {
            return Err(Error::Configuration(format!(
                "cache TTL must be positive, got {}ms",
                self.cache_ttl.num_milliseconds()
            )));
        }
        if self.max_cache_entries == 0 {
            return Err(Error::Configuration(
                "max cache entries must be at least 1".to_string(),
            ));
        }
        if self.debounce_delay < Duration::zero() {
            return Err(Error::Configuration(format!(
                "debounce delay must not be negative, got {}ms",
                self.debounce_delay.num_milliseconds()
            )));
        }
        if self.request_timeout <= Duration::zero() {
            return Err(Error::Configuration(format!(
                "request timeout must be positive, got {}ms",
                self.request_timeout.num_milliseconds()
            )));
        }
        if self.max_concurrent_prefetch == 0 {
            return Err(Error::Configuration(
                "max concurrent prefetch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(self.cache_ttl, self.max_cache_entries)
    }

    fn prefetch_config(&self) -> PrefetchConfig {
        PrefetchConfig {
            max_concurrent: self.max_concurrent_prefetch,
            strategy: self.prefetch_strategy,
            origin: self.origin.clone(),
            store: self.cache_config(),
            ..PrefetchConfig::default()
        }
    }
}

/// Aggregate view of the orchestrator's moving parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStats {
    pub in_flight_count: usize,
    pub cached_count: usize,
    pub debouncing_count: usize,
}

/// Client-side request orchestration layer.
///
/// Owns the response cache, in-flight tracker, debounce scheduler and
/// prefetch engine as session-scoped state. All coordination is keyed by
/// request fingerprint: concurrent callers for the same fingerprint share
/// one network round trip and one outcome.
pub struct Orchestrator {
    transport: Arc<dyn Transport>,
    cache: SharedResponseCache,
    tracker: SharedInFlightTracker,
    debouncer: Arc<DebounceScheduler>,
    prefetcher: Arc<Prefetcher>,
    sweeper: SweeperHandle,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// Create an orchestrator with default settings and the surf transport.
    pub fn new() -> Self {
        Self::build(
            OrchestratorConfig::default(),
            Arc::new(SurfTransport::new()),
        )
    }

    /// Create an orchestrator with validated settings.
    pub fn with_config(config: OrchestratorConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::build(config, Arc::new(SurfTransport::new())))
    }

    /// Create an orchestrator over a custom transport (tests, alternative
    /// network stacks).
    pub fn with_transport(
        config: OrchestratorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::build(config, transport))
    }

    fn build(config: OrchestratorConfig, transport: Arc<dyn Transport>) -> Self {
        let cache = Arc::new(ResponseCache::new(config.cache_config()));
        let tracker = Arc::new(InFlightTracker::new(cache.clone(), config.request_timeout));
        let debouncer = Arc::new(DebounceScheduler::new(config.debounce_delay));

        let prefetcher = Prefetcher::new(config.prefetch_config(), transport.clone());

        let sweeper = cache.spawn_sweeper(config.cache_ttl);

        log::info!(
            "Initialized orchestrator (TTL: {}ms, max entries: {}, timeout: {}ms)",
            config.cache_ttl.num_milliseconds(),
            config.max_cache_entries,
            config.request_timeout.num_milliseconds()
        );

        Self {
            transport,
            cache,
            tracker,
            debouncer,
            prefetcher,
            sweeper,
        }
    }

    /// Cache- and dedup-aware fetch.
    ///
    /// Fresh cache hits and prefetched values return immediately; otherwise
    /// the call joins the in-flight operation for its fingerprint or starts
    /// a new one under the configured timeout.
    pub async fn request(&self, options: &RequestOptions) -> SharedOutcome {
        let key = Fingerprint::from_request(options);

        if !options.bypass_cache() {
            if let Some(value) = self.cache.get(&key) {
                return Ok(value);
            }
            if let Some(value) = self.prefetcher.cached(&key) {
                log::debug!("Serving prefetched response for {}", options.url());
                return Ok(value);
            }
        }

        let transport = Arc::clone(&self.transport);
        let request = options.clone();
        self.tracker
            .execute(key, move || async move {
                transport.execute(&request, false).await
            })
            .await
    }

    /// Debounced fetch using the configured default quiet window.
    pub async fn request_debounced(&self, options: &RequestOptions) -> SharedOutcome {
        self.request_debounced_with_delay(options, self.debouncer.default_delay())
            .await
    }

    /// Debounced fetch: the request is issued only after `delay` of silence
    /// on its endpoint (method + path), and every superseded caller resolves
    /// with the final execution's outcome. Query and body are excluded from
    /// the window key, so a keystroke burst with an evolving query collapses
    /// to one fetch with the last call's arguments. The executed request
    /// still goes through cache and dedup under its full fingerprint.
    pub async fn request_debounced_with_delay(
        &self,
        options: &RequestOptions,
        delay: Duration,
    ) -> SharedOutcome {
        let window = Fingerprint::from_endpoint(options);
        let tracker = Arc::clone(&self.tracker);
        let cache = Arc::clone(&self.cache);
        let transport = Arc::clone(&self.transport);
        let request = options.clone();

        self.debouncer
            .schedule(window, delay, move || async move {
                let key = Fingerprint::from_request(&request);
                if !request.bypass_cache() {
                    if let Some(value) = cache.get(&key) {
                        return Ok(value);
                    }
                }
                tracker
                    .execute(key, move || async move {
                        transport.execute(&request, false).await
                    })
                    .await
            })
            .await
    }

    /// Cancel the in-flight operation for a request, if any. Safe to call
    /// repeatedly and after natural completion.
    pub fn cancel(&self, options: &RequestOptions) -> bool {
        self.tracker.cancel(&Fingerprint::from_request(options))
    }

    /// Cancel every in-flight operation and clear all pending debounce
    /// timers.
    pub fn cancel_all(&self) {
        self.tracker.cancel_all();
        self.debouncer.cancel_all();
    }

    /// Issue several requests concurrently; deduplication applies across
    /// them, so identical fingerprints share one round trip.
    pub async fn batch(&self, requests: &[RequestOptions]) -> Vec<SharedOutcome> {
        join_all(requests.iter().map(|options| self.request(options))).await
    }

    /// Issue requests one at a time, in order.
    pub async fn sequential(&self, requests: &[RequestOptions]) -> Vec<SharedOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for options in requests {
            outcomes.push(self.request(options).await);
        }
        outcomes
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Full reset of session state (e.g. logout): cache, prefetch record
    /// and speculative store.
    pub fn clear(&self) {
        self.cache.clear();
        self.prefetcher.clear();
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            in_flight_count: self.tracker.in_flight_count(),
            cached_count: self.cache.len(),
            debouncing_count: self.debouncer.debouncing_count(),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn prefetcher(&self) -> &Arc<Prefetcher> {
        &self.prefetcher
    }

    /// Tear down background work: cancels everything in flight, clears
    /// pending timers and stops the sweeper and prefetch dispatcher.
    pub fn shutdown(&self) {
        self.cancel_all();
        self.sweeper.stop();
        self.prefetcher.shutdown();
        log::info!("Orchestrator shut down");
    }
}
