//! Background housekeeping.
//!
//! The sweeper periodically:
//! - expires QUEUED/RUNNING jobs past their SLA deadline
//! - removes terminal jobs older than `job_retention`
//! - purges expired search cache entries
//! - drops rate limit buckets that have been idle long enough to be full
//!
//! Expiry is also applied lazily on read, so the sweeper only bounds how long
//! an unread overdue job keeps its stale status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};

use super::job_store::JobStore;
use super::rate_limiter::RateLimiter;
use crate::cache::ResultCache;
use crate::search::SearchResponse;
use crate::types::SweeperConfig;

type SearchCache = Arc<dyn ResultCache<SearchResponse>>;

/// Statistics from one sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepStats {
    pub jobs_expired: usize,
    pub jobs_purged: usize,
    pub cache_entries_purged: usize,
    pub buckets_evicted: usize,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Sweeper {
    store: Arc<JobStore>,
    limiter: Arc<RateLimiter>,
    cache: Option<SearchCache>,
    config: SweeperConfig,
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl Sweeper {
    pub fn new(store: Arc<JobStore>, limiter: Arc<RateLimiter>, config: SweeperConfig) -> Self {
        Self {
            store,
            limiter,
            cache: None,
            config,
            stop_tx: None,
        }
    }

    /// Also purge expired entries from `cache` on every sweep.
    pub fn with_cache(mut self, cache: SearchCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Start the sweep loop in the background.
    pub fn start(&mut self) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let limiter = self.limiter.clone();
        let cache = self.cache.clone();
        let config = self.config.clone();
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();
        self.stop_tx = Some(stop_tx);

        tokio::spawn(async move {
            let mut ticker = interval(config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::run_cycle(&store, &limiter, cache.as_ref(), &config).await;
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("sweeper_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the sweep loop.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Run a single sweep.
    pub async fn run_cycle(
        store: &JobStore,
        limiter: &RateLimiter,
        cache: Option<&SearchCache>,
        config: &SweeperConfig,
    ) -> SweepStats {
        let cache_entries_purged = match cache {
            Some(cache) => cache.purge_expired().await,
            None => 0,
        };
        let now = Utc::now();
        let jobs_expired = store.expire_overdue(now);
        let jobs_purged = match chrono::Duration::from_std(config.job_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        {
            Some(cutoff) => store.purge_terminal(cutoff),
            None => 0,
        };
        let stats = SweepStats {
            jobs_expired,
            jobs_purged,
            cache_entries_purged,
            buckets_evicted: limiter.evict_idle(config.bucket_idle),
            completed_at: Some(Utc::now()),
        };
        if stats.jobs_expired > 0
            || stats.jobs_purged > 0
            || stats.cache_entries_purged > 0
            || stats.buckets_evicted > 0
        {
            tracing::debug!(
                jobs_expired = stats.jobs_expired,
                jobs_purged = stats.jobs_purged,
                cache_entries_purged = stats.cache_entries_purged,
                buckets_evicted = stats.buckets_evicted,
                "sweep_completed"
            );
        }
        stats
    }
}
