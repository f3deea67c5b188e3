use axum::extract::FromRef;
use std::sync::Arc;

use crate::cache::build_cache;
use crate::dispatch::{JobStore, PriorityDispatchQueue, RateLimiter, RecrawlService};
use crate::search::{build_index, SearchService};
use crate::types::{Config, Result};

pub type GuardedSearchService = Arc<SearchService>;
pub type GuardedRateLimiter = Arc<RateLimiter>;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub recrawl: RecrawlService,
    pub search: GuardedSearchService,
    pub limiter: GuardedRateLimiter,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        recrawl: RecrawlService,
        search: GuardedSearchService,
        limiter: GuardedRateLimiter,
    ) -> Self {
        Self {
            config,
            recrawl,
            search,
            limiter,
        }
    }

    /// Wire every service from configuration with fresh in-process stores.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let recrawl = RecrawlService::new(
            config.clone(),
            Arc::new(JobStore::new()),
            Arc::new(PriorityDispatchQueue::new()),
        );
        let search = SearchService::new(
            config.search.clone(),
            build_index(&config.search)?,
            build_cache(&config.search),
        );
        let limiter = RateLimiter::new(config.rate_limit.requests_per_minute);
        Ok(Self::new(config, recrawl, Arc::new(search), Arc::new(limiter)))
    }
}

impl FromRef<AppState> for RecrawlService {
    fn from_ref(input: &AppState) -> Self {
        input.recrawl.clone()
    }
}

impl FromRef<AppState> for GuardedSearchService {
    fn from_ref(input: &AppState) -> Self {
        input.search.clone()
    }
}
