//! Search read path: bound the query, answer from the result cache when
//! possible, otherwise ask the index and cache the answer.

pub mod index;
pub mod types;

use std::sync::Arc;

use crate::cache::ResultCache;
use crate::types::{Result, SearchConfig};
use crate::validation::validate_non_empty;

pub use index::{build_index, HttpIndex, IndexAdapter, MockIndex};
pub use types::{Facet, FacetCount, SearchQuery, SearchResponse, SearchResult, SortOrder};

/// A search response and whether it came from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub response: SearchResponse,
    pub cache_hit: bool,
}

pub struct SearchService {
    config: SearchConfig,
    index: Arc<dyn IndexAdapter>,
    cache: Arc<dyn ResultCache<SearchResponse>>,
}

impl std::fmt::Debug for SearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchService")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SearchService {
    pub fn new(
        config: SearchConfig,
        index: Arc<dyn IndexAdapter>,
        cache: Arc<dyn ResultCache<SearchResponse>>,
    ) -> Self {
        Self {
            config,
            index,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<dyn ResultCache<SearchResponse>> {
        &self.cache
    }

    pub async fn search(&self, query: SearchQuery) -> Result<SearchOutcome> {
        validate_non_empty(&query.query, "q")?;
        let query = query.bounded(self.config.default_page_size, self.config.max_page_size);
        let key = query.cache_key();

        if let Some(response) = self.cache.get(&key).await {
            tracing::debug!(cache_key = %key, "search_cache_hit");
            return Ok(SearchOutcome {
                response,
                cache_hit: true,
            });
        }

        let response = self.index.search(&query).await?;
        self.cache
            .set(&key, response.clone(), self.config.cache_ttl)
            .await;
        tracing::debug!(
            cache_key = %key,
            total = response.total,
            results = response.results.len(),
            "search_cache_miss"
        );
        Ok(SearchOutcome {
            response,
            cache_hit: false,
        })
    }
}
