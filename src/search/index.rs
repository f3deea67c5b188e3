//! Search index adapters.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use super::types::{Facet, FacetCount, SearchQuery, SearchResponse, SearchResult};
use crate::types::{Error, IndexBackend, Result, SearchConfig};

/// Executes a bounded query against a search index.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IndexAdapter: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse>;
}

/// Deterministic synthetic index for development and tests.
#[derive(Debug, Clone, Default)]
pub struct MockIndex;

impl MockIndex {
    pub const TOTAL: u64 = 12_345;

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IndexAdapter for MockIndex {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        let size = query.size.unwrap_or(1).max(1);
        let page = query.page.max(1);
        let start = u64::from(page - 1) * u64::from(size);
        let end = (start + u64::from(size)).min(Self::TOTAL);
        let base = match &query.site {
            Some(site) if site.starts_with("http://") || site.starts_with("https://") => {
                site.trim_end_matches('/').to_string()
            }
            Some(site) => format!("https://{site}"),
            None => "https://example.com".to_string(),
        };
        let language = query.language.clone().unwrap_or_else(|| "en".to_string());
        let now = Utc::now();

        let results = (start..end)
            .map(|i| SearchResult {
                doc_id: format!("doc-{i}"),
                url: format!("{base}/doc/{i}"),
                title: Some(format!("Result {i} for '{}'", query.query)),
                snippet: Some(format!("... snippet for {} (doc {i}) ...", query.query)),
                score: Some(((100.0 - ((i + 2) as f64).log2()) * 10_000.0).round() / 10_000.0),
                language: Some(language.clone()),
                last_crawled_at: Some(now - ChronoDuration::days((i % 365) as i64)),
                metadata: Some(serde_json::json!({
                    "site": query.site.as_deref().unwrap_or("example.com"),
                })),
            })
            .collect();

        Ok(SearchResponse {
            query: query.query.clone(),
            page,
            size,
            total: Self::TOTAL,
            results,
            facets: Some(vec![Facet {
                name: "language".to_string(),
                counts: vec![
                    FacetCount {
                        value: "en".to_string(),
                        count: 100,
                    },
                    FacetCount {
                        value: "fr".to_string(),
                        count: 50,
                    },
                ],
            }]),
            request_id: None,
        })
    }
}

/// Remote index reached over HTTP: the query is POSTed as JSON and the
/// response body is a [`SearchResponse`].
#[derive(Debug, Clone)]
pub struct HttpIndex {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpIndex {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl IndexAdapter for HttpIndex {
    async fn search(&self, query: &SearchQuery) -> Result<SearchResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(query)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<SearchResponse>().await?)
    }
}

/// Build the adapter selected by `search.index_backend`.
pub fn build_index(config: &SearchConfig) -> Result<Arc<dyn IndexAdapter>> {
    Ok(match config.index_backend {
        IndexBackend::Mock => Arc::new(MockIndex::new()),
        IndexBackend::Http => {
            let endpoint = config.index_endpoint.clone().ok_or_else(|| {
                Error::validation("search.index_endpoint is required for the http index backend")
            })?;
            Arc::new(HttpIndex::new(endpoint, config.index_timeout)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(page: u32, size: u32) -> SearchQuery {
        let mut q = SearchQuery::new("rust");
        q.page = page;
        q.size = Some(size);
        q
    }

    #[tokio::test]
    async fn test_mock_index_pages() {
        let index = MockIndex::new();
        let resp = index.search(&query(2, 10)).await.unwrap();
        assert_eq!(resp.total, 12_345);
        assert_eq!(resp.results.len(), 10);
        assert_eq!(resp.results[0].doc_id, "doc-10");
        assert_eq!(resp.results[0].url, "https://example.com/doc/10");
        assert_eq!(resp.facets.as_ref().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_mock_index_last_page_is_partial() {
        let index = MockIndex::new();
        let resp = index.search(&query(124, 100)).await.unwrap();
        assert_eq!(resp.results.len(), 45);
        let past_end = index.search(&query(200, 100)).await.unwrap();
        assert!(past_end.results.is_empty());
    }

    #[tokio::test]
    async fn test_mock_index_is_deterministic() {
        let index = MockIndex::new();
        let mut q = query(1, 3);
        q.site = Some("docs.rs".to_string());
        q.language = Some("fr".to_string());
        let a = index.search(&q).await.unwrap();
        let b = index.search(&q).await.unwrap();

        let ids = |r: &SearchResponse| r.results.iter().map(|x| x.url.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.results[0].url, "https://docs.rs/doc/0");
        assert_eq!(a.results[0].language.as_deref(), Some("fr"));
        assert_eq!(a.results[0].score, Some(99.0));
    }

    #[test]
    fn test_build_index_requires_endpoint_for_http() {
        let mut config = SearchConfig::default();
        assert!(build_index(&config).is_ok());

        config.index_backend = IndexBackend::Http;
        assert!(matches!(build_index(&config), Err(Error::Validation(_))));

        config.index_endpoint = Some("http://127.0.0.1:9200/search".to_string());
        assert!(build_index(&config).is_ok());
    }
}
