//! Search request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::cache::derive_key;
use crate::types::Error;

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Relevance,
    Freshness,
}

impl FromStr for SortOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "relevance" => Ok(Self::Relevance),
            "freshness" => Ok(Self::Freshness),
            other => Err(Error::validation(format!(
                "sort must be relevance or freshness, got {other:?}"
            ))),
        }
    }
}

/// A search request as seen by the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub page: u32,
    /// `None` takes the configured default page size.
    pub size: Option<u32>,
    #[serde(default)]
    pub sort: SortOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            page: 1,
            size: None,
            sort: SortOrder::default(),
            language: None,
            site: None,
            filters: None,
            fields: None,
        }
    }

    /// Clamp paging into `page >= 1`, `1 <= size <= max_size` and put the
    /// requested fields in canonical order.
    pub fn bounded(mut self, default_size: u32, max_size: u32) -> Self {
        self.page = self.page.max(1);
        self.size = Some(self.size.unwrap_or(default_size).clamp(1, max_size.max(1)));
        if let Some(fields) = &mut self.fields {
            fields.sort();
            fields.dedup();
        }
        self
    }

    /// Cache key for this query. Equal for queries that differ only in
    /// filter key order or field order once bounded.
    pub fn cache_key(&self) -> String {
        let value = serde_json::json!({
            "q": self.query,
            "page": self.page,
            "size": self.size,
            "sort": self.sort,
            "lang": self.language,
            "site": self.site,
            "filters": self.filters,
            "fields": self.fields,
        });
        derive_key("search", &value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_crawled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub name: String,
    pub counts: Vec<FacetCount>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub page: u32,
    pub size: u32,
    pub total: u64,
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Vec<Facet>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}
