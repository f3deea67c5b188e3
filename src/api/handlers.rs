use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::ApiError;
use super::middleware::{header_str, IDEMPOTENCY_KEY, X_TENANT_ID};
use super::state::GuardedSearchService;
use crate::dispatch::{JobView, RecrawlService, SubmitRequest, SubmitResponse};
use crate::search::{SearchQuery, SortOrder};
use crate::types::{Error, JobId, RequestId, TenantId};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Response body with the request id appended.
#[derive(Debug, Serialize)]
pub struct WithRequestId<T> {
    #[serde(flatten)]
    pub body: T,
    pub request_id: String,
}

fn with_request_id<T>(body: T, request_id: &RequestId) -> Json<WithRequestId<T>> {
    Json(WithRequestId {
        body,
        request_id: request_id.to_string(),
    })
}

pub async fn healthz() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /v1/recrawl`
pub async fn submit_recrawl(
    State(recrawl): State<RecrawlService>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let fail = |e: Error| ApiError::new(e, &request_id);
    let Json(mut request) = body.map_err(|e| fail(Error::validation(e.body_text())))?;

    if request.tenant_id.is_none() {
        request.tenant_id = header_str(&headers, &X_TENANT_ID)
            .map(|t| TenantId::from_string(t.to_string()))
            .transpose()
            .map_err(|e| fail(Error::validation(e)))?;
    }
    if request.idempotency_key.is_none() {
        request.idempotency_key = header_str(&headers, &IDEMPOTENCY_KEY).map(str::to_string);
    }

    let accepted: SubmitResponse = recrawl.submit(request).map_err(fail)?;
    tracing::info!(
        request_id = %request_id,
        job_group_id = %accepted.job_group_id,
        jobs = accepted.jobs.len(),
        "recrawl_accepted"
    );
    Ok((StatusCode::ACCEPTED, with_request_id(accepted, &request_id)).into_response())
}

/// `GET /v1/recrawl/{job_id}`
pub async fn get_recrawl(
    State(recrawl): State<RecrawlService>,
    Extension(request_id): Extension<RequestId>,
    Path(job_id): Path<String>,
) -> Result<Json<WithRequestId<JobView>>, ApiError> {
    let fail = |e: Error| ApiError::new(e, &request_id);
    let job_id = JobId::from_string(job_id).map_err(|e| fail(Error::validation(e)))?;
    let job = recrawl.status(&job_id).map_err(fail)?;
    Ok(with_request_id(job.view(), &request_id))
}

/// Raw `GET /v1/search` query string.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub sort: Option<String>,
    pub lang: Option<String>,
    pub site: Option<String>,
    /// JSON-encoded object.
    pub filters: Option<String>,
    /// Comma-separated field names.
    pub fields: Option<String>,
}

impl SearchParams {
    pub fn into_query(self) -> crate::types::Result<SearchQuery> {
        let text = self.q.unwrap_or_default();
        let mut query = SearchQuery::new(text);
        query.page = self.page.unwrap_or(1);
        query.size = self.size;
        query.sort = match self.sort.as_deref() {
            Some(s) => s.parse()?,
            None => SortOrder::default(),
        };
        query.language = self.lang.filter(|s| !s.trim().is_empty());
        query.site = self.site.filter(|s| !s.trim().is_empty());
        query.filters = match self.filters.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                serde_json::from_str::<Map<String, Value>>(raw)
                    .map_err(|e| Error::validation(format!("filters must be a JSON object: {e}")))?,
            ),
        };
        query.fields = self.fields.map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect()
        });
        Ok(query)
    }
}

/// `GET /v1/search`
pub async fn search(
    State(search): State<GuardedSearchService>,
    Extension(request_id): Extension<RequestId>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let fail = |e: Error| ApiError::new(e, &request_id);
    let Query(params) = params.map_err(|e| fail(Error::validation(e.body_text())))?;
    let query = params.into_query().map_err(fail)?;

    let outcome = search.search(query).await.map_err(fail)?;
    let mut response = outcome.response;
    response.request_id = Some(request_id.to_string());

    let cache = if outcome.cache_hit { "HIT" } else { "MISS" };
    Ok(([(X_CACHE, HeaderValue::from_static(cache))], Json(response)).into_response())
}
