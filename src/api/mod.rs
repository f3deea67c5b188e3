//! HTTP surface.
//!
//! | Route                     | Handler                          |
//! |---------------------------|----------------------------------|
//! | `POST /v1/recrawl`        | [`handlers::submit_recrawl`]     |
//! | `GET /v1/recrawl/{job_id}`| [`handlers::get_recrawl`]        |
//! | `GET /v1/search`          | [`handlers::search`]             |
//! | `GET /healthz`            | [`handlers::healthz`]            |
//!
//! `/v1` routes pass through authentication and rate limiting; every
//! response carries `X-Request-Id`.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

use axum::routing::{get, post};
use axum::Router;

pub use error::ApiError;
pub use state::AppState;

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/recrawl", post(handlers::submit_recrawl))
        .route("/recrawl/{job_id}", get(handlers::get_recrawl))
        .route("/search", get(handlers::search))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::admission,
        ))
        .with_state(state);

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/v1", v1)
        .layer(axum::middleware::from_fn(middleware::request_id))
}
