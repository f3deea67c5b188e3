//! Core types for the recrawl service.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (JobId, JobGroupId, etc.)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for admission, workers and search

mod config;
mod errors;
mod ids;

pub use config::{
    AuthConfig, CacheBackend, Config, IndexBackend, ObservabilityConfig, ProcessorKind,
    RateLimitConfig, RecrawlConfig, SearchConfig, ServerConfig, SweeperConfig, WorkerConfig,
};
pub use errors::{Error, Result};
pub use ids::{JobGroupId, JobId, RequestId, TenantId};
