//! # Recrawl Core - Job Admission, Priority Dispatch and Result Caching
//!
//! Rust implementation of the recrawl service core providing:
//! - Per-principal token-bucket rate limiting
//! - Priority dispatch queue with not-before deferral
//! - Job lifecycle tracking with SLA expiry and idempotent resubmission
//! - Bounded worker pool over a pluggable job processor
//! - TTL result cache in front of a pluggable search index
//! - axum HTTP surface
//!
//! ## Architecture
//!
//! ```text
//!   POST /v1/recrawl ─┐                      ┌──────────────┐
//!                     ├─► RateLimiter ─► ... │  JobStore    │◄──┐
//!   GET /v1/search ───┘                      └──────────────┘   │
//!        │                                          ▲           │
//!        ▼                                          │           │
//!   ResultCache ─(miss)─► IndexAdapter   RecrawlService ─► PriorityDispatchQueue
//!                                                               │
//!                                                               ▼
//!                                                WorkerPool ─► JobProcessor
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod api;
pub mod cache;
pub mod dispatch;
pub mod search;
pub mod types;

// Internal utilities
pub mod observability;
pub mod validation;

pub use types::{Config, Error, Result};
