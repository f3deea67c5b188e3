//! Job admission, scheduling and dispatch.
//!
//! Flow of a submission:
//! 1. [`RateLimiter`] decides whether the caller may submit at all
//! 2. [`RecrawlService`] validates the batch and records it in the [`JobStore`]
//! 3. [`PriorityDispatchQueue`] orders the admitted entries
//! 4. [`WorkerPool`] pulls entries under a concurrency cap and runs the [`JobProcessor`]
//!
//! The [`Sweeper`] expires overdue jobs and prunes idle rate limit buckets.

pub mod job_store;
pub mod processor;
pub mod queue;
pub mod rate_limiter;
pub mod service;
pub mod sweeper;
pub mod types;
pub mod worker_pool;

pub use job_store::JobStore;
pub use processor::{build_processor, HttpProbeProcessor, JobProcessor, SimulatedProcessor};
pub use queue::{EnqueueRequest, PriorityDispatchQueue, QueueEntry};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
pub use service::{RecrawlService, SubmitRequest, SubmitResponse};
pub use sweeper::{SweepStats, Sweeper};
pub use types::{Job, JobStatus, JobView, Priority};
pub use worker_pool::{ShutdownReport, WorkerPool};
