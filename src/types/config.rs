//! Configuration structures.
//!
//! Configuration is loaded from an optional JSON file, then overridden by
//! `RECRAWL_*` environment variables. It is built once at startup and shared
//! read-only as `Arc<Config>`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};

const ENV_PREFIX: &str = "RECRAWL_";

/// Global service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// API key authentication.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Per-principal rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Recrawl admission.
    #[serde(default)]
    pub recrawl: RecrawlConfig,

    /// Worker pool.
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Search read path.
    #[serde(default)]
    pub search: SearchConfig,

    /// Background sweeper.
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind address.
    pub listen_addr: String,

    /// Service name reported in logs.
    pub api_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            api_name: "recrawl-core".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// API key authentication. An empty key list disables the check.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub api_keys: Vec<String>,
}

/// Rate limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket capacity and refill per minute for every principal.
    pub requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60_000,
        }
    }
}

/// Recrawl admission configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecrawlConfig {
    /// Maximum urls accepted in one submission.
    pub max_urls_per_request: usize,

    /// Time after submission at which an unfinished job expires.
    #[serde(with = "humantime_serde")]
    pub sla: Duration,

    /// Added to the eligibility time to estimate when a job starts.
    #[serde(with = "humantime_serde")]
    pub estimated_start_delay: Duration,
}

impl Default for RecrawlConfig {
    fn default() -> Self {
        Self {
            max_urls_per_request: 100,
            sla: Duration::from_secs(60 * 60),
            estimated_start_delay: Duration::from_secs(3 * 60),
        }
    }
}

/// Which processor executes recrawl jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Simulated,
    Http,
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum jobs running at once.
    pub concurrency: usize,

    pub processor: ProcessorKind,

    /// Latency of the simulated processor.
    #[serde(with = "humantime_serde")]
    pub simulated_latency: Duration,

    /// Request timeout of the http probe processor.
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 100,
            processor: ProcessorKind::Simulated,
            simulated_latency: Duration::from_millis(100),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Search index backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    Mock,
    Http,
}

/// Result cache backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Disabled,
}

/// Search read path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,

    pub index_backend: IndexBackend,

    /// Base URL of the remote index when `index_backend` is `http`.
    pub index_endpoint: Option<String>,

    #[serde(with = "humantime_serde")]
    pub index_timeout: Duration,

    pub cache_backend: CacheBackend,

    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
            index_backend: IndexBackend::Mock,
            index_endpoint: None,
            index_timeout: Duration::from_secs(2),
            cache_backend: CacheBackend::Memory,
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Background sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Rate limit buckets untouched this long are evicted.
    #[serde(with = "humantime_serde")]
    pub bucket_idle: Duration,

    /// Terminal jobs are removed once unchanged for this long.
    #[serde(with = "humantime_serde")]
    pub job_retention: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            bucket_idle: Duration::from_secs(10 * 60),
            job_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl Config {
    /// Read a JSON config file. Missing sections take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// File (if given) overridden by the process environment, then validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RECRAWL_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.observability.log_level = v;
        }
        if let Some(v) = var("JSON_LOGS") {
            self.observability.json_logs = parse_env("JSON_LOGS", &v)?;
        }
        if let Some(v) = var("API_KEYS") {
            self.auth.api_keys = v
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = var("RATE_LIMIT_PER_MINUTE") {
            self.rate_limit.requests_per_minute = parse_env("RATE_LIMIT_PER_MINUTE", &v)?;
        }
        if let Some(v) = var("SLA") {
            self.recrawl.sla = parse_duration("SLA", &v)?;
        }
        if let Some(v) = var("WORKER_CONCURRENCY") {
            self.workers.concurrency = parse_env("WORKER_CONCURRENCY", &v)?;
        }
        if let Some(v) = var("PROCESSOR") {
            self.workers.processor = match v.as_str() {
                "simulated" => ProcessorKind::Simulated,
                "http" => ProcessorKind::Http,
                other => {
                    return Err(Error::validation(format!(
                        "{ENV_PREFIX}PROCESSOR: unknown processor {other}"
                    )))
                }
            };
        }
        if let Some(v) = var("INDEX_ENDPOINT") {
            self.search.index_backend = IndexBackend::Http;
            self.search.index_endpoint = Some(v);
        }
        if let Some(v) = var("CACHE_TTL") {
            self.search.cache_ttl = parse_duration("CACHE_TTL", &v)?;
        }
        if let Some(v) = var("CACHE_DISABLED") {
            if parse_env::<bool>("CACHE_DISABLED", &v)? {
                self.search.cache_backend = CacheBackend::Disabled;
            }
        }
        Ok(())
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.requests_per_minute == 0 {
            return Err(Error::validation("rate_limit.requests_per_minute must be positive"));
        }
        if self.workers.concurrency == 0 {
            return Err(Error::validation("workers.concurrency must be positive"));
        }
        if self.recrawl.max_urls_per_request == 0 {
            return Err(Error::validation("recrawl.max_urls_per_request must be positive"));
        }
        if self.search.max_page_size == 0 || self.search.default_page_size == 0 {
            return Err(Error::validation("search page sizes must be positive"));
        }
        if self.search.index_backend == IndexBackend::Http && self.search.index_endpoint.is_none() {
            return Err(Error::validation(
                "search.index_endpoint is required for the http index backend",
            ));
        }
        if self.sweeper.interval.is_zero() {
            return Err(Error::validation("sweeper.interval must be positive"));
        }

        // Every duration is added to or subtracted from the clock at runtime.
        let now = chrono::Utc::now();
        let deadline = to_chrono("recrawl.sla", self.recrawl.sla)?;
        let start_delay = to_chrono(
            "recrawl.estimated_start_delay",
            self.recrawl.estimated_start_delay,
        )?;
        let retention = to_chrono("sweeper.job_retention", self.sweeper.job_retention)?;
        if now
            .checked_add_signed(deadline)
            .and_then(|d| d.checked_add_signed(start_delay))
            .is_none()
        {
            return Err(Error::validation("recrawl.sla is out of range"));
        }
        if now.checked_sub_signed(retention).is_none() {
            return Err(Error::validation("sweeper.job_retention is out of range"));
        }
        if std::time::Instant::now()
            .checked_add(self.search.cache_ttl)
            .is_none()
        {
            return Err(Error::validation("search.cache_ttl is out of range"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::validation(format!("{ENV_PREFIX}{name}: invalid value {value:?}")))
}

fn to_chrono(name: &str, d: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(d).map_err(|_| Error::validation(format!("{name} is out of range")))
}

fn parse_duration(name: &str, value: &str) -> Result<Duration> {
    humantime_serde::re::humantime::parse_duration(value.trim())
        .map_err(|e| Error::validation(format!("{ENV_PREFIX}{name}: {e}")))
}
