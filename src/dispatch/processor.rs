//! Job processors.
//!
//! The fetch/parse/index step is opaque to the dispatcher: the worker pool
//! hands each job to a [`JobProcessor`] and records whatever it returns.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use super::types::Job;
use crate::types::{Error, ProcessorKind, Result, WorkerConfig};

/// Executes one recrawl job. An `Err` marks the job FAILED with its message.
#[async_trait]
pub trait JobProcessor: Send + Sync + std::fmt::Debug {
    async fn process(&self, job: &Job) -> Result<serde_json::Value>;
}

/// Stand-in processor: waits a fixed latency and reports the crawl time.
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    latency: Duration,
}

impl SimulatedProcessor {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl JobProcessor for SimulatedProcessor {
    async fn process(&self, _job: &Job) -> Result<serde_json::Value> {
        tokio::time::sleep(self.latency).await;
        Ok(serde_json::json!({
            "last_crawled_at": Utc::now().to_rfc3339(),
        }))
    }
}

/// Fetches the url and reports status, size and crawl time.
#[derive(Debug, Clone)]
pub struct HttpProbeProcessor {
    client: reqwest::Client,
}

impl HttpProbeProcessor {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("recrawl-core/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JobProcessor for HttpProbeProcessor {
    async fn process(&self, job: &Job) -> Result<serde_json::Value> {
        let response = self.client.get(&job.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::processing(format!(
                "{} returned {}",
                job.url, status
            )));
        }
        let body = response.bytes().await?;
        Ok(serde_json::json!({
            "status_code": status.as_u16(),
            "content_length": body.len(),
            "last_crawled_at": Utc::now().to_rfc3339(),
        }))
    }
}

/// Build the processor selected by `workers.processor`.
pub fn build_processor(config: &WorkerConfig) -> Result<Arc<dyn JobProcessor>> {
    Ok(match config.processor {
        ProcessorKind::Simulated => Arc::new(SimulatedProcessor::new(config.simulated_latency)),
        ProcessorKind::Http => Arc::new(HttpProbeProcessor::new(config.fetch_timeout)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::types::{JobStatus, Priority};
    use crate::types::{JobGroupId, JobId};

    fn job() -> Job {
        let now = Utc::now();
        Job {
            job_id: JobId::new(),
            url: "https://example.com/".to_string(),
            priority: Priority::Normal,
            group_id: JobGroupId::new(),
            tenant_id: None,
            status: JobStatus::Running,
            created_at: now,
            updated_at: now,
            not_before: None,
            estimated_start_time: now,
            sla_deadline: now,
            result: None,
            error: None,
            reason: None,
            callback_url: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_processor_reports_crawl_time() {
        let processor = SimulatedProcessor::new(Duration::from_millis(100));
        let result = processor.process(&job()).await.unwrap();
        assert!(result.get("last_crawled_at").and_then(|v| v.as_str()).is_some());
    }

    #[test]
    fn test_build_processor_from_config() {
        let mut config = WorkerConfig::default();
        assert!(build_processor(&config).is_ok());
        config.processor = ProcessorKind::Http;
        assert!(build_processor(&config).is_ok());
    }
}
