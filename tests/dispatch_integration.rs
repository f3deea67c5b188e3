//! Dispatch integration tests: submit, queue, worker pool and job store round trips.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use recrawl_core::dispatch::{
    Job, JobProcessor, JobStatus, JobStore, Priority, PriorityDispatchQueue, RecrawlService,
    SimulatedProcessor, SubmitRequest, WorkerPool,
};
use recrawl_core::{Config, Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records the order in which urls reach the processor.
#[derive(Debug, Default)]
struct RecordingProcessor {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl JobProcessor for RecordingProcessor {
    async fn process(&self, job: &Job) -> Result<serde_json::Value> {
        self.seen.lock().unwrap().push(job.url.clone());
        Ok(serde_json::json!({"ok": true}))
    }
}

fn service(config: Config) -> RecrawlService {
    RecrawlService::new(
        Arc::new(config),
        Arc::new(JobStore::new()),
        Arc::new(PriorityDispatchQueue::new()),
    )
}

fn request(urls: &[&str], priority: Priority) -> SubmitRequest {
    SubmitRequest {
        urls: urls.iter().map(|u| u.to_string()).collect(),
        priority,
        ..Default::default()
    }
}

fn start_pool(
    svc: &RecrawlService,
    processor: Arc<dyn JobProcessor>,
    capacity: usize,
) -> (Arc<WorkerPool>, tokio::task::JoinHandle<recrawl_core::dispatch::ShutdownReport>) {
    let pool = Arc::new(WorkerPool::new(
        svc.queue().clone(),
        svc.store().clone(),
        processor,
        capacity,
    ));
    let handle = tokio::spawn({
        let pool = pool.clone();
        async move { pool.run().await }
    });
    (pool, handle)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_critical_batch_runs_before_low() {
    let svc = service(Config::default());
    svc.submit(request(&["https://a.example/", "https://b.example/"], Priority::Critical))
        .unwrap();
    svc.submit(request(&["https://c.example/"], Priority::Low))
        .unwrap();

    let processor = Arc::new(RecordingProcessor::default());
    let (pool, handle) = start_pool(&svc, processor.clone(), 1);

    let store = svc.store().clone();
    wait_until(|| store.count_by_status(JobStatus::Succeeded) == 3).await;
    assert_eq!(
        *processor.seen.lock().unwrap(),
        vec!["https://a.example/", "https://b.example/", "https://c.example/"]
    );

    pool.shutdown();
    assert_eq!(handle.await.unwrap().completed, 3);
}

#[tokio::test]
async fn test_not_before_defers_without_blocking_others() {
    let svc = service(Config::default());
    let mut deferred = request(&["https://later.example/"], Priority::Critical);
    deferred.not_before = Some(Utc::now() + ChronoDuration::milliseconds(200));
    let later = svc.submit(deferred).unwrap().jobs[0].job_id.clone();
    let now = svc
        .submit(request(&["https://now.example/"], Priority::Low))
        .unwrap()
        .jobs[0]
        .job_id
        .clone();

    let processor = Arc::new(RecordingProcessor::default());
    let (pool, handle) = start_pool(&svc, processor.clone(), 2);

    let store = svc.store().clone();
    wait_until(|| store.get(&now).unwrap().status == JobStatus::Succeeded).await;
    assert_eq!(store.get(&later).unwrap().status, JobStatus::Queued);

    wait_until(|| store.get(&later).unwrap().status == JobStatus::Succeeded).await;
    let finished = store.get(&later).unwrap();
    assert!(finished.updated_at >= finished.not_before.unwrap());
    assert_eq!(
        *processor.seen.lock().unwrap(),
        vec!["https://now.example/", "https://later.example/"]
    );

    pool.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_simulated_processor_end_to_end() {
    let svc = service(Config::default());
    let resp = svc
        .submit(request(&["https://x.example/", "https://y.example/"], Priority::Normal))
        .unwrap();

    let (pool, handle) = start_pool(
        &svc,
        Arc::new(SimulatedProcessor::new(Duration::from_millis(10))),
        4,
    );

    let store = svc.store().clone();
    wait_until(|| store.count_by_status(JobStatus::Succeeded) == 2).await;
    for view in &resp.jobs {
        let job = svc.status(&view.job_id).unwrap();
        assert!(job.result.unwrap()["last_crawled_at"].is_string());
    }

    pool.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_unstarted_job_expires_after_sla() {
    let mut config = Config::default();
    config.recrawl.sla = Duration::from_millis(50);
    let svc = service(config);
    let job_id = svc
        .submit(request(&["https://slow.example/"], Priority::Normal))
        .unwrap()
        .jobs[0]
        .job_id
        .clone();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(svc.status(&job_id).unwrap().status, JobStatus::Expired);

    // An expired entry that still reaches a worker is skipped.
    let processor = Arc::new(RecordingProcessor::default());
    let (pool, handle) = start_pool(&svc, processor.clone(), 1);
    wait_until(|| svc.queue().is_empty()).await;
    pool.shutdown();
    let report = handle.await.unwrap();

    assert_eq!(report.completed, 0);
    assert!(processor.seen.lock().unwrap().is_empty());
    assert_eq!(svc.status(&job_id).unwrap().status, JobStatus::Expired);
}

#[tokio::test]
async fn test_idempotent_resubmission_creates_one_job() {
    let svc = service(Config::default());
    let mut req = request(&["https://a.example/"], Priority::Normal);
    req.idempotency_key = Some("nightly".to_string());

    let first = svc.submit(req.clone()).unwrap();
    let err = svc.submit(req).unwrap_err();
    assert!(matches!(err, Error::Conflict { ref job_group_id } if *job_group_id == first.job_group_id));

    let jobs = svc.group_status(&first.job_group_id).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(svc.store().len(), 1);
}
