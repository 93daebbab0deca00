//! Job dispatch.
//!
//! Jobs run either as local tokio tasks or through an apalis queue backed by
//! Postgres. Both paths end in [`execute`], which performs the single
//! terminal write for the job. Cross-job concurrency is bounded by a shared
//! semaphore sized from `WORKER_CONCURRENCY`; the apalis worker is limited to
//! the same number of in-flight jobs.

use apalis::prelude::*;
use apalis_sql::postgres::PostgresStorage;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::models::Job;
use crate::pipeline::Pipeline;
use crate::store::{JobStore, StoreProgress};

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const WORKER_NAME: &str = "analysis-worker";
const INTERNAL_FAILURE: &str = "Internal error while processing the video. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to enqueue job: {0}")]
    Enqueue(#[from] sqlx::Error),

    #[error("worker pool is shut down")]
    Closed,
}

/// Shared context for job processing
#[derive(Clone)]
pub struct WorkerContext {
    pub pipeline: Pipeline,
    pub store: Arc<dyn JobStore>,
    permits: Arc<Semaphore>,
}

impl WorkerContext {
    pub fn new(pipeline: Pipeline, store: Arc<dyn JobStore>, concurrency: usize) -> Self {
        Self {
            pipeline,
            store,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }
}

/// Run the pipeline for `job` and record the outcome.
pub async fn execute(pipeline: &Pipeline, store: &dyn JobStore, job: &Job) {
    let progress = StoreProgress::new(store, &job.job_id);
    let write = match pipeline.run(job, &progress).await {
        Ok(result) => store.complete(&job.job_id, &result).await,
        Err(e) => store.fail(&job.job_id, &e.to_string()).await,
    };
    if let Err(e) = write {
        tracing::error!(job_id = %job.job_id, error = %e, "Failed to record job outcome");
    }
}

/// Wait for a slot, then execute. A panicking pipeline still fails the job.
async fn run_job(ctx: WorkerContext, job: Job) -> Result<(), QueueError> {
    let _permit = ctx
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| QueueError::Closed)?;

    let handle = {
        let ctx = ctx.clone();
        let job = job.clone();
        tokio::spawn(async move { execute(&ctx.pipeline, ctx.store.as_ref(), &job).await })
    };

    if let Err(e) = handle.await {
        tracing::error!(job_id = %job.job_id, error = %e, "Job task panicked");
        if let Err(e) = ctx.store.fail(&job.job_id, INTERNAL_FAILURE).await {
            tracing::error!(job_id = %job.job_id, error = %e, "Failed to record job failure");
        }
    }
    Ok(())
}

/// Job handler for the durable queue.
/// Always returns Ok - the outcome is recorded in the job store, not retried.
async fn process_analysis_job(job: Job, ctx: Data<WorkerContext>) -> Result<(), Error> {
    let job_id = job.job_id.clone();
    if let Err(e) = run_job((*ctx).clone(), job).await {
        tracing::error!(job_id = %job_id, error = %e, "Queued job could not run");
    }
    Ok(())
}

#[derive(Clone)]
pub enum JobQueue {
    Local(WorkerContext),
    Durable(PostgresStorage<Job>),
}

impl JobQueue {
    pub fn backend(&self) -> &'static str {
        match self {
            JobQueue::Local(_) => "local",
            JobQueue::Durable(_) => "postgres",
        }
    }

    /// Hand `job` off for processing. Returns once it is scheduled.
    pub async fn submit(&self, job: Job) -> Result<(), QueueError> {
        match self {
            JobQueue::Local(ctx) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let job_id = job.job_id.clone();
                    if let Err(e) = run_job(ctx, job).await {
                        tracing::error!(job_id = %job_id, error = %e, "Local job could not run");
                    }
                });
                Ok(())
            }
            JobQueue::Durable(storage) => {
                let mut storage = storage.clone();
                storage.push(job).await?;
                Ok(())
            }
        }
    }
}

/// Start the apalis worker consuming the durable queue.
/// The worker takes at most `concurrency` jobs off the queue at a time.
pub async fn run_analysis_worker(
    storage: PostgresStorage<Job>,
    ctx: WorkerContext,
    concurrency: usize,
) {
    let concurrency = concurrency.max(1);
    tracing::info!(worker = WORKER_NAME, concurrency, "Apalis worker starting");

    let worker = WorkerBuilder::new(WORKER_NAME)
        .concurrency(concurrency)
        .data(ctx)
        .backend(storage)
        .build_fn(process_analysis_job);

    if let Err(e) = Monitor::new().register(worker).run().await {
        tracing::error!(error = %e, "Analysis worker monitor failed");
    }
}

/// Remove finished jobs older than `retention`. Returns how many were removed.
pub async fn sweep_once(store: &dyn JobStore, retention: Duration) -> u64 {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::hours(1));
    match store.prune(Utc::now() - retention).await {
        Ok(removed) => {
            if removed > 0 {
                tracing::info!(removed, "Pruned finished jobs");
            }
            removed
        }
        Err(e) => {
            tracing::warn!(error = %e, "Job pruning failed");
            0
        }
    }
}

/// Periodically prune finished jobs. Runs forever.
pub async fn run_retention_sweeper(store: Arc<dyn JobStore>, retention: Duration) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        sweep_once(store.as_ref(), retention).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::AnalysisError;
    use crate::models::{FramePrediction, JobRecord, JobStatus, Stage};
    use crate::pipeline::{FrameClassifier, MediaTool, VideoAcquirer};
    use crate::store::InMemoryJobStore;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoAcquirer;

    #[async_trait]
    impl VideoAcquirer for NoAcquirer {
        async fn acquire(&self, _url: &str, _job_id: &str) -> Result<PathBuf, AnalysisError> {
            Err(AnalysisError::ToolNotFound {
                tool: "yt-dlp",
                path: "yt-dlp".to_string(),
            })
        }
    }

    struct OneFrame;

    #[async_trait]
    impl MediaTool for OneFrame {
        async fn probe_duration(&self, _video_path: &Path) -> Result<f64, AnalysisError> {
            Ok(3.0)
        }

        async fn extract_frames(
            &self,
            _video_path: &Path,
            output_dir: &Path,
            _max_frames: u32,
        ) -> Result<Vec<PathBuf>, AnalysisError> {
            tokio::fs::create_dir_all(output_dir).await?;
            let frame = output_dir.join("frame_0001.jpg");
            tokio::fs::write(&frame, b"jpg").await?;
            Ok(vec![frame])
        }
    }

    struct AlwaysFake;

    #[async_trait]
    impl FrameClassifier for AlwaysFake {
        async fn classify(&self, frame_paths: &[PathBuf]) -> Vec<FramePrediction> {
            frame_paths
                .iter()
                .enumerate()
                .map(|(i, _)| FramePrediction {
                    frame_index: i + 1,
                    real_probability: 0.05,
                    fake_probability: 0.95,
                    model_version: None,
                })
                .collect()
        }
    }

    /// Counts how many classifications run at once
    #[derive(Default)]
    struct SlowClassifier {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl FrameClassifier for SlowClassifier {
        async fn classify(&self, frame_paths: &[PathBuf]) -> Vec<FramePrediction> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            AlwaysFake.classify(frame_paths).await
        }
    }

    fn context(root: &Path, store: Arc<dyn JobStore>) -> WorkerContext {
        context_with(root, store, Arc::new(AlwaysFake), 1)
    }

    fn context_with(
        root: &Path,
        store: Arc<dyn JobStore>,
        classifier: Arc<dyn FrameClassifier>,
        concurrency: usize,
    ) -> WorkerContext {
        let temp = root.to_string_lossy().into_owned();
        let config = Arc::new(Config::from_lookup(|key| match key {
            "TEMP_DIR" => Some(temp.clone()),
            _ => None,
        }));
        let pipeline = Pipeline::new(
            config,
            Arc::new(NoAcquirer),
            Arc::new(OneFrame),
            classifier,
        );
        WorkerContext::new(pipeline, store, concurrency)
    }

    fn upload(root: &Path, job_id: &str) -> Job {
        let path = root.join(format!("{}.mp4", job_id));
        std::fs::write(&path, b"video").unwrap();
        Job::from_upload(job_id.to_string(), path, None)
    }

    async fn wait_for_terminal(store: &dyn JobStore, job_id: &str) -> JobRecord {
        for _ in 0..200 {
            if let Some(record) = store.get(job_id).await.unwrap() {
                if record.status.is_terminal() {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never finished", job_id);
    }

    #[tokio::test]
    async fn test_execute_writes_completed_result() {
        let root = tempfile::tempdir().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let ctx = context(root.path(), store.clone());
        let job = upload(root.path(), "ok1");
        store.create(&job).await.unwrap();

        execute(&ctx.pipeline, store.as_ref(), &job).await;

        let record = store.get("ok1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.stage, Stage::Complete);
        assert_eq!(record.result.unwrap().frames_analyzed, 1);
    }

    #[tokio::test]
    async fn test_execute_writes_error_message() {
        let root = tempfile::tempdir().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let ctx = context(root.path(), store.clone());
        let job = Job::from_url("bad1".to_string(), "https://youtu.be/x".to_string());
        store.create(&job).await.unwrap();

        execute(&ctx.pipeline, store.as_ref(), &job).await;

        let record = store.get("bad1").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.error.unwrap().starts_with("yt-dlp not found at: yt-dlp"));
        assert_eq!(record.stage, Stage::Downloading);
    }

    #[tokio::test]
    async fn test_local_queue_runs_jobs() {
        let root = tempfile::tempdir().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let queue = JobQueue::Local(context(root.path(), store.clone()));
        assert_eq!(queue.backend(), "local");

        for id in ["q1", "q2", "q3"] {
            let job = upload(root.path(), id);
            store.create(&job).await.unwrap();
            queue.submit(job).await.unwrap();
        }

        for id in ["q1", "q2", "q3"] {
            let record = wait_for_terminal(store.as_ref(), id).await;
            assert_eq!(record.status, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_queued_jobs_respect_worker_concurrency() {
        let root = tempfile::tempdir().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let classifier = Arc::new(SlowClassifier::default());
        let ctx = context_with(root.path(), store.clone(), classifier.clone(), 2);

        // A backend that hands over more jobs than there are slots
        let mut handles = Vec::new();
        for i in 0..5 {
            let job = upload(root.path(), &format!("c{}", i));
            store.create(&job).await.unwrap();
            handles.push(tokio::spawn(process_analysis_job(job, Data::new(ctx.clone()))));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(classifier.peak.load(Ordering::SeqCst), 2);
        for i in 0..5 {
            let record = store.get(&format!("c{}", i)).await.unwrap().unwrap();
            assert_eq!(record.status, JobStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_sweep_prunes_finished_jobs() {
        let store = InMemoryJobStore::new();
        let job = Job::from_url("old".to_string(), "https://youtu.be/x".to_string());
        store.create(&job).await.unwrap();
        store.fail("old", "boom").await.unwrap();

        assert_eq!(sweep_once(&store, Duration::from_secs(3600)).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sweep_once(&store, Duration::from_millis(1)).await, 1);
    }
}
