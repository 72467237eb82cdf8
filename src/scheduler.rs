use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{Result, DeckError};
use crate::job::{Job, JobRequest, JobStatus};
use crate::metrics::{JobMetricsRecord, MetricsSink, QueueDepthRecord};
use crate::pipeline::JobPipeline;

/// Point-in-time view of the queue for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub queue_size: usize,
    pub processing_count: usize,
    pub max_concurrent: usize,
    pub queued_jobs: Vec<Job>,
}

struct QueuedJob {
    job_id: String,
    request: JobRequest,
}

/// FIFO job queue with a bound on simultaneously processing jobs.
///
/// One admission loop pulls from the queue head. A request that finds
/// every slot busy goes back to the tail and the loop pauses briefly;
/// the job's own status never leaves Queued while it waits. Under
/// saturation this can put a waiting job behind later submissions,
/// which is accepted scheduling behavior, not a state transition.
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    jobs: Mutex<HashMap<String, Job>>,
    in_flight: AtomicUsize,
    max_concurrent: usize,
    poll_interval: Duration,
    pipeline: Arc<dyn JobPipeline>,
    metrics: Arc<dyn MetricsSink>,
    tx: mpsc::UnboundedSender<QueuedJob>,
}

impl JobScheduler {
    /// Build the scheduler and spawn its admission loop.
    pub fn start(
        config: &SchedulerConfig,
        pipeline: Arc<dyn JobPipeline>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let inner = Arc::new(SchedulerInner {
            jobs: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_concurrent: config.max_concurrent.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            pipeline,
            metrics,
            tx,
        });

        tokio::spawn(run_loop(inner.clone(), rx));

        Self { inner }
    }

    /// Register a job and append it to the queue tail. Validation has
    /// already happened by the time a request reaches this point.
    pub fn submit(&self, request: JobRequest) -> Result<Job> {
        let job = Job {
            job_id: Uuid::new_v4().to_string(),
            filename: request.filename.clone(),
            target_lang: request.target_lang,
            status: JobStatus::Queued,
            pages: request.pages,
            text_count: request.text_count,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        };

        self.inner.lock_jobs().insert(job.job_id.clone(), job.clone());

        self.inner
            .tx
            .send(QueuedJob { job_id: job.job_id.clone(), request })
            .map_err(|_| DeckError::Job("Scheduler loop is not running".to_string()))?;

        info!("Queued job {} ({})", job.job_id, job.filename);
        Ok(job)
    }

    pub fn status(&self, job_id: &str) -> Result<Job> {
        self.inner
            .lock_jobs()
            .get(job_id)
            .cloned()
            .ok_or_else(|| DeckError::NotFound(job_id.to_string()))
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        let jobs = self.inner.lock_jobs();
        let mut queued: Vec<Job> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Queued)
            .cloned()
            .collect();
        queued.sort_by_key(|job| job.created_at);

        let processing_count = jobs
            .values()
            .filter(|job| job.status == JobStatus::Processing)
            .count();

        QueueSnapshot {
            queue_size: queued.len(),
            processing_count,
            max_concurrent: self.inner.max_concurrent,
            queued_jobs: queued,
        }
    }
}

impl SchedulerInner {
    fn lock_jobs(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn mark_processing(&self, job_id: &str) {
        if let Some(job) = self.lock_jobs().get_mut(job_id) {
            job.status = JobStatus::Processing;
        }
    }

    fn finish(&self, job_id: &str, status: JobStatus, error_message: Option<String>) {
        if let Some(job) = self.lock_jobs().get_mut(job_id) {
            job.status = status;
            job.error_message = error_message;
            job.completed_at = Some(Utc::now());
        }
    }

    fn queued_count(&self) -> usize {
        self.lock_jobs()
            .values()
            .filter(|job| job.status == JobStatus::Queued)
            .count()
    }
}

/// The admission loop. The scheduler keeps a sender of its own, so
/// the channel never closes and the loop runs for the life of the
/// process; per-job errors are handled on the job's task.
async fn run_loop(inner: Arc<SchedulerInner>, mut rx: mpsc::UnboundedReceiver<QueuedJob>) {
    while let Some(queued) = rx.recv().await {
        if inner.in_flight.load(Ordering::SeqCst) >= inner.max_concurrent {
            // Every slot is busy: back to the tail, then wait a beat.
            if inner.tx.send(queued).is_err() {
                error!("Failed to requeue job waiting for a slot");
            }
            tokio::time::sleep(inner.poll_interval).await;
            continue;
        }

        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        inner.mark_processing(&queued.job_id);

        let inner = inner.clone();
        tokio::spawn(async move {
            process_job(inner, queued).await;
        });
    }
}

async fn process_job(inner: Arc<SchedulerInner>, queued: QueuedJob) {
    let QueuedJob { job_id, request } = queued;
    info!("Starting translation job {}", job_id);
    let started = Instant::now();

    // The pipeline runs on its own task so a panic surfaces as a
    // JoinError here instead of taking the job task down with it.
    let pipeline = inner.pipeline.clone();
    let pipeline_request = request.clone();
    let outcome = tokio::spawn(async move { pipeline.run(&pipeline_request).await }).await;

    let elapsed = started.elapsed().as_secs_f64();

    match outcome {
        Ok(Ok(output)) => {
            inner.finish(&job_id, JobStatus::Completed, None);
            inner.metrics.record_job(&JobMetricsRecord::completed(
                &request.client_id,
                &request.filename,
                output.pages,
                output.text_count,
                request.target_lang,
                elapsed,
                request.file_size,
                &output.usage,
            ));
            info!(
                "Job {} completed: {} pages, {} texts, {:.2}s, {} tokens, ${:.4}",
                job_id,
                output.pages,
                output.text_count,
                elapsed,
                output.usage.total_tokens,
                output.usage.total_cost_usd
            );
        }
        Ok(Err(e)) => {
            fail_job(&inner, &job_id, &request, elapsed, e.to_string());
        }
        Err(join_error) => {
            fail_job(
                &inner,
                &job_id,
                &request,
                elapsed,
                format!("Translation task panicked: {}", join_error),
            );
        }
    }

    inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    inner.metrics.record_queue(&QueueDepthRecord::new(
        inner.queued_count(),
        inner.in_flight.load(Ordering::SeqCst),
    ));
}

fn fail_job(
    inner: &SchedulerInner,
    job_id: &str,
    request: &JobRequest,
    elapsed: f64,
    message: String,
) {
    error!("Job {} failed: {}", job_id, message);
    inner.finish(job_id, JobStatus::Failed, Some(message.clone()));
    inner.metrics.record_job(&JobMetricsRecord::failed(
        &request.client_id,
        &request.filename,
        request.pages,
        request.text_count,
        request.target_lang,
        elapsed,
        request.file_size,
        &message,
    ));

    // Best-effort cleanup of the input artifact for failed jobs.
    if request.input_path.exists() {
        let _ = std::fs::remove_file(&request.input_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    use crate::job::TargetLanguage;
    use crate::pipeline::PipelineOutput;
    use crate::usage::UsageMetrics;

    struct TestSink {
        jobs: Mutex<Vec<JobMetricsRecord>>,
        queues: Mutex<Vec<QueueDepthRecord>>,
    }

    impl TestSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { jobs: Mutex::new(Vec::new()), queues: Mutex::new(Vec::new()) })
        }
    }

    impl MetricsSink for TestSink {
        fn record_job(&self, record: &JobMetricsRecord) {
            self.jobs.lock().unwrap().push(record.clone());
        }

        fn record_queue(&self, record: &QueueDepthRecord) {
            self.queues.lock().unwrap().push(record.clone());
        }
    }

    /// Pipeline that sleeps while tracking the peak number of
    /// simultaneous runs.
    struct SleepyPipeline {
        current: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl SleepyPipeline {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl JobPipeline for SleepyPipeline {
        async fn run(&self, _request: &JobRequest) -> crate::error::Result<PipelineOutput> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(PipelineOutput {
                pages: 1,
                text_count: 1,
                usage: UsageMetrics::from_counts("gpt-4o-mini", 10, 5),
            })
        }
    }

    struct OrderPipeline {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobPipeline for OrderPipeline {
        async fn run(&self, request: &JobRequest) -> crate::error::Result<PipelineOutput> {
            self.seen.lock().unwrap().push(request.filename.clone());
            Ok(PipelineOutput {
                pages: 0,
                text_count: 0,
                usage: UsageMetrics::zero("gpt-4o-mini"),
            })
        }
    }

    struct FailingPipeline;

    #[async_trait]
    impl JobPipeline for FailingPipeline {
        async fn run(&self, _request: &JobRequest) -> crate::error::Result<PipelineOutput> {
            Err(DeckError::Job("document is cursed".to_string()))
        }
    }

    struct PanickyPipeline;

    #[async_trait]
    impl JobPipeline for PanickyPipeline {
        async fn run(&self, _request: &JobRequest) -> crate::error::Result<PipelineOutput> {
            panic!("unexpected pipeline panic");
        }
    }

    fn request(name: &str) -> JobRequest {
        JobRequest {
            filename: name.to_string(),
            target_lang: TargetLanguage::En,
            client_id: "test".to_string(),
            file_size: 64,
            input_path: PathBuf::from("/nonexistent/in.json"),
            output_path: PathBuf::from("/nonexistent/out.json"),
            pages: 1,
            text_count: 1,
        }
    }

    fn config(max_concurrent: usize) -> SchedulerConfig {
        SchedulerConfig { max_concurrent, poll_interval_ms: 10 }
    }

    async fn wait_for_terminal(scheduler: &JobScheduler, job_id: &str) -> Job {
        for _ in 0..500 {
            let job = scheduler.status(job_id).unwrap();
            if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never reached a terminal state", job_id);
    }

    #[tokio::test]
    async fn never_processes_more_than_the_concurrency_bound() {
        let pipeline = SleepyPipeline::new(Duration::from_millis(50));
        let scheduler = JobScheduler::start(&config(2), pipeline.clone(), TestSink::new());

        let jobs: Vec<Job> = (0..5)
            .map(|i| scheduler.submit(request(&format!("deck{}.pptx", i))).unwrap())
            .collect();

        for job in &jobs {
            let done = wait_for_terminal(&scheduler, &job.job_id).await;
            assert_eq!(done.status, JobStatus::Completed);
            assert!(done.completed_at.is_some());
        }

        assert!(pipeline.peak.load(Ordering::SeqCst) <= 2);
        assert!(pipeline.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn admits_jobs_in_submission_order_when_slots_are_free() {
        let pipeline = Arc::new(OrderPipeline { seen: Mutex::new(Vec::new()) });
        let scheduler = JobScheduler::start(&config(3), pipeline.clone(), TestSink::new());

        let a = scheduler.submit(request("a.pptx")).unwrap();
        let b = scheduler.submit(request("b.pptx")).unwrap();
        let c = scheduler.submit(request("c.pptx")).unwrap();

        for job in [&a, &b, &c] {
            wait_for_terminal(&scheduler, &job.job_id).await;
        }

        assert_eq!(
            *pipeline.seen.lock().unwrap(),
            vec!["a.pptx".to_string(), "b.pptx".to_string(), "c.pptx".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_pipeline_marks_job_failed_with_zeroed_metrics() {
        let sink = TestSink::new();
        let scheduler = JobScheduler::start(&config(1), Arc::new(FailingPipeline), sink.clone());

        let job = scheduler.submit(request("bad.pptx")).unwrap();
        let done = wait_for_terminal(&scheduler, &job.job_id).await;

        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error_message.as_deref().unwrap().contains("cursed"));

        let records = sink.jobs.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "failed");
        assert_eq!(records[0].total_tokens, 0);
        assert_eq!(records[0].total_cost_usd, 0.0);
    }

    #[tokio::test]
    async fn panicking_pipeline_fails_the_job_but_not_the_loop() {
        let scheduler = JobScheduler::start(&config(1), Arc::new(PanickyPipeline), TestSink::new());

        let job = scheduler.submit(request("panicky.pptx")).unwrap();
        let done = wait_for_terminal(&scheduler, &job.job_id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done.error_message.as_deref().unwrap().contains("panicked"));

        // Loop keeps admitting after the panic.
        let next = scheduler.submit(request("after.pptx")).unwrap();
        let done = wait_for_terminal(&scheduler, &next.job_id).await;
        assert_eq!(done.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn completed_job_emits_usage_and_queue_records() {
        let sink = TestSink::new();
        let pipeline = SleepyPipeline::new(Duration::from_millis(5));
        let scheduler = JobScheduler::start(&config(1), pipeline, sink.clone());

        let job = scheduler.submit(request("deck.pptx")).unwrap();
        wait_for_terminal(&scheduler, &job.job_id).await;

        let records = sink.jobs.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, "completed");
        assert_eq!(records[0].total_tokens, 15);
        assert_eq!(records[0].model_name.as_deref(), Some("gpt-4o-mini"));

        let queues = sink.queues.lock().unwrap();
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].processing_count, 0);
    }

    #[tokio::test]
    async fn status_of_unknown_job_is_not_found() {
        let scheduler = JobScheduler::start(
            &config(1),
            SleepyPipeline::new(Duration::from_millis(1)),
            TestSink::new(),
        );
        assert!(matches!(
            scheduler.status("no-such-job"),
            Err(DeckError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn snapshot_lists_queued_jobs_by_creation_time() {
        let pipeline = SleepyPipeline::new(Duration::from_millis(200));
        let scheduler = JobScheduler::start(&config(1), pipeline, TestSink::new());

        let first = scheduler.submit(request("first.pptx")).unwrap();
        let second = scheduler.submit(request("second.pptx")).unwrap();
        let third = scheduler.submit(request("third.pptx")).unwrap();

        // Give the loop time to admit the head job.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = scheduler.queue_snapshot();
        assert_eq!(snapshot.max_concurrent, 1);
        assert_eq!(snapshot.processing_count, 1);
        assert_eq!(snapshot.queue_size, 2);
        assert_eq!(snapshot.queued_jobs[0].job_id, second.job_id);
        assert_eq!(snapshot.queued_jobs[1].job_id, third.job_id);

        wait_for_terminal(&scheduler, &first.job_id).await;
        wait_for_terminal(&scheduler, &second.job_id).await;
        wait_for_terminal(&scheduler, &third.job_id).await;
    }
}
