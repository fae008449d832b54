//! Background worker for storage verification and processing.
//!
//! Job creation hands work to the worker through a [`TaskQueue`] instead of
//! blocking on the verification window. The worker consumes [`IngestTask`]s
//! with bounded concurrency and reports progress on a broadcast channel.
//!
//! A task is only taken off the channel once a concurrency permit is free, so
//! a full channel makes [`TaskQueue::enqueue`] wait.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use manuals_core::defaults::{EVENT_BUS_CAPACITY, WORKER_MAX_CONCURRENT, WORKER_QUEUE_CAPACITY};
use manuals_core::{Error, Result};

use crate::orchestrator::IngestionOrchestrator;

// =============================================================================
// TASKS
// =============================================================================

/// Unit of background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestTask {
    /// Wait for an uploaded blob to become readable.
    Verify { job_id: Uuid, storage_path: String },
    /// Process a verified job through to a terminal status.
    Process { job_id: Uuid },
}

impl IngestTask {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::Verify { job_id, .. } | Self::Process { job_id } => *job_id,
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Verify { .. } => TaskKind::Verify,
            Self::Process { .. } => TaskKind::Process,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Verify,
    Process,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verify => write!(f, "verify"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Sending side of the worker's task channel.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<IngestTask>,
}

impl TaskQueue {
    /// Create a bounded queue and the receiver the worker consumes.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<IngestTask>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a task, waiting for capacity.
    pub async fn enqueue(&self, task: IngestTask) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|e| Error::Internal(format!("Task queue closed: {}", e.0.job_id())))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Configuration for the ingest worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Whether to consume tasks at all.
    pub enabled: bool,
    /// Maximum tasks running at once.
    pub max_concurrent: usize,
    /// Task channel capacity.
    pub queue_capacity: usize,
    /// Enqueue processing after a successful verification.
    pub auto_process: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: WORKER_MAX_CONCURRENT,
            queue_capacity: WORKER_QUEUE_CAPACITY,
            auto_process: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `INGEST_WORKER_ENABLED` | `true` | Enable/disable the worker |
    /// | `INGEST_MAX_CONCURRENT` | `4` | Max concurrent tasks |
    /// | `INGEST_QUEUE_CAPACITY` | `256` | Task channel capacity |
    /// | `INGEST_AUTO_PROCESS` | `true` | Process jobs right after verification |
    pub fn from_env() -> Self {
        let flag = |name: &str| {
            std::env::var(name)
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true)
        };

        let max_concurrent = std::env::var("INGEST_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(WORKER_MAX_CONCURRENT)
            .max(1);

        let queue_capacity = std::env::var("INGEST_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(WORKER_QUEUE_CAPACITY)
            .max(1);

        Self {
            enabled: flag("INGEST_WORKER_ENABLED"),
            max_concurrent,
            queue_capacity,
            auto_process: flag("INGEST_AUTO_PROCESS"),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_auto_process(mut self, auto_process: bool) -> Self {
        self.auto_process = auto_process;
        self
    }
}

// =============================================================================
// EVENTS AND HANDLE
// =============================================================================

/// Event emitted by the ingest worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted,
    WorkerStopped,
    /// A task was picked up.
    JobStarted { job_id: Uuid, task: TaskKind },
    /// Storage verification succeeded.
    JobVerified { job_id: Uuid },
    /// The job reached `completed`.
    JobCompleted {
        job_id: Uuid,
        dip_success: Option<bool>,
    },
    /// The task failed; the job is `failed` unless the error was a preflight one.
    JobFailed {
        job_id: Uuid,
        task: TaskKind,
        error: String,
    },
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    queue: TaskQueue,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to stop taking tasks. In-flight tasks finish first.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Signal shutdown and wait until every in-flight task has finished.
    pub async fn shutdown_and_wait(self) -> Result<()> {
        // A closed channel means the worker loop has already exited.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Ingest worker task failed: {}", e)))
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Queue feeding this worker.
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }
}

// =============================================================================
// WORKER
// =============================================================================

/// Consumes ingest tasks and drives them through the orchestrator.
pub struct IngestWorker {
    orchestrator: Arc<IngestionOrchestrator>,
    config: WorkerConfig,
    queue: TaskQueue,
    receiver: mpsc::Receiver<IngestTask>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl IngestWorker {
    pub fn new(
        orchestrator: Arc<IngestionOrchestrator>,
        config: WorkerConfig,
        queue: TaskQueue,
        receiver: mpsc::Receiver<IngestTask>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            orchestrator,
            config,
            queue,
            receiver,
            event_tx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();
        let queue = self.queue.clone();

        let task = tokio::spawn(async move {
            self.run(shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            queue,
            task,
        }
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Ingest worker is disabled, not starting");
            return;
        }

        info!(
            max_concurrent = self.config.max_concurrent,
            queue_capacity = self.config.queue_capacity,
            auto_process = self.config.auto_process,
            "Ingest worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();

        loop {
            // Claim capacity first; the channel is only read with a permit in hand.
            let permit = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Ingest worker received shutdown signal");
                    break;
                }
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Worker semaphore closed");
                        break;
                    }
                },
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join_result(result);
                    continue;
                }
            };

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Ingest worker received shutdown signal");
                    break;
                }
                task = self.receiver.recv() => {
                    let Some(task) = task else {
                        info!("Task queue closed");
                        break;
                    };
                    tasks.spawn(self.task_runner().execute(task, permit));
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join_result(result);
                }
            }
        }

        // Follow-up enqueues from draining tasks fail fast instead of waiting on
        // a channel nobody reads. Reconciliation picks those jobs up later.
        self.receiver.close();
        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for in-flight ingest tasks");
        }
        while let Some(result) = tasks.join_next().await {
            log_join_result(result);
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Ingest worker stopped");
    }

    fn task_runner(&self) -> TaskRunner {
        TaskRunner {
            orchestrator: self.orchestrator.clone(),
            queue: self.queue.clone(),
            event_tx: self.event_tx.clone(),
            auto_process: self.config.auto_process,
        }
    }
}

fn log_join_result(result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        error!(error = ?e, "Ingest task panicked");
    }
}

/// References needed to execute one task in a spawned future.
struct TaskRunner {
    orchestrator: Arc<IngestionOrchestrator>,
    queue: TaskQueue,
    event_tx: broadcast::Sender<WorkerEvent>,
    auto_process: bool,
}

impl TaskRunner {
    async fn execute(self, task: IngestTask, permit: OwnedSemaphorePermit) {
        let start = Instant::now();
        let job_id = task.job_id();
        let kind = task.kind();
        debug!(job_id = %job_id, task = %kind, "Executing ingest task");
        let _ = self
            .event_tx
            .send(WorkerEvent::JobStarted { job_id, task: kind });

        match task {
            IngestTask::Verify {
                job_id,
                storage_path,
            } => match self.orchestrator.verify_storage(job_id, &storage_path).await {
                Ok(()) => {
                    let _ = self.event_tx.send(WorkerEvent::JobVerified { job_id });
                    // Release the slot before a possibly blocking enqueue so the
                    // loop can keep draining the channel.
                    drop(permit);
                    if self.auto_process {
                        if let Err(e) = self.queue.enqueue(IngestTask::Process { job_id }).await {
                            error!(job_id = %job_id, error = %e, "Failed to enqueue processing");
                        }
                    }
                }
                Err(e) => self.report_failure(job_id, kind, e.to_string()),
            },
            IngestTask::Process { job_id } => match self.orchestrator.run_job(job_id).await {
                Ok(outcome) if outcome.is_completed() => {
                    let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                        job_id,
                        dip_success: match outcome.intelligence {
                            manuals_core::IntelligenceOutcome::Skipped => None,
                            ref other => Some(other.succeeded()),
                        },
                    });
                }
                Ok(outcome) => self.report_failure(
                    job_id,
                    kind,
                    outcome.error.unwrap_or_else(|| "Job failed".to_string()),
                ),
                Err(e) => self.report_failure(job_id, kind, e.to_string()),
            },
        }

        debug!(
            job_id = %job_id,
            task = %kind,
            duration_ms = start.elapsed().as_millis() as u64,
            "Ingest task finished"
        );
    }

    fn report_failure(&self, job_id: Uuid, task: TaskKind, error: String) {
        warn!(job_id = %job_id, task = %task, error = %error, "Ingest task failed");
        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id,
            task,
            error,
        });
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builder wiring an orchestrator to a fresh task queue and worker.
pub struct WorkerBuilder {
    config: WorkerConfig,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            config: WorkerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Create the queue, let `make_orchestrator` attach it, and build the
    /// worker around the result.
    pub fn build<F>(self, make_orchestrator: F) -> (Arc<IngestionOrchestrator>, IngestWorker)
    where
        F: FnOnce(TaskQueue) -> IngestionOrchestrator,
    {
        let (queue, receiver) = TaskQueue::channel(self.config.queue_capacity);
        let orchestrator = Arc::new(make_orchestrator(queue.clone()));
        let worker = IngestWorker::new(orchestrator.clone(), self.config, queue, receiver);
        (orchestrator, worker)
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
