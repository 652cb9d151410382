//! Run one OCR job in the background, reporting progress as we go.
//!
//! The worker never touches presentation state. Everything it wants to say
//! is sent as a [`JobEvent`] over a channel, and the foreground applies each
//! event on its own turn. The last event for every job is always
//! [`JobEvent::Finished`].

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use futures::StreamExt as _;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    async_utils::{BlockingIterStream, JoinWorker, spawn_blocking_propagating_panics},
    config::{Config, EngineConfig},
    error::JobError,
    ocr::{PageResult, Recognizer, TesseractRecognizer, aggregate},
    page_iter::{LocalPageResolver, PageResolver, RasterizeOptions},
    prelude::*,
    preprocess::preprocess,
};

/// What the user asked us to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobRequest {
    /// The image or document to read.
    pub source: PathBuf,
    /// Recognition language, passed verbatim to the recognizer.
    pub language: String,
}

/// Identifies a job in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How far along a job is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    /// Pages recognized so far.
    pub completed: usize,
    /// Pages this job will recognize.
    pub total: usize,
}

impl Progress {
    /// Completion as a fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// How a job ended. Every job produces exactly one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// All pages were recognized.
    Succeeded {
        /// Aggregated text of every page.
        text: String,
        /// Number of pages recognized.
        page_count: usize,
    },
    /// Something went wrong. No partial text is kept.
    Failed {
        /// A human-readable description of the failure.
        message: String,
    },
    /// The job was cancelled between pages. No partial text is kept.
    Cancelled {
        /// Pages recognized before the job stopped.
        completed: usize,
        /// Pages the job would have recognized.
        total: usize,
    },
}

impl JobOutcome {
    /// The runner state this outcome leaves behind.
    fn state(&self) -> JobState {
        match self {
            JobOutcome::Succeeded { .. } => JobState::Succeeded,
            JobOutcome::Failed { .. } => JobState::Failed,
            JobOutcome::Cancelled { .. } => JobState::Cancelled,
        }
    }
}

/// Notifications sent from the worker to the foreground.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobEvent {
    /// The worker has started. Progress is back at zero.
    Started,
    /// A new status line.
    Status(String),
    /// Another page is done.
    Progress(Progress),
    /// The job is over. Nothing follows this.
    Finished(JobOutcome),
}

/// The state of a [`JobRunner`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Running = 1,
    Succeeded = 2,
    Failed = 3,
    Cancelled = 4,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Idle,
            1 => JobState::Running,
            2 => JobState::Succeeded,
            3 => JobState::Failed,
            _ => JobState::Cancelled,
        }
    }
}

/// Runs at most one job at a time.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    resolver: Box<dyn PageResolver>,
    recognizer: Box<dyn Recognizer>,
    engine: EngineConfig,
    state: AtomicU8,
}

impl JobRunner {
    /// Create a runner from its collaborators.
    pub fn new(
        resolver: impl PageResolver,
        recognizer: impl Recognizer,
        engine: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                resolver: Box::new(resolver),
                recognizer: Box::new(recognizer),
                engine,
                state: AtomicU8::new(JobState::Idle as u8),
            }),
        }
    }

    /// Create a runner using Poppler and Tesseract, as configured.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            LocalPageResolver::new(RasterizeOptions::from(config)),
            TesseractRecognizer::new(config.tesseract.clone()),
            config.engine,
        )
    }

    /// What is the runner doing now?
    pub fn state(&self) -> JobState {
        JobState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Start a job in the background.
    ///
    /// Fails immediately if another job is still running. Must be called
    /// from inside a Tokio runtime.
    pub fn submit(&self, request: JobRequest) -> Result<JobHandle, JobError> {
        self.inner
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| {
                (state != JobState::Running as u8).then_some(JobState::Running as u8)
            })
            .map_err(|_| JobError::already_running())?;

        let id = JobId::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let inner = self.inner.clone();
        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let _guard = FailIfStillRunning(inner.clone());
            let outcome = inner.run(id, &request, &events_tx, &worker_cancel).await;
            // Update our state before anyone can see the outcome.
            inner.state.store(outcome.state() as u8, Ordering::SeqCst);
            send_event(&events_tx, JobEvent::Finished(outcome));
            Ok::<_, anyhow::Error>(())
        });

        Ok(JobHandle {
            id,
            events: events_rx,
            cancel,
            worker: JoinWorker::from_handle(handle),
        })
    }
}

impl RunnerInner {
    #[instrument(level = "debug", name = "job", skip_all, fields(id = %id, source = %request.source.display()))]
    async fn run(
        &self,
        id: JobId,
        request: &JobRequest,
        events: &mpsc::UnboundedSender<JobEvent>,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        match self.run_pages(request, events, cancel).await {
            Ok(outcome) => {
                debug!(?outcome, "Job finished");
                outcome
            }
            Err(err) => {
                error!("Job failed: {:?}", err);
                JobOutcome::Failed {
                    message: err.user_message(),
                }
            }
        }
    }

    async fn run_pages(
        &self,
        request: &JobRequest,
        events: &mpsc::UnboundedSender<JobEvent>,
        cancel: &CancellationToken,
    ) -> Result<JobOutcome, JobError> {
        send_event(events, JobEvent::Started);

        let pages = self.resolver.resolve(&request.source).await?;
        let total = pages.page_count();
        let is_multi_page = pages.is_multi_page();
        info!(total, "Recognizing pages");

        // Pages are decoded lazily, so pull them on a blocking thread.
        let mut pages = BlockingIterStream::new(pages);
        let mut results = Vec::with_capacity(total);
        loop {
            // Once every page is done, a late cancel can't undo the job.
            if cancel.is_cancelled() && results.len() < total {
                warn!(completed = results.len(), total, "Job cancelled");
                return Ok(JobOutcome::Cancelled {
                    completed: results.len(),
                    total,
                });
            }
            let Some(page) = pages.next().await else {
                break;
            };
            let page = page?;
            let ordinal = page.ordinal;
            send_event(
                events,
                JobEvent::Status(format!("Processing page {} of {}...", ordinal, total)),
            );

            let image = page.image;
            let gray = spawn_blocking_propagating_panics(move || preprocess(&image)).await;
            let text = self
                .recognizer
                .recognize(&gray, &request.language, &self.engine)
                .await
                .map_err(|source| JobError::Recognition { ordinal, source })?;
            trace!(ordinal, chars = text.len(), "Recognized page");

            results.push(PageResult { ordinal, text });
            send_event(
                events,
                JobEvent::Progress(Progress {
                    completed: results.len(),
                    total,
                }),
            );
        }

        Ok(JobOutcome::Succeeded {
            text: aggregate(&results, is_multi_page),
            page_count: results.len(),
        })
    }
}

/// Send an event, ignoring a foreground which has stopped listening.
fn send_event(events: &mpsc::UnboundedSender<JobEvent>, event: JobEvent) {
    if events.send(event).is_err() {
        trace!("Nobody is listening for job events");
    }
}

/// Marks the runner as failed if the worker exits without recording an
/// outcome, so that a panic can't leave it busy forever.
struct FailIfStillRunning(Arc<RunnerInner>);

impl Drop for FailIfStillRunning {
    fn drop(&mut self) {
        let _ = self.0.state.compare_exchange(
            JobState::Running as u8,
            JobState::Failed as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// The foreground's side of a running job.
pub struct JobHandle {
    id: JobId,
    events: mpsc::UnboundedReceiver<JobEvent>,
    cancel: CancellationToken,
    worker: JoinWorker,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// A token which cancels this job before its next page.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the next event. Returns `None` once the worker has exited.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Wait for the worker task to exit.
    pub async fn join(self) -> Result<()> {
        self.worker.join().await
    }
}
