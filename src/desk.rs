//! The presentation side of the app: what's selected, what's shown, and how
//! job events change it.
//!
//! All of this state lives on the foreground task. The worker only ever
//! talks to it through [`JobEvent`]s, which are applied one at a time by
//! [`Desk::apply`].

use std::fs;

use indicatif::ProgressBar;

use crate::{
    config::DEFAULT_LANGUAGE,
    error::JobError,
    job::{JobEvent, JobHandle, JobOutcome, JobRequest, JobRunner, Progress},
    page_iter::FileKind,
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Status shown when nothing is happening.
pub const STATUS_READY: &str = "Ready";

/// Extension added to saved files which don't have one.
pub const DEFAULT_TEXT_EXTENSION: &str = "txt";

/// Presentation state for a single window.
pub struct Desk {
    ui: Ui,
    runner: JobRunner,
    /// The file the next job will read.
    source: Option<PathBuf>,
    /// The language the next job will use.
    language: String,
    /// The text from the last successful job.
    text: String,
    /// One-line status.
    status: String,
    /// Progress of the current or last job.
    progress: Progress,
    /// The last alert we showed.
    last_alert: Option<String>,
    /// Drawn while a job is running.
    progress_bar: Option<ProgressBar>,
}

impl Desk {
    /// Create a desk with nothing selected, using the default language.
    pub fn new(ui: Ui, runner: JobRunner) -> Self {
        Self {
            ui,
            runner,
            source: None,
            language: DEFAULT_LANGUAGE.to_owned(),
            text: String::new(),
            status: STATUS_READY.to_owned(),
            progress: Progress::default(),
            last_alert: None,
            progress_bar: None,
        }
    }

    /// Select an image to process.
    pub fn select_image(&mut self, path: impl Into<PathBuf>) {
        self.select(path.into(), FileKind::Image);
    }

    /// Select a PDF to process.
    pub fn select_document(&mut self, path: impl Into<PathBuf>) {
        self.select(path.into(), FileKind::Document);
    }

    fn select(&mut self, path: PathBuf, kind: FileKind) {
        if !kind.has_known_extension(&path) {
            warn!(path = %path.display(), ?kind, "Selected file has an unexpected extension");
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.status = match kind {
            FileKind::Image => format!("Selected: {}", name),
            FileKind::Document => format!("Selected PDF: {}", name),
        };
        self.source = Some(path);
    }

    /// Set the language for the next job.
    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn last_alert(&self) -> Option<&str> {
        self.last_alert.as_deref()
    }

    /// Start processing the selected file.
    ///
    /// The request is a snapshot: changing the selection or language later
    /// won't affect the running job.
    pub fn process(&mut self) -> Result<JobHandle, JobError> {
        let result = match &self.source {
            Some(source) => self.runner.submit(JobRequest {
                source: source.clone(),
                language: self.language.clone(),
            }),
            None => Err(JobError::no_file_selected()),
        };
        if let Err(err) = &result {
            self.alert(err.user_message());
        }
        result
    }

    /// Apply one event from the worker.
    pub fn apply(&mut self, event: &JobEvent) {
        match event {
            JobEvent::Started => {
                self.progress = Progress::default();
                self.status = "Processing...".to_owned();
                self.progress_bar = Some(self.ui.new_progress_bar(
                    &ProgressConfig {
                        emoji: "📄",
                        msg: "Recognizing pages",
                        done_msg: "Recognized pages",
                    },
                    0,
                ));
            }
            JobEvent::Status(status) => self.status = status.clone(),
            JobEvent::Progress(progress) => {
                self.progress = *progress;
                trace!(fraction = progress.fraction(), "Progress");
                if let Some(pb) = &self.progress_bar {
                    pb.set_length(progress.total as u64);
                    pb.set_position(progress.completed as u64);
                }
            }
            JobEvent::Finished(outcome) => self.finish(outcome),
        }
    }

    fn finish(&mut self, outcome: &JobOutcome) {
        let progress_bar = self.progress_bar.take();
        match outcome {
            JobOutcome::Succeeded { text, page_count } => {
                if let Some(pb) = progress_bar {
                    pb.finish_using_style();
                }
                info!(page_count, "Processing complete");
                self.text = text.clone();
                self.status = "Processing complete".to_owned();
            }
            JobOutcome::Failed { message } => {
                if let Some(pb) = progress_bar {
                    pb.abandon();
                }
                self.alert(format!("Failed to process file: {}", message));
                self.status = STATUS_READY.to_owned();
            }
            JobOutcome::Cancelled { completed, total } => {
                if let Some(pb) = progress_bar {
                    pb.abandon();
                }
                self.alert(format!(
                    "Processing cancelled after {} of {} pages",
                    completed, total
                ));
                self.status = STATUS_READY.to_owned();
            }
        }
    }

    /// Apply every event from `handle` until the job is over.
    pub async fn run_to_completion(&mut self, mut handle: JobHandle) -> JobOutcome {
        let mut outcome = None;
        while let Some(event) = handle.next_event().await {
            self.apply(&event);
            if let JobEvent::Finished(finished) = event {
                outcome = Some(finished);
            }
        }

        let id = handle.id();
        if let Err(err) = handle.join().await {
            error!(%id, "Job worker failed: {:?}", err);
        }
        match outcome {
            Some(outcome) => outcome,
            None => {
                let outcome = JobOutcome::Failed {
                    message: "the job ended without a result".to_owned(),
                };
                self.apply(&JobEvent::Finished(outcome.clone()));
                outcome
            }
        }
    }

    /// Save the displayed text to `path`. Returns the path actually written.
    pub fn save_text(&mut self, path: &Path) -> Result<PathBuf, JobError> {
        match write_text(path, &self.text) {
            Ok(written) => {
                self.status = format!("Saved to {}", written.display());
                Ok(written)
            }
            Err(err) => {
                if !err.is_precondition() {
                    error!("Save failed: {:?}", err);
                }
                self.alert(err.user_message());
                Err(err)
            }
        }
    }

    fn alert(&mut self, message: String) {
        self.ui.alert(&message);
        self.last_alert = Some(message);
    }
}

/// Write `text` to `path` exactly as given, adding a `.txt` extension if
/// `path` has none. Blank text is refused without touching the file system.
pub fn write_text(path: &Path, text: &str) -> Result<PathBuf, JobError> {
    if text.trim().is_empty() {
        return Err(JobError::no_text_to_save());
    }
    let path = if path.extension().is_some() {
        path.to_owned()
    } else {
        path.with_extension(DEFAULT_TEXT_EXTENSION)
    };
    fs::write(&path, text).map_err(|err| JobError::FileWrite {
        path: path.clone(),
        source: err.into(),
    })?;
    debug!(path = %path.display(), bytes = text.len(), "Saved text");
    Ok(path)
}
