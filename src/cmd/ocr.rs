//! The `ocr` subcommand.

use clap::Args;

use crate::{
    config::{Config, ConfigOpts},
    desk::Desk,
    job::{JobOutcome, JobRunner},
    page_iter::FileKind,
    prelude::*,
    ui::Ui,
};

use super::print_text;

/// Options for the `ocr` subcommand.
#[derive(Args, Debug)]
pub struct OcrOpts {
    /// The image (PNG, JPEG, TIFF or BMP) or PDF to read.
    pub input_path: PathBuf,

    /// Save the text here instead of printing it. A `.txt` extension is
    /// added if the path has none.
    #[clap(short = 'o', long = "output")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// The `ocr` subcommand.
#[instrument(level = "debug", skip_all, fields(input = %opts.input_path.display()))]
pub async fn cmd_ocr(ui: Ui, opts: &OcrOpts) -> Result<()> {
    let config = Config::load(&opts.config)?;
    let runner = JobRunner::from_config(&config);
    let mut desk = Desk::new(ui, runner.clone());
    desk.set_language(config.language.clone());
    match FileKind::from_path(&opts.input_path) {
        FileKind::Image => desk.select_image(&opts.input_path),
        FileKind::Document => desk.select_document(&opts.input_path),
    }
    debug!(
        source = ?desk.source(),
        language = desk.language(),
        status = desk.status(),
        "Ready to process"
    );

    let handle = desk.process()?;

    // Stop after the current page on Ctrl-C.
    let cancel = handle.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; stopping after the current page");
            cancel.cancel();
        }
    });
    let outcome = desk.run_to_completion(handle).await;
    ctrl_c.abort();
    debug!(
        state = ?runner.state(),
        progress = ?desk.progress(),
        status = desk.status(),
        alert = ?desk.last_alert(),
        "Job over"
    );

    match outcome {
        JobOutcome::Succeeded { .. } => match &opts.output_path {
            Some(output_path) => {
                let written = desk.save_text(output_path)?;
                info!(path = %written.display(), "Saved text");
                Ok(())
            }
            None => print_text(desk.text()),
        },
        JobOutcome::Failed { .. } => Err(anyhow!(
            "could not extract text from {:?}",
            opts.input_path.display()
        )),
        JobOutcome::Cancelled { .. } => Err(anyhow!("cancelled")),
    }
}
