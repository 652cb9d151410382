//! Recognizer wrapping the `tesseract` CLI tool.

use std::io;

use image::{GrayImage, ImageFormat};
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    config::{EngineConfig, TESSERACT_VAR},
    prelude::*,
};

use super::Recognizer;

/// Header line printed by `tesseract --list-langs`.
const LIST_LANGS_HEADER: &str = "List of available languages";

/// Recognizer which runs the `tesseract` executable once per page.
pub struct TesseractRecognizer {
    /// The `tesseract` executable.
    binary: PathBuf,
}

impl TesseractRecognizer {
    /// Create a recognizer using the specified `tesseract` executable.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// List the languages the installed engine can recognize.
    #[instrument(level = "debug", skip_all)]
    pub async fn list_languages(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.binary)
            .arg("--list-langs")
            .output()
            .await
            .map_err(|err| self.spawn_error(err))?;
        check_for_command_failure("tesseract", &output, None)?;

        // Depending on the version, the list goes to stdout or stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(parse_language_list(&format!("{}\n{}", stdout, stderr)))
    }

    /// Explain why we couldn't start `tesseract`.
    fn spawn_error(&self, err: io::Error) -> anyhow::Error {
        if err.kind() == io::ErrorKind::NotFound {
            anyhow!(
                "cannot find {:?}; install Tesseract, or set --tesseract or {}",
                self.binary.display(),
                TESSERACT_VAR
            )
        } else {
            anyhow::Error::new(err)
                .context(format!("failed to run {:?}", self.binary.display()))
        }
    }
}

#[async_trait]
impl Recognizer for TesseractRecognizer {
    #[instrument(level = "debug", skip_all, fields(language = %language))]
    async fn recognize(
        &self,
        page: &GrayImage,
        language: &str,
        engine: &EngineConfig,
    ) -> Result<String> {
        // Write our page to a temporary PNG file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")
            .context("cannot create tesseract scratch directory")?;
        let input_path = tmpdir.path().join("page.png");
        let page = page.clone();
        let write_path = input_path.clone();
        spawn_blocking_propagating_panics(move || {
            page.save_with_format(&write_path, ImageFormat::Png)
        })
        .await
        .context("cannot write tesseract input file")?;

        // Run tesseract, sending the text to stdout.
        let output = Command::new(&self.binary)
            .arg(&input_path)
            .arg("stdout")
            .arg("-l")
            .arg(language)
            .arg("--oem")
            .arg(engine.engine_mode.oem().to_string())
            .arg("--psm")
            .arg(engine.segmentation_mode.psm().to_string())
            .output()
            .await
            .map_err(|err| self.spawn_error(err))?;
        check_for_command_failure("tesseract", &output, None)?;

        let text = String::from_utf8(output.stdout)
            .context("tesseract output was not valid UTF-8")?;
        Ok(strip_page_separator(text))
    }
}

/// Tesseract ends each page with a form feed. Drop it.
fn strip_page_separator(mut text: String) -> String {
    if text.ends_with('\x0c') {
        text.pop();
    }
    text
}

/// Parse the output of `tesseract --list-langs`.
fn parse_language_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(LIST_LANGS_HEADER))
        .filter(|line| !line.contains(char::is_whitespace))
        .map(str::to_owned)
        .collect()
}
