//! Text recognition interface.

use image::GrayImage;

use crate::{config::EngineConfig, prelude::*};

pub mod tesseract;

pub use self::tesseract::TesseractRecognizer;

/// Something which can read the text on a preprocessed page.
///
/// Implementations must not retry. Any error ends the job.
#[async_trait]
pub trait Recognizer: Send + Sync + 'static {
    /// Recognize the text on `page`. `language` is passed through to the
    /// engine without being interpreted.
    async fn recognize(
        &self,
        page: &GrayImage,
        language: &str,
        engine: &EngineConfig,
    ) -> Result<String>;
}

/// The text recognized on one page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageResult {
    /// 1-based page number.
    pub ordinal: usize,
    /// Raw text returned by the recognizer.
    pub text: String,
}

/// Combine per-page results into the text shown to the user.
///
/// A single-page source comes back verbatim. Otherwise, each page is headed
/// with a `--- Page N ---` marker and pages are separated by a blank line.
pub fn aggregate(results: &[PageResult], is_multi_page: bool) -> String {
    if !is_multi_page && let [only] = results {
        return only.text.clone();
    }
    results
        .iter()
        .map(|result| format!("--- Page {} ---\n{}", result.ordinal, result.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
