//! Errors which end a job, or which stop the user from starting one.

use std::{error::Error as StdError, fmt::Write as _};

use crate::prelude::*;

/// Everything that can go wrong while extracting or saving text.
///
/// None of these are retried. Each one ends the current job, and the user is
/// shown [`JobError::user_message`].
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A plain image could not be opened or decoded.
    #[error("cannot decode image {path:?}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// A document could not be turned into page images.
    #[error("cannot rasterize document {path:?}")]
    Rasterization {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The recognition engine failed on a page.
    #[error("text recognition failed on page {ordinal}")]
    Recognition {
        ordinal: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Extracted text could not be written out.
    #[error("cannot write text to {path:?}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The user asked for something that can't be done right now.
    #[error("{0}")]
    Precondition(String),
}

impl JobError {
    pub fn no_file_selected() -> Self {
        Self::Precondition("Please select a file first".to_owned())
    }

    pub fn no_text_to_save() -> Self {
        Self::Precondition("No text to save".to_owned())
    }

    pub fn already_running() -> Self {
        Self::Precondition("A job is already running".to_owned())
    }

    /// Is this a precondition failure, rather than a failure doing real work?
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_))
    }

    /// A one-line message including every cause, suitable for an alert.
    pub fn user_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            let _ = write!(message, ": {}", cause);
            source = cause.source();
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_includes_causes() {
        let err = JobError::Recognition {
            ordinal: 2,
            source: anyhow!("Failed loading language 'xyz'").context("tesseract failed"),
        };
        assert_eq!(
            err.user_message(),
            "text recognition failed on page 2: tesseract failed: Failed loading language 'xyz'"
        );
    }

    #[test]
    fn preconditions_are_flagged() {
        assert!(JobError::no_file_selected().is_precondition());
        assert!(JobError::already_running().is_precondition());
        let err = JobError::FileWrite {
            path: "out.txt".into(),
            source: anyhow!("disk full"),
        };
        assert!(!err.is_precondition());
    }
}
