//! Command-line entry points.

use std::io::{self, Write as _};

use crate::prelude::*;

pub mod config;
pub mod langs;
pub mod ocr;

/// Write `text` to standard output, ending with a newline.
fn print_text(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .context("cannot write to stdout")?;
    if !text.ends_with('\n') {
        stdout.write_all(b"\n").context("cannot write to stdout")?;
    }
    stdout.flush().context("cannot flush stdout")
}
