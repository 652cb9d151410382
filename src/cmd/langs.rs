//! The `langs` subcommand.

use clap::Args;

use crate::{
    config::{Config, ConfigOpts},
    ocr::TesseractRecognizer,
    prelude::*,
};

use super::print_text;

/// Options for the `langs` subcommand.
#[derive(Args, Debug)]
pub struct LangsOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// List the recognition languages Tesseract has installed.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_langs(opts: &LangsOpts) -> Result<()> {
    let config = Config::load(&opts.config)?;
    let languages = TesseractRecognizer::new(config.tesseract)
        .list_languages()
        .await?;
    if languages.is_empty() {
        warn!("Tesseract reported no installed languages");
    }
    print_text(&languages.join("\n"))
}
