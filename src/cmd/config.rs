//! The `config` subcommand.

use clap::Args;

use crate::{
    config::{Config, ConfigOpts},
    prelude::*,
};

use super::print_text;

/// Options for the `config` subcommand.
#[derive(Args, Debug)]
pub struct ShowConfigOpts {
    #[clap(flatten)]
    pub config: ConfigOpts,
}

/// Print our effective configuration as JSON.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_config(opts: &ShowConfigOpts) -> Result<()> {
    let config = Config::load(&opts.config)?;
    let json = serde_json::to_string_pretty(&config)
        .context("cannot serialize configuration")?;
    print_text(&json)
}
