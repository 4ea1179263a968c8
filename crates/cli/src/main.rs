//! `arbor`: command-line access to preference stores.

mod cli;
mod commands;

use std::io;
use std::path::Path;
use std::process::ExitCode;

use anyhow::Context;
use arbor_preferences::{PreferencesConfig, PreferencesService};
use clap::Parser;
use cli::{Cli, DEFAULT_CONFIG_FILE};
use commands::Outcome;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<ExitCode> {
	let cli = Cli::parse();
	init_tracing(cli.verbose);

	let config = load_config(cli.config.as_deref())?;
	let service = PreferencesService::new(&config).context("invalid lookup order in configuration")?;

	let outcome = commands::run(cli.command, &service, &mut io::stdout().lock())?;
	service.shutdown().context("failed to save preferences")?;

	Ok(match outcome {
		Outcome::Done => ExitCode::SUCCESS,
		Outcome::Failed => ExitCode::FAILURE,
	})
}

fn init_tracing(verbose: bool) {
	let builder = tracing_subscriber::fmt().with_writer(io::stderr).with_target(false);
	if verbose {
		builder.with_max_level(tracing::Level::DEBUG).init();
	} else {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
		builder.with_env_filter(filter).init();
	}
}

/// Reads the explicit config file, else `arbor.toml` when the working
/// directory has one, else the built-in defaults.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<PreferencesConfig> {
	let path = match explicit {
		Some(path) => path,
		None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Path::new(DEFAULT_CONFIG_FILE),
		None => {
			tracing::debug!("no configuration file, stores are memory-only");
			return Ok(PreferencesConfig::default());
		}
	};
	tracing::debug!(config = %path.display(), "loading configuration");
	PreferencesConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
}
