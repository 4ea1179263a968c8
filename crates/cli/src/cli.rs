use std::path::PathBuf;

use arbor_preferences::INSTANCE_SCOPE;
use clap::{Parser, Subcommand};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "arbor.toml";

#[derive(Parser, Debug)]
#[command(name = "arbor")]
#[command(about = "Inspect and edit hierarchical preference stores")]
#[command(version)]
/// Command-line arguments.
pub struct Cli {
	/// Service configuration (defaults to ./arbor.toml when present)
	#[arg(long, short = 'c', value_name = "FILE", global = true)]
	pub config: Option<PathBuf>,

	/// Debug logging
	#[arg(long, short = 'v', global = true)]
	pub verbose: bool,

	#[command(subcommand)]
	pub command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
	/// Look a value up through the scope lookup order
	Get {
		qualifier: String,
		/// Key, optionally prefixed by a relative node path (`sub/key`)
		key: String,
		/// Search only these scopes, in order
		#[arg(long = "scope", short = 's', value_name = "SCOPE")]
		scopes: Vec<String>,
	},
	/// Store a value and flush it
	Set {
		#[arg(long, short = 's', default_value = INSTANCE_SCOPE)]
		scope: String,
		qualifier: String,
		key: String,
		value: String,
	},
	/// Remove a value and flush the change
	Remove {
		#[arg(long, short = 's', default_value = INSTANCE_SCOPE)]
		scope: String,
		qualifier: String,
		key: String,
	},
	/// Print every node and value below a path
	Tree {
		#[arg(default_value = "/")]
		path: String,
	},
	/// Print the lookup order used for a qualifier
	Order { qualifier: String, key: Option<String> },
	/// Write an export stream for a subtree
	Export {
		#[arg(default_value = "/")]
		path: String,
		/// Path prefix, relative to PATH, to leave out
		#[arg(long = "exclude", short = 'x', value_name = "PREFIX")]
		excludes: Vec<String>,
		/// Output file (stdout when omitted)
		#[arg(long, short = 'o', value_name = "FILE")]
		output: Option<PathBuf>,
	},
	/// Apply an export stream to the stores
	Import { file: PathBuf },
	/// Check the bundle versions recorded in an export stream
	Validate { file: PathBuf },
}
