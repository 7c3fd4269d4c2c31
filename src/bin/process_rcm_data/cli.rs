//! Command line interface definitions
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Subset, aggregate and rename regional climate model output into a
/// curated archive.
#[derive(Debug, Parser)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub(crate) command: Commands,

    #[command(flatten)]
    pub(crate) verbosity: Verbosity<InfoLevel>,

    /// Also write the log to this file, always at debug level or more verbose.
    #[clap(long, global = true)]
    pub(crate) log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Commands {
    /// Process every variable in a configuration file
    Run(RunCli),
    /// Create an example configuration file
    Template(TemplateCli),
    /// Print out the parsed representation of a configuration file.
    CheckConfig(CheckConfigCli),
}

#[derive(Debug, Clone, Args)]
pub(crate) struct RunCli {
    /// Path to the TOML configuration file.
    pub(crate) config_file: PathBuf,

    /// Replace outputs that already exist, regardless of the configuration.
    #[clap(long)]
    pub(crate) overwrite: bool,

    /// Log what would be done without reading or writing any data.
    #[clap(short = 'n', long)]
    pub(crate) dry_run: bool,
}

/// Create an example configuration file
#[derive(Debug, Clone, Args)]
pub(crate) struct TemplateCli {
    /// Path to write the template to
    pub(crate) template_file: PathBuf,
}

/// Print out the parsed representation of a configuration file, including
/// defaults and environment overrides. This can help confirm you've created
/// the right configuration.
#[derive(Debug, Clone, Args)]
pub(crate) struct CheckConfigCli {
    /// Path to the TOML configuration file.
    pub(crate) config_file: PathBuf,
}
