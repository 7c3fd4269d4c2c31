//! Stage the raw archive files for a configuration into a flat
//! `{t_freq}/{variable}` tree, renamed to the curated naming scheme but
//! otherwise untouched.
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use error_stack::ResultExt;
use rcm_curate::{
    config::CurationConfig,
    discovery::{FileFinder, FileRecord},
    logging::init_logging,
    metadata::time_range_from_filename,
    naming::output_filename,
    store::{create_parent_dir, partial_path},
};

fn main() -> ExitCode {
    let clargs = Cli::parse();
    if let Err(e) = init_logging(clargs.verbosity.log_level_filter(), None) {
        eprintln!("ERROR: {e:?}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = main_inner(clargs) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_inner(clargs: Cli) -> error_stack::Result<(), CliError> {
    let mut config = CurationConfig::load(&clargs.config_file).change_context_lazy(|| {
        CliError::context(format!(
            "Error loading configuration file: {}",
            clargs.config_file.display()
        ))
    })?;
    if let Some(out) = clargs.output_root {
        config.output_root = out;
    }

    let staged = stage_files(&config, clargs.dry_run)?;
    log::info!("{staged} file(s) staged under {}", config.output_root.display());
    Ok(())
}

/// Copy every file found at each variable's requested frequency. No
/// fallback frequencies are searched. Returns the number of files copied
/// (or that would be, in a dry run).
fn stage_files(config: &CurationConfig, dry_run: bool) -> error_stack::Result<usize, CliError> {
    let finder = FileFinder::new(
        &config.input_root,
        &config.domain,
        &config.path_patterns,
        &config.file_pattern,
    )
    .change_context_lazy(|| CliError::context("Invalid search pattern in the configuration"))?;

    let mut n_staged = 0;
    for request in config.requests() {
        let records: Vec<FileRecord> = finder
            .find(&request.variable, request.requested)
            .change_context_lazy(|| {
                CliError::context(format!(
                    "Error searching for {} at {}",
                    request.variable, request.requested
                ))
            })?
            .into_iter()
            .filter(|r| config.scenarios.is_empty() || config.scenarios.contains(&r.meta.scenario))
            .collect();

        if records.is_empty() {
            log::warn!("No files found for {} at {}", request.variable, request.requested);
            continue;
        }

        for record in records {
            let dest = staged_path(config, &request.variable, &record);
            if dest.exists() && !config.overwrite {
                log::info!("{} exists, skipping", dest.display());
                continue;
            }
            if dry_run {
                log::info!("Would copy {} to {}", record.path.display(), dest.display());
            } else {
                copy_file(&record.path, &dest)?;
            }
            n_staged += 1;
        }
    }
    Ok(n_staged)
}

/// `{output_root}/{t_freq}/{variable}/{curated name}`. The time range stays
/// in the name when the input name carries one, so chunked inputs do not
/// overwrite each other.
fn staged_path(config: &CurationConfig, variable: &str, record: &FileRecord) -> PathBuf {
    let range = if record.meta.t_freq.is_time_series() {
        time_range_from_filename(&record.path)
    } else {
        None
    };
    let name = output_filename(variable, &config.domain, &record.meta, record.meta.t_freq, range.as_ref());
    config
        .output_root
        .join(record.meta.t_freq.to_string())
        .join(variable)
        .join(name)
}

fn copy_file(src: &Path, dest: &Path) -> error_stack::Result<(), CliError> {
    log::debug!("Copying {} to {}", src.display(), dest.display());
    create_parent_dir(dest).change_context_lazy(|| CliError::context("Could not create output directory"))?;
    let part = partial_path(dest);
    std::fs::copy(src, &part)
        .and_then(|_| std::fs::rename(&part, dest))
        .change_context_lazy(|| {
            CliError::context(format!("Could not copy {} to {}", src.display(), dest.display()))
        })?;
    Ok(())
}

/// Copy the archive files matching a configuration into a staging tree.
#[derive(Debug, Parser)]
struct Cli {
    /// Path to the TOML configuration file.
    config_file: PathBuf,

    /// Stage under this directory instead of the configured output root.
    #[clap(short, long)]
    output_root: Option<PathBuf>,

    /// Only log the copies that would be made.
    #[clap(short = 'n', long)]
    dry_run: bool,

    #[command(flatten)]
    verbosity: Verbosity<InfoLevel>,
}

/// Program error type
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Wrapper type used to add information to an inner error.
    #[error("{0}")]
    Context(String),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
