use std::process::ExitCode;

use clap::Parser;
use error_stack::ResultExt;
use rcm_curate::{
    config::CurationConfig,
    logging::init_logging,
    netcdf_store::NetcdfStore,
    pipeline::Pipeline,
    subset::{CdoSubsetter, CopyTransport, SpatialSubset},
};

mod cli;

fn main() -> ExitCode {
    let clargs = cli::Cli::parse();
    if let Err(e) = init_logging(clargs.verbosity.log_level_filter(), clargs.log_file.as_deref()) {
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

fn main_inner(clargs: cli::Cli) -> error_stack::Result<(), CliError> {
    match clargs.command {
        cli::Commands::Run(run_cli) => run_driver(run_cli),
        cli::Commands::Template(template_cli) => {
            CurationConfig::write_template_example(&template_cli.template_file)
                .change_context_lazy(|| CliError::context("Error writing the template configuration"))
        }
        cli::Commands::CheckConfig(check_cli) => {
            let config = load_config(&check_cli.config_file)?;
            println!("Configuration:\n\n{config:#?}");
            Ok(())
        }
    }
}

/// Main function that runs the whole curation.
fn run_driver(cli: cli::RunCli) -> error_stack::Result<(), CliError> {
    let mut config = load_config(&cli.config_file)?;
    if cli.overwrite {
        config.overwrite = true;
    }

    let store = NetcdfStore;
    let cdo;
    let subsetter: &dyn SpatialSubset = match config.bbox {
        Some(bbox) => {
            log::info!("Subsetting to {bbox} with {}", config.subset_program.display());
            cdo = CdoSubsetter::new(&config.subset_program, bbox);
            &cdo
        }
        None => {
            log::info!("No bounding box configured, inputs will be copied whole");
            &CopyTransport
        }
    };

    let pipeline = Pipeline::new(&config, &store, subsetter)
        .change_context_lazy(|| CliError::context("Error setting up the processing"))?
        .with_dry_run(cli.dry_run);
    let summary = pipeline.run();
    println!("{summary}");

    let n_failed = summary.n_failed();
    if n_failed > 0 {
        return Err(CliError::FilesFailed(n_failed).into());
    }
    Ok(())
}

fn load_config(config_file: &std::path::Path) -> error_stack::Result<CurationConfig, CliError> {
    CurationConfig::load(config_file).change_context_lazy(|| {
        CliError::context(format!(
            "Error loading configuration file: {}",
            config_file.display()
        ))
    })
}

/// Program error type
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Some input files could not be processed; the rest were.
    #[error("{0} file(s) failed, see the summary above")]
    FilesFailed(usize),

    /// Wrapper type used to add information to an inner error.
    #[error("{0}")]
    Context(String),
}

impl CliError {
    fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
