use std::path::Path;

use error_stack::ResultExt;
use log::LevelFilter;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
    Config,
};

const PATTERN: &str = "{h({d(%Y-%m-%d %H:%M:%S)} [{l}] from line {L} in {M})} - {m}{n}";
const FILE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} [{l}] from line {L} in {M} - {m}{n}";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Could not open log file {0}")]
    LogFile(String),
    #[error("Could not set up logging")]
    Setup,
}

/// Log to stderr at `level`. If `log_file` is given, also log there at
/// `level` or `debug`, whichever is more verbose, so that a full record of
/// the run is kept even when the console is quiet.
pub fn init_logging(
    level: LevelFilter,
    log_file: Option<&Path>,
) -> error_stack::Result<(), LoggingError> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .target(Target::Stderr)
        .build();

    let mut builder = Config::builder().appender(
        Appender::builder()
            .filter(Box::new(ThresholdFilter::new(level)))
            .build("stderr", Box::new(stderr)),
    );
    let mut root = Root::builder().appender("stderr");
    let mut root_level = level;

    if let Some(path) = log_file {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(FILE_PATTERN)))
            .build(path)
            .change_context_lazy(|| LoggingError::LogFile(path.display().to_string()))?;
        builder = builder.appender(Appender::builder().build("logfile", Box::new(file)));
        root = root.appender("logfile");
        root_level = root_level.max(LevelFilter::Debug);
    }

    let config = builder
        .build(root.build(root_level))
        .change_context(LoggingError::Setup)?;
    log4rs::init_config(config).change_context(LoggingError::Setup)?;
    Ok(())
}
