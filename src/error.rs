//! Common errors across the rcm-curate crate

use std::path::PathBuf;

/// Errors related to decoding CF time coordinates
#[derive(Debug, thiserror::Error)]
pub enum TimeError {
    #[error("Could not parse time units '{0}', expected '<unit> since <reference date>'")]
    BadUnits(String),
    #[error("Unknown time unit '{0}'")]
    UnknownUnit(String),
    #[error("Unknown or unsupported calendar '{0}'")]
    UnknownCalendar(String),
    #[error("Calendar conversion failed: {0}")]
    Calendar(String),
    #[error("Time value {0} is not finite")]
    NonFiniteValue(f64),
    #[error("Time value {0} is too far from the reference time")]
    OutOfRange(f64),
    #[error("The time axis spans {windows} windows of {step} s but has only {samples} samples")]
    TooManyWindows {
        windows: i64,
        step: i64,
        samples: usize,
    },
}

/// Errors from a [`DatasetStore`](crate::store::DatasetStore) implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The file could not be opened or read (missing, corrupt, permission denied).
    /// Always recoverable: the driver skips the file.
    #[error("Could not read {}", .0.display())]
    Unreadable(PathBuf),
    #[error("Could not write {}", .0.display())]
    Unwritable(PathBuf),
    #[error("Variable '{varname}' not found in {}", path.display())]
    MissingVariable { path: PathBuf, varname: String },
    #[error("Variable '{varname}' in {} has a type that cannot be handled: {reason}", path.display())]
    UnsupportedType {
        path: PathBuf,
        varname: String,
        reason: String,
    },
    #[error("{0}")]
    Context(String),
}

impl StoreError {
    pub fn unreadable<P: Into<PathBuf>>(path: P) -> Self {
        Self::Unreadable(path.into())
    }

    pub fn unwritable<P: Into<PathBuf>>(path: P) -> Self {
        Self::Unwritable(path.into())
    }

    pub fn missing_variable<P: Into<PathBuf>, S: ToString>(path: P, varname: S) -> Self {
        Self::MissingVariable {
            path: path.into(),
            varname: varname.to_string(),
        }
    }

    pub fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}
