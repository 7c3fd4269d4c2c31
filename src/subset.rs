//! Spatial subsetting of input files, by calling out to CDO.
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::process::Command;

use error_stack::ResultExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SubsetError {
    #[error("Could not run '{0}'")]
    Spawn(String),
    #[error("'{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("'{0}' succeeded but did not create {1}")]
    OutputMissing(String, PathBuf),
    #[error("Could not copy {} to {}", .0.display(), .1.display())]
    Copy(PathBuf, PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum BboxError {
    #[error("Bounding box values must be finite")]
    NotFinite,
    #[error("Latitudes must be within [-90, 90], got {0} to {1}")]
    LatitudeRange(f64, f64),
    #[error("Minimum {0} ({1}) must be less than maximum ({2})")]
    Inverted(&'static str, f64, f64),
}

/// A longitude/latitude box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl BoundingBox {
    pub fn validate(&self) -> Result<(), BboxError> {
        let values = [self.lon_min, self.lon_max, self.lat_min, self.lat_max];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(BboxError::NotFinite);
        }
        if self.lat_min < -90.0 || self.lat_max > 90.0 {
            return Err(BboxError::LatitudeRange(self.lat_min, self.lat_max));
        }
        if self.lon_min >= self.lon_max {
            return Err(BboxError::Inverted("longitude", self.lon_min, self.lon_max));
        }
        if self.lat_min >= self.lat_max {
            return Err(BboxError::Inverted("latitude", self.lat_min, self.lat_max));
        }
        Ok(())
    }

    /// The CDO operator string, `sellonlatbox,lon1,lon2,lat1,lat2`.
    pub fn cdo_operator(&self) -> String {
        format!(
            "sellonlatbox,{},{},{},{}",
            self.lon_min, self.lon_max, self.lat_min, self.lat_max
        )
    }
}

impl Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "lon {} to {}, lat {} to {}",
            self.lon_min, self.lon_max, self.lat_min, self.lat_max
        )
    }
}

/// Something that writes the part of `input` the run cares about to `output`.
pub trait SpatialSubset {
    fn subset(&self, input: &Path, output: &Path) -> error_stack::Result<(), SubsetError>;
}

/// Runs `cdo sellonlatbox` as a child process. There is no timeout; a hung
/// command blocks the run.
#[derive(Debug, Clone)]
pub struct CdoSubsetter {
    program: PathBuf,
    bbox: BoundingBox,
}

impl CdoSubsetter {
    pub fn new<P: Into<PathBuf>>(program: P, bbox: BoundingBox) -> Self {
        Self {
            program: program.into(),
            bbox,
        }
    }

    fn command_line(&self, input: &Path, output: &Path) -> String {
        format!(
            "{} {} {} {}",
            self.program.display(),
            self.bbox.cdo_operator(),
            input.display(),
            output.display()
        )
    }
}

impl SpatialSubset for CdoSubsetter {
    fn subset(&self, input: &Path, output: &Path) -> error_stack::Result<(), SubsetError> {
        let cmd = self.command_line(input, output);
        log::debug!("Running {cmd}");
        let result = Command::new(&self.program)
            .arg(self.bbox.cdo_operator())
            .arg(input)
            .arg(output)
            .output()
            .change_context_lazy(|| SubsetError::Spawn(cmd.clone()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            return Err(SubsetError::CommandFailed {
                command: cmd,
                status: result.status.to_string(),
                stderr,
            }
            .into());
        }

        if !output.exists() {
            return Err(SubsetError::OutputMissing(cmd, output.to_path_buf()).into());
        }
        Ok(())
    }
}

/// Copies the input unchanged, for runs without a bounding box.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyTransport;

impl SpatialSubset for CopyTransport {
    fn subset(&self, input: &Path, output: &Path) -> error_stack::Result<(), SubsetError> {
        log::debug!("Copying {} to {}", input.display(), output.display());
        std::fs::copy(input, output)
            .change_context_lazy(|| SubsetError::Copy(input.to_path_buf(), output.to_path_buf()))?;
        Ok(())
    }
}
