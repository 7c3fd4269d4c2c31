//! The seam between the pipeline and wherever datasets live.
//!
//! The pipeline only talks to a [`DatasetStore`]; the netCDF-backed store is
//! in [`crate::netcdf_store`] (behind the `netcdf` feature) and an in-memory
//! store for tests is in [`crate::test_utils`].
use std::path::{Path, PathBuf};

use error_stack::ResultExt;

use crate::dataset::{Dataset, DatasetHeader, FillEncoding};
use crate::error::StoreError;
use crate::time::TimeAxis;

pub trait DatasetStore {
    /// Whether a dataset exists at `path`. Must not read its contents.
    fn exists(&self, path: &Path) -> bool;

    /// Read dimensions, variable metadata and global attributes only.
    fn read_header(&self, path: &Path) -> error_stack::Result<DatasetHeader, StoreError>;

    /// Read a whole dataset.
    fn read_dataset(&self, path: &Path) -> error_stack::Result<Dataset, StoreError>;

    /// Write `ds` to `path`, replacing any existing file. Fill values follow
    /// `encoding`, not the variables' own `fill_value` fields.
    fn write_dataset(
        &self,
        path: &Path,
        ds: &Dataset,
        encoding: &FillEncoding,
    ) -> error_stack::Result<(), StoreError>;

    /// Remove a dataset. Removing something that does not exist is not an error.
    fn remove(&self, path: &Path) -> error_stack::Result<(), StoreError>;

    /// Move a dataset, replacing anything already at `to`.
    fn rename(&self, from: &Path, to: &Path) -> error_stack::Result<(), StoreError>;

    /// Make sure the directory that will hold `path` exists.
    fn ensure_parent_dir(&self, path: &Path) -> error_stack::Result<(), StoreError>;

    /// Read the time coordinate. The default reads the whole dataset; stores
    /// that can read a single variable should override this.
    fn read_time_axis(&self, path: &Path) -> error_stack::Result<TimeAxis, StoreError> {
        let ds = self.read_dataset(path)?;
        ds.time_axis().change_context_lazy(|| {
            StoreError::context(format!("Error decoding time coordinate of {}", path.display()))
        })
    }
}

/// Create the parent directory of `path` on the local filesystem.
pub fn create_parent_dir(path: &Path) -> error_stack::Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            log::debug!("Creating directory {}", parent.display());
            std::fs::create_dir_all(parent).change_context_lazy(|| {
                StoreError::context(format!("Error creating directory {}", parent.display()))
            })?;
        }
    }
    Ok(())
}

/// Sibling path used while a file is being written, so that a failed write
/// never leaves something at the final path.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// A scratch file owned by the processing of one input file. It is removed
/// when this value is dropped, whether processing succeeded or not.
pub struct ScratchFile<'s> {
    path: PathBuf,
    store: &'s dyn DatasetStore,
}

impl<'s> ScratchFile<'s> {
    pub fn new(path: PathBuf, store: &'s dyn DatasetStore) -> Self {
        Self { path, store }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<'s> Drop for ScratchFile<'s> {
    fn drop(&mut self) {
        if let Err(e) = self.store.remove(&self.path) {
            log::warn!(
                "Could not remove scratch file {}: {e:?}",
                self.path.display()
            );
        }
    }
}
