//! In-memory stand-ins for the netCDF store and CDO, plus dataset builders.
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ndarray::{Array1, ArrayD, Axis, IxDyn};

use crate::dataset::{Dataset, DatasetHeader, FillEncoding, Variable};
use crate::error::StoreError;
use crate::nc_utils::NcArray;
use crate::store::DatasetStore;
use crate::subset::{SpatialSubset, SubsetError};
use crate::time::TimeAxis;

/// A [`DatasetStore`] keeping datasets in a map and counting reads and
/// writes. It doubles as a [`SpatialSubset`] that copies datasets unchanged.
#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    files: RefCell<HashMap<PathBuf, Dataset>>,
    reads: Cell<usize>,
    writes: Cell<usize>,
}

impl MemoryStore {
    pub(crate) fn insert(&self, path: &Path, ds: Dataset) {
        self.files.borrow_mut().insert(path.to_path_buf(), ds);
    }

    pub(crate) fn get(&self, path: &Path) -> Option<Dataset> {
        self.files.borrow().get(path).cloned()
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.get()
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.get()
    }

    pub(crate) fn reset_counts(&self) {
        self.reads.set(0);
        self.writes.set(0);
    }

    pub(crate) fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.files.borrow().keys().cloned().collect();
        paths.sort();
        paths
    }

    fn read(&self, path: &Path) -> error_stack::Result<Dataset, StoreError> {
        self.reads.set(self.reads.get() + 1);
        self.get(path)
            .ok_or_else(|| StoreError::unreadable(path).into())
    }
}

impl DatasetStore for MemoryStore {
    fn exists(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn read_header(&self, path: &Path) -> error_stack::Result<DatasetHeader, StoreError> {
        Ok(self.read(path)?.header())
    }

    fn read_dataset(&self, path: &Path) -> error_stack::Result<Dataset, StoreError> {
        self.read(path)
    }

    fn write_dataset(
        &self,
        path: &Path,
        ds: &Dataset,
        encoding: &FillEncoding,
    ) -> error_stack::Result<(), StoreError> {
        self.writes.set(self.writes.get() + 1);
        let mut ds = ds.clone();
        for (name, var) in ds.variables.iter_mut() {
            var.fill_value = encoding.fill_for(name);
        }
        self.insert(path, ds);
        Ok(())
    }

    fn remove(&self, path: &Path) -> error_stack::Result<(), StoreError> {
        self.files.borrow_mut().remove(path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> error_stack::Result<(), StoreError> {
        let ds = self
            .files
            .borrow_mut()
            .remove(from)
            .ok_or_else(|| StoreError::unreadable(from))?;
        self.insert(to, ds);
        Ok(())
    }

    fn ensure_parent_dir(&self, _path: &Path) -> error_stack::Result<(), StoreError> {
        Ok(())
    }

    fn read_time_axis(&self, path: &Path) -> error_stack::Result<TimeAxis, StoreError> {
        let ds = self.read(path)?;
        ds.time_axis()
            .map_err(|_| StoreError::context("bad time axis").into())
    }
}

impl SpatialSubset for MemoryStore {
    fn subset(&self, input: &Path, output: &Path) -> error_stack::Result<(), SubsetError> {
        self.reads.set(self.reads.get() + 1);
        let ds = self
            .get(input)
            .ok_or_else(|| SubsetError::Copy(input.to_path_buf(), output.to_path_buf()))?;
        self.writes.set(self.writes.get() + 1);
        self.insert(output, ds);
        Ok(())
    }
}

/// A CORDEX-like dataset on a 2x2 rotated grid with `n` steps of
/// `step_hours` starting 2000-01-01 00:00. Every grid cell of `varname`
/// holds the step index.
pub(crate) fn make_dataset(varname: &str, cell_methods: &str, n: usize, step_hours: usize) -> Dataset {
    let mut ds = Dataset::default();
    ds.dims.insert("time".into(), n);
    ds.dims.insert("rlat".into(), 2);
    ds.dims.insert("rlon".into(), 2);

    ds.variables.insert(
        "rotated_pole".into(),
        Variable::new(&[], NcArray::Char(ArrayD::from_elem(IxDyn(&[]), b' ')))
            .with_attr("grid_mapping_name", "rotated_latitude_longitude"),
    );
    let times: Array1<f64> = (0..n).map(|i| (i * step_hours) as f64).collect();
    ds.variables.insert(
        "time".into(),
        Variable::new(&["time"], NcArray::F64(times.into_dyn()))
            .with_attr("units", "hours since 2000-01-01 00:00:00")
            .with_attr("calendar", "standard")
            .with_attr("standard_name", "time")
            .with_attr("axis", "T"),
    );
    ds.variables.insert(
        "lat".into(),
        Variable::new(
            &["rlat", "rlon"],
            NcArray::F64(ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![45.0, 45.0, 46.0, 46.0]).unwrap()),
        )
        .with_attr("standard_name", "latitude"),
    );

    let mut data = ArrayD::<f32>::zeros(IxDyn(&[n, 2, 2]));
    for (i, mut slab) in data.axis_iter_mut(Axis(0)).enumerate() {
        slab.fill(i as f32);
    }
    ds.variables.insert(
        varname.into(),
        Variable::new(&["time", "rlat", "rlon"], NcArray::F32(data))
            .with_attr("grid_mapping", "rotated_pole")
            .with_attr("coordinates", "lat")
            .with_attr("cell_methods", cell_methods)
            .with_fill_value(1.0e20f32 as f64),
    );
    ds
}

pub(crate) fn hourly_dataset(varname: &str, cell_methods: &str, n_hours: usize) -> Dataset {
    let mut ds = make_dataset(varname, cell_methods, n_hours, 1);
    ds.set_attr("frequency", "1hr");
    ds
}

/// Raw values of `varname` at the first grid cell, one per time step.
pub(crate) fn primary_values(ds: &Dataset, varname: &str) -> Vec<f64> {
    let values = ds.variables[varname]
        .data
        .to_masked_f64(&[])
        .expect("test variable is numeric");
    values
        .axis_iter(Axis(0))
        .map(|slab| slab.iter().next().copied().unwrap_or(f64::NAN))
        .collect()
}

pub(crate) fn time_values(ds: &Dataset) -> Vec<f64> {
    ds.variables["time"]
        .data
        .to_masked_f64(&[])
        .expect("time is numeric")
        .iter()
        .copied()
        .collect()
}
