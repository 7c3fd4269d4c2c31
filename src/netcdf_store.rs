//! [`DatasetStore`] backed by netCDF files on the local filesystem.
use std::path::Path;

use error_stack::ResultExt;
use indexmap::IndexMap;
use netcdf::{AttributeValue, Extents};

use crate::dataset::{AttrValue, Dataset, DatasetHeader, FillEncoding, Variable, VariableInfo};
use crate::error::StoreError;
use crate::nc_utils::NcArray;
use crate::store::{create_parent_dir, partial_path, DatasetStore};
use crate::time::TimeAxis;

/// Reads any netCDF file the library can open and writes classic-model
/// netCDF-4 (`NETCDF4_CLASSIC`).
#[derive(Debug, Default, Clone, Copy)]
pub struct NetcdfStore;

impl NetcdfStore {
    fn open(path: &Path) -> error_stack::Result<netcdf::File, StoreError> {
        netcdf::open(path).change_context_lazy(|| StoreError::unreadable(path))
    }
}

impl DatasetStore for NetcdfStore {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_header(&self, path: &Path) -> error_stack::Result<DatasetHeader, StoreError> {
        let file = Self::open(path)?;
        let mut header = DatasetHeader {
            dims: read_dims(&file),
            attrs: read_attrs(file.attributes()),
            ..Default::default()
        };
        for var in file.variables() {
            let (attrs, _) = split_fill(read_attrs(var.attributes()));
            let info = VariableInfo {
                dims: var.dimensions().iter().map(|d| d.name()).collect(),
                attrs,
            };
            header.variables.insert(var.name(), info);
        }
        Ok(header)
    }

    fn read_dataset(&self, path: &Path) -> error_stack::Result<Dataset, StoreError> {
        let file = Self::open(path)?;
        let mut ds = Dataset {
            dims: read_dims(&file),
            attrs: read_attrs(file.attributes()),
            ..Default::default()
        };

        for var in file.variables() {
            let name = var.name();
            let data = NcArray::get_from(&var)
                .change_context_lazy(|| StoreError::unreadable(path))
                .attach_printable_lazy(|| format!("while reading variable '{name}'"))?;
            let Some(data) = data else {
                log::warn!(
                    "Variable '{name}' in {} has an unsupported type ({:?}), it will not be copied",
                    path.display(),
                    var.vartype()
                );
                continue;
            };
            let (attrs, fill_value) = split_fill(read_attrs(var.attributes()));
            let variable = Variable {
                dims: var.dimensions().iter().map(|d| d.name()).collect(),
                attrs,
                fill_value,
                data,
            };
            ds.variables.insert(name, variable);
        }

        Ok(ds)
    }

    fn read_time_axis(&self, path: &Path) -> error_stack::Result<TimeAxis, StoreError> {
        let header = self.read_header(path)?;
        let time_name = header.time_dim_name().ok_or_else(|| {
            StoreError::context(format!("No time coordinate in {}", path.display()))
        })?;
        let info = header
            .variables
            .get(&time_name)
            .ok_or_else(|| StoreError::missing_variable(path, &time_name))?;
        let units = info.attr_str("units").ok_or_else(|| {
            StoreError::context(format!(
                "Time coordinate '{time_name}' in {} has no units",
                path.display()
            ))
        })?;

        let file = Self::open(path)?;
        let values = file
            .variable(&time_name)
            .ok_or_else(|| StoreError::missing_variable(path, &time_name))?
            .get::<f64, _>(Extents::All)
            .change_context_lazy(|| StoreError::unreadable(path))?;

        TimeAxis::new(values.iter().copied().collect(), units, info.attr_str("calendar"))
            .change_context_lazy(|| {
                StoreError::context(format!("Error decoding time coordinate of {}", path.display()))
            })
    }

    fn write_dataset(
        &self,
        path: &Path,
        ds: &Dataset,
        encoding: &FillEncoding,
    ) -> error_stack::Result<(), StoreError> {
        let part = partial_path(path);
        if let Err(e) = write_classic(&part, ds, encoding) {
            if part.exists() {
                let _ = std::fs::remove_file(&part);
            }
            return Err(e);
        }

        std::fs::rename(&part, path).change_context_lazy(|| StoreError::unwritable(path))?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> error_stack::Result<(), StoreError> {
        if path.exists() {
            std::fs::remove_file(path).change_context_lazy(|| {
                StoreError::context(format!("Error removing {}", path.display()))
            })?;
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> error_stack::Result<(), StoreError> {
        std::fs::rename(from, to).change_context_lazy(|| StoreError::unwritable(to))
    }

    fn ensure_parent_dir(&self, path: &Path) -> error_stack::Result<(), StoreError> {
        create_parent_dir(path)
    }
}

fn write_classic(
    path: &Path,
    ds: &Dataset,
    encoding: &FillEncoding,
) -> error_stack::Result<(), StoreError> {
    log::debug!(
        "Writing {} with a _FillValue on: {}",
        path.display(),
        itertools::join(encoding.filled_variables(), ", ")
    );
    let options = netcdf::Options::NETCDF4 | netcdf::Options::CLASSIC;
    let mut file =
        netcdf::create_with(path, options).change_context_lazy(|| StoreError::unwritable(path))?;

    for (name, &len) in ds.dims.iter() {
        file.add_dimension(name, len)
            .change_context_lazy(|| StoreError::unwritable(path))
            .attach_printable_lazy(|| format!("while creating dimension '{name}'"))?;
    }

    for (name, attr) in ds.attrs.iter() {
        file.add_attribute(name, to_nc_attr(attr))
            .change_context_lazy(|| StoreError::unwritable(path))
            .attach_printable_lazy(|| format!("while writing global attribute '{name}'"))?;
    }

    for (name, var) in ds.variables.iter() {
        let dims: Vec<&str> = var.dims.iter().map(|d| d.as_str()).collect();
        let mut nc_var = var
            .data
            .put_to(&mut file, name, &dims, encoding.fill_for(name))
            .change_context_lazy(|| StoreError::unwritable(path))
            .attach_printable_lazy(|| format!("while writing variable '{name}'"))?;
        for (attr_name, attr) in var.attrs.iter() {
            nc_var
                .put_attribute(attr_name, to_nc_attr(attr))
                .change_context_lazy(|| StoreError::unwritable(path))
                .attach_printable_lazy(|| {
                    format!("while writing attribute '{attr_name}' of variable '{name}'")
                })?;
        }
    }

    Ok(())
}

fn read_dims(file: &netcdf::File) -> IndexMap<String, usize> {
    file.dimensions().map(|d| (d.name(), d.len())).collect()
}

fn read_attrs<'a, I: Iterator<Item = netcdf::Attribute<'a>>>(attrs: I) -> IndexMap<String, AttrValue> {
    let mut out = IndexMap::new();
    for attr in attrs {
        let name = attr.name().to_string();
        match attr.value() {
            Ok(value) => {
                if let Some(v) = from_nc_attr(value) {
                    out.insert(name, v);
                } else {
                    log::debug!("Skipping attribute '{name}' with an unsupported type");
                }
            }
            Err(e) => log::warn!("Could not read attribute '{name}': {e}"),
        }
    }
    out
}

/// Separate `_FillValue` from the other attributes.
fn split_fill(mut attrs: IndexMap<String, AttrValue>) -> (IndexMap<String, AttrValue>, Option<f64>) {
    let fill = attrs.shift_remove("_FillValue").and_then(|a| a.as_f64());
    (attrs, fill)
}

fn from_nc_attr(value: AttributeValue) -> Option<AttrValue> {
    let v = match value {
        AttributeValue::Str(s) => AttrValue::Str(s),
        AttributeValue::Strs(s) => AttrValue::Strs(s),
        AttributeValue::Schar(x) => AttrValue::Byte(vec![x]),
        AttributeValue::Schars(x) => AttrValue::Byte(x),
        AttributeValue::Uchar(x) => AttrValue::UByte(vec![x]),
        AttributeValue::Uchars(x) => AttrValue::UByte(x),
        AttributeValue::Short(x) => AttrValue::Short(vec![x]),
        AttributeValue::Shorts(x) => AttrValue::Short(x),
        AttributeValue::Ushort(x) => AttrValue::Int(vec![x as i32]),
        AttributeValue::Ushorts(x) => AttrValue::Int(x.into_iter().map(|v| v as i32).collect()),
        AttributeValue::Int(x) => AttrValue::Int(vec![x]),
        AttributeValue::Ints(x) => AttrValue::Int(x),
        AttributeValue::Uint(x) => AttrValue::Int64(vec![x as i64]),
        AttributeValue::Uints(x) => AttrValue::Int64(x.into_iter().map(|v| v as i64).collect()),
        AttributeValue::Longlong(x) => AttrValue::Int64(vec![x]),
        AttributeValue::Longlongs(x) => AttrValue::Int64(x),
        AttributeValue::Float(x) => AttrValue::Float(vec![x]),
        AttributeValue::Floats(x) => AttrValue::Float(x),
        AttributeValue::Double(x) => AttrValue::Double(vec![x]),
        AttributeValue::Doubles(x) => AttrValue::Double(x),
        _ => return None,
    };
    Some(v)
}

fn to_nc_attr(value: &AttrValue) -> AttributeValue {
    fn one_or_many<T: Copy>(v: &[T], one: fn(T) -> AttributeValue, many: fn(Vec<T>) -> AttributeValue) -> AttributeValue {
        if v.len() == 1 {
            one(v[0])
        } else {
            many(v.to_vec())
        }
    }

    // The classic model has no string arrays, unsigned or 64-bit integers.
    match value {
        AttrValue::Str(s) => AttributeValue::Str(s.clone()),
        AttrValue::Strs(s) if s.len() == 1 => AttributeValue::Str(s[0].clone()),
        AttrValue::Strs(s) => AttributeValue::Str(s.join(", ")),
        AttrValue::Byte(v) => one_or_many(v, AttributeValue::Schar, AttributeValue::Schars),
        AttrValue::UByte(v) => {
            let v: Vec<i16> = v.iter().map(|&x| x as i16).collect();
            one_or_many(&v, AttributeValue::Short, AttributeValue::Shorts)
        }
        AttrValue::Short(v) => one_or_many(v, AttributeValue::Short, AttributeValue::Shorts),
        AttrValue::Int(v) => one_or_many(v, AttributeValue::Int, AttributeValue::Ints),
        AttrValue::Int64(v) => {
            let as_int: Option<Vec<i32>> = v.iter().map(|&x| i32::try_from(x).ok()).collect();
            match as_int {
                Some(ints) => one_or_many(&ints, AttributeValue::Int, AttributeValue::Ints),
                None => {
                    let doubles: Vec<f64> = v.iter().map(|&x| x as f64).collect();
                    one_or_many(&doubles, AttributeValue::Double, AttributeValue::Doubles)
                }
            }
        }
        AttrValue::Float(v) => one_or_many(v, AttributeValue::Float, AttributeValue::Floats),
        AttrValue::Double(v) => one_or_many(v, AttributeValue::Double, AttributeValue::Doubles),
    }
}
