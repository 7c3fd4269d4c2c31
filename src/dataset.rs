//! In-memory representation of a netCDF dataset: enough to read a CORDEX
//! file, resample it and write it back.
use indexmap::{IndexMap, IndexSet};

use crate::cell_methods::CellMethods;
use crate::error::TimeError;
use crate::nc_utils::NcArray;
use crate::time::TimeAxis;

/// Fill value used for the primary variable when the input had none.
pub const DEFAULT_FILL_VALUE: f64 = 1.0e20;

/// Attribute values. Unsigned netCDF-4 attribute types are widened to the
/// next signed type when read.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Strs(Vec<String>),
    Byte(Vec<i8>),
    UByte(Vec<u8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Int64(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            AttrValue::Strs(v) if v.len() == 1 => Some(&v[0]),
            _ => None,
        }
    }

    /// The first numeric value, if this is a numeric attribute.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Byte(v) => v.first().map(|&x| x as f64),
            AttrValue::UByte(v) => v.first().map(|&x| x as f64),
            AttrValue::Short(v) => v.first().map(|&x| x as f64),
            AttrValue::Int(v) => v.first().map(|&x| x as f64),
            AttrValue::Int64(v) => v.first().map(|&x| x as f64),
            AttrValue::Float(v) => v.first().map(|&x| x as f64),
            AttrValue::Double(v) => v.first().copied(),
            AttrValue::Str(_) | AttrValue::Strs(_) => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Double(vec![value])
    }
}

/// Variable metadata without the data.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableInfo {
    pub dims: Vec<String>,
    pub attrs: IndexMap<String, AttrValue>,
}

impl VariableInfo {
    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(|a| a.as_str())
    }
}

/// Dimensions, variables and attributes of a file, without any data.
/// Reading this is cheap compared to a full [`Dataset`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetHeader {
    pub dims: IndexMap<String, usize>,
    pub variables: IndexMap<String, VariableInfo>,
    pub attrs: IndexMap<String, AttrValue>,
}

impl DatasetHeader {
    /// Names of variables that describe other variables rather than being data:
    /// coordinate variables plus anything named in `bounds`, `coordinates` or
    /// `grid_mapping` attributes.
    pub fn auxiliary_names(&self) -> IndexSet<String> {
        let mut names = IndexSet::new();
        for (name, info) in self.variables.iter() {
            if self.dims.contains_key(name) {
                names.insert(name.clone());
            }
            for key in ["bounds", "coordinates", "grid_mapping"] {
                if let Some(refs) = info.attr_str(key) {
                    names.extend(refs.split_whitespace().map(|s| s.to_string()));
                }
            }
        }
        names
    }

    /// The primary data variable: the first non-auxiliary variable with a
    /// time dimension, else the first non-auxiliary variable at all.
    pub fn primary_variable(&self) -> Option<&str> {
        let aux = self.auxiliary_names();
        let time_dim = self.time_dim_name();
        let mut candidates = self
            .variables
            .iter()
            .filter(|(name, _)| !aux.contains(*name));

        let first = candidates.clone().next().map(|(name, _)| name.as_str());
        let with_time = candidates
            .find(|(_, info)| {
                time_dim
                    .as_deref()
                    .is_some_and(|t| info.dims.iter().any(|d| d == t))
            })
            .map(|(name, _)| name.as_str());
        with_time.or(first)
    }

    /// The name of the time dimension, identified through its coordinate
    /// variable (`axis = "T"`, `standard_name = "time"`, or simply named `time`).
    pub fn time_dim_name(&self) -> Option<String> {
        for (name, info) in self.variables.iter() {
            if info.dims.len() != 1 || &info.dims[0] != name {
                continue;
            }
            let is_time = info.attr_str("axis") == Some("T")
                || info.attr_str("standard_name") == Some("time");
            if is_time {
                return Some(name.clone());
            }
        }

        if self.dims.contains_key("time") {
            Some("time".to_string())
        } else {
            None
        }
    }
}

/// A variable with its data. The `_FillValue` attribute is not kept in
/// `attrs`; it lives in `fill_value` so that writers can decide on encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub attrs: IndexMap<String, AttrValue>,
    pub fill_value: Option<f64>,
    pub data: NcArray,
}

impl Variable {
    pub fn new(dims: &[&str], data: NcArray) -> Self {
        Self {
            dims: dims.iter().map(|d| d.to_string()).collect(),
            attrs: IndexMap::new(),
            fill_value: None,
            data,
        }
    }

    pub fn with_attr<V: Into<AttrValue>>(mut self, name: &str, value: V) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    pub fn with_fill_value(mut self, fill: f64) -> Self {
        self.fill_value = Some(fill);
        self
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).and_then(|a| a.as_str())
    }

    pub fn cell_methods(&self) -> CellMethods {
        CellMethods::parse(self.attr_str("cell_methods").unwrap_or(""))
    }

    /// Values treated as missing: `_FillValue` and `missing_value`.
    pub fn missing_values(&self) -> Vec<f64> {
        let mut missing = vec![];
        if let Some(f) = self.fill_value {
            missing.push(f);
        }
        if let Some(m) = self.attrs.get("missing_value").and_then(|a| a.as_f64()) {
            missing.push(m);
        }
        missing
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn info(&self) -> VariableInfo {
        VariableInfo {
            dims: self.dims.clone(),
            attrs: self.attrs.clone(),
        }
    }
}

/// A whole dataset held in memory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    pub dims: IndexMap<String, usize>,
    pub variables: IndexMap<String, Variable>,
    pub attrs: IndexMap<String, AttrValue>,
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Dataset has no time coordinate")]
    NoTimeCoordinate,
    #[error("Time coordinate '{0}' has no units attribute")]
    NoTimeUnits(String),
    #[error("Time coordinate '{0}' is not numeric")]
    NonNumericTime(String),
    #[error("Invalid time coordinate")]
    Time(#[from] TimeError),
}

impl Dataset {
    pub fn header(&self) -> DatasetHeader {
        DatasetHeader {
            dims: self.dims.clone(),
            variables: self
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.info()))
                .collect(),
            attrs: self.attrs.clone(),
        }
    }

    pub fn time_dim_name(&self) -> Option<String> {
        self.header().time_dim_name()
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Rename a variable in place, keeping its position. Returns `false` if
    /// `old` does not exist.
    pub fn rename_variable(&mut self, old: &str, new: &str) -> bool {
        let Some(idx) = self.variables.get_index_of(old) else {
            return false;
        };
        let var = self
            .variables
            .shift_remove(old)
            .expect("variable index was just found");
        let (new_idx, _) = self.variables.insert_full(new.to_string(), var);
        self.variables.move_index(new_idx, idx);
        true
    }

    pub fn time_axis(&self) -> Result<TimeAxis, DatasetError> {
        let name = self.time_dim_name().ok_or(DatasetError::NoTimeCoordinate)?;
        let var = self
            .variables
            .get(&name)
            .ok_or(DatasetError::NoTimeCoordinate)?;
        let units = var
            .attr_str("units")
            .ok_or_else(|| DatasetError::NoTimeUnits(name.clone()))?;
        let values = var
            .data
            .to_masked_f64(&[])
            .ok_or_else(|| DatasetError::NonNumericTime(name.clone()))?;
        let axis = TimeAxis::new(values.iter().copied().collect(), units, var.attr_str("calendar"))?;
        Ok(axis)
    }

    pub fn set_attr<V: Into<AttrValue>>(&mut self, name: &str, value: V) {
        self.attrs.insert(name.to_string(), value.into());
    }
}

/// Which variables get a `_FillValue` when written.
#[derive(Debug, Clone, PartialEq)]
pub struct FillEncoding {
    entries: IndexMap<String, Option<f64>>,
}

impl FillEncoding {
    /// The primary variable keeps its fill value (or [`DEFAULT_FILL_VALUE`]);
    /// every other data variable and every coordinate gets none.
    pub fn for_primary(ds: &Dataset, varname: &str) -> Self {
        let mut entries: IndexMap<String, Option<f64>> =
            ds.variables.keys().map(|k| (k.clone(), None)).collect();
        let fill = ds
            .variables
            .get(varname)
            .and_then(|v| v.fill_value)
            .unwrap_or(DEFAULT_FILL_VALUE);
        entries.insert(varname.to_string(), Some(fill));
        Self { entries }
    }

    pub fn fill_for(&self, varname: &str) -> Option<f64> {
        self.entries.get(varname).copied().flatten()
    }

    /// Names of the variables that carry a fill value.
    pub fn filled_variables(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, f)| f.is_some())
            .map(|(k, _)| k.as_str())
    }
}
