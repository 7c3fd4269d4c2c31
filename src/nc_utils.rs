use ndarray::{ArrayD, Axis};
#[cfg(feature = "netcdf")]
use netcdf::{
    types::{FloatType, IntType, NcVariableType},
    Extents, NcTypeDescriptor,
};

/// The storage type of a netCDF variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcKind {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Char,
}

impl NcKind {
    pub fn is_integer(&self) -> bool {
        !matches!(self, NcKind::F32 | NcKind::F64 | NcKind::Char)
    }
}

/// A type that can hold a variety of arrays that might be stored
/// in a netCDF file. It is best created by reading from a netCDF
/// variable with its `get_from` method.
#[derive(Debug, Clone, PartialEq)]
pub enum NcArray {
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    I32(ArrayD<i32>),
    I64(ArrayD<i64>),
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
    Char(ArrayD<u8>),
}

/// Apply the same expression to whichever array an [`NcArray`] holds.
macro_rules! each_array {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            NcArray::I8($arr) => $body,
            NcArray::I16($arr) => $body,
            NcArray::I32($arr) => $body,
            NcArray::I64($arr) => $body,
            NcArray::U8($arr) => $body,
            NcArray::U16($arr) => $body,
            NcArray::U32($arr) => $body,
            NcArray::U64($arr) => $body,
            NcArray::F32($arr) => $body,
            NcArray::F64($arr) => $body,
            NcArray::Char($arr) => $body,
        }
    };
}

/// Like `each_array!`, but rebuilds the same variant from the result.
macro_rules! map_array {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            NcArray::I8($arr) => NcArray::I8($body),
            NcArray::I16($arr) => NcArray::I16($body),
            NcArray::I32($arr) => NcArray::I32($body),
            NcArray::I64($arr) => NcArray::I64($body),
            NcArray::U8($arr) => NcArray::U8($body),
            NcArray::U16($arr) => NcArray::U16($body),
            NcArray::U32($arr) => NcArray::U32($body),
            NcArray::U64($arr) => NcArray::U64($body),
            NcArray::F32($arr) => NcArray::F32($body),
            NcArray::F64($arr) => NcArray::F64($body),
            NcArray::Char($arr) => NcArray::Char($body),
        }
    };
}

impl NcArray {
    pub fn kind(&self) -> NcKind {
        match self {
            NcArray::I8(_) => NcKind::I8,
            NcArray::I16(_) => NcKind::I16,
            NcArray::I32(_) => NcKind::I32,
            NcArray::I64(_) => NcKind::I64,
            NcArray::U8(_) => NcKind::U8,
            NcArray::U16(_) => NcKind::U16,
            NcArray::U32(_) => NcKind::U32,
            NcArray::U64(_) => NcKind::U64,
            NcArray::F32(_) => NcKind::F32,
            NcArray::F64(_) => NcKind::F64,
            NcArray::Char(_) => NcKind::Char,
        }
    }

    pub fn shape(&self) -> &[usize] {
        each_array!(self, arr => arr.shape())
    }

    /// Convert numeric data to `f64`, replacing any value in `missing` with NaN.
    /// Returns `None` for character data.
    pub fn to_masked_f64(&self, missing: &[f64]) -> Option<ArrayD<f64>> {
        fn conv<T: Copy + num_traits::ToPrimitive>(arr: &ArrayD<T>, missing: &[f64]) -> ArrayD<f64> {
            arr.mapv(|v| {
                let x = v.to_f64().unwrap_or(f64::NAN);
                if missing.iter().any(|&m| m == x) {
                    f64::NAN
                } else {
                    x
                }
            })
        }

        match self {
            NcArray::I8(arr) => Some(conv(arr, missing)),
            NcArray::I16(arr) => Some(conv(arr, missing)),
            NcArray::I32(arr) => Some(conv(arr, missing)),
            NcArray::I64(arr) => Some(conv(arr, missing)),
            NcArray::U8(arr) => Some(conv(arr, missing)),
            NcArray::U16(arr) => Some(conv(arr, missing)),
            NcArray::U32(arr) => Some(conv(arr, missing)),
            NcArray::U64(arr) => Some(conv(arr, missing)),
            NcArray::F32(arr) => Some(conv(arr, missing)),
            NcArray::F64(arr) => Some(conv(arr, missing)),
            NcArray::Char(_) => None,
        }
    }

    /// Build an array of the given kind from `f64` values. NaN becomes `fill`
    /// (or NaN/zero if no fill is given); integer kinds are rounded.
    ///
    /// # Panics
    /// Character data cannot be built from numbers.
    pub fn from_f64(kind: NcKind, values: ArrayD<f64>, fill: Option<f64>) -> Self {
        fn conv<T: num_traits::NumCast + num_traits::Zero + Copy>(
            values: &ArrayD<f64>,
            fill: Option<f64>,
            round: bool,
        ) -> ArrayD<T> {
            let fill_t = fill.and_then(|f| T::from(f));
            values.mapv(|v| {
                if v.is_nan() {
                    return fill_t.or_else(|| T::from(v)).unwrap_or_else(T::zero);
                }
                let v = if round { v.round() } else { v };
                T::from(v).or(fill_t).unwrap_or_else(T::zero)
            })
        }

        let round = kind.is_integer();
        match kind {
            NcKind::I8 => NcArray::I8(conv(&values, fill, round)),
            NcKind::I16 => NcArray::I16(conv(&values, fill, round)),
            NcKind::I32 => NcArray::I32(conv(&values, fill, round)),
            NcKind::I64 => NcArray::I64(conv(&values, fill, round)),
            NcKind::U8 => NcArray::U8(conv(&values, fill, round)),
            NcKind::U16 => NcArray::U16(conv(&values, fill, round)),
            NcKind::U32 => NcArray::U32(conv(&values, fill, round)),
            NcKind::U64 => NcArray::U64(conv(&values, fill, round)),
            NcKind::F32 => NcArray::F32(conv(&values, fill, round)),
            NcKind::F64 => NcArray::F64(conv(&values, fill, round)),
            NcKind::Char => unimplemented!("building character arrays from numeric values"),
        }
    }

    /// Pick elements along `axis` by index. `None` entries take the first
    /// element's place with `default` semantics: numeric kinds get `fill` (NaN
    /// or zero if absent) and characters get NUL.
    pub fn select_along(&self, axis: usize, indices: &[Option<usize>], fill: Option<f64>) -> Self {
        if let Some(values) = self.to_masked_f64(&[]) {
            let picked = pick_f64(&values, axis, indices);
            return Self::from_f64(self.kind(), picked, fill);
        }

        map_array!(self, arr => {
            let mut shape = arr.shape().to_vec();
            shape[axis] = indices.len();
            let mut out = ArrayD::default(shape);
            for (iout, idx) in indices.iter().enumerate() {
                if let Some(i) = idx {
                    out.index_axis_mut(Axis(axis), iout)
                        .assign(&arr.index_axis(Axis(axis), *i));
                }
            }
            out
        })
    }
}

fn pick_f64(values: &ArrayD<f64>, axis: usize, indices: &[Option<usize>]) -> ArrayD<f64> {
    let mut shape = values.shape().to_vec();
    shape[axis] = indices.len();
    let mut out = ArrayD::from_elem(shape, f64::NAN);
    for (iout, idx) in indices.iter().enumerate() {
        if let Some(i) = idx {
            out.index_axis_mut(Axis(axis), iout)
                .assign(&values.index_axis(Axis(axis), *i));
        }
    }
    out
}

/// Wrapper around unsigned bytes to represent a netCDF character type
///
/// In netCDF v0.11, i8 and u8 are not considered equivalent to an NC_CHAR type.
/// Therefore, to read or write an NC_CHAR-type variable, we use this structure
/// to hold a byte as a character.
#[cfg(feature = "netcdf")]
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct NcChar(u8);

#[cfg(feature = "netcdf")]
unsafe impl NcTypeDescriptor for NcChar {
    fn type_descriptor() -> NcVariableType {
        NcVariableType::Char
    }
}

#[cfg(feature = "netcdf")]
impl NcArray {
    /// Retrieve data from a netCDF variable and construct the appropriate variant.
    ///
    /// Compound, opaque, enum, variable length and string types are not supported
    /// and return `None`; CORDEX files do not use them.
    pub fn get_from(var: &netcdf::Variable) -> netcdf::Result<Option<Self>> {
        let arr = match var.vartype() {
            NcVariableType::Int(IntType::I8) => Self::I8(var.get::<i8, _>(Extents::All)?),
            NcVariableType::Int(IntType::I16) => Self::I16(var.get::<i16, _>(Extents::All)?),
            NcVariableType::Int(IntType::I32) => Self::I32(var.get::<i32, _>(Extents::All)?),
            NcVariableType::Int(IntType::I64) => Self::I64(var.get::<i64, _>(Extents::All)?),
            NcVariableType::Int(IntType::U8) => Self::U8(var.get::<u8, _>(Extents::All)?),
            NcVariableType::Int(IntType::U16) => Self::U16(var.get::<u16, _>(Extents::All)?),
            NcVariableType::Int(IntType::U32) => Self::U32(var.get::<u32, _>(Extents::All)?),
            NcVariableType::Int(IntType::U64) => Self::U64(var.get::<u64, _>(Extents::All)?),
            NcVariableType::Float(FloatType::F32) => Self::F32(var.get::<f32, _>(Extents::All)?),
            NcVariableType::Float(FloatType::F64) => Self::F64(var.get::<f64, _>(Extents::All)?),
            NcVariableType::Char => {
                let chars = var.get::<NcChar, _>(Extents::All)?;
                Self::Char(chars.mapv(|c| c.0))
            }
            _ => return Ok(None),
        };
        Ok(Some(arr))
    }

    /// Create a variable in a netCDF file and write this data to it.
    /// `fill` is set as the variable's `_FillValue` before any data are written;
    /// with `None` the variable gets no `_FillValue` attribute.
    pub fn put_to<'f>(
        &self,
        file: &'f mut netcdf::FileMut,
        name: &str,
        dims: &[&str],
        fill: Option<f64>,
    ) -> netcdf::Result<netcdf::VariableMut<'f>> {
        fn put<'f, T: NcTypeDescriptor + num_traits::NumCast + Copy>(
            file: &'f mut netcdf::FileMut,
            name: &str,
            dims: &[&str],
            arr: &ArrayD<T>,
            fill: Option<f64>,
        ) -> netcdf::Result<netcdf::VariableMut<'f>> {
            let mut var = file.add_variable::<T>(name, dims)?;
            if let Some(fill) = fill.and_then(|f| T::from(f)) {
                var.set_fill_value(fill)?;
            }
            var.put(arr.view(), Extents::All)?;
            Ok(var)
        }

        match self {
            NcArray::I8(arr) => put(file, name, dims, arr, fill),
            NcArray::I16(arr) => put(file, name, dims, arr, fill),
            NcArray::I32(arr) => put(file, name, dims, arr, fill),
            NcArray::I64(arr) => put(file, name, dims, arr, fill),
            NcArray::U8(arr) => put(file, name, dims, arr, fill),
            NcArray::U16(arr) => put(file, name, dims, arr, fill),
            NcArray::U32(arr) => put(file, name, dims, arr, fill),
            NcArray::U64(arr) => put(file, name, dims, arr, fill),
            NcArray::F32(arr) => put(file, name, dims, arr, fill),
            NcArray::F64(arr) => put(file, name, dims, arr, fill),
            NcArray::Char(arr) => {
                let mut var = file.add_variable::<NcChar>(name, dims)?;
                let chars = arr.mapv(NcChar);
                var.put(chars.view(), Extents::All)?;
                Ok(var)
            }
        }
    }
}
