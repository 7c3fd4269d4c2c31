pub mod error;
pub mod logging;
pub mod frequency;
pub mod time;
pub mod cell_methods;
pub mod nc_utils;
pub mod dataset;
pub mod store;
#[cfg(feature = "netcdf")]
pub mod netcdf_store;
pub mod metadata;
pub mod selection;
pub mod aggregation;
pub mod pattern;
pub mod discovery;
pub mod naming;
pub mod subset;
pub mod config;
pub mod pipeline;

#[cfg(test)]
pub(crate) mod test_utils;
