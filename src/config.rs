//! Run configuration: a TOML file, overridable through `RCM_CURATE_*`
//! environment variables.
use std::io::Write;
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cell_methods::{CellMethodContract, CellMethodPolicy};
use crate::frequency::{default_fallback_order, Frequency};
use crate::naming::DEFAULT_OUTPUT_LAYOUT;
use crate::pattern::PlaceholderPattern;
use crate::selection::FrequencyRequest;
use crate::subset::BoundingBox;

pub const ENV_PREFIX: &str = "RCM_CURATE_";

/// Top-level keys that environment variables may override. Other variables
/// sharing the prefix are ignored instead of failing the unknown field check.
const CONFIG_KEYS: [&str; 18] = [
    "input_root",
    "output_root",
    "scratch_dir",
    "domain",
    "subdomain",
    "variables",
    "frequencies",
    "fallback_order",
    "scenarios",
    "path_patterns",
    "file_pattern",
    "output_layout",
    "overwrite",
    "time_range_from_filename",
    "cell_method_policy",
    "subset_program",
    "cell_methods",
    "bbox",
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file {} does not exist", .0.display())]
    Missing(PathBuf),
    #[error("Error parsing configuration from {}", .0.display())]
    Parse(PathBuf),
    #[error("No variables configured")]
    EmptyVariables,
    #[error("{nvar} variables but {nfreq} frequencies configured; each variable needs one frequency")]
    LengthMismatch { nvar: usize, nfreq: usize },
    #[error("Invalid bounding box")]
    InvalidBbox,
    #[error("No path patterns configured")]
    NoPathPatterns,
    #[error("Invalid pattern '{0}'")]
    InvalidPattern(String),
    #[error("{0}")]
    Context(String),
}

impl ConfigError {
    pub fn context<S: ToString>(ctx: S) -> Self {
        Self::Context(ctx.to_string())
    }
}

/// Everything a curation run needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CurationConfig {
    /// Root of the input archive.
    pub input_root: PathBuf,
    /// Root under which output files are placed.
    pub output_root: PathBuf,
    /// Directory for per-file intermediate results.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// CORDEX domain to search, e.g. "ALP-3".
    pub domain: String,
    /// Name used in place of the domain in output file names and layouts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    /// Variables to curate, paired one to one with `frequencies`.
    pub variables: Vec<String>,
    pub frequencies: Vec<Frequency>,
    /// Frequencies to try, in order, when the requested one has no files.
    #[serde(default = "default_fallback_order")]
    pub fallback_order: Vec<Frequency>,
    /// Scenarios to keep; empty keeps all.
    #[serde(default)]
    pub scenarios: Vec<String>,
    /// Directory layouts to search, with `{placeholder}` fields.
    #[serde(default = "default_path_patterns")]
    pub path_patterns: Vec<String>,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    #[serde(default = "default_output_layout")]
    pub output_layout: String,
    #[serde(default)]
    pub overwrite: bool,
    /// Take the time range for output names from input file names when possible.
    #[serde(default = "default_true")]
    pub time_range_from_filename: bool,
    #[serde(default)]
    pub cell_method_policy: CellMethodPolicy,
    /// Path or name of the `cdo` executable.
    #[serde(default = "default_subset_program")]
    pub subset_program: PathBuf,
    /// Extra or replacement cell method expectations, `variable = "time: <method>"`.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub cell_methods: IndexMap<String, String>,
    /// Region to cut out; without one, inputs are copied whole.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("rcm-curate")
}

fn default_path_patterns() -> Vec<String> {
    vec![
        "{root}/{domain}/{institute}/{gcm}/{scenario}/{ensemble}/{rcm}/{nesting}/{t_freq}/{variable}".to_string(),
        "{root}/{domain}/{institute}/{gcm}/{scenario}/{ensemble}/{rcm}/{nesting}/{t_freq}/{variable}/latest".to_string(),
        "{root}/{domain}/{institute}/{gcm}/{scenario}/{ensemble}/{rcm}/{nesting}/{t_freq}".to_string(),
        "{root}/{domain}/{institute}/{gcm}/{t_freq}".to_string(),
    ]
}

fn default_file_pattern() -> String {
    "{variable}_{domain}_{gcm}_{scenario}_{ensemble}_{rcm}_{nesting}_{t_freq}*.nc".to_string()
}

fn default_output_layout() -> String {
    DEFAULT_OUTPUT_LAYOUT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_subset_program() -> PathBuf {
    PathBuf::from("cdo")
}

fn env_overrides(prefix: &str) -> Env {
    Env::prefixed(prefix).split("__").filter(|key| {
        let top = key.as_str().split('.').next().unwrap_or_default();
        let known = CONFIG_KEYS.iter().any(|k| k.eq_ignore_ascii_case(top));
        if !known {
            log::debug!("Ignoring environment override for unknown key '{key}'");
        }
        known
    })
}

impl CurationConfig {
    /// Load from `path`, apply `RCM_CURATE_*` environment overrides and validate.
    /// Nested keys use a double underscore, e.g. `RCM_CURATE_BBOX__LON_MIN`.
    pub fn load(path: &Path) -> error_stack::Result<Self, ConfigError> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: &Path, prefix: &str) -> error_stack::Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()).into());
        }
        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(env_overrides(prefix))
            .extract()
            .change_context_lazy(|| ConfigError::Parse(path.to_path_buf()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check what cannot be expressed in the types. Every error here is fatal
    /// and must be caught before any file is processed.
    pub fn validate(&self) -> error_stack::Result<(), ConfigError> {
        if self.variables.is_empty() {
            return Err(ConfigError::EmptyVariables.into());
        }
        if self.variables.len() != self.frequencies.len() {
            return Err(ConfigError::LengthMismatch {
                nvar: self.variables.len(),
                nfreq: self.frequencies.len(),
            }
            .into());
        }
        if let Some(bbox) = &self.bbox {
            bbox.validate().change_context(ConfigError::InvalidBbox)?;
        }
        if self.path_patterns.is_empty() {
            return Err(ConfigError::NoPathPatterns.into());
        }
        for p in self
            .path_patterns
            .iter()
            .chain([&self.file_pattern, &self.output_layout])
        {
            PlaceholderPattern::new(p).change_context_lazy(|| ConfigError::InvalidPattern(p.clone()))?;
        }
        Ok(())
    }

    /// One request per configured variable.
    pub fn requests(&self) -> Vec<FrequencyRequest> {
        self.variables
            .iter()
            .zip(self.frequencies.iter())
            .map(|(v, f)| FrequencyRequest::new(v, *f, self.fallback_order.clone()))
            .collect()
    }

    /// The region name used in output file names.
    pub fn region(&self) -> &str {
        self.subdomain.as_deref().unwrap_or(&self.domain)
    }

    pub fn contract(&self) -> CellMethodContract {
        CellMethodContract::default().with_overrides(&self.cell_methods)
    }

    pub fn template_example() -> Self {
        Self {
            input_root: PathBuf::from("/data/CORDEX-FPSCONV/output"),
            output_root: PathBuf::from("/data/curated"),
            scratch_dir: PathBuf::from("/scratch/rcm-curate"),
            domain: "ALP-3".to_string(),
            subdomain: Some("FPS-ALP".to_string()),
            variables: vec!["tas".to_string(), "tasmax".to_string(), "hus850".to_string()],
            frequencies: vec![Frequency::Hourly, Frequency::Daily, Frequency::SixHourly],
            fallback_order: default_fallback_order(),
            scenarios: vec!["historical".to_string(), "rcp85".to_string()],
            path_patterns: default_path_patterns(),
            file_pattern: default_file_pattern(),
            output_layout: default_output_layout(),
            overwrite: false,
            time_range_from_filename: true,
            cell_method_policy: CellMethodPolicy::Strict,
            subset_program: default_subset_program(),
            cell_methods: IndexMap::from([("hus850".to_string(), "time: point".to_string())]),
            bbox: Some(BoundingBox {
                lon_min: 1.0,
                lon_max: 17.0,
                lat_min: 40.0,
                lat_max: 50.5,
            }),
        }
    }

    /// Write a commented example configuration to `example_file`.
    pub fn write_template_example(example_file: &Path) -> error_stack::Result<(), ConfigError> {
        let comments = [
            "Example configuration for process_rcm_data and find_rcm_files.",
            "",
            "Each entry in 'variables' is produced at the frequency in the same position",
            "of 'frequencies'. If no files exist at that frequency, the frequencies in",
            "'fallback_order' are tried in turn. Finer data are aggregated to the requested",
            "frequency; coarser data are passed through and named with their own frequency.",
            "",
            "Path patterns use {placeholders}. {root} and {domain} come from 'input_root' and",
            "'domain'; the rest are read from each file's path. The output layout may use the",
            "same placeholders plus {subdomain}, and {t_freq} there is the frequency written.",
            "",
            "'cell_method_policy' is \"strict\" (a file whose cell_methods disagree with the",
            "expected one for its variable fails) or \"warn\" (log and write anyway).",
            "Entries in [cell_methods] add to or replace the built in expectations.",
            "",
            "Without a [bbox] section, inputs are copied without spatial subsetting.",
            "Any field can be overridden by an environment variable, e.g. RCM_CURATE_OVERWRITE=true.",
        ];
        let template = Self::template_example();
        let mut f = std::fs::File::create(example_file).change_context_lazy(|| {
            ConfigError::context(format!(
                "Error creating template file: {}",
                example_file.display()
            ))
        })?;

        for line in comments {
            writeln!(f, "# {line}").change_context_lazy(|| {
                ConfigError::context(format!(
                    "Error writing to template file: {}",
                    example_file.display()
                ))
            })?;
        }
        let s = toml::to_string_pretty(&template)
            .expect("The example template should be able to be serialized (this is a bug)");
        write!(f, "\n{s}").change_context_lazy(|| {
            ConfigError::context(format!(
                "Error writing to template file: {}",
                example_file.display()
            ))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
input_root = "/in"
output_root = "/out"
domain = "ALP-3"
variables = ["tas", "tasmax"]
frequencies = ["1hr", "day"]
"#;

    fn write_config(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, contents).unwrap();
        (tmp, path)
    }

    #[test]
    fn test_minimal_defaults() {
        let (_tmp, path) = write_config(MINIMAL);
        let cfg = CurationConfig::load(&path).unwrap();
        assert_eq!(cfg.region(), "ALP-3");
        assert_eq!(cfg.fallback_order, default_fallback_order());
        assert_eq!(cfg.path_patterns.len(), 4);
        assert!(cfg.time_range_from_filename);
        assert!(!cfg.overwrite);
        assert_eq!(cfg.cell_method_policy, CellMethodPolicy::Strict);
        assert!(cfg.bbox.is_none());

        let requests = cfg.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].variable, "tasmax");
        assert_eq!(requests[1].requested, Frequency::Daily);
    }

    #[test]
    fn test_length_mismatch_is_fatal() {
        let (_tmp, path) = write_config(&MINIMAL.replace(r#"["1hr", "day"]"#, r#"["1hr"]"#));
        let err = CurationConfig::load(&path).unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::LengthMismatch { nvar: 2, nfreq: 1 }
        ));
    }

    #[test]
    fn test_empty_variables_is_fatal() {
        let contents = MINIMAL
            .replace(r#"["tas", "tasmax"]"#, "[]")
            .replace(r#"["1hr", "day"]"#, "[]");
        let (_tmp, path) = write_config(&contents);
        let err = CurationConfig::load(&path).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::EmptyVariables));
    }

    #[test]
    fn test_bad_frequency_is_fatal() {
        let (_tmp, path) = write_config(&MINIMAL.replace(r#""day""#, r#""mon""#));
        let err = CurationConfig::load(&path).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_bad_bbox_is_fatal() {
        let contents = format!("{MINIMAL}\n[bbox]\nlon_min = 17.0\nlon_max = 1.0\nlat_min = 40.0\nlat_max = 50.0\n");
        let (_tmp, path) = write_config(&contents);
        let err = CurationConfig::load(&path).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::InvalidBbox));
    }

    #[test]
    fn test_missing_file() {
        let err = CurationConfig::load(Path::new("/no/such/config.toml")).unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::Missing(_)));
    }

    #[test]
    fn test_env_override() {
        let (_tmp, path) = write_config(MINIMAL);
        // A prefix only this test uses, so other tests never see it.
        std::env::set_var("RCMCURATETEST_SUBDOMAIN", "FPS-ALP");
        let cfg = CurationConfig::load_with_prefix(&path, "RCMCURATETEST_").unwrap();
        assert_eq!(cfg.region(), "FPS-ALP");
    }

    #[test]
    fn test_env_nested_override_and_unrelated_keys() {
        let contents = format!("{MINIMAL}\n[bbox]\nlon_min = 1.0\nlon_max = 17.0\nlat_min = 40.0\nlat_max = 50.0\n");
        let (_tmp, path) = write_config(&contents);
        std::env::set_var("RCMCURATENESTED_BBOX__LAT_MAX", "49.5");
        std::env::set_var("RCMCURATENESTED_LOG_STYLE", "fancy");
        let cfg = CurationConfig::load_with_prefix(&path, "RCMCURATENESTED_").unwrap();
        let bbox = cfg.bbox.unwrap();
        approx::assert_abs_diff_eq!(bbox.lat_max, 49.5);
        approx::assert_abs_diff_eq!(bbox.lon_min, 1.0);
    }

    #[test]
    fn test_contract_overrides() {
        let contents = format!("{MINIMAL}\n[cell_methods]\nhus850 = \"time: point\"\n");
        let (_tmp, path) = write_config(&contents);
        let cfg = CurationConfig::load(&path).unwrap();
        let contract = cfg.contract();
        assert_eq!(
            contract.expected("hus850"),
            Some(&crate::cell_methods::TimeMethod::Point)
        );
        assert!(contract.expected("tasmax").is_some());
    }

    #[test]
    fn test_template_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("template.toml");
        CurationConfig::write_template_example(&path).unwrap();
        let cfg = CurationConfig::load(&path).unwrap();
        assert_eq!(cfg, CurationConfig::template_example());
    }
}
