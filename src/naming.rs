//! Output file names and where they go.
use std::path::{Path, PathBuf};

use crate::discovery::FileMeta;
use crate::frequency::Frequency;
use crate::metadata::TimeRange;
use crate::pattern::{PatternError, PlaceholderPattern};

/// Default directory layout under the output root.
pub const DEFAULT_OUTPUT_LAYOUT: &str = "{subdomain}/{variable}/{scenario}";

/// Build the CORDEX-style output file name
/// `{variable}_{region}_{gcm}_{scenario}_{ensemble}_{rcm}_{nesting}_{freq}_{first}-{last}.nc`.
///
/// `region` is the subdomain if one is configured, otherwise the domain.
/// Time-invariant files have no time range and end in `_{freq}.nc`.
pub fn output_filename(
    variable: &str,
    region: &str,
    meta: &FileMeta,
    freq: Frequency,
    range: Option<&TimeRange>,
) -> String {
    let stem = format!(
        "{variable}_{region}_{}_{}_{}_{}_{}_{freq}",
        meta.gcm, meta.scenario, meta.ensemble, meta.rcm, meta.nesting
    );
    match range {
        Some(r) => format!("{stem}_{r}.nc"),
        None => format!("{stem}.nc"),
    }
}

/// Places output files under `output_root` following a layout template.
#[derive(Debug, Clone)]
pub struct OutputPlacement {
    root: PathBuf,
    layout: PlaceholderPattern,
    subdomain: String,
}

impl OutputPlacement {
    pub fn new(root: &Path, layout: &str, subdomain: &str) -> Result<Self, PatternError> {
        Ok(Self {
            root: root.to_path_buf(),
            layout: PlaceholderPattern::new(layout)?,
            subdomain: subdomain.to_string(),
        })
    }

    /// The directory for a file, from its metadata, the requested variable
    /// name and the frequency actually written.
    pub fn directory(
        &self,
        variable: &str,
        meta: &FileMeta,
        freq: Frequency,
    ) -> Result<PathBuf, PatternError> {
        let mut values = meta.placeholder_values();
        values.insert("variable", variable.to_string());
        values.insert("t_freq", freq.to_string());
        values.insert("subdomain", self.subdomain.clone());
        let rel = self.layout.render(&values)?;
        Ok(self.root.join(rel))
    }

    pub fn path(
        &self,
        variable: &str,
        meta: &FileMeta,
        freq: Frequency,
        filename: &str,
    ) -> Result<PathBuf, PatternError> {
        Ok(self.directory(variable, meta, freq)?.join(filename))
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn meta() -> FileMeta {
        FileMeta {
            variable: "hus".into(),
            domain: "ALP-3".into(),
            institute: Some("CLMcom".into()),
            gcm: "ICHEC-EC-EARTH".into(),
            scenario: "rcp85".into(),
            ensemble: "r12i1p1".into(),
            rcm: "CLMcom-CMCC-CCLM5-0-9".into(),
            nesting: "x2yn2v1".into(),
            t_freq: Frequency::Hourly,
        }
    }

    #[rstest]
    fn test_output_filename(meta: FileMeta) {
        let range = TimeRange::new("20900101", "20901231");
        assert_eq!(
            output_filename("hus850", "FPS-ALP", &meta, Frequency::SixHourly, Some(&range)),
            "hus850_FPS-ALP_ICHEC-EC-EARTH_rcp85_r12i1p1_CLMcom-CMCC-CCLM5-0-9_x2yn2v1_6hr_20900101-20901231.nc"
        );
        assert_eq!(
            output_filename("orog", "ALP-3", &meta, Frequency::Fixed, None),
            "orog_ALP-3_ICHEC-EC-EARTH_rcp85_r12i1p1_CLMcom-CMCC-CCLM5-0-9_x2yn2v1_fx.nc"
        );
    }

    #[rstest]
    fn test_default_placement(meta: FileMeta) {
        let placement = OutputPlacement::new(Path::new("/out"), DEFAULT_OUTPUT_LAYOUT, "FPS-ALP").unwrap();
        let p = placement
            .path("hus850", &meta, Frequency::SixHourly, "x.nc")
            .unwrap();
        assert_eq!(p, PathBuf::from("/out/FPS-ALP/hus850/rcp85/x.nc"));
    }

    #[rstest]
    fn test_layout_uses_written_frequency(meta: FileMeta) {
        let placement = OutputPlacement::new(Path::new("/out"), "{t_freq}/{variable}", "FPS-ALP").unwrap();
        let d = placement.directory("tas", &meta, Frequency::Daily).unwrap();
        assert_eq!(d, PathBuf::from("/out/day/tas"));
    }

    #[rstest]
    fn test_unknown_layout_key(meta: FileMeta) {
        let placement = OutputPlacement::new(Path::new("/out"), "{project}/{variable}", "FPS").unwrap();
        assert!(placement.directory("tas", &meta, Frequency::Daily).is_err());
    }
}
