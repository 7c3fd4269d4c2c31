//! Reading the bits of a file's metadata the pipeline needs before deciding
//! what to do with it: the time range (for the output name) and the name of
//! the variable inside the file.
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use error_stack::ResultExt;
use regex::Regex;

use crate::dataset::DatasetHeader;
use crate::store::DatasetStore;
use crate::time::CalendarDateTime;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// Recoverable: the driver records the file as failed and moves on.
    #[error("Could not read metadata from {}", .0.display())]
    Unreadable(PathBuf),
    #[error("{} has no time steps", .0.display())]
    EmptyTimeAxis(PathBuf),
    #[error("Could not find a data variable in {}", .0.display())]
    NoDataVariable(PathBuf),
}

/// First and last dates of a file, as `YYYYMMDD` strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRange {
    pub first: String,
    pub last: String,
}

impl TimeRange {
    pub fn new<S: Into<String>>(first: S, last: S) -> Self {
        Self {
            first: first.into(),
            last: last.into(),
        }
    }

    pub fn from_datetimes(first: &CalendarDateTime, last: &CalendarDateTime) -> Self {
        Self::new(first.compact_date(), last.compact_date())
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

/// Read the time coordinate of `path` and return its first and last dates.
pub fn read_time_range(
    store: &dyn DatasetStore,
    path: &Path,
) -> error_stack::Result<TimeRange, MetadataError> {
    let axis = store
        .read_time_axis(path)
        .change_context_lazy(|| MetadataError::Unreadable(path.to_path_buf()))?;
    let (first, last) = axis
        .first_last()
        .change_context_lazy(|| MetadataError::Unreadable(path.to_path_buf()))?
        .ok_or_else(|| MetadataError::EmptyTimeAxis(path.to_path_buf()))?;
    Ok(TimeRange::from_datetimes(&first, &last))
}

/// Return the name of the primary data variable in `path`.
pub fn read_variable_name(
    store: &dyn DatasetStore,
    path: &Path,
) -> error_stack::Result<String, MetadataError> {
    let header = store
        .read_header(path)
        .change_context_lazy(|| MetadataError::Unreadable(path.to_path_buf()))?;
    header
        .primary_variable()
        .map(|s| s.to_string())
        .ok_or_else(|| MetadataError::NoDataVariable(path.to_path_buf()).into())
}

fn filename_range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"_(?P<start>\d{8})\d{0,6}-(?P<end>\d{8})\d{0,6}\.nc$")
            .expect("the file name time range regex is valid")
    })
}

/// Take the time range from a CORDEX file name ending in `_<start>-<end>.nc`,
/// where each date has 8 to 14 digits. Only the date part is kept.
pub fn time_range_from_filename(path: &Path) -> Option<TimeRange> {
    let name = path.file_name()?.to_str()?;
    let caps = filename_range_regex().captures(name)?;
    Some(TimeRange::new(&caps["start"], &caps["end"]))
}

/// Ways to find a requested variable in a file, tried in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameStrategy {
    /// The requested name as is.
    Exact,
    /// The requested name cut at its first digit, for pressure-level
    /// variables stored without their level (`hus850` stored as `hus`).
    StripLevelSuffix,
}

pub const NAME_STRATEGIES: [NameStrategy; 2] = [NameStrategy::Exact, NameStrategy::StripLevelSuffix];

impl NameStrategy {
    /// The name this strategy looks for, or `None` if it does not apply.
    pub fn candidate(&self, requested: &str) -> Option<String> {
        match self {
            NameStrategy::Exact => Some(requested.to_string()),
            NameStrategy::StripLevelSuffix => {
                let idx = requested.find(|c: char| c.is_ascii_digit())?;
                let stem = &requested[..idx];
                if stem.is_empty() {
                    None
                } else {
                    Some(stem.to_string())
                }
            }
        }
    }
}

/// A variable found by one of the [`NAME_STRATEGIES`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    pub found: String,
    pub strategy: NameStrategy,
}

impl ResolvedName {
    pub fn needs_rename(&self, requested: &str) -> bool {
        self.found != requested
    }
}

/// Whether a file whose data variable is `found` holds `requested` under
/// one of the [`NAME_STRATEGIES`].
pub fn holds_variable(found: &str, requested: &str) -> bool {
    NAME_STRATEGIES
        .iter()
        .filter_map(|s| s.candidate(requested))
        .any(|c| c == found)
}

/// Try each strategy in turn; the first whose candidate exists wins.
pub fn resolve_variable(header: &DatasetHeader, requested: &str) -> Option<ResolvedName> {
    for strategy in NAME_STRATEGIES {
        let Some(candidate) = strategy.candidate(requested) else {
            continue;
        };
        if header.variables.contains_key(&candidate) {
            return Some(ResolvedName {
                found: candidate,
                strategy,
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;
    use rstest::rstest;

    use super::*;
    use crate::dataset::VariableInfo;
    use crate::test_utils::{hourly_dataset, MemoryStore};

    #[rstest]
    #[case("tas_ALP-3_ICHEC-EC-EARTH_rcp85_r12i1p1_CLMcom-CMCC-CCLM5-0-9_x2yn2v1_1hr_209001010030-209012312330.nc", Some(("20900101", "20901231")))]
    #[case("tasmax_ALP-3_gcm_historical_r1_rcm_v1_day_19960101-20051231.nc", Some(("19960101", "20051231")))]
    #[case("orog_ALP-3_gcm_historical_r0i0p0_rcm_v1_fx.nc", None)]
    #[case("tas_1hr_2090-2091.nc", None)]
    fn test_time_range_from_filename(#[case] name: &str, #[case] expected: Option<(&str, &str)>) {
        let got = time_range_from_filename(Path::new(name));
        assert_eq!(got, expected.map(|(a, b)| TimeRange::new(a, b)));
    }

    #[rstest]
    #[case("hus850", NameStrategy::StripLevelSuffix, Some("hus"))]
    #[case("zg500", NameStrategy::StripLevelSuffix, Some("zg"))]
    #[case("tas", NameStrategy::StripLevelSuffix, None)]
    #[case("850", NameStrategy::StripLevelSuffix, None)]
    #[case("tas", NameStrategy::Exact, Some("tas"))]
    fn test_name_candidates(
        #[case] requested: &str,
        #[case] strategy: NameStrategy,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(strategy.candidate(requested).as_deref(), expected);
    }

    #[test]
    fn test_holds_variable() {
        assert!(holds_variable("tas", "tas"));
        assert!(holds_variable("hus", "hus850"));
        assert!(holds_variable("hus850", "hus850"));
        assert!(!holds_variable("pr", "tas"));
        assert!(!holds_variable("hus", "ta850"));
    }

    #[test]
    fn test_resolve_prefers_exact() {
        let info = VariableInfo {
            dims: vec!["time".into()],
            attrs: IndexMap::new(),
        };
        let mut header = DatasetHeader::default();
        header.variables.insert("hus".into(), info.clone());
        let r = resolve_variable(&header, "hus850").unwrap();
        assert_eq!(r.found, "hus");
        assert_eq!(r.strategy, NameStrategy::StripLevelSuffix);
        assert!(r.needs_rename("hus850"));

        header.variables.insert("hus850".into(), info);
        let r = resolve_variable(&header, "hus850").unwrap();
        assert_eq!(r.strategy, NameStrategy::Exact);
        assert!(!r.needs_rename("hus850"));

        assert!(resolve_variable(&header, "ta").is_none());
    }

    #[test]
    fn test_read_time_range_and_name() {
        let store = MemoryStore::default();
        let path = Path::new("/in/tas.nc");
        store.insert(path, hourly_dataset("tas", "time: point", 48));
        let range = read_time_range(&store, path).unwrap();
        assert_eq!(range, TimeRange::new("20000101", "20000102"));
        assert_eq!(range.to_string(), "20000101-20000102");
        assert_eq!(read_variable_name(&store, path).unwrap(), "tas");
    }

    #[test]
    fn test_unreadable_is_recoverable_error() {
        let store = MemoryStore::default();
        let err = read_time_range(&store, Path::new("/missing.nc")).unwrap_err();
        assert!(matches!(err.current_context(), MetadataError::Unreadable(_)));
        let err = read_variable_name(&store, Path::new("/missing.nc")).unwrap_err();
        assert!(matches!(err.current_context(), MetadataError::Unreadable(_)));
    }
}
