//! Finding input files on disk from placeholder path patterns.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use error_stack::ResultExt;
use indexmap::IndexMap;

use crate::frequency::Frequency;
use crate::pattern::{PatternError, PlaceholderPattern};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Invalid search pattern")]
    Pattern,
    #[error("Could not search for files matching {0}")]
    Glob(String),
}

/// What the directory layout and file name say about a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileMeta {
    pub variable: String,
    pub domain: String,
    pub institute: Option<String>,
    pub gcm: String,
    pub scenario: String,
    pub ensemble: String,
    pub rcm: String,
    pub nesting: String,
    pub t_freq: Frequency,
}

impl FileMeta {
    fn from_captures(caps: &HashMap<String, String>) -> Result<Self, String> {
        let get = |key: &str| {
            caps.get(key)
                .cloned()
                .ok_or_else(|| format!("pattern did not capture '{key}'"))
        };
        let t_freq = get("t_freq")?;
        let t_freq = Frequency::from_str(&t_freq).map_err(|_| format!("unknown frequency '{t_freq}'"))?;
        Ok(Self {
            variable: get("variable")?,
            domain: get("domain")?,
            institute: caps.get("institute").cloned(),
            gcm: get("gcm")?,
            scenario: get("scenario")?,
            ensemble: get("ensemble")?,
            rcm: get("rcm")?,
            nesting: get("nesting")?,
            t_freq,
        })
    }

    /// Values for rendering output layouts, keyed as in the search patterns.
    pub fn placeholder_values(&self) -> HashMap<&'static str, String> {
        let mut values = HashMap::from([
            ("variable", self.variable.clone()),
            ("domain", self.domain.clone()),
            ("gcm", self.gcm.clone()),
            ("scenario", self.scenario.clone()),
            ("ensemble", self.ensemble.clone()),
            ("rcm", self.rcm.clone()),
            ("nesting", self.nesting.clone()),
            ("t_freq", self.t_freq.to_string()),
        ]);
        if let Some(inst) = &self.institute {
            values.insert("institute", inst.clone());
        }
        values
    }
}

/// A discovered input file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRecord {
    pub path: PathBuf,
    pub meta: FileMeta,
}

/// Placeholders every search pattern must contain once `{root}` and
/// `{domain}` are filled in.
const REQUIRED_KEYS: [&str; 7] = ["variable", "gcm", "scenario", "ensemble", "rcm", "nesting", "t_freq"];

/// Searches one or more directory layouts for files of one domain.
#[derive(Debug, Clone)]
pub struct FileFinder {
    patterns: Vec<PlaceholderPattern>,
    domain: String,
}

impl FileFinder {
    /// Each path pattern is joined with `file_pattern`. `{root}` and
    /// `{domain}` are filled in right away.
    pub fn new<S: AsRef<str>>(
        input_root: &Path,
        domain: &str,
        path_patterns: &[S],
        file_pattern: &str,
    ) -> Result<Self, PatternError> {
        let fixed = HashMap::from([
            ("root", input_root.display().to_string()),
            ("domain", domain.to_string()),
        ]);
        let patterns = path_patterns
            .iter()
            .map(|p| {
                let full = format!("{}/{}", p.as_ref().trim_end_matches('/'), file_pattern);
                let pattern = PlaceholderPattern::new(&full)?.partial(&fixed);
                let keys = pattern.keys();
                if let Some(missing) = REQUIRED_KEYS.iter().find(|k| !keys.contains(*k)) {
                    return Err(PatternError::MissingPlaceholder {
                        pattern: full,
                        name: missing.to_string(),
                    });
                }
                Ok(pattern)
            })
            .collect::<Result<Vec<_>, PatternError>>()?;
        Ok(Self {
            patterns,
            domain: domain.to_string(),
        })
    }

    pub fn patterns(&self) -> &[PlaceholderPattern] {
        &self.patterns
    }

    /// Files for `variable` at native frequency `freq`, over every pattern,
    /// without duplicates and sorted by path.
    pub fn find(
        &self,
        variable: &str,
        freq: Frequency,
    ) -> error_stack::Result<Vec<FileRecord>, DiscoveryError> {
        let fixed = HashMap::from([
            ("variable", variable.to_string()),
            ("t_freq", freq.to_string()),
        ]);
        let mut found: IndexMap<PathBuf, FileRecord> = IndexMap::new();

        for pattern in self.patterns.iter() {
            let pattern = pattern.partial(&fixed);
            let matcher = pattern
                .matcher()
                .change_context(DiscoveryError::Pattern)
                .attach_printable_lazy(|| format!("pattern: {}", pattern.as_str()))?;
            let glob_pattern = pattern.to_glob();
            log::debug!("Searching {glob_pattern}");
            let paths = glob::glob(&glob_pattern)
                .change_context_lazy(|| DiscoveryError::Glob(glob_pattern.clone()))?;

            for entry in paths {
                let path = match entry {
                    Ok(p) => p,
                    Err(e) => {
                        log::warn!("Could not read {} while searching: {e}", e.path().display());
                        continue;
                    }
                };
                if found.contains_key(&path) || !path.is_file() {
                    continue;
                }
                let Some(caps) = matcher.captures(&path.to_string_lossy()) else {
                    log::debug!("{} matched the glob but not the pattern", path.display());
                    continue;
                };
                let mut caps = caps;
                caps.insert("domain".to_string(), self.domain.clone());
                caps.insert("variable".to_string(), variable.to_string());
                caps.insert("t_freq".to_string(), freq.to_string());
                match FileMeta::from_captures(&caps) {
                    Ok(meta) => {
                        found.insert(path.clone(), FileRecord { path, meta });
                    }
                    Err(reason) => log::warn!("Skipping {}: {reason}", path.display()),
                }
            }
        }

        let mut records: Vec<FileRecord> = found.into_values().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        log::debug!("Found {} file(s) for {variable} at {freq}", records.len());
        Ok(records)
    }
}
