//! Parsing CF `cell_methods` attributes and checking them against the
//! per-variable expectations.
use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a value relates to the time window it represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimeMethod {
    Point,
    Mean,
    Minimum,
    Maximum,
    Sum,
    Other(String),
}

impl FromStr for TimeMethod {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let m = match s.trim().to_ascii_lowercase().as_str() {
            "point" => Self::Point,
            "mean" => Self::Mean,
            "minimum" => Self::Minimum,
            "maximum" => Self::Maximum,
            "sum" => Self::Sum,
            other => Self::Other(other.to_string()),
        };
        Ok(m)
    }
}

impl Display for TimeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeMethod::Point => write!(f, "time: point"),
            TimeMethod::Mean => write!(f, "time: mean"),
            TimeMethod::Minimum => write!(f, "time: minimum"),
            TimeMethod::Maximum => write!(f, "time: maximum"),
            TimeMethod::Sum => write!(f, "time: sum"),
            TimeMethod::Other(m) => write!(f, "time: {m}"),
        }
    }
}

fn cell_method_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*:\s*(?P<method>[A-Za-z_]+)")
            .expect("the cell method regex is valid")
    })
}

/// A parsed `cell_methods` attribute.
///
/// Only the parts that matter for temporal resampling are kept: the method
/// applied along `time` and whether a vertical mean (`lev: mean`) was taken.
/// Parenthesised comments such as `(interval: 1 hour)` are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CellMethods {
    raw: String,
    time: Option<TimeMethod>,
    level_mean: bool,
}

impl CellMethods {
    pub fn parse(raw: &str) -> Self {
        let mut time = None;
        let mut level_mean = false;
        let mut depth = 0usize;
        let mut outside = String::with_capacity(raw.len());
        for c in raw.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                _ if depth == 0 => outside.push(c),
                _ => {}
            }
        }

        for caps in cell_method_regex().captures_iter(&outside) {
            let name = &caps["name"];
            let method = &caps["method"];
            if name == "time" && time.is_none() {
                time = Some(TimeMethod::from_str(method).unwrap_or(TimeMethod::Other(method.to_string())));
            } else if (name == "lev" || name == "plev" || name == "level") && method == "mean" {
                level_mean = true;
            }
        }

        Self {
            raw: raw.to_string(),
            time,
            level_mean,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn time_method(&self) -> Option<&TimeMethod> {
        self.time.as_ref()
    }

    /// `true` for instantaneous values, which are subsampled rather than
    /// averaged. A level mean without a time method counts as instantaneous.
    pub fn is_instantaneous(&self) -> bool {
        match &self.time {
            Some(TimeMethod::Point) => true,
            None => self.level_mean,
            _ => false,
        }
    }

    pub fn has_time_method(&self, method: &TimeMethod) -> bool {
        self.time.as_ref() == Some(method)
    }

    /// The raw attribute with its `time:` entry replaced by `method`, or with
    /// `method` appended if there was none.
    pub fn with_time_method(&self, method: &TimeMethod) -> String {
        let new_entry = method.to_string();
        let re = time_entry_regex();
        if re.is_match(&self.raw) {
            re.replace(&self.raw, new_entry.as_str()).into_owned()
        } else if self.raw.trim().is_empty() {
            new_entry
        } else {
            format!("{} {new_entry}", self.raw.trim_end())
        }
    }
}

fn time_entry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\btime\s*:\s*[A-Za-z_]+").expect("the time entry regex is valid"))
}

impl Display for CellMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}'", self.raw)
    }
}

/// A declared cell method that disagrees with the contract for its variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellMethodMismatch {
    pub variable: String,
    pub expected: TimeMethod,
    pub actual: String,
}

impl Display for CellMethodMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cell_methods of {} should be '{}' but is '{}'",
            self.variable, self.expected, self.actual
        )
    }
}

/// What to do when a file's `cell_methods` does not match the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellMethodPolicy {
    /// Fail the file; nothing is written.
    #[default]
    Strict,
    /// Log a warning and write the output anyway.
    Warn,
}

/// Required time cell method per variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellMethodContract {
    expectations: IndexMap<String, TimeMethod>,
}

impl Default for CellMethodContract {
    fn default() -> Self {
        let expectations = [
            ("tasmin", TimeMethod::Minimum),
            ("tasmax", TimeMethod::Maximum),
            ("snd", TimeMethod::Mean),
            ("snw", TimeMethod::Mean),
            ("mrro", TimeMethod::Mean),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self { expectations }
    }
}

impl CellMethodContract {
    pub fn empty() -> Self {
        Self {
            expectations: IndexMap::new(),
        }
    }

    /// Add or replace entries from `variable = "time: <method>"` pairs, as
    /// given in the configuration.
    pub fn with_overrides<'a, I>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (varname, method) in overrides {
            let parsed = CellMethods::parse(method);
            let expected = match parsed.time {
                Some(m) => m,
                None => {
                    log::warn!("Cell method override '{method}' for {varname} has no 'time:' entry, ignoring it");
                    continue;
                }
            };
            self.expectations.insert(varname.clone(), expected);
        }
        self
    }

    pub fn expected(&self, variable: &str) -> Option<&TimeMethod> {
        self.expectations.get(variable)
    }

    /// Compare a declared cell method to the contract. Variables without an
    /// entry always pass.
    pub fn check(&self, variable: &str, actual: &CellMethods) -> Option<CellMethodMismatch> {
        let expected = self.expectations.get(variable)?;
        if actual.has_time_method(expected) {
            None
        } else {
            Some(CellMethodMismatch {
                variable: variable.to_string(),
                expected: expected.clone(),
                actual: actual.raw().to_string(),
            })
        }
    }
}
