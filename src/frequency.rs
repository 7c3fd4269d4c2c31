//! Time-frequency tokens used in CORDEX directory and file names.
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A CORDEX time-frequency token.
///
/// The time-series frequencies have a total order from finest to coarsest,
/// `1hr < 3hr < 6hr < day`. `fx` (time-invariant fields) is not part of that
/// order; use [`Frequency::compare_resolution`] rather than `Ord` when `fx`
/// may be involved.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
    strum::AsRefStr,
    Serialize,
    Deserialize,
)]
pub enum Frequency {
    #[strum(serialize = "1hr")]
    #[serde(rename = "1hr")]
    Hourly,
    #[strum(serialize = "3hr")]
    #[serde(rename = "3hr")]
    ThreeHourly,
    #[strum(serialize = "6hr")]
    #[serde(rename = "6hr")]
    SixHourly,
    #[strum(serialize = "day")]
    #[serde(rename = "day")]
    Daily,
    #[strum(serialize = "fx")]
    #[serde(rename = "fx")]
    Fixed,
}

impl Frequency {
    /// Length of one sampling interval in seconds, `None` for `fx`.
    pub fn step_seconds(&self) -> Option<i64> {
        match self {
            Frequency::Hourly => Some(3_600),
            Frequency::ThreeHourly => Some(3 * 3_600),
            Frequency::SixHourly => Some(6 * 3_600),
            Frequency::Daily => Some(86_400),
            Frequency::Fixed => None,
        }
    }

    /// Compare the sampling interval of two frequencies. `Less` means `self` is
    /// finer than `other`. Returns `None` if exactly one of them is `fx`.
    pub fn compare_resolution(&self, other: &Frequency) -> Option<Ordering> {
        match (self.step_seconds(), other.step_seconds()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            (None, None) => Some(Ordering::Equal),
            _ => None,
        }
    }

    pub fn is_finer_than(&self, other: &Frequency) -> bool {
        self.compare_resolution(other) == Some(Ordering::Less)
    }

    pub fn is_coarser_than(&self, other: &Frequency) -> bool {
        self.compare_resolution(other) == Some(Ordering::Greater)
    }

    pub fn is_time_series(&self) -> bool {
        !matches!(self, Frequency::Fixed)
    }
}

/// The fallback order used when the configuration does not give one.
pub fn default_fallback_order() -> Vec<Frequency> {
    vec![
        Frequency::Hourly,
        Frequency::ThreeHourly,
        Frequency::SixHourly,
        Frequency::Daily,
    ]
}
