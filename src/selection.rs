//! Choosing which native frequency to process for a requested output frequency.
//!
//! The policy is asymmetric: a finer native frequency may be coarsened to the
//! request, but a coarser native frequency is never refined. In that case the
//! file is processed as-is and named with its native frequency.
use std::cmp::Ordering;

use crate::frequency::Frequency;

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("Frequencies {requested} and {matched} cannot be compared (time-invariant vs. time series)")]
    Incomparable {
        requested: Frequency,
        matched: Frequency,
    },
}

/// A request for one variable at one output frequency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyRequest {
    pub variable: String,
    pub requested: Frequency,
    /// Frequencies acceptable as sources if `requested` has no files,
    /// in the order they should be tried.
    pub fallback_order: Vec<Frequency>,
}

impl FrequencyRequest {
    pub fn new<S: ToString>(variable: S, requested: Frequency, fallback_order: Vec<Frequency>) -> Self {
        Self {
            variable: variable.to_string(),
            requested,
            fallback_order,
        }
    }

    /// The frequencies to search, in order: the request itself, then the
    /// fallbacks. A request for `fx` only ever searches `fx`.
    pub fn search_order(&self) -> Vec<Frequency> {
        if !self.requested.is_time_series() {
            return vec![self.requested];
        }

        let mut order = vec![self.requested];
        for &freq in self.fallback_order.iter() {
            if freq.is_time_series() && !order.contains(&freq) {
                order.push(freq);
            }
        }
        order
    }
}

/// What to do with files found at `matched` frequency for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyDecision {
    /// Native frequency is the requested one; only spatial subsetting happens.
    PassThrough { freq: Frequency },
    /// Native frequency is finer than requested; coarsen `source` to `target`.
    Aggregate { source: Frequency, target: Frequency },
    /// Native frequency is coarser than requested. Finer data are never
    /// fabricated, so the file is passed through at its native frequency.
    RefuseUpsample {
        requested: Frequency,
        native: Frequency,
    },
}

impl FrequencyDecision {
    pub fn decide(requested: Frequency, matched: Frequency) -> Result<Self, SelectionError> {
        match matched.compare_resolution(&requested) {
            Some(Ordering::Equal) => Ok(Self::PassThrough { freq: matched }),
            Some(Ordering::Less) => Ok(Self::Aggregate {
                source: matched,
                target: requested,
            }),
            Some(Ordering::Greater) => Ok(Self::RefuseUpsample {
                requested,
                native: matched,
            }),
            None => Err(SelectionError::Incomparable { requested, matched }),
        }
    }

    /// The native frequency of the files this decision applies to.
    pub fn source_freq(&self) -> Frequency {
        match self {
            Self::PassThrough { freq } => *freq,
            Self::Aggregate { source, .. } => *source,
            Self::RefuseUpsample { native, .. } => *native,
        }
    }

    /// The frequency actually written, which also goes in the output file name.
    pub fn effective_freq(&self) -> Frequency {
        match self {
            Self::PassThrough { freq } => *freq,
            Self::Aggregate { target, .. } => *target,
            Self::RefuseUpsample { native, .. } => *native,
        }
    }

    /// `true` only when temporal aggregation will run.
    pub fn derived(&self) -> bool {
        matches!(self, Self::Aggregate { .. })
    }

    /// `true` when the matched frequency differs from the request.
    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::PassThrough { .. })
    }
}

/// The result of a successful search: the decision and the files found.
#[derive(Debug, Clone)]
pub struct FrequencySelection<T> {
    pub decision: FrequencyDecision,
    pub files: Vec<T>,
}

/// Walk the search order of `request`, calling `find` for each frequency, and
/// return the first frequency that has files. `None` means no data exist for
/// any acceptable frequency.
pub fn select_frequency<T, F>(
    request: &FrequencyRequest,
    mut find: F,
) -> Result<Option<FrequencySelection<T>>, SelectionError>
where
    F: FnMut(Frequency) -> Vec<T>,
{
    for freq in request.search_order() {
        let files = find(freq);
        if files.is_empty() {
            log::debug!(
                "No {} files found for variable {}",
                freq,
                request.variable
            );
            continue;
        }

        let decision = FrequencyDecision::decide(request.requested, freq)?;
        match decision {
            FrequencyDecision::PassThrough { .. } => {}
            FrequencyDecision::Aggregate { source, target } => log::info!(
                "Variable {}: no {target} files, deriving from {} {source} files",
                request.variable,
                files.len()
            ),
            FrequencyDecision::RefuseUpsample { requested, native } => log::warn!(
                "Variable {}: no {requested} files and no finer source, will process {} {native} files at native frequency",
                request.variable,
                files.len()
            ),
        }
        return Ok(Some(FrequencySelection { decision, files }));
    }

    Ok(None)
}
