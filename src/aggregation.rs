//! Temporal aggregation of a dataset from a finer to a coarser frequency.
//!
//! The operator is chosen from the variable name and its declared
//! `cell_methods` by [`select_operator`]; [`aggregate`] then checks the
//! cell method contract, resamples every time-dependent variable over fixed
//! windows aligned to midnight, and prepares the fill value encoding for
//! writing.
use error_stack::{Report, ResultExt};
use ndarray::{ArrayD, ArrayView1, Axis, IxDyn};

use crate::cell_methods::{CellMethodContract, CellMethodMismatch, CellMethodPolicy, CellMethods, TimeMethod};
use crate::dataset::{Dataset, FillEncoding};
use crate::error::TimeError;
use crate::frequency::Frequency;
use crate::metadata::resolve_variable;
use crate::nc_utils::{NcArray, NcKind};
use crate::time::TimeAxis;

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("Variable '{0}' not found under any of its accepted names")]
    VariableNotFound(String),
    #[error("Aggregation of {variable} from {from} to {to} is not implemented")]
    NotImplemented {
        variable: String,
        from: Frequency,
        to: Frequency,
    },
    #[error("Cannot aggregate {variable} from {from} to {to}: unsupported cell_methods '{cell_methods}'")]
    UnsupportedCellMethod {
        variable: String,
        cell_methods: String,
        from: Frequency,
        to: Frequency,
    },
    #[error("{0}")]
    CellMethodMismatch(CellMethodMismatch),
    #[error("Could not resample along the time coordinate")]
    TimeCoordinate,
}

/// How the values inside one output window are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Operator {
    Identity,
    Mean,
    Minimum,
    Maximum,
    /// The sample at the start of the window, for instantaneous values.
    Subsample,
}

impl Operator {
    pub fn is_reduction(&self) -> bool {
        matches!(self, Self::Mean | Self::Minimum | Self::Maximum)
    }

    /// The `time:` cell method that describes data after this operator.
    fn resulting_time_method(&self) -> Option<TimeMethod> {
        match self {
            Self::Mean => Some(TimeMethod::Mean),
            Self::Minimum => Some(TimeMethod::Minimum),
            Self::Maximum => Some(TimeMethod::Maximum),
            Self::Identity | Self::Subsample => None,
        }
    }
}

/// Which operator takes a variable from one frequency to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationPlan {
    pub source_freq: Frequency,
    pub target_freq: Frequency,
    pub operator: Operator,
    pub derived: bool,
}

impl AggregationPlan {
    pub fn new(
        variable: &str,
        cell_methods: &CellMethods,
        source_freq: Frequency,
        target_freq: Frequency,
    ) -> Result<Self, AggregateError> {
        let operator = select_operator(variable, cell_methods, source_freq, target_freq)?;
        Ok(Self {
            source_freq,
            target_freq,
            operator,
            derived: operator != Operator::Identity,
        })
    }
}

/// Choose the operator for `variable` going from `source` to `target`.
///
/// Daily targets accept any sub-daily source; name rules (`tasmin`,
/// `tasmax`, `snd`, `snw`, `mrro`) come before the cell method. 3 and 6
/// hourly targets take instantaneous data by subsampling and time means by
/// averaging. Everything else is refused rather than guessed.
pub fn select_operator(
    variable: &str,
    cell_methods: &CellMethods,
    source: Frequency,
    target: Frequency,
) -> Result<Operator, AggregateError> {
    if source == target {
        return Ok(Operator::Identity);
    }

    let not_implemented = || AggregateError::NotImplemented {
        variable: variable.to_string(),
        from: source,
        to: target,
    };

    if !source.is_finer_than(&target) {
        return Err(not_implemented());
    }

    match target {
        Frequency::Daily => {
            let by_name = match variable {
                "tasmin" => Some(Operator::Minimum),
                "tasmax" => Some(Operator::Maximum),
                "snd" | "snw" | "mrro" => Some(Operator::Mean),
                _ => None,
            };
            if let Some(op) = by_name {
                return Ok(op);
            }
            match cell_methods.time_method() {
                Some(TimeMethod::Minimum) => Ok(Operator::Minimum),
                Some(TimeMethod::Maximum) => Ok(Operator::Maximum),
                Some(TimeMethod::Mean) => Ok(Operator::Mean),
                _ => Err(not_implemented()),
            }
        }
        Frequency::ThreeHourly | Frequency::SixHourly => {
            if cell_methods.is_instantaneous() {
                Ok(Operator::Subsample)
            } else if cell_methods.has_time_method(&TimeMethod::Mean) {
                Ok(Operator::Mean)
            } else {
                Err(AggregateError::UnsupportedCellMethod {
                    variable: variable.to_string(),
                    cell_methods: cell_methods.raw().to_string(),
                    from: source,
                    to: target,
                })
            }
        }
        Frequency::Hourly | Frequency::Fixed => Err(not_implemented()),
    }
}

/// The result of [`aggregate`], ready to hand to a store.
#[derive(Debug, Clone)]
pub struct Aggregated {
    pub dataset: Dataset,
    pub encoding: FillEncoding,
    pub plan: AggregationPlan,
}

/// Aggregate `variable` in `ds` from `source` to `target` frequency.
///
/// If the variable is stored under another accepted name it is renamed to
/// `variable` first. The global `frequency` attribute is set to `target`.
pub fn aggregate(
    variable: &str,
    mut ds: Dataset,
    source: Frequency,
    target: Frequency,
    contract: &CellMethodContract,
    policy: CellMethodPolicy,
) -> error_stack::Result<Aggregated, AggregateError> {
    let resolved = resolve_variable(&ds.header(), variable)
        .ok_or_else(|| AggregateError::VariableNotFound(variable.to_string()))?;
    if resolved.needs_rename(variable) {
        log::info!(
            "Variable {variable} is stored as {} ({:?}), renaming it",
            resolved.found,
            resolved.strategy
        );
        ds.rename_variable(&resolved.found, variable);
    }

    let cell_methods = ds
        .variable(variable)
        .map(|v| v.cell_methods())
        .unwrap_or_default();
    let plan = AggregationPlan::new(variable, &cell_methods, source, target)?;

    if plan.derived {
        if let Some(mismatch) = contract.check(variable, &cell_methods) {
            match policy {
                CellMethodPolicy::Strict => {
                    return Err(Report::new(AggregateError::CellMethodMismatch(mismatch)));
                }
                CellMethodPolicy::Warn => {
                    log::warn!("{mismatch}; computing the {} anyway", plan.operator);
                }
            }
        }
        log::debug!(
            "Aggregating {variable} from {source} to {target} with operator {}",
            plan.operator
        );
    }

    let encoding = FillEncoding::for_primary(&ds, variable);
    if plan.derived {
        resample(&mut ds, variable, &plan, &encoding)?;
    }
    for (name, var) in ds.variables.iter_mut() {
        var.fill_value = encoding.fill_for(name);
    }
    ds.set_attr("frequency", target.to_string());

    Ok(Aggregated {
        dataset: ds,
        encoding,
        plan,
    })
}

/// Output windows over a time axis, in seconds since the axis reference.
#[derive(Debug, Clone, PartialEq)]
struct TimeWindows {
    step: i64,
    starts: Vec<i64>,
    members: Vec<Vec<usize>>,
    /// The input index whose time equals the window start, if any.
    at_start: Vec<Option<usize>>,
}

impl TimeWindows {
    fn build(axis: &TimeAxis, step: i64) -> Result<Self, TimeError> {
        let sod = axis.reference_second_of_day();
        let seconds = axis
            .values
            .iter()
            .map(|&v| axis.value_to_seconds(v))
            .collect::<Result<Vec<_>, _>>()?;
        let window_of = |s: i64| (s + sod).div_euclid(step);
        let window_ids: Vec<i64> = seconds.iter().map(|&s| window_of(s)).collect();

        let (Some(&wmin), Some(&wmax)) = (window_ids.iter().min(), window_ids.iter().max()) else {
            return Ok(Self {
                step,
                starts: vec![],
                members: vec![],
                at_start: vec![],
            });
        };

        // Windows are coarser than the samples, so a sound axis never has
        // more windows than samples.
        let n_windows = wmax - wmin + 1;
        if n_windows > seconds.len() as i64 + 1 {
            return Err(TimeError::TooManyWindows {
                windows: n_windows,
                step,
                samples: seconds.len(),
            });
        }

        let n = n_windows as usize;
        let starts: Vec<i64> = (0..n).map(|k| (wmin + k as i64) * step - sod).collect();
        let mut members = vec![vec![]; n];
        let mut at_start = vec![None; n];
        for (i, (&s, &w)) in seconds.iter().zip(window_ids.iter()).enumerate() {
            let k = (w - wmin) as usize;
            members[k].push(i);
            if s == starts[k] && at_start[k].is_none() {
                at_start[k] = Some(i);
            }
        }

        Ok(Self {
            step,
            starts,
            members,
            at_start,
        })
    }

    fn len(&self) -> usize {
        self.starts.len()
    }

    fn first_members(&self) -> Vec<Option<usize>> {
        self.members.iter().map(|m| m.first().copied()).collect()
    }
}

fn resample(
    ds: &mut Dataset,
    variable: &str,
    plan: &AggregationPlan,
    encoding: &FillEncoding,
) -> error_stack::Result<(), AggregateError> {
    let step = plan
        .target_freq
        .step_seconds()
        .ok_or_else(|| AggregateError::NotImplemented {
            variable: variable.to_string(),
            from: plan.source_freq,
            to: plan.target_freq,
        })?;
    let time_name = ds
        .time_dim_name()
        .ok_or(AggregateError::TimeCoordinate)
        .attach_printable("the dataset has no time dimension")?;
    let axis = ds
        .time_axis()
        .change_context(AggregateError::TimeCoordinate)?;
    let windows = TimeWindows::build(&axis, step).change_context(AggregateError::TimeCoordinate)?;
    let bounds_name = ds
        .variable(&time_name)
        .and_then(|v| v.attr_str("bounds"))
        .map(|s| s.to_string());

    for (name, var) in ds.variables.iter_mut() {
        let Some(t_axis) = var.axis_of(&time_name) else {
            continue;
        };

        if *name == time_name {
            var.data = window_start_values(&var.data, &axis, &windows);
        } else if bounds_name.as_deref() == Some(name.as_str()) {
            var.data = if plan.operator.is_reduction() && t_axis == 0 && var.dims.len() == 2 {
                window_edge_values(&var.data, &axis, &windows)
            } else {
                var.data.select_along(t_axis, &windows.at_start, None)
            };
        } else {
            let missing = var.missing_values();
            var.data = resample_array(
                &var.data,
                t_axis,
                &windows,
                plan.operator,
                &missing,
                encoding.fill_for(name),
            );
            if name == variable {
                if let Some(method) = plan.operator.resulting_time_method() {
                    let updated = var.cell_methods().with_time_method(&method);
                    var.attrs.insert("cell_methods".to_string(), updated.into());
                }
            }
        }
    }

    ds.dims.insert(time_name, windows.len());
    Ok(())
}

/// Integer time coordinates are promoted to doubles when a window start does
/// not fall on a whole unit.
fn time_kind(data: &NcArray, values: &[f64]) -> NcKind {
    let kind = data.kind();
    if kind.is_integer() && values.iter().any(|v| v.fract() != 0.0) {
        NcKind::F64
    } else {
        kind
    }
}

fn window_start_values(data: &NcArray, axis: &TimeAxis, windows: &TimeWindows) -> NcArray {
    let values: Vec<f64> = windows
        .starts
        .iter()
        .map(|&s| axis.seconds_to_value(s))
        .collect();
    let kind = time_kind(data, &values);
    let arr = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values)
        .expect("window start array has the right shape");
    NcArray::from_f64(kind, arr, None)
}

fn window_edge_values(data: &NcArray, axis: &TimeAxis, windows: &TimeWindows) -> NcArray {
    let values: Vec<f64> = windows
        .starts
        .iter()
        .flat_map(|&s| [axis.seconds_to_value(s), axis.seconds_to_value(s + windows.step)])
        .collect();
    let kind = time_kind(data, &values);
    let arr = ArrayD::from_shape_vec(IxDyn(&[windows.len(), 2]), values)
        .expect("window edge array has the right shape");
    NcArray::from_f64(kind, arr, None)
}

fn resample_array(
    data: &NcArray,
    axis: usize,
    windows: &TimeWindows,
    op: Operator,
    missing: &[f64],
    fill: Option<f64>,
) -> NcArray {
    if !op.is_reduction() {
        return match data.to_masked_f64(missing) {
            Some(values) => NcArray::from_f64(
                data.kind(),
                pick_windows(&values, axis, &windows.at_start),
                fill,
            ),
            None => data.select_along(axis, &windows.at_start, fill),
        };
    }

    match data.to_masked_f64(missing) {
        Some(values) => {
            let reduced = reduce_windows(&values, axis, &windows.members, op);
            NcArray::from_f64(data.kind(), reduced, fill)
        }
        // Character data cannot be reduced; keep the first sample.
        None => data.select_along(axis, &windows.first_members(), fill),
    }
}

fn pick_windows(values: &ArrayD<f64>, axis: usize, indices: &[Option<usize>]) -> ArrayD<f64> {
    let mut shape = values.shape().to_vec();
    shape[axis] = indices.len();
    let mut out = ArrayD::from_elem(shape, f64::NAN);
    for (iw, idx) in indices.iter().enumerate() {
        if let Some(i) = idx {
            out.index_axis_mut(Axis(axis), iw)
                .assign(&values.index_axis(Axis(axis), *i));
        }
    }
    out
}

fn reduce_windows(values: &ArrayD<f64>, axis: usize, members: &[Vec<usize>], op: Operator) -> ArrayD<f64> {
    let mut shape = values.shape().to_vec();
    shape[axis] = members.len();
    let mut out = ArrayD::from_elem(shape, f64::NAN);
    for (iw, idx) in members.iter().enumerate() {
        if idx.is_empty() {
            continue;
        }
        let slab = values.select(Axis(axis), idx);
        let reduced = slab.map_axis(Axis(axis), |lane| reduce_lane(lane, op));
        out.index_axis_mut(Axis(axis), iw).assign(&reduced);
    }
    out
}

/// Reduce one window, ignoring NaN. All-NaN windows give NaN.
fn reduce_lane(lane: ArrayView1<f64>, op: Operator) -> f64 {
    let mut valid = lane.iter().copied().filter(|v| !v.is_nan());
    match op {
        Operator::Mean => {
            let (sum, n) = valid.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 {
                f64::NAN
            } else {
                sum / n as f64
            }
        }
        Operator::Minimum => match valid.next() {
            Some(first) => valid.fold(first, f64::min),
            None => f64::NAN,
        },
        Operator::Maximum => match valid.next() {
            Some(first) => valid.fold(first, f64::max),
            None => f64::NAN,
        },
        Operator::Identity | Operator::Subsample => {
            unreachable!("reduce_lane is only called for reductions")
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    use super::*;
    use crate::dataset::{AttrValue, Variable, DEFAULT_FILL_VALUE};
    use crate::test_utils::{hourly_dataset, primary_values, time_values};

    const F1: Frequency = Frequency::Hourly;
    const F3: Frequency = Frequency::ThreeHourly;
    const F6: Frequency = Frequency::SixHourly;
    const FD: Frequency = Frequency::Daily;
    const FX: Frequency = Frequency::Fixed;

    #[rstest]
    #[case("tas", "time: point", F1, F1, Ok(Operator::Identity))]
    #[case("tasmin", "time: minimum", F1, FD, Ok(Operator::Minimum))]
    #[case("tasmin", "time: point", F3, FD, Ok(Operator::Minimum))]
    #[case("tasmax", "time: maximum", F1, FD, Ok(Operator::Maximum))]
    #[case("tasmax", "time: point", F6, FD, Ok(Operator::Maximum))]
    #[case("snd", "time: point", F1, FD, Ok(Operator::Mean))]
    #[case("snw", "", F3, FD, Ok(Operator::Mean))]
    #[case("mrro", "time: mean", F1, FD, Ok(Operator::Mean))]
    #[case("pr", "time: mean", F1, FD, Ok(Operator::Mean))]
    #[case("tas", "time: maximum", F1, FD, Ok(Operator::Maximum))]
    #[case("tas", "time: minimum", F1, FD, Ok(Operator::Minimum))]
    #[case("tas", "time: point", F1, FD, Err("not implemented"))]
    #[case("tas", "time: point", F1, F3, Ok(Operator::Subsample))]
    #[case("tas", "time:point", F1, F6, Ok(Operator::Subsample))]
    #[case("hus850", "lev: mean", F1, F6, Ok(Operator::Subsample))]
    #[case("tas", "time: point", F3, F6, Ok(Operator::Subsample))]
    #[case("pr", "time: mean", F1, F3, Ok(Operator::Mean))]
    #[case("pr", "time: mean", F3, F6, Ok(Operator::Mean))]
    #[case("tasmax", "time: maximum", F1, F6, Err("unsupported"))]
    #[case("pr", "time: sum", F1, F3, Err("unsupported"))]
    #[case("pr", "", F1, F3, Err("unsupported"))]
    #[case("tas", "time: point", F3, F1, Err("not implemented"))]
    #[case("tas", "time: point", FD, F6, Err("not implemented"))]
    #[case("orog", "", FX, FD, Err("not implemented"))]
    #[case("tas", "time: point", F1, FX, Err("not implemented"))]
    fn test_select_operator(
        #[case] variable: &str,
        #[case] cell_methods: &str,
        #[case] source: Frequency,
        #[case] target: Frequency,
        #[case] expected: Result<Operator, &str>,
    ) {
        let got = select_operator(variable, &CellMethods::parse(cell_methods), source, target);
        match (got, expected) {
            (Ok(op), Ok(exp)) => assert_eq!(op, exp),
            (Err(AggregateError::NotImplemented { .. }), Err("not implemented")) => {}
            (Err(AggregateError::UnsupportedCellMethod { .. }), Err("unsupported")) => {}
            (got, exp) => panic!("expected {exp:?}, got {got:?}"),
        }
    }

    #[test]
    fn test_plan_derived_flag() {
        let cm = CellMethods::parse("time: mean");
        assert!(!AggregationPlan::new("pr", &cm, FD, FD).unwrap().derived);
        let plan = AggregationPlan::new("pr", &cm, F1, FD).unwrap();
        assert!(plan.derived);
        assert_eq!(plan.operator, Operator::Mean);
    }

    #[test]
    fn test_windows_aligned_to_midnight() {
        // Reference at 12:00, so the first sample (value 0) is noon.
        let axis = TimeAxis::new(
            (0..30).map(|h| h as f64).collect(),
            "hours since 2000-01-01 12:00:00",
            None,
        )
        .unwrap();
        let windows = TimeWindows::build(&axis, 86_400).unwrap();
        assert_eq!(windows.len(), 2);
        assert_eq!(windows.starts, vec![-12 * 3600, 12 * 3600]);
        assert_eq!(windows.members[0], (0..12).collect::<Vec<_>>());
        assert_eq!(windows.members[1], (12..30).collect::<Vec<_>>());
        assert_eq!(windows.at_start, vec![None, Some(12)]);
    }

    #[test]
    fn test_windows_with_gap() {
        let axis = TimeAxis::new(vec![0.0, 1.0, 7.0], "hours since 2000-01-01", None).unwrap();
        let windows = TimeWindows::build(&axis, 3 * 3600).unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows.members, vec![vec![0, 1], vec![], vec![2]]);
        assert_eq!(windows.at_start, vec![Some(0), None, None]);
    }

    #[test]
    fn test_daily_maximum() {
        let ds = hourly_dataset("tasmax", "time: maximum", 48);
        let out = aggregate("tasmax", ds, F1, FD, &CellMethodContract::default(), CellMethodPolicy::Strict).unwrap();
        assert_eq!(out.plan.operator, Operator::Maximum);
        assert_eq!(primary_values(&out.dataset, "tasmax"), vec![23.0, 47.0]);
        assert_eq!(time_values(&out.dataset), vec![0.0, 24.0]);
        assert_eq!(out.dataset.dims["time"], 2);
        assert_eq!(
            out.dataset.attrs.get("frequency"),
            Some(&AttrValue::Str("day".to_string()))
        );
    }

    #[test]
    fn test_daily_mean_updates_cell_methods_and_bounds() {
        let mut ds = hourly_dataset("pr", "time: mean", 48);
        add_time_bounds(&mut ds);
        let out = aggregate("pr", ds, F1, FD, &CellMethodContract::default(), CellMethodPolicy::Strict).unwrap();
        let values = primary_values(&out.dataset, "pr");
        assert_abs_diff_eq!(values[0], 11.5, epsilon = 1e-6);
        assert_abs_diff_eq!(values[1], 35.5, epsilon = 1e-6);
        assert_eq!(out.dataset.variables["pr"].attr_str("cell_methods"), Some("time: mean"));

        let bnds = out.dataset.variables["time_bnds"].data.to_masked_f64(&[]).unwrap();
        assert_eq!(bnds.shape(), &[2, 2]);
        assert_eq!(bnds.iter().copied().collect::<Vec<_>>(), vec![0.0, 24.0, 24.0, 48.0]);
    }

    #[test]
    fn test_three_hourly_subsample() {
        let ds = hourly_dataset("tas", "time: point", 24);
        let out = aggregate("tas", ds, F1, F3, &CellMethodContract::default(), CellMethodPolicy::Strict).unwrap();
        assert_eq!(out.plan.operator, Operator::Subsample);
        assert_eq!(
            primary_values(&out.dataset, "tas"),
            vec![0.0, 3.0, 6.0, 9.0, 12.0, 15.0, 18.0, 21.0]
        );
        assert_eq!(out.dataset.variables["tas"].attr_str("cell_methods"), Some("time: point"));
    }

    #[test]
    fn test_six_hourly_mean() {
        let ds = hourly_dataset("pr", "time: mean", 12);
        let out = aggregate("pr", ds, F1, F6, &CellMethodContract::default(), CellMethodPolicy::Strict).unwrap();
        let values = primary_values(&out.dataset, "pr");
        assert_eq!(values.len(), 2);
        assert_abs_diff_eq!(values[0], 2.5, epsilon = 1e-6);
        assert_abs_diff_eq!(values[1], 8.5, epsilon = 1e-6);
    }

    #[test]
    fn test_missing_values_ignored_and_encoded() {
        let mut ds = hourly_dataset("pr", "time: mean", 6);
        {
            let var = ds.variables.get_mut("pr").unwrap();
            if let NcArray::F32(arr) = &mut var.data {
                // First window: only hour 1 is valid. Second window: all missing.
                for h in [0, 2, 3, 4, 5] {
                    arr.index_axis_mut(Axis(0), h).fill(DEFAULT_FILL_VALUE as f32);
                }
            }
        }
        let out = aggregate("pr", ds, F1, F3, &CellMethodContract::default(), CellMethodPolicy::Strict).unwrap();
        let raw = out.dataset.variables["pr"].data.to_masked_f64(&[]).unwrap();
        let firsts: Vec<f64> = raw.index_axis(Axis(0), 0).iter().copied().collect();
        assert!(firsts.iter().all(|&v| v == 1.0));
        let seconds: Vec<f64> = raw.index_axis(Axis(0), 1).iter().copied().collect();
        assert!(seconds.iter().all(|&v| v == DEFAULT_FILL_VALUE as f32 as f64));
        assert_eq!(out.encoding.fill_for("pr"), Some(DEFAULT_FILL_VALUE as f32 as f64));
    }

    #[test]
    fn test_only_primary_has_fill_value() {
        let mut ds = hourly_dataset("tas", "time: point", 6);
        ds.variables.get_mut("lat").unwrap().fill_value = Some(-999.0);
        ds.variables.get_mut("tas").unwrap().fill_value = None;
        let out = aggregate("tas", ds, F1, F3, &CellMethodContract::default(), CellMethodPolicy::Strict).unwrap();
        let with_fill: Vec<&str> = out
            .dataset
            .variables
            .iter()
            .filter(|(_, v)| v.fill_value.is_some())
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(with_fill, vec!["tas"]);
        assert_eq!(out.dataset.variables["tas"].fill_value, Some(DEFAULT_FILL_VALUE));
    }

    #[test]
    fn test_tasmax_point_strict_fails() {
        let ds = hourly_dataset("tasmax", "time: point", 48);
        let err = aggregate("tasmax", ds, F1, FD, &CellMethodContract::default(), CellMethodPolicy::Strict)
            .unwrap_err();
        match err.current_context() {
            AggregateError::CellMethodMismatch(m) => {
                assert_eq!(m.variable, "tasmax");
                assert_eq!(m.expected, TimeMethod::Maximum);
                assert_eq!(m.actual, "time: point");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_tasmax_point_warn_writes_maximum() {
        let ds = hourly_dataset("tasmax", "time: point", 48);
        let out = aggregate("tasmax", ds, F1, FD, &CellMethodContract::default(), CellMethodPolicy::Warn).unwrap();
        assert_eq!(out.plan.operator, Operator::Maximum);
        assert_eq!(primary_values(&out.dataset, "tasmax"), vec![23.0, 47.0]);
        assert_eq!(
            out.dataset.variables["tasmax"].attr_str("cell_methods"),
            Some("time: maximum")
        );
    }

    #[test]
    fn test_level_variable_renamed() {
        let ds = hourly_dataset("hus", "time: point", 12);
        let out = aggregate("hus850", ds, F1, F6, &CellMethodContract::default(), CellMethodPolicy::Strict).unwrap();
        assert!(out.dataset.variables.contains_key("hus850"));
        assert!(!out.dataset.variables.contains_key("hus"));
        assert_eq!(primary_values(&out.dataset, "hus850"), vec![0.0, 6.0]);
        assert_eq!(out.encoding.fill_for("hus850"), Some(DEFAULT_FILL_VALUE as f32 as f64));
        assert_eq!(out.dataset.header().primary_variable(), Some("hus850"));
    }

    #[test]
    fn test_variable_not_found() {
        let ds = hourly_dataset("tas", "time: point", 12);
        let err = aggregate("pr", ds, F1, F6, &CellMethodContract::default(), CellMethodPolicy::Strict)
            .unwrap_err();
        assert!(matches!(err.current_context(), AggregateError::VariableNotFound(v) if v == "pr"));
    }

    #[test]
    fn test_identity_only_stamps_frequency() {
        let ds = hourly_dataset("tas", "time: point", 5);
        let out = aggregate("tas", ds, F1, F1, &CellMethodContract::default(), CellMethodPolicy::Strict).unwrap();
        assert!(!out.plan.derived);
        assert_eq!(primary_values(&out.dataset, "tas"), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out.dataset.attrs["frequency"].as_str(), Some("1hr"));
    }

    fn set_time_value(ds: &mut Dataset, index: usize, value: f64) {
        if let NcArray::F64(arr) = &mut ds.variables.get_mut("time").unwrap().data {
            *arr.get_mut(IxDyn(&[index])).unwrap() = value;
        }
    }

    #[test]
    fn test_corrupt_time_value_fails_the_file() {
        // An unmasked 1e20 fill in the time coordinate.
        let mut ds = hourly_dataset("pr", "time: mean", 48);
        set_time_value(&mut ds, 3, 1.0e20);
        let err = aggregate("pr", ds, F1, FD, &CellMethodContract::default(), CellMethodPolicy::Strict)
            .unwrap_err();
        assert!(matches!(err.current_context(), AggregateError::TimeCoordinate));
    }

    #[test]
    fn test_time_axis_spanning_too_many_windows() {
        // Finite and in range, but 10000 days from the other samples.
        let mut ds = hourly_dataset("pr", "time: mean", 24);
        set_time_value(&mut ds, 23, 240_000.0);
        let err = aggregate("pr", ds, F1, FD, &CellMethodContract::default(), CellMethodPolicy::Strict)
            .unwrap_err();
        assert!(matches!(err.current_context(), AggregateError::TimeCoordinate));

        let axis = TimeAxis::new(vec![0.0, 1.0, 240_000.0], "hours since 2000-01-01", None).unwrap();
        assert!(matches!(
            TimeWindows::build(&axis, 86_400),
            Err(TimeError::TooManyWindows { samples: 3, .. })
        ));
    }

    fn add_time_bounds(ds: &mut Dataset) {
        let n = ds.dims["time"];
        ds.dims.insert("bnds".to_string(), 2);
        let values: Vec<f64> = (0..n).flat_map(|i| [i as f64, i as f64 + 1.0]).collect();
        let arr = ArrayD::from_shape_vec(IxDyn(&[n, 2]), values).unwrap();
        ds.variables.insert(
            "time_bnds".to_string(),
            Variable::new(&["time", "bnds"], NcArray::F64(arr)),
        );
        ds.variables
            .get_mut("time")
            .unwrap()
            .attrs
            .insert("bounds".to_string(), "time_bnds".into());
    }
}
