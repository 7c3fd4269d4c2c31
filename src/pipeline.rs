//! The curation driver: for every configured variable, find its files,
//! decide what to do with them and write the outputs.
//!
//! Files are processed one at a time. A file that fails is recorded in the
//! [`RunSummary`] and the run carries on with the next one.
use std::fmt::Display;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use error_stack::{FrameKind, Report, ResultExt};
use tabled::Tabled;

use crate::aggregation::aggregate;
use crate::cell_methods::CellMethodContract;
use crate::config::CurationConfig;
use crate::discovery::{FileFinder, FileRecord};
use crate::frequency::Frequency;
use crate::metadata::{holds_variable, read_time_range, read_variable_name, time_range_from_filename, TimeRange};
use crate::naming::{output_filename, OutputPlacement};
use crate::pattern::PatternError;
use crate::selection::{select_frequency, FrequencyDecision, FrequencyRequest};
use crate::store::{partial_path, DatasetStore, ScratchFile};
use crate::subset::SpatialSubset;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid search or output pattern")]
    Pattern,
    #[error("Could not determine the time range of {}", .0.display())]
    TimeRange(PathBuf),
    #[error("Could not build the output path")]
    OutputPath,
    #[error("Could not prepare {}", .0.display())]
    Prepare(PathBuf),
    #[error("Spatial subset of {} failed", .0.display())]
    Subset(PathBuf),
    #[error("Could not read {}", .0.display())]
    Read(PathBuf),
    #[error("{} holds {found}, not {expected}", path.display())]
    WrongVariable {
        path: PathBuf,
        expected: String,
        found: String,
    },
    #[error("Aggregation failed")]
    Aggregate,
    #[error("Could not write {}", .0.display())]
    Write(PathBuf),
}

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Written(PathBuf),
    /// The output already existed and overwriting is off.
    Skipped(PathBuf),
    /// Dry run: this output would have been written.
    Planned(PathBuf),
    Failed(String),
}

impl Display for FileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOutcome::Written(p) => write!(f, "written to {}", p.display()),
            FileOutcome::Skipped(p) => write!(f, "skipped, {} exists", p.display()),
            FileOutcome::Planned(p) => write!(f, "would write {}", p.display()),
            FileOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub input: PathBuf,
    pub variable: String,
    pub decision: FrequencyDecision,
    pub outcome: FileOutcome,
}

impl Tabled for FileReport {
    const LENGTH: usize = 5;

    fn fields(&self) -> Vec<std::borrow::Cow<'_, str>> {
        let reason = match &self.outcome {
            FileOutcome::Failed(r) => r.as_str(),
            _ => "",
        };
        vec![
            self.variable.as_str().into(),
            self.decision.source_freq().to_string().into(),
            self.decision.effective_freq().to_string().into(),
            self.input.display().to_string().into(),
            reason.into(),
        ]
    }

    fn headers() -> Vec<std::borrow::Cow<'static, str>> {
        vec![
            "variable".into(),
            "source".into(),
            "target".into(),
            "input file".into(),
            "reason".into(),
        ]
    }
}

/// Everything a run did, for the end-of-run report.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started: DateTime<Local>,
    pub finished: Option<DateTime<Local>>,
    pub files: Vec<FileReport>,
    /// Requests for which no acceptable frequency had any files.
    pub no_data: Vec<(String, Frequency)>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            started: Local::now(),
            finished: None,
            files: vec![],
            no_data: vec![],
        }
    }
}

impl RunSummary {
    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn n_written(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Written(_)))
    }

    pub fn n_skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped(_)))
    }

    pub fn n_planned(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Planned(_)))
    }

    pub fn n_failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files
            .iter()
            .filter(|r| matches!(r.outcome, FileOutcome::Failed(_)))
    }

    /// Table of failed files, empty string if none failed.
    pub fn failure_table(&self) -> String {
        let failures: Vec<&FileReport> = self.failures().collect();
        if failures.is_empty() {
            return String::new();
        }
        let mut table = tabled::Table::new(failures);
        table
            .with(tabled::settings::Style::psql())
            .with(tabled::settings::Alignment::left());
        table.to_string()
    }
}

impl Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} written, {} skipped, {} planned, {} failed",
            self.n_written(),
            self.n_skipped(),
            self.n_planned(),
            self.n_failed()
        )?;
        if let Some(end) = self.finished {
            writeln!(f, "Run took {} s", (end - self.started).num_seconds())?;
        }
        for (var, freq) in self.no_data.iter() {
            writeln!(f, "No data found for {var} at {freq} or any fallback frequency")?;
        }
        let table = self.failure_table();
        if !table.is_empty() {
            writeln!(f, "\nFailed files:\n{table}")?;
        }
        Ok(())
    }
}

/// Drives a whole run over a store and a subsetter.
pub struct Pipeline<'a> {
    config: &'a CurationConfig,
    store: &'a dyn DatasetStore,
    subsetter: &'a dyn SpatialSubset,
    finder: FileFinder,
    placement: OutputPlacement,
    contract: CellMethodContract,
    dry_run: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a CurationConfig,
        store: &'a dyn DatasetStore,
        subsetter: &'a dyn SpatialSubset,
    ) -> error_stack::Result<Self, PipelineError> {
        let finder = FileFinder::new(
            &config.input_root,
            &config.domain,
            &config.path_patterns,
            &config.file_pattern,
        )
        .change_context(PipelineError::Pattern)?;
        let placement = OutputPlacement::new(&config.output_root, &config.output_layout, config.region())
            .change_context(PipelineError::Pattern)?;
        Ok(Self {
            config,
            store,
            subsetter,
            finder,
            placement,
            contract: config.contract(),
            dry_run: false,
        })
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Process every configured request.
    pub fn run(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for request in self.config.requests() {
            self.run_request(&request, &mut summary);
        }
        summary.finished = Some(Local::now());
        summary
    }

    fn keep_scenario(&self, rec: &FileRecord) -> bool {
        self.config.scenarios.is_empty() || self.config.scenarios.contains(&rec.meta.scenario)
    }

    fn find(&self, variable: &str, freq: Frequency) -> Vec<FileRecord> {
        match self.finder.find(variable, freq) {
            Ok(records) => records.into_iter().filter(|r| self.keep_scenario(r)).collect(),
            Err(e) => {
                log::error!("Error searching for {variable} at {freq}: {e:?}");
                vec![]
            }
        }
    }

    pub fn run_request(&self, request: &FrequencyRequest, summary: &mut RunSummary) {
        log::info!(
            "Processing {} at {} (fallbacks: {})",
            request.variable,
            request.requested,
            itertools::join(request.search_order().iter().skip(1), ", ")
        );
        let selection = match select_frequency(request, |freq| self.find(&request.variable, freq)) {
            Ok(Some(sel)) => sel,
            Ok(None) => {
                log::warn!(
                    "No files found for {} at {} or any fallback frequency, skipping it",
                    request.variable,
                    request.requested
                );
                summary.no_data.push((request.variable.clone(), request.requested));
                return;
            }
            Err(e) => {
                log::error!("Cannot process {}: {e}", request.variable);
                summary.no_data.push((request.variable.clone(), request.requested));
                return;
            }
        };

        for record in selection.files.iter() {
            let outcome = match self.process_file(&request.variable, &selection.decision, record) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::error!(
                        "Failed to process {} (variable {}, {} -> {}): {e:?}",
                        record.path.display(),
                        request.variable,
                        selection.decision.source_freq(),
                        selection.decision.effective_freq()
                    );
                    FileOutcome::Failed(report_reason(&e))
                }
            };
            summary.files.push(FileReport {
                input: record.path.clone(),
                variable: request.variable.clone(),
                decision: selection.decision,
                outcome,
            });
        }
    }

    /// The time range for the output name, from the file name if allowed,
    /// otherwise from the time coordinate. Time-invariant files have none.
    fn time_range(
        &self,
        path: &Path,
        decision: &FrequencyDecision,
    ) -> error_stack::Result<Option<TimeRange>, PipelineError> {
        if !decision.source_freq().is_time_series() {
            return Ok(None);
        }
        if self.config.time_range_from_filename {
            if let Some(range) = time_range_from_filename(path) {
                return Ok(Some(range));
            }
        }
        let range = read_time_range(self.store, path)
            .change_context_lazy(|| PipelineError::TimeRange(path.to_path_buf()))?;
        Ok(Some(range))
    }

    pub fn output_path(
        &self,
        variable: &str,
        decision: &FrequencyDecision,
        record: &FileRecord,
        range: Option<&TimeRange>,
    ) -> Result<PathBuf, PatternError> {
        let freq = decision.effective_freq();
        let filename = output_filename(variable, self.config.region(), &record.meta, freq, range);
        self.placement.path(variable, &record.meta, freq, &filename)
    }

    pub fn process_file(
        &self,
        variable: &str,
        decision: &FrequencyDecision,
        record: &FileRecord,
    ) -> error_stack::Result<FileOutcome, PipelineError> {
        let input = record.path.as_path();
        let range = self.time_range(input, decision)?;
        let out_path = self
            .output_path(variable, decision, record, range.as_ref())
            .change_context(PipelineError::OutputPath)?;

        if self.store.exists(&out_path) && !self.config.overwrite {
            log::info!("{} exists, skipping {}", out_path.display(), input.display());
            return Ok(FileOutcome::Skipped(out_path));
        }

        if self.dry_run {
            log::info!(
                "Would {} {} -> {}",
                describe(decision),
                input.display(),
                out_path.display()
            );
            return Ok(FileOutcome::Planned(out_path));
        }

        self.check_variable(variable, input)?;
        self.store
            .ensure_parent_dir(&out_path)
            .change_context_lazy(|| PipelineError::Prepare(out_path.clone()))?;

        match *decision {
            FrequencyDecision::PassThrough { .. } | FrequencyDecision::RefuseUpsample { .. } => {
                self.pass_through(input, &out_path)?
            }
            FrequencyDecision::Aggregate { source, target } => {
                self.aggregate_file(variable, input, &out_path, source, target)?
            }
        }

        log::info!("Wrote {} from {}", out_path.display(), input.display());
        Ok(FileOutcome::Written(out_path))
    }

    /// Fail unless the data variable in `input` is `variable` or a name it
    /// resolves to.
    fn check_variable(&self, variable: &str, input: &Path) -> error_stack::Result<(), PipelineError> {
        let found = read_variable_name(self.store, input)
            .change_context_lazy(|| PipelineError::Read(input.to_path_buf()))?;
        if !holds_variable(&found, variable) {
            return Err(PipelineError::WrongVariable {
                path: input.to_path_buf(),
                expected: variable.to_string(),
                found,
            }
            .into());
        }
        Ok(())
    }

    fn pass_through(&self, input: &Path, out_path: &Path) -> error_stack::Result<(), PipelineError> {
        let part = ScratchFile::new(partial_path(out_path), self.store);
        self.subsetter
            .subset(input, part.path())
            .change_context_lazy(|| PipelineError::Subset(input.to_path_buf()))?;
        self.store
            .rename(part.path(), out_path)
            .change_context_lazy(|| PipelineError::Write(out_path.to_path_buf()))?;
        Ok(())
    }

    fn aggregate_file(
        &self,
        variable: &str,
        input: &Path,
        out_path: &Path,
        source: Frequency,
        target: Frequency,
    ) -> error_stack::Result<(), PipelineError> {
        let stem = out_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| variable.to_string());
        let scratch_path = self.config.scratch_dir.join(format!("{stem}.subset.nc"));
        self.store
            .ensure_parent_dir(&scratch_path)
            .change_context_lazy(|| PipelineError::Prepare(scratch_path.clone()))?;
        let scratch = ScratchFile::new(scratch_path, self.store);

        self.subsetter
            .subset(input, scratch.path())
            .change_context_lazy(|| PipelineError::Subset(input.to_path_buf()))?;
        let ds = self
            .store
            .read_dataset(scratch.path())
            .change_context_lazy(|| PipelineError::Read(scratch.path().to_path_buf()))?;
        let aggregated = aggregate(
            variable,
            ds,
            source,
            target,
            &self.contract,
            self.config.cell_method_policy,
        )
        .change_context(PipelineError::Aggregate)
        .attach_printable_lazy(|| format!("input file: {}", input.display()))?;
        self.store
            .write_dataset(out_path, &aggregated.dataset, &aggregated.encoding)
            .change_context_lazy(|| PipelineError::Write(out_path.to_path_buf()))?;
        Ok(())
    }
}

fn describe(decision: &FrequencyDecision) -> String {
    match decision {
        FrequencyDecision::PassThrough { freq } => format!("subset {freq}"),
        FrequencyDecision::Aggregate { source, target } => format!("aggregate {source} to {target}"),
        FrequencyDecision::RefuseUpsample { requested, native } => {
            format!("subset {native} (requested {requested}, not upsampling)")
        }
    }
}

/// One line built from every context in the report, outermost first.
fn report_reason<C>(report: &Report<C>) -> String {
    report
        .frames()
        .filter_map(|frame| match frame.kind() {
            FrameKind::Context(ctx) => Some(ctx.to_string()),
            FrameKind::Attachment(_) => None,
        })
        .collect::<Vec<_>>()
        .join(": ")
}
