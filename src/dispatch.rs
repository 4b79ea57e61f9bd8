//! Drive a run: validate the request, resolve tests, then assemble and submit each mode's jobs
//! in dependency order
//!
//! Calling runs first. CNV reports wait for the calling job and read its output, SNV and mosaic
//! reports run independently, and aggregation waits for every report job. Configuration and
//! input problems stop the run before anything is submitted. Backend problems after that point
//! fail the run only when a downstream job depends on the job in question.

use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};

use crate::assemble::{Assembler, Assembly, JobInputPayload, Target};
use crate::backend::{ExecutionBackend, FileRef, JobRequest, JobState, Location};
use crate::config::document::{Scope, SearchSource};
use crate::config::{ModeTemplate, SearchField};
use crate::context::RunContext;
use crate::error::{BackendError, ConfigError, DispatchError};
use crate::exclusion::{Exclusion, Reason, Stage};
use crate::locate::{Located, LocatedFile, Locator};
use crate::manifest::dialect::Dialect;
use crate::manifest::normalize;
use crate::manifest::read::read_manifest;
use crate::mode::Mode;
use crate::panel::PanelIndex;
use crate::resolve::{report_groups, resolve_all, ReportGroup};
use crate::summary::RunSummary;

/// Run state machine
pub mod state;

pub use state::{Progress, RunState};

/// Label of run scoped jobs in the summary
static RUN_LABEL: &str = "run";

/// Run every requested mode and summarise what happened
///
/// Configuration and input errors are returned before anything is submitted. Backend failures
/// and missing shared inputs that stop the run are reported in the returned summary instead.
pub fn run(context: &RunContext, backend: &dyn ExecutionBackend) -> Result<RunSummary, DispatchError> {
    let mut dispatcher = Dispatcher::new(context, backend);
    validate(context)?;

    let groups = match context.request.modes.iter().any(Mode::is_report) {
        true => dispatcher.resolve()?,
        false => Vec::new(),
    };

    match dispatcher.launch(&groups) {
        Ok(()) => dispatcher.finish(),
        Err(err @ (DispatchError::Backend(_) | DispatchError::SharedInput { .. })) => dispatcher.fail(err),
        Err(err) => Err(err),
    }
}

/// Reject requests that can't work with this config
pub fn validate(context: &RunContext) -> Result<(), ConfigError> {
    let request = &context.request;
    let config = &context.config;
    let modes = &request.modes;

    if modes.is_empty() {
        return Err(ConfigError::NoModeEnabled);
    }
    for mode in modes {
        let template = config
            .template(*mode)
            .ok_or_else(|| ConfigError::ModeNotConfigured { mode: *mode, assay: config.assay_id() })?;
        let expected = match mode.is_report() {
            true => Scope::Sample,
            false => Scope::Run,
        };
        if template.scope != expected {
            return Err(ConfigError::Conflict(format!("{} must be configured with {:?} scope", mode, expected).to_lowercase()));
        }
    }

    if modes.contains(&Mode::CnvCall) && request.call_job.is_some() {
        return Err(ConfigError::Conflict("cnv_call was requested together with an existing calling job".to_string()));
    }
    if modes.contains(&Mode::CnvReports) && !modes.contains(&Mode::CnvCall) && request.call_job.is_none() {
        return Err(ConfigError::Conflict("cnv_reports needs cnv_call or an existing calling job".to_string()));
    }
    if request.call_job.is_some() && !modes.contains(&Mode::CnvReports) {
        warn!("Calling job given but cnv_reports wasn't requested, ignoring it");
    }

    for mode in modes.iter().filter(|mode| mode.is_report()) {
        if request.manifests.is_empty() {
            return Err(ConfigError::MissingManifest(*mode));
        }
        if request.panels.is_none() {
            return Err(ConfigError::MissingPanels(*mode));
        }
    }
    if modes.contains(&Mode::Aggregate) && !modes.iter().any(Mode::is_report) {
        return Err(ConfigError::Conflict("aggregate needs at least one report mode".to_string()));
    }
    if request.qc_file.is_some() && !modes.contains(&Mode::Aggregate) {
        warn!("QC file given but aggregate wasn't requested, ignoring it");
    }
    if !request.subset.is_empty() && !modes.iter().any(Mode::is_report) {
        warn!("Sample subset given but no report mode was requested, ignoring it");
    }

    info!("Request is valid: {}", modes.iter().map(Mode::key).collect::<Vec<_>>().join(", "));
    Ok(())
}

struct Dispatcher<'a> {
    context: &'a RunContext,
    backend: &'a dyn ExecutionBackend,
    progress: Progress,
    summary: RunSummary,
    /// calling job whose output CNV reports read
    call_job: Option<String>,
    report_jobs: Vec<String>,
}

impl<'a> Dispatcher<'a> {
    fn new(context: &'a RunContext, backend: &'a dyn ExecutionBackend) -> Dispatcher<'a> {
        let summary = RunSummary::new(&context.config.assay_id(), &context.run_folder, context.request.test_mode);
        Dispatcher {
            context,
            backend,
            progress: Progress::new(),
            summary,
            call_job: context.request.call_job.clone(),
            report_jobs: Vec::new(),
        }
    }

    /// Normalise manifests and resolve their tests into report groups
    fn resolve(&mut self) -> Result<Vec<ReportGroup>, DispatchError> {
        self.progress.advance(RunState::Resolving)?;
        let context = self.context;
        let request = &context.request;
        let config = &context.config;

        let manifests = request.manifests.iter().map(|path| read_manifest(path)).collect::<Result<Vec<_>, _>>()?;
        let mut normalized = normalize(&manifests, &config.dialects, &config.codes);
        if !request.subset.is_empty() {
            normalized.requests.retain_named(&request.subset).map_err(|unknown| ConfigError::UnknownSubset(unknown.join(", ")))?;
            info!("Subset keeps {} manifest sample(s)", normalized.requests.len());
        }
        if normalized.requests.is_empty() {
            warn!("No manifest sample has a usable request");
        }
        for rejected in normalized.rejected {
            self.summary.exclude(rejected.into_exclusion(Stage::Manifest));
        }

        let panels = request.panels.as_ref().ok_or(ConfigError::MissingPanels(Mode::SnvReports))?;
        let index = PanelIndex::load(panels, config.codes.clone())?;

        let mut resolution = resolve_all(&normalized.requests, &index, &request.excluded);
        for rejected in resolution.rejected.drain(..) {
            self.summary.exclude(rejected.into_exclusion(Stage::Resolve));
        }
        for exclusion in resolution.exclusions.drain(..) {
            self.summary.exclude(exclusion);
        }

        if let Some(limit) = request.limit {
            if resolution.samples.len() > limit {
                info!("Limiting run to the first {} of {} sample(s)", limit, resolution.samples.len());
                resolution.samples.truncate(limit);
            }
        }

        let groups = report_groups(&resolution, request.split_tests);
        info!("{} report group(s) from {} sample(s)", groups.len(), resolution.samples.len());
        Ok(groups)
    }

    fn launch(&mut self, groups: &[ReportGroup]) -> Result<(), DispatchError> {
        let context = self.context;
        for mode in context.request.modes.iter().copied() {
            info!("Launching {} jobs", mode);
            match mode {
                Mode::CnvCall => self.launch_calling()?,
                Mode::Aggregate => self.launch_aggregate()?,
                report => self.launch_reports(report, groups)?,
            }
        }
        Ok(())
    }

    fn launch_calling(&mut self) -> Result<(), DispatchError> {
        self.progress.advance(RunState::Assembling)?;
        let context = self.context;
        let template = template(context, Mode::CnvCall)?;
        let located = self.locate_run(template, context.request.limit)?;
        if located.values().all(Vec::is_empty) {
            warn!("No calling inputs left under {}", context.request.input_root);
        }

        match self.assemble(template, Target::Run, &located)? {
            Assembly::Ready(payload) => {
                let job_id = self.submit(Mode::CnvCall, RUN_LABEL, RUN_LABEL, template, payload)?;
                if let Some(job_id) = job_id.filter(|_| self.depended_on(Mode::CnvCall)) {
                    if self.waits() {
                        self.await_job(&job_id)?;
                    }
                    self.call_job = Some(job_id);
                }
            }
            Assembly::Dropped { reason, detail } => {
                self.dropped(&located, RUN_LABEL, reason, &detail)?;
                if self.depended_on(Mode::CnvCall) {
                    return Err(BackendError::Dependency { mode: Mode::CnvCall, reason: detail }.into());
                }
            }
        }
        Ok(())
    }

    fn launch_reports(&mut self, mode: Mode, groups: &[ReportGroup]) -> Result<(), DispatchError> {
        self.progress.advance(RunState::Assembling)?;
        if groups.is_empty() {
            info!("No report groups, nothing to launch for {}", mode);
            return Ok(());
        }

        let context = self.context;
        let template = template(context, mode)?;
        let samples: BTreeMap<String, Dialect> = groups.iter().map(|group| (group.sample.clone(), group.dialect)).collect();
        let locator = Locator::new(self.backend, &context.config.dialects);
        let mut located = Located::new();
        for (name, search) in template.search_fields() {
            let root = self.search_root(search)?;
            let files = match search.shared {
                true => shared(mode, search, locator.find_shared(&root, search)?)?,
                false => locator.find(&root, search, &samples)?,
            };
            located.insert(name.clone(), files);
        }

        for group in groups {
            self.progress.advance(RunState::Assembling)?;
            match self.assemble(template, Target::Group(group), &located)? {
                Assembly::Ready(payload) => {
                    if let Some(job_id) = self.submit(mode, &group.name_stem(), &group.sample, template, payload)? {
                        self.report_jobs.push(job_id);
                    }
                }
                Assembly::Dropped { reason, detail } => self.dropped(&located, &group.sample, reason, &detail)?,
            }
        }
        Ok(())
    }

    fn launch_aggregate(&mut self) -> Result<(), DispatchError> {
        if self.report_jobs.is_empty() {
            warn!("No report jobs were launched, skipping aggregate");
            self.summary.error("aggregate not launched: no report jobs were launched");
            return Ok(());
        }
        if self.waits() {
            for job_id in self.report_jobs.clone() {
                self.await_job(&job_id)?;
            }
        }

        self.progress.advance(RunState::Assembling)?;
        let context = self.context;
        let template = template(context, Mode::Aggregate)?;
        let located = self.locate_run(template, None)?;
        match self.assemble(template, Target::Run, &located)? {
            Assembly::Ready(payload) => {
                self.submit(Mode::Aggregate, RUN_LABEL, RUN_LABEL, template, payload)?;
            }
            Assembly::Dropped { reason, detail } => self.dropped(&located, RUN_LABEL, reason, &detail)?,
        }
        Ok(())
    }

    /// Locate every search field of a run scoped mode, keeping only the first `limit` samples
    ///
    /// Calling never sees the files of excluded samples.
    fn locate_run(&mut self, template: &ModeTemplate, limit: Option<usize>) -> Result<Located, DispatchError> {
        let locator = Locator::new(self.backend, &self.context.config.dialects);
        let mut located = Located::new();
        for (name, search) in template.search_fields() {
            let root = self.search_root(search)?;
            let files = match search.shared {
                true => shared(template.mode, search, locator.find_shared(&root, search)?)?,
                false => locator.find_for_run(&root, search)?,
            };
            located.insert(name.clone(), files);
        }

        if template.mode == Mode::CnvCall {
            self.exclude_from_calling(&mut located);
        }
        if let Some(limit) = limit {
            let samples: BTreeSet<String> = located.values().flatten().filter(|file| !file.sample.is_empty()).map(|file| file.sample.clone()).collect();
            let kept: BTreeSet<String> = samples.into_iter().take(limit).collect();
            info!("Limiting {} to {} sample(s)", template.mode, kept.len());
            for files in located.values_mut() {
                files.retain(|file| file.sample.is_empty() || kept.contains(&file.sample));
            }
        }
        Ok(located)
    }

    /// Drop the files of samples whose name starts with an excluded id
    fn exclude_from_calling(&mut self, located: &mut Located) {
        let context = self.context;
        let excluded = &context.request.excluded;
        if excluded.is_empty() {
            return;
        }

        let mut dropped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for files in located.values_mut() {
            files.retain(|file| {
                let is_excluded = !file.sample.is_empty() && excluded.iter().any(|id| file.sample.starts_with(id.as_str()));
                if is_excluded {
                    dropped.entry(file.sample.clone()).or_default().push(file.file.name.clone());
                }
                !is_excluded
            });
        }

        for id in excluded.iter().filter(|id| !dropped.keys().any(|sample| sample.starts_with(id.as_str()))) {
            warn!("Excluded sample {} has no calling inputs", id);
        }
        for (sample, names) in dropped {
            info!("Leaving {} out of calling: {}", sample, names.join(", "));
            self.summary.exclude(Exclusion::new(&sample, Stage::Locate, Reason::UserExcluded, format!("left out of calling: {}", names.join(", "))));
        }
    }

    fn search_root(&self, search: &SearchField) -> Result<Location, ConfigError> {
        match search.source {
            SearchSource::Input => Ok(Location::Folder(self.context.request.input_root.clone())),
            SearchSource::CallJob => self
                .call_job
                .clone()
                .map(Location::JobOutput)
                .ok_or_else(|| ConfigError::Conflict(format!("{} searches calling output but there is no calling job", search.role))),
        }
    }

    fn assemble(&self, template: &ModeTemplate, target: Target, located: &Located) -> Result<Assembly, DispatchError> {
        let context = self.context;
        let locator = Locator::new(self.backend, &context.config.dialects);
        let input_root = Location::Folder(context.request.input_root.clone());
        let assembler = Assembler {
            references: &context.config.references,
            locator: &locator,
            input_root: &input_root,
            reports_folder: &context.run_folder,
            call_job: self.call_job.as_deref(),
            qc_file: context.request.qc_file.as_deref(),
        };
        assembler.assemble(template, target, located)
    }

    /// Submit one job; returns its id, or None when the failure was recorded instead
    fn submit(&mut self, mode: Mode, label: &str, sample: &str, template: &ModeTemplate, payload: JobInputPayload) -> Result<Option<String>, DispatchError> {
        self.progress.advance(RunState::Submitting)?;
        let request = JobRequest {
            mode,
            label: label.to_string(),
            executable: template.executable.clone(),
            payload,
            instance_type: template.instance_type.clone(),
            destination: self.context.destination(mode),
        };

        let job_id = match self.backend.submit(&request) {
            Ok(job_id) => job_id,
            Err(err) if self.depended_on(mode) => return Err(err.into()),
            Err(err) => {
                warn!("Submitting {} for {} failed: {}", mode, label, err);
                self.summary.error(err.to_string());
                self.summary.exclude(Exclusion::new(sample, Stage::Submit, Reason::SubmissionFailed, err.to_string()));
                return Ok(None);
            }
        };
        info!("Launched {} job {} for {}", mode, job_id, label);
        self.summary.launched(mode, label, &job_id);

        if self.context.request.test_mode {
            self.progress.advance(RunState::Terminating)?;
            info!("Test mode, terminating {}", job_id);
            if let Err(err) = self.backend.terminate(&job_id) {
                warn!("Couldn't terminate {}: {}", job_id, err);
                self.summary.error(err.to_string());
            }
        }
        Ok(Some(job_id))
    }

    fn await_job(&mut self, job_id: &str) -> Result<(), DispatchError> {
        self.progress.advance(RunState::Monitoring)?;
        match self.backend.wait(job_id, self.context.request.timeout)? {
            JobState::Done => Ok(()),
            state => Err(BackendError::JobFailed { job_id: job_id.to_string(), state: state.to_string() }.into()),
        }
    }

    /// Record a dropped job; archived inputs are restored when asked to
    fn dropped(&mut self, located: &Located, sample: &str, reason: Reason, detail: &str) -> Result<(), DispatchError> {
        self.summary.exclude(Exclusion::new(sample, Stage::Assemble, reason, detail));
        if reason != Reason::ArchivedInput {
            return Ok(());
        }

        let files: Vec<FileRef> = located
            .values()
            .flatten()
            .filter(|file| file.archived && (sample == RUN_LABEL || file.sample == sample || file.sample.is_empty()))
            .map(|file| file.file.clone())
            .collect();
        match self.context.request.unarchive {
            true => {
                info!("Requesting unarchive of {} file(s) for {}", files.len(), sample);
                if let Err(err) = self.backend.request_unarchive(&files) {
                    warn!("Unarchive request for {} failed: {}", sample, err);
                    self.summary.error(err.to_string());
                }
            }
            false => info!("{} has {} archived file(s); rerun with --unarchive to restore them", sample, files.len()),
        }
        Ok(())
    }

    /// True when a later job of this run needs this mode's jobs to succeed
    fn depended_on(&self, mode: Mode) -> bool {
        let modes = &self.context.request.modes;
        match mode {
            Mode::CnvCall => modes.contains(&Mode::CnvReports),
            Mode::SnvReports | Mode::MosaicReports | Mode::CnvReports => modes.contains(&Mode::Aggregate),
            Mode::Aggregate => false,
        }
    }

    /// Test mode terminates jobs and dry runs never launch them, so neither waits
    fn waits(&self) -> bool {
        !self.context.request.test_mode && !self.context.request.dry_run
    }

    fn finish(mut self) -> Result<RunSummary, DispatchError> {
        self.progress.advance(RunState::Summarizing)?;
        self.progress.advance(RunState::Done)?;
        info!("{}", self.summary.headline());
        Ok(self.summary)
    }

    fn fail(mut self, err: DispatchError) -> Result<RunSummary, DispatchError> {
        warn!("Run failed while {}: {}", self.progress.state(), err);
        self.progress.advance(RunState::Failed)?;
        self.summary.fail(err.to_string());
        Ok(self.summary)
    }
}

/// A shared input must be exactly one file; anything else stops the run
fn shared(mode: Mode, search: &SearchField, files: Vec<LocatedFile>) -> Result<Vec<LocatedFile>, DispatchError> {
    match files.len() {
        1 => Ok(files),
        found => Err(DispatchError::SharedInput { mode, role: search.role.clone(), found }),
    }
}

fn template(context: &RunContext, mode: Mode) -> Result<&ModeTemplate, ConfigError> {
    context
        .config
        .template(mode)
        .ok_or_else(|| ConfigError::ModeNotConfigured { mode, assay: context.config.assay_id() })
}
