use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::info;
use serde::Serialize;
use tinytemplate::TinyTemplate;

use crate::exclusion::Exclusion;
use crate::mode::Mode;

/// A job the run launched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchedJob {
    pub mode: Mode,
    /// the sample(s) or run the job was launched for
    pub label: String,
    pub job_id: String,
}

/// Everything a run did, accumulated as it goes
///
/// Entries are only ever appended. A summary is produced on every non-fatal path, even when no
/// job was launched.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub assay: String,
    pub run_folder: String,
    pub test_mode: bool,
    launched: Vec<LaunchedJob>,
    exclusions: Vec<Exclusion>,
    errors: Vec<String>,
    failure: Option<String>,
}

/// Rendering context for the summary template
#[derive(Serialize)]
struct SummaryContext<'a> {
    assay: &'a str,
    run_folder: &'a str,
    generated: String,
    headline: String,
    has_launched: bool,
    launched: &'a [LaunchedJob],
    has_exclusions: bool,
    exclusions: &'a [Exclusion],
    has_errors: bool,
    errors: &'a [String],
}

impl RunSummary {
    pub fn new(assay: &str, run_folder: &str, test_mode: bool) -> RunSummary {
        RunSummary { assay: assay.to_string(), run_folder: run_folder.to_string(), test_mode, ..Default::default() }
    }

    pub fn launched(&mut self, mode: Mode, label: &str, job_id: &str) {
        self.launched.push(LaunchedJob { mode, label: label.to_string(), job_id: job_id.to_string() });
    }

    pub fn exclude(&mut self, exclusion: Exclusion) {
        self.exclusions.push(exclusion);
    }

    pub fn error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn exclusions(&self) -> &[Exclusion] {
        &self.exclusions
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn headline(&self) -> String {
        match (&self.failure, self.launched.len()) {
            (Some(reason), _) => format!("failed: {}", reason),
            (None, 0) => "success, no jobs launched".to_string(),
            (None, n) if self.test_mode => format!("success, {} jobs launched and terminated (test mode)", n),
            (None, n) => format!("success, {} jobs launched", n),
        }
    }

    /// Launched job ids, comma separated
    pub fn job_ids(&self) -> String {
        self.launched.iter().map(|job| job.job_id.as_str()).collect::<Vec<_>>().join(",")
    }

    pub fn render(&self) -> Result<String, tinytemplate::error::Error> {
        static SUMMARY: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/summary.txt"));
        let mut tt = TinyTemplate::new();
        tt.set_default_formatter(&tinytemplate::format_unescaped);
        tt.add_template("summary", SUMMARY)?;

        let context = SummaryContext {
            assay: &self.assay,
            run_folder: &self.run_folder,
            generated: Local::now().to_rfc3339(),
            headline: self.headline(),
            has_launched: !self.launched.is_empty(),
            launched: &self.launched,
            has_exclusions: !self.exclusions.is_empty(),
            exclusions: &self.exclusions,
            has_errors: !self.errors.is_empty(),
            errors: &self.errors,
        };
        tt.render("summary", &context)
    }

    /// Write the rendered summary and the job id list to `dir`
    pub fn write(&self, dir: &Path, stem: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
        fs::create_dir_all(dir)?;
        let summary_path = dir.join(format!("{}_summary.txt", stem));
        let ids_path = dir.join(format!("{}_job_ids.csv", stem));

        info!("Writing run summary to {}", summary_path.display());
        fs::write(&summary_path, self.render()?)?;
        info!("Writing launched job ids to {}", ids_path.display());
        fs::write(&ids_path, format!("{}\n", self.job_ids()))?;

        Ok((summary_path, ids_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exclusion::{Reason, Stage};

    #[test]
    fn headline_reflects_outcome() {
        let mut summary = RunSummary::new("CEN_2.1.0", "/run1", false);
        assert_eq!(summary.headline(), "success, no jobs launched");
        summary.launched(Mode::SnvReports, "S1_R207.1", "job-1");
        summary.launched(Mode::SnvReports, "S2_R208.1", "job-2");
        assert_eq!(summary.headline(), "success, 2 jobs launched");
        assert_eq!(summary.job_ids(), "job-1,job-2");

        summary.test_mode = true;
        assert_eq!(summary.headline(), "success, 2 jobs launched and terminated (test mode)");

        summary.fail("timed out waiting for job-1");
        assert!(summary.is_failed());
        assert_eq!(summary.headline(), "failed: timed out waiting for job-1");
    }

    #[test]
    fn rendered_summary_lists_jobs_and_exclusions() {
        let mut summary = RunSummary::new("CEN_2.1.0", "/run1/CEN_2.1.0-261016_1200", false);
        summary.launched(Mode::SnvReports, "S2_R207.1", "job-000002");
        summary.exclude(Exclusion::new("S1", Stage::Assemble, Reason::MissingRequiredFile, "no variant calls file in sentieon"));

        let text = summary.render().unwrap();
        assert!(text.contains("success, 1 jobs launched"));
        assert!(text.contains("snv_reports\tS2_R207.1\tjob-000002"));
        assert!(text.contains("S1\tassemble\tmissing-required-file\tno variant calls file in sentieon"));
        assert!(!text.contains("Errors"));
    }

    #[test]
    fn empty_run_still_renders() {
        let summary = RunSummary::new("CEN_2.1.0", "/run1", false);
        let text = summary.render().unwrap();
        assert!(text.contains("success, no jobs launched"));
        assert!(!text.contains("Launched jobs"));
    }

    #[test]
    fn writes_summary_and_id_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut summary = RunSummary::new("CEN_2.1.0", "/run1", false);
        summary.launched(Mode::CnvCall, "run", "job-000001");
        let (text, ids) = summary.write(dir.path(), "CEN_2.1.0-261016_1200").unwrap();
        assert!(fs::read_to_string(text).unwrap().contains("cnv_call\trun\tjob-000001"));
        assert_eq!(fs::read_to_string(ids).unwrap(), "job-000001\n");
    }
}
