use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::info;

use crate::backend::join_folder;
use crate::config::Config;
use crate::error::InputError;
use crate::mode::Mode;

/// What the operator asked for
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub modes: BTreeSet<Mode>,
    /// folder holding the upstream outputs of the sequencing run
    pub input_root: String,
    pub manifests: Vec<PathBuf>,
    pub panels: Option<PathBuf>,
    pub excluded: BTreeSet<String>,
    /// when not empty, report modes only run these manifest samples
    pub subset: BTreeSet<String>,
    /// only the first N samples are launched
    pub limit: Option<usize>,
    pub split_tests: bool,
    pub test_mode: bool,
    pub dry_run: bool,
    pub unarchive: bool,
    /// output of an earlier calling job to report on
    pub call_job: Option<String>,
    /// QC status file id for aggregation
    pub qc_file: Option<String>,
    pub timeout: Duration,
}

impl Default for RunRequest {
    fn default() -> Self {
        RunRequest {
            modes: BTreeSet::new(),
            input_root: String::new(),
            manifests: Vec::new(),
            panels: None,
            excluded: BTreeSet::new(),
            subset: BTreeSet::new(),
            limit: None,
            split_tests: false,
            test_mode: false,
            dry_run: false,
            unarchive: false,
            call_job: None,
            qc_file: None,
            timeout: Duration::from_secs(6 * 60 * 60),
        }
    }
}

/// Immutable context of one run, built once and passed by reference
#[derive(Debug)]
pub struct RunContext {
    pub config: Config,
    pub request: RunRequest,
    /// `<input_root>/<assay>_<version>-<yymmdd_HHMM>`, parent of every job destination
    pub run_folder: String,
    /// `<assay>_<version>-<yymmdd_HHMM>`
    pub run_name: String,
}

impl RunContext {
    pub fn new(config: Config, request: RunRequest, started: DateTime<Local>) -> RunContext {
        let run_name = format!("{}-{}", config.assay_id(), started.format("%y%m%d_%H%M"));
        let run_folder = join_folder(&request.input_root, &run_name);
        info!("Run folder is {}", run_folder);
        RunContext { config, request, run_folder, run_name }
    }

    /// Output folder of a mode's jobs
    pub fn destination(&self, mode: Mode) -> String {
        join_folder(&self.run_folder, mode.key())
    }
}

/// Sample ids to exclude, one per line; blank lines and `#` comments are skipped
pub fn read_exclusions(path: &Path) -> Result<BTreeSet<String>, InputError> {
    let text = fs::read_to_string(path).map_err(|source| InputError::Read { path: path.to_path_buf(), source })?;
    let excluded: BTreeSet<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    info!("Read {} sample exclusion(s) from {}", excluded.len(), path.display());
    Ok(excluded)
}
