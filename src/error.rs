//! Error taxonomy
//!
//! Configuration and input errors are fatal and stop a run before anything is submitted.
//! Backend errors are fatal only when a downstream job depends on the failing one. Everything
//! recoverable is recorded in the run summary as an exclusion instead of being an error.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use crate::mode::Mode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("can't read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("config is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("config fails schema validation: {0}")]
    Schema(String),
    #[error("config can't be deserialised: {0}")]
    Deserialise(#[source] serde_json::Error),
    #[error("invalid regular expression `{pattern}` for {owner}: {source}")]
    Pattern {
        owner: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("reference file `{key}` used by {field} is not in reference_files")]
    UnknownReference { key: String, field: String },
    #[error("dynamic field `{dynamic}` used by {field} isn't available to run-scoped mode {mode}")]
    UnavailableDynamic { mode: Mode, field: String, dynamic: String },
    #[error("no mode was requested")]
    NoModeEnabled,
    #[error("mode {mode} is not configured for assay {assay}")]
    ModeNotConfigured { mode: Mode, assay: String },
    #[error("conflicting request: {0}")]
    Conflict(String),
    #[error("mode {0} needs at least one manifest")]
    MissingManifest(Mode),
    #[error("mode {0} needs a panel table")]
    MissingPanels(Mode),
    #[error("subset names sample(s) found in no manifest: {0}")]
    UnknownSubset(String),
}

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("can't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{path} isn't a valid manifest: {reason}")]
    Layout { path: PathBuf, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("submitting {mode} job failed: {reason}")]
    Submit { mode: Mode, reason: String },
    #[error("job {job_id} not found")]
    UnknownJob { job_id: String },
    #[error("timed out after {}s waiting for job {job_id}", timeout.as_secs())]
    Timeout { job_id: String, timeout: Duration },
    #[error("job {job_id} finished in state {state}")]
    JobFailed { job_id: String, state: String },
    #[error("{mode} job needed downstream wasn't launched: {reason}")]
    Dependency { mode: Mode, reason: String },
    #[error("file store error: {0}")]
    Store(String),
    #[error("ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),
    #[error("can't serialise job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Fatal outcomes of a dispatch run
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("{mode} needs exactly one {role} file shared by every sample, found {found}")]
    SharedInput { mode: Mode, role: String, found: usize },
    #[error("run can't move from {from} to {to}")]
    Transition { from: String, to: String },
}
