//! The execution platform, seen through one trait
//!
//! The engine only ever talks to an [ExecutionBackend]. The ledger backend queues job requests
//! in SQLite for a launcher to pick up and lists files through a [store::FileStore].

use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::assemble::JobInputPayload;
use crate::config::document::InstanceType;
use crate::error::BackendError;
use crate::mode::Mode;

/// SQLite job ledger
pub mod ledger;
/// S3 file store
pub mod s3;
/// Job states shared by every backend
pub mod state;
/// File stores: where upstream outputs are listed from
pub mod store;

pub use state::JobState;

/// A file known to the backend
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FileRef {
    /// identifier handed to jobs
    pub id: String,
    pub name: String,
    pub folder: String,
}

/// Root of a file search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Folder(String),
    /// the output folder of a job launched through the backend
    JobOutput(String),
}

/// Everything needed to launch one job
#[derive(Debug, Clone, Serialize)]
pub struct JobRequest {
    pub mode: Mode,
    /// human readable name: the sample(s) or the run
    pub label: String,
    pub executable: String,
    pub payload: JobInputPayload,
    pub instance_type: Option<InstanceType>,
    pub destination: String,
}

pub trait ExecutionBackend {
    fn submit(&self, request: &JobRequest) -> Result<String, BackendError>;
    /// Block until the job reaches a terminal state or `timeout` expires
    fn wait(&self, job_id: &str, timeout: Duration) -> Result<JobState, BackendError>;
    fn terminate(&self, job_id: &str) -> Result<(), BackendError>;
    /// Non-recursive listing of `root/subfolder`, keeping names that match `pattern`
    fn list_files(&self, root: &Location, subfolder: &str, pattern: &Regex) -> Result<Vec<FileRef>, BackendError>;
    fn file_is_archived(&self, file: &FileRef) -> Result<bool, BackendError>;
    fn request_unarchive(&self, files: &[FileRef]) -> Result<(), BackendError>;
}

/// Join folder segments with single slashes; an empty subfolder leaves `root` as is
pub fn join_folder(root: &str, subfolder: &str) -> String {
    let subfolder = subfolder.trim_matches('/');
    let root = root.trim_end_matches('/');
    match (root.is_empty(), subfolder.is_empty()) {
        (_, true) => root.to_string(),
        (true, false) => subfolder.to_string(),
        (false, false) => format!("{}/{}", root, subfolder),
    }
}
