use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::backend::store::FileStore;
use crate::backend::{join_folder, ExecutionBackend, FileRef, JobRequest, JobState, Location};
use crate::error::BackendError;

/// Job requests are queued in a SQLite ledger; a launcher process picks them up and moves them
/// through their states
///
/// With dry run set every insert happens inside a savepoint that [LedgerBackend::finish] rolls
/// back, so a dry run leaves the ledger untouched.
pub struct LedgerBackend {
    conn: Connection,
    store: Box<dyn FileStore>,
    dry_run: bool,
    poll_interval: Duration,
}

impl LedgerBackend {
    pub fn open(path: &Path, store: Box<dyn FileStore>, dry_run: bool) -> Result<LedgerBackend, BackendError> {
        if !path.exists() {
            info!("Creating new job ledger {}", path.display())
        }
        let conn = Connection::open(path)?;
        LedgerBackend::with_connection(conn, store, dry_run)
    }

    pub fn with_connection(conn: Connection, store: Box<dyn FileStore>, dry_run: bool) -> Result<LedgerBackend, BackendError> {
        static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/db/schema.sql"));
        conn.execute_batch(SCHEMA)?;

        if dry_run {
            info!("Creating dry run save point");
            conn.execute("SAVEPOINT dry_run", [])?;
        }

        Ok(LedgerBackend { conn, store, dry_run, poll_interval: Duration::from_secs(10) })
    }

    pub fn poll_every(mut self, interval: Duration) -> LedgerBackend {
        self.poll_interval = interval;
        self
    }

    /// Release or roll back the dry run save point
    pub fn finish(self) -> Result<(), BackendError> {
        if self.dry_run {
            info!("--dry-run set, rolling back ledger state");
            self.conn.execute("ROLLBACK TO dry_run", [])?;
            self.conn.execute("RELEASE dry_run", [])?;
        }
        Ok(())
    }

    /// Move a job to a new state, as the launcher does
    pub fn update(&self, job_id: &str, state: JobState) -> Result<(), BackendError> {
        let id = row_id(job_id)?;
        info!("Updating {} with state {}", job_id, state);
        let changed = self.conn.execute(
            "UPDATE job SET state = ?1, updated_at = CURRENT_TIMESTAMP WHERE id = ?2",
            params![state.as_str(), id],
        )?;
        match changed {
            0 => Err(BackendError::UnknownJob { job_id: job_id.to_string() }),
            _ => Ok(()),
        }
    }

    pub fn state(&self, job_id: &str) -> Result<JobState, BackendError> {
        let id = row_id(job_id)?;
        let state: Option<String> = self
            .conn
            .query_row("SELECT state FROM job WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        let state = state.ok_or_else(|| BackendError::UnknownJob { job_id: job_id.to_string() })?;
        state
            .parse()
            .map_err(|reason: String| BackendError::JobFailed { job_id: job_id.to_string(), state: reason })
    }

    fn destination(&self, job_id: &str) -> Result<String, BackendError> {
        let id = row_id(job_id)?;
        let destination: Option<String> = self
            .conn
            .query_row("SELECT destination FROM job WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        destination.ok_or_else(|| BackendError::UnknownJob { job_id: job_id.to_string() })
    }
}

impl ExecutionBackend for LedgerBackend {
    fn submit(&self, request: &JobRequest) -> Result<String, BackendError> {
        let payload = serde_json::to_string(&request.payload)?;
        let instance_type = request.instance_type.as_ref().map(serde_json::to_string).transpose()?;

        self.conn.execute(
            "INSERT INTO job (mode, label, executable, payload, instance_type, destination) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![request.mode.key(), request.label, request.executable, payload, instance_type, request.destination],
        )?;
        let job_id = format!("job-{:06}", self.conn.last_insert_rowid());
        info!("Queued {} job {} for {}", request.mode, job_id, request.label);
        debug!("{} payload: {}", job_id, payload);
        Ok(job_id)
    }

    fn wait(&self, job_id: &str, timeout: Duration) -> Result<JobState, BackendError> {
        let started = Instant::now();
        info!("Waiting up to {}s for job {}", timeout.as_secs(), job_id);
        loop {
            let state = self.state(job_id)?;
            if state.is_terminal() {
                info!("Job {} finished in state {}", job_id, state);
                return Ok(state);
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                warn!("Gave up waiting for job {} in state {}", job_id, state);
                return Err(BackendError::Timeout { job_id: job_id.to_string(), timeout });
            }
            debug!("Job {} is {}, polling again", job_id, state);
            thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }

    fn terminate(&self, job_id: &str) -> Result<(), BackendError> {
        match self.state(job_id)? {
            state if state.is_terminal() => {
                info!("Job {} already {}, nothing to terminate", job_id, state);
                Ok(())
            }
            _ => self.update(job_id, JobState::Terminated),
        }
    }

    fn list_files(&self, root: &Location, subfolder: &str, pattern: &Regex) -> Result<Vec<FileRef>, BackendError> {
        let root = match root {
            Location::Folder(folder) => folder.clone(),
            Location::JobOutput(job_id) => self.destination(job_id)?,
        };
        self.store.list(&join_folder(&root, subfolder), pattern)
    }

    fn file_is_archived(&self, file: &FileRef) -> Result<bool, BackendError> {
        self.store.is_archived(file)
    }

    fn request_unarchive(&self, files: &[FileRef]) -> Result<(), BackendError> {
        self.store.request_unarchive(files)
    }
}

/// Job ids are `job-<rowid>`
fn row_id(job_id: &str) -> Result<i64, BackendError> {
    job_id
        .strip_prefix("job-")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| BackendError::UnknownJob { job_id: job_id.to_string() })
}
