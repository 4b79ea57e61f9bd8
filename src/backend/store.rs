use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use regex::Regex;

use crate::backend::FileRef;
use crate::error::BackendError;

/// Somewhere files can be listed, checked for archival and restored
pub trait FileStore {
    /// Files directly inside `folder` whose names match `pattern`, sorted by name
    fn list(&self, folder: &str, pattern: &Regex) -> Result<Vec<FileRef>, BackendError>;
    fn is_archived(&self, file: &FileRef) -> Result<bool, BackendError>;
    fn request_unarchive(&self, files: &[FileRef]) -> Result<(), BackendError>;
}

/// A plain directory tree; nothing in it is ever archived
#[derive(Debug, Clone)]
pub struct LocalStore {
    pub base: PathBuf,
}

impl LocalStore {
    pub fn new(base: &Path) -> LocalStore {
        LocalStore { base: base.to_path_buf() }
    }

    fn resolve(&self, folder: &str) -> PathBuf {
        let folder = Path::new(folder);
        match folder.is_absolute() {
            true => folder.to_path_buf(),
            false => self.base.join(folder),
        }
    }
}

impl FileStore for LocalStore {
    fn list(&self, folder: &str, pattern: &Regex) -> Result<Vec<FileRef>, BackendError> {
        let dir = self.resolve(folder);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("Folder {} doesn't exist, nothing to list", dir.display());
                return Ok(Vec::new());
            }
            Err(err) => return Err(BackendError::Store(format!("can't list {}: {}", dir.display(), err))),
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| BackendError::Store(format!("can't list {}: {}", dir.display(), err)))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if pattern.is_match(&name) {
                files.push(FileRef { id: path.display().to_string(), name, folder: folder.to_string() });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        debug!("{} file(s) in {} match {}", files.len(), dir.display(), pattern);
        Ok(files)
    }

    fn is_archived(&self, _file: &FileRef) -> Result<bool, BackendError> {
        Ok(false)
    }

    fn request_unarchive(&self, files: &[FileRef]) -> Result<(), BackendError> {
        if !files.is_empty() {
            warn!("Local files are never archived, ignoring unarchive request for {} file(s)", files.len());
        }
        Ok(())
    }
}
