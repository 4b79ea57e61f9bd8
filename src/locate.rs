//! Find the upstream files each sample's jobs need
//!
//! Files are listed one folder deep through the backend and attributed to samples by name. The
//! locator only reports what it finds: deciding whether a sample has too few or too many files is
//! left to the assembler.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use regex::Regex;
use serde::Serialize;

use crate::backend::{ExecutionBackend, FileRef, Location};
use crate::config::SearchField;
use crate::error::BackendError;
use crate::manifest::dialect::{Dialect, DialectSet, SampleMatcher, UntilDelimiter};

/// A file attributed to a sample, for one search field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocatedFile {
    pub file: FileRef,
    /// empty for files shared by every sample
    pub sample: String,
    pub role: String,
    pub archived: bool,
}

/// Located files of one mode, keyed by input field name
pub type Located = BTreeMap<String, Vec<LocatedFile>>;

pub struct Locator<'a> {
    backend: &'a dyn ExecutionBackend,
    dialects: &'a DialectSet,
    /// calling inputs are named `<sample>_<suffix>`
    run_matcher: UntilDelimiter,
}

impl<'a> Locator<'a> {
    pub fn new(backend: &'a dyn ExecutionBackend, dialects: &'a DialectSet) -> Locator<'a> {
        Locator { backend, dialects, run_matcher: UntilDelimiter { delimiter: '_' } }
    }

    pub fn list(&self, root: &Location, subfolder: &str, pattern: &Regex) -> Result<Vec<FileRef>, BackendError> {
        self.backend.list_files(root, subfolder, pattern)
    }

    pub fn attribute(&self, file_name: &str, dialect: Dialect) -> Option<String> {
        self.dialects.attribute(file_name, dialect)
    }

    /// Files for the given samples, sorted by (sample, name)
    ///
    /// Matching files that belong to none of `samples` are ignored.
    pub fn find(&self, root: &Location, search: &SearchField, samples: &BTreeMap<String, Dialect>) -> Result<Vec<LocatedFile>, BackendError> {
        let dialects: BTreeSet<Dialect> = samples.values().copied().collect();
        let files = self.list(root, &search.folder, &search.pattern)?;

        let mut located = Vec::new();
        for file in files {
            let sample = dialects
                .iter()
                .filter_map(|dialect| self.attribute(&file.name, *dialect))
                .find(|sample| samples.contains_key(sample));
            match sample {
                Some(sample) => located.push(self.located(file, sample, search)?),
                None => debug!("Ignoring {}: not attributable to a requested sample", file.name),
            }
        }

        sort(&mut located);
        info!("Found {} {} file(s) for {} sample(s)", located.len(), search.role, samples.len());
        Ok(located)
    }

    /// Files for a run scoped job: every matching file whose name carries a sample, sorted by
    /// (sample, name)
    pub fn find_for_run(&self, root: &Location, search: &SearchField) -> Result<Vec<LocatedFile>, BackendError> {
        let files = self.list(root, &search.folder, &search.pattern)?;

        let mut located = Vec::new();
        for file in files {
            match self.run_matcher.attribute(&file.name) {
                Some(sample) => located.push(self.located(file, sample, search)?),
                None => debug!("Ignoring {}: no sample name", file.name),
            }
        }

        sort(&mut located);
        info!("Found {} {} file(s) for the run", located.len(), search.role);
        Ok(located)
    }

    /// Every matching file, attributed to no sample
    pub fn find_shared(&self, root: &Location, search: &SearchField) -> Result<Vec<LocatedFile>, BackendError> {
        let files = self.list(root, &search.folder, &search.pattern)?;
        let mut located = files
            .into_iter()
            .map(|file| self.located(file, String::new(), search))
            .collect::<Result<Vec<_>, _>>()?;
        sort(&mut located);
        info!("Found {} shared {} file(s)", located.len(), search.role);
        Ok(located)
    }

    fn located(&self, file: FileRef, sample: String, search: &SearchField) -> Result<LocatedFile, BackendError> {
        let archived = self.backend.file_is_archived(&file)?;
        Ok(LocatedFile { file, sample, role: search.role.clone(), archived })
    }
}

fn sort(located: &mut [LocatedFile]) {
    located.sort_by(|a, b| (&a.sample, &a.file.name).cmp(&(&b.sample, &b.file.name)));
}
