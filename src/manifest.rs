//! Manifests map samples to the tests they were booked for
//!
//! Two manifest dialects exist. Both are normalised into one ordered set of [SampleRequest]s.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::manifest::dialect::Dialect;

/// Dialect detection and file-name attribution rules
pub mod dialect;
/// Merge raw manifests into sample requests
pub mod normalize;
/// Read manifest files into raw rows
pub mod read;

pub use normalize::{normalize, Normalized};
pub use read::{RawManifest, RawRow};

/// The tests requested for one sample, as written in the manifests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SampleRequest {
    pub sample: String,
    pub dialect: Dialect,
    pub codes: Vec<String>,
}

/// Sample requests in first-seen order, one per sample id
#[derive(Debug, Clone, Default)]
pub struct SampleRequests {
    samples: Vec<SampleRequest>,
    index: HashMap<String, usize>,
}

impl SampleRequests {
    /// Add a request, or merge its codes into an earlier one for the same sample
    ///
    /// Merged codes keep first-seen order without duplicates. The earlier dialect is kept.
    fn merge(&mut self, request: SampleRequest) {
        match self.index.get(&request.sample) {
            Some(&position) => {
                let existing = &mut self.samples[position];
                for code in request.codes {
                    if !existing.codes.contains(&code) {
                        existing.codes.push(code);
                    }
                }
            }
            None => {
                self.index.insert(request.sample.clone(), self.samples.len());
                self.samples.push(request);
            }
        }
    }

    pub fn get(&self, sample: &str) -> Option<&SampleRequest> {
        self.index.get(sample).map(|&position| &self.samples[position])
    }

    pub fn contains(&self, sample: &str) -> bool {
        self.index.contains_key(sample)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleRequest> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Keep only the named samples, in their original order
    ///
    /// Fails with the names found in no request, leaving the requests untouched.
    pub fn retain_named(&mut self, names: &BTreeSet<String>) -> Result<(), Vec<String>> {
        let unknown: Vec<String> = names.iter().filter(|name| !self.contains(name)).cloned().collect();
        if !unknown.is_empty() {
            return Err(unknown);
        }
        self.samples.retain(|request| names.contains(&request.sample));
        self.index = self.samples.iter().enumerate().map(|(position, request)| (request.sample.clone(), position)).collect();
        Ok(())
    }
}

impl FromIterator<SampleRequest> for SampleRequests {
    fn from_iter<T: IntoIterator<Item = SampleRequest>>(iter: T) -> Self {
        let mut requests = SampleRequests::default();
        for request in iter {
            requests.merge(request);
        }
        requests
    }
}
