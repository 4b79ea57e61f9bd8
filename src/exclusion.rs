use std::fmt;

use serde::Serialize;

/// Why a sample, test or report group was left out of a run
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Reason {
    MalformedRow,
    UnknownCode,
    NotInManifest,
    UserExcluded,
    NoValidTests,
    MissingRequiredFile,
    AmbiguousFile,
    ArchivedInput,
    VersionExhausted,
    SubmissionFailed,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::MalformedRow => "malformed-row",
            Reason::UnknownCode => "unknown-code",
            Reason::NotInManifest => "not-in-manifest",
            Reason::UserExcluded => "user-excluded",
            Reason::NoValidTests => "no-valid-tests",
            Reason::MissingRequiredFile => "missing-required-file",
            Reason::AmbiguousFile => "ambiguous-file",
            Reason::ArchivedInput => "archived-input",
            Reason::VersionExhausted => "version-exhausted",
            Reason::SubmissionFailed => "submission-failed",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Engine stage that made the decision
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Manifest,
    Resolve,
    Locate,
    Assemble,
    Submit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stage::Manifest => write!(f, "manifest"),
            Stage::Resolve => write!(f, "resolve"),
            Stage::Locate => write!(f, "locate"),
            Stage::Assemble => write!(f, "assemble"),
            Stage::Submit => write!(f, "submit"),
        }
    }
}

/// A test code (or a whole manifest row) that was not accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedTest {
    pub sample: String,
    pub code: String,
    pub reason: Reason,
    pub detail: String,
}

/// One line of the run summary's exclusion list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub sample: String,
    pub stage: Stage,
    pub reason: Reason,
    pub detail: String,
}

impl Exclusion {
    pub fn new(sample: &str, stage: Stage, reason: Reason, detail: impl Into<String>) -> Exclusion {
        Exclusion { sample: sample.to_string(), stage, reason, detail: detail.into() }
    }
}

impl RejectedTest {
    pub fn into_exclusion(self, stage: Stage) -> Exclusion {
        let detail = match (self.code.is_empty(), self.detail.is_empty()) {
            (true, _) => self.detail,
            (false, true) => self.code,
            (false, false) => format!("{}: {}", self.code, self.detail),
        };
        Exclusion { sample: self.sample, stage, reason: self.reason, detail }
    }
}
