use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Kinds of job this tool can launch
///
/// The derived ordering is the dispatch order: calling first, then the report workflows, then
/// aggregation over the reports.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Mode {
    CnvCall,
    SnvReports,
    MosaicReports,
    CnvReports,
    Aggregate,
}

impl Mode {
    /// Config key of the mode (`modes.<key>` in the assay config)
    pub fn key(&self) -> &'static str {
        match self {
            Mode::CnvCall => "cnv_call",
            Mode::SnvReports => "snv_reports",
            Mode::MosaicReports => "mosaic_reports",
            Mode::CnvReports => "cnv_reports",
            Mode::Aggregate => "aggregate",
        }
    }

    pub fn is_report(&self) -> bool {
        matches!(self, Mode::SnvReports | Mode::MosaicReports | Mode::CnvReports)
    }

    /// Report modes that consume the output of a calling job
    pub fn needs_call_job(&self) -> bool {
        matches!(self, Mode::CnvReports)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
