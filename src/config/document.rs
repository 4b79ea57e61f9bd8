use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mode::Mode;

/// Valid JSON configs are deserialised into the structs defined here before they're checked and
/// turned into typed templates
#[derive(Debug, Deserialize, Serialize)]
pub struct ConfigDocument {
    pub assay: String,
    pub version: String,
    pub reference_files: BTreeMap<String, String>,
    pub dialects: DialectPatterns,
    pub test_codes: TestCodePatterns,
    pub modes: BTreeMap<Mode, ModeDocument>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DialectPatterns {
    pub structured: DialectDocument,
    pub reanalysis: DialectDocument,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DialectDocument {
    pub pattern: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TestCodePatterns {
    pub code_pattern: String,
    pub symbol_pattern: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ModeDocument {
    pub executable: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub instance_type: Option<InstanceType>,
    pub inputs: BTreeMap<String, InputDocument>,
    #[serde(default)]
    pub previous_reports: Option<PreviousReports>,
}

/// Whether a mode launches one job per report group or one job for the whole run
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Sample,
    Run,
}

/// Instance type for the whole job, or overrides keyed by workflow stage
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InstanceType {
    Single(String),
    PerStage(BTreeMap<String, String>),
}

/// One entry of a mode's `inputs` table
///
/// Objects with exactly a `search` or `dynamic` key are declarations; anything else is a static
/// value that may contain `INPUT-<key>` placeholders.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InputDocument {
    Search(SearchInput),
    Dynamic(DynamicInput),
    Static(Value),
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SearchInput {
    pub search: SearchDocument,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DynamicInput {
    pub dynamic: DynamicField,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SearchDocument {
    #[serde(default)]
    pub folder: String,
    pub pattern: String,
    pub role: String,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub source: SearchSource,
    /// one run level file handed to every job instead of a file per sample
    #[serde(default)]
    pub shared: bool,
}

/// Where a search field looks for files
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// the input root given on the command line
    #[default]
    Input,
    /// the output of the calling job of this run (or the one named on the command line)
    CallJob,
}

/// Values computed per job rather than read from config
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicField {
    ClinicalIndications,
    Panels,
    TestCodes,
    Sample,
    OutputName,
    ReportsFolder,
    CallJob,
    /// QC status file given on the command line, null when there is none
    QcStatus,
}

impl DynamicField {
    /// Fields that only make sense for a single report group
    pub fn is_per_sample(&self) -> bool {
        matches!(
            self,
            DynamicField::ClinicalIndications
                | DynamicField::Panels
                | DynamicField::TestCodes
                | DynamicField::Sample
                | DynamicField::OutputName
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            DynamicField::ClinicalIndications => "clinical_indications",
            DynamicField::Panels => "panels",
            DynamicField::TestCodes => "test_codes",
            DynamicField::Sample => "sample",
            DynamicField::OutputName => "output_name",
            DynamicField::ReportsFolder => "reports_folder",
            DynamicField::CallJob => "call_job",
            DynamicField::QcStatus => "qc_status",
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PreviousReports {
    pub folder: String,
    pub extension: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn input_forms_are_told_apart() {
        let inputs: BTreeMap<String, InputDocument> = serde_json::from_value(json!({
            "vep.vcf": { "search": { "folder": "sentieon", "pattern": "vcf.gz$", "role": "variant calls" } },
            "workbook.clinical_indication": { "dynamic": "clinical_indications" },
            "vep.config": "INPUT-vep_config",
            "bed.flank": 495,
            "workbook.extra": { "search": "not a declaration", "other": 1 }
        }))
        .unwrap();

        assert!(matches!(inputs["vep.vcf"], InputDocument::Search(_)));
        assert!(matches!(
            inputs["workbook.clinical_indication"],
            InputDocument::Dynamic(DynamicInput { dynamic: DynamicField::ClinicalIndications })
        ));
        assert!(matches!(inputs["vep.config"], InputDocument::Static(_)));
        assert!(matches!(inputs["bed.flank"], InputDocument::Static(_)));
        assert!(matches!(inputs["workbook.extra"], InputDocument::Static(_)));
    }

    #[test]
    fn instance_type_accepts_both_forms() {
        let single: InstanceType = serde_json::from_value(json!("mem1_ssd1_v2_x8")).unwrap();
        assert_eq!(single, InstanceType::Single("mem1_ssd1_v2_x8".to_string()));
        let staged: InstanceType = serde_json::from_value(json!({ "stage-1": "mem2" })).unwrap();
        assert!(matches!(staged, InstanceType::PerStage(map) if map["stage-1"] == "mem2"));
    }
}
