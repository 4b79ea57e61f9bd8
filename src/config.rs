//! Load an assay config, validate it, and turn it into typed job templates
//!
//! Everything that can be checked without touching manifests or the backend is checked here, so
//! a bad config stops a run before a single job is submitted.

use std::collections::BTreeMap;
use std::path::Path;

use log::info;
use serde_json::Value;

use crate::error::ConfigError;
use crate::manifest::dialect::DialectSet;
use crate::mode::Mode;
use crate::panel::CodeRules;

/// Valid JSON configs are deserialised into a set of structs defined here
pub mod document;
/// Read config files from disk
pub mod read;
/// Embedded JSON schema for configs
pub mod schema;
/// Typed input templates and the reference file table
pub mod template;

pub use template::{InputField, ModeTemplate, ReferenceFiles, SearchField};

/// A fully validated assay config, shared read-only by every part of a run
#[derive(Debug)]
pub struct Config {
    pub assay: String,
    pub version: String,
    pub references: ReferenceFiles,
    pub dialects: DialectSet,
    pub codes: CodeRules,
    modes: BTreeMap<Mode, ModeTemplate>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let compiled_schema = schema::load_schema()?;
        let file = read::ConfigFile { path: path.to_path_buf(), compiled_schema };
        Config::from_document(file.read()?)
    }

    /// Build a config from untyped JSON that hasn't been validated yet
    pub fn from_json(json: Value) -> Result<Config, ConfigError> {
        let compiled_schema = schema::load_schema()?;
        Config::from_document(read::parse_document(&compiled_schema, json)?)
    }

    pub fn from_document(document: document::ConfigDocument) -> Result<Config, ConfigError> {
        let references = ReferenceFiles::new(document.reference_files);
        let dialects = DialectSet::standard(
            template::compile_pattern("structured dialect", &document.dialects.structured.pattern)?,
            template::compile_pattern("reanalysis dialect", &document.dialects.reanalysis.pattern)?,
        );
        let codes = CodeRules::new(
            template::compile_pattern("test code pattern", &document.test_codes.code_pattern)?,
            template::compile_pattern("gene symbol pattern", &document.test_codes.symbol_pattern)?,
        );

        let mut modes = BTreeMap::new();
        for (mode, mode_document) in document.modes {
            let template = ModeTemplate::from_document(mode, mode_document, &references)?;
            info!("Loaded {} template with {} input(s)", mode, template.inputs.len());
            modes.insert(mode, template);
        }

        Ok(Config {
            assay: document.assay,
            version: document.version,
            references,
            dialects,
            codes,
            modes,
        })
    }

    pub fn template(&self, mode: Mode) -> Option<&ModeTemplate> {
        self.modes.get(&mode)
    }

    /// Assay name and version, used to name run folders
    pub fn assay_id(&self) -> String {
        format!("{}_{}", self.assay, self.version)
    }
}

/// Shared config used by unit tests across the crate
#[cfg(test)]
pub mod fixtures {
    use serde_json::{json, Value};

    use super::Config;

    pub fn config_json() -> Value {
        json!({
            "assay": "CEN",
            "version": "2.1.0",
            "reference_files": {
                "genepanels": "file-genepanels",
                "exons": "file-exons",
                "vep_config": "file-vep",
                "interval_list": "file-intervals"
            },
            "dialects": {
                "structured": { "pattern": "^[A-Za-z0-9]+-[A-Za-z0-9]+$" },
                "reanalysis": { "pattern": "^(X\\d+|S\\d+)$" }
            },
            "test_codes": {
                "code_pattern": "^[RC]\\d+(\\.\\d+)?$",
                "symbol_pattern": "^(_HGNC:\\d+|[A-Z][A-Z0-9-]*)$"
            },
            "modes": {
                "cnv_call": {
                    "executable": "app-cnvcall",
                    "scope": "run",
                    "instance_type": "mem1_ssd1_v2_x36",
                    "inputs": {
                        "bambais": { "search": { "folder": "sentieon", "pattern": "\\.bam(\\.bai)?$", "role": "alignments", "multiple": true } },
                        "interval_list": "INPUT-interval_list",
                        "debug_fail_start": false
                    }
                },
                "snv_reports": {
                    "executable": "workflow-snvreports",
                    "instance_type": { "stage-vep": "mem1_ssd1_v2_x8" },
                    "inputs": {
                        "stage-vep.vcf": { "search": { "folder": "sentieon", "pattern": "[^g]\\.vcf\\.gz$", "role": "variant calls" } },
                        "stage-athena.mosdepth_files": { "search": { "folder": "mosdepth", "pattern": "(per-base\\.bed\\.gz|reference)", "role": "coverage", "multiple": true } },
                        "stage-vep.config_file": "INPUT-vep_config",
                        "stage-bed.gene_panels": "INPUT-genepanels",
                        "stage-bed.flank": 495,
                        "stage-workbook.clinical_indication": { "dynamic": "clinical_indications" },
                        "stage-workbook.panel": { "dynamic": "panels" },
                        "stage-bed.output_file_prefix": { "dynamic": "test_codes" },
                        "stage-workbook.output_prefix": { "dynamic": "output_name" }
                    },
                    "previous_reports": { "folder": "workbooks", "extension": "xlsx" }
                },
                "mosaic_reports": {
                    "executable": "workflow-mosaicreports",
                    "inputs": {
                        "stage-vep.vcf": { "search": { "folder": "mutect2", "pattern": "\\.vcf\\.gz$", "role": "mosaic calls" } },
                        "stage-workbook.clinical_indication": { "dynamic": "clinical_indications" },
                        "stage-workbook.sample": { "dynamic": "sample" }
                    }
                },
                "cnv_reports": {
                    "executable": "workflow-cnvreports",
                    "inputs": {
                        "stage-vep.vcf": { "search": { "folder": "", "pattern": "_segments\\.vcf$", "role": "cnv calls", "source": "call_job" } },
                        "stage-excluded.regions": { "search": { "folder": "", "pattern": "_excluded_intervals\\.bed$", "role": "region exclusions", "source": "call_job", "shared": true } },
                        "stage-workbook.clinical_indication": { "dynamic": "clinical_indications" },
                        "stage-workbook.panel": { "dynamic": "panels" },
                        "stage-workbook.call_job": { "dynamic": "call_job" }
                    }
                },
                "aggregate": {
                    "executable": "app-aggregate",
                    "scope": "run",
                    "inputs": {
                        "reports_folder": { "dynamic": "reports_folder" },
                        "qc_status": { "dynamic": "qc_status" },
                        "exons": "INPUT-exons"
                    }
                }
            }
        })
    }

    pub fn config() -> Config {
        Config::from_json(config_json()).unwrap()
    }
}
