//! Turn a mode template plus located files into the concrete input payload of one job
//!
//! Assembly has no side effects: it reads the backend to find earlier report versions but never
//! submits anything.

use std::collections::BTreeMap;

use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::{FileRef, Location};
use crate::config::document::DynamicField;
use crate::config::template::ReportHistory;
use crate::config::{InputField, ModeTemplate, ReferenceFiles, SearchField};
use crate::error::{ConfigError, DispatchError};
use crate::exclusion::Reason;
use crate::locate::{Located, LocatedFile, Locator};
use crate::resolve::ReportGroup;

/// Final input map of a job, keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobInputPayload {
    pub inputs: BTreeMap<String, Value>,
}

/// What a job is assembled for
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Group(&'a ReportGroup),
    Run,
}

impl Target<'_> {
    pub fn label(&self) -> String {
        match self {
            Target::Group(group) => group.name_stem(),
            Target::Run => "run".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Assembly {
    Ready(JobInputPayload),
    Dropped { reason: Reason, detail: String },
}

/// Values shared by every job of a run
pub struct Assembler<'a> {
    pub references: &'a ReferenceFiles,
    pub locator: &'a Locator<'a>,
    /// where earlier reports are looked for
    pub input_root: &'a Location,
    pub reports_folder: &'a str,
    pub call_job: Option<&'a str>,
    /// QC status file id handed to aggregation
    pub qc_file: Option<&'a str>,
}

impl Assembler<'_> {
    pub fn assemble(&self, template: &ModeTemplate, target: Target, located: &Located) -> Result<Assembly, DispatchError> {
        let mut inputs = BTreeMap::new();
        let mut archived = Vec::new();

        for (name, field) in &template.inputs {
            let owner = format!("{} input {}", template.mode, name);
            let value = match field {
                InputField::Static(value) => self.references.substitute(&owner, value)?,
                InputField::Reference(key) => self
                    .references
                    .get(key)
                    .map(|id| Value::String(id.to_string()))
                    .ok_or_else(|| ConfigError::UnknownReference { key: key.clone(), field: owner.clone() })?,
                InputField::Search(search) => {
                    let files = select(located.get(name).map(Vec::as_slice).unwrap_or_default(), search, target);
                    if let Some((reason, detail)) = check_matches(search, &files) {
                        warn!("Dropping {} {}: {}", template.mode, target.label(), detail);
                        return Ok(Assembly::Dropped { reason, detail });
                    }
                    archived.extend(files.iter().filter(|f| f.archived).map(|f| f.file.name.clone()));
                    let ids: Vec<Value> = files.iter().map(|f| Value::String(f.file.id.clone())).collect();
                    match search.multiple {
                        true => Value::Array(ids),
                        false => ids.into_iter().next().unwrap_or(Value::Null),
                    }
                }
                InputField::Dynamic(dynamic) => match self.dynamic(template, *dynamic, target, name)? {
                    Some(value) => value,
                    None => {
                        let detail = format!("no report version left after {}", u32::MAX);
                        warn!("Dropping {} {}: {}", template.mode, target.label(), detail);
                        return Ok(Assembly::Dropped { reason: Reason::VersionExhausted, detail });
                    }
                },
            };
            inputs.insert(name.clone(), value);
        }

        if !archived.is_empty() {
            let detail = format!("archived: {}", archived.join(", "));
            warn!("Dropping {} {}: {}", template.mode, target.label(), detail);
            return Ok(Assembly::Dropped { reason: Reason::ArchivedInput, detail });
        }

        debug!("Assembled {} {} with {} input(s)", template.mode, target.label(), inputs.len());
        Ok(Assembly::Ready(JobInputPayload { inputs }))
    }

    /// None when every report version of the group is taken
    fn dynamic(&self, template: &ModeTemplate, dynamic: DynamicField, target: Target, name: &str) -> Result<Option<Value>, DispatchError> {
        let group = match (target, dynamic.is_per_sample()) {
            (Target::Group(group), _) => Some(group),
            (Target::Run, true) => {
                return Err(ConfigError::UnavailableDynamic { mode: template.mode, field: name.to_string(), dynamic: dynamic.name().to_string() }.into())
            }
            (Target::Run, false) => None,
        };

        let value = match (dynamic, group) {
            (DynamicField::ClinicalIndications, Some(group)) => group.clinical_indications(),
            (DynamicField::Panels, Some(group)) => group.panels(),
            (DynamicField::TestCodes, Some(group)) => group.test_codes(),
            (DynamicField::Sample, Some(group)) => group.sample.clone(),
            (DynamicField::OutputName, Some(group)) => match self.output_name(group, template.previous_reports.as_ref())? {
                Some(output_name) => output_name,
                None => return Ok(None),
            },
            (DynamicField::ReportsFolder, _) => self.reports_folder.to_string(),
            (DynamicField::QcStatus, _) => return Ok(Some(self.qc_file.map_or(Value::Null, |id| Value::String(id.to_string())))),
            (DynamicField::CallJob, _) => self
                .call_job
                .map(str::to_string)
                .ok_or_else(|| ConfigError::Conflict(format!("{} input {} needs a calling job", template.mode, name)))?,
            (_, None) => {
                return Err(ConfigError::UnavailableDynamic { mode: template.mode, field: name.to_string(), dynamic: dynamic.name().to_string() }.into())
            }
        };
        Ok(Some(Value::String(value)))
    }

    /// `<sample>_<codes>_<version>`, one past the newest earlier report of the same group
    fn output_name(&self, group: &ReportGroup, history: Option<&ReportHistory>) -> Result<Option<String>, DispatchError> {
        let stem = group.name_stem();
        let version = match history {
            Some(history) => {
                let pattern = report_pattern(&stem, &history.extension)?;
                let previous = self.locator.list(self.input_root, &history.folder, &pattern)?;
                next_version(&previous, &pattern)
            }
            None => Some(1),
        };
        Ok(version.map(|version| format!("{}_{}", stem, version)))
    }
}

fn select<'f>(files: &'f [LocatedFile], search: &SearchField, target: Target) -> Vec<&'f LocatedFile> {
    match target {
        Target::Group(group) if !search.shared => files.iter().filter(|f| f.sample == group.sample).collect(),
        _ => files.iter().collect(),
    }
}

fn check_matches(search: &SearchField, files: &[&LocatedFile]) -> Option<(Reason, String)> {
    match files.len() {
        0 => Some((Reason::MissingRequiredFile, format!("no {} file in {}", search.role, display_folder(&search.folder)))),
        1 => None,
        _ if search.multiple => None,
        _ => {
            let names: Vec<&str> = files.iter().map(|f| f.file.name.as_str()).collect();
            Some((Reason::AmbiguousFile, format!("{} {} files: {}", names.len(), search.role, names.join(", "))))
        }
    }
}

fn display_folder(folder: &str) -> &str {
    match folder.is_empty() {
        true => "the search root",
        false => folder,
    }
}

/// Matches earlier reports of one group and captures their version
pub fn report_pattern(stem: &str, extension: &str) -> Result<Regex, ConfigError> {
    let pattern = format!(r"^{}_(\d+)\.{}$", regex::escape(stem), regex::escape(extension));
    crate::config::template::compile_pattern("previous report lookup", &pattern)
}

/// One past the highest version among `previous`, or 1 when there is none
///
/// Versions too large for a `u32` are ignored. None when the highest version is `u32::MAX`.
pub fn next_version(previous: &[FileRef], pattern: &Regex) -> Option<u32> {
    previous
        .iter()
        .filter_map(|file| pattern.captures(&file.name))
        .filter_map(|captures| captures.get(1).and_then(|version| version.as_str().parse::<u32>().ok()))
        .max()
        .map_or(Some(1), |highest| highest.checked_add(1))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::config::fixtures::config;
    use crate::config::Config;
    use crate::manifest::dialect::Dialect;
    use crate::mode::Mode;
    use crate::resolve::ResolvedTest;

    fn group(sample: &str, codes: &[(&str, &str, &str)]) -> ReportGroup {
        ReportGroup {
            sample: sample.to_string(),
            dialect: Dialect::Reanalysis,
            tests: codes
                .iter()
                .map(|(prefix, ci, panel)| ResolvedTest {
                    sample: sample.to_string(),
                    clinical_indication: ci.to_string(),
                    panel: panel.to_string(),
                    prefix: prefix.to_string(),
                })
                .collect(),
        }
    }

    fn file(name: &str) -> FileRef {
        FileRef { id: format!("file-{}", name), name: name.to_string(), folder: "workbooks".to_string() }
    }

    fn located(config: &Config, backend: &MockBackend, mode: Mode, samples: &[&str]) -> Located {
        let locator = Locator::new(backend, &config.dialects);
        let samples = samples.iter().map(|s| (s.to_string(), Dialect::Reanalysis)).collect();
        let root = Location::Folder("/run1".to_string());
        config
            .template(mode)
            .unwrap()
            .search_fields()
            .map(|(name, search)| (name.clone(), locator.find(&root, search, &samples).unwrap()))
            .collect()
    }

    fn snv_backend() -> MockBackend {
        let backend = MockBackend::new();
        backend.add_file("/run1/sentieon", "S1-GM1_markdup.vcf.gz");
        backend.add_file("/run1/sentieon", "S1-GM1_markdup.g.vcf.gz");
        backend.add_file("/run1/mosdepth", "S1-GM1.per-base.bed.gz");
        backend.add_file("/run1/mosdepth", "S1-GM1.reference_build.txt");
        backend
    }

    #[test]
    fn version_follows_the_highest_earlier_report() {
        let pattern = report_pattern("S1_R207.1", "xlsx").unwrap();
        let previous = vec![file("S1_R207.1_1.xlsx"), file("S1_R207.1_3.xlsx"), file("S1_R207.1_2.xlsx"), file("S1_R207.1_9.pdf")];
        assert_eq!(next_version(&previous, &pattern), Some(4));
        assert_eq!(next_version(&[], &pattern), Some(1));
        assert_eq!(next_version(&[file("S10_R207.1_7.xlsx")], &pattern), Some(1));
    }

    #[test]
    fn version_at_the_limit_has_no_successor() {
        let pattern = report_pattern("S1_R207.1", "xlsx").unwrap();
        assert_eq!(next_version(&[file("S1_R207.1_4294967295.xlsx")], &pattern), None);
        assert_eq!(next_version(&[file("S1_R207.1_4294967296.xlsx"), file("S1_R207.1_2.xlsx")], &pattern), Some(3));
    }

    #[test]
    fn exhausted_versions_drop_the_group() {
        let config = config();
        let backend = snv_backend();
        backend.add_file("/run1/workbooks", "S1_R207.1_4294967295.xlsx");
        let locator = Locator::new(&backend, &config.dialects);
        let root = Location::Folder("/run1".to_string());
        let assembler = Assembler { references: &config.references, locator: &locator, input_root: &root, reports_folder: "/run1/out", call_job: None, qc_file: None };

        let group = group("S1", &[("R207.1", "R207.1_Inherited cancer", "PanelX")]);
        let located = located(&config, &backend, Mode::SnvReports, &["S1"]);
        let assembly = assembler.assemble(config.template(Mode::SnvReports).unwrap(), Target::Group(&group), &located).unwrap();
        assert!(matches!(assembly, Assembly::Dropped { reason: Reason::VersionExhausted, .. }));
    }

    #[test]
    fn snv_report_payload_is_complete() {
        let config = config();
        let backend = snv_backend();
        backend.add_file("/run1/workbooks", "S1_R207.1_BRCA1_1.xlsx");
        backend.add_file("/run1/workbooks", "S1_R207.1_BRCA1_2.xlsx");
        let locator = Locator::new(&backend, &config.dialects);
        let root = Location::Folder("/run1".to_string());
        let assembler = Assembler { references: &config.references, locator: &locator, input_root: &root, reports_folder: "/run1/out", call_job: None, qc_file: None };

        let group = group("S1", &[("R207.1", "R207.1_Inherited cancer", "PanelX"), ("BRCA1", "BRCA1", "BRCA1")]);
        let located = located(&config, &backend, Mode::SnvReports, &["S1"]);
        let assembly = assembler.assemble(config.template(Mode::SnvReports).unwrap(), Target::Group(&group), &located).unwrap();

        let Assembly::Ready(payload) = assembly else { panic!("expected a payload") };
        let inputs = &payload.inputs;
        assert_eq!(inputs["stage-vep.vcf"], json!("file-/run1/sentieon/S1-GM1_markdup.vcf.gz"));
        assert_eq!(inputs["stage-athena.mosdepth_files"].as_array().unwrap().len(), 2);
        assert_eq!(inputs["stage-vep.config_file"], json!("file-vep"));
        assert_eq!(inputs["stage-bed.gene_panels"], json!("file-genepanels"));
        assert_eq!(inputs["stage-bed.flank"], json!(495));
        assert_eq!(inputs["stage-workbook.clinical_indication"], json!("R207.1_Inherited cancer;BRCA1"));
        assert_eq!(inputs["stage-workbook.panel"], json!("PanelX;BRCA1"));
        assert_eq!(inputs["stage-bed.output_file_prefix"], json!("R207.1&&BRCA1"));
        assert_eq!(inputs["stage-workbook.output_prefix"], json!("S1_R207.1_BRCA1_3"));
    }

    #[test]
    fn missing_file_drops_the_group() {
        let config = config();
        let backend = snv_backend();
        let locator = Locator::new(&backend, &config.dialects);
        let root = Location::Folder("/run1".to_string());
        let assembler = Assembler { references: &config.references, locator: &locator, input_root: &root, reports_folder: "/run1/out", call_job: None, qc_file: None };

        let group = group("S2", &[("R207.1", "R207.1_Inherited cancer", "PanelX")]);
        let located = located(&config, &backend, Mode::SnvReports, &["S1", "S2"]);
        let assembly = assembler.assemble(config.template(Mode::SnvReports).unwrap(), Target::Group(&group), &located).unwrap();
        assert!(matches!(assembly, Assembly::Dropped { reason: Reason::MissingRequiredFile, .. }));
    }

    #[test]
    fn two_candidates_for_one_file_is_ambiguous() {
        let config = config();
        let backend = snv_backend();
        backend.add_file("/run1/sentieon", "S1-GM1b_markdup.vcf.gz");
        let locator = Locator::new(&backend, &config.dialects);
        let root = Location::Folder("/run1".to_string());
        let assembler = Assembler { references: &config.references, locator: &locator, input_root: &root, reports_folder: "/run1/out", call_job: None, qc_file: None };

        let group = group("S1", &[("R207.1", "R207.1_Inherited cancer", "PanelX")]);
        let located = located(&config, &backend, Mode::SnvReports, &["S1"]);
        let assembly = assembler.assemble(config.template(Mode::SnvReports).unwrap(), Target::Group(&group), &located).unwrap();
        let Assembly::Dropped { reason, detail } = assembly else { panic!("expected a drop") };
        assert_eq!(reason, Reason::AmbiguousFile);
        assert!(detail.contains("S1-GM1b_markdup.vcf.gz"));
    }

    #[test]
    fn archived_inputs_drop_the_group() {
        let config = config();
        let backend = snv_backend();
        backend.archive("/run1/sentieon", "S1-GM1_markdup.vcf.gz");
        let locator = Locator::new(&backend, &config.dialects);
        let root = Location::Folder("/run1".to_string());
        let assembler = Assembler { references: &config.references, locator: &locator, input_root: &root, reports_folder: "/run1/out", call_job: None, qc_file: None };

        let group = group("S1", &[("R207.1", "R207.1_Inherited cancer", "PanelX")]);
        let located = located(&config, &backend, Mode::SnvReports, &["S1"]);
        let assembly = assembler.assemble(config.template(Mode::SnvReports).unwrap(), Target::Group(&group), &located).unwrap();
        assert!(matches!(assembly, Assembly::Dropped { reason: Reason::ArchivedInput, .. }));
    }

    #[test]
    fn run_scope_gets_run_values() {
        let config = config();
        let backend = MockBackend::new();
        let locator = Locator::new(&backend, &config.dialects);
        let root = Location::Folder("/run1".to_string());
        let assembler = Assembler { references: &config.references, locator: &locator, input_root: &root, reports_folder: "/run1/out", call_job: None, qc_file: None };

        let assembly = assembler.assemble(config.template(Mode::Aggregate).unwrap(), Target::Run, &Located::new()).unwrap();
        let Assembly::Ready(payload) = assembly else { panic!("expected a payload") };
        assert_eq!(payload.inputs["reports_folder"], json!("/run1/out"));
        assert_eq!(payload.inputs["exons"], json!("file-exons"));
        assert_eq!(payload.inputs["qc_status"], Value::Null);
        let keys: BTreeSet<&String> = payload.inputs.keys().collect();
        assert_eq!(keys.len(), 3);

        let assembler = Assembler { qc_file: Some("file-qc"), ..assembler };
        let Assembly::Ready(payload) = assembler.assemble(config.template(Mode::Aggregate).unwrap(), Target::Run, &Located::new()).unwrap() else {
            panic!("expected a payload")
        };
        assert_eq!(payload.inputs["qc_status"], json!("file-qc"));
    }
}
