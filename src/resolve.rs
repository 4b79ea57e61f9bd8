//! Resolve requested test codes against the panel index and group them into report jobs

use std::collections::BTreeSet;

use log::{info, warn};
use serde::Serialize;

use crate::exclusion::{Exclusion, Reason, RejectedTest, Stage};
use crate::manifest::dialect::Dialect;
use crate::manifest::SampleRequests;
use crate::panel::{Lookup, PanelIndex};

/// Separator for clinical indications and panels in job inputs
pub const LIST_SEPARATOR: &str = ";";
/// Separator for test code prefixes in job inputs
pub const CODE_SEPARATOR: &str = "&&";

/// A requested code that matched the panel index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTest {
    pub sample: String,
    pub clinical_indication: String,
    pub panel: String,
    /// the code as requested, used to name outputs
    pub prefix: String,
}

/// Every resolved test of one sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleTests {
    pub sample: String,
    pub dialect: Dialect,
    pub tests: Vec<ResolvedTest>,
}

#[derive(Debug, Default)]
pub struct Resolution {
    /// samples with at least one resolved test, in manifest order
    pub samples: Vec<SampleTests>,
    pub rejected: Vec<RejectedTest>,
    pub exclusions: Vec<Exclusion>,
}

impl Resolution {
    pub fn get(&self, sample: &str) -> Option<&SampleTests> {
        self.samples.iter().find(|tests| tests.sample == sample)
    }
}

/// Resolve every request that isn't excluded
pub fn resolve_all(requests: &SampleRequests, index: &PanelIndex, excluded: &BTreeSet<String>) -> Resolution {
    let mut resolution = Resolution::default();

    for missing in excluded.iter().filter(|sample| !requests.contains(sample)) {
        warn!("Excluded sample {} is not in any manifest", missing);
        resolution.exclusions.push(Exclusion::new(missing, Stage::Resolve, Reason::NotInManifest, "exclusion names a sample absent from every manifest"));
    }

    for request in requests.iter() {
        if excluded.contains(&request.sample) {
            info!("Skipping {}: excluded on request", request.sample);
            resolution.exclusions.push(Exclusion::new(&request.sample, Stage::Resolve, Reason::UserExcluded, ""));
            continue;
        }

        let mut tests: Vec<ResolvedTest> = Vec::new();
        for code in &request.codes {
            match index.lookup(code) {
                Lookup::Found(entry) => {
                    if tests.iter().any(|test| test.clinical_indication == entry.clinical_indication) {
                        info!("{}: {} resolves to {} again, keeping one", request.sample, code, entry.clinical_indication);
                        continue;
                    }
                    tests.push(ResolvedTest {
                        sample: request.sample.clone(),
                        clinical_indication: entry.clinical_indication,
                        panel: entry.panel,
                        prefix: code.clone(),
                    });
                }
                Lookup::Ambiguous(candidates) => {
                    warn!("{}: test code {} is ambiguous ({})", request.sample, code, candidates.join(", "));
                    resolution.rejected.push(RejectedTest {
                        sample: request.sample.clone(),
                        code: code.clone(),
                        reason: Reason::UnknownCode,
                        detail: format!("ambiguous prefix matches {}", candidates.join(", ")),
                    });
                }
                Lookup::Missing => {
                    warn!("{}: test code {} not found in panel index", request.sample, code);
                    resolution.rejected.push(RejectedTest {
                        sample: request.sample.clone(),
                        code: code.clone(),
                        reason: Reason::UnknownCode,
                        detail: String::new(),
                    });
                }
            }
        }

        if tests.is_empty() {
            warn!("Skipping {}: no valid tests", request.sample);
            resolution.exclusions.push(Exclusion::new(&request.sample, Stage::Resolve, Reason::NoValidTests, request.codes.join(",")));
            continue;
        }
        resolution.samples.push(SampleTests { sample: request.sample.clone(), dialect: request.dialect, tests });
    }

    info!("Resolved tests for {} sample(s), {} code(s) rejected", resolution.samples.len(), resolution.rejected.len());
    resolution
}

/// One report job: one sample with one or more of its resolved tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportGroup {
    pub sample: String,
    pub dialect: Dialect,
    pub tests: Vec<ResolvedTest>,
}

impl ReportGroup {
    pub fn clinical_indications(&self) -> String {
        self.tests.iter().map(|test| test.clinical_indication.as_str()).collect::<Vec<_>>().join(LIST_SEPARATOR)
    }

    pub fn panels(&self) -> String {
        self.tests.iter().map(|test| test.panel.as_str()).collect::<Vec<_>>().join(LIST_SEPARATOR)
    }

    pub fn test_codes(&self) -> String {
        self.tests.iter().map(|test| test.prefix.as_str()).collect::<Vec<_>>().join(CODE_SEPARATOR)
    }

    /// Sample and codes, the fixed part of versioned output names
    pub fn name_stem(&self) -> String {
        let codes: Vec<&str> = self.tests.iter().map(|test| test.prefix.as_str()).collect();
        format!("{}_{}", self.sample, codes.join("_"))
    }
}

/// Split: one group per resolved test. Otherwise one group per sample.
pub fn report_groups(resolution: &Resolution, split: bool) -> Vec<ReportGroup> {
    let mut groups = Vec::new();
    for sample in &resolution.samples {
        if split {
            for test in &sample.tests {
                groups.push(ReportGroup { sample: sample.sample.clone(), dialect: sample.dialect, tests: vec![test.clone()] });
            }
        } else {
            groups.push(ReportGroup { sample: sample.sample.clone(), dialect: sample.dialect, tests: sample.tests.clone() });
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::SampleRequest;
    use crate::panel::fixtures::rules;

    fn index() -> PanelIndex {
        PanelIndex::from_rows(
            vec![
                ("R207.1_Inherited cancer".to_string(), "PanelX".to_string()),
                ("R208.1_Inherited breast cancer".to_string(), "PanelY".to_string()),
                ("R300.1_Alpha".to_string(), "PanelA".to_string()),
                ("R300.2_Beta".to_string(), "PanelB".to_string()),
            ],
            rules(),
        )
    }

    fn requests(rows: &[(&str, &[&str])]) -> SampleRequests {
        rows.iter()
            .map(|(sample, codes)| SampleRequest {
                sample: sample.to_string(),
                dialect: Dialect::Reanalysis,
                codes: codes.iter().map(|c| c.to_string()).collect(),
            })
            .collect()
    }

    #[test]
    fn symbol_and_indication_scenario() {
        let resolution = resolve_all(&requests(&[("S1", &["BRCA1"]), ("S2", &["R207.1"])]), &index(), &BTreeSet::new());

        assert!(resolution.rejected.is_empty());
        assert!(resolution.exclusions.is_empty());
        assert_eq!(
            resolution.get("S1").unwrap().tests,
            vec![ResolvedTest { sample: "S1".into(), clinical_indication: "BRCA1".into(), panel: "BRCA1".into(), prefix: "BRCA1".into() }]
        );
        assert_eq!(
            resolution.get("S2").unwrap().tests,
            vec![ResolvedTest { sample: "S2".into(), clinical_indication: "R207.1_Inherited cancer".into(), panel: "PanelX".into(), prefix: "R207.1".into() }]
        );

        let groups = report_groups(&resolution, false);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].clinical_indications(), "R207.1_Inherited cancer");
    }

    #[test]
    fn unknown_and_ambiguous_codes_are_rejected() {
        let resolution = resolve_all(&requests(&[("S1", &["R207.1", "R999.1", "R300.3"])]), &index(), &BTreeSet::new());

        assert_eq!(resolution.get("S1").unwrap().tests.len(), 1);
        assert_eq!(resolution.rejected.len(), 2);
        assert!(resolution.rejected.iter().all(|r| r.reason == Reason::UnknownCode));
        assert!(resolution.rejected[1].detail.contains("R300.1, R300.2"));
    }

    #[test]
    fn excluded_and_empty_samples_are_recorded() {
        let excluded = BTreeSet::from(["S1".to_string(), "S9".to_string()]);
        let resolution = resolve_all(&requests(&[("S1", &["R207.1"]), ("S2", &["R999.1"]), ("S3", &["R208.1"])]), &index(), &excluded);

        let samples: Vec<&str> = resolution.samples.iter().map(|s| s.sample.as_str()).collect();
        assert_eq!(samples, vec!["S3"]);
        let reasons: Vec<(&str, Reason)> = resolution.exclusions.iter().map(|e| (e.sample.as_str(), e.reason)).collect();
        assert_eq!(reasons, vec![("S9", Reason::NotInManifest), ("S1", Reason::UserExcluded), ("S2", Reason::NoValidTests)]);
    }

    #[test]
    fn split_policy_controls_group_count() {
        let resolution = resolve_all(&requests(&[("S1", &["R207.1", "R208.1", "BRCA2"]), ("S2", &["R207.1"])]), &index(), &BTreeSet::new());

        let split = report_groups(&resolution, true);
        assert_eq!(split.iter().filter(|g| g.sample == "S1").count(), 3);
        assert_eq!(split.iter().filter(|g| g.sample == "S2").count(), 1);

        let merged = report_groups(&resolution, false);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].clinical_indications(), "R207.1_Inherited cancer;R208.1_Inherited breast cancer;BRCA2");
        assert_eq!(merged[0].panels(), "PanelX;PanelY;BRCA2");
        assert_eq!(merged[0].test_codes(), "R207.1&&R208.1&&BRCA2");
        assert_eq!(merged[0].name_stem(), "S1_R207.1_R208.1_BRCA2");
    }

    #[test]
    fn duplicate_resolutions_collapse() {
        let resolution = resolve_all(&requests(&[("S1", &["R207.1", "R207.2"])]), &index(), &BTreeSet::new());
        assert_eq!(resolution.get("S1").unwrap().tests.len(), 1);
    }
}
