use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{info, warn};

use crate::error::InputError;
use crate::panel::{CodeKind, CodeRules, PanelEntry};

/// Outcome of looking a code up, with enough detail to explain a rejection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(PanelEntry),
    /// the code's prefix matched more than one entry
    Ambiguous(Vec<String>),
    Missing,
}

/// Immutable table of clinical indication codes, loaded once per run
#[derive(Debug, Clone)]
pub struct PanelIndex {
    entries: BTreeMap<String, PanelEntry>,
    rules: CodeRules,
}

impl PanelIndex {
    /// Read a tab separated panel table: clinical indication, panel name, then ignored columns
    /// (usually one row per gene)
    pub fn load(path: &Path, rules: CodeRules) -> Result<PanelIndex, InputError> {
        info!("Reading panel table {}", path.display());
        let file = File::open(path).map_err(|source| InputError::Read { path: path.to_path_buf(), source })?;
        let index = PanelIndex::from_reader(file, rules).map_err(|source| InputError::Parse { path: path.to_path_buf(), source })?;
        info!("Panel table holds {} clinical indication(s)", index.len());
        Ok(index)
    }

    pub fn from_reader<R: Read>(reader: R, rules: CodeRules) -> Result<PanelIndex, csv::Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_reader(reader);

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            match (record.get(0), record.get(1)) {
                (Some(ci), Some(panel)) if !ci.trim().is_empty() => rows.push((ci.trim().to_string(), panel.trim().to_string())),
                _ => warn!("Skipping panel table line {} with fewer than two columns", record.position().map_or(0, |p| p.line())),
            }
        }
        Ok(PanelIndex::from_rows(rows, rules))
    }

    /// Build the index from (clinical indication, panel) rows
    ///
    /// The key of a row is its clinical indication up to the first `_`. Rows sharing a key are
    /// merged and their distinct panel names joined with `;`.
    pub fn from_rows<I>(rows: I, rules: CodeRules) -> PanelIndex
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut entries: BTreeMap<String, PanelEntry> = BTreeMap::new();
        for (clinical_indication, panel) in rows {
            let code = clinical_indication.split('_').next().unwrap_or_default().to_string();
            match entries.get_mut(&code) {
                Some(entry) => {
                    if entry.clinical_indication != clinical_indication {
                        warn!("Code {} names two clinical indications, keeping {}", code, entry.clinical_indication);
                    }
                    if !entry.panel.split(';').any(|known| known == panel) {
                        entry.panel = format!("{};{}", entry.panel, panel);
                    }
                }
                None => {
                    entries.insert(code.clone(), PanelEntry { code, clinical_indication, panel });
                }
            }
        }
        PanelIndex { entries, rules }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn resolve(&self, code: &str) -> Option<PanelEntry> {
        match self.lookup(code) {
            Lookup::Found(entry) => Some(entry),
            _ => None,
        }
    }

    /// Gene symbols bypass the table; indication codes try an exact match, then a prefix match
    /// that only succeeds when exactly one entry shares the prefix
    pub fn lookup(&self, code: &str) -> Lookup {
        match self.rules.classify(code) {
            Some(CodeKind::Symbol) => return Lookup::Found(PanelEntry::for_symbol(code)),
            Some(CodeKind::Indication) => {}
            None => return Lookup::Missing,
        }

        if let Some(entry) = self.entries.get(code) {
            return Lookup::Found(entry.clone());
        }

        let prefix = strip_version(code);
        let candidates: Vec<&PanelEntry> = self
            .entries
            .values()
            .filter(|entry| entry.code.split('.').next() == Some(prefix))
            .collect();

        match candidates.as_slice() {
            [] => Lookup::Missing,
            [only] => Lookup::Found((*only).clone()),
            many => Lookup::Ambiguous(many.iter().map(|entry| entry.code.clone()).collect()),
        }
    }
}

/// Drop a trailing `.<digits>` suffix: `R207.2` -> `R207`
fn strip_version(code: &str) -> &str {
    match code.rsplit_once('.') {
        Some((head, tail)) if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) => head,
        _ => code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::fixtures::rules;

    fn index(rows: &[(&str, &str)]) -> PanelIndex {
        PanelIndex::from_rows(rows.iter().map(|(ci, panel)| (ci.to_string(), panel.to_string())), rules())
    }

    #[test]
    fn exact_match_wins() {
        let index = index(&[("R207.1_Inherited cancer", "PanelX"), ("R208.1_Inherited breast cancer", "PanelY")]);
        let entry = index.resolve("R207.1").unwrap();
        assert_eq!(entry.clinical_indication, "R207.1_Inherited cancer");
        assert_eq!(entry.panel, "PanelX");
    }

    #[test]
    fn unique_prefix_matches_other_version() {
        let index = index(&[("R207.1_Inherited cancer", "PanelX")]);
        assert_eq!(index.resolve("R207.2").unwrap().code, "R207.1");
        assert_eq!(index.resolve("R207").unwrap().code, "R207.1");
        assert!(index.resolve("R20.1").is_none());
    }

    #[test]
    fn ambiguous_prefix_never_guesses() {
        let index = index(&[("R207.1_Inherited cancer", "PanelX"), ("R207.2_Inherited cancer v2", "PanelZ")]);
        assert!(matches!(index.lookup("R207.3"), Lookup::Ambiguous(codes) if codes == vec!["R207.1", "R207.2"]));
        assert!(index.resolve("R207.3").is_none());
        assert!(index.resolve("R207.2").is_some());
    }

    #[test]
    fn symbols_bypass_the_table() {
        let index = index(&[]);
        assert_eq!(index.resolve("BRCA1"), Some(PanelEntry::for_symbol("BRCA1")));
        assert_eq!(index.resolve("_HGNC:1100").unwrap().panel, "_HGNC:1100");
    }

    #[test]
    fn gene_rows_collapse_and_panels_join() {
        let index = index(&[
            ("R134.1_Familial hypercholesterolaemia_G", "Hypercholesterolaemia_2.0"),
            ("R134.1_Familial hypercholesterolaemia_G", "Hypercholesterolaemia_2.0"),
            ("R134.1_Familial hypercholesterolaemia_G", "Lipoprotein_1.1"),
        ]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.resolve("R134.1").unwrap().panel, "Hypercholesterolaemia_2.0;Lipoprotein_1.1");
    }

    #[test]
    fn reads_tab_separated_table() {
        let table = "# genepanels\nR207.1_Inherited cancer\tPanelX\tHGNC:1100\nR207.1_Inherited cancer\tPanelX\tHGNC:1101\nbadline\n";
        let index = PanelIndex::from_reader(table.as_bytes(), rules()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.resolve("R207.1").unwrap().panel, "PanelX");
    }

    #[test]
    fn version_suffix_is_only_numeric() {
        assert_eq!(strip_version("R207.12"), "R207");
        assert_eq!(strip_version("R207"), "R207");
        assert_eq!(strip_version("R207.x"), "R207.x");
    }
}
