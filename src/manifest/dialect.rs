use std::fmt;

use regex::Regex;
use serde::Serialize;

/// Manifest source formats
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// booking export: one (sample, test code) pair per row, samples named `<instrument>-<specimen>`
    Structured,
    /// reanalysis list: one row per sample with a single code or comma joined codes
    Reanalysis,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Dialect::Structured => write!(f, "structured"),
            Dialect::Reanalysis => write!(f, "reanalysis"),
        }
    }
}

/// Recovers the sample identifier a file name belongs to
pub trait SampleMatcher: fmt::Debug + Send + Sync {
    fn attribute(&self, file_name: &str) -> Option<String>;
}

/// The first `segments` parts of a name split on `delimiter`, e.g. `123-456` from
/// `123-456-EGG2_markdup.vcf.gz`
///
/// Names with fewer than `segments + 1` parts don't match: the last part would otherwise carry
/// the file extension.
#[derive(Debug, Clone)]
pub struct SegmentPrefix {
    pub delimiter: char,
    pub segments: usize,
}

impl SampleMatcher for SegmentPrefix {
    fn attribute(&self, file_name: &str) -> Option<String> {
        let parts: Vec<&str> = file_name.splitn(self.segments + 1, self.delimiter).collect();
        if parts.len() <= self.segments || parts[..self.segments].iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(parts[..self.segments].join(&self.delimiter.to_string()))
    }
}

/// A leading alphanumeric run that must be followed by one of `terminators`, e.g. `X223344`
/// from `X223344-GM2.vcf.gz`
#[derive(Debug, Clone)]
pub struct LeadingRun {
    pub terminators: Vec<char>,
}

impl SampleMatcher for LeadingRun {
    fn attribute(&self, file_name: &str) -> Option<String> {
        let end = file_name.find(|c: char| !c.is_ascii_alphanumeric())?;
        let next = file_name[end..].chars().next()?;
        if end == 0 || !self.terminators.contains(&next) {
            return None;
        }
        Some(file_name[..end].to_string())
    }
}

/// Everything before the first `delimiter`, e.g. the full sample name in
/// `123-456-EGG2-MA_markdup.bam`
#[derive(Debug, Clone)]
pub struct UntilDelimiter {
    pub delimiter: char,
}

impl SampleMatcher for UntilDelimiter {
    fn attribute(&self, file_name: &str) -> Option<String> {
        match file_name.split_once(self.delimiter) {
            Some((sample, _)) if !sample.is_empty() => Some(sample.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct DialectRule {
    dialect: Dialect,
    pattern: Regex,
    matcher: Box<dyn SampleMatcher>,
}

/// Registered dialects, checked in registration order
#[derive(Debug, Default)]
pub struct DialectSet {
    rules: Vec<DialectRule>,
}

impl DialectSet {
    /// The two standard dialects with their file attribution rules
    pub fn standard(structured: Regex, reanalysis: Regex) -> DialectSet {
        let mut set = DialectSet::default();
        set.register(Dialect::Structured, structured, Box::new(SegmentPrefix { delimiter: '-', segments: 2 }));
        set.register(Dialect::Reanalysis, reanalysis, Box::new(LeadingRun { terminators: vec!['-', '.'] }));
        set
    }

    /// Add a dialect; a dialect registered twice keeps its first rule
    pub fn register(&mut self, dialect: Dialect, pattern: Regex, matcher: Box<dyn SampleMatcher>) {
        if self.rules.iter().any(|rule| rule.dialect == dialect) {
            return;
        }
        self.rules.push(DialectRule { dialect, pattern, matcher });
    }

    /// First dialect whose identifier pattern matches `sample_id`
    pub fn detect(&self, sample_id: &str) -> Option<Dialect> {
        self.rules.iter().find(|rule| rule.pattern.is_match(sample_id)).map(|rule| rule.dialect)
    }

    pub fn attribute(&self, file_name: &str, dialect: Dialect) -> Option<String> {
        self.rules
            .iter()
            .find(|rule| rule.dialect == dialect)
            .and_then(|rule| rule.matcher.attribute(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> DialectSet {
        DialectSet::standard(Regex::new(r"^\w+-\w+$").unwrap(), Regex::new(r"^X\d+$").unwrap())
    }

    #[test]
    fn detects_dialect_from_identifier() {
        let set = standard();
        assert_eq!(set.detect("123456789-23123S0012"), Some(Dialect::Structured));
        assert_eq!(set.detect("X223344"), Some(Dialect::Reanalysis));
        assert_eq!(set.detect("no identifier here"), None);
    }

    #[test]
    fn structured_attribution_takes_two_segments() {
        let set = standard();
        assert_eq!(
            set.attribute("123456789-23123S0012-23NGCEN1-8128-F-96527893_markdup.vcf.gz", Dialect::Structured),
            Some("123456789-23123S0012".to_string())
        );
        assert_eq!(set.attribute("123456789-23123S0012.vcf.gz", Dialect::Structured), None);
        assert_eq!(set.attribute("-23123S0012-x.vcf", Dialect::Structured), None);
    }

    #[test]
    fn reanalysis_attribution_takes_leading_run() {
        let set = standard();
        assert_eq!(set.attribute("X223344-GM2302712_segments.vcf", Dialect::Reanalysis), Some("X223344".to_string()));
        assert_eq!(set.attribute("X223344.vcf.gz", Dialect::Reanalysis), Some("X223344".to_string()));
        assert_eq!(set.attribute("X223344_markdup.vcf.gz", Dialect::Reanalysis), None);
        assert_eq!(set.attribute("-X1.vcf", Dialect::Reanalysis), None);
    }

    #[test]
    fn until_delimiter_keeps_full_sample_name() {
        let matcher = UntilDelimiter { delimiter: '_' };
        assert_eq!(matcher.attribute("S1-A-B_markdup.bam"), Some("S1-A-B".to_string()));
        assert_eq!(matcher.attribute("nodelimiter.bam"), None);
    }
}
