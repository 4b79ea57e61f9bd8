use log::{info, warn};

use crate::exclusion::{Reason, RejectedTest};
use crate::manifest::dialect::{Dialect, DialectSet};
use crate::manifest::{RawManifest, RawRow, SampleRequest, SampleRequests};
use crate::panel::{CodeKind, CodeRules};

/// Result of normalising every manifest of a run
#[derive(Debug, Default)]
pub struct Normalized {
    pub requests: SampleRequests,
    pub rejected: Vec<RejectedTest>,
}

/// Merge manifests of either dialect into one request per sample, in first-seen order
///
/// Bad rows are skipped and reported as `malformed-row`; they never stop normalisation.
pub fn normalize(manifests: &[RawManifest], dialects: &DialectSet, codes: &CodeRules) -> Normalized {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for manifest in manifests {
        for row in &manifest.rows {
            match parse_row(row, dialects, codes) {
                Ok(request) => accepted.push(request),
                Err((sample, code, problem)) => {
                    let detail = format!("{} line {}: {}", manifest.source, row.line, problem);
                    warn!("Skipping manifest row: {}", detail);
                    rejected.push(RejectedTest { sample, code, reason: Reason::MalformedRow, detail });
                }
            }
        }
    }

    let requests: SampleRequests = accepted.into_iter().collect();
    info!("Normalised {} manifest(s) into {} sample(s), {} row(s) rejected", manifests.len(), requests.len(), rejected.len());
    Normalized { requests, rejected }
}

type RowProblem = (String, String, String);

fn parse_row(row: &RawRow, dialects: &DialectSet, codes: &CodeRules) -> Result<SampleRequest, RowProblem> {
    let sample = row.fields.first().map(String::as_str).unwrap_or_default();
    let code_field = row.fields.get(1).map(String::as_str).unwrap_or_default();

    if sample.is_empty() {
        return Err((String::new(), code_field.to_string(), "empty sample identifier".to_string()));
    }
    let dialect = dialects
        .detect(sample)
        .ok_or_else(|| (sample.to_string(), code_field.to_string(), "sample identifier matches no manifest dialect".to_string()))?;
    if code_field.is_empty() {
        return Err((sample.to_string(), String::new(), "no test code".to_string()));
    }

    let tokens: Vec<String> = match dialect {
        Dialect::Structured => vec![code_field.to_string()],
        Dialect::Reanalysis => code_field
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| reanalysis_code(token, codes))
            .collect(),
    };

    for token in &tokens {
        if codes.classify(token).is_none() {
            return Err((sample.to_string(), token.clone(), "unparseable test code".to_string()));
        }
    }
    if tokens.is_empty() {
        return Err((sample.to_string(), code_field.to_string(), "no test code".to_string()));
    }

    Ok(SampleRequest { sample: sample.to_string(), dialect, codes: tokens })
}

/// Reanalysis lists often carry whole clinical indication names (`R207.1_Inherited cancer`);
/// keep just the code when the part before `_` is one
fn reanalysis_code(token: &str, codes: &CodeRules) -> String {
    match token.split_once('_') {
        Some((code, _)) if codes.classify(code) == Some(CodeKind::Indication) => code.to_string(),
        _ => token.to_string(),
    }
}
