//! Test code reference data: which codes are valid and what clinical indication and panel each
//! one stands for

use regex::Regex;
use serde::Serialize;

/// Load the panel table and look codes up in it
pub mod index;

pub use index::{Lookup, PanelIndex};

/// A validated test code with its display strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelEntry {
    pub code: String,
    pub clinical_indication: String,
    pub panel: String,
}

impl PanelEntry {
    /// A single gene request stands for itself
    pub fn for_symbol(symbol: &str) -> PanelEntry {
        PanelEntry {
            code: symbol.to_string(),
            clinical_indication: symbol.to_string(),
            panel: symbol.to_string(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodeKind {
    /// clinical indication code such as `R207.1`, looked up in the panel table
    Indication,
    /// gene symbol or HGNC identifier, valid on its own
    Symbol,
}

/// Patterns telling clinical indication codes and gene symbols apart
#[derive(Debug, Clone)]
pub struct CodeRules {
    code: Regex,
    symbol: Regex,
}

impl CodeRules {
    pub fn new(code: Regex, symbol: Regex) -> CodeRules {
        CodeRules { code, symbol }
    }

    /// Indication codes win when a token matches both patterns
    pub fn classify(&self, token: &str) -> Option<CodeKind> {
        if self.code.is_match(token) {
            Some(CodeKind::Indication)
        } else if self.symbol.is_match(token) {
            Some(CodeKind::Symbol)
        } else {
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_tokens() {
        let rules = fixtures::rules();
        assert_eq!(rules.classify("R207.1"), Some(CodeKind::Indication));
        assert_eq!(rules.classify("C1"), Some(CodeKind::Indication));
        assert_eq!(rules.classify("BRCA1"), Some(CodeKind::Symbol));
        assert_eq!(rules.classify("_HGNC:1100"), Some(CodeKind::Symbol));
        assert_eq!(rules.classify("r207 .1"), None);
        assert_eq!(rules.classify(""), None);
    }
}
