use std::collections::BTreeMap;

use regex::Regex;
use serde_json::{Map, Value};

use crate::config::document::{DynamicField, InputDocument, InstanceType, ModeDocument, PreviousReports, Scope, SearchDocument, SearchSource};
use crate::error::ConfigError;
use crate::mode::Mode;

/// Strings starting with this prefix name an entry of the reference files table
pub const PLACEHOLDER: &str = "INPUT-";

/// Reference file table: logical name -> backend file identifier
#[derive(Debug, Clone, Default)]
pub struct ReferenceFiles {
    files: BTreeMap<String, String>,
}

impl ReferenceFiles {
    pub fn new(files: BTreeMap<String, String>) -> ReferenceFiles {
        ReferenceFiles { files }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.files.get(key).map(String::as_str)
    }

    /// Replace every `INPUT-<key>` string inside `value`, at any depth
    pub fn substitute(&self, field: &str, value: &Value) -> Result<Value, ConfigError> {
        match value {
            Value::String(text) => match text.strip_prefix(PLACEHOLDER) {
                Some(key) => self
                    .get(key)
                    .map(|id| Value::String(id.to_string()))
                    .ok_or_else(|| ConfigError::UnknownReference { key: key.to_string(), field: field.to_string() }),
                None => Ok(value.clone()),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| self.substitute(field, item))
                .collect::<Result<Vec<Value>, ConfigError>>()
                .map(Value::Array),
            Value::Object(entries) => {
                let mut out = Map::new();
                for (key, item) in entries {
                    out.insert(key.clone(), self.substitute(field, item)?);
                }
                Ok(Value::Object(out))
            }
            _ => Ok(value.clone()),
        }
    }
}

/// A typed, validated input template for one mode
#[derive(Debug, Clone)]
pub struct ModeTemplate {
    pub mode: Mode,
    pub executable: String,
    pub scope: Scope,
    pub instance_type: Option<InstanceType>,
    pub inputs: BTreeMap<String, InputField>,
    pub previous_reports: Option<ReportHistory>,
}

#[derive(Debug, Clone)]
pub enum InputField {
    /// literal JSON, possibly with nested placeholders
    Static(Value),
    /// the whole value is a single `INPUT-<key>` placeholder
    Reference(String),
    Search(SearchField),
    Dynamic(DynamicField),
}

#[derive(Debug, Clone)]
pub struct SearchField {
    pub folder: String,
    pub pattern: Regex,
    pub role: String,
    pub multiple: bool,
    pub source: SearchSource,
    pub shared: bool,
}

/// Where earlier reports of a mode live, used to pick the next output version
#[derive(Debug, Clone)]
pub struct ReportHistory {
    pub folder: String,
    pub extension: String,
}

impl ModeTemplate {
    pub fn from_document(mode: Mode, document: ModeDocument, references: &ReferenceFiles) -> Result<ModeTemplate, ConfigError> {
        let mut inputs = BTreeMap::new();
        for (name, input) in document.inputs {
            let field = InputField::from_document(mode, &name, input)?;
            field.check(mode, document.scope, &name, references)?;
            inputs.insert(name, field);
        }

        Ok(ModeTemplate {
            mode,
            executable: document.executable,
            scope: document.scope,
            instance_type: document.instance_type,
            inputs,
            previous_reports: document.previous_reports.map(ReportHistory::from),
        })
    }

    pub fn search_fields(&self) -> impl Iterator<Item = (&String, &SearchField)> {
        self.inputs.iter().filter_map(|(name, field)| match field {
            InputField::Search(search) => Some((name, search)),
            _ => None,
        })
    }

    pub fn uses(&self, dynamic: DynamicField) -> bool {
        self.inputs.values().any(|field| matches!(field, InputField::Dynamic(d) if *d == dynamic))
    }

    /// True when any search field lists the call job's output
    pub fn reads_call_job(&self) -> bool {
        self.search_fields().any(|(_, search)| search.source == SearchSource::CallJob) || self.uses(DynamicField::CallJob)
    }
}

impl InputField {
    fn from_document(mode: Mode, name: &str, input: InputDocument) -> Result<InputField, ConfigError> {
        let field = match input {
            InputDocument::Search(search) => InputField::Search(SearchField::compile(mode, name, search.search)?),
            InputDocument::Dynamic(dynamic) => InputField::Dynamic(dynamic.dynamic),
            InputDocument::Static(Value::String(text)) if text.starts_with(PLACEHOLDER) => {
                InputField::Reference(text[PLACEHOLDER.len()..].to_string())
            }
            InputDocument::Static(value) => InputField::Static(value),
        };
        Ok(field)
    }

    /// Reject anything that would otherwise only fail once jobs are being assembled
    fn check(&self, mode: Mode, scope: Scope, name: &str, references: &ReferenceFiles) -> Result<(), ConfigError> {
        let owner = format!("{} input {}", mode, name);
        match self {
            InputField::Reference(key) => {
                if references.get(key).is_none() {
                    return Err(ConfigError::UnknownReference { key: key.clone(), field: owner });
                }
            }
            InputField::Static(value) => {
                references.substitute(&owner, value)?;
            }
            InputField::Dynamic(dynamic) => {
                if scope == Scope::Run && dynamic.is_per_sample() {
                    return Err(ConfigError::UnavailableDynamic { mode, field: name.to_string(), dynamic: dynamic.name().to_string() });
                }
                if *dynamic == DynamicField::CallJob && !mode.needs_call_job() {
                    return Err(ConfigError::Conflict(format!("{} uses the call job but {} doesn't consume calling output", owner, mode)));
                }
            }
            InputField::Search(search) => {
                if search.source == SearchSource::CallJob && !mode.needs_call_job() {
                    return Err(ConfigError::Conflict(format!("{} searches the call job output but {} doesn't consume calling output", owner, mode)));
                }
                if search.shared && search.multiple {
                    return Err(ConfigError::Conflict(format!("{} is shared, so it takes exactly one file and can't be multiple", owner)));
                }
            }
        }
        Ok(())
    }
}

impl SearchField {
    fn compile(mode: Mode, name: &str, document: SearchDocument) -> Result<SearchField, ConfigError> {
        let pattern = compile_pattern(&format!("{} input {}", mode, name), &document.pattern)?;
        Ok(SearchField {
            folder: document.folder,
            pattern,
            role: document.role,
            multiple: document.multiple,
            source: document.source,
            shared: document.shared,
        })
    }
}

impl From<PreviousReports> for ReportHistory {
    fn from(previous: PreviousReports) -> Self {
        ReportHistory { folder: previous.folder, extension: previous.extension.trim_start_matches('.').to_string() }
    }
}

pub fn compile_pattern(owner: &str, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::Pattern {
        owner: owner.to_string(),
        pattern: pattern.to_string(),
        source,
    })
}
