use std::fs;
use std::path::{Path, PathBuf};

use jsonschema::JSONSchema;
use log::{info, warn};
use serde_json::Value;

use crate::config::document::ConfigDocument;
use crate::config::schema;
use crate::error::ConfigError;

/// An assay config file on disk, read and checked against the compiled schema
pub struct ConfigFile {
    pub path: PathBuf,
    pub compiled_schema: JSONSchema,
}

impl ConfigFile {
    pub fn read(&self) -> Result<ConfigDocument, ConfigError> {
        let json: Value = self.parse_untyped_json()?;
        parse_document(&self.compiled_schema, json)
    }

    fn read_file(&self) -> Result<String, ConfigError> {
        let path: &Path = self.path.as_path();
        info!("Reading config at {}", path.display());
        fs::read_to_string(path).map_err(|source| {
            warn!("Can't read config at path {}: {}", path.display(), source);
            ConfigError::Read { path: path.to_path_buf(), source }
        })
    }

    fn parse_untyped_json(&self) -> Result<Value, ConfigError> {
        info!("Parsing JSON into untyped structure");
        let json_string = self.read_file()?;
        serde_json::from_str::<Value>(&json_string).map_err(ConfigError::Decode)
    }
}

/// Validate untyped JSON, then deserialise it into the document structs
pub fn parse_document(compiled_schema: &JSONSchema, json: Value) -> Result<ConfigDocument, ConfigError> {
    schema::validate(compiled_schema, &json)?;
    info!("Config is valid");
    info!("Deserialising valid JSON into typed config");
    serde_json::from_value::<ConfigDocument>(json).map_err(ConfigError::Deserialise)
}
