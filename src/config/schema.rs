use std::sync::Arc;

use anyhow::anyhow;
use jsonschema::{JSONSchema, SchemaResolver, SchemaResolverError};
use log::{info, warn};
use serde_json::Value;
use url::Url;

use crate::error::ConfigError;

/// included top level config schema
static CONFIG_SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/config.json"));
/// included per-mode template schema, referenced from the config schema as `mode.json`
static MODE_SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/mode.json"));

pub fn load_schema() -> Result<JSONSchema, ConfigError> {
    let schema_json = parse_embedded(CONFIG_SCHEMA)?;
    compile_schema(&schema_json)
}

/// Validate an untyped config document, collecting every violation into one error
pub fn validate(schema: &JSONSchema, json: &Value) -> Result<(), ConfigError> {
    info!("Validating config against JSON schema");
    let result = schema.validate(json);
    if let Err(errors) = result {
        let messages: Vec<String> = errors
            .map(|err| format!("{} (at '{}')", err, err.instance_path))
            .collect();
        warn!("Config fails validation with {} error(s)", messages.len());
        return Err(ConfigError::Schema(messages.join("; ")));
    }
    Ok(())
}

fn parse_embedded(schema: &str) -> Result<Value, ConfigError> {
    serde_json::from_str(schema).map_err(ConfigError::Decode)
}

fn compile_schema(schema: &Value) -> Result<JSONSchema, ConfigError> {
    JSONSchema::options()
        .with_resolver(EmbeddedResolver)
        .compile(schema)
        .map_err(|err| ConfigError::Schema(format!("embedded schema doesn't compile: {}", err)))
}

/*
Relative references like "mode.json" resolve to json-schema:///mode.json
Sub-schemas are compiled into the binary so they are served from memory, not disk
*/
struct EmbeddedResolver;

impl SchemaResolver for EmbeddedResolver {
    fn resolve(&self, _root_schema: &Value, url: &Url, original_reference: &str) -> Result<Arc<Value>, SchemaResolverError> {
        match url.scheme() {
            "json-schema" => {
                let name = url.path().trim_start_matches('/');
                match name {
                    "mode.json" => Ok(Arc::new(serde_json::from_str(MODE_SCHEMA)?)),
                    _ => Err(anyhow!("no embedded schema for reference {}", original_reference)),
                }
            }
            _ => Err(anyhow!("scheme is not supported"))
        }
    }
}
