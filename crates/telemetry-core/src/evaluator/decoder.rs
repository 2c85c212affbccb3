//! Decoders behind `load()` and the `format` argument of `get()`/`post()`.
//!
//! Each decoder produces its own native tree which is normalized here into
//! [`Value`]: maps keyed by strings, arrays and scalars.

use std::{fs, path::Path};

use super::{Map, ScriptError, Value};

/// Formats understood by [`decode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    /// Case-insensitive lookup
    pub fn parse(name: &str) -> Result<Self, ScriptError> {
        match name.to_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "yaml" | "yml" => Ok(Format::Yaml),
            "toml" => Ok(Format::Toml),
            other => Err(ScriptError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Toml => "toml",
        }
    }
}

fn decode_error(format: Format, error: impl std::fmt::Display) -> ScriptError {
    ScriptError::Decode {
        format: format.name().to_string(),
        message: error.to_string(),
    }
}

pub fn decode(format: Format, bytes: &[u8]) -> Result<Value, ScriptError> {
    match format {
        Format::Json => serde_json::from_slice(bytes).map_err(|e| decode_error(format, e)),
        Format::Yaml => serde_yaml::from_slice::<serde_yaml::Value>(bytes)
            .map(from_yaml)
            .map_err(|e| decode_error(format, e)),
        Format::Toml => {
            let text = std::str::from_utf8(bytes).map_err(|e| decode_error(format, e))?;
            toml::from_str::<toml::Value>(text)
                .map(from_toml)
                .map_err(|e| decode_error(format, e))
        }
    }
}

/// Reads and decodes a file
pub fn load_file(path: &Path, format: Format) -> Result<Value, ScriptError> {
    let bytes = fs::read(path).map_err(|source| ScriptError::Io {
        path: path.display().to_string(),
        source,
    })?;
    decode(format, &bytes)
}

fn from_yaml(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Yaml;

    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Boolean(b),
        Yaml::Number(n) => n.as_f64().map_or(Value::Null, Value::Number),
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(from_yaml).collect()),
        Yaml::Mapping(mapping) => Value::Map(
            mapping
                .into_iter()
                .map(|(key, item)| (yaml_key(key), from_yaml(item)))
                .collect::<Map>(),
        ),
        Yaml::Tagged(tagged) => from_yaml(tagged.value),
    }
}

/// YAML allows any scalar as a key; everything becomes a string
fn yaml_key(key: serde_yaml::Value) -> String {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => s,
        Yaml::Number(n) => n.to_string(),
        Yaml::Bool(b) => b.to_string(),
        Yaml::Null => "null".to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn from_toml(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::Number(i as f64),
        toml::Value::Float(f) => Value::Number(f),
        toml::Value::Boolean(b) => Value::Boolean(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(from_toml).collect()),
        toml::Value::Table(table) => Value::Map(
            table
                .into_iter()
                .map(|(key, item)| (key, from_toml(item)))
                .collect::<Map>(),
        ),
    }
}
