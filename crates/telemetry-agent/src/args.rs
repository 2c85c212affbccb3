// Caller arguments given on the command line
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use telemetry_core::evaluator::{
    decoder::{self, Format},
    Map, Value,
};

/// Parses one `--arg key=value`. The value is read as JSON when it parses,
/// so `n=5` gives a number and `hosts=["a","b"]` an array; anything else
/// stays a string.
pub fn parse_arg_pair(pair: &str) -> anyhow::Result<(String, Value)> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got `{pair}`"))?;

    let key = key.trim();
    if key.is_empty() {
        bail!("argument name is empty in `{pair}`");
    }

    let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Reads caller arguments from a JSON, YAML or TOML file, chosen by
/// extension. The document must be a map.
pub fn load_args_file(path: &Path) -> anyhow::Result<Map> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| anyhow!("cannot tell the format of {} without an extension", path.display()))?;
    let format = Format::parse(extension)?;

    match decoder::load_file(path, format).with_context(|| format!("loading arguments from {}", path.display()))? {
        Value::Map(args) => Ok(args),
        other => bail!(
            "{} must contain a map of arguments, found {}",
            path.display(),
            other.type_name()
        ),
    }
}
