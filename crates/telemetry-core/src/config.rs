//! Agent configuration and human-readable interval parsing

use std::{path::PathBuf, sync::OnceLock, time::Duration};

use regex::Regex;

/// Configuration errors
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("`{input}` is not a valid time interval (expected e.g. `30s`, `15m`, `24h`, `1h30m`)")]
    InvalidInterval { input: String },

    #[error("time interval `{input}` is too large")]
    IntervalOverflow { input: String },
}

/// Settings of the aggregation store
#[derive(Debug, Clone, Default)]
pub struct DataConfig {
    /// Location of the store. Without it the aggregation subsystem is disabled.
    pub path: Option<PathBuf>,
    /// Retention window, e.g. `"24h"`. Empty or absent disables sweeping.
    pub ttl: Option<String>,
}

impl DataConfig {
    /// Parsed retention window; `None` when sweeping is disabled
    pub fn ttl(&self) -> Result<Option<Duration>, ConfigError> {
        match self.ttl.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => parse_interval(text).map(Some),
        }
    }
}

/// Top-level agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub data: DataConfig,
    /// `tracing_subscriber::EnvFilter` directives used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            log_filter: "telemetry_core=info,telemetry_agent=info,script=info".to_string(),
        }
    }
}

const INTERVAL_PART: &str = r"(\d+(?:\.\d+)?)(ms|s|m|h|d|w)";

fn interval_regexes() -> &'static (Regex, Regex) {
    static REGEXES: OnceLock<(Regex, Regex)> = OnceLock::new();
    REGEXES.get_or_init(|| {
        let whole = Regex::new(&format!("^(?:{INTERVAL_PART})+$")).expect("valid interval pattern");
        let part = Regex::new(INTERVAL_PART).expect("valid interval pattern");
        (whole, part)
    })
}

/// Parses intervals such as `500ms`, `30s`, `1.5m`, `24h`, `7d`, `1w` or
/// compound forms like `1h30m`.
pub fn parse_interval(input: &str) -> Result<Duration, ConfigError> {
    let text = input.trim();
    let (whole, part) = interval_regexes();

    if !whole.is_match(text) {
        return Err(ConfigError::InvalidInterval {
            input: input.to_string(),
        });
    }

    let mut seconds = 0.0_f64;
    for caps in part.captures_iter(text) {
        let amount: f64 = caps[1].parse().map_err(|_| ConfigError::InvalidInterval {
            input: input.to_string(),
        })?;
        let unit = match &caps[2] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3_600.0,
            "d" => 86_400.0,
            _ => 604_800.0,
        };
        seconds += amount * unit;
    }

    Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::IntervalOverflow {
        input: input.to_string(),
    })
}
