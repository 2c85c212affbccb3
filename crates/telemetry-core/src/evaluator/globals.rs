//! The global namespace: builtin functions reachable from `Global()`.

use std::{path::Path, time::Duration};

use indexmap::IndexMap;
use rand::Rng;
use tracing::{debug, info};

use super::{
    callable::{ArgKind, Builtin, Invocation, Parameter},
    context::{HttpMethod, HttpRequest, Notification},
    decoder::{self, Format},
    methods::{invalid, whole},
    ExecutionContext, Expression, ExpressionKind, Map, ScriptError, Value,
};
use crate::{aggregations::unix_now, config::parse_interval};

/// Plugin kind of jobs created by `spawn()`
pub const PROCESS_PLUGIN: &str = "com.telemetryapp.process";

/// Builtins by name. Built once and borrowed by every execution context.
#[derive(Debug, Clone, Default)]
pub struct GlobalRegistry {
    builtins: IndexMap<&'static str, &'static Builtin>,
}

impl GlobalRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every standard builtin
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for builtin in &STANDARD {
            registry.register(builtin);
        }
        registry
    }

    /// Adds or replaces a builtin
    pub fn register(&mut self, builtin: &'static Builtin) {
        self.builtins.insert(builtin.name, builtin);
    }

    pub fn get(&self, name: &str) -> Option<&'static Builtin> {
        self.builtins.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builtins.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.builtins.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.builtins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builtins.is_empty()
    }
}

static STANDARD: [Builtin; 15] = [
    Builtin {
        name: "now",
        parameters: &[],
        handler: now,
    },
    Builtin {
        name: "random",
        parameters: &[Parameter::optional("max", ArgKind::Numeric)],
        handler: random,
    },
    Builtin {
        name: "arg",
        parameters: &[Parameter::required("name", ArgKind::String)],
        handler: arg,
    },
    Builtin {
        name: "counter",
        parameters: &[Parameter::required("name", ArgKind::String)],
        handler: counter,
    },
    Builtin {
        name: "series",
        parameters: &[Parameter::required("name", ArgKind::String)],
        handler: series,
    },
    Builtin {
        name: "anomaly",
        parameters: &[
            Parameter::required("data", ArgKind::NumericArray),
            Parameter::required("value", ArgKind::Numeric),
        ],
        handler: anomaly,
    },
    Builtin {
        name: "load",
        parameters: &[
            Parameter::required("path", ArgKind::String),
            Parameter::required("format", ArgKind::String),
        ],
        handler: load,
    },
    Builtin {
        name: "spawn",
        parameters: &[
            Parameter::required("tag", ArgKind::String),
            Parameter::required("refresh", ArgKind::Numeric),
            Parameter::optional("exec", ArgKind::String),
            Parameter::optional("script", ArgKind::String),
            Parameter::optional("args", ArgKind::Map),
        ],
        handler: spawn,
    },
    Builtin {
        name: "notify",
        parameters: &[
            Parameter::required("title", ArgKind::String),
            Parameter::required("message", ArgKind::String),
            Parameter::optional("channel", ArgKind::String),
            Parameter::optional("flow", ArgKind::String),
            Parameter::optional("icon", ArgKind::String),
            Parameter::optional("sound", ArgKind::String),
            Parameter::optional("duration", ArgKind::String),
        ],
        handler: notify,
    },
    Builtin {
        name: "log",
        parameters: &[Parameter::required("message", ArgKind::String)],
        handler: log,
    },
    Builtin {
        name: "error",
        parameters: &[Parameter::required("message", ArgKind::String)],
        handler: raise,
    },
    Builtin {
        name: "excel",
        parameters: &[Parameter::required("path", ArgKind::String)],
        handler: excel,
    },
    Builtin {
        name: "googleSpreadsheet",
        parameters: &[Parameter::required("spreadsheetId", ArgKind::String)],
        handler: google_spreadsheet,
    },
    Builtin {
        name: "get",
        parameters: &[
            Parameter::required("url", ArgKind::String),
            Parameter::optional("headers", ArgKind::Map),
            Parameter::optional("format", ArgKind::String),
        ],
        handler: get,
    },
    Builtin {
        name: "post",
        parameters: &[
            Parameter::required("url", ArgKind::String),
            Parameter::optional("body", ArgKind::String),
            Parameter::optional("json", ArgKind::Map),
            Parameter::optional("headers", ArgKind::Map),
            Parameter::optional("format", ArgKind::String),
        ],
        handler: post,
    },
];

fn now(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    Ok(Expression::numeric(unix_now() as f64, invocation.position))
}

fn random(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let max = invocation.args.optional_numeric("max")?.unwrap_or(1.0);
    if !(max > 0.0 && max.is_finite()) {
        return Err(invalid(invocation, "max", "must be a positive number"));
    }

    let value = rand::thread_rng().gen_range(0.0..max);
    Ok(Expression::numeric(value, invocation.position))
}

fn arg(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let name = invocation.args.string("name")?;
    match context.argument(name) {
        Some(value) => Ok(Expression::from_value(value.clone(), invocation.position)),
        None => Err(ScriptError::UnknownArgument {
            name: name.to_string(),
            position: invocation.position,
        }),
    }
}

fn counter(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let name = invocation.args.string("name")?;
    let value = context
        .aggregations()
        .counter(name)?
        .map_or(0.0, |record| record.value);

    Ok(Expression::new(
        ExpressionKind::Counter {
            name: name.to_string(),
            value,
        },
        invocation.position,
    ))
}

fn series(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let name = invocation.args.string("name")?;
    let samples = context.aggregations().series(name)?.unwrap_or_default();

    Ok(Expression::new(
        ExpressionKind::Series {
            name: name.to_string(),
            samples,
        },
        invocation.position,
    ))
}

fn anomaly(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let data = invocation.args.numeric_array("data")?;
    let value = invocation.args.numeric("value")?;
    Ok(Expression::boolean(data.is_anomaly(value), invocation.position))
}

fn load(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let format = Format::parse(invocation.args.string("format")?)?;
    let path = invocation.args.string("path")?;

    debug!(path, format = format.name(), "loading file");
    let value = decoder::load_file(Path::new(path), format)?;
    Ok(Expression::from_value(value, invocation.position))
}

fn spawn(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let args = &invocation.args;
    let tag = args.string("tag")?;
    let refresh = whole(invocation, "refresh", args.numeric("refresh")?.trunc())?;

    let mut config = Map::new();
    config.insert("refresh".to_string(), Value::Number(refresh as f64));
    config.insert("flow_tag".to_string(), Value::String(tag.to_string()));
    if let Some(exec) = args.optional_string("exec")? {
        config.insert("exec".to_string(), Value::String(exec.to_string()));
    }
    if let Some(script) = args.optional_string("script")? {
        config.insert("script".to_string(), Value::String(script.to_string()));
    }
    if let Some(job_args) = args.optional_map("args")? {
        config.insert("args".to_string(), Value::Map(job_args.clone()));
    }

    context
        .services()
        .spawner
        .spawn_job(tag, PROCESS_PLUGIN, config)
        .map_err(|e| ScriptError::external("spawn", e, invocation.position))?;
    Ok(Expression::null(invocation.position))
}

fn notify(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let args = &invocation.args;

    let duration = match args.optional_string("duration")? {
        Some(text) if !text.is_empty() => parse_interval(text)?,
        _ => Duration::from_secs(1),
    };

    let notification = Notification {
        title: args.string("title")?.to_string(),
        message: args.string("message")?.to_string(),
        icon: args.optional_string("icon")?.map(str::to_string),
        sound: args.optional_string("sound")?.unwrap_or("default").to_string(),
        duration: Duration::from_secs(duration.as_secs().max(1)),
    };

    let delivered = context.services().notifier.send_notification(
        &notification,
        args.optional_string("channel")?,
        args.optional_string("flow")?,
    );
    Ok(Expression::boolean(delivered, invocation.position))
}

fn log(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let message = invocation.args.string("message")?;
    info!(target: "script", job = context.job(), "{message}");
    Ok(Expression::null(invocation.position))
}

fn raise(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    Err(ScriptError::UserRaised {
        message: invocation.args.string("message")?.to_string(),
        position: invocation.position,
    })
}

fn excel(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    Ok(Expression::new(
        ExpressionKind::Excel {
            path: invocation.args.string("path")?.to_string(),
        },
        invocation.position,
    ))
}

fn google_spreadsheet(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    Ok(Expression::new(
        ExpressionKind::GoogleSpreadsheet {
            spreadsheet_id: invocation.args.string("spreadsheetId")?.to_string(),
        },
        invocation.position,
    ))
}

fn headers(invocation: &Invocation<'_>) -> Result<IndexMap<String, String>, ScriptError> {
    Ok(invocation
        .args
        .optional_map("headers")?
        .map(|headers| {
            headers
                .iter()
                .map(|(name, value)| (name.clone(), value.to_string()))
                .collect()
        })
        .unwrap_or_default())
}

fn send(
    invocation: &Invocation<'_>,
    context: &ExecutionContext<'_>,
    request: HttpRequest,
) -> Result<Expression, ScriptError> {
    debug!(url = %request.url, method = ?request.method, "outbound request");

    let body = context
        .services()
        .http
        .request(&request)
        .map_err(|e| ScriptError::external(invocation.callable.name(), e, invocation.position))?;

    match invocation.args.optional_string("format")? {
        Some(format) => {
            let value = decoder::decode(Format::parse(format)?, body.as_bytes())?;
            Ok(Expression::from_value(value, invocation.position))
        }
        None => Ok(Expression::string(body, invocation.position)),
    }
}

fn get(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let request = HttpRequest {
        method: HttpMethod::Get,
        url: invocation.args.string("url")?.to_string(),
        headers: headers(invocation)?,
        body: None,
    };
    send(invocation, context, request)
}

fn post(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let args = &invocation.args;
    let mut headers = headers(invocation)?;

    let body = match (args.optional_string("body")?, args.optional_map("json")?) {
        (Some(_), Some(_)) => {
            return Err(invalid(invocation, "json", "cannot be combined with `body`"));
        }
        (Some(body), None) => Some(body.to_string()),
        (None, Some(json)) => {
            headers
                .entry("Content-Type".to_string())
                .or_insert_with(|| "application/json".to_string());
            let encoded = serde_json::to_string(json).map_err(|e| ScriptError::Decode {
                format: "json".to_string(),
                message: e.to_string(),
            })?;
            Some(encoded)
        }
        (None, None) => None,
    };

    let request = HttpRequest {
        method: HttpMethod::Post,
        url: args.string("url")?.to_string(),
        headers,
        body,
    };
    send(invocation, context, request)
}
