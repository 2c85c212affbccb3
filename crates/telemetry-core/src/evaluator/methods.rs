// Property and method tables of the concrete expression variants

use indexmap::IndexMap;

use super::{
    callable::{ArgKind, Builtin, Callable, Invocation, Parameter},
    context::SheetSource,
    ExecutionContext, Expression, ExpressionKind, NumericArray, ScriptError, Value,
};
use crate::{
    aggregations::{unix_now, Sample},
    ast::Position,
};

/// Resolves `name` on a concrete expression: plain properties first, then
/// the variant's methods
pub(super) fn extract(
    receiver: &Expression,
    context: &ExecutionContext<'_>,
    name: &str,
    position: Position,
) -> Result<Expression, ScriptError> {
    let property = match receiver.kind() {
        ExpressionKind::Global => context
            .registry()
            .get(name)
            .map(|builtin| Expression::new(ExpressionKind::Callable(Callable::global(builtin)), position)),
        ExpressionKind::String(s) => match name {
            "length" => Some(Expression::numeric(s.chars().count() as f64, position)),
            _ => method(&STRING_METHODS, receiver, name, position),
        },
        ExpressionKind::Numeric(_) => method(&NUMERIC_METHODS, receiver, name, position),
        ExpressionKind::Array(items) => match array_property(items, context, name, position)? {
            Some(property) => Some(property),
            None => method(&ARRAY_METHODS, receiver, name, position),
        },
        ExpressionKind::Map(entries) => match entries.get(name) {
            Some(item) => Some(item.clone()),
            None => match name {
                "keys" => Some(Expression::new(
                    ExpressionKind::Array(
                        entries
                            .keys()
                            .map(|key| Expression::string(key.clone(), position))
                            .collect(),
                    ),
                    position,
                )),
                "values" => Some(Expression::new(
                    ExpressionKind::Array(entries.values().cloned().collect()),
                    position,
                )),
                "count" => Some(Expression::numeric(entries.len() as f64, position)),
                _ => method(&MAP_METHODS, receiver, name, position),
            },
        },
        ExpressionKind::Counter { name: counter, value } => match name {
            "value" => Some(Expression::numeric(*value, position)),
            "name" => Some(Expression::string(counter.clone(), position)),
            _ => method(&COUNTER_METHODS, receiver, name, position),
        },
        ExpressionKind::Series { name: series, samples } => {
            match series_property(series, samples, name, position) {
                Some(property) => Some(property),
                None => method(&SERIES_METHODS, receiver, name, position),
            }
        }
        ExpressionKind::Excel { .. } | ExpressionKind::GoogleSpreadsheet { .. } => {
            method(&SHEET_METHODS, receiver, name, position)
        }
        _ => None,
    };

    property.ok_or_else(|| ScriptError::unknown_property(receiver, name, position))
}

fn method(
    table: &'static [Builtin],
    receiver: &Expression,
    name: &str,
    position: Position,
) -> Option<Expression> {
    table.iter().find(|builtin| builtin.name == name).map(|builtin| {
        Expression::new(
            ExpressionKind::Callable(Callable::method(builtin, receiver.clone())),
            position,
        )
    })
}

fn array(items: Vec<Expression>, position: Position) -> Expression {
    Expression::new(ExpressionKind::Array(items), position)
}

/// Evaluates every item, requiring numbers
fn numbers(
    items: &[Expression],
    context: &ExecutionContext<'_>,
    operation: &str,
    position: Position,
) -> Result<NumericArray, ScriptError> {
    items
        .iter()
        .map(|item| match item.evaluate(context)? {
            Value::Number(n) => Ok(n),
            other => Err(ScriptError::UnaryType {
                operation: format!("compute the {operation} of"),
                operand: format!("an array containing {}", other.type_name()),
                position,
            }),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(NumericArray)
}

fn array_property(
    items: &[Expression],
    context: &ExecutionContext<'_>,
    name: &str,
    position: Position,
) -> Result<Option<Expression>, ScriptError> {
    let property = match name {
        "count" => Expression::numeric(items.len() as f64, position),
        "first" => items.first().cloned().unwrap_or_else(|| Expression::null(position)),
        "last" => items.last().cloned().unwrap_or_else(|| Expression::null(position)),
        "sum" => Expression::numeric(numbers(items, context, name, position)?.sum(), position),
        "avg" => Expression::numeric_or_null(numbers(items, context, name, position)?.mean(), position),
        "stddev" => Expression::numeric(numbers(items, context, name, position)?.stddev(), position),
        "min" => Expression::numeric_or_null(numbers(items, context, name, position)?.min(), position),
        "max" => Expression::numeric_or_null(numbers(items, context, name, position)?.max(), position),
        _ => return Ok(None),
    };
    Ok(Some(property))
}

fn series_property(
    name: &str,
    samples: &[Sample],
    property: &str,
    position: Position,
) -> Option<Expression> {
    let values = || NumericArray(samples.iter().map(|s| s.value).collect());

    Some(match property {
        "name" => Expression::string(name, position),
        "values" => array(
            samples
                .iter()
                .map(|s| Expression::numeric(s.value, position))
                .collect(),
            position,
        ),
        "timestamps" => array(
            samples
                .iter()
                .map(|s| Expression::numeric(s.timestamp as f64, position))
                .collect(),
            position,
        ),
        "count" => Expression::numeric(samples.len() as f64, position),
        "last" => Expression::numeric_or_null(samples.last().map(|s| s.value), position),
        "sum" => Expression::numeric(values().sum(), position),
        "avg" => Expression::numeric_or_null(values().mean(), position),
        "stddev" => Expression::numeric(values().stddev(), position),
        "min" => Expression::numeric_or_null(values().min(), position),
        "max" => Expression::numeric_or_null(values().max(), position),
        _ => return None,
    })
}

pub(super) fn invalid(invocation: &Invocation<'_>, parameter: &str, message: impl Into<String>) -> ScriptError {
    ScriptError::InvalidArgument {
        callable: invocation.callable.name().to_string(),
        parameter: parameter.to_string(),
        message: message.into(),
        position: invocation.position,
    }
}

/// A numeric argument that must be a whole, non-negative number
pub(super) fn whole(invocation: &Invocation<'_>, parameter: &str, value: f64) -> Result<u64, ScriptError> {
    if value < 0.0 || value.fract() != 0.0 || !value.is_finite() {
        return Err(invalid(invocation, parameter, "expected a whole, non-negative number"));
    }
    Ok(value as u64)
}

// String

static STRING_METHODS: [Builtin; 4] = [
    Builtin {
        name: "split",
        parameters: &[Parameter::required("separator", ArgKind::String)],
        handler: string_split,
    },
    Builtin {
        name: "upper",
        parameters: &[],
        handler: string_upper,
    },
    Builtin {
        name: "lower",
        parameters: &[],
        handler: string_lower,
    },
    Builtin {
        name: "trim",
        parameters: &[],
        handler: string_trim,
    },
];

fn receiver_string<'a>(invocation: &'a Invocation<'_>) -> Result<&'a str, ScriptError> {
    match invocation.receiver()?.kind() {
        ExpressionKind::String(s) => Ok(s),
        _ => Err(ScriptError::NotCallable {
            target: invocation.callable.to_string(),
            position: invocation.position,
        }),
    }
}

fn string_split(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let value = receiver_string(invocation)?;
    let separator = invocation.args.string("separator")?;
    let position = invocation.position;

    let parts: Vec<Expression> = if separator.is_empty() {
        value
            .chars()
            .map(|c| Expression::string(c.to_string(), position))
            .collect()
    } else {
        value
            .split(separator)
            .map(|part| Expression::string(part, position))
            .collect()
    };
    Ok(array(parts, position))
}

fn string_upper(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    Ok(Expression::string(receiver_string(invocation)?.to_uppercase(), invocation.position))
}

fn string_lower(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    Ok(Expression::string(receiver_string(invocation)?.to_lowercase(), invocation.position))
}

fn string_trim(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    Ok(Expression::string(receiver_string(invocation)?.trim(), invocation.position))
}

// Numeric

static NUMERIC_METHODS: [Builtin; 4] = [
    Builtin {
        name: "round",
        parameters: &[Parameter::optional("digits", ArgKind::Numeric)],
        handler: numeric_round,
    },
    Builtin {
        name: "floor",
        parameters: &[],
        handler: numeric_floor,
    },
    Builtin {
        name: "ceil",
        parameters: &[],
        handler: numeric_ceil,
    },
    Builtin {
        name: "abs",
        parameters: &[],
        handler: numeric_abs,
    },
];

fn receiver_number(invocation: &Invocation<'_>) -> Result<f64, ScriptError> {
    match invocation.receiver()?.kind() {
        ExpressionKind::Numeric(n) => Ok(*n),
        _ => Err(ScriptError::NotCallable {
            target: invocation.callable.to_string(),
            position: invocation.position,
        }),
    }
}

fn numeric_round(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let value = receiver_number(invocation)?;
    let digits = match invocation.args.optional_numeric("digits")? {
        Some(digits) => whole(invocation, "digits", digits)?,
        None => 0,
    };
    if digits > 15 {
        return Err(invalid(invocation, "digits", "at most 15 digits are supported"));
    }

    let factor = 10f64.powi(digits as i32);
    Ok(Expression::numeric((value * factor).round() / factor, invocation.position))
}

fn numeric_floor(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    Ok(Expression::numeric(receiver_number(invocation)?.floor(), invocation.position))
}

fn numeric_ceil(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    Ok(Expression::numeric(receiver_number(invocation)?.ceil(), invocation.position))
}

fn numeric_abs(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    Ok(Expression::numeric(receiver_number(invocation)?.abs(), invocation.position))
}

// Array

static ARRAY_METHODS: [Builtin; 1] = [Builtin {
    name: "join",
    parameters: &[Parameter::optional("separator", ArgKind::String)],
    handler: array_join,
}];

fn array_join(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let ExpressionKind::Array(items) = invocation.receiver()?.kind() else {
        return Err(ScriptError::NotCallable {
            target: invocation.callable.to_string(),
            position: invocation.position,
        });
    };
    let separator = invocation.args.optional_string("separator")?.unwrap_or(",");

    let parts = items
        .iter()
        .map(|item| item.evaluate(context).map(|value| value.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Expression::string(parts.join(separator), invocation.position))
}

// Map

static MAP_METHODS: [Builtin; 1] = [Builtin {
    name: "pick",
    parameters: &[Parameter::required("keys", ArgKind::StringArray)],
    handler: map_pick,
}];

fn map_pick(invocation: &Invocation<'_>, _: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let ExpressionKind::Map(entries) = invocation.receiver()?.kind() else {
        return Err(ScriptError::NotCallable {
            target: invocation.callable.to_string(),
            position: invocation.position,
        });
    };

    let picked: IndexMap<String, Expression> = invocation
        .args
        .string_array("keys")?
        .iter()
        .filter_map(|key| entries.get(key).map(|item| (key.clone(), item.clone())))
        .collect();
    Ok(Expression::new(ExpressionKind::Map(picked), invocation.position))
}

// Counter

static COUNTER_METHODS: [Builtin; 2] = [
    Builtin {
        name: "increment",
        parameters: &[Parameter::optional("by", ArgKind::Numeric)],
        handler: counter_increment,
    },
    Builtin {
        name: "set",
        parameters: &[Parameter::required("value", ArgKind::Numeric)],
        handler: counter_set,
    },
];

fn receiver_counter<'a>(invocation: &'a Invocation<'_>) -> Result<&'a str, ScriptError> {
    match invocation.receiver()?.kind() {
        ExpressionKind::Counter { name, .. } => Ok(name),
        _ => Err(ScriptError::NotCallable {
            target: invocation.callable.to_string(),
            position: invocation.position,
        }),
    }
}

fn counter_increment(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let name = receiver_counter(invocation)?;
    let by = invocation.args.optional_numeric("by")?.unwrap_or(1.0);
    let record = context.aggregations().increment_counter(name, by)?;

    Ok(Expression::new(
        ExpressionKind::Counter {
            name: name.to_string(),
            value: record.value,
        },
        invocation.position,
    ))
}

fn counter_set(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let name = receiver_counter(invocation)?;
    let value = invocation.args.numeric("value")?;
    let record = context.aggregations().set_counter(name, value)?;

    Ok(Expression::new(
        ExpressionKind::Counter {
            name: name.to_string(),
            value: record.value,
        },
        invocation.position,
    ))
}

// Series

static SERIES_METHODS: [Builtin; 1] = [Builtin {
    name: "push",
    parameters: &[
        Parameter::required("value", ArgKind::Numeric),
        Parameter::optional("timestamp", ArgKind::Numeric),
    ],
    handler: series_push,
}];

fn series_push(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let ExpressionKind::Series { name, .. } = invocation.receiver()?.kind() else {
        return Err(ScriptError::NotCallable {
            target: invocation.callable.to_string(),
            position: invocation.position,
        });
    };
    let value = invocation.args.numeric("value")?;
    let timestamp = match invocation.args.optional_numeric("timestamp")? {
        Some(timestamp) => whole(invocation, "timestamp", timestamp)?,
        None => unix_now(),
    };

    context
        .aggregations()
        .append_sample(name, Sample::new(timestamp, value))?;
    let samples = context.aggregations().series(name)?.unwrap_or_default();

    Ok(Expression::new(
        ExpressionKind::Series {
            name: name.clone(),
            samples,
        },
        invocation.position,
    ))
}

// Spreadsheet sources

static SHEET_METHODS: [Builtin; 2] = [
    Builtin {
        name: "rows",
        parameters: &[Parameter::optional("sheet", ArgKind::String)],
        handler: sheet_rows,
    },
    Builtin {
        name: "cell",
        parameters: &[
            Parameter::required("row", ArgKind::Numeric),
            Parameter::required("column", ArgKind::Numeric),
            Parameter::optional("sheet", ArgKind::String),
        ],
        handler: sheet_cell,
    },
];

fn read_rows(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Vec<Vec<Value>>, ScriptError> {
    let source = match invocation.receiver()?.kind() {
        ExpressionKind::Excel { path } => SheetSource::Excel { path: path.clone() },
        ExpressionKind::GoogleSpreadsheet { spreadsheet_id } => SheetSource::GoogleSpreadsheet {
            spreadsheet_id: spreadsheet_id.clone(),
        },
        _ => {
            return Err(ScriptError::NotCallable {
                target: invocation.callable.to_string(),
                position: invocation.position,
            })
        }
    };
    let sheet = invocation.args.optional_string("sheet")?;

    context
        .services()
        .sheets
        .rows(&source, sheet)
        .map_err(|e| ScriptError::external(invocation.callable.name(), e, invocation.position))
}

fn sheet_rows(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let rows = read_rows(invocation, context)?
        .into_iter()
        .map(Value::Array)
        .collect();
    Ok(Expression::from_value(Value::Array(rows), invocation.position))
}

/// Rows and columns are 1-based, as in spreadsheet applications
fn sheet_cell(invocation: &Invocation<'_>, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
    let row = whole(invocation, "row", invocation.args.numeric("row")?)?;
    let column = whole(invocation, "column", invocation.args.numeric("column")?)?;
    if row == 0 || column == 0 {
        return Err(invalid(invocation, if row == 0 { "row" } else { "column" }, "rows and columns start at 1"));
    }

    let rows = read_rows(invocation, context)?;
    let cell = rows
        .get(row as usize - 1)
        .and_then(|cells| cells.get(column as usize - 1))
        .cloned()
        .ok_or_else(|| ScriptError::IndexOutOfBounds {
            target: invocation.receiver().map(|r| r.to_string()).unwrap_or_default(),
            index: format!("({row}, {column})"),
            position: invocation.position,
        })?;
    Ok(Expression::from_value(cell, invocation.position))
}
