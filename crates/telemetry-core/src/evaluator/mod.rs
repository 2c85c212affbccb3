use std::fmt;

use indexmap::IndexMap;

use crate::{aggregations::Sample, ast::Position};

pub mod callable;
pub mod context;
pub mod decoder;
pub mod errors;
pub mod executor;
pub mod globals;
mod methods;
mod operators;
pub mod value;

#[cfg(test)]
mod tests;

pub use callable::{ArgKind, Arguments, Builtin, Callable, Invocation, Parameter};
pub use context::{
    DisabledHttp, DisabledNotifier, DisabledSheets, DisabledSpawner, ExecutionContext, HttpClient,
    HttpMethod, HttpRequest, JobSpawner, Notification, NotificationProvider, Services, SheetProvider,
    SheetSource,
};
pub use errors::ScriptError;
pub use executor::execute;
pub use globals::{GlobalRegistry, PROCESS_PLUGIN};
pub use operators::{BinaryOp, UnaryOp};
pub use value::{Map, NumericArray, Value};

/// An argument as written at a call site
#[derive(Debug, Clone)]
pub struct CallArgument {
    /// `Some` for `name = value`, `None` for positional arguments
    pub name: Option<String>,
    pub value: Expression,
}

/// The closed set of expression variants
#[derive(Debug, Clone)]
pub enum ExpressionKind {
    /// Root of the builtin namespace
    Global,
    Null,
    String(String),
    Numeric(f64),
    Boolean(bool),
    Array(Vec<Expression>),
    Map(IndexMap<String, Expression>),
    Counter {
        name: String,
        value: f64,
    },
    Series {
        name: String,
        samples: Vec<Sample>,
    },
    Callable(Callable),
    Excel {
        path: String,
    },
    GoogleSpreadsheet {
        spreadsheet_id: String,
    },

    // Syntactic forms, reduced by `resolve`
    Property {
        target: Box<Expression>,
        name: String,
    },
    Call {
        target: Box<Expression>,
        arguments: Vec<CallArgument>,
    },
    Index {
        target: Box<Expression>,
        index: Box<Expression>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

/// A positioned expression node
#[derive(Debug, Clone)]
pub struct Expression {
    kind: ExpressionKind,
    position: Position,
}

impl Expression {
    pub fn new(kind: ExpressionKind, position: Position) -> Self {
        Self { kind, position }
    }

    pub fn global(position: Position) -> Self {
        Self::new(ExpressionKind::Global, position)
    }

    pub fn null(position: Position) -> Self {
        Self::new(ExpressionKind::Null, position)
    }

    pub fn string(value: impl Into<String>, position: Position) -> Self {
        Self::new(ExpressionKind::String(value.into()), position)
    }

    pub fn numeric(value: f64, position: Position) -> Self {
        Self::new(ExpressionKind::Numeric(value), position)
    }

    pub fn boolean(value: bool, position: Position) -> Self {
        Self::new(ExpressionKind::Boolean(value), position)
    }

    /// Wraps an optional number, mapping `None` to null
    pub fn numeric_or_null(value: Option<f64>, position: Position) -> Self {
        match value {
            Some(n) => Self::numeric(n, position),
            None => Self::null(position),
        }
    }

    /// Builds the expression form of evaluated data
    pub fn from_value(value: Value, position: Position) -> Self {
        let kind = match value {
            Value::Null => ExpressionKind::Null,
            Value::Boolean(b) => ExpressionKind::Boolean(b),
            Value::Number(n) => ExpressionKind::Numeric(n),
            Value::String(s) => ExpressionKind::String(s),
            Value::Array(items) => ExpressionKind::Array(
                items
                    .into_iter()
                    .map(|item| Self::from_value(item, position))
                    .collect(),
            ),
            Value::Map(map) => ExpressionKind::Map(
                map.into_iter()
                    .map(|(key, item)| (key, Self::from_value(item, position)))
                    .collect(),
            ),
        };
        Self::new(kind, position)
    }

    pub fn kind(&self) -> &ExpressionKind {
        &self.kind
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Evaluates the expression to data
    pub fn evaluate(&self, context: &ExecutionContext<'_>) -> Result<Value, ScriptError> {
        match &self.kind {
            ExpressionKind::Null => Ok(Value::Null),
            ExpressionKind::String(s) => Ok(Value::String(s.clone())),
            ExpressionKind::Numeric(n) => Ok(Value::Number(*n)),
            ExpressionKind::Boolean(b) => Ok(Value::Boolean(*b)),
            ExpressionKind::Array(items) => items
                .iter()
                .map(|item| item.evaluate(context))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            ExpressionKind::Map(entries) => entries
                .iter()
                .map(|(key, item)| Ok((key.clone(), item.evaluate(context)?)))
                .collect::<Result<Map, ScriptError>>()
                .map(Value::Map),
            ExpressionKind::Counter { value, .. } => Ok(Value::Number(*value)),
            ExpressionKind::Series { samples, .. } => Ok(Value::Array(
                samples.iter().map(|s| Value::Number(s.value)).collect(),
            )),
            ExpressionKind::Global
            | ExpressionKind::Callable(_)
            | ExpressionKind::Excel { .. }
            | ExpressionKind::GoogleSpreadsheet { .. } => Err(ScriptError::NotAValue {
                target: self.to_string(),
                position: self.position,
            }),
            ExpressionKind::Property { .. }
            | ExpressionKind::Call { .. }
            | ExpressionKind::Index { .. } => self.resolve(context)?.evaluate(context),
            ExpressionKind::Unary { op, operand } => {
                operators::unary(*op, operand, context, self.position)
            }
            ExpressionKind::Binary { op, left, right } => {
                operators::binary(*op, left, right, context, self.position)
            }
        }
    }

    /// Reduces syntactic forms (property access, calls, indexing,
    /// operators) to a concrete variant. Concrete variants resolve to
    /// themselves; array and map literals resolve their elements.
    pub fn resolve(&self, context: &ExecutionContext<'_>) -> Result<Expression, ScriptError> {
        match &self.kind {
            ExpressionKind::Property { target, name } => {
                let target = target.resolve(context)?;
                methods::extract(&target, context, name, self.position)
            }
            ExpressionKind::Call { target, arguments } => {
                let callee = target.resolve(context)?;
                let ExpressionKind::Callable(callable) = &callee.kind else {
                    return Err(ScriptError::NotCallable {
                        target: callee.to_string(),
                        position: self.position,
                    });
                };

                let mut positional = Vec::new();
                let mut named = IndexMap::new();
                for argument in arguments {
                    let value = argument.value.evaluate(context)?;
                    match &argument.name {
                        Some(name) => {
                            named.insert(name.clone(), value);
                        }
                        None => positional.push(value),
                    }
                }

                callable.call(context, positional, named, self.position)
            }
            ExpressionKind::Index { target, index } => {
                let target = target.resolve(context)?;
                let index = index.evaluate(context)?;
                self.index(target, index)
            }
            ExpressionKind::Unary { .. } | ExpressionKind::Binary { .. } => {
                Ok(Self::from_value(self.evaluate(context)?, self.position))
            }
            ExpressionKind::Array(items) => Ok(Self::new(
                ExpressionKind::Array(
                    items
                        .iter()
                        .map(|item| item.resolve(context))
                        .collect::<Result<_, _>>()?,
                ),
                self.position,
            )),
            ExpressionKind::Map(entries) => Ok(Self::new(
                ExpressionKind::Map(
                    entries
                        .iter()
                        .map(|(key, item)| Ok((key.clone(), item.resolve(context)?)))
                        .collect::<Result<_, ScriptError>>()?,
                ),
                self.position,
            )),
            _ => Ok(self.clone()),
        }
    }

    /// Looks up a property or method by name
    pub fn extract(
        &self,
        context: &ExecutionContext<'_>,
        name: &str,
    ) -> Result<Expression, ScriptError> {
        let target = self.resolve(context)?;
        methods::extract(&target, context, name, self.position)
    }

    fn index(&self, target: Expression, index: Value) -> Result<Expression, ScriptError> {
        let out_of_bounds = |target: &Expression| ScriptError::IndexOutOfBounds {
            target: target.to_string(),
            index: index.to_string(),
            position: self.position,
        };

        match (&target.kind, &index) {
            (ExpressionKind::Array(items), Value::Number(n)) => {
                if n.fract() != 0.0 || *n < 0.0 {
                    return Err(out_of_bounds(&target));
                }
                items
                    .get(*n as usize)
                    .cloned()
                    .ok_or_else(|| out_of_bounds(&target))
            }
            (ExpressionKind::Map(entries), Value::String(key)) => entries
                .get(key)
                .cloned()
                .ok_or_else(|| ScriptError::unknown_property(&target, key, self.position)),
            _ => Err(ScriptError::type_error(
                "index",
                target.type_name(),
                index.type_name(),
                self.position,
            )),
        }
    }

    /// Short name of the variant, used in type errors
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            ExpressionKind::Global => "global",
            ExpressionKind::Null => "null",
            ExpressionKind::String(_) => "string",
            ExpressionKind::Numeric(_) => "numeric",
            ExpressionKind::Boolean(_) => "boolean",
            ExpressionKind::Array(_) => "array",
            ExpressionKind::Map(_) => "map",
            ExpressionKind::Counter { .. } => "counter",
            ExpressionKind::Series { .. } => "series",
            ExpressionKind::Callable(_) => "callable",
            ExpressionKind::Excel { .. } => "excel",
            ExpressionKind::GoogleSpreadsheet { .. } => "google spreadsheet",
            ExpressionKind::Property { .. }
            | ExpressionKind::Call { .. }
            | ExpressionKind::Index { .. }
            | ExpressionKind::Unary { .. }
            | ExpressionKind::Binary { .. } => "expression",
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: impl Iterator<Item = T>) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExpressionKind::Global => f.write_str("Global()"),
            ExpressionKind::Null => f.write_str("Null()"),
            ExpressionKind::String(s) => write!(f, "String({s})"),
            ExpressionKind::Numeric(n) => write!(f, "Numeric({})", value::format_number(*n)),
            ExpressionKind::Boolean(b) => write!(f, "Boolean({b})"),
            ExpressionKind::Array(items) => {
                f.write_str("Array(")?;
                write_list(f, items.iter())?;
                f.write_str(")")
            }
            ExpressionKind::Map(entries) => {
                f.write_str("Map(")?;
                write_list(f, entries.iter().map(|(key, item)| format!("{key}: {item}")))?;
                f.write_str(")")
            }
            ExpressionKind::Counter { name, .. } => write!(f, "Counter({name})"),
            ExpressionKind::Series { name, .. } => write!(f, "Series({name})"),
            ExpressionKind::Callable(callable) => write!(f, "{callable}"),
            ExpressionKind::Excel { path } => write!(f, "Excel({path})"),
            ExpressionKind::GoogleSpreadsheet { spreadsheet_id } => {
                write!(f, "GoogleSpreadsheet({spreadsheet_id})")
            }
            ExpressionKind::Property { target, name } => write!(f, "{target}.{name}"),
            ExpressionKind::Call { target, arguments } => {
                write!(f, "{target}(")?;
                write_list(
                    f,
                    arguments.iter().map(|argument| match &argument.name {
                        Some(name) => format!("{name}={}", argument.value),
                        None => argument.value.to_string(),
                    }),
                )?;
                f.write_str(")")
            }
            ExpressionKind::Index { target, index } => write!(f, "{target}[{index}]"),
            ExpressionKind::Unary { op, operand } => write!(f, "{op}{operand}"),
            ExpressionKind::Binary { op, left, right } => write!(f, "({left} {op} {right})"),
        }
    }
}
