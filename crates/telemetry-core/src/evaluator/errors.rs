use thiserror::Error;

use crate::{aggregations::StoreError, ast::Position, config::ConfigError};

/// Everything that can stop a script from parsing or evaluating
#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Parse error on {position}: {message}")]
    Parse { message: String, position: Position },

    #[error("Missing argument `{parameter}` for {callable}() on {position}")]
    MissingArgument {
        callable: String,
        parameter: String,
        position: Position,
    },

    #[error(
        "Wrong type for argument `{parameter}` of {callable}() on {position}: expected {expected}, got {actual}"
    )]
    WrongArgumentType {
        callable: String,
        parameter: String,
        expected: String,
        actual: String,
        position: Position,
    },

    #[error("Unexpected argument `{parameter}` for {callable}() on {position}")]
    UnexpectedArgument {
        callable: String,
        parameter: String,
        position: Position,
    },

    #[error("Invalid argument `{parameter}` for {callable}() on {position}: {message}")]
    InvalidArgument {
        callable: String,
        parameter: String,
        message: String,
        position: Position,
    },

    #[error("{target} does not contain a property with the key `{property}` ({position})")]
    UnknownProperty {
        target: String,
        property: String,
        position: Position,
    },

    #[error("Unknown argument {name} ({position})")]
    UnknownArgument { name: String, position: Position },

    #[error("{target} cannot be used as a value ({position})")]
    NotAValue { target: String, position: Position },

    #[error("{target} is not callable ({position})")]
    NotCallable { target: String, position: Position },

    #[error("Type error on {position}: cannot {operation} {left} and {right}")]
    Type {
        operation: String,
        left: String,
        right: String,
        position: Position,
    },

    #[error("Type error on {position}: cannot {operation} {operand}")]
    UnaryType {
        operation: String,
        operand: String,
        position: Position,
    },

    #[error("Division by zero on {position}")]
    DivisionByZero { position: Position },

    #[error("Index {index} is out of bounds for {target} ({position})")]
    IndexOutOfBounds {
        target: String,
        index: String,
        position: Position,
    },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Unknown file format {format}")]
    UnsupportedFormat { format: String },

    #[error("Could not decode {format} data: {message}")]
    Decode { format: String, message: String },

    #[error("Could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid interval: {0}")]
    Interval(#[from] ConfigError),

    #[error("{operation} failed on {position}: {message}")]
    External {
        operation: String,
        message: String,
        position: Position,
    },

    #[error("{message} ({position})")]
    UserRaised { message: String, position: Position },

    /// A failure from a layer without source positions (store, file system,
    /// decoders), tagged with the call that triggered it
    #[error("{source} ({position})")]
    At {
        position: Position,
        source: Box<ScriptError>,
    },
}

impl ScriptError {
    pub fn parse(message: impl Into<String>, position: Position) -> Self {
        Self::Parse {
            message: message.into(),
            position,
        }
    }

    pub fn unknown_property(target: impl ToString, property: &str, position: Position) -> Self {
        Self::UnknownProperty {
            target: target.to_string(),
            property: property.to_string(),
            position,
        }
    }

    pub fn type_error(operation: &str, left: &str, right: &str, position: Position) -> Self {
        Self::Type {
            operation: operation.to_string(),
            left: left.to_string(),
            right: right.to_string(),
            position,
        }
    }

    /// Wraps a collaborator failure (spawner, HTTP client, sheet provider)
    pub fn external(operation: &str, error: anyhow::Error, position: Position) -> Self {
        Self::External {
            operation: operation.to_string(),
            message: format!("{error:#}"),
            position,
        }
    }

    /// Tags a positionless error with `position`; errors that already carry
    /// one are returned unchanged
    pub fn at(self, position: Position) -> Self {
        match self.position() {
            Some(_) => self,
            None => Self::At {
                position,
                source: Box::new(self),
            },
        }
    }

    /// The underlying error, without the position tag added by [`ScriptError::at`]
    pub fn root(&self) -> &ScriptError {
        match self {
            Self::At { source, .. } => source.root(),
            other => other,
        }
    }

    /// Source position, for the kinds that carry one
    pub fn position(&self) -> Option<Position> {
        match self {
            Self::Parse { position, .. }
            | Self::MissingArgument { position, .. }
            | Self::WrongArgumentType { position, .. }
            | Self::UnexpectedArgument { position, .. }
            | Self::InvalidArgument { position, .. }
            | Self::UnknownProperty { position, .. }
            | Self::UnknownArgument { position, .. }
            | Self::NotAValue { position, .. }
            | Self::NotCallable { position, .. }
            | Self::Type { position, .. }
            | Self::UnaryType { position, .. }
            | Self::DivisionByZero { position }
            | Self::IndexOutOfBounds { position, .. }
            | Self::External { position, .. }
            | Self::UserRaised { position, .. }
            | Self::At { position, .. } => Some(*position),
            Self::Store(_)
            | Self::UnsupportedFormat { .. }
            | Self::Decode { .. }
            | Self::Io { .. }
            | Self::Interval(_) => None,
        }
    }
}
