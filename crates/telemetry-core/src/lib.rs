//! # Telemetry Core
//!
//! Core of the telemetry agent:
//! - Token/AST layer, lexer and parser for the script language
//! - Expression model, callable builtins and the command executor
//! - The aggregation store holding counters and series, with TTL sweeps
//! - Interval parsing and store configuration
//!
//! The agent binary drives these; scheduling and submission live outside.

#![warn(clippy::all)]

pub mod aggregations;
pub mod ast;
pub mod config;
pub mod evaluator;
pub mod parser;
pub mod runtime;

// Re-export commonly used types
pub use aggregations::{
    AggregationContext, AggregationProvider, AggregationStore, CounterRecord, Sample, StoreError,
    SweepReport,
};
pub use ast::{Command, Position, Script, Token, TokenKind};
pub use config::{parse_interval, AgentConfig, ConfigError, DataConfig};
pub use evaluator::{
    execute, ExecutionContext, Expression, ExpressionKind, GlobalRegistry, Map, ScriptError,
    Services, Value,
};
pub use runtime::{Execution, ScriptRuntime};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Installs the global tracing subscriber. `RUST_LOG` takes precedence over
/// `default_filter`. Calling it more than once is harmless.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Error types for agent operations
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    /// Storage-related error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Script parse or evaluation error
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;
