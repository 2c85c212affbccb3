//! Telemetry Agent - command line front end for telemetry scripts
//!
//! This crate wires the script runtime to the aggregation store and to the
//! collaborators available on a plain host: notifications and job spawns are
//! logged rather than delivered.

pub mod agent;
pub mod args;
pub mod services;

// Re-export commonly used types for convenience
pub use agent::Agent;
pub use args::{load_args_file, parse_arg_pair};
pub use services::{LogNotifier, LogSpawner};
