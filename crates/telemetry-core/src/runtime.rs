//! Script runtime - high-level interface for parsing and running scripts
//!
//! Owns the builtin registry and the collaborators, and builds a fresh
//! execution context for every run. A runtime can be shared between threads;
//! runs never share state except through the aggregation store.

use std::{path::Path, sync::Arc, time::Instant};

use tracing::{debug, warn};

use crate::{
    aggregations::AggregationProvider,
    ast::Script,
    evaluator::{execute, ExecutionContext, GlobalRegistry, Map, ScriptError, Services},
    parser,
};

/// Result of one script run
#[derive(Debug)]
pub struct Execution {
    /// Everything written before the run ended. Incomplete when `result` is
    /// an error.
    pub output: Map,
    pub result: Result<(), ScriptError>,
}

impl Execution {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// The output, only if every command succeeded
    pub fn into_result(self) -> Result<Map, ScriptError> {
        self.result.map(|()| self.output)
    }
}

pub struct ScriptRuntime {
    registry: GlobalRegistry,
    services: Services,
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new(Services::default())
    }
}

impl ScriptRuntime {
    /// Runtime with the standard builtins
    pub fn new(services: Services) -> Self {
        Self::with_registry(GlobalRegistry::standard(), services)
    }

    pub fn with_registry(registry: GlobalRegistry, services: Services) -> Self {
        Self { registry, services }
    }

    /// Runtime whose counters and series live in `store`
    pub fn with_store(store: Arc<dyn AggregationProvider>) -> Self {
        Self::new(Services::default().with_aggregations(store))
    }

    pub fn registry(&self) -> &GlobalRegistry {
        &self.registry
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn parse(&self, source: &str) -> Result<Script, ScriptError> {
        parser::parse(source)
    }

    pub fn parse_file(&self, path: &Path) -> Result<Script, ScriptError> {
        parser::parse_file(path)
    }

    /// Runs `script` for `job` with the caller's arguments
    pub fn run(&self, job: &str, script: &Script, args: Map) -> Execution {
        let started = Instant::now();
        let mut context = ExecutionContext::with_services(&self.registry, job, args, self.services.clone());

        let result = execute(&script.commands, &mut context);
        let output = context.into_output();

        match &result {
            Ok(()) => debug!(
                job,
                commands = script.len(),
                properties = output.len(),
                elapsed = ?started.elapsed(),
                "script finished"
            ),
            Err(error) => warn!(job, %error, properties = output.len(), "script failed"),
        }

        Execution { output, result }
    }

    /// Parses and runs `source`. A parse error produces an empty output.
    pub fn run_source(&self, job: &str, source: &str, args: Map) -> Execution {
        match self.parse(source) {
            Ok(script) => self.run(job, &script, args),
            Err(error) => {
                warn!(job, %error, "script does not parse");
                Execution {
                    output: Map::new(),
                    result: Err(error),
                }
            }
        }
    }
}
