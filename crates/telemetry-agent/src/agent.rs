use std::{path::Path, sync::Arc};

use crossbeam_channel::{unbounded, Receiver};
use telemetry_core::{
    aggregations, evaluator::Services, AgentConfig, AggregationStore, Execution, Map, Script,
    ScriptRuntime, StoreError, SweepReport,
};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::services::{LogNotifier, LogSpawner};

/// Everything one agent process needs: the store (when configured) and a
/// runtime wired to it and to the logging collaborators.
pub struct Agent {
    runtime: ScriptRuntime,
    store: Option<Arc<AggregationStore>>,
    spawner: Arc<LogSpawner>,
    store_errors: Receiver<StoreError>,
}

impl Agent {
    /// Opens the store described by `config`. Without a data path the agent
    /// still runs scripts; counters and series then fail with
    /// [`StoreError::Disabled`].
    pub fn open(config: &AgentConfig) -> telemetry_core::Result<Self> {
        let (sender, store_errors) = unbounded();
        let store = aggregations::init(&config.data)?
            .map(|store| Arc::new(store.with_error_channel(sender)));

        let spawner = Arc::new(LogSpawner::new());
        let mut services = Services::default()
            .with_notifier(Arc::new(LogNotifier::new()))
            .with_spawner(spawner.clone());
        if let Some(store) = &store {
            services = services.with_aggregations(store.clone());
        }

        Ok(Self {
            runtime: ScriptRuntime::new(services),
            store,
            spawner,
            store_errors,
        })
    }

    /// Parses a script file without opening the store
    pub fn check(path: &Path) -> telemetry_core::Result<Script> {
        Ok(ScriptRuntime::default().parse_file(path)?)
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    pub fn store(&self) -> Option<&Arc<AggregationStore>> {
        self.store.as_ref()
    }

    /// Flow tags spawned by scripts run through this agent
    pub fn spawned_tags(&self) -> Vec<String> {
        self.spawner.tags()
    }

    pub fn load_script(&self, path: &Path) -> telemetry_core::Result<Script> {
        Ok(self.runtime.parse_file(path)?)
    }

    pub fn run(&self, job: &str, script: &Script, args: Map) -> Execution {
        self.runtime.run(job, script, args)
    }

    /// Runs `script` without arguments on the blocking pool and logs the
    /// outcome. The task's handle on the agent is dropped before the
    /// returned handle resolves, so awaiting it is enough before
    /// [`Agent::close`].
    pub fn spawn_run(self: &Arc<Self>, job: String, script: Arc<Script>) -> JoinHandle<Execution> {
        let agent = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let execution = agent.run(&job, &script, Map::new());
            match serde_json::to_string(&execution.output) {
                Ok(output) if execution.is_ok() => info!(job = %job, %output, "run finished"),
                Ok(output) => warn!(job = %job, %output, "run ended early"),
                Err(err) => error!(job = %job, "cannot encode output: {err}"),
            }
            execution
        })
    }

    /// One sweep with the configured retention window. `None` when the
    /// store is disabled.
    pub fn sweep(&self) -> telemetry_core::Result<Option<SweepReport>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let report = store.sweep()?;
        info!(buckets = report.buckets, removed = report.removed, "sweep finished");
        Ok(Some(report))
    }

    /// Periodic sweep; failures are logged and queued for
    /// [`Agent::drain_store_errors`]
    pub fn run_sweep(&self) {
        if let Some(store) = &self.store {
            store.run_sweep();
        }
    }

    /// Sweep failures reported since the last call
    pub fn drain_store_errors(&self) -> Vec<StoreError> {
        self.store_errors.try_iter().collect()
    }

    /// Flushes the store, unless a run still holds a handle to it
    pub fn close(self) -> telemetry_core::Result<()> {
        let Self { runtime, store, .. } = self;
        drop(runtime);

        if let Some(store) = store {
            match Arc::try_unwrap(store) {
                Ok(store) => store.close()?,
                Err(_) => info!("aggregation store still in use; skipping final flush"),
            }
        }
        Ok(())
    }
}
