use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use indexmap::IndexMap;
use serde::Serialize;

use super::{GlobalRegistry, Map, Value};
use crate::aggregations::{AggregationContext, AggregationProvider, DisabledAggregations};

/// A notification as handed to the [`NotificationProvider`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub icon: Option<String>,
    pub sound: String,
    /// How long the notification stays visible; at least one second
    pub duration: Duration,
}

/// Delivers notifications raised by `notify()`
pub trait NotificationProvider: Send + Sync {
    /// Returns whether the notification was delivered
    fn send_notification(
        &self,
        notification: &Notification,
        channel: Option<&str>,
        flow: Option<&str>,
    ) -> bool;
}

/// Creates scheduled jobs requested by `spawn()`
pub trait JobSpawner: Send + Sync {
    fn spawn_job(&self, flow_tag: &str, plugin_kind: &str, config: Map) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

/// Outbound HTTP used by `get()` and `post()`; returns the response body
pub trait HttpClient: Send + Sync {
    fn request(&self, request: &HttpRequest) -> anyhow::Result<String>;
}

/// An external sheet behind an `excel()` or `googleSpreadsheet()` expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetSource {
    Excel { path: String },
    GoogleSpreadsheet { spreadsheet_id: String },
}

/// Reads rows from spreadsheet sources
pub trait SheetProvider: Send + Sync {
    /// All rows of `sheet` (the first sheet when `None`)
    fn rows(&self, source: &SheetSource, sheet: Option<&str>) -> anyhow::Result<Vec<Vec<Value>>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledNotifier;

impl NotificationProvider for DisabledNotifier {
    fn send_notification(&self, _: &Notification, _: Option<&str>, _: Option<&str>) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSpawner;

impl JobSpawner for DisabledSpawner {
    fn spawn_job(&self, flow_tag: &str, _: &str, _: Map) -> anyhow::Result<()> {
        Err(anyhow!("no job spawner is configured; cannot spawn `{flow_tag}`"))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledHttp;

impl HttpClient for DisabledHttp {
    fn request(&self, request: &HttpRequest) -> anyhow::Result<String> {
        Err(anyhow!("no HTTP client is configured; cannot reach {}", request.url))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSheets;

impl SheetProvider for DisabledSheets {
    fn rows(&self, source: &SheetSource, _: Option<&str>) -> anyhow::Result<Vec<Vec<Value>>> {
        Err(anyhow!("no spreadsheet provider is configured; cannot read {source:?}"))
    }
}

/// The collaborators a script may reach. Every side effect of a builtin goes
/// through one of these.
#[derive(Clone)]
pub struct Services {
    pub aggregations: Arc<dyn AggregationProvider>,
    pub notifier: Arc<dyn NotificationProvider>,
    pub spawner: Arc<dyn JobSpawner>,
    pub http: Arc<dyn HttpClient>,
    pub sheets: Arc<dyn SheetProvider>,
}

impl Default for Services {
    fn default() -> Self {
        Self {
            aggregations: Arc::new(DisabledAggregations),
            notifier: Arc::new(DisabledNotifier),
            spawner: Arc::new(DisabledSpawner),
            http: Arc::new(DisabledHttp),
            sheets: Arc::new(DisabledSheets),
        }
    }
}

impl Services {
    pub fn with_aggregations(mut self, provider: Arc<dyn AggregationProvider>) -> Self {
        self.aggregations = provider;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationProvider>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn JobSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    pub fn with_sheets(mut self, sheets: Arc<dyn SheetProvider>) -> Self {
        self.sheets = sheets;
        self
    }
}

/// State of a single script run. Never shared between runs.
pub struct ExecutionContext<'a> {
    registry: &'a GlobalRegistry,
    output: Map,
    args: Map,
    aggregations: AggregationContext,
    services: Services,
}

impl<'a> ExecutionContext<'a> {
    /// A context with every collaborator disabled
    pub fn new(registry: &'a GlobalRegistry, args: Map) -> Self {
        Self::with_services(registry, "script", args, Services::default())
    }

    pub fn with_services(
        registry: &'a GlobalRegistry,
        job: &str,
        args: Map,
        services: Services,
    ) -> Self {
        Self {
            registry,
            output: Map::new(),
            args,
            aggregations: AggregationContext::new(Arc::clone(&services.aggregations), job),
            services,
        }
    }

    pub fn registry(&self) -> &GlobalRegistry {
        self.registry
    }

    pub fn job(&self) -> &str {
        self.aggregations.job()
    }

    /// Caller-supplied argument by name
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    pub fn arguments(&self) -> &Map {
        &self.args
    }

    pub fn aggregations(&self) -> &AggregationContext {
        &self.aggregations
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Writes an output property; a later write to the same key wins
    pub fn set_output(&mut self, property: &str, value: Value) {
        self.output.insert(property.to_string(), value);
    }

    pub fn output(&self) -> &Map {
        &self.output
    }

    pub fn into_output(self) -> Map {
        self.output
    }
}
