use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sled::transaction::TransactionError;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DataConfig};

pub mod store;

pub use store::{AggregationStore, SweepReport, COUNTERS_BUCKET, OAUTH_BUCKET, RESERVED_PREFIX};

/// Storage-related errors
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// An entry that cannot be decoded
    #[error("Corrupt entry `{key}` in bucket `{bucket}`")]
    Corrupt { bucket: String, key: String },

    /// Bucket names starting with `_` belong to the agent itself
    #[error("Bucket name `{name}` is reserved")]
    ReservedBucket { name: String },

    #[error("Invalid series name `{name}`")]
    InvalidName { name: String },

    /// No store location was configured
    #[error("The aggregation store is not enabled; set a data path to use counters and series")]
    Disabled,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(error: TransactionError<StoreError>) -> Self {
        match error {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(inner) => StoreError::Database(inner),
        }
    }
}

/// Persisted state of a counter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub value: f64,
    /// Unix seconds of the last write
    pub updated_at: u64,
}

/// One observation of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix seconds
    pub timestamp: u64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: u64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Read/write contract the evaluator needs from the store. Implemented by
/// [`AggregationStore`]; tests substitute their own.
pub trait AggregationProvider: Send + Sync {
    /// `Ok(None)` when the counter has never been written
    fn get_counter(&self, name: &str) -> Result<Option<CounterRecord>, StoreError>;

    fn set_counter(&self, name: &str, value: f64) -> Result<CounterRecord, StoreError>;

    fn increment_counter(&self, name: &str, by: f64) -> Result<CounterRecord, StoreError>;

    /// Samples in chronological order; `Ok(None)` when the series does not exist
    fn get_series(&self, name: &str) -> Result<Option<Vec<Sample>>, StoreError>;

    fn append_sample(&self, name: &str, sample: Sample) -> Result<(), StoreError>;
}

/// Stand-in used when no store location is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAggregations;

impl AggregationProvider for DisabledAggregations {
    fn get_counter(&self, _name: &str) -> Result<Option<CounterRecord>, StoreError> {
        Err(StoreError::Disabled)
    }

    fn set_counter(&self, _name: &str, _value: f64) -> Result<CounterRecord, StoreError> {
        Err(StoreError::Disabled)
    }

    fn increment_counter(&self, _name: &str, _by: f64) -> Result<CounterRecord, StoreError> {
        Err(StoreError::Disabled)
    }

    fn get_series(&self, _name: &str) -> Result<Option<Vec<Sample>>, StoreError> {
        Err(StoreError::Disabled)
    }

    fn append_sample(&self, _name: &str, _sample: Sample) -> Result<(), StoreError> {
        Err(StoreError::Disabled)
    }
}

/// Store handle scoped to one job
#[derive(Clone)]
pub struct AggregationContext {
    provider: Arc<dyn AggregationProvider>,
    job: String,
}

impl AggregationContext {
    pub fn new(provider: Arc<dyn AggregationProvider>, job: impl Into<String>) -> Self {
        Self {
            provider,
            job: job.into(),
        }
    }

    pub fn disabled(job: impl Into<String>) -> Self {
        Self::new(Arc::new(DisabledAggregations), job)
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn counter(&self, name: &str) -> Result<Option<CounterRecord>, StoreError> {
        debug!(job = %self.job, counter = name, "reading counter");
        self.provider.get_counter(name)
    }

    pub fn set_counter(&self, name: &str, value: f64) -> Result<CounterRecord, StoreError> {
        debug!(job = %self.job, counter = name, value, "setting counter");
        self.provider.set_counter(name, value)
    }

    pub fn increment_counter(&self, name: &str, by: f64) -> Result<CounterRecord, StoreError> {
        debug!(job = %self.job, counter = name, by, "incrementing counter");
        self.provider.increment_counter(name, by)
    }

    pub fn series(&self, name: &str) -> Result<Option<Vec<Sample>>, StoreError> {
        debug!(job = %self.job, series = name, "reading series");
        self.provider.get_series(name)
    }

    pub fn append_sample(&self, name: &str, sample: Sample) -> Result<(), StoreError> {
        debug!(job = %self.job, series = name, timestamp = sample.timestamp, "appending sample");
        self.provider.append_sample(name, sample)
    }
}

/// Current Unix time in whole seconds
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

/// Opens the store described by `config`. Without a path the subsystem is
/// disabled and `Ok(None)` is returned.
pub fn init(config: &DataConfig) -> Result<Option<AggregationStore>, StoreError> {
    let Some(path) = config.path.as_ref() else {
        warn!("Data Manager -> No data path provided. The Data Manager will not run.");
        return Ok(None);
    };

    let ttl = config.ttl()?;
    let store = AggregationStore::open(path, ttl)?;

    match ttl {
        Some(ttl) => info!(path = %path.display(), ?ttl, "aggregation store opened"),
        None => info!(path = %path.display(), "aggregation store opened; data is kept indefinitely"),
    }

    Ok(Some(store))
}
