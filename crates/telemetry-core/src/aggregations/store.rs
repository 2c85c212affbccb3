use std::{io, path::Path, thread, time::Duration};

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use sled::{
    transaction::{ConflictableTransactionError, TransactionResult},
    Db, IVec, Transactional, Tree,
};
use tracing::{debug, error, info};

use super::{unix_now, AggregationProvider, CounterRecord, Sample, StoreError};

/// Reserved bucket holding counter records
pub const COUNTERS_BUCKET: &str = "_counters";
/// Reserved bucket holding cached OAuth tokens
pub const OAUTH_BUCKET: &str = "_oauth";
/// Buckets whose name starts with this byte are never swept
pub const RESERVED_PREFIX: u8 = b'_';

/// sled releases its file lock from background threads after the last
/// handle is dropped, so a reopen in the same process may briefly see the
/// previous lock still held.
const OPEN_ATTEMPTS: u32 = 10;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Width of a `u64` in decimal; sample keys are zero-padded to it so that
/// byte order and numeric order agree.
const KEY_WIDTH: usize = 20;

fn is_reserved(name: &[u8]) -> bool {
    name.first() == Some(&RESERVED_PREFIX)
}

fn sample_key(timestamp: u64) -> String {
    format!("{timestamp:0width$}", width = KEY_WIDTH)
}

fn decode_sample(bucket: &str, key: &[u8], value: &[u8]) -> Result<Sample, StoreError> {
    let corrupt = || StoreError::Corrupt {
        bucket: bucket.to_string(),
        key: String::from_utf8_lossy(key).into_owned(),
    };

    let timestamp = std::str::from_utf8(key)
        .ok()
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or_else(corrupt)?;
    let bytes: [u8; 8] = value.try_into().map_err(|_| corrupt())?;

    Ok(Sample::new(timestamp, f64::from_be_bytes(bytes)))
}

/// Outcome of a sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Buckets that had at least one expired sample
    pub buckets: usize,
    /// Samples deleted
    pub removed: usize,
}

/// Durable counters and time-series on top of sled.
///
/// Every bucket is a sled tree. `_counters` and `_oauth` are created on open;
/// every other bucket is a series keyed by sample timestamp. All access goes
/// through `lock`: reads share it, writes and sweeps hold it exclusively.
pub struct AggregationStore {
    db: Db,
    counters: Tree,
    tokens: Tree,
    ttl: Option<Duration>,
    lock: RwLock<()>,
    error_channel: Option<Sender<StoreError>>,
}

impl AggregationStore {
    pub fn open(path: impl AsRef<Path>, ttl: Option<Duration>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut attempt = 1;
        let db = loop {
            match sled::open(path) {
                Err(sled::Error::Io(err))
                    if err.kind() == io::ErrorKind::WouldBlock && attempt < OPEN_ATTEMPTS =>
                {
                    debug!(path = %path.display(), attempt, "store is still locked; retrying");
                    thread::sleep(OPEN_RETRY_DELAY * attempt);
                    attempt += 1;
                }
                result => break result?,
            }
        };
        Self::new_with_db(db, ttl)
    }

    pub fn new_with_db(db: Db, ttl: Option<Duration>) -> Result<Self, StoreError> {
        let counters = db.open_tree(COUNTERS_BUCKET)?;
        let tokens = db.open_tree(OAUTH_BUCKET)?;
        db.flush()?;

        Ok(Self {
            db,
            counters,
            tokens,
            ttl,
            lock: RwLock::new(()),
            error_channel: None,
        })
    }

    /// Failed sweeps are forwarded to `sender` in addition to being logged
    pub fn with_error_channel(mut self, sender: Sender<StoreError>) -> Self {
        self.error_channel = Some(sender);
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn get_counter(&self, name: &str) -> Result<Option<CounterRecord>, StoreError> {
        let _guard = self.lock.read();
        match self.counters.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set_counter(&self, name: &str, value: f64) -> Result<CounterRecord, StoreError> {
        self.update_counter(name, |_| value)
    }

    pub fn increment_counter(&self, name: &str, by: f64) -> Result<CounterRecord, StoreError> {
        self.update_counter(name, |current| current + by)
    }

    fn update_counter(
        &self,
        name: &str,
        next: impl Fn(f64) -> f64,
    ) -> Result<CounterRecord, StoreError> {
        let _guard = self.lock.write();
        let updated_at = unix_now();

        let result: TransactionResult<CounterRecord, StoreError> =
            self.counters.transaction(|tx| {
                let current = match tx.get(name.as_bytes())? {
                    Some(bytes) => {
                        bincode::deserialize::<CounterRecord>(&bytes)
                            .map_err(|e| ConflictableTransactionError::Abort(e.into()))?
                            .value
                    }
                    None => 0.0,
                };

                let record = CounterRecord {
                    value: next(current),
                    updated_at,
                };
                let bytes = bincode::serialize(&record)
                    .map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
                tx.insert(name.as_bytes(), bytes)?;
                Ok(record)
            });

        let record = result?;
        self.db.flush()?;
        Ok(record)
    }

    fn series_exists(&self, name: &str) -> bool {
        self.db
            .tree_names()
            .iter()
            .any(|tree| tree.as_ref() == name.as_bytes())
    }

    fn check_series_name(name: &str) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidName {
                name: name.to_string(),
            });
        }
        if is_reserved(name.as_bytes()) {
            return Err(StoreError::ReservedBucket {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_series(&self, name: &str) -> Result<Option<Vec<Sample>>, StoreError> {
        Self::check_series_name(name)?;
        let _guard = self.lock.read();

        // Reading must not create the bucket
        if !self.series_exists(name) {
            return Ok(None);
        }

        let tree = self.db.open_tree(name)?;
        let mut samples = Vec::with_capacity(tree.len());
        for item in tree.iter() {
            let (key, value) = item?;
            samples.push(decode_sample(name, &key, &value)?);
        }
        Ok(Some(samples))
    }

    pub fn append_sample(&self, name: &str, sample: Sample) -> Result<(), StoreError> {
        Self::check_series_name(name)?;
        let _guard = self.lock.write();

        let tree = self.db.open_tree(name)?;
        let key = sample_key(sample.timestamp);
        let result: TransactionResult<(), StoreError> = tree.transaction(|tx| {
            tx.insert(key.as_bytes(), sample.value.to_be_bytes().to_vec())?;
            Ok(())
        });
        result?;

        self.db.flush()?;
        Ok(())
    }

    /// Names of every series bucket
    pub fn series_names(&self) -> Vec<String> {
        let _guard = self.lock.read();
        self.db
            .tree_names()
            .into_iter()
            .filter(|name| !is_reserved(name))
            .map(|name| String::from_utf8_lossy(&name).into_owned())
            .collect()
    }

    pub fn cache_token(&self, entry: &str, token: &[u8]) -> Result<(), StoreError> {
        let _guard = self.lock.write();
        self.tokens.insert(entry.as_bytes(), token)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn cached_token(&self, entry: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let _guard = self.lock.read();
        Ok(self.tokens.get(entry.as_bytes())?.map(|token| token.to_vec()))
    }

    /// Sweeps with the retention window given at open time
    pub fn sweep(&self) -> Result<SweepReport, StoreError> {
        match self.ttl {
            Some(ttl) => self.sweep_with(ttl),
            None => {
                debug!("no retention window configured; skipping sweep");
                Ok(SweepReport::default())
            }
        }
    }

    /// Deletes every sample older than `now - ttl`. A zero `ttl` keeps everything.
    pub fn sweep_with(&self, ttl: Duration) -> Result<SweepReport, StoreError> {
        if ttl.is_zero() {
            debug!("retention window is zero; skipping sweep");
            return Ok(SweepReport::default());
        }
        self.sweep_before(unix_now().saturating_sub(ttl.as_secs()))
    }

    /// Deletes, in every non-reserved bucket, all samples with a timestamp
    /// strictly below `cutoff`. All deletions commit in one transaction.
    pub fn sweep_before(&self, cutoff: u64) -> Result<SweepReport, StoreError> {
        let _guard = self.lock.write();
        let cutoff_key = sample_key(cutoff);

        let mut trees = Vec::new();
        let mut doomed: Vec<Vec<IVec>> = Vec::new();

        for name in self.db.tree_names() {
            if is_reserved(&name) {
                continue;
            }
            let tree = self.db.open_tree(&name)?;

            // Newest key strictly older than the cutoff
            let boundary = tree.range(..cutoff_key.as_bytes()).next_back().transpose()?;
            let Some((boundary, _)) = boundary else {
                continue;
            };

            let keys = tree.range(..=boundary).keys().collect::<Result<Vec<_>, _>>()?;
            trees.push(tree);
            doomed.push(keys);
        }

        let report = SweepReport {
            buckets: trees.len(),
            removed: doomed.iter().map(Vec::len).sum(),
        };
        if trees.is_empty() {
            return Ok(report);
        }

        let result: TransactionResult<(), StoreError> = trees.as_slice().transaction(|views| {
            for (view, keys) in views.iter().zip(&doomed) {
                for key in keys {
                    view.remove(key.clone())?;
                }
            }
            Ok(())
        });
        result?;

        self.db.flush()?;
        Ok(report)
    }

    /// Entry point for the periodic cleanup signal. Failures are logged and
    /// reported on the error channel; the next tick retries.
    pub fn run_sweep(&self) {
        match self.sweep() {
            Ok(report) if report.removed > 0 => info!(
                buckets = report.buckets,
                removed = report.removed,
                "Data Manager -> expired samples removed"
            ),
            Ok(_) => debug!("Data Manager -> nothing to sweep"),
            Err(err) => self.report_sweep_failure(err),
        }
    }

    fn report_sweep_failure(&self, err: StoreError) {
        error!("Data Manager -> Database Cleanup Error: {err}");
        if let Some(sender) = &self.error_channel {
            if let Err(unsent) = sender.send(err) {
                debug!("no listener for sweep errors: {}", unsent.into_inner());
            }
        }
    }

    /// Flushes outstanding writes and releases the database; called once at
    /// shutdown
    pub fn close(self) -> Result<(), StoreError> {
        let Self {
            db,
            counters,
            tokens,
            ..
        } = self;
        db.flush()?;

        drop(counters);
        drop(tokens);
        drop(db);
        Ok(())
    }
}

impl AggregationProvider for AggregationStore {
    fn get_counter(&self, name: &str) -> Result<Option<CounterRecord>, StoreError> {
        AggregationStore::get_counter(self, name)
    }

    fn set_counter(&self, name: &str, value: f64) -> Result<CounterRecord, StoreError> {
        AggregationStore::set_counter(self, name, value)
    }

    fn increment_counter(&self, name: &str, by: f64) -> Result<CounterRecord, StoreError> {
        AggregationStore::increment_counter(self, name, by)
    }

    fn get_series(&self, name: &str) -> Result<Option<Vec<Sample>>, StoreError> {
        AggregationStore::get_series(self, name)
    }

    fn append_sample(&self, name: &str, sample: Sample) -> Result<(), StoreError> {
        AggregationStore::append_sample(self, name, sample)
    }
}
