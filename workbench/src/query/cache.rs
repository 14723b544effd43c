use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_task::Spawn;
use futures_util::task::SpawnExt;
use tracing::{debug, warn};

use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};
use crate::time::{Clock, SystemClock};
use crate::util::lock;

use super::{QueryError, QueryKey, QueryOptions};

pub(crate) type ErasedData = Arc<dyn Any + Send + Sync>;
pub(crate) type Outcome = Result<ErasedData, QueryError>;

fn outcome_topic(key: &QueryKey) -> Topic<Outcome> {
    Topic::dynamic(format!("query:{key}"), false)
}

/// Result of a cache lookup.
pub(crate) enum Lookup {
    /// Successful data within its stale time.
    Fresh(ErasedData),
    /// Successful data past its stale time or invalidated.
    Stale(ErasedData),
    /// An error within its stale time.
    Error(QueryError),
    /// Nothing usable is cached.
    Missing,
}

/// Time after which unused entries are evicted by default.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(300);

struct Entry {
    result: Option<Outcome>,
    updated_at: Option<Instant>,
    last_used: Instant,
    fetching: bool,
}

impl Entry {
    fn new(now: Instant) -> Self {
        Self {
            result: None,
            updated_at: None,
            last_used: now,
            fetching: false,
        }
    }
}

struct Inner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    delegate: PublishSubscribeDelegate,
    spawner: Arc<dyn Spawn + Send + Sync>,
    clock: Arc<dyn Clock>,
    default_stale_time: Duration,
    gc_time: Duration,
}

/// Keyed store of query results.
///
/// Fetches of the same key are de-duplicated: while a fetch is in flight,
/// further requests for the key wait for its result instead of starting a new
/// one. Results are handed to the observers of the key once the entry is
/// updated.
///
/// Entries that are neither fetched nor observed, and were not read or
/// written during the gc time, are evicted whenever a result is stored or
/// [`collect_garbage()`](Self::collect_garbage) is called.
///
/// Cloning a cache yields a handle to the same cache.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    /// Creates a cache spawning queries on the specified executor.
    ///
    /// Results are stale as soon as they are stored unless a query sets its
    /// own stale time. Unused entries are evicted after [`DEFAULT_GC_TIME`].
    pub fn new(spawner: Arc<dyn Spawn + Send + Sync>) -> Self {
        Self::with_options(
            spawner,
            Arc::new(SystemClock::new()),
            Duration::ZERO,
            DEFAULT_GC_TIME,
        )
    }

    /// Creates a cache with a custom clock, default stale time and gc time.
    pub fn with_options(
        spawner: Arc<dyn Spawn + Send + Sync>,
        clock: Arc<dyn Clock>,
        default_stale_time: Duration,
        gc_time: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                delegate: PublishSubscribeDelegate::new("query-cache"),
                spawner,
                clock,
                default_stale_time,
                gc_time,
            }),
        }
    }

    /// Returns the cached data of a key, fresh or not.
    pub fn query_data<T>(&self, key: &QueryKey) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let now = self.inner.clock.now();
        let mut entries = lock(&self.inner.entries);
        let entry = entries.get_mut(key)?;
        entry.last_used = now;
        let data = match entry.result.as_ref()? {
            Ok(data) => data.clone(),
            Err(_) => return None,
        };
        drop(entries);

        data.downcast::<T>().ok()
    }

    /// Stores data for a key as if it had just been fetched.
    pub fn set_query_data<T>(&self, key: &QueryKey, data: T)
    where
        T: Send + Sync + 'static,
    {
        let data: ErasedData = Arc::new(data);
        self.store(key, Ok(data));
    }

    /// Marks the cached result of a key as stale.
    pub fn invalidate(&self, key: &QueryKey) {
        if let Some(entry) = lock(&self.inner.entries).get_mut(key) {
            entry.updated_at = None;
        }
        debug!(key = %key, "query invalidated");
    }

    /// Removes the cached result of a key.
    pub fn remove(&self, key: &QueryKey) {
        let mut entries = lock(&self.inner.entries);
        if let Some(entry) = entries.get_mut(key) {
            entry.result = None;
            entry.updated_at = None;
            if !entry.fetching {
                entries.remove(key);
            }
        }
    }

    /// Returns `true` while a fetch of the key is in flight.
    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        lock(&self.inner.entries)
            .get(key)
            .is_some_and(|entry| entry.fetching)
    }

    pub(crate) fn lookup(&self, key: &QueryKey, stale_time: Option<Duration>) -> Lookup {
        let stale_time = stale_time.unwrap_or(self.inner.default_stale_time);
        let now = self.inner.clock.now();

        let mut entries = lock(&self.inner.entries);
        let Some(entry) = entries.get_mut(key) else {
            return Lookup::Missing;
        };
        entry.last_used = now;
        let is_fresh = entry
            .updated_at
            .is_some_and(|updated_at| now.saturating_duration_since(updated_at) < stale_time);

        match (&entry.result, is_fresh) {
            (Some(Ok(data)), true) => Lookup::Fresh(data.clone()),
            (Some(Ok(data)), false) => Lookup::Stale(data.clone()),
            (Some(Err(e)), true) => Lookup::Error(e.clone()),
            _ => Lookup::Missing,
        }
    }

    pub(crate) fn subscribe_to_outcome<F>(&self, key: &QueryKey, callback: F) -> Subscription
    where
        F: Fn(&Outcome) + Send + Sync + 'static,
    {
        self.inner.delegate.subscribe(&outcome_topic(key), callback)
    }

    /// Starts fetching a key unless a fetch is already in flight.
    pub(crate) fn ensure_fetch<T>(&self, options: &QueryOptions<T>)
    where
        T: Send + Sync + 'static,
    {
        let key = options.key().clone();
        let now = self.inner.clock.now();
        {
            let mut entries = lock(&self.inner.entries);
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(now));
            if entry.fetching {
                debug!(key = %key, "joining in-flight query");
                return;
            }
            entry.fetching = true;
        }
        debug!(key = %key, "fetching query");

        let future = (options.query_fn())();
        let cache = self.clone();
        let task_key = key.clone();
        let task = async move {
            let outcome = future.await.map(|data| Arc::new(data) as ErasedData);
            cache.store(&task_key, outcome);
        };

        if let Err(e) = self.inner.spawner.spawn(task) {
            warn!(key = %key, error = %e, "query could not be spawned");
            self.store(&key, Err(QueryError::Spawn(e.to_string())));
        }
    }

    /// Evicts the entries unused for longer than the gc time.
    ///
    /// Entries being fetched or with observers waiting for their outcome are
    /// kept. Returns the number of evicted entries.
    pub fn collect_garbage(&self) -> usize {
        let now = self.inner.clock.now();
        let mut entries = lock(&self.inner.entries);
        let before = entries.len();
        entries.retain(|key, entry| {
            entry.fetching
                || now.saturating_duration_since(entry.last_used) < self.inner.gc_time
                || self.inner.delegate.subscriber_count(&outcome_topic(key)) > 0
        });
        let evicted = before - entries.len();
        drop(entries);

        if evicted > 0 {
            debug!(count = evicted, "unused queries evicted");
        }

        evicted
    }

    fn store(&self, key: &QueryKey, outcome: Outcome) {
        let now = self.inner.clock.now();
        {
            let mut entries = lock(&self.inner.entries);
            let entry = entries.entry(key.clone()).or_insert_with(|| Entry::new(now));
            entry.result = Some(outcome.clone());
            entry.updated_at = Some(now);
            entry.last_used = now;
            entry.fetching = false;
        }
        self.collect_garbage();
        if let Err(e) = &outcome {
            debug!(key = %key, error = %e, "query failed");
        }
        self.inner
            .delegate
            .notify_subscribers(&outcome_topic(key), outcome);
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("entries", &lock(&self.inner.entries).len())
            .field("default_stale_time", &self.inner.default_stale_time)
            .field("gc_time", &self.inner.gc_time)
            .finish_non_exhaustive()
    }
}
