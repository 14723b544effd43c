//! Query orchestration.
//!
//! Queries are asynchronous computations identified by a [`QueryKey`] whose
//! results are shared through a [`QueryCache`]. The cache de-duplicates
//! in-flight fetches of the same key and runs them on an injected
//! [`Spawn`](futures_task::Spawn) implementation, so any executor can drive
//! the queries.
//!
//! On top of the cache, a [`ScopedQueryController`] guarantees that at most
//! one fetch is observed at a time: starting a new fetch abandons the
//! previous one, whose future then resolves to [`QueryError::Cancelled`]. A
//! [`CancelableQueryRunner`] offers the same guarantee for ad-hoc
//! computations that are not cached.
//!
//! #### Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use futures_executor::{block_on, ThreadPool};
//! use workbench::query::{QueryCache, QueryKey, QueryOptions, ScopedQueryController};
//!
//! let pool = ThreadPool::new().unwrap();
//! let cache = QueryCache::new(Arc::new(pool));
//! let controller = ScopedQueryController::new(cache.clone());
//!
//! let options = QueryOptions::new(QueryKey::new(["surfaces", "drogon"]), || async {
//!     Ok(vec!["top", "base"])
//! });
//! let surfaces = block_on(controller.fetch_query(options)).unwrap();
//!
//! assert_eq!(*surfaces, vec!["top", "base"]);
//! ```

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod cache;
mod runner;
mod scoped;

pub use cache::{QueryCache, DEFAULT_GC_TIME};
pub use runner::{CancelableQueryRunner, CancellationSignal, RunFuture};
pub use scoped::{QueryFuture, ScopedQueryController};

/// Hierarchical identifier of a query.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    /// Creates a key from its parts.
    pub fn new<P: Into<String>>(parts: impl IntoIterator<Item = P>) -> Self {
        Self(parts.into_iter().map(Into::into).collect())
    }

    /// Returns the parts of the key.
    pub fn parts(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Error returned by a query.
#[derive(Clone, Debug, Error)]
pub enum QueryError {
    /// The fetch was superseded or explicitly cancelled.
    #[error("query was cancelled")]
    Cancelled,
    /// The query function failed.
    #[error("query failed: {0}")]
    Failed(#[source] Arc<dyn Error + Send + Sync>),
    /// The cached data of the key is of another type than requested.
    #[error("cached data for query `{key}` has an unexpected type")]
    TypeMismatch {
        /// The query key.
        key: QueryKey,
    },
    /// The query could not be handed to the executor.
    #[error("cannot spawn query: {0}")]
    Spawn(String),
}

impl QueryError {
    /// Wraps the error of a query function.
    pub fn failed(error: impl Error + Send + Sync + 'static) -> Self {
        Self::Failed(Arc::new(error))
    }

    /// Returns `true` for [`QueryError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A query function.
pub type QueryFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, QueryError>> + Send + Sync>;

/// A query description.
pub struct QueryOptions<T> {
    key: QueryKey,
    query_fn: QueryFn<T>,
    stale_time: Option<Duration>,
}

impl<T> QueryOptions<T> {
    /// Describes a query.
    ///
    /// The stale time defaults to the stale time of the cache.
    pub fn new<F, Fut>(key: QueryKey, query_fn: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        Self {
            key,
            query_fn: Arc::new(move || query_fn().boxed()),
            stale_time: None,
        }
    }

    /// Sets the time during which a cached result is considered fresh.
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);

        self
    }

    /// Returns the query key.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Returns the stale time, if set.
    pub fn stale_time(&self) -> Option<Duration> {
        self.stale_time
    }

    pub(crate) fn query_fn(&self) -> &QueryFn<T> {
        &self.query_fn
    }
}

impl<T> Clone for QueryOptions<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            query_fn: self.query_fn.clone(),
            stale_time: self.stale_time,
        }
    }
}

impl<T> fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("key", &self.key)
            .field("stale_time", &self.stale_time)
            .finish_non_exhaustive()
    }
}
