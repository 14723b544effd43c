use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures_channel::oneshot;
use futures_util::future::{self, Either, Map, Ready};
use futures_util::FutureExt;
use pin_project_lite::pin_project;
use tracing::debug;

use crate::pubsub::Subscription;
use crate::util::lock;

use super::cache::{Lookup, Outcome, QueryCache};
use super::{QueryError, QueryKey, QueryOptions};

type QueryResult<T> = Result<Arc<T>, QueryError>;
type ResultSender<T> = Arc<Mutex<Option<oneshot::Sender<QueryResult<T>>>>>;

/// The observer of the fetch currently awaited.
struct ActiveFetch {
    id: u64,
    key: QueryKey,
    subscription: Subscription,
    abandon: Box<dyn FnOnce() + Send>,
}

pin_project! {
    /// Future returned by [`ScopedQueryController::fetch_query()`].
    ///
    /// Resolves to [`QueryError::Cancelled`] if the fetch is abandoned before
    /// it completes.
    pub struct QueryFuture<T> {
        #[pin]
        inner: Either<
            Ready<QueryResult<T>>,
            Map<oneshot::Receiver<QueryResult<T>>, fn(Result<QueryResult<T>, oneshot::Canceled>) -> QueryResult<T>>,
        >,
    }
}

impl<T> QueryFuture<T> {
    fn ready(result: QueryResult<T>) -> Self {
        Self {
            inner: Either::Left(future::ready(result)),
        }
    }

    fn pending(receiver: oneshot::Receiver<QueryResult<T>>) -> Self {
        let flatten: fn(Result<QueryResult<T>, oneshot::Canceled>) -> QueryResult<T> =
            |result| result.unwrap_or(Err(QueryError::Cancelled));

        Self {
            inner: Either::Right(receiver.map(flatten)),
        }
    }
}

impl<T> Future for QueryFuture<T> {
    type Output = QueryResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().inner.poll(cx)
    }
}

impl<T> fmt::Debug for QueryFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryFuture").finish_non_exhaustive()
    }
}

/// Query observer that awaits at most one fetch at a time.
///
/// Each call to [`fetch_query()`](Self::fetch_query) first abandons the fetch
/// awaited by the previous call, whose future then resolves to
/// [`QueryError::Cancelled`]. The abandoned fetch itself keeps running and
/// still populates the cache.
pub struct ScopedQueryController {
    cache: QueryCache,
    active: Arc<Mutex<Option<ActiveFetch>>>,
    next_id: AtomicU64,
}

impl ScopedQueryController {
    /// Creates a controller observing queries of the specified cache.
    pub fn new(cache: QueryCache) -> Self {
        Self {
            cache,
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Returns the underlying cache.
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Fetches a query, abandoning the fetch awaited so far.
    ///
    /// Fresh cached data resolves immediately. Stale cached data also
    /// resolves immediately but triggers a background refetch. Otherwise the
    /// future resolves once the fetch of the key completes, either started by
    /// this call or already in flight.
    pub fn fetch_query<T>(&self, options: QueryOptions<T>) -> QueryFuture<T>
    where
        T: Send + Sync + 'static,
    {
        self.cleanup();

        let key = options.key().clone();
        match self.cache.lookup(&key, options.stale_time()) {
            Lookup::Fresh(data) => QueryFuture::ready(downcast(&key, data)),
            Lookup::Stale(data) => {
                debug!(key = %key, "serving stale data while refetching");
                self.cache.ensure_fetch(&options);
                QueryFuture::ready(downcast(&key, data))
            }
            Lookup::Error(e) => QueryFuture::ready(Err(e)),
            Lookup::Missing => {
                let (sender, receiver) = oneshot::channel();
                let sender: ResultSender<T> = Arc::new(Mutex::new(Some(sender)));
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);

                let subscription = self.cache.subscribe_to_outcome(&key, {
                    let sender = sender.clone();
                    let active = Arc::downgrade(&self.active);
                    let key = key.clone();
                    move |outcome: &Outcome| {
                        if let Some(sender) = lock(&sender).take() {
                            let _ = sender.send(outcome.clone().and_then(|data| downcast(&key, data)));
                        }
                        release(&active, id);
                    }
                });

                *lock(&self.active) = Some(ActiveFetch {
                    id,
                    key: key.clone(),
                    subscription,
                    abandon: Box::new(move || {
                        // Dropping the sender resolves the future as cancelled.
                        drop(lock(&sender).take());
                    }),
                });
                self.cache.ensure_fetch(&options);

                QueryFuture::pending(receiver)
            }
        }
    }

    /// Returns the key of the fetch currently awaited, if any.
    pub fn active_key(&self) -> Option<QueryKey> {
        lock(&self.active).as_ref().map(|active| active.key.clone())
    }

    /// Abandons the fetch currently awaited, if any.
    ///
    /// Calling this method more than once is a no-op.
    pub fn cleanup(&self) {
        let active = lock(&self.active).take();
        if let Some(active) = active {
            debug!(key = %active.key, "abandoning query");
            let ActiveFetch {
                mut subscription,
                abandon,
                ..
            } = active;
            subscription.unsubscribe();
            abandon();
        }
    }
}

impl Drop for ScopedQueryController {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl fmt::Debug for ScopedQueryController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedQueryController")
            .field("active_key", &self.active_key())
            .finish_non_exhaustive()
    }
}

/// Clears the active slot if it still holds the fetch `id`.
fn release(active: &Weak<Mutex<Option<ActiveFetch>>>, id: u64) {
    let Some(active) = active.upgrade() else {
        return;
    };
    let released = {
        let mut active = lock(&active);
        match active.as_ref() {
            Some(fetch) if fetch.id == id => active.take(),
            _ => None,
        }
    };
    drop(released);
}

fn downcast<T>(key: &QueryKey, data: super::cache::ErasedData) -> QueryResult<T>
where
    T: Send + Sync + 'static,
{
    data.downcast::<T>()
        .map_err(|_| QueryError::TypeMismatch { key: key.clone() })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures_executor::block_on;

    use super::*;
    use crate::query::test_util::QueueSpawner;
    use crate::time::ManualClock;

    fn setup() -> (Arc<QueueSpawner>, ManualClock, ScopedQueryController) {
        let spawner = Arc::new(QueueSpawner::default());
        let clock = ManualClock::new();
        let cache = QueryCache::with_options(
            spawner.clone(),
            Arc::new(clock.clone()),
            Duration::from_secs(60),
            crate::query::DEFAULT_GC_TIME,
        );

        (spawner, clock, ScopedQueryController::new(cache))
    }

    fn query(name: &'static str, calls: &Arc<AtomicUsize>) -> QueryOptions<String> {
        let calls = calls.clone();
        QueryOptions::new(QueryKey::new(["q", name]), move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(name.to_uppercase()) }
        })
    }

    #[test]
    fn new_fetch_cancels_previous_one() {
        let (spawner, _, controller) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = controller.fetch_query(query("a", &calls));
        let second = controller.fetch_query(query("b", &calls));
        assert_eq!(controller.active_key(), Some(QueryKey::new(["q", "b"])));

        spawner.run_all();

        assert!(block_on(first).unwrap_err().is_cancelled());
        assert_eq!(*block_on(second).unwrap(), "B");
        assert!(controller.active_key().is_none());
        // The abandoned fetch still populated the cache.
        assert_eq!(
            controller
                .cache()
                .query_data::<String>(&QueryKey::new(["q", "a"]))
                .as_deref()
                .map(String::as_str),
            Some("A")
        );
    }

    #[test]
    fn fresh_data_resolves_without_fetching() {
        let (spawner, _, controller) = setup();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = controller.fetch_query(query("a", &calls));
        spawner.run_all();
        block_on(first).unwrap();

        let again = block_on(controller.fetch_query(query("a", &calls))).unwrap();
        assert_eq!(*again, "A");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(spawner.pending(), 0);
    }

    #[test]
    fn stale_data_resolves_and_refetches() {
        let (spawner, clock, controller) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        controller
            .cache()
            .set_query_data(&QueryKey::new(["q", "a"]), String::from("old"));
        clock.advance(Duration::from_secs(61));

        let value = block_on(controller.fetch_query(query("a", &calls))).unwrap();
        assert_eq!(*value, "old");
        assert_eq!(spawner.pending(), 1);

        spawner.run_all();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn error_releases_the_observer() {
        let (spawner, _, controller) = setup();
        let options: QueryOptions<String> = QueryOptions::new(QueryKey::new(["broken"]), || async {
            Err(QueryError::failed(std::io::Error::other("backend unavailable")))
        });

        let future = controller.fetch_query(options);
        spawner.run_all();

        assert!(matches!(block_on(future), Err(QueryError::Failed(_))));
        assert!(controller.active_key().is_none());
        controller.cleanup();
        controller.cleanup();
    }

    #[test]
    fn type_mismatch_is_reported() {
        let (_, _, controller) = setup();
        let key = QueryKey::new(["q", "a"]);
        controller.cache().set_query_data(&key, 42u32);

        let calls = Arc::new(AtomicUsize::new(0));
        let result = block_on(controller.fetch_query(query("a", &calls)));

        assert!(matches!(result, Err(QueryError::TypeMismatch { .. })));
    }
}
