//! Query de-duplication and supersession on a thread pool.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_channel::oneshot;
use futures_executor::{block_on, ThreadPool};
use workbench::module::ModuleRegistry;
use workbench::query::{
    CancelableQueryRunner, QueryCache, QueryError, QueryKey, QueryOptions, ScopedQueryController,
    DEFAULT_GC_TIME,
};
use workbench::time::SystemClock;
use workbench::workbench::Workbench;

use crate::init_tracing;

/// A query whose first run waits for the returned sender to fire.
fn gated_query(
    key: QueryKey,
    value: u32,
    calls: &Arc<AtomicUsize>,
) -> (QueryOptions<u32>, oneshot::Sender<()>) {
    let (open, gate) = oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(gate)));
    let calls = calls.clone();

    let options = QueryOptions::new(key, move || {
        calls.fetch_add(1, Ordering::SeqCst);
        let gate = gate.lock().unwrap().take();
        async move {
            if let Some(gate) = gate {
                gate.await.map_err(|_| QueryError::Cancelled)?;
            }
            Ok(value)
        }
    });

    (options, open)
}

fn cache() -> QueryCache {
    QueryCache::with_options(
        Arc::new(ThreadPool::new().unwrap()),
        Arc::new(SystemClock::new()),
        Duration::from_secs(300),
        DEFAULT_GC_TIME,
    )
}

#[test]
fn concurrent_observers_share_one_fetch() {
    init_tracing();

    let cache = cache();
    let first = ScopedQueryController::new(cache.clone());
    let second = ScopedQueryController::new(cache.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let key = QueryKey::new(["wells", "drogon"]);
    let (options, open) = gated_query(key.clone(), 17, &calls);

    let a = first.fetch_query(options.clone());
    let b = second.fetch_query(options);
    assert!(cache.is_fetching(&key));
    open.send(()).unwrap();

    assert_eq!(*block_on(a).unwrap(), 17);
    assert_eq!(*block_on(b).unwrap(), 17);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.query_data::<u32>(&key).as_deref(), Some(&17));
}

#[test]
fn latest_fetch_wins() {
    let cache = cache();
    let controller = ScopedQueryController::new(cache.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let (slow, open_slow) = gated_query(QueryKey::new(["surface", "top"]), 1, &calls);
    let (fast, open_fast) = gated_query(QueryKey::new(["surface", "base"]), 2, &calls);

    let superseded = controller.fetch_query(slow);
    let latest = controller.fetch_query(fast);
    open_fast.send(()).unwrap();

    assert!(block_on(superseded).unwrap_err().is_cancelled());
    assert_eq!(*block_on(latest).unwrap(), 2);

    // The abandoned fetch still completes into the cache.
    open_slow.send(()).unwrap();
    let top = QueryKey::new(["surface", "top"]);
    while cache.is_fetching(&top) {
        std::thread::yield_now();
    }
    assert_eq!(cache.query_data::<u32>(&top).as_deref(), Some(&1));
}

#[test]
fn dropping_the_controller_cancels_the_observer() {
    let cache = cache();
    let controller = ScopedQueryController::new(cache);
    let calls = Arc::new(AtomicUsize::new(0));
    let (options, _open) = gated_query(QueryKey::new(["grid"]), 5, &calls);

    let pending = controller.fetch_query(options);
    drop(controller);

    assert!(block_on(pending).unwrap_err().is_cancelled());
}

#[test]
fn runner_only_keeps_the_latest_run() {
    let runner = CancelableQueryRunner::new();
    let (_open, gate) = oneshot::channel::<()>();

    let first = runner.run(|_| async move { gate.await.map_err(|_| QueryError::Cancelled) });
    let second = runner.run(|signal| async move {
        assert!(!signal.is_cancelled());
        Ok(())
    });

    assert!(block_on(first).unwrap_err().is_cancelled());
    block_on(second).unwrap();
}

#[test]
fn workbench_owns_a_cache_when_given_a_spawner() {
    let without = Workbench::new(ModuleRegistry::new());
    assert!(without.query_cache().is_none());

    let with = Workbench::builder(ModuleRegistry::new())
        .set_spawner(Arc::new(ThreadPool::new().unwrap()))
        .build();
    let cache = with.query_cache().unwrap();
    cache.set_query_data(&QueryKey::new(["k"]), String::from("v"));

    assert_eq!(cache.query_data::<String>(&QueryKey::new(["k"])).as_deref().map(String::as_str), Some("v"));
}
