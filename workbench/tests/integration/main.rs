// Integration tests are gathered in a single binary to keep link times low.

mod data_channels;
mod module_lifecycle;
mod scoped_queries;
mod session_filters;
mod synced_settings;
mod workbench_scenario;

use std::sync::{Arc, Mutex};

/// Installs a `tracing` subscriber printing through the test harness.
///
/// Set `RUST_LOG` to see the events of a test.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Collects the payloads handed to a subscriber.
pub(crate) fn recorder<T: Clone + Send + 'static>() -> (Arc<Mutex<Vec<T>>>, impl Fn(&T) + Send + Sync + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let callback = {
        let seen = seen.clone();
        move |value: &T| seen.lock().unwrap().push(value.clone())
    };

    (seen, callback)
}
