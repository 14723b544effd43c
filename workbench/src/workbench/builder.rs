use std::fmt;
use std::sync::{Arc, Mutex};

use futures_task::Spawn;

use crate::channel::Broadcaster;
use crate::config::WorkbenchConfig;
use crate::gui::GuiMessageBroker;
use crate::module::ModuleRegistry;
use crate::progress::ProgressBus;
use crate::pubsub::PublishSubscribeDelegate;
use crate::query::QueryCache;
use crate::time::{Clock, SystemClock};

use super::{topics, Workbench, WorkbenchServices, WorkbenchState};

/// Builder of a [`Workbench`].
///
/// #### Example
///
/// ```
/// use std::time::Duration;
///
/// use workbench::config::WorkbenchConfig;
/// use workbench::module::ModuleRegistry;
/// use workbench::time::ManualClock;
/// use workbench::workbench::Workbench;
///
/// let clock = ManualClock::new();
/// let workbench = Workbench::builder(ModuleRegistry::new())
///     .with_config(WorkbenchConfig {
///         synced_settings_debounce_ms: 100,
///         ..WorkbenchConfig::default()
///     })
///     .set_clock(clock.clone())
///     .build();
///
/// assert_eq!(workbench.config().synced_settings_debounce(), Duration::from_millis(100));
/// ```
pub struct WorkbenchBuilder {
    registry: ModuleRegistry,
    config: WorkbenchConfig,
    clock: Arc<dyn Clock>,
    spawner: Option<Arc<dyn Spawn + Send + Sync>>,
}

impl WorkbenchBuilder {
    /// Creates a builder for a workbench hosting the registered modules.
    pub fn new(registry: ModuleRegistry) -> Self {
        Self {
            registry,
            config: WorkbenchConfig::default(),
            clock: Arc::new(SystemClock::new()),
            spawner: None,
        }
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: WorkbenchConfig) -> Self {
        self.config = config;

        self
    }

    /// Sets the clock used to time debounced settings and query staleness.
    ///
    /// The system clock is used by default.
    pub fn set_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);

        self
    }

    /// Sets the executor on which queries are spawned.
    ///
    /// The workbench only owns a [`QueryCache`] if a spawner is set.
    pub fn set_spawner(mut self, spawner: Arc<dyn Spawn + Send + Sync>) -> Self {
        self.spawner = Some(spawner);

        self
    }

    /// Builds the workbench.
    pub fn build(self) -> Workbench {
        let services = WorkbenchServices::new(
            self.clock.clone(),
            self.config.synced_settings_debounce(),
            ProgressBus::new(),
        );
        let query_cache = self.spawner.map(|spawner| {
            QueryCache::with_options(
                spawner,
                self.clock.clone(),
                self.config.default_query_stale_time(),
                self.config.query_gc_time(),
            )
        });

        let delegate = PublishSubscribeDelegate::new("workbench");
        delegate.notify_subscribers(&topics::ACTIVE_MODULE_CHANGED, None);
        delegate.notify_subscribers(&topics::MODULE_INSTANCES_CHANGED, Vec::new());
        delegate.notify_subscribers(&topics::LAYOUT, Vec::new());
        delegate.notify_subscribers(&topics::ACTIVE_SESSION_CHANGED, None);

        Workbench {
            registry: self.registry,
            state: Mutex::new(WorkbenchState::default()),
            delegate,
            gui: GuiMessageBroker::new(),
            broadcaster: Broadcaster::new(),
            services,
            query_cache,
            config: self.config,
        }
    }
}

impl fmt::Debug for WorkbenchBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkbenchBuilder")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
