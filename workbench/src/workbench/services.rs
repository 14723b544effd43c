use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::module::{ModuleInstanceId, SyncSettingKey};
use crate::progress::ProgressBus;
use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};
use crate::session::WorkbenchSession;
use crate::time::{Clock, Debouncer};
use crate::util::lock;

/// A setting value published by a module instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncedValue {
    /// The setting.
    pub key: SyncSettingKey,
    /// The publishing instance.
    pub publisher: ModuleInstanceId,
    /// The value.
    pub value: serde_json::Value,
}

fn synced_topic(key: SyncSettingKey) -> Topic<SyncedValue> {
    Topic::dynamic(format!("synced.{key:?}"), true)
}

struct Inner {
    delegate: PublishSubscribeDelegate,
    clock: Arc<dyn Clock>,
    debounce_window: Duration,
    debouncers: Mutex<BTreeMap<SyncSettingKey, Debouncer<SyncedValue>>>,
    session: Mutex<Option<WorkbenchSession>>,
    progress: ProgressBus,
}

/// Workbench-wide services shared by all module instances.
///
/// The services propagate synced settings between instances, expose the
/// active session and own the progress bus. Setting values published within
/// the debounce window of the same key collapse to the last one; pending
/// values are delivered by
/// [`Workbench::process_pending_timers()`](crate::workbench::Workbench::process_pending_timers).
///
/// Cloning the services yields a handle to the same services.
#[derive(Clone)]
pub struct WorkbenchServices {
    inner: Arc<Inner>,
}

impl WorkbenchServices {
    pub(crate) fn new(clock: Arc<dyn Clock>, debounce_window: Duration, progress: ProgressBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                delegate: PublishSubscribeDelegate::new("workbench-services"),
                clock,
                debounce_window,
                debouncers: Mutex::new(BTreeMap::new()),
                session: Mutex::new(None),
                progress,
            }),
        }
    }

    /// Publishes the value of a setting on behalf of an instance.
    ///
    /// With a zero debounce window the value is delivered immediately.
    pub fn publish_synced_value(
        &self,
        key: SyncSettingKey,
        value: serde_json::Value,
        publisher: ModuleInstanceId,
    ) {
        let synced = SyncedValue {
            key,
            publisher,
            value,
        };

        if self.inner.debounce_window.is_zero() {
            self.deliver(synced);
            return;
        }

        let mut debouncers = lock(&self.inner.debouncers);
        debouncers
            .entry(key)
            .or_insert_with(|| Debouncer::new(self.inner.debounce_window, self.inner.clock.clone()))
            .call(synced);
    }

    /// Registers a callback for every delivered value of a setting.
    ///
    /// The callback immediately receives the latest delivered value, if any.
    pub fn subscribe_to_synced_value<F>(&self, key: SyncSettingKey, callback: F) -> Subscription
    where
        F: Fn(&SyncedValue) + Send + Sync + 'static,
    {
        self.inner.delegate.subscribe(&synced_topic(key), callback)
    }

    /// Returns the latest delivered value of a setting.
    pub fn latest_synced_value(&self, key: SyncSettingKey) -> Option<SyncedValue> {
        self.inner
            .delegate
            .latest_value(&synced_topic(key))
            .map(|value| value.as_ref().clone())
    }

    /// Delivers the pending values whose debounce window has elapsed.
    ///
    /// Returns the number of delivered values.
    pub fn process_pending_timers(&self) -> usize {
        let ready: Vec<SyncedValue> = lock(&self.inner.debouncers)
            .values_mut()
            .filter_map(|debouncer| debouncer.poll())
            .collect();

        self.deliver_all(ready)
    }

    /// Delivers every pending value immediately.
    pub fn flush_synced_settings(&self) -> usize {
        let pending: Vec<SyncedValue> = lock(&self.inner.debouncers)
            .values_mut()
            .filter_map(|debouncer| debouncer.flush())
            .collect();

        self.deliver_all(pending)
    }

    /// Discards the pending value of a setting, if any.
    pub fn cancel_pending(&self, key: SyncSettingKey) -> bool {
        lock(&self.inner.debouncers)
            .get_mut(&key)
            .is_some_and(|debouncer| debouncer.cancel())
    }

    /// Returns the earliest deadline of a pending value.
    pub fn next_deadline(&self) -> Option<Instant> {
        lock(&self.inner.debouncers)
            .values()
            .filter_map(|debouncer| debouncer.deadline())
            .min()
    }

    /// Returns the active session, if any.
    pub fn active_session(&self) -> Option<WorkbenchSession> {
        lock(&self.inner.session).clone()
    }

    /// Returns the progress bus.
    pub fn progress_bus(&self) -> &ProgressBus {
        &self.inner.progress
    }

    pub(crate) fn set_active_session(&self, session: Option<WorkbenchSession>) {
        *lock(&self.inner.session) = session;
    }

    fn deliver_all(&self, values: Vec<SyncedValue>) -> usize {
        let count = values.len();
        for value in values {
            self.deliver(value);
        }

        count
    }

    fn deliver(&self, synced: SyncedValue) {
        debug!(key = ?synced.key, publisher = %synced.publisher, "synced setting delivered");
        self.inner
            .delegate
            .notify_subscribers(&synced_topic(synced.key), synced);
    }
}

impl fmt::Debug for WorkbenchServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkbenchServices")
            .field("debounce_window", &self.inner.debounce_window)
            .finish_non_exhaustive()
    }
}
