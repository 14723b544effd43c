//! Per-instance status messages, loading state and log.
//!
//! A [`StatusController`] collects what the components of a module instance
//! report while rendering: warnings and errors, whether data is loading, and
//! a free-form debug message. Reports are staged and only become visible, in
//! one consistent step, when
//! [`StatusController::review_and_publish_state()`] is called, typically once
//! per render pass. Only the topics whose value actually changed are then
//! notified.
//!
//! Every committed change is also appended to a bounded [`LogEntry`] log.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::module::ModuleInstanceId;
use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};
use crate::util::lock;

/// Committed status messages.
pub const MESSAGES: Topic<Vec<StatusMessage>> = Topic::new("status.messages");
/// Committed loading flag (`true` if any component is loading).
pub const LOADING: Topic<bool> = Topic::new("status.loading");
/// Committed debug messages of the view and settings components.
pub const DEBUG_MESSAGES: Topic<DebugMessages> = Topic::new("status.debug_messages");
/// Log of committed changes, oldest first.
pub const LOG: Topic<Vec<LogEntry>> = Topic::new("status.log");

/// The component that issued a status report.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusSource {
    /// The view component.
    View,
    /// The settings component.
    Settings,
}

impl StatusSource {
    fn index(self) -> usize {
        match self {
            Self::View => 0,
            Self::Settings => 1,
        }
    }
}

/// Severity of a status message.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// A warning.
    Warning,
    /// An error.
    Error,
}

/// A warning or error reported by a component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    /// The reporting component.
    pub source: StatusSource,
    /// The severity.
    pub kind: MessageKind,
    /// The message text.
    pub message: String,
}

/// Debug messages of the view and settings components.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugMessages {
    /// Message of the view component.
    pub view: Option<String>,
    /// Message of the settings component.
    pub settings: Option<String>,
}

/// What a log entry records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntryKind {
    /// A message was reported.
    Message(MessageKind),
    /// A component started loading.
    LoadingStarted,
    /// A component finished loading.
    LoadingFinished,
}

/// A timestamped record of a committed status change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Sequence number, unique within a controller.
    pub id: u64,
    /// Wall-clock time of the commit.
    pub timestamp: SystemTime,
    /// The component concerned.
    pub source: StatusSource,
    /// What happened.
    pub kind: LogEntryKind,
    /// The message text, for message entries.
    pub message: Option<String>,
}

#[derive(Clone, Default, PartialEq)]
struct StatusSnapshot {
    messages: Vec<StatusMessage>,
    loading: [bool; 2],
    debug_messages: [Option<String>; 2],
}

impl StatusSnapshot {
    fn is_loading(&self) -> bool {
        self.loading.iter().any(|l| *l)
    }

    fn debug_messages(&self) -> DebugMessages {
        DebugMessages {
            view: self.debug_messages[StatusSource::View.index()].clone(),
            settings: self.debug_messages[StatusSource::Settings.index()].clone(),
        }
    }
}

struct StatusState {
    staged: StatusSnapshot,
    published: StatusSnapshot,
    log: VecDeque<LogEntry>,
    next_log_id: u64,
}

impl StatusState {
    fn append_log(&mut self, capacity: usize, source: StatusSource, kind: LogEntryKind, message: Option<String>) {
        if capacity == 0 {
            return;
        }
        while self.log.len() >= capacity {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            id: self.next_log_id,
            timestamp: SystemTime::now(),
            source,
            kind,
            message,
        });
        self.next_log_id += 1;
    }
}

/// Status store of a single module instance.
///
/// Cloning a controller yields a handle to the same store.
#[derive(Clone)]
pub struct StatusController {
    instance_id: ModuleInstanceId,
    log_capacity: usize,
    state: Arc<Mutex<StatusState>>,
    delegate: PublishSubscribeDelegate,
}

impl StatusController {
    /// Creates a controller keeping at most `log_capacity` log entries.
    pub fn new(instance_id: ModuleInstanceId, log_capacity: usize) -> Self {
        let delegate = PublishSubscribeDelegate::new(format!("status:{instance_id}"));
        delegate.notify_subscribers(&MESSAGES, Vec::new());
        delegate.notify_subscribers(&LOADING, false);
        delegate.notify_subscribers(&DEBUG_MESSAGES, DebugMessages::default());
        delegate.notify_subscribers(&LOG, Vec::new());

        Self {
            instance_id,
            log_capacity,
            state: Arc::new(Mutex::new(StatusState {
                staged: StatusSnapshot::default(),
                published: StatusSnapshot::default(),
                log: VecDeque::new(),
                next_log_id: 0,
            })),
            delegate,
        }
    }

    /// Returns the identifier of the owning instance.
    pub fn instance_id(&self) -> &ModuleInstanceId {
        &self.instance_id
    }

    /// Stages a message.
    pub fn add_message(&self, source: StatusSource, kind: MessageKind, message: impl Into<String>) {
        lock(&self.state).staged.messages.push(StatusMessage {
            source,
            kind,
            message: message.into(),
        });
    }

    /// Stages the removal of all messages from the specified source.
    pub fn clear_messages(&self, source: StatusSource) {
        lock(&self.state)
            .staged
            .messages
            .retain(|m| m.source != source);
    }

    /// Stages the loading flag of the specified source.
    pub fn set_loading(&self, source: StatusSource, is_loading: bool) {
        lock(&self.state).staged.loading[source.index()] = is_loading;
    }

    /// Stages the debug message of the specified source.
    pub fn set_debug_message(&self, source: StatusSource, message: Option<String>) {
        lock(&self.state).staged.debug_messages[source.index()] = message;
    }

    /// Commits staged changes and notifies the topics whose value changed.
    pub fn review_and_publish_state(&self) {
        let (messages, loading, debug_messages, log) = {
            let mut state = lock(&self.state);
            if state.staged == state.published {
                return;
            }

            let staged = state.staged.clone();
            let previous = std::mem::replace(&mut state.published, staged.clone());
            let mut log_changed = false;

            for message in staged.messages.iter().filter(|m| !previous.messages.contains(m)) {
                state.append_log(
                    self.log_capacity,
                    message.source,
                    LogEntryKind::Message(message.kind),
                    Some(message.message.clone()),
                );
                log_changed = true;
            }
            for source in [StatusSource::View, StatusSource::Settings] {
                let (was, is) = (previous.loading[source.index()], staged.loading[source.index()]);
                if was != is {
                    let kind = if is {
                        LogEntryKind::LoadingStarted
                    } else {
                        LogEntryKind::LoadingFinished
                    };
                    state.append_log(self.log_capacity, source, kind, None);
                    log_changed = true;
                }
            }

            (
                (staged.messages != previous.messages).then(|| staged.messages.clone()),
                (staged.is_loading() != previous.is_loading()).then(|| staged.is_loading()),
                (staged.debug_messages != previous.debug_messages).then(|| staged.debug_messages()),
                (log_changed && self.log_capacity > 0).then(|| state.log.iter().cloned().collect::<Vec<_>>()),
            )
        };

        debug!(instance = %self.instance_id, "publishing status");

        if let Some(messages) = messages {
            self.delegate.notify_subscribers(&MESSAGES, messages);
        }
        if let Some(loading) = loading {
            self.delegate.notify_subscribers(&LOADING, loading);
        }
        if let Some(debug_messages) = debug_messages {
            self.delegate.notify_subscribers(&DEBUG_MESSAGES, debug_messages);
        }
        if let Some(log) = log {
            self.delegate.notify_subscribers(&LOG, log);
        }
    }

    /// Returns the committed messages.
    pub fn messages(&self) -> Vec<StatusMessage> {
        lock(&self.state).published.messages.clone()
    }

    /// Returns the committed loading flag.
    pub fn is_loading(&self) -> bool {
        lock(&self.state).published.is_loading()
    }

    /// Returns the committed debug messages.
    pub fn debug_messages(&self) -> DebugMessages {
        lock(&self.state).published.debug_messages()
    }

    /// Returns the log, oldest entry first.
    pub fn log(&self) -> Vec<LogEntry> {
        lock(&self.state).log.iter().cloned().collect()
    }

    /// Subscribes to one of the status topics of this module.
    pub fn subscribe<T, F>(&self, topic: &Topic<T>, callback: F) -> Subscription
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.delegate.subscribe(topic, callback)
    }

    /// Unregisters every status subscriber.
    pub(crate) fn close(&self) {
        self.delegate.clear();
    }
}

impl fmt::Debug for StatusController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusController")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}
