//! Progress reporting of long-running operations.
//!
//! The [`ProgressBus`] is owned by the workbench and handed to module
//! instances through their context. Progress is published per task name; a
//! subscriber registering while a task is running immediately receives its
//! latest progress message.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};

/// Progress of a task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// Description of the current step.
    pub message: String,
    /// Completed fraction in `[0, 1]`, if known.
    pub fraction: Option<f64>,
}

impl ProgressMessage {
    /// Creates a message with an unknown completed fraction.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fraction: None,
        }
    }

    /// Sets the completed fraction, clamped to `[0, 1]`.
    pub fn with_fraction(mut self, fraction: f64) -> Self {
        self.fraction = Some(fraction.clamp(0.0, 1.0));

        self
    }
}

fn task_topic(task: &str) -> Topic<Option<ProgressMessage>> {
    Topic::dynamic(format!("progress.{task}"), true)
}

/// Per-task progress channel.
///
/// Cloning a bus yields a handle to the same bus.
#[derive(Clone)]
pub struct ProgressBus {
    delegate: PublishSubscribeDelegate,
}

impl ProgressBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            delegate: PublishSubscribeDelegate::new("progress"),
        }
    }

    /// Publishes the progress of a task.
    pub fn publish(&self, task: &str, message: ProgressMessage) {
        trace!(task, message = %message.message, fraction = ?message.fraction, "progress");
        self.delegate
            .notify_subscribers(&task_topic(task), Some(message));
    }

    /// Returns the latest progress of a task.
    pub fn latest(&self, task: &str) -> Option<ProgressMessage> {
        self.delegate
            .latest_value(&task_topic(task))
            .and_then(|message| message.as_ref().clone())
    }

    /// Subscribes to the progress of a task.
    ///
    /// `None` is delivered when the task is cleared.
    pub fn subscribe<F>(&self, task: &str, callback: F) -> Subscription
    where
        F: Fn(Option<&ProgressMessage>) + Send + Sync + 'static,
    {
        self.delegate
            .subscribe(&task_topic(task), move |message: &Option<ProgressMessage>| {
                callback(message.as_ref())
            })
    }

    /// Marks a task as finished.
    ///
    /// Subscribers are notified and the latest message is forgotten.
    pub fn clear(&self, task: &str) {
        let topic = task_topic(task);
        self.delegate.notify_subscribers(&topic, None);
        self.delegate.forget_value(&topic);
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProgressBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressBus").finish_non_exhaustive()
    }
}
