//! Inter-module data channels.
//!
//! A [`Channel`] is a named broadcast slot through which the output of one
//! module instance becomes the input of others. Each channel is owned by
//! exactly one publishing instance and carries a list of [`ChannelContent`]
//! items whose keys all have the channel's [`KeyKind`].
//!
//! Other instances consume channels through [`ChannelReceiver`]s. A receiver
//! declares the key kinds it understands, and binding it to a channel with any
//! other key kind yields [`BindingState::InvalidKeyKind`]: no data flows and
//! the UI can surface the mismatch.
//!
//! Channel contents are replaced wholesale on each publication and handed out
//! as a shared `Arc<[ChannelContent]>`, so a reader always observes the
//! complete result of a single publication.
//!
//! The [`Broadcaster`] tracks the set of available channels. Its subscribers
//! are notified when a channel appears or disappears, not when contents
//! change.
//!
//! #### Example
//!
//! ```
//! use workbench::channel::{
//!     BindingState, Broadcaster, ChannelContent, ChannelDefinition, ChannelReceiver, Key,
//!     KeyKind, ReceiverDefinition,
//! };
//! use workbench::module::ModuleInstanceId;
//!
//! let broadcaster = Broadcaster::new();
//! let channel = broadcaster
//!     .register_channel(
//!         &ModuleInstanceId::new("Histogram-0"),
//!         &ChannelDefinition::new("per-realization", "Per realization", KeyKind::Realization),
//!     )
//!     .unwrap();
//!
//! let receiver = ChannelReceiver::new(
//!     ModuleInstanceId::new("Scatter-1"),
//!     &ReceiverDefinition::new("x", "X axis", [KeyKind::Realization]),
//! );
//! assert!(matches!(receiver.bind(&channel), BindingState::Bound { .. }));
//!
//! channel
//!     .publish(vec![ChannelContent::new(Key::Realization(0), 1.5)])
//!     .unwrap();
//! assert_eq!(receiver.contents().unwrap().len(), 1);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::module::ModuleInstanceId;
use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};
use crate::session::EnsembleIdent;
use crate::util::lock;

mod broadcaster;
mod receiver;

pub use broadcaster::Broadcaster;
pub use receiver::{BindingState, ChannelReceiver};

/// Contents of a channel, notified after each publication.
pub(crate) const CONTENTS: Topic<Arc<[ChannelContent]>> = Topic::new("channel.contents");
/// Notified once when the channel is closed.
pub(crate) const CLOSED: Topic<()> = Topic::new("channel.closed");

/// Semantic type of the keys of a channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// Realization number.
    Realization,
    /// Calendar date.
    Date,
    /// Point in time.
    Timestamp,
    /// Linear index of a grid cell.
    GridIndex,
    /// `(i, j, k)` index of a grid cell.
    GridIjk,
}

/// A channel key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Key {
    /// Realization number.
    Realization(u32),
    /// Calendar date, as days since the Unix epoch.
    Date(i32),
    /// Point in time, as milliseconds since the Unix epoch.
    Timestamp(i64),
    /// Linear index of a grid cell.
    GridIndex(u64),
    /// `(i, j, k)` index of a grid cell.
    GridIjk([u32; 3]),
}

impl Key {
    /// Returns the kind of the key.
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::Realization(_) => KeyKind::Realization,
            Self::Date(_) => KeyKind::Date,
            Self::Timestamp(_) => KeyKind::Timestamp,
            Self::GridIndex(_) => KeyKind::GridIndex,
            Self::GridIjk(_) => KeyKind::GridIjk,
        }
    }
}

/// Descriptive data attached to a content item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentMetadata {
    /// Label of the series the item belongs to.
    pub display_name: String,
    /// Unit of the value.
    pub unit: Option<String>,
    /// Ensemble the value was computed from.
    pub ensemble_ident: Option<EnsembleIdent>,
}

/// A single `{key, value, metadata}` item of a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelContent {
    /// The key.
    pub key: Key,
    /// The value.
    pub value: f64,
    /// Descriptive data.
    pub metadata: ContentMetadata,
}

impl ChannelContent {
    /// Creates an item with empty metadata.
    pub fn new(key: Key, value: f64) -> Self {
        Self {
            key,
            value,
            metadata: ContentMetadata::default(),
        }
    }

    /// Attaches metadata to the item.
    pub fn with_metadata(mut self, metadata: ContentMetadata) -> Self {
        self.metadata = metadata;

        self
    }
}

/// Declaration of a channel published by a module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelDefinition {
    /// Identifier, unique within the module.
    pub ident: String,
    /// Label shown to the user.
    pub display_name: String,
    /// Kind of the channel keys.
    pub kind_of_key: KeyKind,
}

impl ChannelDefinition {
    /// Declares a channel.
    pub fn new(ident: impl Into<String>, display_name: impl Into<String>, kind_of_key: KeyKind) -> Self {
        Self {
            ident: ident.into(),
            display_name: display_name.into(),
            kind_of_key,
        }
    }
}

/// Declaration of a receiver exposed by a module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiverDefinition {
    /// Identifier, unique within the module.
    pub ident: String,
    /// Label shown to the user.
    pub display_name: String,
    /// Key kinds the receiver accepts.
    pub expected_kinds_of_keys: Vec<KeyKind>,
}

impl ReceiverDefinition {
    /// Declares a receiver.
    pub fn new(
        ident: impl Into<String>,
        display_name: impl Into<String>,
        expected_kinds_of_keys: impl IntoIterator<Item = KeyKind>,
    ) -> Self {
        Self {
            ident: ident.into(),
            display_name: display_name.into(),
            expected_kinds_of_keys: expected_kinds_of_keys.into_iter().collect(),
        }
    }
}

/// Globally unique identifier of a channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId {
    /// The publishing instance.
    pub module_instance_id: ModuleInstanceId,
    /// The channel identifier within the module.
    pub ident: String,
}

impl ChannelId {
    /// Creates a channel identifier.
    pub fn new(module_instance_id: ModuleInstanceId, ident: impl Into<String>) -> Self {
        Self {
            module_instance_id,
            ident: ident.into(),
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module_instance_id, self.ident)
    }
}

/// Error raised by channel operations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// A content item has a key of another kind than the channel.
    #[error("channel `{channel}` expects {expected:?} keys but received a {found:?} key")]
    KeyKindMismatch {
        /// The channel.
        channel: ChannelId,
        /// Kind of the channel keys.
        expected: KeyKind,
        /// Kind of the offending key.
        found: KeyKind,
    },
    /// The channel was unregistered.
    #[error("channel `{0}` is closed")]
    Closed(ChannelId),
    /// A channel with the same identifier is already registered.
    #[error("channel `{0}` is already registered")]
    AlreadyRegistered(ChannelId),
}

/// A typed broadcast slot owned by one module instance.
pub struct Channel {
    id: ChannelId,
    display_name: String,
    kind_of_key: KeyKind,
    contents: Mutex<Arc<[ChannelContent]>>,
    closed: AtomicBool,
    delegate: PublishSubscribeDelegate,
}

impl Channel {
    pub(crate) fn new(module_instance_id: ModuleInstanceId, definition: &ChannelDefinition) -> Self {
        let id = ChannelId::new(module_instance_id, definition.ident.clone());
        let delegate = PublishSubscribeDelegate::new(format!("channel:{id}"));

        Self {
            id,
            display_name: definition.display_name.clone(),
            kind_of_key: definition.kind_of_key,
            contents: Mutex::new(Arc::from(Vec::new())),
            closed: AtomicBool::new(false),
            delegate,
        }
    }

    /// Returns the channel identifier.
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Returns the label shown to the user.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the kind of the channel keys.
    pub fn kind_of_key(&self) -> KeyKind {
        self.kind_of_key
    }

    /// Returns `true` once the channel has been unregistered.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Replaces the channel contents and notifies content subscribers.
    ///
    /// The publication is all-or-nothing: if any key has the wrong kind, the
    /// previous contents are left untouched.
    pub fn publish(&self, contents: Vec<ChannelContent>) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed(self.id.clone()));
        }
        if let Some(item) = contents.iter().find(|c| c.key.kind() != self.kind_of_key) {
            return Err(ChannelError::KeyKindMismatch {
                channel: self.id.clone(),
                expected: self.kind_of_key,
                found: item.key.kind(),
            });
        }

        let contents: Arc<[ChannelContent]> = Arc::from(contents);
        *lock(&self.contents) = contents.clone();
        debug!(channel = %self.id, items = contents.len(), "channel contents published");
        self.delegate.notify_subscribers(&CONTENTS, contents);

        Ok(())
    }

    /// Returns the current contents.
    pub fn contents(&self) -> Arc<[ChannelContent]> {
        lock(&self.contents).clone()
    }

    /// Subscribes to content publications.
    ///
    /// If contents were already published, the callback immediately receives
    /// them.
    pub fn subscribe_to_contents<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<[ChannelContent]>) + Send + Sync + 'static,
    {
        self.delegate.subscribe(&CONTENTS, callback)
    }

    pub(crate) fn subscribe_to_close<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.delegate.subscribe(&CLOSED, callback)
    }

    /// Empties the channel, notifies bound receivers and drops every
    /// subscriber.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *lock(&self.contents) = Arc::from(Vec::new());
        self.delegate.notify_subscribers(&CLOSED, ());
        self.delegate.clear();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("kind_of_key", &self.kind_of_key)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
