use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::module::ModuleInstanceId;
use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};
use crate::util::lock;

use super::{Channel, ChannelContent, ChannelId, KeyKind, ReceiverDefinition};

const BINDING: Topic<BindingState> = Topic::new("receiver.binding");
const CONTENTS: Topic<Option<Arc<[ChannelContent]>>> = Topic::new("receiver.contents");

/// Binding state of a [`ChannelReceiver`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BindingState {
    /// The receiver is not bound to any channel.
    #[default]
    Unbound,
    /// The receiver is bound and forwards the channel contents.
    Bound {
        /// The bound channel.
        channel: ChannelId,
    },
    /// The channel keys are not of a kind the receiver accepts: no data
    /// flows.
    InvalidKeyKind {
        /// The rejected channel.
        channel: ChannelId,
        /// Kind of the channel keys.
        kind_of_key: KeyKind,
    },
}

impl BindingState {
    /// Returns the channel the receiver was last bound to, if any.
    pub fn channel(&self) -> Option<&ChannelId> {
        match self {
            Self::Unbound => None,
            Self::Bound { channel } | Self::InvalidKeyKind { channel, .. } => Some(channel),
        }
    }
}

struct ReceiverState {
    binding: BindingState,
    channel: Option<Arc<Channel>>,
    channel_subscriptions: Vec<Subscription>,
}

struct Inner {
    module_instance_id: ModuleInstanceId,
    ident: String,
    display_name: String,
    expected_kinds_of_keys: Vec<KeyKind>,
    state: Mutex<ReceiverState>,
    delegate: PublishSubscribeDelegate,
}

impl Inner {
    /// Moves to `binding`, returning the subscriptions to the previous
    /// channel so that the caller can drop them outside the lock.
    fn transition(
        &self,
        binding: BindingState,
        channel: Option<Arc<Channel>>,
    ) -> (Vec<Subscription>, bool) {
        let mut state = lock(&self.state);
        let changed = state.binding != binding;
        state.binding = binding;
        state.channel = channel;

        (std::mem::take(&mut state.channel_subscriptions), changed)
    }

    fn publish_binding(&self, binding: BindingState, contents: Option<Arc<[ChannelContent]>>) {
        self.delegate.notify_subscribers(&BINDING, binding);
        self.delegate.notify_subscribers(&CONTENTS, contents);
    }

    /// Forwards contents of the channel `id`, skipping the replay of contents
    /// already forwarded on binding.
    fn forward_contents(&self, id: &ChannelId, contents: &Arc<[ChannelContent]>) {
        if !self.is_bound_to(id) {
            return;
        }
        let already_forwarded = match self.delegate.latest_value(&CONTENTS).as_deref() {
            Some(Some(latest)) => Arc::ptr_eq(latest, contents),
            _ => false,
        };
        if !already_forwarded {
            self.delegate
                .notify_subscribers(&CONTENTS, Some(contents.clone()));
        }
    }

    fn is_bound_to(&self, id: &ChannelId) -> bool {
        matches!(&lock(&self.state).binding, BindingState::Bound { channel } if channel == id)
    }

    fn on_channel_closed(&self, id: &ChannelId) {
        if !self.is_bound_to(id) {
            return;
        }
        let (subscriptions, _) = self.transition(BindingState::Unbound, None);
        drop(subscriptions);
        debug!(
            instance = %self.module_instance_id,
            receiver = %self.ident,
            channel = %id,
            "bound channel was removed"
        );
        self.publish_binding(BindingState::Unbound, None);
    }
}

/// The consuming end of a data channel.
///
/// Cloning a receiver yields a handle to the same receiver.
#[derive(Clone)]
pub struct ChannelReceiver {
    inner: Arc<Inner>,
}

impl ChannelReceiver {
    /// Creates an unbound receiver owned by the specified instance.
    pub fn new(module_instance_id: ModuleInstanceId, definition: &ReceiverDefinition) -> Self {
        let delegate =
            PublishSubscribeDelegate::new(format!("receiver:{module_instance_id}/{}", definition.ident));
        delegate.notify_subscribers(&BINDING, BindingState::Unbound);
        delegate.notify_subscribers(&CONTENTS, None);

        Self {
            inner: Arc::new(Inner {
                module_instance_id,
                ident: definition.ident.clone(),
                display_name: definition.display_name.clone(),
                expected_kinds_of_keys: definition.expected_kinds_of_keys.clone(),
                state: Mutex::new(ReceiverState {
                    binding: BindingState::Unbound,
                    channel: None,
                    channel_subscriptions: Vec::new(),
                }),
                delegate,
            }),
        }
    }

    /// Returns the owning instance.
    pub fn module_instance_id(&self) -> &ModuleInstanceId {
        &self.inner.module_instance_id
    }

    /// Returns the receiver identifier within its module.
    pub fn ident(&self) -> &str {
        &self.inner.ident
    }

    /// Returns the label shown to the user.
    pub fn display_name(&self) -> &str {
        &self.inner.display_name
    }

    /// Returns the key kinds the receiver accepts.
    pub fn expected_kinds_of_keys(&self) -> &[KeyKind] {
        &self.inner.expected_kinds_of_keys
    }

    /// Returns `true` if a channel with the specified key kind can be bound.
    pub fn accepts(&self, kind_of_key: KeyKind) -> bool {
        self.inner.expected_kinds_of_keys.contains(&kind_of_key)
    }

    /// Binds the receiver to a channel, replacing any previous binding.
    ///
    /// If the channel keys are of an unexpected kind, the receiver moves to
    /// [`BindingState::InvalidKeyKind`] and receives no contents.
    pub fn bind(&self, channel: &Arc<Channel>) -> BindingState {
        let id = channel.id().clone();

        if channel.is_closed() {
            warn!(
                instance = %self.inner.module_instance_id,
                receiver = %self.inner.ident,
                channel = %id,
                "cannot bind to a closed channel"
            );
            self.unbind();
            return BindingState::Unbound;
        }

        if !self.accepts(channel.kind_of_key()) {
            let binding = BindingState::InvalidKeyKind {
                channel: id,
                kind_of_key: channel.kind_of_key(),
            };
            let (subscriptions, _) = self.inner.transition(binding.clone(), None);
            drop(subscriptions);
            warn!(
                instance = %self.inner.module_instance_id,
                receiver = %self.inner.ident,
                channel = %channel.id(),
                kind_of_key = ?channel.kind_of_key(),
                expected = ?self.inner.expected_kinds_of_keys,
                "channel key kind is not accepted by the receiver"
            );
            self.inner.publish_binding(binding.clone(), None);

            return binding;
        }

        let binding = BindingState::Bound { channel: id.clone() };
        let (subscriptions, _) = self.inner.transition(binding.clone(), Some(channel.clone()));
        drop(subscriptions);
        debug!(
            instance = %self.inner.module_instance_id,
            receiver = %self.inner.ident,
            channel = %id,
            "receiver bound"
        );
        self.inner
            .publish_binding(binding.clone(), Some(channel.contents()));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let contents_subscription = channel.subscribe_to_contents({
            let weak = weak.clone();
            let id = id.clone();
            move |contents| {
                if let Some(inner) = weak.upgrade() {
                    inner.forward_contents(&id, contents);
                }
            }
        });
        let close_subscription = channel.subscribe_to_close({
            let id = id.clone();
            move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_channel_closed(&id);
                }
            }
        });

        let mut state = lock(&self.inner.state);
        if state.binding == binding {
            state.channel_subscriptions = vec![contents_subscription, close_subscription];
        }
        // Otherwise the binding was superseded meanwhile and the
        // subscriptions are dropped here.

        binding
    }

    /// Unbinds the receiver.
    pub fn unbind(&self) {
        let (subscriptions, changed) = self.inner.transition(BindingState::Unbound, None);
        drop(subscriptions);
        if changed {
            debug!(
                instance = %self.inner.module_instance_id,
                receiver = %self.inner.ident,
                "receiver unbound"
            );
            self.inner.publish_binding(BindingState::Unbound, None);
        }
    }

    /// Returns the current binding state.
    pub fn binding(&self) -> BindingState {
        lock(&self.inner.state).binding.clone()
    }

    /// Returns the whole current contents of the bound channel, or `None` if
    /// the receiver is not bound.
    pub fn contents(&self) -> Option<Arc<[ChannelContent]>> {
        lock(&self.inner.state)
            .channel
            .as_ref()
            .map(|channel| channel.contents())
    }

    /// Subscribes to binding changes.
    pub fn subscribe_to_binding<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&BindingState) + Send + Sync + 'static,
    {
        self.inner.delegate.subscribe(&BINDING, callback)
    }

    /// Subscribes to the contents forwarded from the bound channel.
    ///
    /// `None` is delivered whenever the receiver loses its binding.
    pub fn subscribe_to_contents<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Option<Arc<[ChannelContent]>>) + Send + Sync + 'static,
    {
        self.inner.delegate.subscribe(&CONTENTS, callback)
    }

    /// Unbinds the receiver and drops every subscriber.
    pub(crate) fn close(&self) {
        let (subscriptions, _) = self.inner.transition(BindingState::Unbound, None);
        drop(subscriptions);
        self.inner.delegate.clear();
    }
}

impl fmt::Debug for ChannelReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelReceiver")
            .field("module_instance_id", &self.inner.module_instance_id)
            .field("ident", &self.inner.ident)
            .field("binding", &self.binding())
            .finish_non_exhaustive()
    }
}
