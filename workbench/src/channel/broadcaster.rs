use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::module::ModuleInstanceId;
use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};
use crate::util::lock;

use super::{Channel, ChannelDefinition, ChannelError, ChannelId};

/// Identifiers of the available channels, notified when a channel is
/// registered or unregistered.
const CHANNELS: Topic<Vec<ChannelId>> = Topic::new("broadcaster.channels");

/// Registry of the channels published by all module instances.
///
/// Cloning a broadcaster yields a handle to the same registry.
#[derive(Clone)]
pub struct Broadcaster {
    channels: Arc<Mutex<BTreeMap<ChannelId, Arc<Channel>>>>,
    delegate: PublishSubscribeDelegate,
}

impl Broadcaster {
    /// Creates an empty broadcaster.
    pub fn new() -> Self {
        let delegate = PublishSubscribeDelegate::new("broadcaster");
        delegate.notify_subscribers(&CHANNELS, Vec::new());

        Self {
            channels: Arc::new(Mutex::new(BTreeMap::new())),
            delegate,
        }
    }

    /// Creates and registers a channel published by the specified instance.
    pub fn register_channel(
        &self,
        module_instance_id: &ModuleInstanceId,
        definition: &ChannelDefinition,
    ) -> Result<Arc<Channel>, ChannelError> {
        let channel = Arc::new(Channel::new(module_instance_id.clone(), definition));

        let ids = {
            let mut channels = lock(&self.channels);
            if channels.contains_key(channel.id()) {
                return Err(ChannelError::AlreadyRegistered(channel.id().clone()));
            }
            channels.insert(channel.id().clone(), channel.clone());

            channels.keys().cloned().collect()
        };
        debug!(channel = %channel.id(), "channel registered");
        self.delegate.notify_subscribers(&CHANNELS, ids);

        Ok(channel)
    }

    /// Unregisters and closes a channel.
    ///
    /// Receivers bound to the channel become unbound. Returns `false` if no
    /// such channel was registered.
    pub fn unregister_channel(&self, id: &ChannelId) -> bool {
        let (channel, ids) = {
            let mut channels = lock(&self.channels);
            let Some(channel) = channels.remove(id) else {
                return false;
            };

            (channel, channels.keys().cloned().collect())
        };
        channel.close();
        debug!(channel = %id, "channel unregistered");
        self.delegate.notify_subscribers(&CHANNELS, ids);

        true
    }

    /// Unregisters and closes every channel published by an instance.
    ///
    /// Subscribers are notified once, after all channels are closed.
    pub fn unregister_all_channels_of(&self, module_instance_id: &ModuleInstanceId) {
        let (removed, ids) = {
            let mut channels = lock(&self.channels);
            let removed: Vec<_> = channels
                .iter()
                .filter(|(id, _)| &id.module_instance_id == module_instance_id)
                .map(|(id, _)| id.clone())
                .collect();
            let removed: Vec<Arc<Channel>> = removed
                .iter()
                .filter_map(|id| channels.remove(id))
                .collect();

            (removed, channels.keys().cloned().collect::<Vec<_>>())
        };
        if removed.is_empty() {
            return;
        }
        for channel in &removed {
            channel.close();
        }
        debug!(
            instance = %module_instance_id,
            count = removed.len(),
            "channels unregistered"
        );
        self.delegate.notify_subscribers(&CHANNELS, ids);
    }

    /// Returns a snapshot of the registered channels, ordered by identifier.
    pub fn channels(&self) -> Vec<Arc<Channel>> {
        lock(&self.channels).values().cloned().collect()
    }

    /// Returns the channels published by an instance.
    pub fn channels_of(&self, module_instance_id: &ModuleInstanceId) -> Vec<Arc<Channel>> {
        lock(&self.channels)
            .values()
            .filter(|channel| &channel.id().module_instance_id == module_instance_id)
            .cloned()
            .collect()
    }

    /// Looks up a channel.
    pub fn channel(&self, id: &ChannelId) -> Option<Arc<Channel>> {
        lock(&self.channels).get(id).cloned()
    }

    /// Subscribes to changes of the set of registered channels.
    ///
    /// The callback immediately receives the current channel identifiers.
    /// Content publications do not trigger a notification.
    pub fn subscribe_to_channels_changes<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Vec<ChannelId>) + Send + Sync + 'static,
    {
        self.delegate.subscribe(&CHANNELS, callback)
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("channels", &lock(&self.channels).len())
            .finish_non_exhaustive()
    }
}
