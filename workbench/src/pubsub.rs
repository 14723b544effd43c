//! Typed publish/subscribe topics with latest-value replay.
//!
//! A [`PublishSubscribeDelegate`] is a registry of subscriber callbacks keyed
//! by [`Topic`]. Every notification on a retained topic is cached so that a
//! callback subscribing later is immediately handed the latest payload, once,
//! before [`PublishSubscribeDelegate::subscribe()`] returns. Intermediate
//! payloads are never queued: only the latest one is replayed.
//!
//! Callbacks are always invoked without any internal lock being held, so they
//! may freely subscribe, unsubscribe or notify from within a notification. A
//! callback subscribed during a notification is not invoked for that
//! notification but will be for the next one. A callback that panics is
//! isolated: the panic is caught and logged, and the remaining subscribers
//! still receive the payload.
//!
//! #### Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use workbench::pubsub::{PublishSubscribeDelegate, Topic};
//!
//! const ANSWER: Topic<i32> = Topic::new("answer");
//!
//! let delegate = PublishSubscribeDelegate::new("example");
//! delegate.notify_subscribers(&ANSWER, 42);
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let _subscription = delegate.subscribe(&ANSWER, {
//!     let seen = seen.clone();
//!     move |value: &i32| seen.lock().unwrap().push(*value)
//! });
//! delegate.notify_subscribers(&ANSWER, 43);
//!
//! assert_eq!(*seen.lock().unwrap(), vec![42, 43]);
//! assert_eq!(delegate.latest_value(&ANSWER).as_deref(), Some(&43));
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use slab::Slab;
use tracing::{error, warn};

use crate::util::lock;

type ErasedPayload = Arc<dyn Any + Send + Sync>;
type ErasedCallback = Arc<dyn Fn(&ErasedPayload) + Send + Sync>;

/// A named topic carrying payloads of type `T`.
///
/// Retained topics cache their latest payload for replay to late subscribers;
/// transient topics only deliver payloads to the subscribers registered at
/// notification time.
pub struct Topic<T> {
    name: Cow<'static, str>,
    retain: bool,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Topic<T> {
    /// Creates a retained topic.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            retain: true,
            _payload: PhantomData,
        }
    }

    /// Creates a transient topic, i.e. a topic whose payloads are never
    /// cached nor replayed.
    pub const fn transient(name: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            retain: false,
            _payload: PhantomData,
        }
    }

    /// Creates a topic whose name is only known at run time.
    pub fn dynamic(name: impl Into<String>, retain: bool) -> Self {
        Self {
            name: Cow::Owned(name.into()),
            retain,
            _payload: PhantomData,
        }
    }

    /// Returns the topic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the latest payload is cached for replay.
    pub fn is_retained(&self) -> bool {
        self.retain
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            retain: self.retain,
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("retain", &self.retain)
            .finish()
    }
}

/// Subscribers and cached payload of a single topic.
#[derive(Default)]
struct TopicSlot {
    /// Registered callbacks, each tagged with a registration number so that a
    /// recycled slab key is never mistaken for the subscriber it replaced.
    subscribers: Slab<(u64, ErasedCallback)>,
    latest: Option<ErasedPayload>,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<Cow<'static, str>, TopicSlot>,
    next_registration: u64,
}

impl Registry {
    fn is_registered(&self, topic: &str, key: usize, registration: u64) -> bool {
        self.topics
            .get(topic)
            .and_then(|slot| slot.subscribers.get(key))
            .is_some_and(|(r, _)| *r == registration)
    }
}

/// Per-topic subscriber registry with latest-value caching.
///
/// Cloning a delegate yields a handle to the same registry.
#[derive(Clone)]
pub struct PublishSubscribeDelegate {
    name: Cow<'static, str>,
    registry: Arc<Mutex<Registry>>,
}

impl PublishSubscribeDelegate {
    /// Creates an empty delegate.
    ///
    /// The name is only used to identify the delegate in log records.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Registers a callback for the specified topic.
    ///
    /// If the topic holds a cached payload, the callback is invoked with it
    /// exactly once before this method returns.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// dropped or explicitly unsubscribed.
    pub fn subscribe<T, F>(&self, topic: &Topic<T>, callback: F) -> Subscription
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let delegate_name = self.name.clone();
        let topic_name = topic.name.clone();
        let callback: ErasedCallback = Arc::new(move |payload: &ErasedPayload| {
            match payload.downcast_ref::<T>() {
                Some(payload) => callback(payload),
                None => warn!(
                    delegate = %delegate_name,
                    topic = %topic_name,
                    "payload type does not match the subscriber's topic type"
                ),
            }
        });

        let (key, registration, replay) = {
            let mut registry = lock(&self.registry);
            let registration = registry.next_registration;
            registry.next_registration += 1;

            let slot = registry.topics.entry(topic.name.clone()).or_default();
            let key = slot.subscribers.insert((registration, callback.clone()));

            (key, registration, slot.latest.clone())
        };

        if let Some(payload) = replay {
            self.invoke(topic.name(), &callback, &payload);
        }

        Subscription {
            registry: Arc::downgrade(&self.registry),
            topic: topic.name.clone(),
            key: Some((key, registration)),
        }
    }

    /// Caches the payload (for retained topics) and invokes every callback
    /// currently registered for the topic with it.
    ///
    /// All callbacks observe the same payload instance. A panicking callback
    /// does not prevent the others from being invoked.
    pub fn notify_subscribers<T>(&self, topic: &Topic<T>, payload: T)
    where
        T: Send + Sync + 'static,
    {
        let payload: ErasedPayload = Arc::new(payload);

        let snapshot: Vec<(usize, u64, ErasedCallback)> = {
            let mut registry = lock(&self.registry);
            let slot = registry.topics.entry(topic.name.clone()).or_default();
            if topic.retain {
                slot.latest = Some(payload.clone());
            }

            slot.subscribers
                .iter()
                .map(|(key, (registration, callback))| (key, *registration, callback.clone()))
                .collect()
        };

        for (key, registration, callback) in snapshot {
            // Skip callbacks unsubscribed by a previous callback of this
            // notification.
            if !lock(&self.registry).is_registered(topic.name(), key, registration) {
                continue;
            }
            self.invoke(topic.name(), &callback, &payload);
        }
    }

    /// Returns the latest payload notified on the topic, if any.
    pub fn latest_value<T>(&self, topic: &Topic<T>) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let payload = lock(&self.registry)
            .topics
            .get(topic.name())
            .and_then(|slot| slot.latest.clone())?;

        payload.downcast::<T>().ok()
    }

    /// Returns `true` if a payload is cached for the topic.
    pub fn has_value<T>(&self, topic: &Topic<T>) -> bool {
        lock(&self.registry)
            .topics
            .get(topic.name())
            .is_some_and(|slot| slot.latest.is_some())
    }

    /// Returns the number of callbacks registered for the topic.
    pub fn subscriber_count<T>(&self, topic: &Topic<T>) -> usize {
        lock(&self.registry)
            .topics
            .get(topic.name())
            .map_or(0, |slot| slot.subscribers.len())
    }

    /// Drops the cached payload of the topic, if any.
    pub fn forget_value<T>(&self, topic: &Topic<T>) {
        if let Some(slot) = lock(&self.registry).topics.get_mut(topic.name()) {
            slot.latest = None;
        }
    }

    /// Unregisters every callback and drops every cached payload.
    ///
    /// Outstanding [`Subscription`] handles become inactive.
    pub fn clear(&self) {
        let topics = std::mem::take(&mut lock(&self.registry).topics);
        // Callbacks may own other subscriptions: drop them outside the lock.
        drop(topics);
    }

    fn invoke(&self, topic: &str, callback: &ErasedCallback, payload: &ErasedPayload) {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(payload))) {
            error!(
                delegate = %self.name,
                topic,
                reason = panic_message(panic.as_ref()),
                "subscriber callback panicked"
            );
        }
    }
}

impl fmt::Debug for PublishSubscribeDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishSubscribeDelegate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}

/// Handle to a registered callback.
///
/// The callback is unregistered when the handle is dropped or when
/// [`Subscription::unsubscribe()`] is called, whichever comes first.
#[must_use = "dropping a `Subscription` unregisters its callback"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    topic: Cow<'static, str>,
    key: Option<(usize, u64)>,
}

impl Subscription {
    /// Unregisters the callback.
    ///
    /// Calling this method more than once is a no-op.
    pub fn unsubscribe(&mut self) {
        let Some((key, registration)) = self.key.take() else {
            return;
        };
        let Some(registry) = self.registry.upgrade() else {
            return;
        };

        let mut registry = lock(&registry);
        if registry.is_registered(&self.topic, key, registration) {
            if let Some(slot) = registry.topics.get_mut(self.topic.as_ref()) {
                slot.subscribers.remove(key);
            }
        }
    }

    /// Returns `true` if the callback is still registered.
    pub fn is_active(&self) -> bool {
        match (self.key, self.registry.upgrade()) {
            (Some((key, registration)), Some(registry)) => {
                lock(&registry).is_registered(&self.topic, key, registration)
            }
            _ => false,
        }
    }

    /// Consumes the handle without unregistering the callback, which then
    /// lives as long as the delegate.
    pub fn detach(mut self) {
        self.key = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    const VALUE: Topic<i32> = Topic::new("value");
    const PING: Topic<()> = Topic::transient("ping");

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, impl Fn(&i32) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callback = {
            let seen = seen.clone();
            move |v: &i32| seen.lock().unwrap().push(*v)
        };

        (seen, callback)
    }

    #[test]
    fn replay_latest_value_on_subscribe() {
        let delegate = PublishSubscribeDelegate::new("test");
        delegate.notify_subscribers(&VALUE, 1);
        delegate.notify_subscribers(&VALUE, 2);

        let (seen, callback) = recorder();
        let _sub = delegate.subscribe(&VALUE, callback);

        // Intermediate payloads are not queued.
        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn no_replay_without_value() {
        let delegate = PublishSubscribeDelegate::new("test");
        let (seen, callback) = recorder();
        let _sub = delegate.subscribe(&VALUE, callback);

        assert!(seen.lock().unwrap().is_empty());
        assert!(!delegate.has_value(&VALUE));
        assert!(delegate.latest_value(&VALUE).is_none());
    }

    #[test]
    fn transient_topic_is_not_replayed() {
        let delegate = PublishSubscribeDelegate::new("test");
        delegate.notify_subscribers(&PING, ());

        let count = Arc::new(AtomicUsize::new(0));
        let _sub = delegate.subscribe(&PING, {
            let count = count.clone();
            move |_: &()| {
                count.fetch_add(1, Ordering::Relaxed);
            }
        });
        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert!(!delegate.has_value(&PING));

        delegate.notify_subscribers(&PING, ());
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let delegate = PublishSubscribeDelegate::new("test");
        let _bad = delegate.subscribe(&VALUE, |_: &i32| panic!("misbehaving subscriber"));
        let (seen, callback) = recorder();
        let _good = delegate.subscribe(&VALUE, callback);

        delegate.notify_subscribers(&VALUE, 7);
        delegate.notify_subscribers(&VALUE, 8);

        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
        assert_eq!(delegate.latest_value(&VALUE).as_deref(), Some(&8));
        assert_eq!(delegate.subscriber_count(&VALUE), 2);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let delegate = PublishSubscribeDelegate::new("test");
        let (seen, callback) = recorder();
        let mut sub = delegate.subscribe(&VALUE, callback);
        let (_other_seen, other) = recorder();
        let _other = delegate.subscribe(&VALUE, other);

        delegate.notify_subscribers(&VALUE, 1);
        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        delegate.notify_subscribers(&VALUE, 2);

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(delegate.subscriber_count(&VALUE), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let delegate = PublishSubscribeDelegate::new("test");
        let (seen, callback) = recorder();
        drop(delegate.subscribe(&VALUE, callback));

        delegate.notify_subscribers(&VALUE, 1);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(delegate.subscriber_count(&VALUE), 0);
    }

    #[test]
    fn recycled_key_is_not_unsubscribed_twice() {
        let delegate = PublishSubscribeDelegate::new("test");
        let (_, first) = recorder();
        let mut first = delegate.subscribe(&VALUE, first);
        first.unsubscribe();

        // The second subscriber reuses the slab key of the first one.
        let (seen, second) = recorder();
        let _second = delegate.subscribe(&VALUE, second);
        first.unsubscribe();

        delegate.notify_subscribers(&VALUE, 3);
        assert_eq!(*seen.lock().unwrap(), vec![3]);
    }

    #[test]
    fn subscribe_during_notification() {
        let delegate = PublishSubscribeDelegate::new("test");
        let late = Arc::new(Mutex::new(Vec::new()));
        let late_sub: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let _sub = delegate.subscribe(&VALUE, {
            let delegate = delegate.clone();
            let late = late.clone();
            let late_sub = late_sub.clone();
            move |_: &i32| {
                let mut late_sub = late_sub.lock().unwrap();
                if late_sub.is_none() {
                    let late = late.clone();
                    *late_sub = Some(
                        delegate.subscribe(&VALUE, move |v: &i32| late.lock().unwrap().push(*v)),
                    );
                }
            }
        });

        delegate.notify_subscribers(&VALUE, 1);
        // The late subscriber only gets the replay of the current value.
        assert_eq!(*late.lock().unwrap(), vec![1]);

        delegate.notify_subscribers(&VALUE, 2);
        assert_eq!(*late.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_during_notification() {
        let delegate = PublishSubscribeDelegate::new("test");
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        // Whichever callback runs first unsubscribes the victim; the victim
        // must never run after that.
        let _killer = delegate.subscribe(&VALUE, {
            let victim = victim.clone();
            move |_: &i32| {
                if let Some(mut sub) = victim.lock().unwrap().take() {
                    sub.unsubscribe();
                }
            }
        });
        *victim.lock().unwrap() = Some(delegate.subscribe(&VALUE, {
            let calls = calls.clone();
            move |_: &i32| {
                calls.fetch_add(1, Ordering::Relaxed);
            }
        }));

        delegate.notify_subscribers(&VALUE, 1);
        delegate.notify_subscribers(&VALUE, 2);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn clear_deactivates_subscriptions() {
        let delegate = PublishSubscribeDelegate::new("test");
        delegate.notify_subscribers(&VALUE, 1);
        let (seen, callback) = recorder();
        let sub = delegate.subscribe(&VALUE, callback);

        delegate.clear();
        assert!(!sub.is_active());
        assert!(!delegate.has_value(&VALUE));

        delegate.notify_subscribers(&VALUE, 2);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
    }

    #[test]
    fn end_to_end_scenario() {
        let delegate = PublishSubscribeDelegate::new("test");
        let x: Topic<i32> = Topic::dynamic("x", true);
        delegate.notify_subscribers(&x, 42);

        let (seen, callback) = recorder();
        let _sub = delegate.subscribe(&x, callback);
        assert_eq!(*seen.lock().unwrap(), vec![42]);

        delegate.notify_subscribers(&x, 43);
        assert_eq!(*seen.lock().unwrap(), vec![42, 43]);
        assert_eq!(delegate.latest_value(&x).as_deref(), Some(&43));
    }
}
