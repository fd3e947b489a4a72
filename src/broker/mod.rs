//! In-process subscription broker
//!
//! The acquisition worker talks to its clients through two traits:
//!
//! - [`SubscriptionSource`] - enumerates the currently active subscription topics
//! - [`Notifier`] - delivers a reply to every subscriber matching a filter
//!
//! [`Broker`] implements both on top of bounded crossbeam channels. A client
//! calls [`Broker::subscribe`] with a topic such as
//! `/acquisition?channelNameFilter=A,B` and receives a [`SubscriptionHandle`];
//! dropping the handle ends the subscription.
//!
//! # Example
//!
//! ```ignore
//! let broker = Broker::new(1024);
//! let handle = broker.subscribe("/acquisition?channelNameFilter=A")?;
//! while let Ok(acq) = handle.receiver().recv() {
//!     println!("{}: {} samples", acq.channel_name, acq.len());
//! }
//! ```

use crate::acquisition::filter::AcquisitionFilter;
use crate::error::{AcquisitionError, Result};
use crate::types::Acquisition;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use url::Url;

/// Base used to resolve relative topics.
const TOPIC_BASE: &str = "mdp://localhost/";

/// Service path and query parameters of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubscriptionTopic {
    pub path: String,
    pub params: BTreeMap<String, String>,
}

impl SubscriptionTopic {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add a query parameter (builder style).
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Topic carrying the query parameters of `filter`.
    pub fn for_filter(path: impl Into<String>, filter: &AcquisitionFilter) -> Self {
        Self {
            path: path.into(),
            params: filter.to_params(),
        }
    }

    /// Parse `"/path?key=value&..."`. The path must be absolute.
    pub fn parse(text: &str) -> Result<Self> {
        if !text.starts_with('/') {
            return Err(AcquisitionError::InvalidArgument(format!(
                "topic '{}' must start with '/'",
                text
            )));
        }
        let url = Url::parse(TOPIC_BASE)
            .and_then(|base| base.join(text))
            .map_err(|e| AcquisitionError::InvalidArgument(format!("topic '{}': {}", text, e)))?;

        Ok(Self {
            path: url.path().to_string(),
            params: url.query_pairs().into_owned().collect(),
        })
    }
}

impl fmt::Display for SubscriptionTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if !self.params.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.params)
                .finish();
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

/// Enumerates active subscriptions.
#[cfg_attr(test, mockall::automock)]
pub trait SubscriptionSource: Send + Sync {
    /// One entry per distinct live topic.
    fn active_subscriptions(&self) -> Vec<SubscriptionTopic>;
}

/// Publishes replies to subscribers.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    /// Deliver `reply` to every subscriber of `service` whose filter accepts
    /// `filter`.
    fn notify(&self, service: &str, filter: &AcquisitionFilter, reply: Acquisition);
}

struct Subscriber {
    id: u64,
    topic: SubscriptionTopic,
    /// `None` when the query does not parse; such subscribers never match.
    filter: Option<AcquisitionFilter>,
    tx: Sender<Acquisition>,
    dropped: Arc<AtomicU64>,
}

struct BrokerShared {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
    delivered: AtomicU64,
}

impl BrokerShared {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: u64) {
        self.subscribers().retain(|s| s.id != id);
    }
}

/// In-process subscription broker. Cloning yields another handle to the same
/// broker.
#[derive(Clone)]
pub struct Broker {
    shared: Arc<BrokerShared>,
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl Broker {
    /// Create a broker whose subscriber queues hold `capacity` replies.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(BrokerShared {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                delivered: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to a topic given as `"/path?query"`.
    pub fn subscribe(&self, topic: &str) -> Result<SubscriptionHandle> {
        Ok(self.subscribe_topic(SubscriptionTopic::parse(topic)?))
    }

    /// Subscribe to an already parsed topic.
    ///
    /// A query that does not describe a valid filter still registers the
    /// subscription; it is reported by the worker and receives nothing.
    pub fn subscribe_topic(&self, topic: SubscriptionTopic) -> SubscriptionHandle {
        let filter = match AcquisitionFilter::from_params(&topic.params) {
            Ok(filter) => Some(filter),
            Err(e) => {
                tracing::debug!("Subscription '{}' has no valid filter: {}", topic, e);
                None
            }
        };
        let (tx, rx) = bounded(self.shared.capacity);
        let dropped = Arc::new(AtomicU64::new(0));
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);

        self.shared.subscribers().push(Subscriber {
            id,
            topic: topic.clone(),
            filter,
            tx,
            dropped: Arc::clone(&dropped),
        });
        tracing::debug!("Subscribed #{} to '{}'", id, topic);

        SubscriptionHandle {
            id,
            topic,
            rx,
            dropped,
            broker: Arc::downgrade(&self.shared),
        }
    }

    /// Number of live subscriptions (duplicates included).
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers().len()
    }

    /// Total replies queued to subscribers so far.
    pub fn delivered(&self) -> u64 {
        self.shared.delivered.load(Ordering::Relaxed)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl SubscriptionSource for Broker {
    fn active_subscriptions(&self) -> Vec<SubscriptionTopic> {
        let unique: BTreeSet<SubscriptionTopic> = self
            .shared
            .subscribers()
            .iter()
            .map(|s| s.topic.clone())
            .collect();
        unique.into_iter().collect()
    }
}

impl Notifier for Broker {
    fn notify(&self, service: &str, filter: &AcquisitionFilter, reply: Acquisition) {
        let subscribers = self.shared.subscribers();
        for subscriber in subscribers.iter() {
            let accepted = subscriber.topic.path == service
                && subscriber
                    .filter
                    .as_ref()
                    .is_some_and(|f| f.accepts(filter));
            if !accepted {
                continue;
            }
            match subscriber.tx.try_send(reply.clone()) {
                Ok(()) => {
                    self.shared.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    let n = subscriber.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if n.is_power_of_two() {
                        tracing::warn!(
                            "Subscriber #{} ('{}') is lagging: {} replies dropped",
                            subscriber.id,
                            subscriber.topic,
                            n
                        );
                    }
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }
}

/// Client end of one subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    topic: SubscriptionTopic,
    rx: Receiver<Acquisition>,
    dropped: Arc<AtomicU64>,
    broker: Weak<BrokerShared>,
}

impl SubscriptionHandle {
    pub fn topic(&self) -> &SubscriptionTopic {
        &self.topic
    }

    pub fn receiver(&self) -> &Receiver<Acquisition> {
        &self.rx
    }

    /// All replies currently queued, without blocking.
    pub fn drain(&self) -> Vec<Acquisition> {
        self.rx.try_iter().collect()
    }

    /// Replies discarded because this subscriber's queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(shared) = self.broker.upgrade() {
            shared.remove(self.id);
            tracing::debug!("Unsubscribed #{} from '{}'", self.id, self.topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::mode::AcquisitionMode;

    fn reply(channel: &str) -> Acquisition {
        Acquisition {
            channel_name: channel.to_string(),
            channel_value: vec![1.0],
            ..Default::default()
        }
    }

    #[test]
    fn test_topic_parse() {
        let topic = SubscriptionTopic::parse(
            "/acquisition?acquisitionModeFilter=triggered&channelNameFilter=A,B&preSamples=10",
        )
        .unwrap();
        assert_eq!(topic.path, "/acquisition");
        assert_eq!(topic.params["acquisitionModeFilter"], "triggered");
        assert_eq!(topic.params["channelNameFilter"], "A,B");
        assert_eq!(topic.params["preSamples"], "10");

        let bare = SubscriptionTopic::parse("/acquisition").unwrap();
        assert!(bare.params.is_empty());

        assert!(SubscriptionTopic::parse("acquisition").is_err());
    }

    #[test]
    fn test_topic_display_parses_back() {
        let topic = SubscriptionTopic::new("/acquisition")
            .with_param("channelNameFilter", "A,B")
            .with_param("triggerNameFilter", "CMD TRIGGER");
        let parsed = SubscriptionTopic::parse(&topic.to_string()).unwrap();
        assert_eq!(parsed, topic);
    }

    #[test]
    fn test_active_subscriptions_are_deduplicated() {
        let broker = Broker::new(8);
        let _a = broker.subscribe("/acquisition?channelNameFilter=A").unwrap();
        let _b = broker.subscribe("/acquisition?channelNameFilter=A").unwrap();
        let c = broker.subscribe("/acquisition?channelNameFilter=B").unwrap();

        assert_eq!(broker.subscriber_count(), 3);
        assert_eq!(broker.active_subscriptions().len(), 2);

        drop(c);
        assert_eq!(broker.subscriber_count(), 2);
        assert_eq!(broker.active_subscriptions().len(), 1);
    }

    #[test]
    fn test_notify_routes_by_channel_and_mode() {
        let broker = Broker::new(8);
        let ab = broker.subscribe("/acquisition?channelNameFilter=A,B").unwrap();
        let b = broker.subscribe("/acquisition?channelNameFilter=B").unwrap();
        let other = broker.subscribe("/other?channelNameFilter=A").unwrap();
        let triggered = broker
            .subscribe("/acquisition?acquisitionModeFilter=triggered&channelNameFilter=A&postSamples=1")
            .unwrap();

        let filter = AcquisitionFilter::continuous("A");
        broker.notify("/acquisition", &filter, reply("A"));

        assert_eq!(ab.drain().len(), 1);
        assert!(b.drain().is_empty());
        assert!(other.drain().is_empty());
        assert!(triggered.drain().is_empty());

        let mut trig = filter.clone();
        trig.acquisition_mode = AcquisitionMode::Triggered;
        trig.post_samples = 1;
        broker.notify("/acquisition", &trig, reply("A"));
        assert_eq!(triggered.drain().len(), 1);
        assert_eq!(broker.delivered(), 2);
    }

    #[test]
    fn test_full_subscriber_drops_replies() {
        let broker = Broker::new(2);
        let handle = broker.subscribe("/acquisition?channelNameFilter=A").unwrap();
        let filter = AcquisitionFilter::continuous("A");
        for _ in 0..5 {
            broker.notify("/acquisition", &filter, reply("A"));
        }
        assert_eq!(handle.drain().len(), 2);
        assert_eq!(handle.dropped(), 3);
    }

    #[test]
    fn test_invalid_filter_still_listed_but_never_notified() {
        let broker = Broker::new(8);
        let handle = broker
            .subscribe("/acquisition?acquisitionModeFilter=burst&channelNameFilter=A")
            .unwrap();
        assert_eq!(broker.active_subscriptions().len(), 1);

        broker.notify(
            "/acquisition",
            &AcquisitionFilter::continuous("A"),
            reply("A"),
        );
        assert!(handle.drain().is_empty());
    }

    #[test]
    fn test_handle_outlives_broker() {
        let broker = Broker::new(8);
        let handle = broker.subscribe("/acquisition").unwrap();
        drop(broker);
        assert_eq!(handle.topic().path, "/acquisition");
        drop(handle);
    }
}
