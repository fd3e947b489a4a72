//! Subscription reconciliation.
//!
//! One pass walks the active subscriptions of the service, makes sure every
//! requested (mode, signal, parameters) combination has exactly one poller,
//! drains those pollers into notifications and evicts entries nobody asked
//! for during the pass.

use crate::acquisition::entry::{DataSetPollerEntry, PollerEntry, StreamingPollerEntry};
use crate::acquisition::filter::AcquisitionFilter;
use crate::acquisition::handlers::{handle_dataset, handle_streaming};
use crate::acquisition::mode::AcquisitionMode;
use crate::acquisition::poller_key::PollerKey;
use crate::broker::{Notifier, SubscriptionSource, SubscriptionTopic};
use crate::error::{AcquisitionError, Result};
use crate::graph::poller::{trigger_name_matcher, DataSetPoller};
use crate::graph::sink::{SinkQuery, SinkRegistry};
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Counters accumulated over all passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub passes: u64,
    pub notifications: u64,
    /// Subscriptions whose query could not be parsed
    pub skipped_subscriptions: u64,
    /// Poller requests for signals the registry does not know
    pub unknown_signals: u64,
    /// Poller requests the registry refused for their parameters
    pub rejected_requests: u64,
    /// Poller requests that failed for reasons outside the subscription
    pub failed_requests: u64,
    pub pollers_created: u64,
    pub pollers_evicted: u64,
}

/// Owner of the streaming and dataset poller tables.
pub struct Reconciler {
    service: String,
    registry: Arc<dyn SinkRegistry>,
    source: Arc<dyn SubscriptionSource>,
    notifier: Arc<dyn Notifier>,
    streaming: BTreeMap<PollerKey, StreamingPollerEntry>,
    dataset: BTreeMap<PollerKey, DataSetPollerEntry>,
    stats: ReconcileStats,
}

fn mark_unused<E: PollerEntry>(table: &mut BTreeMap<PollerKey, E>) {
    for entry in table.values_mut() {
        entry.set_in_use(false);
    }
}

fn evict_unused<E: PollerEntry>(table: &mut BTreeMap<PollerKey, E>) -> u64 {
    let stale: Vec<PollerKey> = table
        .iter()
        .filter(|(_, entry)| !entry.in_use())
        .map(|(key, _)| key.clone())
        .collect();
    for key in &stale {
        if let Some(entry) = table.remove(key) {
            entry.release(key);
        }
    }
    stale.len() as u64
}

fn release_all<E: PollerEntry>(table: &mut BTreeMap<PollerKey, E>) {
    for (key, entry) in std::mem::take(table) {
        entry.release(&key);
    }
}

impl Reconciler {
    pub fn new(
        service: impl Into<String>,
        registry: Arc<dyn SinkRegistry>,
        source: Arc<dyn SubscriptionSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            service: service.into(),
            registry,
            source,
            notifier,
            streaming: BTreeMap::new(),
            dataset: BTreeMap::new(),
            stats: ReconcileStats::default(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Run one pass.
    ///
    /// With `flush_only` set no new pollers are created; existing ones are
    /// still drained. Returns whether every poller visited during the pass
    /// reported finished.
    pub fn reconcile(&mut self, flush_only: bool) -> bool {
        self.stats.passes += 1;
        mark_unused(&mut self.streaming);
        mark_unused(&mut self.dataset);

        let mut all_finished = true;
        for topic in self.source.active_subscriptions() {
            if topic.path != self.service {
                continue;
            }
            let filter = match AcquisitionFilter::from_params(&topic.params) {
                Ok(filter) => filter,
                Err(e) => {
                    tracing::warn!("Skipping subscription '{}': {}", topic, e);
                    self.stats.skipped_subscriptions += 1;
                    continue;
                }
            };

            for signal in filter.channel_names() {
                let key = filter.poller_key(signal);
                let narrowed = filter.for_channel(signal);
                let visited = if key.mode.is_dataset() {
                    self.visit_dataset(&key, &narrowed, flush_only)
                } else {
                    self.visit_streaming(&key, &narrowed, flush_only)
                };
                match visited {
                    Ok(Some(finished)) => all_finished &= finished,
                    Ok(None) => {}
                    Err(e) => self.record_request_error(&key, &topic, &e),
                }
            }
        }

        let evicted = evict_unused(&mut self.streaming) + evict_unused(&mut self.dataset);
        self.stats.pollers_evicted += evicted;
        tracing::trace!(
            "Reconcile pass {} (flush_only={}): {} streaming, {} dataset, {} evicted",
            self.stats.passes,
            flush_only,
            self.streaming.len(),
            self.dataset.len(),
            evicted
        );
        all_finished
    }

    /// Count a failed poller request. The pass always continues; only the
    /// log level and counter depend on the error.
    fn record_request_error(
        &mut self,
        key: &PollerKey,
        topic: &SubscriptionTopic,
        e: &AcquisitionError,
    ) {
        match e {
            AcquisitionError::UnknownSignal(_) => {
                self.stats.unknown_signals += 1;
                tracing::warn!("Cannot serve {} for '{}': {}", key, topic, e);
            }
            e if e.is_recoverable() => {
                self.stats.rejected_requests += 1;
                tracing::warn!("Rejected {} for '{}': {}", key, topic, e);
            }
            e => {
                self.stats.failed_requests += 1;
                tracing::error!("Poller request {} for '{}' failed: {}", key, topic, e);
            }
        }
    }

    /// Drain the streaming poller for `key`, creating it first unless
    /// `flush_only`. `Ok(None)` means the key was skipped.
    fn visit_streaming(
        &mut self,
        key: &PollerKey,
        filter: &AcquisitionFilter,
        flush_only: bool,
    ) -> Result<Option<bool>> {
        let entry = match self.streaming.entry(key.clone()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                if flush_only {
                    return Ok(None);
                }
                let poller = self
                    .registry
                    .streaming_poller(&SinkQuery::signal_name(&key.signal_name))?;
                self.stats.pollers_created += 1;
                tracing::debug!("Created poller {}", key);
                vacant.insert(StreamingPollerEntry::new(poller, &key.signal_name))
            }
        };
        entry.set_in_use(true);

        let notifier = &self.notifier;
        let service = self.service.as_str();
        let notifications = &mut self.stats.notifications;
        let finished = handle_streaming(entry, |reply| {
            *notifications += 1;
            notifier.notify(service, filter, reply);
        });
        Ok(Some(finished))
    }

    fn visit_dataset(
        &mut self,
        key: &PollerKey,
        filter: &AcquisitionFilter,
        flush_only: bool,
    ) -> Result<Option<bool>> {
        let entry = match self.dataset.entry(key.clone()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                if flush_only {
                    return Ok(None);
                }
                let poller = request_dataset_poller(self.registry.as_ref(), key)?;
                self.stats.pollers_created += 1;
                tracing::debug!("Created poller {}", key);
                vacant.insert(DataSetPollerEntry::new(poller, &key.signal_name))
            }
        };
        entry.set_in_use(true);

        let notifier = &self.notifier;
        let service = self.service.as_str();
        let notifications = &mut self.stats.notifications;
        let finished = handle_dataset(entry, |reply| {
            *notifications += 1;
            notifier.notify(service, filter, reply);
        });
        Ok(Some(finished))
    }

    /// Release every poller. Called after a drain, before the graph is joined.
    pub fn clear(&mut self) {
        release_all(&mut self.streaming);
        release_all(&mut self.dataset);
    }

    pub fn streaming_len(&self) -> usize {
        self.streaming.len()
    }

    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streaming.is_empty() && self.dataset.is_empty()
    }

    pub fn stats(&self) -> ReconcileStats {
        self.stats
    }

    /// Cached metadata unit of the streaming entry for `key`, if present.
    pub fn streaming_unit(&self, key: &PollerKey) -> Option<&str> {
        self.streaming
            .get(key)
            .map(|entry| entry.metadata().unit.as_str())
    }
}

fn request_dataset_poller(
    registry: &dyn SinkRegistry,
    key: &PollerKey,
) -> Result<Arc<DataSetPoller>> {
    let query = SinkQuery::signal_name(&key.signal_name);
    let matcher = trigger_name_matcher(&key.trigger_name);
    match key.mode {
        AcquisitionMode::Triggered => {
            registry.trigger_poller(&query, matcher, key.pre_samples, key.post_samples)
        }
        AcquisitionMode::Multiplexed => {
            registry.multiplexed_poller(&query, matcher, key.maximum_window_size)
        }
        AcquisitionMode::Snapshot => registry.snapshot_poller(&query, matcher, key.snapshot_delay),
        AcquisitionMode::Continuous => Err(AcquisitionError::InvalidArgument(format!(
            "{} is not a dataset poller",
            key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::filter::params;
    use crate::broker::{MockNotifier, MockSubscriptionSource};
    use crate::graph::dataset::SignalDescriptor;
    use crate::graph::poller::{StreamingPoller, TriggerMatcher};
    use crate::graph::sink::{DataSink, InMemorySinkRegistry};
    use crate::graph::tag::{keys, Tag};
    use crate::types::{Acquisition, STREAMING_TRIGGER_NAME};
    use std::sync::Mutex;

    const SERVICE: &str = "/acquisition";

    /// Subscription list that tests can change between passes.
    fn source(topics: Arc<Mutex<Vec<SubscriptionTopic>>>) -> Arc<dyn SubscriptionSource> {
        let mut mock = MockSubscriptionSource::new();
        mock.expect_active_subscriptions()
            .returning(move || topics.lock().unwrap().clone());
        Arc::new(mock)
    }

    fn continuous(channels: &str) -> SubscriptionTopic {
        SubscriptionTopic::new(SERVICE).with_param(params::CHANNEL_NAME, channels)
    }

    fn registry_with(names: &[&str]) -> (Arc<InMemorySinkRegistry>, Vec<Arc<DataSink>>) {
        let registry = Arc::new(InMemorySinkRegistry::new());
        let sinks = names
            .iter()
            .map(|name| {
                let sink = Arc::new(DataSink::new(
                    SignalDescriptor::new(*name, "V", -1.0, 1.0),
                    1000.0,
                ));
                registry.register(Arc::clone(&sink));
                sink
            })
            .collect();
        (registry, sinks)
    }

    fn quiet_notifier() -> Arc<dyn Notifier> {
        let mut mock = MockNotifier::new();
        mock.expect_notify().returning(|_, _, _| ());
        Arc::new(mock)
    }

    #[test]
    fn test_continuous_blocks_become_notifications() {
        let (registry, sinks) = registry_with(&["A"]);
        let topics = Arc::new(Mutex::new(vec![continuous("A")]));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|service: &str, filter: &AcquisitionFilter, reply: &Acquisition| {
                service == SERVICE
                    && filter.channel_name_filter == "A"
                    && reply.channel_unit == "V"
                    && reply.acq_trigger_name == STREAMING_TRIGGER_NAME
            })
            .times(3)
            .returning(|_, _, _| ());

        let mut reconciler =
            Reconciler::new(SERVICE, registry, source(topics), Arc::new(notifier));

        // First pass creates the poller
        assert!(!reconciler.reconcile(false));
        for _ in 0..3 {
            sinks[0].process_bulk(
                &[0.1, 0.2],
                &[Tag::new(0)
                    .with(keys::SIGNAL_NAME, "A")
                    .with(keys::SIGNAL_UNIT, "V")],
            );
        }
        reconciler.reconcile(false);

        let stats = reconciler.stats();
        assert_eq!(stats.notifications, 3);
        assert_eq!(stats.pollers_created, 1);
    }

    #[test]
    fn test_triggered_only_matching_trigger_notifies() {
        let (registry, sinks) = registry_with(&["B"]);
        let topic = SubscriptionTopic::new(SERVICE)
            .with_param(params::ACQUISITION_MODE, "triggered")
            .with_param(params::CHANNEL_NAME, "B")
            .with_param(params::TRIGGER_NAME, "T1")
            .with_param(params::PRE_SAMPLES, "10")
            .with_param(params::POST_SAMPLES, "20");
        let topics = Arc::new(Mutex::new(vec![topic]));

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|_, _, reply: &Acquisition| {
                reply.acq_trigger_name == "T1" && reply.channel_value.len() == 30
            })
            .times(1)
            .returning(|_, _, _| ());

        let mut reconciler =
            Reconciler::new(SERVICE, registry, source(topics), Arc::new(notifier));
        reconciler.reconcile(false);
        assert_eq!(reconciler.dataset_len(), 1);

        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        sinks[0].process_bulk(
            &samples,
            &[
                Tag::new(20).with(keys::TRIGGER_NAME, "T1"),
                Tag::new(60).with(keys::TRIGGER_NAME, "T2"),
            ],
        );
        reconciler.reconcile(false);
        assert_eq!(reconciler.stats().notifications, 1);
    }

    #[test]
    fn test_identical_subscriptions_share_one_entry() {
        let (registry, _sinks) = registry_with(&["A"]);
        // Irrelevant parameters do not split the key
        let topics = Arc::new(Mutex::new(vec![
            continuous("A"),
            continuous("A").with_param(params::PRE_SAMPLES, "5"),
            continuous("A,A"),
        ]));

        let mut reconciler =
            Reconciler::new(SERVICE, registry, source(topics), quiet_notifier());
        reconciler.reconcile(false);

        assert_eq!(reconciler.streaming_len(), 1);
        assert_eq!(reconciler.stats().pollers_created, 1);
    }

    #[test]
    fn test_unreferenced_entries_are_evicted_and_recreated_fresh() {
        let (registry, sinks) = registry_with(&["A"]);
        let topics = Arc::new(Mutex::new(vec![continuous("A")]));
        let mut reconciler = Reconciler::new(
            SERVICE,
            registry,
            source(Arc::clone(&topics)),
            quiet_notifier(),
        );

        reconciler.reconcile(false);
        sinks[0].process_bulk(&[1.0], &[Tag::new(0).with(keys::SIGNAL_UNIT, "mV")]);
        reconciler.reconcile(false);
        let key = PollerKey::continuous("A");
        assert_eq!(reconciler.streaming_unit(&key), Some("mV"));

        topics.lock().unwrap().clear();
        reconciler.reconcile(false);
        assert_eq!(reconciler.streaming_len(), 0);
        assert_eq!(reconciler.stats().pollers_evicted, 1);
        // The sink prunes the released poller on its next publish
        sinks[0].process_bulk(&[1.0], &[]);
        assert_eq!(sinks[0].poller_count(), 0);

        topics.lock().unwrap().push(continuous("A"));
        reconciler.reconcile(false);
        assert_eq!(reconciler.streaming_unit(&key), Some("N/A"));
        assert_eq!(reconciler.stats().pollers_created, 2);
    }

    #[test]
    fn test_bad_filter_and_unknown_signal_are_skipped() {
        let (registry, _sinks) = registry_with(&["A"]);
        let topics = Arc::new(Mutex::new(vec![
            SubscriptionTopic::new(SERVICE)
                .with_param(params::ACQUISITION_MODE, "Triggered")
                .with_param(params::CHANNEL_NAME, "A"),
            continuous("A").with_param(params::POST_SAMPLES, "many"),
            continuous("missing,A"),
            SubscriptionTopic::new("/other").with_param(params::CHANNEL_NAME, "A"),
        ]));

        let mut reconciler =
            Reconciler::new(SERVICE, registry, source(topics), quiet_notifier());
        reconciler.reconcile(false);

        let stats = reconciler.stats();
        assert_eq!(stats.skipped_subscriptions, 2);
        assert_eq!(stats.unknown_signals, 1);
        assert_eq!(reconciler.streaming_len(), 1);
    }

    /// Registry that refuses every request with the error built by `error`.
    struct RefusingRegistry {
        error: fn() -> AcquisitionError,
    }

    impl SinkRegistry for RefusingRegistry {
        fn streaming_poller(&self, _: &SinkQuery) -> Result<Arc<StreamingPoller>> {
            Err((self.error)())
        }

        fn trigger_poller(
            &self,
            _: &SinkQuery,
            _: TriggerMatcher,
            _: usize,
            _: usize,
        ) -> Result<Arc<DataSetPoller>> {
            Err((self.error)())
        }

        fn snapshot_poller(
            &self,
            _: &SinkQuery,
            _: TriggerMatcher,
            _: std::time::Duration,
        ) -> Result<Arc<DataSetPoller>> {
            Err((self.error)())
        }

        fn multiplexed_poller(
            &self,
            _: &SinkQuery,
            _: TriggerMatcher,
            _: usize,
        ) -> Result<Arc<DataSetPoller>> {
            Err((self.error)())
        }
    }

    #[test]
    fn test_request_errors_are_classified() {
        let topics = Arc::new(Mutex::new(vec![continuous("A,B")]));

        let rejecting = Arc::new(RefusingRegistry {
            error: || AcquisitionError::InvalidArgument("window too large".into()),
        });
        let mut reconciler =
            Reconciler::new(SERVICE, rejecting, source(topics.clone()), quiet_notifier());
        reconciler.reconcile(false);
        let stats = reconciler.stats();
        assert_eq!(stats.rejected_requests, 2);
        assert_eq!(stats.unknown_signals, 0);
        assert_eq!(stats.failed_requests, 0);

        let failing = Arc::new(RefusingRegistry {
            error: || AcquisitionError::Scheduler("sink table unavailable".into()),
        });
        let mut reconciler =
            Reconciler::new(SERVICE, failing, source(topics), quiet_notifier());
        // A failed request does not end the pass
        assert!(reconciler.reconcile(false));
        let stats = reconciler.stats();
        assert_eq!(stats.failed_requests, 2);
        assert_eq!(stats.rejected_requests, 0);
        assert!(reconciler.is_empty());
    }

    #[test]
    fn test_flush_only_never_creates_pollers() {
        let (registry, _sinks) = registry_with(&["A"]);
        let topics = Arc::new(Mutex::new(vec![continuous("A")]));
        let mut reconciler =
            Reconciler::new(SERVICE, registry, source(topics), quiet_notifier());

        assert!(reconciler.reconcile(true));
        assert!(reconciler.is_empty());
        assert_eq!(reconciler.stats().pollers_created, 0);
    }

    #[test]
    fn test_flush_drains_until_sinks_stop() {
        let (registry, sinks) = registry_with(&["A"]);
        let topics = Arc::new(Mutex::new(vec![continuous("A")]));

        let mut notifier = MockNotifier::new();
        notifier.expect_notify().times(2).returning(|_, _, _| ());
        let mut reconciler =
            Reconciler::new(SERVICE, registry, source(topics), Arc::new(notifier));

        reconciler.reconcile(false);
        sinks[0].process_bulk(&[1.0, 2.0], &[]);
        assert!(!reconciler.reconcile(true));

        sinks[0].process_bulk(&[3.0], &[]);
        sinks[0].stop();
        assert!(reconciler.reconcile(true));

        reconciler.clear();
        assert!(reconciler.is_empty());
    }

    #[test]
    fn test_overlapping_subscriptions_notify_with_narrowed_filter() {
        let (registry, sinks) = registry_with(&["A", "B"]);
        let topics = Arc::new(Mutex::new(vec![continuous("A,B")]));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_mock = Arc::clone(&seen);
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .returning(move |_, filter: &AcquisitionFilter, _| {
                seen_in_mock
                    .lock()
                    .unwrap()
                    .push(filter.channel_name_filter.clone());
            });

        let mut reconciler =
            Reconciler::new(SERVICE, registry, source(topics), Arc::new(notifier));
        reconciler.reconcile(false);
        sinks[0].process_bulk(&[1.0], &[]);
        sinks[1].process_bulk(&[2.0], &[]);
        reconciler.reconcile(false);

        assert_eq!(*seen.lock().unwrap(), vec!["A".to_string(), "B".to_string()]);
    }
}
