//! Data sinks and the sink registry.
//!
//! A [`DataSink`] is the graph endpoint for one signal. The running graph
//! pushes (samples, tags) blocks into it from the execution thread; the sink
//! fans each block out to the pollers attached to it:
//!
//! - **streaming** pollers receive every block as-is
//! - **trigger** pollers receive a capture of `pre + post` samples around each
//!   matching tag
//! - **multiplexed** pollers receive one capture per matching tag, ending at
//!   the next matching tag or after `maximum_window_size` samples
//!   ([`DEFAULT_MAXIMUM_WINDOW_SIZE`] when zero)
//! - **snapshot** pollers receive a single sample taken `delay` after each
//!   matching tag
//!
//! Pollers are requested through the [`SinkRegistry`] trait, which the
//! acquisition worker receives at construction time.

use crate::error::{AcquisitionError, Result};
use crate::graph::dataset::{DataSet, SignalDescriptor, TimingEvent};
use crate::graph::poller::{
    DataSetPoller, Poller, PollerWriter, StreamingBlock, StreamingPoller, TriggerMatcher,
};
use crate::graph::tag::Tag;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

/// Default capacity of a streaming poller queue (blocks).
pub const DEFAULT_STREAMING_CAPACITY: usize = 1024;

/// Default capacity of a dataset poller queue (captures).
pub const DEFAULT_DATASET_CAPACITY: usize = 64;

/// Window cap of a multiplexed poller requested with a zero window size.
pub const DEFAULT_MAXIMUM_WINDOW_SIZE: usize = 65_536;

/// Selects the sink a poller attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SinkQuery {
    pub signal_name: String,
}

impl SinkQuery {
    pub fn signal_name(name: impl Into<String>) -> Self {
        Self {
            signal_name: name.into(),
        }
    }
}

/// Source of pollers, keyed by signal name.
///
/// All methods fail with [`AcquisitionError::UnknownSignal`] when no sink
/// matches the query.
pub trait SinkRegistry: Send + Sync {
    fn streaming_poller(&self, query: &SinkQuery) -> Result<Arc<StreamingPoller>>;

    fn trigger_poller(
        &self,
        query: &SinkQuery,
        matcher: TriggerMatcher,
        pre_samples: usize,
        post_samples: usize,
    ) -> Result<Arc<DataSetPoller>>;

    fn snapshot_poller(
        &self,
        query: &SinkQuery,
        matcher: TriggerMatcher,
        delay: Duration,
    ) -> Result<Arc<DataSetPoller>>;

    fn multiplexed_poller(
        &self,
        query: &SinkQuery,
        matcher: TriggerMatcher,
        maximum_window_size: usize,
    ) -> Result<Arc<DataSetPoller>>;
}

// ── Capture observers ──

struct TriggerWindow {
    values: Vec<f32>,
    remaining: usize,
    trigger: TimingEvent,
}

struct TriggerObserver {
    matcher: TriggerMatcher,
    pre_samples: usize,
    post_samples: usize,
    history: VecDeque<f32>,
    windows: Vec<TriggerWindow>,
    writer: PollerWriter<DataSet>,
}

impl TriggerObserver {
    fn on_sample(&mut self, value: f32, tags: &[&Tag], descriptor: &SignalDescriptor) {
        for &tag in tags {
            if !(self.matcher)(tag) {
                continue;
            }
            let values: Vec<f32> = self.history.iter().copied().collect();
            let index = values.len();
            self.windows.push(TriggerWindow {
                values,
                remaining: self.post_samples,
                trigger: TimingEvent {
                    index,
                    tag: tag.at(index),
                },
            });
        }

        for window in &mut self.windows {
            if window.remaining > 0 {
                window.values.push(value);
                window.remaining -= 1;
            }
        }

        let (done, open): (Vec<_>, Vec<_>) =
            self.windows.drain(..).partition(|w| w.remaining == 0);
        self.windows = open;
        for window in done {
            self.writer
                .publish(capture(descriptor, window.values, vec![window.trigger]));
        }

        if self.pre_samples > 0 {
            if self.history.len() == self.pre_samples {
                self.history.pop_front();
            }
            self.history.push_back(value);
        }
    }
}

struct MultiplexedObserver {
    matcher: TriggerMatcher,
    maximum_window_size: usize,
    current: Option<(Vec<f32>, TimingEvent)>,
    writer: PollerWriter<DataSet>,
}

impl MultiplexedObserver {
    fn on_sample(&mut self, value: f32, tags: &[&Tag], descriptor: &SignalDescriptor) {
        if let Some(tag) = tags.iter().copied().find(|&t| (self.matcher)(t)) {
            if let Some((values, event)) = self.current.take() {
                self.writer.publish(capture(descriptor, values, vec![event]));
            }
            self.current = Some((
                Vec::new(),
                TimingEvent {
                    index: 0,
                    tag: tag.at(0),
                },
            ));
        }

        let window_full = match &mut self.current {
            Some((values, _)) => {
                values.push(value);
                values.len() >= self.maximum_window_size
            }
            None => false,
        };
        if window_full {
            if let Some((values, event)) = self.current.take() {
                self.writer.publish(capture(descriptor, values, vec![event]));
            }
        }
    }
}

struct SnapshotObserver {
    matcher: TriggerMatcher,
    delay_samples: u64,
    pending: Vec<(u64, Tag)>,
    writer: PollerWriter<DataSet>,
}

impl SnapshotObserver {
    fn on_sample(&mut self, value: f32, tags: &[&Tag], descriptor: &SignalDescriptor) {
        for &tag in tags {
            if (self.matcher)(tag) {
                self.pending.push((self.delay_samples, tag.at(0)));
            }
        }

        let mut still_pending = Vec::with_capacity(self.pending.len());
        for (countdown, tag) in self.pending.drain(..) {
            if countdown == 0 {
                let event = TimingEvent { index: 0, tag };
                self.writer.publish(capture(descriptor, vec![value], vec![event]));
            } else {
                still_pending.push((countdown - 1, tag));
            }
        }
        self.pending = still_pending;
    }
}

fn capture(descriptor: &SignalDescriptor, values: Vec<f32>, events: Vec<TimingEvent>) -> DataSet {
    let errors = vec![0.0; values.len()];
    DataSet {
        signals: vec![descriptor.clone()],
        values,
        errors,
        timing_events: events,
    }
}

// ── Data sink ──

#[derive(Default)]
struct SinkInner {
    streaming: Vec<PollerWriter<StreamingBlock>>,
    triggered: Vec<TriggerObserver>,
    multiplexed: Vec<MultiplexedObserver>,
    snapshot: Vec<SnapshotObserver>,
    stopped: bool,
    samples_seen: u64,
}

impl SinkInner {
    fn prune_released(&mut self) {
        self.streaming.retain(|w| !w.is_released());
        self.triggered.retain(|o| !o.writer.is_released());
        self.multiplexed.retain(|o| !o.writer.is_released());
        self.snapshot.retain(|o| !o.writer.is_released());
    }

    fn poller_count(&self) -> usize {
        self.streaming.len() + self.triggered.len() + self.multiplexed.len() + self.snapshot.len()
    }
}

/// Graph endpoint capturing one signal for external consumption.
pub struct DataSink {
    descriptor: SignalDescriptor,
    sample_rate: f32,
    inner: Mutex<SinkInner>,
}

impl std::fmt::Debug for DataSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSink")
            .field("signal", &self.descriptor.name)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl DataSink {
    pub fn new(descriptor: SignalDescriptor, sample_rate: f32) -> Self {
        Self {
            descriptor,
            sample_rate,
            inner: Mutex::new(SinkInner::default()),
        }
    }

    pub fn signal_name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &SignalDescriptor {
        &self.descriptor
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn lock(&self) -> MutexGuard<'_, SinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push one block of samples; tag indices are relative to `samples`.
    pub fn process_bulk(&self, samples: &[f32], tags: &[Tag]) {
        let mut inner = self.lock();
        if inner.stopped {
            return;
        }
        inner.prune_released();
        inner.samples_seen += samples.len() as u64;

        for writer in &inner.streaming {
            writer.publish(StreamingBlock {
                samples: samples.to_vec(),
                tags: tags.to_vec(),
            });
        }

        if inner.triggered.is_empty() && inner.multiplexed.is_empty() && inner.snapshot.is_empty()
        {
            return;
        }

        let (mut ordered, outside): (Vec<&Tag>, Vec<&Tag>) =
            tags.iter().partition(|t| t.index < samples.len());
        if !outside.is_empty() {
            tracing::warn!(
                "Sink '{}': {} tag(s) beyond a block of {} samples ignored by capture pollers",
                self.descriptor.name,
                outside.len(),
                samples.len()
            );
        }
        ordered.sort_by_key(|t| t.index);

        let SinkInner {
            triggered,
            multiplexed,
            snapshot,
            ..
        } = &mut *inner;
        let mut cursor = 0;
        for (i, &value) in samples.iter().enumerate() {
            let start = cursor;
            while cursor < ordered.len() && ordered[cursor].index == i {
                cursor += 1;
            }
            let at_sample = &ordered[start..cursor];
            for observer in triggered.iter_mut() {
                observer.on_sample(value, at_sample, &self.descriptor);
            }
            for observer in multiplexed.iter_mut() {
                observer.on_sample(value, at_sample, &self.descriptor);
            }
            for observer in snapshot.iter_mut() {
                observer.on_sample(value, at_sample, &self.descriptor);
            }
        }
    }

    /// Stop the sink: every attached poller is marked finished and open
    /// capture windows are discarded. Idempotent.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.stopped {
            return;
        }
        inner.stopped = true;
        for writer in &inner.streaming {
            writer.finish();
        }
        for observer in &inner.triggered {
            observer.writer.finish();
        }
        for observer in &inner.multiplexed {
            observer.writer.finish();
        }
        for observer in &inner.snapshot {
            observer.writer.finish();
        }
        tracing::debug!(
            "Sink '{}' stopped after {} samples",
            self.descriptor.name,
            inner.samples_seen
        );
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    /// Number of pollers still attached (released ones are pruned first).
    pub fn poller_count(&self) -> usize {
        let mut inner = self.lock();
        inner.prune_released();
        inner.poller_count()
    }

    /// Pollers attached to a stopped sink start out finished.
    fn attach<T>(inner: &SinkInner, capacity: usize) -> (PollerWriter<T>, Arc<Poller<T>>) {
        let (writer, poller) = Poller::channel(capacity);
        if inner.stopped {
            writer.finish();
        }
        (writer, poller)
    }

    pub fn streaming_poller(&self, capacity: usize) -> Arc<StreamingPoller> {
        let mut inner = self.lock();
        let (writer, poller) = Self::attach(&inner, capacity);
        inner.streaming.push(writer);
        poller
    }

    /// Fails with `InvalidArgument` when the window would be empty.
    pub fn trigger_poller(
        &self,
        matcher: TriggerMatcher,
        pre_samples: usize,
        post_samples: usize,
        capacity: usize,
    ) -> Result<Arc<DataSetPoller>> {
        if pre_samples + post_samples == 0 {
            return Err(AcquisitionError::InvalidArgument(format!(
                "trigger window on '{}' needs pre or post samples",
                self.descriptor.name
            )));
        }
        let mut inner = self.lock();
        let (writer, poller) = Self::attach(&inner, capacity);
        inner.triggered.push(TriggerObserver {
            matcher,
            pre_samples,
            post_samples,
            history: VecDeque::with_capacity(pre_samples),
            windows: Vec::new(),
            writer,
        });
        Ok(poller)
    }

    /// A zero `maximum_window_size` selects [`DEFAULT_MAXIMUM_WINDOW_SIZE`].
    pub fn multiplexed_poller(
        &self,
        matcher: TriggerMatcher,
        maximum_window_size: usize,
        capacity: usize,
    ) -> Arc<DataSetPoller> {
        let maximum_window_size = match maximum_window_size {
            0 => DEFAULT_MAXIMUM_WINDOW_SIZE,
            n => n,
        };
        let mut inner = self.lock();
        let (writer, poller) = Self::attach(&inner, capacity);
        inner.multiplexed.push(MultiplexedObserver {
            matcher,
            maximum_window_size,
            current: None,
            writer,
        });
        poller
    }

    pub fn snapshot_poller(
        &self,
        matcher: TriggerMatcher,
        delay: Duration,
        capacity: usize,
    ) -> Arc<DataSetPoller> {
        let delay_samples = (delay.as_secs_f64() * f64::from(self.sample_rate)).round() as u64;
        let mut inner = self.lock();
        let (writer, poller) = Self::attach(&inner, capacity);
        inner.snapshot.push(SnapshotObserver {
            matcher,
            delay_samples,
            pending: Vec::new(),
            writer,
        });
        poller
    }
}

/// Graph-side handle to a sink. Dropping it stops the sink, so pollers are
/// released even when the owning graph unwinds.
#[derive(Debug)]
pub struct SinkBlock {
    sink: Arc<DataSink>,
}

impl SinkBlock {
    pub fn new(sink: Arc<DataSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &Arc<DataSink> {
        &self.sink
    }

    pub fn process_bulk(&self, samples: &[f32], tags: &[Tag]) {
        self.sink.process_bulk(samples, tags);
    }

    pub fn stop(&self) {
        self.sink.stop();
    }
}

impl Drop for SinkBlock {
    fn drop(&mut self) {
        self.sink.stop();
    }
}

// ── In-memory registry ──

/// Queue capacities applied to pollers created through a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerCapacity {
    pub streaming: usize,
    pub dataset: usize,
}

impl Default for PollerCapacity {
    fn default() -> Self {
        Self {
            streaming: DEFAULT_STREAMING_CAPACITY,
            dataset: DEFAULT_DATASET_CAPACITY,
        }
    }
}

/// Process-local sink registry. Graphs register their sinks when they start;
/// registering a sink under an existing name replaces the previous one.
#[derive(Debug, Default)]
pub struct InMemorySinkRegistry {
    sinks: RwLock<HashMap<String, Arc<DataSink>>>,
    capacity: PollerCapacity,
}

impl InMemorySinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: PollerCapacity) -> Self {
        Self {
            sinks: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn register(&self, sink: Arc<DataSink>) {
        let name = sink.signal_name().to_string();
        let previous = self
            .sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), sink);
        if previous.is_some() {
            tracing::debug!("Replaced sink '{}'", name);
        } else {
            tracing::debug!("Registered sink '{}'", name);
        }
    }

    pub fn unregister(&self, signal_name: &str) -> Option<Arc<DataSink>> {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(signal_name)
    }

    pub fn sink(&self, signal_name: &str) -> Option<Arc<DataSink>> {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(signal_name)
            .cloned()
    }

    pub fn signal_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn resolve(&self, query: &SinkQuery) -> Result<Arc<DataSink>> {
        self.sink(&query.signal_name)
            .ok_or_else(|| AcquisitionError::UnknownSignal(query.signal_name.clone()))
    }
}

impl SinkRegistry for InMemorySinkRegistry {
    fn streaming_poller(&self, query: &SinkQuery) -> Result<Arc<StreamingPoller>> {
        Ok(self.resolve(query)?.streaming_poller(self.capacity.streaming))
    }

    fn trigger_poller(
        &self,
        query: &SinkQuery,
        matcher: TriggerMatcher,
        pre_samples: usize,
        post_samples: usize,
    ) -> Result<Arc<DataSetPoller>> {
        self.resolve(query)?
            .trigger_poller(matcher, pre_samples, post_samples, self.capacity.dataset)
    }

    fn snapshot_poller(
        &self,
        query: &SinkQuery,
        matcher: TriggerMatcher,
        delay: Duration,
    ) -> Result<Arc<DataSetPoller>> {
        Ok(self
            .resolve(query)?
            .snapshot_poller(matcher, delay, self.capacity.dataset))
    }

    fn multiplexed_poller(
        &self,
        query: &SinkQuery,
        matcher: TriggerMatcher,
        maximum_window_size: usize,
    ) -> Result<Arc<DataSetPoller>> {
        Ok(self
            .resolve(query)?
            .multiplexed_poller(matcher, maximum_window_size, self.capacity.dataset))
    }
}
