//! Pull-based poller handles.
//!
//! A poller is the consumer end of a bounded, lossy queue fed by a
//! [`DataSink`](crate::graph::sink::DataSink). The sink keeps a
//! [`PollerWriter`] for every poller it feeds; once the consumer drops its
//! last `Arc<Poller>`, the sink prunes the writer on its next publish.
//!
//! Delivery is lossy under backpressure: a full queue drops the new block and
//! counts it instead of stalling the producing graph.

use crate::graph::dataset::DataSet;
use crate::graph::tag::Tag;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Predicate deciding whether a tag starts a capture.
pub type TriggerMatcher = Arc<dyn Fn(&Tag) -> bool + Send + Sync>;

/// Matcher accepting tags whose `trigger_name` equals `name`, or any tag that
/// carries a `trigger_name` when `name` is empty.
pub fn trigger_name_matcher(name: &str) -> TriggerMatcher {
    let wanted = name.to_string();
    Arc::new(move |tag: &Tag| match tag.trigger_name() {
        Some(found) => wanted.is_empty() || found == wanted,
        None => false,
    })
}

/// A block of contiguous samples with the tags that fall inside it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamingBlock {
    pub samples: Vec<f32>,
    pub tags: Vec<Tag>,
}

/// Default upper bound of items handed out by one `process` call.
pub const DEFAULT_MAX_ITEMS: usize = 64;

#[derive(Debug, Default)]
struct PollerState {
    finished: AtomicBool,
    dropped: AtomicU64,
}

/// Consumer handle for one sink subscription.
#[derive(Debug)]
pub struct Poller<T> {
    rx: Receiver<T>,
    state: Arc<PollerState>,
}

/// Poller yielding continuous sample blocks.
pub type StreamingPoller = Poller<StreamingBlock>;

/// Poller yielding discrete captures.
pub type DataSetPoller = Poller<DataSet>;

impl<T> Poller<T> {
    /// Create a connected (writer, poller) pair with the given queue capacity.
    pub fn channel(capacity: usize) -> (PollerWriter<T>, Arc<Self>) {
        let (tx, rx) = bounded(capacity.max(1));
        let state = Arc::new(PollerState::default());
        let writer = PollerWriter {
            tx,
            state: Arc::clone(&state),
        };
        (writer, Arc::new(Self { rx, state }))
    }

    /// Whether the producing sink has stopped. Buffered items may remain.
    pub fn finished(&self) -> bool {
        self.state.finished.load(Ordering::Acquire)
    }

    /// Number of items dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Number of items currently buffered.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    fn take(&self, max_items: usize) -> Vec<T> {
        let mut items = Vec::new();
        while items.len() < max_items {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(_) => break,
            }
        }
        items
    }
}

impl Poller<StreamingBlock> {
    /// Invoke `f` once per buffered block, without blocking.
    ///
    /// Returns whether any block was processed.
    pub fn process<F>(&self, mut f: F, max_items: usize) -> bool
    where
        F: FnMut(&[f32], &[Tag]),
    {
        let blocks = self.take(max_items);
        for block in &blocks {
            f(&block.samples, &block.tags);
        }
        !blocks.is_empty()
    }
}

impl Poller<DataSet> {
    /// Invoke `f` with all buffered captures (up to `max_items`), without blocking.
    ///
    /// Returns whether any capture was processed.
    pub fn process<F>(&self, mut f: F, max_items: usize) -> bool
    where
        F: FnMut(&[DataSet]),
    {
        let datasets = self.take(max_items);
        if datasets.is_empty() {
            return false;
        }
        f(&datasets);
        true
    }
}

/// Producer end held by the sink.
#[derive(Debug)]
pub struct PollerWriter<T> {
    tx: Sender<T>,
    state: Arc<PollerState>,
}

impl<T> PollerWriter<T> {
    /// Queue an item, dropping it if the poller is full.
    pub fn publish(&self, item: T) {
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.state.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Mark the poller finished; no more items will follow.
    pub fn finish(&self) {
        self.state.finished.store(true, Ordering::Release);
    }

    /// Whether the consumer has dropped its poller handle.
    pub fn is_released(&self) -> bool {
        Arc::strong_count(&self.state) == 1
    }
}
