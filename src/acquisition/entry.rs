//! Poller table entries owned by the reconciliation loop.

use crate::acquisition::poller_key::PollerKey;
use crate::graph::poller::{DataSetPoller, StreamingPoller};
use crate::graph::tag::{keys, Tag};
use crate::types::SignalMetadata;
use std::sync::Arc;

/// Common liveness contract of the two poller tables.
pub(crate) trait PollerEntry {
    fn in_use(&self) -> bool;

    fn set_in_use(&mut self, in_use: bool);

    /// Drop the table's handle on the poller.
    fn release(self, key: &PollerKey);
}

/// Entry of the streaming table: a continuous poller plus the signal
/// metadata last reported by its tags.
#[derive(Debug)]
pub struct StreamingPollerEntry {
    poller: Arc<StreamingPoller>,
    in_use: bool,
    metadata: SignalMetadata,
}

impl StreamingPollerEntry {
    /// New entry for `signal_name`. Until a tag reports otherwise the
    /// metadata is the requested name, unit `N/A` and the full f32 range.
    pub fn new(poller: Arc<StreamingPoller>, signal_name: &str) -> Self {
        Self {
            poller,
            in_use: false,
            metadata: SignalMetadata::unknown(signal_name),
        }
    }

    pub fn poller(&self) -> &Arc<StreamingPoller> {
        &self.poller
    }

    pub fn metadata(&self) -> &SignalMetadata {
        &self.metadata
    }

    /// Overwrite cached metadata with whatever the tags carry. Later tags win.
    pub fn update_metadata(&mut self, tags: &[Tag]) {
        for tag in tags {
            if let Some(name) = tag.get_str(keys::SIGNAL_NAME).filter(|s| !s.is_empty()) {
                self.metadata.name = name.to_string();
            }
            if let Some(unit) = tag.get_str(keys::SIGNAL_UNIT).filter(|s| !s.is_empty()) {
                self.metadata.unit = unit.to_string();
            }
            if let Some(min) = tag.get_f64(keys::SIGNAL_MIN) {
                self.metadata.min = min as f32;
            }
            if let Some(max) = tag.get_f64(keys::SIGNAL_MAX) {
                self.metadata.max = max as f32;
            }
        }
    }
}

impl PollerEntry for StreamingPollerEntry {
    fn in_use(&self) -> bool {
        self.in_use
    }

    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    fn release(self, key: &PollerKey) {
        let dropped = self.poller.dropped();
        if dropped > 0 {
            tracing::warn!("Released poller {} after dropping {} blocks", key, dropped);
        } else {
            tracing::debug!("Released poller {}", key);
        }
    }
}

/// Entry of the dataset table (triggered, multiplexed and snapshot modes).
#[derive(Debug)]
pub struct DataSetPollerEntry {
    poller: Arc<DataSetPoller>,
    in_use: bool,
    signal_name: String,
}

impl DataSetPollerEntry {
    pub fn new(poller: Arc<DataSetPoller>, signal_name: &str) -> Self {
        Self {
            poller,
            in_use: false,
            signal_name: signal_name.to_string(),
        }
    }

    pub fn poller(&self) -> &Arc<DataSetPoller> {
        &self.poller
    }

    /// Signal name the poller was requested for.
    pub fn signal_name(&self) -> &str {
        &self.signal_name
    }
}

impl PollerEntry for DataSetPollerEntry {
    fn in_use(&self) -> bool {
        self.in_use
    }

    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    fn release(self, key: &PollerKey) {
        let dropped = self.poller.dropped();
        if dropped > 0 {
            tracing::warn!("Released poller {} after dropping {} captures", key, dropped);
        } else {
            tracing::debug!("Released poller {}", key);
        }
    }
}
