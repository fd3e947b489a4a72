//! Drain pollers into acquisition replies.

use crate::acquisition::entry::{DataSetPollerEntry, StreamingPollerEntry};
use crate::graph::dataset::DataSet;
use crate::graph::poller::DEFAULT_MAX_ITEMS;
use crate::types::{Acquisition, SignalMetadata, STREAMING_TRIGGER_NAME, UNKNOWN_UNIT};
use std::sync::Arc;

fn streaming_reply(metadata: &SignalMetadata, samples: &[f32]) -> Acquisition {
    Acquisition {
        acq_trigger_name: STREAMING_TRIGGER_NAME.to_string(),
        channel_name: metadata.name.clone(),
        channel_unit: metadata.unit.clone(),
        channel_range_min: metadata.min,
        channel_range_max: metadata.max,
        channel_value: samples.to_vec(),
        channel_error: vec![0.0; samples.len()],
        channel_time_since_ref_trigger: vec![0.0; samples.len()],
        acq_local_time_stamp: Acquisition::local_time_stamp(),
    }
}

fn dataset_reply(dataset: &DataSet, signal_name: &str) -> Acquisition {
    let (name, unit, min, max) = match dataset.descriptor() {
        Some(d) => (d.name.clone(), d.unit.clone(), d.min, d.max),
        None => (
            signal_name.to_string(),
            UNKNOWN_UNIT.to_string(),
            f32::MIN,
            f32::MAX,
        ),
    };
    let len = dataset.values.len();
    let mut errors = dataset.errors.clone();
    errors.resize(len, 0.0);

    Acquisition {
        acq_trigger_name: dataset.trigger_name().unwrap_or_default().to_string(),
        channel_name: name,
        channel_unit: unit,
        channel_range_min: min,
        channel_range_max: max,
        channel_value: dataset.values.clone(),
        channel_error: errors,
        channel_time_since_ref_trigger: vec![0.0; len],
        acq_local_time_stamp: Acquisition::local_time_stamp(),
    }
}

/// Drain every buffered block of a streaming poller, emitting one reply per
/// block.
///
/// Returns the poller's finished flag as observed *before* draining, so a
/// `true` result guarantees nothing was left behind.
pub fn handle_streaming<F>(entry: &mut StreamingPollerEntry, mut emit: F) -> bool
where
    F: FnMut(Acquisition),
{
    let poller = Arc::clone(entry.poller());
    let finished = poller.finished();
    while poller.process(
        |samples, tags| {
            entry.update_metadata(tags);
            emit(streaming_reply(entry.metadata(), samples));
        },
        DEFAULT_MAX_ITEMS,
    ) {}
    finished
}

/// Drain every buffered capture of a dataset poller, emitting one reply per
/// capture. Returns the pre-drain finished flag.
pub fn handle_dataset<F>(entry: &DataSetPollerEntry, mut emit: F) -> bool
where
    F: FnMut(Acquisition),
{
    let poller = entry.poller();
    let finished = poller.finished();
    while poller.process(
        |datasets| {
            for dataset in datasets {
                emit(dataset_reply(dataset, entry.signal_name()));
            }
        },
        DEFAULT_MAX_ITEMS,
    ) {}
    finished
}
