//! Core data types shared across the acquisition engine
//!
//! - [`Acquisition`] - Reply payload published to subscribers
//! - [`SignalMetadata`] - Cached name/unit/range of a signal

use serde::{Deserialize, Serialize};

/// Trigger name used for replies produced by continuous (streaming) pollers
pub const STREAMING_TRIGGER_NAME: &str = "STREAMING";

/// Unit reported when neither tags nor capture descriptors carry one
pub const UNKNOWN_UNIT: &str = "N/A";

/// Acquisition record published to subscribers.
///
/// Field names on the wire follow the messaging layer's reflection contract
/// (`acqTriggerName`, `channelUnit`, ...).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Acquisition {
    /// Name of the trigger that produced this record (`STREAMING` for continuous mode)
    pub acq_trigger_name: String,
    /// Channel (signal) name
    pub channel_name: String,
    /// Physical unit of the channel values
    pub channel_unit: String,
    /// Lower bound of the channel's value range
    pub channel_range_min: f32,
    /// Upper bound of the channel's value range
    pub channel_range_max: f32,
    /// Sample values
    pub channel_value: Vec<f32>,
    /// Per-sample errors
    pub channel_error: Vec<f32>,
    /// Time base relative to the reference trigger, one entry per sample
    pub channel_time_since_ref_trigger: Vec<f32>,
    /// Local time the record was assembled (nanoseconds since the Unix epoch)
    pub acq_local_time_stamp: i64,
}

impl Acquisition {
    /// Number of samples carried by this record
    pub fn len(&self) -> usize {
        self.channel_value.len()
    }

    /// Whether this record carries no samples
    pub fn is_empty(&self) -> bool {
        self.channel_value.is_empty()
    }

    /// Current wall-clock time in nanoseconds since the Unix epoch
    pub fn local_time_stamp() -> i64 {
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    }
}

/// Name, unit and value range of a signal as last reported by its tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMetadata {
    pub name: String,
    pub unit: String,
    pub min: f32,
    pub max: f32,
}

impl SignalMetadata {
    /// Metadata for a signal that has not reported anything yet
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unit: UNKNOWN_UNIT.to_string(),
            min: f32::MIN,
            max: f32::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquisition_wire_names() {
        let acq = Acquisition {
            acq_trigger_name: STREAMING_TRIGGER_NAME.to_string(),
            channel_name: "A".to_string(),
            channel_unit: "V".to_string(),
            channel_value: vec![1.0, 2.0],
            ..Default::default()
        };

        let json = serde_json::to_value(&acq).unwrap();
        assert_eq!(json["acqTriggerName"], "STREAMING");
        assert_eq!(json["channelUnit"], "V");
        assert_eq!(json["channelValue"].as_array().unwrap().len(), 2);
        assert!(json.get("channelTimeSinceRefTrigger").is_some());
    }

    #[test]
    fn test_unknown_metadata() {
        let meta = SignalMetadata::unknown("sig");
        assert_eq!(meta.name, "sig");
        assert_eq!(meta.unit, UNKNOWN_UNIT);
        assert!(meta.min < meta.max);
    }

    #[test]
    fn test_local_time_stamp_is_positive() {
        assert!(Acquisition::local_time_stamp() > 0);
    }
}
