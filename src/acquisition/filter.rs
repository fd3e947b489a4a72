//! Typed filter context of an acquisition subscription.
//!
//! Subscriptions address the worker with a topic such as
//! `/acquisition?acquisitionModeFilter=triggered&channelNameFilter=A,B&triggerNameFilter=T1&preSamples=10&postSamples=20`.
//! [`AcquisitionFilter::from_params`] turns the query map into this struct.

use crate::acquisition::mode::{parse_mode, AcquisitionMode};
use crate::acquisition::poller_key::PollerKey;
use crate::error::{AcquisitionError, Result};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Query parameter names.
pub mod params {
    pub const ACQUISITION_MODE: &str = "acquisitionModeFilter";
    pub const CHANNEL_NAME: &str = "channelNameFilter";
    pub const TRIGGER_NAME: &str = "triggerNameFilter";
    pub const PRE_SAMPLES: &str = "preSamples";
    pub const POST_SAMPLES: &str = "postSamples";
    pub const MAXIMUM_WINDOW_SIZE: &str = "maximumWindowSize";
    /// Nanoseconds
    pub const SNAPSHOT_DELAY: &str = "snapshotDelay";
}

/// Filter context parsed from a subscription's query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AcquisitionFilter {
    pub acquisition_mode: AcquisitionMode,
    /// Comma-separated list of signal names
    pub channel_name_filter: String,
    /// Empty matches any trigger
    pub trigger_name_filter: String,
    pub pre_samples: usize,
    pub post_samples: usize,
    pub maximum_window_size: usize,
    pub snapshot_delay: Duration,
}

fn parse_number<T>(params: &BTreeMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match params.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AcquisitionError::Deserialization {
                key: key.to_string(),
                message: format!("'{}': {}", raw, e),
            }),
    }
}

impl AcquisitionFilter {
    /// Continuous filter over the given channel list.
    pub fn continuous(channels: impl Into<String>) -> Self {
        Self {
            channel_name_filter: channels.into(),
            ..Default::default()
        }
    }

    /// Parse query parameters. Missing keys take their defaults
    /// (`continuous`, empty names, zero counts); unknown keys are ignored.
    /// A triggered filter must ask for at least one pre or post sample.
    pub fn from_params(params: &BTreeMap<String, String>) -> Result<Self> {
        let acquisition_mode = match params.get(params::ACQUISITION_MODE) {
            Some(text) => parse_mode(text)?,
            None => AcquisitionMode::default(),
        };

        let snapshot_delay = parse_number::<u64>(params, params::SNAPSHOT_DELAY)?
            .map(Duration::from_nanos)
            .unwrap_or_default();

        let filter = Self {
            acquisition_mode,
            channel_name_filter: params
                .get(params::CHANNEL_NAME)
                .cloned()
                .unwrap_or_default(),
            trigger_name_filter: params
                .get(params::TRIGGER_NAME)
                .cloned()
                .unwrap_or_default(),
            pre_samples: parse_number(params, params::PRE_SAMPLES)?.unwrap_or_default(),
            post_samples: parse_number(params, params::POST_SAMPLES)?.unwrap_or_default(),
            maximum_window_size: parse_number(params, params::MAXIMUM_WINDOW_SIZE)?
                .unwrap_or_default(),
            snapshot_delay,
        };

        if filter.acquisition_mode == AcquisitionMode::Triggered
            && filter.pre_samples + filter.post_samples == 0
        {
            return Err(AcquisitionError::InvalidArgument(format!(
                "triggered acquisition needs {} or {}",
                params::PRE_SAMPLES,
                params::POST_SAMPLES
            )));
        }
        Ok(filter)
    }

    /// Serialize back to query parameters, omitting defaults.
    pub fn to_params(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert(
            params::ACQUISITION_MODE.to_string(),
            self.acquisition_mode.to_string(),
        );
        if !self.channel_name_filter.is_empty() {
            out.insert(
                params::CHANNEL_NAME.to_string(),
                self.channel_name_filter.clone(),
            );
        }
        if !self.trigger_name_filter.is_empty() {
            out.insert(
                params::TRIGGER_NAME.to_string(),
                self.trigger_name_filter.clone(),
            );
        }
        let numbers = [
            (params::PRE_SAMPLES, self.pre_samples as u128),
            (params::POST_SAMPLES, self.post_samples as u128),
            (params::MAXIMUM_WINDOW_SIZE, self.maximum_window_size as u128),
            (params::SNAPSHOT_DELAY, self.snapshot_delay.as_nanos()),
        ];
        for (key, value) in numbers {
            if value != 0 {
                out.insert(key.to_string(), value.to_string());
            }
        }
        out
    }

    /// Signal names in the channel filter, trimmed, empty entries skipped.
    pub fn channel_names(&self) -> impl Iterator<Item = &str> {
        self.channel_name_filter
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// The same filter narrowed to a single channel.
    pub fn for_channel(&self, signal_name: &str) -> Self {
        Self {
            channel_name_filter: signal_name.to_string(),
            ..self.clone()
        }
    }

    /// Poller key for `signal_name` under this filter. Parameters that do not
    /// apply to the acquisition mode are left out.
    pub fn poller_key(&self, signal_name: &str) -> PollerKey {
        let trigger = self.trigger_name_filter.as_str();
        match self.acquisition_mode {
            AcquisitionMode::Continuous => PollerKey::continuous(signal_name),
            AcquisitionMode::Triggered => {
                PollerKey::triggered(signal_name, trigger, self.pre_samples, self.post_samples)
            }
            AcquisitionMode::Multiplexed => {
                PollerKey::multiplexed(signal_name, trigger, self.maximum_window_size)
            }
            AcquisitionMode::Snapshot => {
                PollerKey::snapshot(signal_name, trigger, self.snapshot_delay)
            }
        }
    }

    /// Whether a notification addressed to `notification` (a single-channel
    /// filter) belongs to a subscriber holding this filter: the subscriber
    /// lists the channel and resolves it to the same poller key.
    pub fn accepts(&self, notification: &AcquisitionFilter) -> bool {
        let mut channels = notification.channel_names();
        let (Some(channel), None) = (channels.next(), channels.next()) else {
            return false;
        };
        self.channel_names().any(|name| name == channel)
            && self.poller_key(channel) == notification.poller_key(channel)
    }
}
