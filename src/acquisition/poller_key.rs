//! Composite identity of a resolved subscription.

use crate::acquisition::mode::AcquisitionMode;
use std::fmt;
use std::time::Duration;

/// Identifies one poller: subscriptions resolving to equal keys share it.
///
/// Ordering is field-wise in declaration order. Parameters that do not apply
/// to `mode` are always zero/empty, so they never split otherwise identical
/// subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PollerKey {
    pub mode: AcquisitionMode,
    pub signal_name: String,
    pub pre_samples: usize,
    pub post_samples: usize,
    pub maximum_window_size: usize,
    pub snapshot_delay: Duration,
    pub trigger_name: String,
}

impl PollerKey {
    /// Key for a continuous stream of `signal_name`.
    pub fn continuous(signal_name: impl Into<String>) -> Self {
        Self {
            mode: AcquisitionMode::Continuous,
            signal_name: signal_name.into(),
            pre_samples: 0,
            post_samples: 0,
            maximum_window_size: 0,
            snapshot_delay: Duration::ZERO,
            trigger_name: String::new(),
        }
    }

    pub fn triggered(
        signal_name: impl Into<String>,
        trigger_name: impl Into<String>,
        pre_samples: usize,
        post_samples: usize,
    ) -> Self {
        Self {
            mode: AcquisitionMode::Triggered,
            pre_samples,
            post_samples,
            trigger_name: trigger_name.into(),
            ..Self::continuous(signal_name)
        }
    }

    pub fn multiplexed(
        signal_name: impl Into<String>,
        trigger_name: impl Into<String>,
        maximum_window_size: usize,
    ) -> Self {
        Self {
            mode: AcquisitionMode::Multiplexed,
            maximum_window_size,
            trigger_name: trigger_name.into(),
            ..Self::continuous(signal_name)
        }
    }

    pub fn snapshot(
        signal_name: impl Into<String>,
        trigger_name: impl Into<String>,
        snapshot_delay: Duration,
    ) -> Self {
        Self {
            mode: AcquisitionMode::Snapshot,
            snapshot_delay,
            trigger_name: trigger_name.into(),
            ..Self::continuous(signal_name)
        }
    }
}

impl fmt::Display for PollerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.mode, self.signal_name)?;
        match self.mode {
            AcquisitionMode::Continuous => Ok(()),
            AcquisitionMode::Triggered => write!(
                f,
                "[trigger='{}', pre={}, post={}]",
                self.trigger_name, self.pre_samples, self.post_samples
            ),
            AcquisitionMode::Multiplexed => write!(
                f,
                "[trigger='{}', window={}]",
                self.trigger_name, self.maximum_window_size
            ),
            AcquisitionMode::Snapshot => write!(
                f,
                "[trigger='{}', delay={:?}]",
                self.trigger_name, self.snapshot_delay
            ),
        }
    }
}
