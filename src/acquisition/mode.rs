//! Acquisition modes and their textual form.

use crate::error::{AcquisitionError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a subscription wants its data delivered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Every sample, as a continuous stream of blocks
    #[default]
    Continuous,
    /// Captures of pre/post samples around each matching trigger
    Triggered,
    /// Captures spanning from one matching trigger to the next
    Multiplexed,
    /// A single sample taken a fixed delay after each matching trigger
    Snapshot,
}

impl AcquisitionMode {
    pub const ALL: [AcquisitionMode; 4] = [
        AcquisitionMode::Continuous,
        AcquisitionMode::Triggered,
        AcquisitionMode::Multiplexed,
        AcquisitionMode::Snapshot,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AcquisitionMode::Continuous => "continuous",
            AcquisitionMode::Triggered => "triggered",
            AcquisitionMode::Multiplexed => "multiplexed",
            AcquisitionMode::Snapshot => "snapshot",
        }
    }

    /// Whether this mode produces discrete captures rather than a stream.
    pub fn is_dataset(self) -> bool {
        !matches!(self, AcquisitionMode::Continuous)
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionMode {
    type Err = AcquisitionError;

    fn from_str(s: &str) -> Result<Self> {
        AcquisitionMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                AcquisitionError::InvalidArgument(format!("unknown acquisition mode '{}'", s))
            })
    }
}

/// Parse an acquisition mode. Matching is exact and case-sensitive.
pub fn parse_mode(text: &str) -> Result<AcquisitionMode> {
    text.parse()
}
