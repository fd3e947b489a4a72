//! Discrete captures produced by triggered, multiplexed and snapshot sinks.

use crate::graph::tag::Tag;
use serde::{Deserialize, Serialize};

/// Name, unit and range of one captured signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDescriptor {
    pub name: String,
    pub unit: String,
    pub min: f32,
    pub max: f32,
}

impl SignalDescriptor {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, min: f32, max: f32) -> Self {
        Self {
            name: name.into(),
            unit: unit.into(),
            min,
            max,
        }
    }
}

/// A tag that occurred inside a capture, positioned relative to the capture start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingEvent {
    pub index: usize,
    pub tag: Tag,
}

/// One discrete capture of sample data around a trigger.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataSet {
    pub signals: Vec<SignalDescriptor>,
    pub values: Vec<f32>,
    pub errors: Vec<f32>,
    pub timing_events: Vec<TimingEvent>,
}

impl DataSet {
    /// The trigger name of the first timing event, if any.
    pub fn trigger_name(&self) -> Option<&str> {
        self.timing_events.first().and_then(|ev| ev.tag.trigger_name())
    }

    /// Descriptor of the first captured signal, if any.
    pub fn descriptor(&self) -> Option<&SignalDescriptor> {
        self.signals.first()
    }
}
