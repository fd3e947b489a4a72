//! Stream tags: sparse key/value annotations attached to sample indices.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known tag keys.
pub mod keys {
    pub const SIGNAL_NAME: &str = "signal_name";
    pub const SIGNAL_UNIT: &str = "signal_unit";
    pub const SIGNAL_MIN: &str = "signal_min";
    pub const SIGNAL_MAX: &str = "signal_max";
    pub const SAMPLE_RATE: &str = "sample_rate";
    pub const TRIGGER_NAME: &str = "trigger_name";
    pub const TRIGGER_TIME: &str = "trigger_time";
}

/// A single tag property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<f32> for PropertyValue {
    fn from(v: f32) -> Self {
        PropertyValue::Float(f64::from(v))
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

/// A tag attached to the sample at `index` (relative to the block it travels with).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Tag {
    pub index: usize,
    pub map: BTreeMap<String, PropertyValue>,
}

impl Tag {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            map: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.map.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.map.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(PropertyValue::as_f64)
    }

    /// The `trigger_name` carried by this tag, if any.
    pub fn trigger_name(&self) -> Option<&str> {
        self.get_str(keys::TRIGGER_NAME)
    }

    /// Same tag shifted to a different sample index.
    pub fn at(&self, index: usize) -> Self {
        Self {
            index,
            map: self.map.clone(),
        }
    }
}
