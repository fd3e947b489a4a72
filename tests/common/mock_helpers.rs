//! Hand-written collaborators for integration tests

use digitizer_rs::acquisition::AcquisitionFilter;
use digitizer_rs::broker::{Notifier, SubscriptionSource, SubscriptionTopic};
use digitizer_rs::Acquisition;
use std::sync::{Arc, Mutex};

/// Subscription source whose topic list tests edit between passes
#[derive(Default, Clone)]
pub struct StaticSubscriptions {
    topics: Arc<Mutex<Vec<SubscriptionTopic>>>,
}

impl StaticSubscriptions {
    pub fn new(topics: Vec<SubscriptionTopic>) -> Self {
        Self {
            topics: Arc::new(Mutex::new(topics)),
        }
    }

    pub fn set(&self, topics: Vec<SubscriptionTopic>) {
        *self.topics.lock().unwrap() = topics;
    }
}

impl SubscriptionSource for StaticSubscriptions {
    fn active_subscriptions(&self) -> Vec<SubscriptionTopic> {
        self.topics.lock().unwrap().clone()
    }
}

/// Notifier that records every (filter, reply) pair
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    records: Arc<Mutex<Vec<(AcquisitionFilter, Acquisition)>>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<(AcquisitionFilter, Acquisition)> {
        std::mem::take(&mut *self.records.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, _service: &str, filter: &AcquisitionFilter, reply: Acquisition) {
        self.records.lock().unwrap().push((filter.clone(), reply));
    }
}
