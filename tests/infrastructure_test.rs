//! Test to verify test infrastructure works correctly

mod common;

use common::builders::{BlockBuilder, TopicBuilder, SERVICE};
use common::mock_helpers::{RecordingNotifier, StaticSubscriptions};
use digitizer_rs::acquisition::AcquisitionFilter;
use digitizer_rs::broker::{Notifier, SubscriptionSource};
use digitizer_rs::Acquisition;

#[test]
fn test_infrastructure_setup() {
    let topic = TopicBuilder::new("A").mode("snapshot").trigger("T").build();
    let filter = AcquisitionFilter::from_params(&topic.params).unwrap();
    assert_eq!(filter.acquisition_mode.as_str(), "snapshot");
    assert_eq!(filter.trigger_name_filter, "T");

    let block = BlockBuilder::ramp(0, 4).metadata("A", "V").build();
    assert_eq!(block.samples.len(), 4);
    assert_eq!(block.tags.len(), 1);
}

#[test]
fn test_recording_collaborators() {
    let subscriptions = StaticSubscriptions::new(vec![TopicBuilder::new("A").build()]);
    assert_eq!(subscriptions.active_subscriptions().len(), 1);
    subscriptions.set(Vec::new());
    assert!(subscriptions.active_subscriptions().is_empty());

    let notifier = RecordingNotifier::default();
    notifier.notify(SERVICE, &AcquisitionFilter::continuous("A"), Acquisition::default());
    assert_eq!(notifier.len(), 1);
    assert_eq!(notifier.take().len(), 1);
    assert_eq!(notifier.len(), 0);
}
