//! Test data builders for creating test objects

use digitizer_rs::acquisition::filter::params;
use digitizer_rs::broker::SubscriptionTopic;
use digitizer_rs::graph::tag::keys;
use digitizer_rs::graph::{StreamingBlock, Tag};

pub const SERVICE: &str = "/acquisition";

/// Builder for subscription topics addressed to the acquisition service
pub struct TopicBuilder {
    topic: SubscriptionTopic,
}

impl TopicBuilder {
    pub fn new(channels: &str) -> Self {
        Self {
            topic: SubscriptionTopic::new(SERVICE).with_param(params::CHANNEL_NAME, channels),
        }
    }

    pub fn mode(self, mode: &str) -> Self {
        self.param(params::ACQUISITION_MODE, mode)
    }

    pub fn trigger(self, name: &str) -> Self {
        self.param(params::TRIGGER_NAME, name)
    }

    pub fn pre_post(self, pre: usize, post: usize) -> Self {
        self.param(params::PRE_SAMPLES, &pre.to_string())
            .param(params::POST_SAMPLES, &post.to_string())
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.topic = self.topic.with_param(key, value);
        self
    }

    pub fn build(self) -> SubscriptionTopic {
        self.topic
    }
}

/// Builder for sample blocks with tags
pub struct BlockBuilder {
    block: StreamingBlock,
}

impl BlockBuilder {
    /// Block of `len` samples counting up from `start`
    pub fn ramp(start: usize, len: usize) -> Self {
        Self {
            block: StreamingBlock {
                samples: (start..start + len).map(|i| i as f32).collect(),
                tags: Vec::new(),
            },
        }
    }

    pub fn metadata(mut self, name: &str, unit: &str) -> Self {
        self.block.tags.push(
            Tag::new(0)
                .with(keys::SIGNAL_NAME, name)
                .with(keys::SIGNAL_UNIT, unit),
        );
        self
    }

    pub fn trigger_at(mut self, index: usize, name: &str) -> Self {
        self.block
            .tags
            .push(Tag::new(index).with(keys::TRIGGER_NAME, name));
        self
    }

    pub fn build(self) -> StreamingBlock {
        self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_builder() {
        let topic = TopicBuilder::new("A,B")
            .mode("triggered")
            .trigger("T1")
            .pre_post(10, 20)
            .build();

        assert_eq!(topic.path, SERVICE);
        assert_eq!(topic.params[params::CHANNEL_NAME], "A,B");
        assert_eq!(topic.params[params::PRE_SAMPLES], "10");
    }

    #[test]
    fn test_block_builder() {
        let block = BlockBuilder::ramp(5, 3).trigger_at(1, "T1").build();
        assert_eq!(block.samples, vec![5.0, 6.0, 7.0]);
        assert_eq!(block.tags[0].trigger_name(), Some("T1"));
    }
}
