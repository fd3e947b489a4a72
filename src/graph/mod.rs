//! Dataflow side of the acquisition engine
//!
//! A [`FlowGraph`] runs on its own execution thread under a [`Scheduler`] and
//! pushes sample blocks into [`DataSink`]s. Consumers attach pollers to the
//! sinks through a [`SinkRegistry`]:
//!
//! - [`tag`] - Key/value tags attached to sample positions
//! - [`dataset`] - Discrete captures produced by dataset pollers
//! - [`poller`] - Bounded, lossy poller queues
//! - [`sink`] - Sinks, capture observers and the in-memory registry
//! - [`scheduler`] - Graph execution thread
//! - [`blocks`] - Ready-made graphs (signal generator, replay)

pub mod blocks;
pub mod dataset;
pub mod poller;
pub mod scheduler;
pub mod sink;
pub mod tag;

pub use blocks::{ReplayGraph, SignalGeneratorConfig, SignalGeneratorGraph, Waveform};
pub use dataset::{DataSet, SignalDescriptor, TimingEvent};
pub use poller::{
    trigger_name_matcher, DataSetPoller, Poller, StreamingBlock, StreamingPoller, TriggerMatcher,
};
pub use scheduler::{FlowGraph, Scheduler, WorkStatus};
pub use sink::{
    DataSink, InMemorySinkRegistry, PollerCapacity, SinkBlock, SinkQuery, SinkRegistry,
    DEFAULT_MAXIMUM_WINDOW_SIZE,
};
pub use tag::{PropertyValue, Tag};
