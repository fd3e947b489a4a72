//! # digitizer-rs: acquisition worker for dataflow-graph data sinks
//!
//! Bridges a running signal-processing graph to publish/subscribe clients.
//! Clients subscribe to a service path with a filter (acquisition mode,
//! channel list, trigger name and mode parameters); the worker creates one
//! poller per distinct (mode, signal, parameters) combination, drains the
//! pollers periodically and notifies every matching subscriber.
//!
//! ## Architecture
//!
//! - **Acquisition**: Lifecycle thread owning the poller tables and the graph
//! - **Graph**: Execution thread, data sinks and their pollers
//! - **Broker**: In-process subscription source and notification fan-out
//! - **Communication**: Crossbeam channels between all threads
//!
//! ## Example
//!
//! ```ignore
//! use digitizer_rs::{
//!     acquisition::AcquisitionWorker,
//!     broker::Broker,
//!     config::WorkerConfig,
//!     graph::{InMemorySinkRegistry, SignalGeneratorConfig, SignalGeneratorGraph},
//! };
//! use std::sync::Arc;
//!
//! let registry = Arc::new(InMemorySinkRegistry::new());
//! let broker = Broker::new(1024);
//! let worker = AcquisitionWorker::with_broker(WorkerConfig::default(), registry.clone(), &broker)
//!     .spawn()?;
//!
//! let graph = SignalGeneratorGraph::new("demo", vec![SignalGeneratorConfig::new("A")], registry);
//! worker.set_graph(Box::new(graph));
//!
//! let client = broker.subscribe("/acquisition?channelNameFilter=A")?;
//! for acq in client.receiver().iter().take(10) {
//!     println!("{} samples in {}", acq.len(), acq.channel_unit);
//! }
//! worker.shutdown()?;
//! ```

pub mod acquisition;
pub mod broker;
pub mod config;
pub mod error;
pub mod graph;
pub mod types;

// Re-export commonly used types
pub use acquisition::{AcquisitionFilter, AcquisitionMode, AcquisitionWorker, WorkerHandle};
pub use broker::{Broker, SubscriptionHandle, SubscriptionTopic};
pub use config::{AppConfig, WorkerConfig};
pub use error::{AcquisitionError, Result};
pub use types::Acquisition;
