//! Acquisition worker: turns active subscriptions into pollers and pollers
//! into notifications.
//!
//! - [`mode`] / [`poller_key`] / [`filter`] - Subscription parsing and poller identity
//! - [`entry`] / [`handlers`] - Poller table entries and their drain logic
//! - [`reconcile`] - One reconciliation pass over both tables
//! - [`graph_slot`] / [`worker`] - Graph hand-off and the lifecycle thread

pub mod entry;
pub mod filter;
pub mod graph_slot;
pub mod handlers;
pub mod mode;
pub mod poller_key;
pub mod reconcile;
pub mod worker;

pub use entry::{DataSetPollerEntry, StreamingPollerEntry};
pub use filter::AcquisitionFilter;
pub use graph_slot::GraphSlot;
pub use handlers::{handle_dataset, handle_streaming};
pub use mode::{parse_mode, AcquisitionMode};
pub use poller_key::PollerKey;
pub use reconcile::{ReconcileStats, Reconciler};
pub use worker::{AcquisitionWorker, WorkerEvent, WorkerHandle, WorkerState, WorkerStats};
