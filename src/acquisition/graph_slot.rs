//! Hand-off slot for replacement graphs.

use crate::graph::scheduler::FlowGraph;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Single pending graph, shared between the API and the lifecycle thread.
///
/// Setting a graph overwrites any graph still pending; the lifecycle thread
/// takes it at most once per tick.
#[derive(Default)]
pub struct GraphSlot {
    pending: Mutex<Option<Box<dyn FlowGraph>>>,
}

impl GraphSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `graph`. Returns `true` if an unconsumed graph was discarded.
    pub fn set(&self, graph: Box<dyn FlowGraph>) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let replaced = pending.replace(graph);
        if let Some(old) = &replaced {
            tracing::debug!("Discarding pending graph '{}'", old.name());
        }
        replaced.is_some()
    }

    /// Take the pending graph, leaving the slot empty.
    pub fn take(&self) -> Option<Box<dyn FlowGraph>> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl fmt::Debug for GraphSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphSlot")
            .field("pending", &self.is_pending())
            .finish()
    }
}
