//! Graph execution on a dedicated thread.
//!
//! The [`Scheduler`] owns the execution thread of exactly one [`FlowGraph`].
//! Blocks are executed one after the other on that single thread: running
//! them on a pool reordered tag-adjacent sample delivery for trigger sinks.

use crate::error::{AcquisitionError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Outcome of one `work()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// Some data was produced; call again immediately.
    Ok,
    /// Nothing to do right now; the scheduler sleeps briefly.
    Idle,
    /// The graph has finished and will produce no more data.
    Done,
}

/// A runnable dataflow graph.
pub trait FlowGraph: Send + 'static {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Called once on the lifecycle thread before execution starts
    /// (e.g. to register sinks).
    fn on_start(&mut self) {}

    /// Run every block once.
    fn work(&mut self) -> WorkStatus;

    /// Called on the execution thread when execution ends, either on request
    /// or because `work()` returned [`WorkStatus::Done`].
    fn stop(&mut self);
}

/// Default sleep between idle `work()` calls.
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Clears the running flag even if the graph panics.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle to a graph running on its own execution thread.
#[derive(Debug)]
pub struct Scheduler {
    name: String,
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    /// Start `graph` on a new execution thread.
    pub fn start(mut graph: Box<dyn FlowGraph>, idle_sleep: Duration) -> Result<Self> {
        let name = graph.name().to_string();
        graph.on_start();

        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let thread_stop = Arc::clone(&stop);
        let guard = RunningGuard(Arc::clone(&running));

        let handle = std::thread::Builder::new()
            .name("acq-scheduler".to_string())
            .spawn(move || {
                let _guard = guard;
                while !thread_stop.load(Ordering::Acquire) {
                    match graph.work() {
                        WorkStatus::Ok => {}
                        WorkStatus::Idle => std::thread::sleep(idle_sleep),
                        WorkStatus::Done => {
                            tracing::info!("Graph '{}' finished", graph.name());
                            break;
                        }
                    }
                }
                graph.stop();
            })
            .map_err(|e| {
                AcquisitionError::Scheduler(format!("Failed to spawn execution thread: {}", e))
            })?;

        tracing::info!("Scheduler started for graph '{}'", name);
        Ok(Self {
            name,
            handle: Some(handle),
            stop,
            running,
        })
    }

    /// Name of the graph being executed.
    pub fn graph_name(&self) -> &str {
        &self.name
    }

    /// Whether the execution thread is still processing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the execution thread to stop after its current `work()` call.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Wait for the execution thread to exit.
    ///
    /// Callers drain every poller fed by the graph before joining.
    pub fn join(mut self) -> Result<()> {
        self.request_stop();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                AcquisitionError::Scheduler(format!("Graph '{}' panicked", self.name))
            }),
            None => Ok(()),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}
