//! Acquisition worker lifecycle thread
//!
//! The worker owns the poller tables and at most one running graph. Every
//! tick it runs one reconciliation pass; when the graph has to go (a
//! replacement arrived, a stop was requested or the graph finished on its
//! own) it drains:
//!
//! 1. ask the execution thread to stop
//! 2. run flush-only passes until every poller reports finished
//! 3. release all pollers
//! 4. join the execution thread
//!
//! The execution thread is never joined before step 2 completes, so every
//! sample the graph produced reaches the subscribers.
//!
//! # States
//!
//! ```text
//!            graph                 replacement / stop / done
//!   Idle ───────────► Running ─────────────────────────────► Draining
//!    ▲                   ▲                                      │
//!    │                   └──────────── ReplacingGraph ◄─────────┤ replacement
//!    └──────────────────────────────────────────────────────────┤ done
//!                                        ShuttingDown ◄─────────┘ stop
//! ```

use crate::acquisition::graph_slot::GraphSlot;
use crate::acquisition::reconcile::{ReconcileStats, Reconciler};
use crate::broker::{Broker, Notifier, SubscriptionSource};
use crate::config::WorkerConfig;
use crate::error::{AcquisitionError, Result, ResultExt};
use crate::graph::scheduler::{FlowGraph, Scheduler};
use crate::graph::sink::SinkRegistry;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Flush passes between "still draining" warnings.
const DRAIN_WARN_INTERVAL: u64 = 5000;

/// Lifecycle state of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum WorkerState {
    /// No graph
    #[default]
    Idle,
    /// A graph is executing; one reconciliation pass per tick
    Running,
    /// The graph was asked to stop; flushing pollers before the join
    Draining,
    /// Starting the replacement graph after a drain
    ReplacingGraph,
    /// Terminal
    ShuttingDown,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Idle => "idle",
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::ReplacingGraph => "replacing-graph",
            WorkerState::ShuttingDown => "shutting-down",
        };
        f.write_str(name)
    }
}

/// Notifications published by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    StateChanged { from: WorkerState, to: WorkerState },
    GraphStarted { generation: u64, name: String },
    /// Every poller of the graph reported finished after `passes` flush passes
    DrainCompleted { generation: u64, passes: u64 },
    /// The execution thread of the graph was joined
    GraphStopped { generation: u64 },
    /// The worker hit a fatal error and terminated
    Failed(String),
}

/// Snapshot of worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub ticks: u64,
    /// Number of graphs started so far
    pub graph_generation: u64,
    pub reconcile: ReconcileStats,
}

/// State observable from other threads.
#[derive(Debug, Default)]
struct WorkerShared {
    slot: GraphSlot,
    stop: AtomicBool,
    state: Mutex<WorkerState>,
    stats: Mutex<WorkerStats>,
}

impl WorkerShared {
    fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> WorkerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Deadline of the tick following one scheduled at `previous`.
///
/// Deadlines advance by exactly `period` from the previous deadline, never
/// from the time the tick finished, so processing time does not accumulate
/// as drift. A late loop runs its overdue ticks back to back.
pub fn next_deadline(previous: Instant, period: Duration) -> Instant {
    previous + period
}

/// Lifecycle owner of one acquisition service.
pub struct AcquisitionWorker {
    config: WorkerConfig,
    reconciler: Reconciler,
    shared: Arc<WorkerShared>,
    scheduler: Option<Scheduler>,
    state: WorkerState,
    generation: u64,
    ticks: u64,
    event_tx: Sender<WorkerEvent>,
    event_rx: Receiver<WorkerEvent>,
}

impl fmt::Debug for AcquisitionWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionWorker")
            .field("service", &self.config.service_path)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl AcquisitionWorker {
    pub fn new(
        config: WorkerConfig,
        registry: Arc<dyn SinkRegistry>,
        source: Arc<dyn SubscriptionSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (event_tx, event_rx) = bounded(config.event_capacity.max(1));
        let reconciler = Reconciler::new(config.service_path.clone(), registry, source, notifier);
        Self {
            config,
            reconciler,
            shared: Arc::new(WorkerShared::default()),
            scheduler: None,
            state: WorkerState::Idle,
            generation: 0,
            ticks: 0,
            event_tx,
            event_rx,
        }
    }

    /// Worker serving the subscriptions of `broker` and publishing through it.
    pub fn with_broker(
        config: WorkerConfig,
        registry: Arc<dyn SinkRegistry>,
        broker: &Broker,
    ) -> Self {
        Self::new(
            config,
            registry,
            Arc::new(broker.clone()),
            Arc::new(broker.clone()),
        )
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            ticks: self.ticks,
            graph_generation: self.generation,
            reconcile: self.reconciler.stats(),
        }
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Receiver of worker events. Events are dropped when nobody reads them.
    pub fn events(&self) -> Receiver<WorkerEvent> {
        self.event_rx.clone()
    }

    /// Queue a graph; it replaces the running one on the next tick.
    pub fn set_graph(&self, graph: Box<dyn FlowGraph>) -> bool {
        self.shared.slot.set(graph)
    }

    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    fn emit(&self, event: WorkerEvent) {
        if self.event_tx.try_send(event).is_err() {
            tracing::trace!("Worker event dropped");
        }
    }

    fn transition(&mut self, to: WorkerState) {
        let from = self.state;
        if from == to {
            return;
        }
        tracing::info!("Worker '{}': {} -> {}", self.config.service_path, from, to);
        self.state = to;
        // Counters first, so observers of the new state see matching stats
        self.publish_stats();
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner) = to;
        self.emit(WorkerEvent::StateChanged { from, to });
    }

    fn publish_stats(&self) {
        *self.shared.stats.lock().unwrap_or_else(PoisonError::into_inner) = self.stats();
    }

    /// Run one lifecycle step.
    ///
    /// Errors are fatal: the graph could not be started or its execution
    /// thread could not be joined.
    pub fn tick(&mut self) -> Result<()> {
        self.ticks += 1;
        let stop = self.shared.stop.load(Ordering::Acquire);

        match self.state {
            WorkerState::Idle => {
                if stop {
                    self.transition(WorkerState::ShuttingDown);
                } else if let Some(graph) = self.shared.slot.take() {
                    self.start_graph(graph)?;
                }
            }
            WorkerState::Running => {
                self.reconciler.reconcile(false);

                let replacement = if stop { None } else { self.shared.slot.take() };
                let completed = self
                    .scheduler
                    .as_ref()
                    .map_or(true, |scheduler| !scheduler.is_running());

                if stop || replacement.is_some() || completed {
                    if completed && !stop && replacement.is_none() {
                        tracing::info!("Graph generation {} completed on its own", self.generation);
                    }
                    self.drain_and_join()?;

                    if stop {
                        self.transition(WorkerState::ShuttingDown);
                    } else if let Some(graph) = replacement {
                        self.transition(WorkerState::ReplacingGraph);
                        self.start_graph(graph)?;
                    } else {
                        self.transition(WorkerState::Idle);
                    }
                }
            }
            // Transient states never persist across ticks
            WorkerState::Draining | WorkerState::ReplacingGraph => {}
            WorkerState::ShuttingDown => {}
        }

        self.publish_stats();
        Ok(())
    }

    fn start_graph(&mut self, graph: Box<dyn FlowGraph>) -> Result<()> {
        let name = graph.name().to_string();
        let scheduler = Scheduler::start(graph, self.config.scheduler_idle_sleep())
            .with_context(|| format!("Failed to start graph '{}'", name))?;

        self.generation += 1;
        self.scheduler = Some(scheduler);
        self.transition(WorkerState::Running);
        tracing::info!("Started graph '{}' (generation {})", name, self.generation);
        self.emit(WorkerEvent::GraphStarted {
            generation: self.generation,
            name,
        });
        Ok(())
    }

    /// Stop the running graph, flush every poller, then join.
    fn drain_and_join(&mut self) -> Result<()> {
        let Some(scheduler) = self.scheduler.take() else {
            return Ok(());
        };
        self.transition(WorkerState::Draining);
        scheduler.request_stop();

        let started = Instant::now();
        let mut passes = 0u64;
        loop {
            passes += 1;
            if self.reconciler.reconcile(true) {
                break;
            }
            if passes % DRAIN_WARN_INTERVAL == 0 {
                tracing::warn!(
                    "Still draining graph '{}' after {:?} ({} passes)",
                    scheduler.graph_name(),
                    started.elapsed(),
                    passes
                );
            }
            std::thread::sleep(self.config.drain_poll_interval());
        }
        self.reconciler.clear();
        tracing::debug!(
            "Drained graph '{}' in {} passes ({:?})",
            scheduler.graph_name(),
            passes,
            started.elapsed()
        );
        self.emit(WorkerEvent::DrainCompleted {
            generation: self.generation,
            passes,
        });

        scheduler.join()?;
        self.emit(WorkerEvent::GraphStopped {
            generation: self.generation,
        });
        Ok(())
    }

    /// Run the lifecycle loop until a stop is requested.
    pub fn run(&mut self) -> Result<()> {
        tracing::info!("Acquisition worker started on '{}'", self.config.service_path);
        let period = self.config.tick_period();
        let mut deadline = Instant::now();

        let result = loop {
            if let Err(e) = self.tick() {
                break Err(e);
            }
            if self.state == WorkerState::ShuttingDown {
                break Ok(());
            }

            deadline = next_deadline(deadline, period);
            if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                std::thread::sleep(remaining);
            }
        };

        if let Err(e) = &result {
            tracing::error!("Acquisition worker failed: {}", e);
            self.reconciler.clear();
            self.transition(WorkerState::ShuttingDown);
            self.emit(WorkerEvent::Failed(e.to_string()));
        }
        self.publish_stats();
        tracing::info!("Acquisition worker stopped");
        result
    }

    /// Move the worker onto its own lifecycle thread.
    pub fn spawn(mut self) -> Result<WorkerHandle> {
        let shared = Arc::clone(&self.shared);
        let events = self.events();
        let thread = std::thread::Builder::new()
            .name("acq-worker".to_string())
            .spawn(move || self.run())
            .map_err(|e| {
                AcquisitionError::Scheduler(format!("Failed to spawn worker thread: {}", e))
            })?;

        Ok(WorkerHandle {
            shared,
            events,
            thread: Some(thread),
        })
    }
}

/// Control handle of a spawned worker. Dropping it stops the worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shared: Arc<WorkerShared>,
    events: Receiver<WorkerEvent>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl WorkerHandle {
    /// Queue a graph (last write wins). Returns `true` if a graph that had
    /// not been picked up yet was discarded.
    pub fn set_graph(&self, graph: Box<dyn FlowGraph>) -> bool {
        self.shared.slot.set(graph)
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Counters as of the last completed tick.
    pub fn stats(&self) -> WorkerStats {
        self.shared.stats()
    }

    pub fn events(&self) -> &Receiver<WorkerEvent> {
        &self.events
    }

    pub fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the worker and wait for it, returning the lifecycle thread's result.
    pub fn shutdown(mut self) -> Result<()> {
        self.request_stop();
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                Err(AcquisitionError::Scheduler(
                    "Worker thread panicked".to_string(),
                ))
            }),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.request_stop();
            let _ = thread.join();
        }
    }
}
