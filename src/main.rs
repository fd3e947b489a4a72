//! Acquisition demo - Main Entry Point
//!
//! Runs a signal generator graph under an acquisition worker, subscribes a
//! continuous and a triggered client, swaps the graph once and shuts down.

use anyhow::Context;
use digitizer_rs::{
    acquisition::{filter::params, AcquisitionWorker, WorkerEvent},
    broker::{Broker, SubscriptionHandle, SubscriptionTopic},
    config::{default_config_path, AppConfig},
    graph::{InMemorySinkRegistry, SignalGeneratorGraph},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,digitizer_rs=debug"));

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let prefix = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "digitizer.log".to_string());
            let appender = tracing_appender::rolling::daily(dir, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn log_received(name: &str, handle: &SubscriptionHandle) -> usize {
    let replies = handle.drain();
    for acq in &replies {
        tracing::debug!(
            "[{}] {} '{}' ({}): {} samples",
            name,
            acq.acq_trigger_name,
            acq.channel_name,
            acq.channel_unit,
            acq.len()
        );
    }
    replies.len()
}

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(default_config_path);
    let config = match &config_path {
        Some(path) => AppConfig::load_or_default(path),
        None => AppConfig::default(),
    };
    let _log_guard = init_logging(&config);
    tracing::info!("Starting acquisition demo (config: {:?})", config_path);

    let registry = Arc::new(InMemorySinkRegistry::with_capacity(
        config.worker.poller_capacity(),
    ));
    let broker = Broker::new(config.worker.subscriber_capacity);
    let service = config.worker.service_path.clone();

    let worker = AcquisitionWorker::with_broker(config.worker.clone(), registry.clone(), &broker)
        .spawn()
        .context("Failed to spawn acquisition worker")?;

    worker.set_graph(Box::new(SignalGeneratorGraph::new(
        "generators",
        config.generators.clone(),
        registry.clone(),
    )));

    let channels = config
        .generators
        .iter()
        .map(|g| g.signal_name.as_str())
        .collect::<Vec<_>>()
        .join(",");
    let continuous = broker.subscribe_topic(
        SubscriptionTopic::new(service.as_str()).with_param(params::CHANNEL_NAME, channels.as_str()),
    );

    let mut triggered_topic = SubscriptionTopic::new(service.as_str())
        .with_param(params::ACQUISITION_MODE, "triggered")
        .with_param(params::PRE_SAMPLES, "50")
        .with_param(params::POST_SAMPLES, "100");
    if let Some(first) = config.generators.first() {
        triggered_topic = triggered_topic
            .with_param(params::CHANNEL_NAME, first.signal_name.as_str())
            .with_param(params::TRIGGER_NAME, first.trigger_name.as_str());
    }
    let triggered = broker.subscribe_topic(triggered_topic);

    let run_time = config.run_time();
    let started = Instant::now();
    let mut swapped = false;
    let mut totals = (0usize, 0usize);

    while started.elapsed() < run_time {
        std::thread::sleep(Duration::from_millis(100));
        totals.0 += log_received("continuous", &continuous);
        totals.1 += log_received("triggered", &triggered);

        if !swapped && started.elapsed() >= run_time / 2 {
            tracing::info!("Swapping in a fresh generator graph");
            worker.set_graph(Box::new(SignalGeneratorGraph::new(
                "generators-2",
                config.generators.clone(),
                registry.clone(),
            )));
            swapped = true;
        }

        for event in worker.events().try_iter() {
            match event {
                WorkerEvent::Failed(message) => anyhow::bail!("Worker failed: {}", message),
                other => tracing::debug!("Worker event: {:?}", other),
            }
        }
    }

    let stats = worker.stats();
    worker.shutdown().context("Worker terminated with an error")?;
    totals.0 += log_received("continuous", &continuous);
    totals.1 += log_received("triggered", &triggered);

    tracing::info!(
        "Done: {} continuous and {} triggered acquisitions, {} graphs, {} passes",
        totals.0,
        totals.1,
        stats.graph_generation,
        stats.reconcile.passes
    );
    Ok(())
}
