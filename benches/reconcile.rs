//! Benchmarks for reconciliation passes
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use digitizer_rs::acquisition::filter::params;
use digitizer_rs::acquisition::{AcquisitionFilter, Reconciler};
use digitizer_rs::broker::{Notifier, SubscriptionSource, SubscriptionTopic};
use digitizer_rs::graph::tag::keys;
use digitizer_rs::graph::{DataSink, InMemorySinkRegistry, SignalDescriptor, Tag};
use digitizer_rs::Acquisition;
use std::sync::Arc;

const SERVICE: &str = "/acquisition";

struct FixedSubscriptions(Vec<SubscriptionTopic>);

impl SubscriptionSource for FixedSubscriptions {
    fn active_subscriptions(&self) -> Vec<SubscriptionTopic> {
        self.0.clone()
    }
}

struct DiscardNotifier;

impl Notifier for DiscardNotifier {
    fn notify(&self, _service: &str, _filter: &AcquisitionFilter, reply: Acquisition) {
        black_box(reply);
    }
}

/// Registry with `signals` sinks and one continuous plus one triggered
/// subscription per signal.
fn setup(signals: usize) -> (Reconciler, Vec<Arc<DataSink>>) {
    let registry = Arc::new(InMemorySinkRegistry::new());
    let mut topics = Vec::new();
    let mut sinks = Vec::new();

    for i in 0..signals {
        let name = format!("signal_{}", i);
        let sink = Arc::new(DataSink::new(
            SignalDescriptor::new(name.as_str(), "V", -1.0, 1.0),
            10_000.0,
        ));
        registry.register(sink.clone());
        sinks.push(sink);

        topics.push(SubscriptionTopic::new(SERVICE).with_param(params::CHANNEL_NAME, name.as_str()));
        topics.push(
            SubscriptionTopic::new(SERVICE)
                .with_param(params::ACQUISITION_MODE, "triggered")
                .with_param(params::CHANNEL_NAME, name.as_str())
                .with_param(params::TRIGGER_NAME, "T")
                .with_param(params::PRE_SAMPLES, "16")
                .with_param(params::POST_SAMPLES, "64"),
        );
    }

    let mut reconciler = Reconciler::new(
        SERVICE,
        registry,
        Arc::new(FixedSubscriptions(topics)),
        Arc::new(DiscardNotifier),
    );
    reconciler.reconcile(false);
    (reconciler, sinks)
}

fn bench_idle_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_idle");

    for signals in [1, 16, 128].iter() {
        let (mut reconciler, _sinks) = setup(*signals);
        group.bench_with_input(BenchmarkId::new("pass", signals), signals, |b, _| {
            b.iter(|| black_box(reconciler.reconcile(false)))
        });
    }

    group.finish();
}

fn bench_loaded_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_loaded");
    let samples: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.01).sin()).collect();
    let tags = vec![
        Tag::new(0).with(keys::SIGNAL_UNIT, "V"),
        Tag::new(512).with(keys::TRIGGER_NAME, "T"),
    ];

    for signals in [1, 16].iter() {
        let (mut reconciler, sinks) = setup(*signals);
        group.throughput(Throughput::Elements((*signals * samples.len()) as u64));
        group.bench_with_input(BenchmarkId::new("pass", signals), signals, |b, _| {
            b.iter(|| {
                for sink in &sinks {
                    sink.process_bulk(&samples, &tags);
                }
                black_box(reconciler.reconcile(false))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_idle_pass, bench_loaded_pass);
criterion_main!(benches);
