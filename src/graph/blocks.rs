//! Ready-made graphs.
//!
//! - [`SignalGeneratorGraph`] - function generators wired to one sink each
//! - [`ReplayGraph`] - replays recorded blocks into a sink

use crate::graph::dataset::SignalDescriptor;
use crate::graph::poller::StreamingBlock;
use crate::graph::scheduler::{FlowGraph, WorkStatus};
use crate::graph::sink::{DataSink, InMemorySinkRegistry, SinkBlock};
use crate::graph::tag::{keys, Tag};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Instant;

/// Waveform produced by a signal generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Ramp,
}

impl Waveform {
    /// Value in [-1, 1] at `phase` (in cycles).
    fn sample(self, phase: f64) -> f64 {
        let frac = phase.fract();
        match self {
            Waveform::Sine => (TAU * frac).sin(),
            Waveform::Square => {
                if frac < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Ramp => 2.0 * frac - 1.0,
        }
    }
}

/// Configuration of one generated signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalGeneratorConfig {
    pub signal_name: String,
    pub unit: String,
    pub waveform: Waveform,
    pub amplitude: f32,
    pub offset: f32,
    /// Signal frequency in Hz
    pub frequency: f32,
    /// Sample rate in Hz
    pub sample_rate: f32,
    /// Samples produced per `work()` call
    pub chunk_size: usize,
    /// Emit a trigger tag every N samples
    pub trigger_every: Option<u64>,
    /// `trigger_name` carried by generated trigger tags
    pub trigger_name: String,
    /// Finish after this many samples
    pub sample_limit: Option<u64>,
    /// Pace output to the sample rate instead of producing as fast as possible
    pub realtime: bool,
}

impl Default for SignalGeneratorConfig {
    fn default() -> Self {
        Self {
            signal_name: "sine".to_string(),
            unit: "V".to_string(),
            waveform: Waveform::Sine,
            amplitude: 1.0,
            offset: 0.0,
            frequency: 10.0,
            sample_rate: 1000.0,
            chunk_size: 100,
            trigger_every: Some(1000),
            trigger_name: "CMD_TRIGGER".to_string(),
            sample_limit: None,
            realtime: true,
        }
    }
}

impl SignalGeneratorConfig {
    pub fn new(signal_name: impl Into<String>) -> Self {
        Self {
            signal_name: signal_name.into(),
            ..Default::default()
        }
    }

    fn descriptor(&self) -> SignalDescriptor {
        SignalDescriptor::new(
            self.signal_name.clone(),
            self.unit.clone(),
            self.offset - self.amplitude.abs(),
            self.offset + self.amplitude.abs(),
        )
    }
}

struct Generator {
    config: SignalGeneratorConfig,
    sink: SinkBlock,
    position: u64,
}

impl Generator {
    fn metadata_tag(&self) -> Tag {
        let descriptor = self.sink.sink().descriptor();
        Tag::new(0)
            .with(keys::SIGNAL_NAME, descriptor.name.as_str())
            .with(keys::SIGNAL_UNIT, descriptor.unit.as_str())
            .with(keys::SIGNAL_MIN, descriptor.min)
            .with(keys::SIGNAL_MAX, descriptor.max)
            .with(keys::SAMPLE_RATE, self.config.sample_rate)
    }

    /// Produce the next chunk. Returns false once the sample limit is reached.
    fn produce(&mut self, max_samples: u64) -> bool {
        let remaining = self
            .config
            .sample_limit
            .map_or(u64::MAX, |limit| limit.saturating_sub(self.position));
        let n = (self.config.chunk_size as u64).min(remaining).min(max_samples) as usize;
        if n == 0 {
            return remaining > 0;
        }

        let mut tags = Vec::new();
        if self.position == 0 {
            tags.push(self.metadata_tag());
        }

        let rate = f64::from(self.config.sample_rate.max(f32::MIN_POSITIVE));
        let freq = f64::from(self.config.frequency);
        let mut samples = Vec::with_capacity(n);
        for i in 0..n {
            let pos = self.position + i as u64;
            if let Some(every) = self.config.trigger_every.filter(|&e| e > 0) {
                if pos % every == 0 {
                    tags.push(
                        Tag::new(i)
                            .with(keys::TRIGGER_NAME, self.config.trigger_name.as_str())
                            .with(keys::TRIGGER_TIME, pos as f64 / rate),
                    );
                }
            }
            let value = self.config.waveform.sample(freq * pos as f64 / rate);
            samples.push(self.config.offset + self.config.amplitude * value as f32);
        }

        self.sink.process_bulk(&samples, &tags);
        self.position += n as u64;
        remaining > n as u64
    }
}

/// Function generators, each feeding its own sink.
pub struct SignalGeneratorGraph {
    name: String,
    registry: Arc<InMemorySinkRegistry>,
    generators: Vec<Generator>,
    started_at: Option<Instant>,
}

impl SignalGeneratorGraph {
    pub fn new(
        name: impl Into<String>,
        configs: Vec<SignalGeneratorConfig>,
        registry: Arc<InMemorySinkRegistry>,
    ) -> Self {
        let generators = configs
            .into_iter()
            .map(|config| {
                let sink = Arc::new(DataSink::new(config.descriptor(), config.sample_rate));
                Generator {
                    config,
                    sink: SinkBlock::new(sink),
                    position: 0,
                }
            })
            .collect();
        Self {
            name: name.into(),
            registry,
            generators,
            started_at: None,
        }
    }

    pub fn signal_names(&self) -> Vec<&str> {
        self.generators
            .iter()
            .map(|g| g.config.signal_name.as_str())
            .collect()
    }
}

impl FlowGraph for SignalGeneratorGraph {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_start(&mut self) {
        for generator in &self.generators {
            self.registry.register(Arc::clone(generator.sink.sink()));
        }
    }

    fn work(&mut self) -> WorkStatus {
        let started_at = *self.started_at.get_or_insert_with(Instant::now);
        let elapsed = started_at.elapsed().as_secs_f64();

        let mut produced = false;
        let mut active = false;
        for generator in &mut self.generators {
            let budget = if generator.config.realtime {
                let due = (elapsed * f64::from(generator.config.sample_rate)) as u64;
                due.saturating_sub(generator.position)
            } else {
                u64::MAX
            };
            let before = generator.position;
            let more = generator.produce(budget);
            produced |= generator.position > before;
            active |= more;
        }

        if !active {
            WorkStatus::Done
        } else if produced {
            WorkStatus::Ok
        } else {
            WorkStatus::Idle
        }
    }

    fn stop(&mut self) {
        for generator in &self.generators {
            generator.sink.stop();
        }
    }
}

/// Replays a fixed list of blocks into one sink.
///
/// With `wait_for_pollers`, replay starts only once at least one poller is
/// attached to the sink, so no block is published before anyone listens.
pub struct ReplayGraph {
    name: String,
    registry: Arc<InMemorySinkRegistry>,
    sink: SinkBlock,
    blocks: VecDeque<StreamingBlock>,
    wait_for_pollers: bool,
    finish_when_exhausted: bool,
}

impl ReplayGraph {
    pub fn new(
        descriptor: SignalDescriptor,
        sample_rate: f32,
        blocks: Vec<StreamingBlock>,
        registry: Arc<InMemorySinkRegistry>,
    ) -> Self {
        let name = format!("replay:{}", descriptor.name);
        Self {
            name,
            registry,
            sink: SinkBlock::new(Arc::new(DataSink::new(descriptor, sample_rate))),
            blocks: blocks.into(),
            wait_for_pollers: false,
            finish_when_exhausted: false,
        }
    }

    /// Hold replay until a poller is attached.
    pub fn wait_for_pollers(mut self) -> Self {
        self.wait_for_pollers = true;
        self
    }

    /// Report [`WorkStatus::Done`] after the last block instead of idling.
    pub fn finish_when_exhausted(mut self) -> Self {
        self.finish_when_exhausted = true;
        self
    }

    pub fn sink(&self) -> &Arc<DataSink> {
        self.sink.sink()
    }
}

impl FlowGraph for ReplayGraph {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_start(&mut self) {
        self.registry.register(Arc::clone(self.sink.sink()));
    }

    fn work(&mut self) -> WorkStatus {
        if self.wait_for_pollers && self.sink.sink().poller_count() == 0 {
            return WorkStatus::Idle;
        }
        match self.blocks.pop_front() {
            Some(block) => {
                self.sink.process_bulk(&block.samples, &block.tags);
                WorkStatus::Ok
            }
            None if self.finish_when_exhausted => WorkStatus::Done,
            None => WorkStatus::Idle,
        }
    }

    fn stop(&mut self) {
        self.sink.stop();
    }
}
