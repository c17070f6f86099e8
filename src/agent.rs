//! Metrics agent and aggregators.
//!
//! The agent is an active object multiplexing all metric producers into one
//! input channel and demultiplexing flushed batches to every configured
//! output:
//!
//! ```text
//! P            Output
//!   \         /
//! P -> Agent > -- Output
//!   /         \
//! P            Output
//! ```
//!
//! Metrics gather in a buffer that is flushed when full or when the flush
//! interval elapses, whichever comes first. Aggregators are smaller active
//! objects that fold raw increments or gauge updates into one metric per
//! flush interval; each owns its state exclusively and is driven purely by
//! messages on its typed input channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metric::Metric;
use crate::output::Output;

/// Capacity of the agent input channel.
const AGENT_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of each aggregator input channel.
const AGGREGATOR_CHANNEL_CAPACITY: usize = 64;

/// Metrics agent: buffers incoming metrics and fans batches out to sinks.
pub struct Agent {
    buffer_size: usize,
    flush_interval: Duration,
    input: mpsc::Sender<Metric>,
    rx: mpsc::Receiver<Metric>,
    outputs: Vec<Arc<dyn Output>>,
}

impl Agent {
    /// Create an agent with the given buffer size and flush interval.
    pub fn new(buffer_size: usize, flush_interval: Duration) -> Self {
        let (input, rx) = mpsc::channel(AGENT_CHANNEL_CAPACITY);

        Self {
            buffer_size: buffer_size.max(1),
            flush_interval,
            input,
            rx,
            outputs: Vec::new(),
        }
    }

    /// A producer handle on the agent input channel.
    pub fn input(&self) -> mpsc::Sender<Metric> {
        self.input.clone()
    }

    /// Register an output sink. Sinks are connected when the agent starts.
    pub fn add_output(&mut self, output: Arc<dyn Output>) {
        self.outputs.push(output);
    }

    /// Run until the token is cancelled, then flush what remains.
    pub async fn run(mut self, token: CancellationToken) {
        info!(
            buffer_size = self.buffer_size,
            flush_interval = ?self.flush_interval,
            outputs = self.outputs.len(),
            "metrics agent starting"
        );

        self.connect_outputs().await;

        let mut buffer: Vec<Metric> = Vec::with_capacity(self.buffer_size);
        let mut timer = tokio::time::interval(self.flush_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval is immediate.
        timer.tick().await;

        loop {
            tokio::select! {
                received = self.rx.recv() => {
                    match received {
                        Some(metric) => {
                            buffer.push(metric);
                            if buffer.len() >= self.buffer_size {
                                self.flush(&mut buffer);
                                timer.reset();
                            }
                        }
                        None => {
                            self.flush(&mut buffer);
                            return;
                        }
                    }
                }
                _ = timer.tick() => {
                    self.flush(&mut buffer);
                }
                _ = token.cancelled() => {
                    debug!("metrics agent shutting down");
                    self.flush(&mut buffer);
                    return;
                }
            }
        }
    }

    async fn connect_outputs(&self) {
        for output in &self.outputs {
            match output.connect().await {
                Ok(()) => info!(output = output.name(), "connected to metrics output"),
                Err(e) => warn!(output = output.name(), error = %e, "failed to connect to metrics output"),
            }
        }
    }

    /// Hand a stable copy of the buffer to every sink and clear the buffer,
    /// keeping its capacity for the next round. Sinks run on their own
    /// tasks and are not awaited; one slow or failing sink cannot hold the
    /// agent or its peers back.
    fn flush(&self, buffer: &mut Vec<Metric>) {
        if buffer.is_empty() {
            return;
        }

        let batch = std::mem::replace(buffer, Vec::with_capacity(self.buffer_size));
        debug!(len = batch.len(), "flushing metrics");

        for output in &self.outputs {
            let output = Arc::clone(output);
            let batch = batch.clone();
            tokio::spawn(async move {
                if let Err(e) = output.write(batch).await {
                    warn!(output = output.name(), error = %e, "metrics output write failed");
                }
            });
        }
    }
}

/// Handle for incrementing a counter aggregator.
#[derive(Clone)]
pub struct CounterHandle {
    tx: mpsc::Sender<i64>,
}

impl CounterHandle {
    /// Add `delta` to the counter. A send on the aggregator channel, so
    /// concurrent callers serialize in its task.
    pub async fn inc(&self, delta: i64) {
        let _ = self.tx.send(delta).await;
    }
}

/// Accumulates integer increments and emits one counter metric per flush
/// interval.
pub struct AggregatorCounter {
    name: String,
    rx: mpsc::Receiver<i64>,
    agent_input: mpsc::Sender<Metric>,
    reset: bool,
    total: i64,
}

impl AggregatorCounter {
    /// Create a counter aggregator feeding the agent input channel. With
    /// `reset`, the total restarts at zero after each emission.
    pub fn new(agent_input: mpsc::Sender<Metric>, name: &str, reset: bool) -> (Self, CounterHandle) {
        let (tx, rx) = mpsc::channel(AGGREGATOR_CHANNEL_CAPACITY);

        (
            Self {
                name: name.to_string(),
                rx,
                agent_input,
                reset,
                total: 0,
            },
            CounterHandle { tx },
        )
    }

    /// Run until the token is cancelled, emitting one aggregate per interval.
    pub async fn run(mut self, flush_interval: Duration, token: CancellationToken) {
        let mut timer = tokio::time::interval(flush_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timer.tick().await;

        loop {
            tokio::select! {
                received = self.rx.recv() => {
                    match received {
                        Some(delta) => self.total += delta,
                        None => {
                            self.emit().await;
                            return;
                        }
                    }
                }
                _ = timer.tick() => {
                    self.emit().await;
                }
                _ = token.cancelled() => {
                    self.emit().await;
                    return;
                }
            }
        }
    }

    async fn emit(&mut self) {
        let _ = self
            .agent_input
            .send(Metric::counter(self.name.as_str(), self.total))
            .await;
        if self.reset {
            self.total = 0;
        }
    }
}

/// Handle for updating a gauge aggregator.
#[derive(Clone)]
pub struct GaugeHandle {
    tx: mpsc::Sender<f64>,
}

impl GaugeHandle {
    /// Record a new gauge value. The most recent value wins at flush time.
    pub async fn update(&self, value: f64) {
        let _ = self.tx.send(value).await;
    }
}

/// Retains the most-recent gauge value and emits it once per flush interval.
pub struct AggregatorGauge {
    name: String,
    rx: mpsc::Receiver<f64>,
    agent_input: mpsc::Sender<Metric>,
    reset: bool,
    value: f64,
}

impl AggregatorGauge {
    /// Create a gauge aggregator feeding the agent input channel. With
    /// `reset`, the value restarts at zero after each emission.
    pub fn new(agent_input: mpsc::Sender<Metric>, name: &str, reset: bool) -> (Self, GaugeHandle) {
        let (tx, rx) = mpsc::channel(AGGREGATOR_CHANNEL_CAPACITY);

        (
            Self {
                name: name.to_string(),
                rx,
                agent_input,
                reset,
                value: 0.0,
            },
            GaugeHandle { tx },
        )
    }

    /// Run until the token is cancelled, emitting one gauge per interval.
    pub async fn run(mut self, flush_interval: Duration, token: CancellationToken) {
        let mut timer = tokio::time::interval(flush_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timer.tick().await;

        loop {
            tokio::select! {
                received = self.rx.recv() => {
                    match received {
                        Some(value) => self.value = value,
                        None => {
                            self.emit().await;
                            return;
                        }
                    }
                }
                _ = timer.tick() => {
                    self.emit().await;
                }
                _ = token.cancelled() => {
                    self.emit().await;
                    return;
                }
            }
        }
    }

    async fn emit(&mut self) {
        let _ = self
            .agent_input
            .send(Metric::gauge(self.name.as_str(), self.value))
            .await;
        if self.reset {
            self.value = 0.0;
        }
    }
}

enum AggregatorHandle {
    Counter(CounterHandle),
    Gauge(GaugeHandle),
}

/// Registry of named aggregators, lazily spawning the right variant on
/// first use. Lookups after creation return the same instance.
#[derive(Clone)]
pub struct MetricsService {
    agent_input: mpsc::Sender<Metric>,
    flush_interval: Duration,
    aggregators: Arc<Mutex<HashMap<String, AggregatorHandle>>>,
    token: CancellationToken,
}

impl MetricsService {
    /// Create a service whose aggregators feed `agent_input` and stop with
    /// `token`.
    pub fn new(
        agent_input: mpsc::Sender<Metric>,
        flush_interval: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            agent_input,
            flush_interval,
            aggregators: Arc::new(Mutex::new(HashMap::new())),
            token,
        }
    }

    /// The counter aggregator named `name`, created on first use.
    pub fn counter(&self, name: &str) -> CounterHandle {
        let mut aggregators = self.aggregators.lock();

        match aggregators.get(name) {
            Some(AggregatorHandle::Counter(handle)) => handle.clone(),
            Some(AggregatorHandle::Gauge(_)) => {
                warn!(name, "metric already registered as a gauge");
                disconnected_counter()
            }
            None => {
                let (aggregator, handle) =
                    AggregatorCounter::new(self.agent_input.clone(), name, false);
                tokio::spawn(aggregator.run(self.flush_interval, self.token.clone()));
                aggregators.insert(name.to_string(), AggregatorHandle::Counter(handle.clone()));
                handle
            }
        }
    }

    /// The gauge aggregator named `name`, created on first use.
    pub fn gauge(&self, name: &str) -> GaugeHandle {
        let mut aggregators = self.aggregators.lock();

        match aggregators.get(name) {
            Some(AggregatorHandle::Gauge(handle)) => handle.clone(),
            Some(AggregatorHandle::Counter(_)) => {
                warn!(name, "metric already registered as a counter");
                disconnected_gauge()
            }
            None => {
                let (aggregator, handle) =
                    AggregatorGauge::new(self.agent_input.clone(), name, false);
                tokio::spawn(aggregator.run(self.flush_interval, self.token.clone()));
                aggregators.insert(name.to_string(), AggregatorHandle::Gauge(handle.clone()));
                handle
            }
        }
    }
}

fn disconnected_counter() -> CounterHandle {
    let (tx, _) = mpsc::channel(1);
    CounterHandle { tx }
}

fn disconnected_gauge() -> GaugeHandle {
    let (tx, _) = mpsc::channel(1);
    GaugeHandle { tx }
}
