//! Metrics output sinks.

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::Error;
use crate::metric::{Metric, MetricValue};

/// A sink the metrics agent can fan batches out to.
#[async_trait]
pub trait Output: Send + Sync {
    /// Short sink identifier used in logs.
    fn name(&self) -> &'static str;

    /// Establish the sink connection. Called once when the agent starts.
    async fn connect(&self) -> Result<(), Error>;

    /// Write one batch. Errors are sink-local; the agent logs and moves on.
    async fn write(&self, metrics: Vec<Metric>) -> Result<(), Error>;
}

/// Development sink printing each metric to stdout.
pub struct StdoutOutput;

#[async_trait]
impl Output for StdoutOutput {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn connect(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn write(&self, metrics: Vec<Metric>) -> Result<(), Error> {
        info!(output = "stdout", len = metrics.len(), "metrics since the last flush");

        for metric in &metrics {
            println!("{metric}");
        }

        Ok(())
    }
}

/// Sink speaking the statsd line protocol over UDP.
///
/// Counters are rendered as `prefix.name:value|c` and gauges as
/// `prefix.name:value|g`. Tags are not part of the statsd protocol and
/// are dropped with a warning.
pub struct StatsdOutput {
    address: String,
    prefix: String,
    socket: OnceCell<UdpSocket>,
}

impl StatsdOutput {
    /// Create a statsd sink targeting `address`. `prefix` may be empty.
    pub fn new(address: &str, prefix: &str) -> Self {
        Self {
            address: address.to_string(),
            prefix: prefix.to_string(),
            socket: OnceCell::new(),
        }
    }

    fn line(&self, metric: &Metric) -> String {
        let name = if self.prefix.is_empty() {
            metric.name.clone()
        } else {
            format!("{}.{}", self.prefix, metric.name)
        };

        match metric.value {
            MetricValue::Counter(v) => format!("{name}:{v}|c"),
            MetricValue::Gauge(v) => format!("{name}:{v}|g"),
        }
    }
}

#[async_trait]
impl Output for StatsdOutput {
    fn name(&self) -> &'static str {
        "statsd"
    }

    async fn connect(&self) -> Result<(), Error> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.address).await?;

        self.socket
            .set(socket)
            .map_err(|_| Error::Config("statsd output connected twice".to_string()))?;

        Ok(())
    }

    async fn write(&self, metrics: Vec<Metric>) -> Result<(), Error> {
        let socket = self.socket.get().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "statsd output not connected",
            ))
        })?;

        for metric in &metrics {
            if !metric.tags.is_empty() {
                warn!(name = %metric.name, "statsd does not support metric tags, dropping them");
            }
            socket.send(self.line(metric).as_bytes()).await?;
        }

        Ok(())
    }
}
