//! Message-bus seam for the ingestion pipeline.
//!
//! The actual bus client (Kafka, Pulsar, ...) lives outside this crate.
//! The pipeline only needs a stream of keyed events, so the seam is a
//! small trait returning one. [`ChannelBus`] is the in-process
//! implementation used by embedders and tests.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::Error;

/// One keyed record event from the bus: key `owner.|TYPE`, payload a JSON
/// array of record descriptors.
#[derive(Debug, Clone)]
pub struct BusEvent {
    /// Record key bytes.
    pub key: Vec<u8>,
    /// Serialized record set.
    pub payload: Vec<u8>,
}

/// Stream of bus events, ending when the underlying subscription does.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<BusEvent, Error>> + Send>>;

/// A subscribable source of record events. The ingestion pipeline holds
/// one client per configured bus and resubscribes when a stream ends.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Identifier used in logs (topic, address...).
    fn name(&self) -> String;

    /// Open a new event stream.
    async fn subscribe(&self) -> Result<EventStream, Error>;
}

/// Producer half of a [`ChannelBus`].
#[derive(Clone)]
pub struct BusPublisher {
    tx: mpsc::Sender<BusEvent>,
}

impl BusPublisher {
    /// Publish one keyed event.
    pub async fn publish(&self, key: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.tx
            .send(BusEvent {
                key: key.into(),
                payload: payload.into(),
            })
            .await
            .map_err(|_| Error::Bus("channel bus closed".to_string()))
    }
}

/// In-process bus backed by a bounded channel. The stream ends when every
/// publisher handle is dropped.
pub struct ChannelBus {
    name: String,
    rx: Mutex<Option<mpsc::Receiver<BusEvent>>>,
}

impl ChannelBus {
    /// Create a channel bus and its publisher handle.
    pub fn new(name: &str, capacity: usize) -> (BusPublisher, Self) {
        let (tx, rx) = mpsc::channel(capacity);

        (
            BusPublisher { tx },
            Self {
                name: name.to_string(),
                rx: Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait]
impl BusClient for ChannelBus {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn subscribe(&self) -> Result<EventStream, Error> {
        let rx = self
            .rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Bus(format!("bus {} already consumed", self.name)))?;

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (Ok(event), rx))
        })))
    }
}
