//! Record ingestion pipeline.
//!
//! Consumes keyed record events from a bus, validates them against the
//! registration guards and persists them atomically. The pipeline is one
//! cooperative task per bus; write serialization across pipelines is
//! provided by the store's transactions.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use hickory_proto::rr::RecordType;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::MetricsService;
use crate::bus::BusClient;
use crate::error::Error;
use crate::name::{is_apex, is_subdomain, to_lower_fqdn};
use crate::record::{
    parse_key, parse_zone_line, record_key, same_record_set, to_rrs, DnsRecord,
};
use crate::store::{decode_value, encode_value, RecordStore};

/// Types a subdomain CNAME supersedes. NS and SOA survive on purpose.
const SUPERSEDED_BY_CNAME: [RecordType; 5] = [
    RecordType::A,
    RecordType::AAAA,
    RecordType::TXT,
    RecordType::PTR,
    RecordType::MX,
];

/// Maximum resubscription backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Ingestion pipeline for one or more buses.
#[derive(Clone)]
pub struct Ingestor {
    store: RecordStore,
    metrics: MetricsService,
    disallow_cname_on_apex: bool,
}

impl Ingestor {
    /// Create a pipeline writing to `store`.
    pub fn new(store: RecordStore, metrics: MetricsService, disallow_cname_on_apex: bool) -> Self {
        Self {
            store,
            metrics,
            disallow_cname_on_apex,
        }
    }

    /// Consume `client` until the token is cancelled, resubscribing with
    /// exponential backoff when the stream fails or ends.
    pub async fn run(self, client: Arc<dyn BusClient>, token: CancellationToken) {
        let bus = client.name();
        let mut backoff = Duration::from_secs(1);

        loop {
            if token.is_cancelled() {
                info!(bus = %bus, "ingestion shutting down");
                return;
            }

            info!(bus = %bus, "subscribing to record events");

            let mut stream = match client.subscribe().await {
                Ok(stream) => {
                    backoff = Duration::from_secs(1);
                    stream
                }
                Err(e) => {
                    error!(bus = %bus, error = %e, "failed to subscribe to bus");
                    self.metrics.counter("bus-consumer-error").inc(1).await;
                    tokio::select! {
                        _ = sleep(backoff) => {}
                        _ = token.cancelled() => return,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            loop {
                tokio::select! {
                    biased;

                    _ = token.cancelled() => {
                        info!(bus = %bus, "ingestion received shutdown signal");
                        return;
                    }

                    event = stream.next() => {
                        match event {
                            Some(Ok(event)) => {
                                self.handle_event(&event.key, &event.payload).await;
                            }
                            Some(Err(e)) => {
                                warn!(bus = %bus, error = %e, "bus stream error");
                                self.metrics.counter("bus-consumer-error").inc(1).await;
                                break;
                            }
                            None => {
                                info!(bus = %bus, "bus stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            tokio::select! {
                _ = sleep(Duration::from_secs(1)) => {}
                _ = token.cancelled() => return,
            }
        }
    }

    /// Process one keyed event: decode, validate, diff, persist.
    pub async fn handle_event(&self, key: &[u8], payload: &[u8]) {
        self.metrics.counter("nb-record").inc(1).await;

        let Some((owner, rtype)) = parse_key(key) else {
            warn!(key = %String::from_utf8_lossy(key), "unparsable record key");
            self.metrics.counter("malformed-record").inc(1).await;
            return;
        };
        let owner = to_lower_fqdn(&owner);

        debug!(domain = %owner, rtype = %rtype, "got a new record event");

        let records: Vec<DnsRecord> = match serde_json::from_slice(payload) {
            Ok(records) => records,
            Err(e) => {
                warn!(domain = %owner, error = %e, "undecodable record payload");
                self.metrics.counter("malformed-record").inc(1).await;
                return;
            }
        };

        if records.is_empty() || to_rrs(&records).is_err() {
            warn!(domain = %owner, "record payload does not map to resource records");
            self.metrics.counter("malformed-record").inc(1).await;
            return;
        }

        self.log_diff(&owner, rtype, &records);

        match self.register(&owner, rtype, &records) {
            Ok(()) => {
                info!(domain = %owner, rtype = %rtype, count = records.len(), "saved record set");
                self.metrics.counter("nb-record-saved").inc(1).await;
            }
            Err(e) => {
                warn!(domain = %owner, error = %e, "record set rejected");
                self.metrics.counter("bad-record").inc(1).await;
            }
        }
    }

    /// Load inline records into the store through the same guarded path as
    /// bus events. Lines whose owner falls outside every configured zone
    /// are skipped.
    pub async fn seed_local_records(&self, lines: &str, zones: &[String]) {
        // One line per record; successive lines for the same (owner, type)
        // accumulate into one record set.
        let mut sets: Vec<((String, RecordType), Vec<DnsRecord>)> = Vec::new();

        for line in lines.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let record = match parse_zone_line(line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(line, error = %e, "skipping unparsable local record");
                    continue;
                }
            };

            let owner = to_lower_fqdn(&record.name);
            if !crate::name::is_local(&owner, zones) {
                debug!(domain = %owner, "local record outside configured zones, skipping");
                continue;
            }

            let Ok(rtype) = record.record_type() else {
                continue;
            };
            match sets.iter_mut().find(|(k, _)| *k == (owner.clone(), rtype)) {
                Some((_, records)) => records.push(record),
                None => sets.push(((owner, rtype), vec![record])),
            }
        }

        for ((owner, rtype), records) in sets {
            let Ok(payload) = encode_value(&records) else {
                continue;
            };
            self.handle_event(&record_key(&owner, rtype), &payload).await;
        }
    }

    /// Log a structural diff when a record set replaces a different one.
    fn log_diff(&self, owner: &str, rtype: RecordType, new: &[DnsRecord]) {
        let previous = self
            .store
            .get(&record_key(owner, rtype))
            .ok()
            .flatten()
            .and_then(|bytes| decode_value(&bytes).ok());

        if let Some(previous) = previous {
            if !same_record_set(&previous, new) {
                let before: Vec<String> = previous.iter().map(DnsRecord::presentation).collect();
                let after: Vec<String> = new.iter().map(DnsRecord::presentation).collect();
                info!(
                    domain = %owner,
                    rtype = %rtype,
                    before = ?before,
                    after = ?after,
                    "record set has changed"
                );
            }
        }
    }

    /// Guard rules from the registration contract.
    fn guard_check(&self, owner: &str, rtype: RecordType) -> Result<(), Error> {
        if self.disallow_cname_on_apex && is_apex(owner) && rtype == RecordType::CNAME {
            return Err(Error::RegistrationRejected {
                domain: owner.to_string(),
                reason: "CNAME on apex domain is disallowed".to_string(),
            });
        }

        if is_subdomain(owner)
            && rtype != RecordType::CNAME
            && self.store.get(&record_key(owner, RecordType::CNAME))?.is_some()
        {
            return Err(Error::RegistrationRejected {
                domain: owner.to_string(),
                reason: "a CNAME already exists for this owner".to_string(),
            });
        }

        Ok(())
    }

    /// Persist one record set. A CNAME on a subdomain deletes the record
    /// types it supersedes in the same transaction as the put.
    fn register(&self, owner: &str, rtype: RecordType, records: &[DnsRecord]) -> Result<(), Error> {
        self.guard_check(owner, rtype)?;

        let key = record_key(owner, rtype);
        let value = encode_value(records)?;

        if rtype == RecordType::CNAME && is_subdomain(owner) {
            let superseded: Vec<Vec<u8>> = SUPERSEDED_BY_CNAME
                .iter()
                .map(|t| record_key(owner, *t))
                .collect();

            self.store.update(move |tx| {
                for superseded_key in &superseded {
                    tx.remove(superseded_key.as_slice())?;
                }
                tx.insert(key.as_slice(), value.as_slice())?;
                Ok(())
            })
        } else {
            self.store.put(&key, &value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricValue;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn test_ingestor(disallow_cname_on_apex: bool) -> (TempDir, Ingestor, mpsc::Receiver<crate::metric::Metric>) {
        let dir = TempDir::new().unwrap();
        let store = RecordStore::open(dir.path().join("records.db")).unwrap();

        let (agent_tx, agent_rx) = mpsc::channel(64);
        let metrics = MetricsService::new(
            agent_tx,
            Duration::from_millis(50),
            CancellationToken::new(),
        );

        (dir, Ingestor::new(store, metrics, disallow_cname_on_apex), agent_rx)
    }

    async fn counter_value(rx: &mut mpsc::Receiver<crate::metric::Metric>, name: &str) -> i64 {
        loop {
            let metric = rx.recv().await.expect("agent channel closed");
            if metric.name == name {
                match metric.value {
                    MetricValue::Counter(v) => return v,
                    MetricValue::Gauge(_) => panic!("expected a counter for {name}"),
                }
            }
        }
    }

    fn payload(records: &[DnsRecord]) -> Vec<u8> {
        encode_value(records).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_stores_record_set() {
        let (_dir, ingestor, _rx) = test_ingestor(false);

        let records = vec![DnsRecord::new("a.rock.", "A", "1.1.1.1", 3600, 0)];
        ingestor
            .handle_event(b"a.rock.|A", &payload(&records))
            .await;

        let stored = ingestor
            .store
            .record_set("a.rock.", RecordType::A)
            .unwrap()
            .unwrap();
        assert!(same_record_set(&stored, &records));
    }

    #[tokio::test]
    async fn test_ingest_normalizes_owner_case() {
        let (_dir, ingestor, _rx) = test_ingestor(false);

        let records = vec![DnsRecord::new("A.Rock.", "A", "1.1.1.1", 3600, 0)];
        ingestor
            .handle_event(b"A.Rock.|A", &payload(&records))
            .await;

        assert!(ingestor
            .store
            .record_set("a.rock.", RecordType::A)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent_at_the_byte_level() {
        let (_dir, ingestor, _rx) = test_ingestor(false);

        let records = vec![DnsRecord::new("a.rock.", "A", "1.1.1.1", 3600, 0)];
        let key = record_key("a.rock.", RecordType::A);

        ingestor.handle_event(&key, &payload(&records)).await;
        let first = ingestor.store.get(&key).unwrap().unwrap();

        ingestor.handle_event(&key, &payload(&records)).await;
        let second = ingestor.store.get(&key).unwrap().unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_dropped() {
        let (_dir, ingestor, mut rx) = test_ingestor(false);

        ingestor.handle_event(b"a.rock.|A", b"not json").await;

        assert!(ingestor.store.is_empty());
        assert_eq!(counter_value(&mut rx, "malformed-record").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_type_is_dropped() {
        let (_dir, ingestor, mut rx) = test_ingestor(false);

        let records = vec![DnsRecord::new("a.rock.", "SRV", "0 0 443 x.", 60, 0)];
        ingestor
            .handle_event(b"a.rock.|SRV", &payload(&records))
            .await;

        assert!(ingestor.store.is_empty());
        assert_eq!(counter_value(&mut rx, "malformed-record").await, 1);
    }

    #[tokio::test]
    async fn test_cname_supersedes_subdomain_types() {
        let (_dir, ingestor, _rx) = test_ingestor(false);

        for rtype in ["A", "AAAA", "TXT", "NS"] {
            let records = vec![DnsRecord::new("x.y.com.", rtype, "1.1.1.1", 60, 0)];
            ingestor
                .store
                .put(
                    &record_key("x.y.com.", rtype.parse().unwrap()),
                    &payload(&records),
                )
                .unwrap();
        }

        let cname = vec![DnsRecord::new("x.y.com.", "CNAME", "target.y.com.", 60, 0)];
        ingestor
            .handle_event(b"x.y.com.|CNAME", &payload(&cname))
            .await;

        let store = &ingestor.store;
        assert!(store.record_set("x.y.com.", RecordType::A).unwrap().is_none());
        assert!(store.record_set("x.y.com.", RecordType::AAAA).unwrap().is_none());
        assert!(store.record_set("x.y.com.", RecordType::TXT).unwrap().is_none());
        assert!(store.record_set("x.y.com.", RecordType::CNAME).unwrap().is_some());
        // NS is not in the superseded set.
        assert!(store.record_set("x.y.com.", RecordType::NS).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subdomain_with_cname_rejects_other_types() {
        let (_dir, ingestor, mut rx) = test_ingestor(false);

        let cname = vec![DnsRecord::new("x.y.com.", "CNAME", "target.y.com.", 60, 0)];
        ingestor
            .handle_event(b"x.y.com.|CNAME", &payload(&cname))
            .await;

        let a = vec![DnsRecord::new("x.y.com.", "A", "1.1.1.1", 60, 0)];
        ingestor.handle_event(b"x.y.com.|A", &payload(&a)).await;

        assert!(ingestor
            .store
            .record_set("x.y.com.", RecordType::A)
            .unwrap()
            .is_none());
        assert_eq!(counter_value(&mut rx, "bad-record").await, 1);

        // A newer CNAME is still accepted.
        let cname2 = vec![DnsRecord::new("x.y.com.", "CNAME", "other.y.com.", 60, 0)];
        ingestor
            .handle_event(b"x.y.com.|CNAME", &payload(&cname2))
            .await;
        let stored = ingestor
            .store
            .record_set("x.y.com.", RecordType::CNAME)
            .unwrap()
            .unwrap();
        assert_eq!(stored[0].content, "other.y.com.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_apex_cname_rejected_when_disallowed() {
        let (_dir, ingestor, mut rx) = test_ingestor(true);

        let cname = vec![DnsRecord::new("apex.com.", "CNAME", "foo.bar.com.", 3600, 0)];
        ingestor
            .handle_event(b"apex.com.|CNAME", &payload(&cname))
            .await;

        assert!(ingestor
            .store
            .record_set("apex.com.", RecordType::CNAME)
            .unwrap()
            .is_none());
        assert_eq!(counter_value(&mut rx, "bad-record").await, 1);
    }

    #[tokio::test]
    async fn test_apex_cname_allowed_by_default() {
        let (_dir, ingestor, _rx) = test_ingestor(false);

        let cname = vec![DnsRecord::new("apex.com.", "CNAME", "foo.bar.com.", 3600, 0)];
        ingestor
            .handle_event(b"apex.com.|CNAME", &payload(&cname))
            .await;

        assert!(ingestor
            .store
            .record_set("apex.com.", RecordType::CNAME)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_seed_local_records() {
        let (_dir, ingestor, _rx) = test_ingestor(false);
        let zones = vec!["rock.".to_string()];

        let lines = "
            a.rock. 3600 IN A 1.1.1.1
            a.rock. 3600 IN A 2.2.2.2
            outside.zone. 3600 IN A 3.3.3.3
            rock. 300 IN SOA ns1.rock. admin.rock. 1 3600 600 604800 60
        ";

        ingestor.seed_local_records(lines, &zones).await;

        let a = ingestor
            .store
            .record_set("a.rock.", RecordType::A)
            .unwrap()
            .unwrap();
        assert_eq!(a.len(), 2);

        assert!(ingestor
            .store
            .record_set("rock.", RecordType::SOA)
            .unwrap()
            .is_some());
        assert!(ingestor
            .store
            .record_set("outside.zone.", RecordType::A)
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_run_consumes_a_channel_bus() {
        use crate::bus::{BusClient, ChannelBus};

        let (_dir, ingestor, _rx) = test_ingestor(false);
        let (publisher, bus) = ChannelBus::new("test", 8);
        let token = CancellationToken::new();

        let handle = tokio::spawn(
            ingestor
                .clone()
                .run(Arc::new(bus) as Arc<dyn BusClient>, token.clone()),
        );

        let records = vec![DnsRecord::new("a.rock.", "A", "1.1.1.1", 3600, 0)];
        publisher
            .publish(b"a.rock.|A".to_vec(), payload(&records))
            .await
            .unwrap();

        // Wait until the pipeline has persisted the event.
        for _ in 0..50 {
            if !ingestor.store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!ingestor.store.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
