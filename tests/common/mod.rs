//! Shared wire-level test infrastructure.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_proto::xfer::Protocol;
use hickory_server::authority::{MessageRequest, MessageResponse};
use hickory_server::proto::rr::Record;
use hickory_server::server::{Request, ResponseHandler, ResponseInfo};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pubsub_dns::agent::MetricsService;
use pubsub_dns::query::QuestionHandler;
use pubsub_dns::record::{record_key, DnsRecord};
use pubsub_dns::resolver::UpstreamResolver;
use pubsub_dns::store::{encode_value, RecordStore};

// --- Constants ---

pub const ZONES: [&str; 2] = ["rock.", "services.cloud."];

// --- TestResponseHandler ---

/// Captures every serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `RequestHandler::handle_request()`. Each response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format
/// bytes, which can then be parsed with `Message::from_vec()`. Zone
/// transfers send several messages on one handler, so the captures
/// accumulate.
#[derive(Clone)]
pub struct TestResponseHandler {
    messages: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Parse every captured message, in send order.
    pub fn into_messages(self) -> Vec<Message> {
        let messages = self.messages.lock().unwrap();
        assert!(!messages.is_empty(), "no response was captured");
        messages
            .iter()
            .map(|buf| Message::from_vec(buf).expect("failed to parse captured DNS response"))
            .collect()
    }

    /// Parse the single captured message.
    pub fn into_message(self) -> Message {
        let messages = self.into_messages();
        assert_eq!(messages.len(), 1, "expected exactly one response message");
        messages.into_iter().next().unwrap()
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = Vec::with_capacity(512);
        let mut encoder = BinEncoder::new(&mut buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.messages.lock().unwrap().push(buf);
        Ok(info)
    }
}

// --- Store seeding ---

pub fn open_store() -> (tempfile::TempDir, RecordStore) {
    let dir = tempfile::TempDir::new().unwrap();
    let store = RecordStore::open(dir.path().join("records.db")).unwrap();
    (dir, store)
}

pub fn seed(store: &RecordStore, owner: &str, rtype: RecordType, records: &[DnsRecord]) {
    store
        .put(&record_key(owner, rtype), &encode_value(records).unwrap())
        .unwrap();
}

pub fn seed_a(store: &RecordStore, owner: &str, content: &str, ttl: u32) {
    seed(
        store,
        owner,
        RecordType::A,
        &[DnsRecord::new(owner, "A", content, ttl, 0)],
    );
}

pub fn seed_soa(store: &RecordStore, zone: &str) {
    seed(
        store,
        zone,
        RecordType::SOA,
        &[DnsRecord::new(
            zone,
            "SOA",
            &format!("ns1.{zone} admin.{zone} 2024010101 3600 600 604800 60"),
            300,
            0,
        )],
    );
}

// --- Handler construction ---

pub fn build_handler(store: RecordStore, allow_axfr: bool) -> QuestionHandler {
    let (agent_tx, _agent_rx) = mpsc::channel(64);
    let metrics = MetricsService::new(agent_tx, Duration::from_secs(60), CancellationToken::new());

    // The upstream resolver points at a blackhole; these tests only
    // exercise names inside the configured zones.
    let resolver = UpstreamResolver::new(&["127.0.0.1:9".parse().unwrap()]).unwrap();

    QuestionHandler::new(
        store,
        ZONES.iter().map(|z| z.to_string()).collect(),
        resolver,
        metrics,
        allow_axfr,
    )
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16, rd: bool) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(rd);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request` for the given question.
pub fn build_request(name: &str, record_type: RecordType, protocol: Protocol, id: u16) -> Request {
    let src: SocketAddr = "127.0.0.1:12345".parse().unwrap();
    let bytes = build_query_bytes(name, record_type, id, true);
    let msg = parse_message_request(&bytes);
    Request::new(msg, src, protocol)
}

// --- Response helpers ---

/// Execute a query through the handler and return all response messages.
pub async fn execute_query_messages(
    handler: &QuestionHandler,
    name: &str,
    record_type: RecordType,
    protocol: Protocol,
    id: u16,
) -> Vec<Message> {
    use hickory_server::server::RequestHandler;

    let request = build_request(name, record_type, protocol, id);
    let capture = TestResponseHandler::new();
    handler.handle_request(&request, capture.clone()).await;
    capture.into_messages()
}

/// Execute a query and return its single response message.
pub async fn execute_query(
    handler: &QuestionHandler,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    let mut messages =
        execute_query_messages(handler, name, record_type, Protocol::Udp, id).await;
    assert_eq!(messages.len(), 1, "expected exactly one response message");
    messages.remove(0)
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// The response header of a message.
pub fn header(msg: &Message) -> &Header {
    msg.header()
}
