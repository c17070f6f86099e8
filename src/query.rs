//! DNS question handling.
//!
//! The handler serves questions for names inside the configured zones from
//! the record store (exact match first, single-label wildcard as the
//! fallback), chases CNAME chains up to a bounded depth and delegates
//! everything else to the upstream resolver. Zone transfers are routed to
//! the AXFR path.

use futures::future::BoxFuture;
use hickory_proto::op::{Header, ResponseCode};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::MetricsService;
use crate::axfr;
use crate::error::Error;
use crate::name::{is_local, is_wildcard, to_lower_fqdn, wildcard_qname, zone_for};
use crate::record::{owner_prefix, record_key, to_rrs};
use crate::resolver::UpstreamResolver;
use crate::store::{decode_value, RecordStore};

/// Bound on CNAME chasing depth.
pub const MAX_RECURSION: usize = 5;

/// Handler answering DNS questions from the store and the upstream
/// resolver.
pub struct QuestionHandler {
    store: RecordStore,
    zones: Vec<String>,
    resolver: UpstreamResolver,
    metrics: MetricsService,
    allow_axfr: bool,
}

impl QuestionHandler {
    /// Create a handler for the configured zones.
    pub fn new(
        store: RecordStore,
        zones: Vec<String>,
        resolver: UpstreamResolver,
        metrics: MetricsService,
        allow_axfr: bool,
    ) -> Self {
        Self {
            store,
            zones,
            resolver,
            metrics,
            allow_axfr,
        }
    }

    /// Whether a name falls inside one of the authoritative zones.
    fn is_local(&self, qname: &str) -> bool {
        is_local(qname, &self.zones)
    }

    /// Resolve one question into a response code and an answer section.
    async fn resolve_question(
        &self,
        qname: &str,
        qtype: RecordType,
        recursion_desired: bool,
    ) -> (ResponseCode, Vec<Record>) {
        let result = self
            .lookup(qname.to_string(), qtype, recursion_desired, 0)
            .await;

        match result {
            Err(e) => {
                error!(domain = qname, error = %e, "lookup failed");
                (ResponseCode::ServFail, Vec::new())
            }
            Ok(rrs) if rrs.is_empty() && self.is_local(qname) => (ResponseCode::NXDomain, rrs),
            Ok(rrs) => (ResponseCode::NoError, rrs),
        }
    }

    /// Find records of `qtype` for `qname`, chasing CNAME chains when
    /// recursion is desired.
    ///
    /// Wildcard owners are kept canonical here; the caller rewrites them to
    /// the question name once the full answer is assembled.
    fn lookup(
        &self,
        qname: String,
        qtype: RecordType,
        recursion_desired: bool,
        depth: usize,
    ) -> BoxFuture<'_, Result<Vec<Record>, Error>> {
        Box::pin(async move {
            let depth = depth + 1;
            if depth > MAX_RECURSION {
                return Err(Error::MaxRecursionExceeded(MAX_RECURSION));
            }

            debug!(domain = %qname, qtype = %qtype, depth, "looking up record");

            let mut rrs = if self.is_local(&qname) {
                self.lookup_local(&qname, qtype)?
            } else {
                match self.resolver.resolve(&qname, qtype).await {
                    Ok(rrs) => rrs,
                    Err(e) => {
                        self.metrics.counter("resolver-error").inc(1).await;
                        return Err(e);
                    }
                }
            };

            // If the answer is a lone CNAME the search restarts at its
            // target, and the CNAME stays first in the answer section.
            if recursion_desired && is_cname_answer(&rrs) {
                let target = match rrs[0].data() {
                    RData::CNAME(cname) => to_lower_fqdn(&cname.0.to_ascii()),
                    _ => unreachable!("is_cname_answer checked the rdata"),
                };

                let chased = self
                    .lookup(target, qtype, recursion_desired, depth)
                    .await?;
                rrs.extend(chased);
            }

            Ok(rrs)
        })
    }

    /// Store lookup: exact `(qname, qtype)` or `(qname, CNAME)` first, the
    /// single-label wildcard form with the same preference otherwise.
    fn lookup_local(&self, qname: &str, qtype: RecordType) -> Result<Vec<Record>, Error> {
        let rrs = self.records_for(qname, qtype)?;
        if !rrs.is_empty() {
            return Ok(rrs);
        }

        match wildcard_qname(qname) {
            Some(wildcard) => self.records_for(&wildcard, qtype),
            None => Ok(Vec::new()),
        }
    }

    /// The stored record set for `(owner, qtype)`, falling back to the
    /// owner's CNAME.
    fn records_for(&self, owner: &str, qtype: RecordType) -> Result<Vec<Record>, Error> {
        let entries = self.store.scan_prefix(&owner_prefix(owner))?;

        let exact = record_key(owner, qtype);
        let cname = record_key(owner, RecordType::CNAME);

        let matched = entries
            .iter()
            .find(|(key, _)| *key == exact)
            .or_else(|| entries.iter().find(|(key, _)| *key == cname));

        match matched {
            Some((_, value)) => to_rrs(&decode_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    /// The SOA anchoring the zone `qname` belongs to, if stored.
    fn soa_for_zone(&self, qname: &str) -> Option<Record> {
        let zone = zone_for(qname, &self.zones)?;

        debug!(zone = %zone, "looking up the zone SOA");

        let records = match self.store.record_set(zone, RecordType::SOA) {
            Ok(records) => records?,
            Err(e) => {
                warn!(zone = %zone, error = %e, "failed to read the zone SOA");
                return None;
            }
        };

        to_rrs(&records).ok()?.into_iter().next()
    }
}

/// Whether an answer set is a lone CNAME (the chase condition).
fn is_cname_answer(rrs: &[Record]) -> bool {
    rrs.len() == 1 && rrs[0].record_type() == RecordType::CNAME
}

/// Rewrite wildcard owner names to the question name.
fn rewrite_wildcard_owners(rrs: &mut [Record], qname: &Name) {
    for rr in rrs.iter_mut() {
        if is_wildcard(&rr.name().to_ascii()) {
            rr.set_name(qname.clone());
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for QuestionHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let request_id = Uuid::new_v4();

        let request_info = match request.request_info() {
            Ok(info) => info,
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "unreadable DNS request");
                let mut header = Header::response_from_request(request.header());
                header.set_response_code(ResponseCode::FormErr);
                let response =
                    MessageResponseBuilder::from_message_request(request).build_no_records(header);
                return match response_handle.send_response(response).await {
                    Ok(info) => info,
                    Err(_) => ResponseInfo::from(header),
                };
            }
        };

        let qname = to_lower_fqdn(&request_info.query.name().to_string());
        let qtype = request_info.query.query_type();
        let recursion_desired = request_info.header.recursion_desired();

        info!(
            request_id = %request_id,
            ip = %request_info.src,
            domain = %qname,
            qtype = %qtype,
            "got a new DNS question"
        );

        if qtype == RecordType::AXFR {
            return axfr::handle_transfer(
                &self.store,
                &self.zones,
                self.allow_axfr,
                request,
                &qname,
                request_info.protocol,
                response_handle,
            )
            .await;
        }

        let local = self.is_local(&qname);

        let mut header = Header::response_from_request(request.header());
        if local {
            header.set_authoritative(true);
            header.set_recursion_available(true);
        }

        let (rcode, mut answers) = self
            .resolve_question(&qname, qtype, recursion_desired)
            .await;
        header.set_response_code(rcode);

        if let Ok(owner) = Name::from_ascii(&qname) {
            rewrite_wildcard_owners(&mut answers, &owner);
        }

        info!(
            request_id = %request_id,
            domain = %qname,
            qtype = %qtype,
            rcode = %rcode,
            answers = answers.len(),
            "found answer for the question"
        );

        // The authority section may carry the zone SOA when an
        // authoritative answer is empty (RFC 1034 section 4.3.4).
        let soa: Vec<Record> = if answers.is_empty() && local {
            self.soa_for_zone(&qname).into_iter().collect()
        } else {
            Vec::new()
        };

        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            answers.iter(),
            std::iter::empty(),
            soa.iter(),
            std::iter::empty(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(e) => {
                error!(request_id = %request_id, domain = %qname, error = %e, "failed to send DNS response");
                ResponseInfo::from(header)
            }
        }
    }
}
