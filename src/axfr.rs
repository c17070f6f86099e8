//! Full zone transfers (AXFR).
//!
//! The transfer enumerates every stored record set whose owner lies under
//! the requested zone and streams it over TCP, framed by the zone SOA as
//! both the first and the last record (RFC 5936). Large zones are split
//! into multiple well-formed DNS messages.

use hickory_proto::op::{Header, ResponseCode};
use hickory_proto::rr::{Record, RecordType};
use hickory_proto::xfer::Protocol;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, ResponseHandler, ResponseInfo};
use tracing::{info, warn};

use crate::error::Error;
use crate::name::{is_in_zone, is_local, to_lower_fqdn};
use crate::record::{parse_key, to_rrs};
use crate::store::{decode_value, RecordStore};

/// Maximum record-sets carried by one transfer message.
pub const CHUNK_SIZE: usize = 500;

/// Collect the zone SOA and the other record sets under `zone`.
///
/// The SOA stored under the zone apex anchors the transfer; record sets
/// are returned in store key order.
pub fn zone_record_sets(
    store: &RecordStore,
    zone: &str,
) -> Result<(Option<Record>, Vec<Vec<Record>>), Error> {
    let zone = to_lower_fqdn(zone);
    let mut soa = None;
    let mut rest = Vec::new();

    for entry in store.iter() {
        let (key, value) = entry?;

        let Some((owner, rtype)) = parse_key(&key) else {
            warn!(key = %String::from_utf8_lossy(&key), "skipping unparsable store key");
            continue;
        };

        if !is_in_zone(&owner, &zone) {
            continue;
        }

        let rrs = to_rrs(&decode_value(&value)?)?;

        if rtype == RecordType::SOA && owner == zone {
            soa = rrs.into_iter().next();
        } else {
            rest.push(rrs);
        }
    }

    Ok((soa, rest))
}

/// Split a transfer into messages of at most [`CHUNK_SIZE`] record-sets,
/// with the zone SOA leading the first message and closing the last one.
pub fn frame_transfer(soa: Record, rest: Vec<Vec<Record>>) -> Vec<Vec<Record>> {
    if rest.is_empty() {
        return vec![vec![soa.clone(), soa]];
    }

    let chunks: Vec<Vec<Record>> = rest
        .chunks(CHUNK_SIZE)
        .map(|sets| sets.iter().flatten().cloned().collect())
        .collect();

    let last = chunks.len() - 1;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, mut rrs)| {
            if i == 0 {
                rrs.insert(0, soa.clone());
            }
            if i == last {
                rrs.push(soa.clone());
            }
            rrs
        })
        .collect()
}

/// Serve one AXFR question, streaming the zone in chunks.
pub(crate) async fn handle_transfer<R: ResponseHandler>(
    store: &RecordStore,
    zones: &[String],
    allow_axfr: bool,
    request: &Request,
    qname: &str,
    protocol: Protocol,
    mut response_handle: R,
) -> ResponseInfo {
    let mut header = Header::response_from_request(request.header());

    // Transfers for zones we are not authoritative for are refused
    // outright (RFC 5936 section 2.2.1).
    if !is_local(qname, zones) {
        header.set_response_code(ResponseCode::NotAuth);
        let response =
            MessageResponseBuilder::from_message_request(request).build_no_records(header);
        return send_or_fallback(&mut response_handle, response, header).await;
    }

    // Zone transfers leak the whole record set, so they are off unless the
    // operator opted in, and they only run over TCP.
    if !allow_axfr || protocol != Protocol::Tcp {
        info!(zone = qname, allow_axfr, %protocol, "denying zone transfer");
        let response =
            MessageResponseBuilder::from_message_request(request).build_no_records(header);
        return send_or_fallback(&mut response_handle, response, header).await;
    }

    header.set_authoritative(true);

    let (soa, rest) = match zone_record_sets(store, qname) {
        Ok(sets) => sets,
        Err(e) => {
            warn!(zone = qname, error = %e, "failed to enumerate zone");
            header.set_response_code(ResponseCode::ServFail);
            let response =
                MessageResponseBuilder::from_message_request(request).build_no_records(header);
            return send_or_fallback(&mut response_handle, response, header).await;
        }
    };

    let Some(soa) = soa else {
        // Without the anchoring SOA the transfer cannot be framed.
        warn!(zone = qname, "no SOA stored for the zone, refusing transfer");
        header.set_response_code(ResponseCode::ServFail);
        let response =
            MessageResponseBuilder::from_message_request(request).build_no_records(header);
        return send_or_fallback(&mut response_handle, response, header).await;
    };

    let messages = frame_transfer(soa, rest);
    info!(zone = qname, messages = messages.len(), "starting zone transfer");

    let mut last_info = ResponseInfo::from(header);
    for message in &messages {
        let response = MessageResponseBuilder::from_message_request(request).build(
            header,
            message.iter(),
            std::iter::empty(),
            std::iter::empty(),
            std::iter::empty(),
        );

        match response_handle.send_response(response).await {
            Ok(info) => last_info = info,
            Err(e) => {
                warn!(zone = qname, error = %e, "failed to send transfer chunk");
                return ResponseInfo::from(header);
            }
        }
    }

    last_info
}

async fn send_or_fallback<'q, 'a, R, A, N, S, D>(
    response_handle: &mut R,
    response: hickory_server::authority::MessageResponse<'q, 'a, A, N, S, D>,
    header: Header,
) -> ResponseInfo
where
    R: ResponseHandler,
    A: Iterator<Item = &'a Record> + Send + 'a,
    N: Iterator<Item = &'a Record> + Send + 'a,
    S: Iterator<Item = &'a Record> + Send + 'a,
    D: Iterator<Item = &'a Record> + Send + 'a,
{
    match response_handle.send_response(response).await {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "failed to send DNS response");
            ResponseInfo::from(header)
        }
    }
}
