//! Upstream recursive resolver delegate.
//!
//! Questions outside the configured authoritative zones are forwarded to
//! an upstream recursive resolver and its answers are mapped back into the
//! reply. The delegate never performs zone transfers.

use std::net::SocketAddr;

use hickory_proto::rr::{Record, RecordType};
use hickory_proto::xfer::Protocol;
use hickory_proto::{ProtoError, ProtoErrorKind};
use hickory_resolver::config::{NameServerConfig, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{ResolveError, ResolveErrorKind, Resolver};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::Error;

/// Budget for one upstream exchange.
pub const RESOLVE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Upper bound on upstream nameservers attempted per question.
pub const MAX_NAMESERVERS: usize = 4;

/// Default port for upstream resolvers given as a bare host.
const DEFAULT_DNS_PORT: u16 = 53;

/// Delegate wrapping the upstream recursive resolver.
pub struct UpstreamResolver {
    resolver: Resolver<TokioConnectionProvider>,
}

impl UpstreamResolver {
    /// Build a delegate for the configured upstream addresses. Addresses
    /// beyond [`MAX_NAMESERVERS`] are ignored.
    pub fn new(upstreams: &[SocketAddr]) -> Result<Self, Error> {
        if upstreams.is_empty() {
            return Err(Error::Config(
                "no upstream resolver address configured".to_string(),
            ));
        }

        let name_servers: Vec<NameServerConfig> = upstreams
            .iter()
            .take(MAX_NAMESERVERS)
            .map(|addr| NameServerConfig::new(*addr, Protocol::Udp))
            .collect();

        let config = ResolverConfig::from_parts(None, vec![], name_servers);
        let resolver =
            Resolver::builder_with_config(config, TokioConnectionProvider::default()).build();

        Ok(Self { resolver })
    }

    /// Parse a `host:port` (or bare `host`) resolver address.
    pub fn parse_address(address: &str) -> Result<SocketAddr, Error> {
        let with_port = if address.contains(':') {
            address.to_string()
        } else {
            format!("{address}:{DEFAULT_DNS_PORT}")
        };

        with_port
            .parse()
            .map_err(|_| Error::Config(format!("invalid resolver address: {address}")))
    }

    /// Resolve `(qname, qtype)` upstream.
    ///
    /// Nonexistent names return an empty record list; timeouts and
    /// transport failures return [`Error::Resolver`] so the caller can
    /// reply `SERVFAIL`.
    pub async fn resolve(&self, qname: &str, qtype: RecordType) -> Result<Vec<Record>, Error> {
        debug!(qname, qtype = %qtype, "forwarding question upstream");

        let lookup = timeout(RESOLVE_TIMEOUT, self.resolver.lookup(qname, qtype)).await;

        match lookup {
            Err(_) => Err(Error::Resolver {
                qname: qname.to_string(),
                reason: "upstream exchange timed out".to_string(),
            }),
            Ok(Err(e)) if is_no_records(&e) => {
                debug!(qname, "upstream resolver found no records");
                Ok(Vec::new())
            }
            Ok(Err(e)) => {
                warn!(qname, error = %e, "upstream resolver failure");
                Err(Error::Resolver {
                    qname: qname.to_string(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(lookup)) => {
                let records: Vec<Record> = lookup.record_iter().cloned().collect();
                debug!(qname, count = records.len(), "upstream resolver answered");
                Ok(records)
            }
        }
    }
}

/// Whether a resolver error means "the name does not exist" rather than a
/// transport or server failure.
fn is_no_records(error: &ResolveError) -> bool {
    match error.kind() {
        ResolveErrorKind::Proto(proto) => proto_is_no_records(proto),
        _ => false,
    }
}

fn proto_is_no_records(error: &ProtoError) -> bool {
    matches!(error.kind(), ProtoErrorKind::NoRecordsFound { .. })
}
