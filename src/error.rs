//! Error types for pubsub-dns.

use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedded store error
    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    /// A write transaction was rolled back
    #[error("store transaction failed: {0}")]
    Transaction(String),

    /// Undecodable bus payload or unsupported record type
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A record violates a registration guard rule
    #[error("registration rejected for {domain}: {reason}")]
    RegistrationRejected {
        /// Owner name of the rejected record set.
        domain: String,
        /// Which guard rule fired.
        reason: String,
    },

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Upstream resolver timeout or network failure
    #[error("resolver failure for {qname}: {reason}")]
    Resolver {
        /// Question name that was being resolved upstream.
        qname: String,
        /// Upstream failure description.
        reason: String,
    },

    /// A CNAME chain exceeded the recursion bound
    #[error("maximum recursion depth reached: {0}")]
    MaxRecursionExceeded(usize),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The message bus stream failed
    #[error("bus error: {0}")]
    Bus(String),
}

impl<E: std::fmt::Display> From<sled::transaction::TransactionError<E>> for Error {
    fn from(err: sled::transaction::TransactionError<E>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(e) => Error::Transaction(e.to_string()),
            sled::transaction::TransactionError::Storage(e) => Error::Store(e),
        }
    }
}
