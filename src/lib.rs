//! pubsub-dns - An authoritative DNS server fed by pub/sub record events.
//!
//! This crate provides a DNS server whose record set is continuously fed
//! by keyed events from a message bus and persisted in an embedded
//! key/value store. Questions for names inside the configured zones are
//! answered from the store; everything else is delegated to an upstream
//! recursive resolver.
//!
//! ## Features
//!
//! - Real-time record updates from a message bus, with CNAME/apex guard
//!   rules enforced at ingestion time
//! - Exact-match and single-label wildcard lookup with bounded CNAME
//!   chasing
//! - Full zone transfers (AXFR) over TCP with response chunking
//! - A batching metrics agent fanning out to pluggable sinks
//! - A read-only HTTP admin surface (JWT sign-in + record search)
//! - Graceful shutdown support
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          pubsub-dns                              │
//! │                                                                  │
//! │  ┌──────────────────┐     ┌──────────────────┐                   │
//! │  │   Bus consumer   │────▶│   Record store   │                   │
//! │  │  (keyed events)  │     │     (sled)       │                   │
//! │  └──────────────────┘     └────────┬─────────┘                   │
//! │                                    │                             │
//! │                                    ▼                             │
//! │  ┌──────────────────┐     ┌──────────────────┐                   │
//! │  │     Upstream     │◀────│  Question        │◀── UDP/TCP :53    │
//! │  │     resolver     │     │  handler         │                   │
//! │  └──────────────────┘     └──────────────────┘                   │
//! │                                                                  │
//! │  every component ──▶ metrics agent ──▶ sinks (stdout, statsd)    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pubsub_dns::{ChannelBus, Config, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: Config = load_config();
//!     let (publisher, bus) = ChannelBus::new("records", 128);
//!
//!     let token = CancellationToken::new();
//!     let server = DnsServer::new(config);
//!     server.run(vec![Arc::new(bus)], token).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod admin;
pub mod agent;
pub mod axfr;
pub mod bus;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metric;
pub mod name;
pub mod output;
pub mod query;
pub mod record;
pub mod resolver;
pub mod server;
pub mod store;
pub mod telemetry;

// Re-export main types
pub use bus::{BusClient, BusEvent, BusPublisher, ChannelBus};
pub use config::{AdminConfig, BusConfig, Config, DnsConfig, MetricsConfig, StatsdConfig};
pub use error::Error;
pub use record::DnsRecord;
pub use server::DnsServer;
pub use store::RecordStore;
