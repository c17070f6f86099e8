//! Server setup and lifecycle management.

use std::sync::Arc;
use std::time::Duration;

use hickory_server::ServerFuture;
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::admin::{self, AdminState};
use crate::agent::{Agent, MetricsService};
use crate::bus::BusClient;
use crate::config::Config;
use crate::error::Error;
use crate::ingest::Ingestor;
use crate::output::{StatsdOutput, StdoutOutput};
use crate::query::QuestionHandler;
use crate::resolver::UpstreamResolver;
use crate::store::RecordStore;

/// Idle timeout for DNS TCP connections.
const TCP_TIMEOUT: Duration = Duration::from_secs(30);

/// The assembled DNS service: store, ingestion, query engine, metrics and
/// admin surface.
pub struct DnsServer {
    config: Config,
}

impl DnsServer {
    /// Create a new server with the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the server until the token is cancelled.
    ///
    /// `buses` carries one client per ingestion source; an empty list
    /// serves the stored and inline records only.
    pub async fn run(
        self,
        buses: Vec<Arc<dyn BusClient>>,
        token: CancellationToken,
    ) -> Result<(), Error> {
        let zones = self.config.dns.normalized_zones();

        info!(
            address = %self.config.dns.address,
            zones = ?zones,
            resolver = %self.config.dns.resolver_address,
            "starting pubsub-dns server"
        );

        let store = RecordStore::open(&self.config.pathdb)?;

        // Metrics pipeline: aggregators -> agent -> sinks.
        let mut agent = Agent::new(
            self.config.metrics.buffer_size,
            self.config.metrics.flush_interval(),
        );
        agent.add_output(Arc::new(StdoutOutput));
        if let Some(statsd) = &self.config.statsd {
            agent.add_output(Arc::new(StatsdOutput::new(&statsd.address, &statsd.prefix)));
        }
        let metrics = MetricsService::new(
            agent.input(),
            self.config.metrics.flush_interval(),
            token.clone(),
        );
        let agent_handle = tokio::spawn(agent.run(token.clone()));

        // Ingestion: inline records first, then one task per bus.
        let ingestor = Ingestor::new(
            store.clone(),
            metrics.clone(),
            self.config.disallow_cname_on_apex,
        );

        if let Some(local_records) = &self.config.local_records {
            ingestor.seed_local_records(local_records, &zones).await;
        }

        let mut ingest_handles: Vec<JoinHandle<()>> = Vec::new();
        for bus in buses {
            info!(bus = %bus.name(), "starting ingestion task");
            ingest_handles.push(tokio::spawn(
                ingestor.clone().run(bus, token.clone()),
            ));
        }

        // Query engine on UDP and TCP.
        let upstream = UpstreamResolver::parse_address(&self.config.dns.resolver_address)?;
        let resolver = UpstreamResolver::new(&[upstream])?;
        let handler = QuestionHandler::new(
            store.clone(),
            zones,
            resolver,
            metrics.clone(),
            self.config.allow_axfr,
        );

        if !self.config.dns.udp && !self.config.dns.tcp {
            return Err(Error::Config(
                "at least one of udp or tcp must be enabled".to_string(),
            ));
        }

        let mut server = ServerFuture::new(handler);

        if self.config.dns.udp {
            let udp_socket = UdpSocket::bind(self.config.dns.address).await?;
            info!(addr = %self.config.dns.address, "DNS UDP listening");
            server.register_socket(udp_socket);
        }

        if self.config.dns.tcp {
            let tcp_listener = TcpListener::bind(self.config.dns.address).await?;
            info!(addr = %self.config.dns.address, "DNS TCP listening");
            server.register_listener(tcp_listener, TCP_TIMEOUT);
        }

        // Admin surface, when configured.
        let admin_handle = match &self.config.admin {
            Some(admin_config) => {
                if admin_config.jwt_secret.is_empty() {
                    warn!("admin surface running without a JWT secret");
                }

                let state = AdminState::new(
                    store.clone(),
                    admin_config.credentials(),
                    &admin_config.jwt_secret,
                );
                let listener = TcpListener::bind(admin_config.address).await?;
                info!(addr = %admin_config.address, "admin HTTP listening");

                let shutdown = token.clone().cancelled_owned();
                Some(tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, admin::router(state))
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        error!(error = %e, "admin HTTP server error");
                    }
                }))
            }
            None => None,
        };

        info!("pubsub-dns ready to serve queries");

        tokio::select! {
            _ = token.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!(error = %e, "DNS server error");
                }
            }
        }

        // Drain: listeners have stopped accepting; wait for the ingestion
        // tasks and the metrics pipeline, close the store last.
        for handle in ingest_handles {
            let _ = handle.await;
        }
        if let Some(handle) = admin_handle {
            let _ = handle.await;
        }
        let _ = agent_handle.await;

        store.close()?;
        info!("DNS server stopped");

        Ok(())
    }
}
