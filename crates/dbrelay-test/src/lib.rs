//! # dbrelay-test
//!
//! End-to-end tests for the dbrelay gateway.
//!
//! [`TestGateway`] runs a gateway with the SQLite provider on an ephemeral
//! loopback port. Tests drive it through the client proxies or through the
//! raw generated client.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::net::SocketAddr;
use std::sync::{Arc, Once};

use dbrelay_client::{Client, ClientConfig, Connection};
use dbrelay_proto::DatabaseServiceClient;
use dbrelay_server::config::{DriverKind, ServerConfig};
use dbrelay_server::grpc::GrpcServer;
use dbrelay_server::registry::SessionRegistry;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::Channel;

/// Provider name the test gateway registers.
pub const SQLITE: &str = "sqlite";

/// Native connection string for a private in-memory database.
pub const MEMORY_DB: &str = "Data Source=:memory:";

static TRACING: Once = Once::new();

/// Installs a test subscriber once; honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A gateway running in the background of the current test runtime.
pub struct TestGateway {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestGateway {
    /// Starts a gateway with default settings.
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(ServerConfig::builder().port(0).build()).await
    }

    /// Starts a gateway with `config`; host and port are replaced by an
    /// ephemeral loopback port.
    pub async fn start_with(config: ServerConfig) -> std::io::Result<Self> {
        init_tracing();

        let mut config = config;
        if config.providers.iter().all(|p| p.invariant_name != SQLITE) {
            config.providers.push(dbrelay_server::config::ProviderConfig {
                invariant_name: SQLITE.to_string(),
                driver: DriverKind::Sqlite,
            });
        }
        config.host = "127.0.0.1".to_string();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        config.port = addr.port();

        let server = GrpcServer::from_config(&config)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        let registry = server.registry();

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let signal = async {
                let _ = rx.await;
            };
            if let Err(e) = server.serve_with_listener(listener, signal).await {
                tracing::error!(error = %e, "test gateway failed");
            }
        });

        Ok(Self {
            addr,
            registry,
            shutdown: Some(tx),
            handle: Some(handle),
        })
    }

    /// Returns the listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the client connection string naming this gateway.
    pub fn connection_string(&self) -> String {
        format!("GrpcServer={}", self.addr)
    }

    /// Returns the gateway's session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Creates a client with its own channel pool.
    pub fn client(&self) -> Client {
        self.client_with(ClientConfig::default())
    }

    /// Creates a client with `config`.
    pub fn client_with(&self, config: ClientConfig) -> Client {
        match Client::new(config) {
            Ok(client) => client,
            Err(e) => panic!("invalid client configuration: {}", e),
        }
    }

    /// Opens a connection to a fresh in-memory database.
    pub async fn open(&self, client: &Client) -> dbrelay_client::ClientResult<Connection> {
        client.open(self.connection_string(), SQLITE, MEMORY_DB).await
    }

    /// Connects the raw generated client.
    pub async fn raw_client(&self) -> Result<DatabaseServiceClient<Channel>, tonic::transport::Error> {
        DatabaseServiceClient::connect(format!("http://{}", self.addr)).await
    }

    /// Stops the gateway and waits for it to close every session.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
