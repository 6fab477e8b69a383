//! gRPC service implementation for the dbrelay gateway.
//!
//! This module implements the `DatabaseService` defined in dbrelay-proto.
//! Native driver failures are answered as [`DataException`] values inside
//! ordinary responses; only transport problems become gRPC statuses.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbrelay_common::envelope::encode_row;
use dbrelay_common::{Fault, IsolationLevel, Parameter, RemoteFault, ValueCodec};
use dbrelay_proto::{
    BeginTransactionRequest, BeginTransactionResponse, CloseConnectionRequest,
    CloseConnectionResponse, CommitTransactionRequest, CommitTransactionResponse,
    CreateCommandRequest, CreateCommandResponse, DataException, DataRow, DatabaseService,
    DatabaseServiceServer, DestroyCommandRequest, DestroyCommandResponse, ExecuteNonQueryResponse,
    ExecuteQueryRequest, ExecuteQueryResponse, ExecuteQuerySyncResponse, OpenConnectionRequest,
    OpenConnectionResponse, RollbackTransactionRequest, RollbackTransactionResponse,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::driver::{NativeCommand, NativeTransaction, ProviderRegistry};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::{Session, SessionRegistry};

/// Tunables for the service.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Rows buffered per streaming query.
    pub stream_buffer: usize,
    /// Log statement text at debug level.
    pub log_statements: bool,
    /// Statements slower than this are logged at warn level.
    pub slow_statement: Duration,
    /// Table receiving client identifiers of new transactions.
    pub remote_transaction_table: Option<String>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

impl From<&ServerConfig> for ServiceOptions {
    fn from(config: &ServerConfig) -> Self {
        Self {
            stream_buffer: config.stream_buffer.max(1),
            log_statements: config.log_statements,
            slow_statement: Duration::from_millis(config.slow_statement_ms),
            remote_transaction_table: config.remote_transaction_table.clone(),
        }
    }
}

// Logs a failure and encodes it for the response.
fn to_exception<E: Fault>(err: &E, operation: &'static str, codec: &ValueCodec) -> DataException {
    let fault = RemoteFault::from_fault(err);
    warn!(
        operation,
        class = %fault.class_name,
        message = %fault.message,
        "operation failed"
    );
    fault.to_proto(codec)
}

/// The gateway's gRPC service.
#[derive(Clone)]
pub struct GatewayService {
    registry: Arc<SessionRegistry>,
    providers: Arc<ProviderRegistry>,
    codec: Arc<ValueCodec>,
    options: ServiceOptions,
}

impl GatewayService {
    /// Creates the service.
    pub fn new(
        registry: Arc<SessionRegistry>,
        providers: Arc<ProviderRegistry>,
        codec: Arc<ValueCodec>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            registry,
            providers,
            codec,
            options,
        }
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn fault<E: Fault>(&self, err: &E, operation: &'static str) -> DataException {
        to_exception(err, operation, &self.codec)
    }

    async fn open_session(&self, req: &OpenConnectionRequest) -> GatewayResult<Arc<Session>> {
        let factory = self
            .providers
            .get(&req.provider_invariant_name)
            .ok_or_else(|| GatewayError::UnknownProvider(req.provider_invariant_name.clone()))?;

        let mut connection = factory.create_connection(&req.connection_string)?;
        connection.open().await?;

        Ok(self
            .registry
            .create_session(&req.provider_invariant_name, connection))
    }

    /// Resolves the command of an execute request and binds text,
    /// transaction and parameters. The returned guard drives the command.
    async fn prepare_command(
        &self,
        req: &ExecuteQueryRequest,
    ) -> GatewayResult<OwnedMutexGuard<Box<dyn NativeCommand>>> {
        let session = self
            .registry
            .get_session(&req.connection_id)
            .ok_or_else(|| GatewayError::NoSuchConnection(req.connection_id.clone()))?;

        let transaction = if req.transaction_id.is_empty() {
            None
        } else {
            Some(
                session
                    .get_transaction(&req.transaction_id)
                    .ok_or_else(|| GatewayError::NoSuchTransaction(req.transaction_id.clone()))?,
            )
        };

        let command = session
            .get_command(&req.command_id)
            .ok_or_else(|| GatewayError::NoSuchCommand(req.command_id.clone()))?;

        let mut command = command.lock_owned().await;
        command.set_text(&req.query);
        command.set_transaction(transaction);
        command.clear_parameters();
        for envelope in &req.parameters {
            command.add_parameter(Parameter::from_envelope(envelope, &self.codec));
        }

        if self.options.log_statements {
            debug!(
                session = %req.connection_id,
                statement = %req.query,
                parameters = req.parameters.len(),
                "executing statement"
            );
        }
        Ok(command)
    }

    fn observe(&self, query: &str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed >= self.options.slow_statement {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                statement = %query,
                "slow statement"
            );
        }
    }

    async fn collect_rows(&self, req: &ExecuteQueryRequest) -> GatewayResult<Vec<DataRow>> {
        let mut command = self.prepare_command(req).await?;
        let mut reader = command.execute_reader().await?;

        let mut rows = Vec::new();
        while let Some(fields) = reader.next_row().await? {
            rows.push(DataRow {
                fields: encode_row(&fields, &self.codec),
            });
        }
        Ok(rows)
    }

    async fn non_query(&self, req: &ExecuteQueryRequest) -> GatewayResult<i64> {
        let mut command = self.prepare_command(req).await?;
        Ok(command.execute_non_query().await?)
    }

    /// Records the caller of a new transaction in the remote transaction
    /// table. A failure disables tagging for the session.
    async fn tag_transaction(
        &self,
        session: &Session,
        native: &Arc<dyn NativeTransaction>,
        client_identifier: &str,
    ) {
        let Some(table) = &self.options.remote_transaction_table else {
            return;
        };
        if !session.tags_transactions() {
            return;
        }

        let result = async {
            let mut command = session.native_command().await?;
            command.set_text(&format!(
                "INSERT INTO {} (REMOTE_ID) VALUES (@REMOTE_ID)",
                table
            ));
            command.set_transaction(Some(native.clone()));
            command.add_parameter(Parameter::new("@REMOTE_ID", client_identifier));
            let inserted = command.execute_non_query().await;
            command.dispose().await;
            inserted
        }
        .await;

        if let Err(e) = result {
            warn!(
                session = %session.id(),
                error = %e,
                "transaction tagging failed, disabled for this session"
            );
            session.disable_transaction_tags();
        }
    }
}

/// Streamed query responses.
pub type RowStream =
    Pin<Box<dyn futures_core::Stream<Item = Result<ExecuteQueryResponse, Status>> + Send>>;

fn fault_row(exception: DataException) -> ExecuteQueryResponse {
    ExecuteQueryResponse {
        fields: Vec::new(),
        data_exception: Some(exception),
    }
}

#[tonic::async_trait]
impl DatabaseService for GatewayService {
    #[instrument(skip_all, fields(provider = %request.get_ref().provider_invariant_name))]
    async fn open_connection(
        &self,
        request: Request<OpenConnectionRequest>,
    ) -> Result<Response<OpenConnectionResponse>, Status> {
        let peer = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default();
        let req = request.into_inner();

        let response = match self.open_session(&req).await {
            Ok(session) => {
                info!(session = %session.id(), %peer, "connection opened");
                OpenConnectionResponse {
                    connection_id: session.id().to_string(),
                    client_identifier: peer,
                    data_exception: None,
                }
            }
            Err(e) => OpenConnectionResponse {
                connection_id: String::new(),
                client_identifier: peer,
                data_exception: Some(self.fault(&e, "OpenConnection")),
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, fields(session = %request.get_ref().connection_id))]
    async fn close_connection(
        &self,
        request: Request<CloseConnectionRequest>,
    ) -> Result<Response<CloseConnectionResponse>, Status> {
        let req = request.into_inner();
        if self.registry.destroy_session(&req.connection_id).await {
            info!("connection closed");
        }
        Ok(Response::new(CloseConnectionResponse {}))
    }

    #[instrument(skip_all, fields(session = %request.get_ref().connection_id))]
    async fn create_command(
        &self,
        request: Request<CreateCommandRequest>,
    ) -> Result<Response<CreateCommandResponse>, Status> {
        let req = request.into_inner();
        let Some(session) = self.registry.get_session(&req.connection_id) else {
            return Ok(Response::new(CreateCommandResponse::default()));
        };

        let command_id = session.create_command().await.map_err(|e| {
            warn!(error = %e, "command creation failed");
            Status::internal(e.to_string())
        })?;
        Ok(Response::new(CreateCommandResponse { command_id }))
    }

    #[instrument(skip_all, fields(session = %request.get_ref().connection_id))]
    async fn destroy_command(
        &self,
        request: Request<DestroyCommandRequest>,
    ) -> Result<Response<DestroyCommandResponse>, Status> {
        let req = request.into_inner();
        self.registry
            .remove_command(&req.connection_id, &req.command_id)
            .await;
        Ok(Response::new(DestroyCommandResponse {}))
    }

    #[instrument(skip_all, fields(session = %request.get_ref().connection_id))]
    async fn begin_transaction(
        &self,
        request: Request<BeginTransactionRequest>,
    ) -> Result<Response<BeginTransactionResponse>, Status> {
        let req = request.into_inner();
        let Some(session) = self.registry.get_session(&req.connection_id) else {
            return Ok(Response::new(BeginTransactionResponse::default()));
        };

        let level = IsolationLevel::from_wire(req.isolation_level);
        let native = match session.begin_native(level).await {
            Ok(native) => native,
            Err(e) => {
                return Ok(Response::new(BeginTransactionResponse {
                    transaction_id: String::new(),
                    data_exception: Some(self.fault(&e, "BeginTransaction")),
                }));
            }
        };

        if !req.client_identifier.is_empty() {
            self.tag_transaction(&session, &native, &req.client_identifier)
                .await;
        }

        let transaction_id = session.add_transaction(native, level);
        Ok(Response::new(BeginTransactionResponse {
            transaction_id,
            data_exception: None,
        }))
    }

    #[instrument(skip_all, fields(session = %request.get_ref().connection_id))]
    async fn commit_transaction(
        &self,
        request: Request<CommitTransactionRequest>,
    ) -> Result<Response<CommitTransactionResponse>, Status> {
        let req = request.into_inner();
        let data_exception = match self
            .registry
            .commit_and_remove(&req.connection_id, &req.transaction_id)
            .await
        {
            Some(Err(e)) => Some(self.fault(&e, "CommitTransaction")),
            Some(Ok(())) | None => None,
        };
        Ok(Response::new(CommitTransactionResponse { data_exception }))
    }

    #[instrument(skip_all, fields(session = %request.get_ref().connection_id))]
    async fn rollback_transaction(
        &self,
        request: Request<RollbackTransactionRequest>,
    ) -> Result<Response<RollbackTransactionResponse>, Status> {
        let req = request.into_inner();
        let data_exception = match self
            .registry
            .rollback_and_remove(&req.connection_id, &req.transaction_id)
            .await
        {
            Some(Err(e)) => Some(self.fault(&e, "RollbackTransaction")),
            Some(Ok(())) | None => None,
        };
        Ok(Response::new(RollbackTransactionResponse { data_exception }))
    }

    type ExecuteQueryStream = RowStream;

    #[instrument(skip_all, fields(session = %request.get_ref().connection_id))]
    async fn execute_query(
        &self,
        request: Request<ExecuteQueryRequest>,
    ) -> Result<Response<Self::ExecuteQueryStream>, Status> {
        let req = request.into_inner();
        let (tx, rx) = mpsc::channel(self.options.stream_buffer);

        match self.prepare_command(&req).await {
            Err(e) => {
                let _ = tx.send(Ok(fault_row(self.fault(&e, "ExecuteQuery")))).await;
            }
            Ok(mut command) => {
                let service = self.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    let mut reader = match command.execute_reader().await {
                        Ok(reader) => reader,
                        Err(e) => {
                            let _ = tx.send(Ok(fault_row(service.fault(&e, "ExecuteQuery")))).await;
                            return;
                        }
                    };

                    let mut rows = 0u64;
                    loop {
                        match reader.next_row().await {
                            Ok(Some(fields)) => {
                                let response = ExecuteQueryResponse {
                                    fields: encode_row(&fields, &service.codec),
                                    data_exception: None,
                                };
                                if tx.send(Ok(response)).await.is_err() {
                                    debug!(rows, "client stopped reading");
                                    break;
                                }
                                rows += 1;
                            }
                            Ok(None) => break,
                            Err(e) => {
                                let _ = tx.send(Ok(fault_row(service.fault(&e, "ExecuteQuery")))).await;
                                break;
                            }
                        }
                    }

                    // Release the reader before the command guard.
                    drop(reader);
                    drop(command);
                    service.observe(&req.query, started);
                });
            }
        }

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    #[instrument(skip_all, fields(session = %request.get_ref().connection_id))]
    async fn execute_query_sync(
        &self,
        request: Request<ExecuteQueryRequest>,
    ) -> Result<Response<ExecuteQuerySyncResponse>, Status> {
        let req = request.into_inner();
        let started = Instant::now();

        let response = match self.collect_rows(&req).await {
            Ok(rows) => ExecuteQuerySyncResponse {
                rows,
                data_exception: None,
            },
            Err(e) => ExecuteQuerySyncResponse {
                rows: Vec::new(),
                data_exception: Some(self.fault(&e, "ExecuteQuerySync")),
            },
        };
        self.observe(&req.query, started);
        Ok(Response::new(response))
    }

    #[instrument(skip_all, fields(session = %request.get_ref().connection_id))]
    async fn execute_non_query(
        &self,
        request: Request<ExecuteQueryRequest>,
    ) -> Result<Response<ExecuteNonQueryResponse>, Status> {
        let req = request.into_inner();
        let started = Instant::now();

        let response = match self.non_query(&req).await {
            Ok(rows) => ExecuteNonQueryResponse {
                rows_affected: rows,
                data_exception: None,
            },
            Err(e) => ExecuteNonQueryResponse {
                rows_affected: 0,
                data_exception: Some(self.fault(&e, "ExecuteNonQuery")),
            },
        };
        self.observe(&req.query, started);
        Ok(Response::new(response))
    }
}

/// gRPC server for the gateway.
pub struct GrpcServer {
    service: GatewayService,
    addr: SocketAddr,
    grpc_web: bool,
}

impl GrpcServer {
    /// Creates a server with a fresh session registry.
    pub fn new(providers: ProviderRegistry, addr: SocketAddr) -> Self {
        Self {
            service: GatewayService::new(
                Arc::new(SessionRegistry::new()),
                Arc::new(providers),
                Arc::new(ValueCodec::new()),
                ServiceOptions::default(),
            ),
            addr,
            grpc_web: true,
        }
    }

    /// Creates the server described by the configuration.
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let providers = ProviderRegistry::from_config(&config.providers, config.stream_buffer);
        Ok(Self::new(providers, config.parse_socket_addr()?)
            .with_options(ServiceOptions::from(config))
            .with_grpc_web(config.grpc_web))
    }

    /// Replaces the service options.
    pub fn with_options(mut self, options: ServiceOptions) -> Self {
        self.service.options = options;
        self
    }

    /// Replaces the value codec.
    pub fn with_codec(mut self, codec: Arc<ValueCodec>) -> Self {
        self.service.codec = codec;
        self
    }

    /// Enables or disables HTTP/1.1 gRPC-Web.
    pub fn with_grpc_web(mut self, enabled: bool) -> Self {
        self.grpc_web = enabled;
        self
    }

    /// Returns the session registry.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.service.registry.clone()
    }

    /// Returns the listen address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Starts the gRPC server.
    pub async fn serve(self) -> Result<(), tonic::transport::Error> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Starts the gRPC server and stops when `signal` completes. Remaining
    /// sessions are closed before returning.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()> + Send,
    {
        let registry = self.registry();
        info!(addr = %self.addr, grpc_web = self.grpc_web, "dbrelay gRPC server listening");

        let result = tonic::transport::Server::builder()
            .accept_http1(self.grpc_web)
            .layer(tonic_web::GrpcWebLayer::new())
            .add_service(DatabaseServiceServer::new(self.service))
            .serve_with_shutdown(self.addr, signal)
            .await;

        registry.shutdown().await;
        result
    }

    /// Serves on an already bound listener; the configured address is ignored.
    pub async fn serve_with_listener<F>(
        self,
        listener: TcpListener,
        signal: F,
    ) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()> + Send,
    {
        let registry = self.registry();
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, grpc_web = self.grpc_web, "dbrelay gRPC server listening");
        }

        let result = tonic::transport::Server::builder()
            .accept_http1(self.grpc_web)
            .layer(tonic_web::GrpcWebLayer::new())
            .add_service(DatabaseServiceServer::new(self.service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), signal)
            .await;

        registry.shutdown().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrelay_common::envelope::decode_row;
    use dbrelay_common::Value;
    use futures_util::StreamExt;

    use crate::driver::sqlite::SqliteFactory;

    fn service() -> GatewayService {
        let mut providers = ProviderRegistry::new();
        providers.register("sqlite", Arc::new(SqliteFactory::default()));
        GatewayService::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(providers),
            Arc::new(ValueCodec::new()),
            ServiceOptions::default(),
        )
    }

    async fn open(service: &GatewayService) -> String {
        let response = service
            .open_connection(Request::new(OpenConnectionRequest {
                provider_invariant_name: "sqlite".to_string(),
                connection_string: "Data Source=:memory:".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.data_exception.is_none());
        response.connection_id
    }

    async fn command(service: &GatewayService, connection_id: &str) -> String {
        service
            .create_command(Request::new(CreateCommandRequest {
                connection_id: connection_id.to_string(),
            }))
            .await
            .unwrap()
            .into_inner()
            .command_id
    }

    fn exec_request(connection_id: &str, command_id: &str, query: &str) -> ExecuteQueryRequest {
        ExecuteQueryRequest {
            connection_id: connection_id.to_string(),
            transaction_id: String::new(),
            command_id: command_id.to_string(),
            query: query.to_string(),
            parameters: Vec::new(),
        }
    }

    async fn non_query(service: &GatewayService, req: ExecuteQueryRequest) -> ExecuteNonQueryResponse {
        service
            .execute_non_query(Request::new(req))
            .await
            .unwrap()
            .into_inner()
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let service = service();
        let response = service
            .open_connection(Request::new(OpenConnectionRequest {
                provider_invariant_name: "oracle".to_string(),
                connection_string: "Data Source=x".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        let exception = response.data_exception.unwrap();
        assert_eq!(exception.class_name, "InvalidOperation");
        assert!(response.connection_id.is_empty());
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_registers_nothing() {
        let service = service();
        let response = service
            .open_connection(Request::new(OpenConnectionRequest {
                provider_invariant_name: "sqlite".to_string(),
                connection_string: "Mode=Memory".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.data_exception.unwrap().class_name, "Argument");
        assert!(service.registry().is_empty());
    }

    #[tokio::test]
    async fn test_execute_round_trip() {
        let service = service();
        let conn = open(&service).await;
        let cmd = command(&service, &conn).await;

        non_query(&service, exec_request(&conn, &cmd, "CREATE TABLE t (id INTEGER, name TEXT)")).await;

        let codec = ValueCodec::new();
        let mut insert = exec_request(&conn, &cmd, "INSERT INTO t VALUES (@id, @name)");
        insert.parameters = vec![
            Parameter::new("@id", 1i64).to_envelope(&codec),
            Parameter::new("@name", "ada").to_envelope(&codec),
        ];
        let response = non_query(&service, insert).await;
        assert!(response.data_exception.is_none());
        assert_eq!(response.rows_affected, 1);

        let rows = service
            .execute_query_sync(Request::new(exec_request(&conn, &cmd, "SELECT id, name FROM t")))
            .await
            .unwrap()
            .into_inner()
            .rows;
        assert_eq!(rows.len(), 1);
        let fields = decode_row(&rows[0].fields, &codec);
        assert_eq!(fields[1].value.as_ref().and_then(Value::get::<String>), Some("ada".to_string()));

        let mut stream = service
            .execute_query(Request::new(exec_request(&conn, &cmd, "SELECT id, name FROM t")))
            .await
            .unwrap()
            .into_inner();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.fields, rows[0].fields);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_ids_on_execute_are_faults() {
        let service = service();
        let conn = open(&service).await;
        let cmd = command(&service, &conn).await;

        let response = non_query(&service, exec_request("missing", &cmd, "SELECT 1")).await;
        assert!(response
            .data_exception
            .unwrap()
            .message
            .contains("no such connection"));

        let response = non_query(&service, exec_request(&conn, "missing", "SELECT 1")).await;
        assert!(response.data_exception.unwrap().message.contains("no such command"));

        let mut req = exec_request(&conn, &cmd, "SELECT 1");
        req.transaction_id = "missing".to_string();
        let response = non_query(&service, req).await;
        assert!(response
            .data_exception
            .unwrap()
            .message
            .contains("no such transaction"));
    }

    #[tokio::test]
    async fn test_unknown_ids_on_lifecycle_are_default() {
        let service = service();
        let response = service
            .create_command(Request::new(CreateCommandRequest {
                connection_id: "missing".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.command_id.is_empty());

        let response = service
            .begin_transaction(Request::new(BeginTransactionRequest {
                connection_id: "missing".to_string(),
                isolation_level: 3,
                client_identifier: String::new(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.transaction_id.is_empty());
        assert!(response.data_exception.is_none());

        let response = service
            .rollback_transaction(Request::new(RollbackTransactionRequest {
                connection_id: "missing".to_string(),
                transaction_id: "missing".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.data_exception.is_none());
    }

    #[tokio::test]
    async fn test_streaming_fault_is_data() {
        let service = service();
        let conn = open(&service).await;
        let cmd = command(&service, &conn).await;

        let mut stream = service
            .execute_query(Request::new(exec_request(&conn, &cmd, "SELECT * FROM missing")))
            .await
            .unwrap()
            .into_inner();
        let message = stream.next().await.unwrap().unwrap();
        let exception = message.data_exception.unwrap();
        assert_eq!(exception.class_name, "SqliteError");
        assert!(!exception.message.is_empty());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_remote_transaction_tagging() {
        let mut service = service();
        service.options.remote_transaction_table = Some("REMOTE_TRANSACTIONS".to_string());
        let conn = open(&service).await;
        let cmd = command(&service, &conn).await;
        non_query(
            &service,
            exec_request(&conn, &cmd, "CREATE TABLE REMOTE_TRANSACTIONS (REMOTE_ID TEXT)"),
        )
        .await;

        let begin = service
            .begin_transaction(Request::new(BeginTransactionRequest {
                connection_id: conn.clone(),
                isolation_level: 0,
                client_identifier: "worker-7".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();

        let mut select = exec_request(&conn, &cmd, "SELECT REMOTE_ID FROM REMOTE_TRANSACTIONS");
        select.transaction_id = begin.transaction_id.clone();
        let rows = service
            .execute_query_sync(Request::new(select))
            .await
            .unwrap()
            .into_inner()
            .rows;
        assert_eq!(rows.len(), 1);

        service
            .rollback_transaction(Request::new(RollbackTransactionRequest {
                connection_id: conn.clone(),
                transaction_id: begin.transaction_id,
            }))
            .await
            .unwrap();
        let session = service.registry().get_session(&conn).unwrap();
        assert!(session.tags_transactions());
        assert_eq!(session.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_tagging_disables_it() {
        let mut service = service();
        service.options.remote_transaction_table = Some("REMOTE_TRANSACTIONS".to_string());
        let conn = open(&service).await;

        let begin = service
            .begin_transaction(Request::new(BeginTransactionRequest {
                connection_id: conn.clone(),
                isolation_level: 0,
                client_identifier: "worker-7".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!begin.transaction_id.is_empty());
        assert!(begin.data_exception.is_none());

        let session = service.registry().get_session(&conn).unwrap();
        assert!(!session.tags_transactions());
    }
}
