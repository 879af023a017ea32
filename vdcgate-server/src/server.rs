use crate::config::{ApiFlavor, ServerConfig};
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vdcgate_core::ApiValuePtr;
use vdcgate_transport::{
    spawn_connection, ApiConnectionHandle, ApiRequest, ApiRequestHandler, JsonRpcCodec,
    ProtobufCodec,
};

/// Accepts TCP connections and runs one API connection per socket.
#[derive(Clone)]
pub struct ApiServer {
    config: ServerConfig,
    handler: Arc<dyn ApiRequestHandler>,
    registry: Arc<ConnectionRegistry>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, handler: Arc<dyn ApiRequestHandler>) -> Self {
        ApiServer {
            config,
            handler,
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Bind the configured address and serve until an unrecoverable error.
    pub async fn run(self) -> anyhow::Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted from `listener`.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            addr = %listener.local_addr()?,
            flavor = %self.config.flavor,
            role = %self.config.role,
            "API server listening"
        );

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => self.accept(stream, peer),
                Err(err) => {
                    // EMFILE and similar accept errors are transient
                    error!(error = %err, "Accept failed");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    fn accept(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(err) = stream.set_nodelay(true) {
            warn!(peer = %peer, error = %err, "Could not disable Nagle");
        }

        let session = Uuid::new_v4();
        debug!(peer = %peer, session = %session, "Accepted connection");
        let tracked: Arc<dyn ApiRequestHandler> = Arc::new(TrackedHandler {
            session,
            inner: self.handler.clone(),
            registry: self.registry.clone(),
        });

        let connection = self.config.connection_config();
        let label = peer.to_string();
        match self.config.flavor {
            ApiFlavor::Protobuf => {
                let codec =
                    ProtobufCodec::with_max_frame_size(connection.role, connection.max_frame_size);
                spawn_connection(stream, codec, label, tracked);
            }
            ApiFlavor::Json => {
                let codec = JsonRpcCodec::with_max_line_length(connection.max_frame_size);
                spawn_connection(stream, codec, label, tracked);
            }
        }
    }
}

/// Keeps the registry in sync with the connection lifecycle and forwards
/// everything else to the application handler.
struct TrackedHandler {
    session: Uuid,
    inner: Arc<dyn ApiRequestHandler>,
    registry: Arc<ConnectionRegistry>,
}

#[async_trait]
impl ApiRequestHandler for TrackedHandler {
    async fn handle_method(&self, request: ApiRequest, params: ApiValuePtr) {
        self.inner.handle_method(request, params).await;
    }

    async fn handle_notification(
        &self,
        connection: &ApiConnectionHandle,
        method: &str,
        params: ApiValuePtr,
    ) {
        self.inner
            .handle_notification(connection, method, params)
            .await;
    }

    async fn on_connected(&self, connection: &ApiConnectionHandle) {
        self.registry.insert(self.session, connection.clone());
        info!(
            session = %self.session,
            peer = connection.peer(),
            live = self.registry.len(),
            "Session started"
        );
        self.inner.on_connected(connection).await;
    }

    async fn on_disconnected(&self, connection: &ApiConnectionHandle) {
        self.registry.remove(&self.session);
        info!(
            session = %self.session,
            peer = connection.peer(),
            live = self.registry.len(),
            "Session ended"
        );
        self.inner.on_disconnected(connection).await;
    }
}
