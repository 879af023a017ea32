//! API methods of the demo gateway.

use crate::gateway::Gateway;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vdcgate_core::{
    access_property, AccessDomain, AccessMode, ApiError, ApiValue, ApiValuePtr, ApiValueType,
    ErrorCode, PropertyContainer,
};
use vdcgate_transport::{ApiConnectionHandle, ApiRequest, ApiRequestHandler};

pub const MIN_API_VERSION: u32 = 1;
pub const MAX_API_VERSION: u32 = 3;

/// Serves `hello`, `getProperty`, `setProperty`, `bye` and `ping` against a
/// [`Gateway`] tree.
pub struct GatewayHandler {
    gateway: Arc<Gateway>,
    /// API version agreed in `hello`, per peer.
    sessions: DashMap<String, u32>,
}

impl GatewayHandler {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        GatewayHandler {
            gateway,
            sessions: DashMap::new(),
        }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    fn api_version(&self, connection: &ApiConnectionHandle) -> u32 {
        self.sessions
            .get(connection.peer())
            .map(|v| *v.value())
            .unwrap_or(MAX_API_VERSION)
    }

    /// Container addressed by the `dSUID` param; the gateway itself when
    /// absent.
    fn target(&self, params: &dyn ApiValue) -> Result<Arc<dyn PropertyContainer>, ApiError> {
        let dsuid = params.get_string("dSUID").unwrap_or_default();
        if dsuid.is_empty() || dsuid == self.gateway.dsuid() {
            let gateway: Arc<dyn PropertyContainer> = self.gateway.clone();
            return Ok(gateway);
        }
        match self.gateway.device(&dsuid) {
            Some(device) => {
                let device: Arc<dyn PropertyContainer> = device;
                Ok(device)
            }
            None => Err(ApiError::not_found(format!("unknown dSUID {}", dsuid))),
        }
    }

    fn hello(&self, request: &ApiRequest, params: &dyn ApiValue) -> Result<ApiValuePtr, ApiError> {
        let requested = params
            .get("api_version")
            .filter(|v| !v.is_null())
            .map(|v| v.uint64_value());
        let version = match requested {
            None => MAX_API_VERSION,
            Some(v) if (MIN_API_VERSION as u64..=MAX_API_VERSION as u64).contains(&v) => v as u32,
            Some(v) => {
                return Err(ApiError::new(
                    ErrorCode::IncompatibleApi,
                    format!(
                        "API version {} not supported, use {}..{}",
                        v, MIN_API_VERSION, MAX_API_VERSION
                    ),
                ))
            }
        };

        let peer = request.connection().peer().to_string();
        info!(
            peer = %peer,
            vdsm = %params.get_string("dSUID").unwrap_or_default(),
            version,
            "Hello"
        );
        self.sessions.insert(peer, version);

        let mut result = request.new_value(ApiValueType::Object);
        result.add_string("dSUID", self.gateway.dsuid());
        Ok(result)
    }

    async fn get_property(
        &self,
        request: &ApiRequest,
        params: &dyn ApiValue,
    ) -> Result<ApiValuePtr, ApiError> {
        let target = self.target(params)?;
        let query = params
            .get("query")
            .unwrap_or_else(|| request.new_value(ApiValueType::Null));
        access_property(
            &target,
            AccessMode::Read,
            query.as_ref(),
            AccessDomain::DEFAULT,
            self.api_version(request.connection()),
        )
        .await
    }

    async fn set_property(
        &self,
        request: &ApiRequest,
        params: &dyn ApiValue,
    ) -> Result<(), ApiError> {
        let target = self.target(params)?;
        let Some(properties) = params.get("properties").filter(|p| !p.is_null()) else {
            return Err(ApiError::bad_request("missing 'properties'"));
        };
        let preload = params.get("preload").is_some_and(|p| p.bool_value());
        let mode = if preload {
            AccessMode::WritePreload
        } else {
            AccessMode::Write
        };
        access_property(
            &target,
            mode,
            properties.as_ref(),
            AccessDomain::DEFAULT,
            self.api_version(request.connection()),
        )
        .await?;
        // a plain write commits whatever earlier preloads staged
        if mode == AccessMode::Write {
            self.gateway.commit_staged();
        }
        Ok(())
    }
}

#[async_trait]
impl ApiRequestHandler for GatewayHandler {
    async fn handle_method(&self, mut request: ApiRequest, params: ApiValuePtr) {
        let method = request.method().to_string();
        debug!(method = %method, params = %params.description(), "Handling call");
        match method.as_str() {
            "hello" => match self.hello(&request, params.as_ref()) {
                Ok(result) => request.send_result(Some(result)),
                Err(err) => request.send_error(err),
            },
            "getProperty" => match self.get_property(&request, params.as_ref()).await {
                Ok(result) => request.send_result(Some(result)),
                Err(err) => request.send_error(err),
            },
            "setProperty" => {
                let status = self.set_property(&request, params.as_ref()).await.err();
                request.send_status(status);
            }
            "bye" => {
                request.send_status(None);
                request.connection().close_after_send();
            }
            other => {
                warn!(method = other, "Unknown method");
                request.send_error(ApiError::method_unknown(other));
            }
        }
    }

    async fn handle_notification(
        &self,
        connection: &ApiConnectionHandle,
        method: &str,
        params: ApiValuePtr,
    ) {
        match method {
            "ping" => {
                let mut pong = connection.new_value(ApiValueType::Object);
                let dsuid = params
                    .get_string("dSUID")
                    .unwrap_or_else(|| self.gateway.dsuid().to_string());
                pong.add_string("dSUID", &dsuid);
                if let Err(err) = connection.notify("pong", pong) {
                    debug!(error = %err, "Pong not sent");
                }
            }
            other => {
                debug!(method = other, params = %params.description(), "Notification ignored");
            }
        }
    }

    async fn on_disconnected(&self, connection: &ApiConnectionHandle) {
        self.sessions.remove(connection.peer());
    }
}
