// Connection behaviour over in-memory streams
// Covers call/response correlation, answer idempotence, disconnect handling
// and framing failures for both wire formats

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;
use vdcgate_core::{
    ApiError, ApiValue, ApiValuePtr, ApiValueType, ErrorCode, ErrorType, JsonApiValue,
    StructApiValue,
};
use vdcgate_transport::{
    spawn_connection, ApiConnectionHandle, ApiRequest, ApiRequestHandler, ApiRole, JsonRpcCodec,
    ProtobufCodec, ResponseHandler,
};

/// Test-side application handler. Behaviour is picked per method name.
#[derive(Default)]
struct Peer {
    parked: Mutex<Vec<(ApiRequest, ApiValuePtr)>>,
    calls: AtomicUsize,
    notifications: Mutex<Vec<String>>,
    disconnected: Notify,
    notified: Notify,
}

#[async_trait]
impl ApiRequestHandler for Peer {
    async fn handle_method(&self, mut request: ApiRequest, params: ApiValuePtr) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let method = request.method().to_string();
        match method.as_str() {
            // echo back the dSUID, answering pairs in reverse order
            "hello" => {
                let mut parked = self.parked.lock().unwrap();
                parked.push((request, params));
                if parked.len() == 2 {
                    while let Some((mut request, params)) = parked.pop() {
                        let mut result = request.new_value(ApiValueType::Object);
                        result.add_string("dSUID", &params.get_string("dSUID").unwrap_or_default());
                        request.send_result(Some(result));
                    }
                }
            }
            "getProperty" => {
                let mut result = request.new_value(ApiValueType::Object);
                result.add_string("name", "lamp");
                result.add_int64("zoneID", 7);
                request.send_result(Some(result));
            }
            "setProperty" => {
                request.send_status(None);
                request.send_error(ApiError::forbidden("too late"));
            }
            "remove" => {
                self.parked.lock().unwrap().push((request, params));
            }
            "bye" => drop(request),
            other => {
                let error = ApiError::method_unknown(other);
                request.send_error(error);
            }
        }
    }

    async fn handle_notification(
        &self,
        connection: &ApiConnectionHandle,
        method: &str,
        _params: ApiValuePtr,
    ) {
        self.notifications.lock().unwrap().push(method.to_string());
        if method == "ping" {
            let mut params = connection.new_value(ApiValueType::Object);
            params.add_string("dSUID", "vdc");
            connection.notify("pong", params).unwrap();
        }
        self.notified.notify_one();
    }

    async fn on_disconnected(&self, _connection: &ApiConnectionHandle) {
        self.disconnected.notify_one();
    }
}

fn json_pair() -> (ApiConnectionHandle, Arc<Peer>, ApiConnectionHandle, Arc<Peer>) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let server = Arc::new(Peer::default());
    let client = Arc::new(Peer::default());
    let server_conn = spawn_connection(a, JsonRpcCodec::new(), "client", server.clone());
    let client_conn = spawn_connection(b, JsonRpcCodec::new(), "server", client.clone());
    (server_conn, server, client_conn, client)
}

fn protobuf_pair() -> (ApiConnectionHandle, Arc<Peer>, ApiConnectionHandle, Arc<Peer>) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let vdc = Arc::new(Peer::default());
    let vdsm = Arc::new(Peer::default());
    let vdc_conn = spawn_connection(a, ProtobufCodec::new(ApiRole::Vdc), "vdsm", vdc.clone());
    let vdsm_conn = spawn_connection(b, ProtobufCodec::new(ApiRole::Vdsm), "vdc", vdsm.clone());
    (vdc_conn, vdc, vdsm_conn, vdsm)
}

fn json_params(value: serde_json::Value) -> ApiValuePtr {
    JsonApiValue::from_json(value)
}

fn struct_params(value: serde_json::Value) -> ApiValuePtr {
    StructApiValue::from_json(&value)
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

#[cfg(test)]
mod correlation_tests {
    use super::*;

    #[tokio::test]
    async fn test_responses_in_reverse_order_reach_their_callers() {
        let (_server_conn, _server, client_conn, _client) = json_pair();

        let first = client_conn.call("hello", json_params(json!({"dSUID": "first"})));
        let second = client_conn.call("hello", json_params(json!({"dSUID": "second"})));
        let (first, second) = within(async { tokio::join!(first, second) }).await;

        assert_eq!(first.unwrap().get_string("dSUID").as_deref(), Some("first"));
        assert_eq!(second.unwrap().get_string("dSUID").as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_only_first_answer_counts() {
        let (_server_conn, _server, client_conn, _client) = json_pair();

        let status = within(client_conn.call("setProperty", json_params(json!({}))))
            .await
            .unwrap();
        assert!(status.is_null());

        // the connection still correlates correctly afterwards
        let result = within(client_conn.call("getProperty", json_params(json!({}))))
            .await
            .unwrap();
        assert_eq!(result.get_string("name").as_deref(), Some("lamp"));
    }

    #[tokio::test]
    async fn test_unknown_method_gets_error_answer() {
        let (_server_conn, _server, client_conn, _client) = json_pair();

        let err = within(client_conn.call("frobnicate", json_params(json!(null))))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MethodNotAllowed);
    }

    #[tokio::test]
    async fn test_dropped_request_is_answered_with_internal_error() {
        let (_server_conn, _server, client_conn, _client) = json_pair();

        let err = within(client_conn.call("bye", json_params(json!({}))))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Internal);
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_close_fails_outstanding_calls() {
        let (server_conn, server, client_conn, client) = json_pair();

        let pending = tokio::spawn({
            let client_conn = client_conn.clone();
            async move { client_conn.call("remove", json_params(json!({}))).await }
        });
        while server.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        server_conn.close();

        let err = within(pending).await.unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);
        assert_eq!(err.error_type, ErrorType::Disconnected);

        within(client.disconnected.notified()).await;
        assert!(client_conn.is_closed());

        // calls on a closed connection fail right away
        let err = within(client_conn.call("hello", json_params(json!({}))))
            .await
            .unwrap_err();
        assert_eq!(err.error_type, ErrorType::Disconnected);
    }

    #[tokio::test]
    async fn test_request_queued_behind_close_is_rejected() {
        let (_server_conn, _server, client_conn, _client) = json_pair();

        client_conn.close();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handler: ResponseHandler = Box::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        // queued or refused outright, the handler runs either way
        let _ = client_conn.send_request(
            "announcevdc",
            json_params(json!({"dSUID": "vdc"})),
            Some(handler),
        );

        let err = within(rx).await.unwrap().unwrap_err();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);
        assert_eq!(err.error_type, ErrorType::Disconnected);
    }

    #[tokio::test]
    async fn test_close_after_send_flushes_queued_notification() {
        let (conn_side, mut raw) = tokio::io::duplex(64 * 1024);
        let peer = Arc::new(Peer::default());
        let conn = spawn_connection(conn_side, JsonRpcCodec::new(), "raw", peer.clone());

        conn.notify("vanish", json_params(json!({"dSUID": "x"}))).unwrap();
        conn.close_after_send();

        let mut received = Vec::new();
        within(raw.read_to_end(&mut received)).await.unwrap();
        let line: serde_json::Value =
            serde_json::from_slice(received.strip_suffix(b"\n").unwrap()).unwrap();
        assert_eq!(line["method"], json!("vanish"));
        assert_eq!(line["params"], json!({"dSUID": "x"}));
        assert!(line.get("id").is_none());

        within(peer.disconnected.notified()).await;
        assert!(conn.is_closed());
    }
}

#[cfg(test)]
mod protobuf_tests {
    use super::*;

    #[tokio::test]
    async fn test_get_property_round_trip() {
        let (_vdc_conn, _vdc, vdsm_conn, _vdsm) = protobuf_pair();

        let params = struct_params(json!({"dSUID": "dev", "query": {"name": null}}));
        let result = within(vdsm_conn.call("getProperty", params)).await.unwrap();
        assert_eq!(result.to_json(), json!({"name": "lamp", "zoneID": 7}));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (_vdc_conn, vdc, vdsm_conn, vdsm) = protobuf_pair();

        vdsm_conn
            .notify("ping", struct_params(json!({"dSUID": "vdc"})))
            .unwrap();
        within(vdc.notified.notified()).await;
        within(vdsm.notified.notified()).await;
        assert_eq!(*vdsm.notifications.lock().unwrap(), vec!["pong"]);
    }

    #[tokio::test]
    async fn test_method_without_tag_fails_locally() {
        let (_vdc_conn, vdc, vdsm_conn, _vdsm) = protobuf_pair();

        let err = within(vdsm_conn.call("pong", struct_params(json!({}))))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MethodNotAllowed);
        assert_eq!(vdc.calls.load(Ordering::SeqCst), 0);
        assert!(!vdsm_conn.is_closed());
    }

    #[tokio::test]
    async fn test_generic_error_response() {
        let (_vdc_conn, _vdc, vdsm_conn, _vdsm) = protobuf_pair();

        let err = within(vdsm_conn.call("genericRequest", struct_params(json!({"methodname": "x"}))))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::MethodNotAllowed);
    }
}

#[cfg(test)]
mod framing_tests {
    use super::*;

    async fn raw_vdc() -> (DuplexStream, Arc<Peer>) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let vdc = Arc::new(Peer::default());
        spawn_connection(a, ProtobufCodec::new(ApiRole::Vdc), "raw", vdc.clone());
        (b, vdc)
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_without_dispatch() {
        let (mut raw, vdc) = raw_vdc().await;

        raw.write_all(&[0xff, 0xff, 0x08, 0x02]).await.unwrap();
        within(vdc.disconnected.notified()).await;

        let mut buf = [0u8; 16];
        let n = within(raw.read(&mut buf)).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(vdc.calls.load(Ordering::SeqCst), 0);
        assert!(vdc.notifications.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_body_closes_without_dispatch() {
        let (mut raw, vdc) = raw_vdc().await;

        // field 1 with wire type 7, followed by a valid ping frame
        raw.write_all(&[0x00, 0x02, 0x0f, 0x00]).await.unwrap();
        raw.write_all(&[0x00, 0x05, 0x08, 0x08, 0xca, 0x06, 0x00])
            .await
            .unwrap();
        within(vdc.disconnected.notified()).await;

        assert!(vdc.notifications.lock().unwrap().is_empty());
        assert_eq!(vdc.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_frame_split_across_writes() {
        let (mut raw, vdc) = raw_vdc().await;

        // ping notification: type 8, empty payload in slot 105
        let body = [0x08, 0x08, 0xca, 0x06, 0x00];
        raw.write_all(&[0x00, body.len() as u8]).await.unwrap();
        raw.write_all(&body[..2]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(vdc.notifications.lock().unwrap().is_empty());

        raw.write_all(&body[2..]).await.unwrap();
        within(vdc.notified.notified()).await;
        assert_eq!(*vdc.notifications.lock().unwrap(), vec!["ping"]);
    }
}
