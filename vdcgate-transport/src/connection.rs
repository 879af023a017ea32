//! One API connection over any byte stream.
//!
//! A spawned task owns the framed stream and the pending-answer table.
//! Handles talk to it through an unbounded channel, so outbound messages
//! leave in the order they were queued. Inbound calls and notifications go
//! to a second task that awaits the application handler one message at a
//! time; handlers that want to answer out of order move their
//! [`ApiRequest`] into a task of their own.

use crate::pending::{PendingAnswers, ResponseHandler};
use crate::transport::{ApiCodec, ApiMessage, TransportError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, info, info_span, warn, Instrument};
use vdcgate_core::{
    new_api_value, ApiError, ApiValuePtr, ApiValueType, ErrorCode, MessageId, ValueEncoding,
};

/// Application side of a connection.
#[async_trait]
pub trait ApiRequestHandler: Send + Sync + 'static {
    /// A call arrived. `request` must eventually be answered; dropping it
    /// unanswered sends an internal error.
    async fn handle_method(&self, request: ApiRequest, params: ApiValuePtr);

    /// A notification arrived. There is nothing to answer.
    async fn handle_notification(
        &self,
        connection: &ApiConnectionHandle,
        method: &str,
        params: ApiValuePtr,
    ) {
        let _ = params;
        warn!(
            peer = connection.peer(),
            method, "Notification ignored, no handler"
        );
    }

    async fn on_connected(&self, _connection: &ApiConnectionHandle) {}

    async fn on_disconnected(&self, _connection: &ApiConnectionHandle) {}
}

enum Command {
    Send(ApiMessage),
    Request {
        method: String,
        params: ApiValuePtr,
        handler: ResponseHandler,
    },
    CloseAfterSend,
    Close,
}

enum Inbound {
    Call {
        id: MessageId,
        method: String,
        params: ApiValuePtr,
    },
    Notification {
        method: String,
        params: ApiValuePtr,
    },
}

struct Shared {
    peer: String,
    encoding: ValueEncoding,
    closed: AtomicBool,
    commands: mpsc::UnboundedSender<Command>,
}

/// Cloneable handle to a running connection.
#[derive(Clone)]
pub struct ApiConnectionHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ApiConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConnectionHandle")
            .field("peer", &self.shared.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ApiConnectionHandle {
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    /// Value encoding of the underlying transport.
    pub fn encoding(&self) -> ValueEncoding {
        self.shared.encoding
    }

    /// Empty value suitable as params or result on this connection.
    pub fn new_value(&self, value_type: ApiValueType) -> ApiValuePtr {
        new_api_value(self.shared.encoding, value_type)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Send a call when `handler` is given, a notification otherwise.
    ///
    /// A given handler is invoked exactly once, with the response or with
    /// the error that prevented one, including when the connection is
    /// already closed.
    pub fn send_request(
        &self,
        method: &str,
        params: ApiValuePtr,
        handler: Option<ResponseHandler>,
    ) -> Result<(), TransportError> {
        let command = match handler {
            Some(handler) => Command::Request {
                method: method.to_string(),
                params,
                handler,
            },
            None => Command::Send(ApiMessage::Notification {
                method: method.to_string(),
                params,
            }),
        };
        if self.is_closed() {
            reject(command);
            return Err(TransportError::ConnectionClosed);
        }
        self.shared.commands.send(command).map_err(|err| {
            reject(err.0);
            TransportError::ConnectionClosed
        })
    }

    pub fn notify(&self, method: &str, params: ApiValuePtr) -> Result<(), TransportError> {
        self.send_request(method, params, None)
    }

    /// Send a call and wait for its outcome.
    pub async fn call(&self, method: &str, params: ApiValuePtr) -> Result<ApiValuePtr, ApiError> {
        let (tx, rx) = oneshot::channel();
        let handler: ResponseHandler = Box::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        // a failed send has already fed the handler
        let _ = self.send_request(method, params, Some(handler));
        rx.await
            .unwrap_or_else(|_| Err(ApiError::disconnected("connection closed")))
    }

    /// Close once everything queued so far has been written.
    pub fn close_after_send(&self) {
        let _ = self.shared.commands.send(Command::CloseAfterSend);
    }

    /// Close right away; queued outbound messages may be lost.
    pub fn close(&self) {
        let _ = self.shared.commands.send(Command::Close);
    }

    fn send(&self, message: ApiMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        self.shared
            .commands
            .send(Command::Send(message))
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

fn reject(command: Command) {
    if let Command::Request { handler, .. } = command {
        handler(Err(ApiError::disconnected("connection closed")));
    }
}

/// An inbound call waiting for its single answer.
pub struct ApiRequest {
    id: MessageId,
    method: String,
    connection: ApiConnectionHandle,
    answered: bool,
}

impl ApiRequest {
    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn connection(&self) -> &ApiConnectionHandle {
        &self.connection
    }

    pub fn new_value(&self, value_type: ApiValueType) -> ApiValuePtr {
        self.connection.new_value(value_type)
    }

    pub fn is_answered(&self) -> bool {
        self.answered
    }

    /// Answer with `result`, or with an empty success when `None`.
    pub fn send_result(&mut self, result: Option<ApiValuePtr>) {
        let result = result.unwrap_or_else(|| self.new_value(ApiValueType::Null));
        let message = ApiMessage::Result {
            id: self.id,
            method: self.method.clone(),
            result,
        };
        self.answer(message);
    }

    pub fn send_error(&mut self, error: ApiError) {
        let message = ApiMessage::Error { id: self.id, error };
        self.answer(message);
    }

    /// Answer with plain success (`None` or an OK code) or with the error.
    pub fn send_status(&mut self, status: Option<ApiError>) {
        match status {
            Some(error) if error.code != ErrorCode::Ok => self.send_error(error),
            _ => self.send_result(None),
        }
    }

    fn answer(&mut self, message: ApiMessage) {
        if self.answered {
            warn!(
                id = self.id.as_u32(),
                method = %self.method,
                "Request already answered, extra answer dropped"
            );
            return;
        }
        self.answered = true;
        if let Err(err) = self.connection.send(message) {
            debug!(id = self.id.as_u32(), error = %err, "Answer not sent");
        }
    }
}

impl Drop for ApiRequest {
    fn drop(&mut self) {
        if !self.answered {
            warn!(
                id = self.id.as_u32(),
                method = %self.method,
                "Request dropped without answer"
            );
            self.send_error(ApiError::internal(format!(
                "{} was not answered",
                self.method
            )));
        }
    }
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("answered", &self.answered)
            .finish()
    }
}

/// Start serving `stream` with `codec` and return a handle to the new
/// connection. Must be called within a tokio runtime.
pub fn spawn_connection<S, C>(
    stream: S,
    codec: C,
    peer: impl Into<String>,
    handler: Arc<dyn ApiRequestHandler>,
) -> ApiConnectionHandle
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: ApiCodec,
{
    let (commands, commands_rx) = mpsc::unbounded_channel();
    let handle = ApiConnectionHandle {
        shared: Arc::new(Shared {
            peer: peer.into(),
            encoding: codec.encoding(),
            closed: AtomicBool::new(false),
            commands,
        }),
    };

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let span = info_span!("connection", peer = %handle.peer());
    tokio::spawn(
        dispatch(handle.clone(), handler.clone(), inbound_rx).instrument(span.clone()),
    );
    tokio::spawn(
        run(
            Framed::new(stream, codec),
            handle.clone(),
            handler,
            commands_rx,
            inbound_tx,
        )
        .instrument(span),
    );
    handle
}

async fn dispatch(
    handle: ApiConnectionHandle,
    handler: Arc<dyn ApiRequestHandler>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    while let Some(message) = inbound.recv().await {
        if handle.is_closed() {
            debug!("Connection closed, discarding queued inbound messages");
            break;
        }
        match message {
            Inbound::Call { id, method, params } => {
                let request = ApiRequest {
                    id,
                    method,
                    connection: handle.clone(),
                    answered: false,
                };
                handler.handle_method(request, params).await;
            }
            Inbound::Notification { method, params } => {
                handler.handle_notification(&handle, &method, params).await;
            }
        }
    }
}

async fn run<S, C>(
    mut framed: Framed<S, C>,
    handle: ApiConnectionHandle,
    handler: Arc<dyn ApiRequestHandler>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::UnboundedSender<Inbound>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: ApiCodec,
{
    let mut pending = PendingAnswers::new();
    info!("Connection open");
    handler.on_connected(&handle).await;

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(message)) => {
                    debug!(message = %message.summary(), "Received");
                    if let Err(err) = receive(message, &mut framed, &mut pending, &inbound).await {
                        warn!(error = %err, "Connection failed while answering");
                        break;
                    }
                }
                Some(Err(err)) if !err.is_fatal() => {
                    warn!(error = %err, "Dropping undecodable message");
                }
                Some(Err(err)) => {
                    warn!(error = %err, "Fatal framing error, closing");
                    break;
                }
                None => {
                    info!("Peer closed the connection");
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(Command::Send(message)) => {
                    if let Err(err) = transmit(&mut framed, message).await {
                        warn!(error = %err, "Connection failed while sending");
                        break;
                    }
                }
                Some(Command::Request { method, params, handler }) => {
                    let id = pending.register(handler);
                    let message = ApiMessage::Call { id, method, params };
                    if let Err(err) = framed.send(message).await {
                        let fatal = err.is_fatal();
                        if let Some(handler) = pending.take(id) {
                            handler(Err(err.into()));
                        }
                        if fatal {
                            break;
                        }
                    }
                }
                Some(Command::CloseAfterSend) => {
                    if let Err(err) = SinkExt::<ApiMessage>::flush(&mut framed).await {
                        debug!(error = %err, "Flush before close failed");
                    }
                    break;
                }
                Some(Command::Close) | None => break,
            },
        }
    }

    handle.shared.closed.store(true, Ordering::Release);
    drop(inbound);
    pending.fail_all(&ApiError::disconnected("connection closed"));
    // requests queued behind the close still get their answer
    commands.close();
    while let Ok(command) = commands.try_recv() {
        reject(command);
    }
    if let Err(err) = SinkExt::<ApiMessage>::close(&mut framed).await {
        debug!(error = %err, "Error while closing stream");
    }
    info!("Connection closed");
    handler.on_disconnected(&handle).await;
}

async fn receive<S, C>(
    message: ApiMessage,
    framed: &mut Framed<S, C>,
    pending: &mut PendingAnswers,
    inbound: &mpsc::UnboundedSender<Inbound>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: ApiCodec,
{
    match message {
        ApiMessage::Call { id, method, params } => {
            let _ = inbound.send(Inbound::Call { id, method, params });
        }
        ApiMessage::Notification { method, params } => {
            let _ = inbound.send(Inbound::Notification { method, params });
        }
        ApiMessage::Result { id, result, .. } => {
            pending.resolve(id, Ok(result));
        }
        ApiMessage::Error { id, error } => {
            pending.resolve(id, Err(error));
        }
        ApiMessage::Invalid { id: Some(id), error } => {
            warn!(id = id.as_u32(), error = %error, "Answering invalid call with error");
            transmit(framed, ApiMessage::Error { id, error }).await?;
        }
        ApiMessage::Invalid { id: None, error } => {
            warn!(error = %error, "Invalid message dropped");
        }
    }
    Ok(())
}

/// Write one message. Errors that concern only this message are logged;
/// the error is returned only when the stream is unusable.
async fn transmit<S, C>(framed: &mut Framed<S, C>, message: ApiMessage) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    C: ApiCodec,
{
    let summary = message.summary();
    match framed.send(message).await {
        Ok(()) => {
            debug!(message = %summary, "Sent");
            Ok(())
        }
        Err(err) if !err.is_fatal() => {
            warn!(message = %summary, error = %err, "Message not sent");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}
