// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The auto-reconnecting server connection.
//!
//! [`ServerConn`] owns the single live upstream stream. Its first write
//! dials and installs a fan-out writer that records the client's initialize
//! handshake; when the upstream dies, the next write dials again and replays
//! the recorded handshake before any fresh traffic, so the session resumes
//! without the client noticing. A replacement server that reports a
//! different identity is rejected.

use std::io;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::methods;

use super::codec::{Frame, JsonRpcCodec};
use super::message::{
    InitializeResult, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ParseError, ServerInfo,
};
use super::reader::{MessageHandler, MessageReader};
use super::writer::{FramedMessageWriter, MessageWriter, MultiMessageWriter};

/// A bidirectional byte stream to an MCP server.
pub trait ServerStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ServerStream for T {}

type ServerReadHalf = ReadHalf<Box<dyn ServerStream>>;
type ServerWriteHalf = WriteHalf<Box<dyn ServerStream>>;

/// Produces a fresh upstream connection on demand.
///
/// Ownership of the returned stream passes to the caller, which closes it on
/// reconnect or shutdown.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> io::Result<Box<dyn ServerStream>>;
}

/// Failure modes of writing through the auto-reconnecting connection.
#[derive(Debug, Error)]
pub enum ReconnectError {
    #[error("failed to connect to the server: {0}")]
    Dial(#[source] io::Error),
    #[error("client has not initialized yet")]
    NotInitialized,
    #[error("expected an initialize result in reply, got {got}")]
    ReplyNotInitializeResult { got: String },
    #[error("server replied to the initialize replay with an error: {message}")]
    ReplyIsError { message: String },
    #[error("expected initialize reply with id {expected}, got {got}")]
    ReplyIdMismatch { expected: String, got: String },
    #[error("server info has changed, expected {expected}, got {got}")]
    ServerIdentityChanged {
        expected: ServerInfo,
        got: ServerInfo,
    },
    #[error("failed to write to the server: {0}")]
    Forward(#[source] io::Error),
    #[error("proxy is shutting down")]
    Cancelled,
}

/// The three handshake messages resumed against a fresh upstream.
///
/// Slots fill monotonically: once set, a slot is never overwritten, and a
/// complete cache ignores further offers.
#[derive(Debug, Default)]
pub(crate) struct InitCache {
    request: Option<JsonRpcRequest>,
    response: Option<InitializeResult>,
    notification: Option<JsonRpcNotification>,
}

impl InitCache {
    fn is_complete(&self) -> bool {
        self.request.is_some() && self.response.is_some() && self.notification.is_some()
    }

    /// Offer a message for recording. Only the handshake triple is kept.
    fn offer(&mut self, msg: &JsonRpcMessage) {
        if self.is_complete() {
            return;
        }
        match msg {
            JsonRpcMessage::Request(req)
                if self.request.is_none() && req.method == methods::INITIALIZE =>
            {
                debug!(id = %req.id, "recorded initialize request");
                self.request = Some(req.clone());
            }
            JsonRpcMessage::Notification(notification)
                if self.notification.is_none()
                    && notification.method == methods::NOTIFICATION_INITIALIZED =>
            {
                debug!("recorded initialized notification");
                self.notification = Some(notification.clone());
            }
            JsonRpcMessage::Response(resp) if self.response.is_none() => {
                let Some(request) = &self.request else {
                    return;
                };
                if resp.id.as_ref() != Some(&request.id) {
                    return;
                }
                match resp.initialize_result() {
                    Some(result) => {
                        debug!(server_info = %result.server_info, "recorded initialize response");
                        self.response = Some(result);
                    }
                    None => {
                        debug!("response matches the initialize request id but carries no initialize result");
                    }
                }
            }
            _ => {}
        }
    }

    /// Clone out the complete triple, or `None` while any slot is empty.
    fn snapshot(&self) -> Option<(JsonRpcRequest, InitializeResult, JsonRpcNotification)> {
        Some((
            self.request.clone()?,
            self.response.clone()?,
            self.notification.clone()?,
        ))
    }
}

/// First slot of the fan-out installed on the very first connect: records
/// the handshake without touching the wire.
struct CacheWriter {
    cache: Arc<Mutex<InitCache>>,
}

#[async_trait]
impl MessageWriter for CacheWriter {
    async fn write_message(&self, msg: &JsonRpcMessage) -> io::Result<()> {
        self.cache.lock().await.offer(msg);
        Ok(())
    }
}

/// Validate the server's reply to a replayed initialize request.
fn check_replay_reply(
    reply: &JsonRpcMessage,
    request: &JsonRpcRequest,
    cached: &InitializeResult,
) -> Result<(), ReconnectError> {
    let JsonRpcMessage::Response(resp) = reply else {
        return Err(ReconnectError::ReplyNotInitializeResult {
            got: reply.describe().to_string(),
        });
    };
    if let Some(error) = &resp.error {
        return Err(ReconnectError::ReplyIsError {
            message: error.message.clone(),
        });
    }
    if resp.id.as_ref() != Some(&request.id) {
        return Err(ReconnectError::ReplyIdMismatch {
            expected: request.id.to_string(),
            got: resp
                .id
                .as_ref()
                .map_or_else(|| "null".to_string(), ToString::to_string),
        });
    }
    let Some(result) = resp.initialize_result() else {
        return Err(ReconnectError::ReplyNotInitializeResult {
            got: "a response without an initialize result".to_string(),
        });
    };
    if result.server_info != cached.server_info {
        return Err(ReconnectError::ServerIdentityChanged {
            expected: cached.server_info.clone(),
            got: result.server_info,
        });
    }
    Ok(())
}

/// The mutable connection slot. All transitions happen under one mutex.
#[derive(Default)]
struct Slot {
    /// Write side of the live upstream, or `None` while idle.
    writer: Option<Arc<dyn MessageWriter>>,
    /// `false` until the first successful connect, `true` thereafter.
    replay_on_next_conn: bool,
    /// Counts installed connections, so a close notice from a dead reader
    /// cannot clear a newer connection's writer.
    generation: u64,
}

struct ConnInner {
    dialer: Arc<dyn Dialer>,
    client_writer: Arc<dyn MessageWriter>,
    cancel: CancellationToken,
    on_server_conn_closed: Option<Box<dyn Fn() + Send + Sync>>,
    cache: Arc<Mutex<InitCache>>,
    slot: Mutex<Slot>,
}

/// Client-facing handle to the single live upstream connection.
///
/// Created idle; the first write dials. On upstream close it reverts to idle
/// and the next write dials again, replaying the handshake. Transient dial
/// failures are not retried internally: the error goes to the caller and the
/// next write tries again.
pub struct ServerConn {
    inner: Arc<ConnInner>,
}

impl ServerConn {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        client_writer: Arc<dyn MessageWriter>,
        cancel: CancellationToken,
        on_server_conn_closed: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                dialer,
                client_writer,
                cancel,
                on_server_conn_closed,
                cache: Arc::new(Mutex::new(InitCache::default())),
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    /// Write one message to the live upstream, dialing first (and replaying
    /// the recorded handshake) if no connection is up.
    ///
    /// The slot mutex is held across connect, replay, and the delegated
    /// write, so client messages reach the upstream in client order and the
    /// handshake replay never interleaves with fresh traffic.
    pub async fn write_message(&self, msg: &JsonRpcMessage) -> Result<(), ReconnectError> {
        let mut slot = tokio::select! {
            guard = self.inner.slot.lock() => guard,
            () = self.inner.cancel.cancelled() => return Err(ReconnectError::Cancelled),
        };
        let writer = self.inner.ensure_connected(&mut slot).await?;
        writer
            .write_message(msg)
            .await
            .map_err(ReconnectError::Forward)
    }
}

impl ConnInner {
    /// Return the current upstream writer, dialing a new connection if the
    /// slot is idle. Caller holds the slot mutex.
    async fn ensure_connected(
        self: &Arc<Self>,
        slot: &mut Slot,
    ) -> Result<Arc<dyn MessageWriter>, ReconnectError> {
        if let Some(writer) = &slot.writer {
            return Ok(Arc::clone(writer));
        }

        info!("connecting to the server");
        let stream = tokio::select! {
            result = self.dialer.dial() => result.map_err(ReconnectError::Dial)?,
            () = self.cancel.cancelled() => return Err(ReconnectError::Cancelled),
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let mut framed_read = FramedRead::new(read_half, JsonRpcCodec::new());
        let server_writer = Arc::new(FramedMessageWriter::new(write_half));

        let writer: Arc<dyn MessageWriter> = if slot.replay_on_next_conn {
            // An error drops both halves here, closing the new upstream.
            self.replay_initialize(&server_writer, &mut framed_read)
                .await?;
            server_writer
        } else {
            let cache_writer: Arc<dyn MessageWriter> = Arc::new(CacheWriter {
                cache: Arc::clone(&self.cache),
            });
            let forward_writer: Arc<dyn MessageWriter> = server_writer;
            slot.replay_on_next_conn = true;
            Arc::new(MultiMessageWriter::new(vec![cache_writer, forward_writer]))
        };

        slot.generation += 1;
        slot.writer = Some(Arc::clone(&writer));

        let handler = UpstreamHandler {
            conn: Arc::downgrade(self),
            client_writer: Arc::clone(&self.client_writer),
            cache: Arc::clone(&self.cache),
            generation: slot.generation,
        };
        let reader = MessageReader::from_framed(framed_read);
        let cancel = self.cancel.child_token();
        tokio::spawn(async move { reader.run(handler, cancel).await });

        info!("started a new server connection");
        Ok(writer)
    }

    /// Send the recorded initialize request and initialized notification to
    /// a fresh upstream, checking that the server answers with the same id
    /// and the same identity it had before. The replayed response is
    /// consumed here and never forwarded to the client.
    async fn replay_initialize(
        &self,
        writer: &FramedMessageWriter<ServerWriteHalf>,
        framed: &mut FramedRead<ServerReadHalf, JsonRpcCodec>,
    ) -> Result<(), ReconnectError> {
        let (request, cached_result, notification) = {
            let cache = self.cache.lock().await;
            match cache.snapshot() {
                Some(triple) => triple,
                None => return Err(ReconnectError::NotInitialized),
            }
        };

        info!(id = %request.id, "replaying initialize request");
        writer
            .write_message(&JsonRpcMessage::Request(request.clone()))
            .await
            .map_err(ReconnectError::Forward)?;

        let frame = tokio::select! {
            frame = framed.next() => frame,
            () = self.cancel.cancelled() => return Err(ReconnectError::Cancelled),
        };
        let reply = match frame {
            Some(Ok(Frame::Message(msg))) => msg,
            Some(Ok(Frame::Malformed { error, .. })) => {
                return Err(ReconnectError::ReplyNotInitializeResult {
                    got: format!("an unparseable message ({error})"),
                });
            }
            Some(Err(error)) => return Err(ReconnectError::Forward(error.into())),
            None => {
                return Err(ReconnectError::Forward(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed during handshake replay",
                )));
            }
        };

        debug!("comparing initialize replay reply");
        check_replay_reply(&reply, &request, &cached_result)?;

        info!("replaying initialized notification");
        writer
            .write_message(&JsonRpcMessage::Notification(notification))
            .await
            .map_err(ReconnectError::Forward)
    }

    /// Reader noticed the upstream is gone: revert the slot to idle, unless
    /// a newer connection has already been installed.
    async fn handle_server_conn_closed(&self, generation: u64) {
        {
            let mut slot = self.slot.lock().await;
            if slot.generation != generation {
                debug!(generation, "ignoring close notice from a replaced connection");
                return;
            }
            if slot.writer.take().is_some() {
                info!("lost server connection, resetting");
            }
        }
        if let Some(hook) = &self.on_server_conn_closed {
            hook();
        }
    }
}

/// Handles frames arriving from the upstream's read side.
///
/// Holds only a weak reference to the connection, so a lingering reader task
/// never keeps a torn-down connection alive.
struct UpstreamHandler {
    conn: Weak<ConnInner>,
    client_writer: Arc<dyn MessageWriter>,
    cache: Arc<Mutex<InitCache>>,
    generation: u64,
}

#[async_trait]
impl MessageHandler for UpstreamHandler {
    async fn on_request(&mut self, request: JsonRpcRequest) -> anyhow::Result<()> {
        // Server-initiated requests are not part of the resumable session.
        warn!(method = %request.method, id = %request.id, "dropping server-initiated request");
        Ok(())
    }

    async fn on_response(&mut self, response: JsonRpcResponse) -> anyhow::Result<()> {
        let msg = JsonRpcMessage::Response(response);
        self.cache.lock().await.offer(&msg);
        self.client_writer.write_message(&msg).await?;
        Ok(())
    }

    async fn on_notification(&mut self, notification: JsonRpcNotification) -> anyhow::Result<()> {
        self.client_writer
            .write_message(&JsonRpcMessage::Notification(notification))
            .await?;
        Ok(())
    }

    async fn on_parse_error(&mut self, _raw: Bytes, error: ParseError) -> anyhow::Result<()> {
        warn!(%error, "ignoring malformed message from the server");
        Ok(())
    }

    async fn on_close(&mut self) {
        if let Some(conn) = self.conn.upgrade() {
            conn.handle_server_conn_closed(self.generation).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn init_request() -> JsonRpcRequest {
        JsonRpcRequest::new(
            1,
            methods::INITIALIZE,
            Some(json!({"clientInfo": {"name": "test-client", "version": "1.0"}})),
        )
    }

    fn init_response(version: &str) -> JsonRpcResponse {
        JsonRpcResponse::success(
            1.into(),
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "serverInfo": {"name": "test-server", "version": version}
            }),
        )
    }

    fn init_notification() -> JsonRpcNotification {
        JsonRpcNotification::new(methods::NOTIFICATION_INITIALIZED, None)
    }

    fn complete_cache() -> InitCache {
        let mut cache = InitCache::default();
        cache.offer(&init_request().into());
        cache.offer(&init_response("1.0.0").into());
        cache.offer(&init_notification().into());
        cache
    }

    #[test]
    fn test_cache_fills_from_handshake_messages() {
        let cache = complete_cache();
        assert!(cache.is_complete());
        let (request, result, _) = cache.snapshot().unwrap();
        assert_eq!(request.method, methods::INITIALIZE);
        assert_eq!(result.server_info.version, "1.0.0");
    }

    #[test]
    fn test_cache_ignores_unrelated_messages() {
        let mut cache = InitCache::default();
        cache.offer(&JsonRpcRequest::new(5, "tools/call", None).into());
        cache.offer(&JsonRpcNotification::new("notifications/progress", None).into());
        assert!(cache.snapshot().is_none());
        assert!(cache.request.is_none());
        assert!(cache.notification.is_none());
    }

    #[test]
    fn test_cache_requires_matching_response_id() {
        let mut cache = InitCache::default();
        cache.offer(&init_request().into());

        let mut wrong_id = init_response("1.0.0");
        wrong_id.id = Some(99.into());
        cache.offer(&wrong_id.into());
        assert!(cache.response.is_none());

        // A string id does not match the numeric request id either.
        let mut string_id = init_response("1.0.0");
        string_id.id = Some("1".into());
        cache.offer(&string_id.into());
        assert!(cache.response.is_none());

        cache.offer(&init_response("1.0.0").into());
        assert!(cache.response.is_some());
    }

    #[test]
    fn test_cache_slots_are_never_overwritten() {
        let mut cache = complete_cache();

        let mut other_request = init_request();
        other_request.id = 42.into();
        cache.offer(&other_request.into());
        cache.offer(&init_response("9.9.9").into());

        let (request, result, _) = cache.snapshot().unwrap();
        assert_eq!(request.id, 1.into());
        assert_eq!(result.server_info.version, "1.0.0");
    }

    #[test]
    fn test_cache_response_needs_initialize_result() {
        let mut cache = InitCache::default();
        cache.offer(&init_request().into());
        cache.offer(&JsonRpcResponse::success(1.into(), json!({"content": []})).into());
        assert!(cache.response.is_none());
    }

    #[test]
    fn test_replay_reply_accepts_identical_server() {
        let cached = init_response("1.0.0").initialize_result().unwrap();
        let reply = init_response("1.0.0").into();
        assert!(check_replay_reply(&reply, &init_request(), &cached).is_ok());
    }

    #[test]
    fn test_replay_reply_rejects_non_response() {
        let cached = init_response("1.0.0").initialize_result().unwrap();
        let reply = JsonRpcNotification::new("notifications/progress", None).into();
        assert!(matches!(
            check_replay_reply(&reply, &init_request(), &cached),
            Err(ReconnectError::ReplyNotInitializeResult { .. })
        ));
    }

    #[test]
    fn test_replay_reply_rejects_error_response() {
        let cached = init_response("1.0.0").initialize_result().unwrap();
        let reply = JsonRpcResponse::error(Some(1.into()), -32603, "boom", None).into();
        assert!(matches!(
            check_replay_reply(&reply, &init_request(), &cached),
            Err(ReconnectError::ReplyIsError { .. })
        ));
    }

    #[test]
    fn test_replay_reply_rejects_id_mismatch() {
        let cached = init_response("1.0.0").initialize_result().unwrap();
        let mut reply = init_response("1.0.0");
        reply.id = Some(2.into());
        assert!(matches!(
            check_replay_reply(&reply.into(), &init_request(), &cached),
            Err(ReconnectError::ReplyIdMismatch { .. })
        ));
    }

    #[test]
    fn test_replay_reply_rejects_changed_server_info() {
        let cached = init_response("1.0.0").initialize_result().unwrap();
        let reply = init_response("2.0.0").into();
        let err = check_replay_reply(&reply, &init_request(), &cached).unwrap_err();
        assert!(err.to_string().contains("server info has changed"));
    }
}
