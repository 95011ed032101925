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

//! The proxy driver.
//!
//! Wires a client-side reader to the auto-reconnecting server connection.
//! When forwarding fails the client still gets an answer: a JSON-RPC error
//! response for a request, an unsolicited error notification for a
//! notification (the protocol forbids answering those with a response), and
//! a parse-error response for unparseable input. Everything except shutdown
//! leaves the proxy running and willing to reconnect on the next message.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{jsonrpc, methods};

use super::message::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ParseError,
};
use super::reader::{MessageHandler, MessageReader};
use super::reconnect::{Dialer, ReconnectError, ServerConn};
use super::writer::{FramedMessageWriter, MessageWriter};

/// Renders a forwarding failure into the text shown to the client.
pub type MakeUserMessage = Arc<dyn Fn(&ReconnectError) -> String + Send + Sync>;

/// Configuration for [`proxy_stdio_conn`].
pub struct ProxyConfig<C> {
    /// The client-facing duplex stream, typically stdin/stdout.
    pub client_stdio: C,
    /// Produces upstream connections.
    pub dialer: Arc<dyn Dialer>,
    /// Renders a forwarding failure into user-visible text.
    pub make_user_message: MakeUserMessage,
    /// Method of the notification synthesized when a client notification is
    /// dropped. Defaults to [`methods::NOTIFICATION_PROXY_ERROR`].
    pub error_notification_method: Option<String>,
    /// Test hook observing upstream connection loss.
    pub on_server_conn_closed: Option<Box<dyn Fn() + Send + Sync>>,
}

/// Proxy a client's stdio connection to an auto-reconnecting upstream.
///
/// Runs until the client stream closes or `cancel` fires; both are normal
/// termination, not errors.
pub async fn proxy_stdio_conn<C>(cfg: ProxyConfig<C>, cancel: CancellationToken) -> anyhow::Result<()>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
{
    let session_id = uuid::Uuid::new_v4();
    info!(%session_id, "proxy session started");

    let (client_read, client_write) = tokio::io::split(cfg.client_stdio);
    let client_writer: Arc<dyn MessageWriter> = Arc::new(FramedMessageWriter::new(client_write));

    let server_conn = ServerConn::new(
        cfg.dialer,
        Arc::clone(&client_writer),
        cancel.clone(),
        cfg.on_server_conn_closed,
    );

    let handler = ClientHandler {
        server_conn,
        client_writer,
        make_user_message: cfg.make_user_message,
        error_notification_method: cfg
            .error_notification_method
            .unwrap_or_else(|| methods::NOTIFICATION_PROXY_ERROR.to_string()),
    };

    MessageReader::new(client_read).run(handler, cancel).await;

    info!(%session_id, "proxy session ended");
    Ok(())
}

/// Handles frames arriving from the client's read side.
struct ClientHandler {
    server_conn: ServerConn,
    client_writer: Arc<dyn MessageWriter>,
    make_user_message: MakeUserMessage,
    error_notification_method: String,
}

#[async_trait]
impl MessageHandler for ClientHandler {
    async fn on_request(&mut self, request: JsonRpcRequest) -> anyhow::Result<()> {
        let id = request.id.clone();
        let method = request.method.clone();
        let msg = JsonRpcMessage::Request(request);
        if let Err(write_error) = self.server_conn.write_message(&msg).await {
            if matches!(write_error, ReconnectError::Cancelled) {
                return Ok(());
            }
            warn!(%write_error, %method, %id, "failed to write request to the server");
            let reply = JsonRpcResponse::error(
                Some(id),
                jsonrpc::ERROR_INTERNAL,
                (self.make_user_message)(&write_error),
                Some(Value::String(write_error.to_string())),
            );
            self.client_writer
                .write_message(&JsonRpcMessage::Response(reply))
                .await?;
        }
        Ok(())
    }

    async fn on_notification(&mut self, notification: JsonRpcNotification) -> anyhow::Result<()> {
        let method = notification.method.clone();
        let msg = JsonRpcMessage::Notification(notification);
        if let Err(write_error) = self.server_conn.write_message(&msg).await {
            if matches!(write_error, ReconnectError::Cancelled) {
                return Ok(());
            }
            // The protocol forbids replying to a notification with a
            // response; an unsolicited notification is the closest legal
            // signal.
            warn!(%write_error, %method,
                "failed to write notification to the server, notification dropped");
            let user_message = (self.make_user_message)(&write_error);
            let dropped = JsonRpcNotification::new(
                self.error_notification_method.clone(),
                Some(json!({
                    "error": format!("Notification {method:?} was dropped. {user_message}"),
                })),
            );
            self.client_writer
                .write_message(&JsonRpcMessage::Notification(dropped))
                .await?;
        }
        Ok(())
    }

    async fn on_response(&mut self, response: JsonRpcResponse) -> anyhow::Result<()> {
        // Clients only answer server-initiated requests, which this proxy
        // does not forward; nothing upstream is waiting for this.
        debug!(id = ?response.id, "dropping response from the client");
        Ok(())
    }

    async fn on_parse_error(&mut self, _raw: Bytes, error: ParseError) -> anyhow::Result<()> {
        warn!(%error, "failed to parse client message");
        let reply = JsonRpcResponse::error(
            None,
            jsonrpc::ERROR_PARSE,
            format!("request parse error: {error}"),
            None,
        );
        self.client_writer
            .write_message(&JsonRpcMessage::Response(reply))
            .await?;
        Ok(())
    }
}
