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

//! Long-running consumer of one side of a byte stream.
//!
//! [`MessageReader`] pulls frames off an `AsyncRead` and dispatches each to
//! a [`MessageHandler`]. Parse errors are per-frame, not fatal; the loop
//! ends on EOF, on an unrecoverable transport error, or when the
//! cancellation token fires.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::codec::{Frame, JsonRpcCodec};
use super::message::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ParseError};

/// Receives the frames pulled off a stream by [`MessageReader`].
///
/// Exactly one method is invoked per frame, sequentially on the reader's own
/// task, so handlers must not block indefinitely. `on_close` fires exactly
/// once, after the last frame, whatever ended the loop.
#[async_trait]
pub trait MessageHandler: Send {
    async fn on_request(&mut self, request: JsonRpcRequest) -> anyhow::Result<()>;

    async fn on_response(&mut self, response: JsonRpcResponse) -> anyhow::Result<()>;

    async fn on_notification(&mut self, notification: JsonRpcNotification) -> anyhow::Result<()>;

    async fn on_parse_error(&mut self, raw: Bytes, error: ParseError) -> anyhow::Result<()>;

    async fn on_close(&mut self) {}
}

/// Reads newline-delimited JSON-RPC messages until the source runs dry.
pub struct MessageReader<R> {
    framed: FramedRead<R, JsonRpcCodec>,
}

impl<R: AsyncRead + Unpin + Send> MessageReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            framed: FramedRead::new(source, JsonRpcCodec::new()),
        }
    }

    /// Wrap an existing framed stream, keeping any bytes it has buffered.
    pub(crate) fn from_framed(framed: FramedRead<R, JsonRpcCodec>) -> Self {
        Self { framed }
    }

    /// Consume frames until EOF, a fatal transport error, or cancellation.
    ///
    /// Handler errors are logged and do not stop the loop; a handler that
    /// wants to stop consumption should cancel the token instead.
    pub async fn run<H: MessageHandler>(mut self, mut handler: H, cancel: CancellationToken) {
        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => break,
                frame = self.framed.next() => frame,
            };
            match frame {
                None => break,
                Some(Ok(Frame::Message(msg))) => {
                    let result = match msg {
                        JsonRpcMessage::Request(m) => handler.on_request(m).await,
                        JsonRpcMessage::Response(m) => handler.on_response(m).await,
                        JsonRpcMessage::Notification(m) => handler.on_notification(m).await,
                    };
                    if let Err(error) = result {
                        warn!(%error, "message handler failed");
                    }
                }
                Some(Ok(Frame::Malformed { raw, error })) => {
                    if let Err(error) = handler.on_parse_error(raw, error).await {
                        warn!(%error, "parse error handler failed");
                    }
                }
                Some(Err(error)) => {
                    warn!(%error, "transport error, closing reader");
                    break;
                }
            }
        }
        handler.on_close().await;
    }
}
