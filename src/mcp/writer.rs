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

//! Message sinks.
//!
//! [`MessageWriter`] is the uniform write side of the proxy: one call writes
//! one message, atomically. [`FramedMessageWriter`] puts messages on a byte
//! stream; [`MultiMessageWriter`] fans a message out to several sinks.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;

use super::codec::JsonRpcCodec;
use super::message::JsonRpcMessage;

/// A sink for JSON-RPC messages.
#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Write one message. Succeeds or fails atomically.
    async fn write_message(&self, msg: &JsonRpcMessage) -> io::Result<()>;
}

/// Writes messages to an `AsyncWrite` as newline-delimited JSON.
///
/// The internal mutex serializes callers so the bytes of two messages never
/// interleave on the underlying stream.
pub struct FramedMessageWriter<W> {
    inner: Mutex<FramedWrite<W, JsonRpcCodec>>,
}

impl<W: AsyncWrite + Unpin + Send> FramedMessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(FramedWrite::new(writer, JsonRpcCodec::new())),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageWriter for FramedMessageWriter<W> {
    async fn write_message(&self, msg: &JsonRpcMessage) -> io::Result<()> {
        let mut framed = self.inner.lock().await;
        framed.send(msg).await.map_err(io::Error::from)
    }
}

/// Delivers each message to every listed writer, in order.
///
/// The first failure stops the fan-out and is returned; writers after the
/// failing one do not observe the message.
pub struct MultiMessageWriter {
    writers: Vec<Arc<dyn MessageWriter>>,
}

impl MultiMessageWriter {
    pub fn new(writers: Vec<Arc<dyn MessageWriter>>) -> Self {
        Self { writers }
    }
}

#[async_trait]
impl MessageWriter for MultiMessageWriter {
    async fn write_message(&self, msg: &JsonRpcMessage) -> io::Result<()> {
        for writer in &self.writers {
            writer.write_message(msg).await?;
        }
        Ok(())
    }
}
