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

//! Newline-delimited JSON-RPC framing.
//!
//! The decoder yields one [`Frame`] per input line. A line that fails to
//! parse is surfaced as [`Frame::Malformed`] rather than as a stream error,
//! so one bad message never tears down the transport; only unrecoverable
//! conditions (oversize line, I/O failure) end the stream.

use bytes::{Bytes, BytesMut};
use serde_json::Value;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::limits;

use super::message::{JsonRpcMessage, ParseError};

/// A single decoded frame.
#[derive(Debug)]
pub enum Frame {
    Message(JsonRpcMessage),
    /// A line that is not a valid JSON-RPC message. Carries the offending
    /// bytes and the cause; the caller decides what to do.
    Malformed { raw: Bytes, error: ParseError },
}

/// Unrecoverable transport-level failures.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    Oversize { size: usize, limit: usize },
    #[error("failed to serialize message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for std::io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

/// Codec for newline-delimited JSON-RPC messages.
#[derive(Debug, Default)]
pub struct JsonRpcCodec {
    _priv: (),
}

impl JsonRpcCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn parse_frame(raw: Bytes) -> Frame {
    let parsed = serde_json::from_slice::<Value>(&raw)
        .map_err(ParseError::from)
        .and_then(JsonRpcMessage::from_value);
    match parsed {
        Ok(msg) => Frame::Message(msg),
        Err(error) => Frame::Malformed { raw, error },
    }
}

impl Decoder for JsonRpcCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            let Some(pos) = src.iter().position(|&b| b == b'\n') else {
                // No delimiter yet. Refuse to buffer without bound.
                if src.len() > limits::MAX_MESSAGE_SIZE_BYTES {
                    return Err(FrameError::Oversize {
                        size: src.len(),
                        limit: limits::MAX_MESSAGE_SIZE_BYTES,
                    });
                }
                return Ok(None);
            };

            if pos > limits::MAX_MESSAGE_SIZE_BYTES {
                return Err(FrameError::Oversize {
                    size: pos,
                    limit: limits::MAX_MESSAGE_SIZE_BYTES,
                });
            }

            let mut line = src.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            return Ok(Some(parse_frame(line.freeze())));
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        // A final line without a trailing newline is still a message.
        if src.is_empty() || src.iter().all(|b| b.is_ascii_whitespace()) {
            src.clear();
            return Ok(None);
        }
        let mut line = src.split();
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Ok(Some(parse_frame(line.freeze())))
    }
}

impl<'a> Encoder<&'a JsonRpcMessage> for JsonRpcCodec {
    type Error = FrameError;

    fn encode(&mut self, msg: &'a JsonRpcMessage, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body = serde_json::to_vec(msg)?;
        dst.reserve(body.len() + 1);
        dst.extend_from_slice(&body);
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::message::{JsonRpcRequest, RequestId};

    fn decode_all(input: &[u8]) -> Vec<Frame> {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).expect("decode") {
            frames.push(frame);
        }
        while let Some(frame) = codec.decode_eof(&mut buf).expect("decode_eof") {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_decode_single_request() {
        let frames = decode_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\"}\n");
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Message(JsonRpcMessage::Request(req)) => {
                assert_eq!(req.method, "initialize");
                assert_eq!(req.id, RequestId::Number(1));
            }
            other => panic!("expected request frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_multiple_messages_in_one_buffer() {
        let frames = decode_all(
            b"{\"id\":1,\"method\":\"a\"}\n{\"method\":\"b\"}\n{\"id\":1,\"result\":{}}\n",
        );
        assert_eq!(frames.len(), 3);
        assert!(matches!(
            frames[0],
            Frame::Message(JsonRpcMessage::Request(_))
        ));
        assert!(matches!(
            frames[1],
            Frame::Message(JsonRpcMessage::Notification(_))
        ));
        assert!(matches!(
            frames[2],
            Frame::Message(JsonRpcMessage::Response(_))
        ));
    }

    #[test]
    fn test_decode_waits_for_delimiter() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::from(&b"{\"id\":1,\"met"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"hod\":\"x\"}\n");
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_skips_blank_lines() {
        let frames = decode_all(b"\n\r\n{\"id\":1,\"method\":\"x\"}\n\n");
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_decode_strips_carriage_return() {
        let frames = decode_all(b"{\"id\":1,\"method\":\"x\"}\r\n");
        assert!(matches!(
            frames[0],
            Frame::Message(JsonRpcMessage::Request(_))
        ));
    }

    #[test]
    fn test_malformed_line_is_a_frame_not_an_error() {
        let frames = decode_all(b"{ not json\n{\"id\":2,\"method\":\"y\"}\n");
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            Frame::Malformed { raw, .. } => assert_eq!(&raw[..], b"{ not json"),
            other => panic!("expected malformed frame, got {other:?}"),
        }
        assert!(matches!(
            frames[1],
            Frame::Message(JsonRpcMessage::Request(_))
        ));
    }

    #[test]
    fn test_decode_eof_accepts_unterminated_final_line() {
        let frames = decode_all(b"{\"id\":9,\"method\":\"last\"}");
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Message(JsonRpcMessage::Request(req)) => {
                assert_eq!(req.id, RequestId::Number(9));
            }
            other => panic!("expected request frame, got {other:?}"),
        }
    }

    #[test]
    fn test_oversize_line_is_fatal() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();
        buf.resize(limits::MAX_MESSAGE_SIZE_BYTES + 1, b'a');
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FrameError::Oversize { .. })
        ));
    }

    #[test]
    fn test_encode_appends_newline() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();
        let msg = JsonRpcMessage::Request(JsonRpcRequest::new(1, "ping", None));
        codec.encode(&msg, &mut buf).unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));
        // Exactly one line, compact JSON.
        assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_encode_then_decode_round_trip() {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();
        let msg = JsonRpcMessage::Request(JsonRpcRequest::new(
            "req-1",
            "tools/call",
            Some(serde_json::json!({"name": "hello"})),
        ));
        codec.encode(&msg, &mut buf).unwrap();
        match codec.decode(&mut buf).unwrap() {
            Some(Frame::Message(decoded)) => assert_eq!(decoded, msg),
            other => panic!("expected decoded message, got {other:?}"),
        }
    }
}
