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

//! remora constants - single source of truth for protocol values and limits.

/// JSON-RPC 2.0 error codes.
pub mod jsonrpc {
    /// Internal error (standard JSON-RPC)
    pub const ERROR_INTERNAL: i32 = -32603;
    /// Parse error (standard JSON-RPC)
    pub const ERROR_PARSE: i32 = -32700;
}

/// MCP protocol methods.
pub mod methods {
    /// Handshake request sent first by every client.
    pub const INITIALIZE: &str = "initialize";
    /// Handshake notification sent by the client after the initialize
    /// response arrives.
    pub const NOTIFICATION_INITIALIZED: &str = "notifications/initialized";
    /// Default method of the notification synthesized when a client
    /// notification cannot be forwarded upstream.
    pub const NOTIFICATION_PROXY_ERROR: &str = "notifications/remora/error";
}

/// Transport limits (DoS protection).
pub mod limits {
    /// Maximum allowed JSON-RPC message size (10 MB)
    pub const MAX_MESSAGE_SIZE_BYTES: usize = 10 * 1024 * 1024;
}

/// Configuration environment variables.
pub mod config {
    pub const ENV_LOG_LEVEL: &str = "REMORA_LOG_LEVEL";
    pub const ENV_LOG_FORMAT: &str = "REMORA_LOG_FORMAT";
}
