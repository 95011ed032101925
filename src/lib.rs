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

//! remora: a transparent, auto-reconnecting stdio proxy for MCP servers.
//!
//! A client speaks newline-delimited JSON-RPC to remora as if it were a
//! single long-lived MCP server. remora holds the real server connection
//! and, when that server dies, dials a fresh one and replays the client's
//! initialize handshake so the session survives the swap. A replacement
//! server reporting a different identity is refused rather than silently
//! accepted.

pub mod config;
pub mod constants;
pub mod mcp;
