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

//! MCP protocol plumbing.
//!
//! Message model and framing codec, reader/writer abstractions, the
//! auto-reconnecting server connection, and the proxy driver that ties them
//! to a client's stdio.

pub mod codec;
pub mod message;
pub mod process;
pub mod proxy;
pub mod reader;
pub mod reconnect;
pub mod writer;
