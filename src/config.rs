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

use std::env;

use crate::constants;

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parse_safe(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Ambient runtime settings that do not travel on the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            log_level: env::var(constants::config::ENV_LOG_LEVEL)
                .unwrap_or_else(|_| "info".to_string()),
            log_format: LogFormat::parse_safe(
                &env::var(constants::config::ENV_LOG_FORMAT).unwrap_or_default(),
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse_safe() {
        assert_eq!(LogFormat::parse_safe("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse_safe("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse_safe("text"), LogFormat::Text);
        assert_eq!(LogFormat::parse_safe(""), LogFormat::Text);
        assert_eq!(LogFormat::parse_safe("garbage"), LogFormat::Text);
    }
}
