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

//! Main entry point for the remora proxy.
//!
//! Bridges the client on stdin/stdout to an upstream MCP server spawned as a
//! subprocess. The upstream is respawned transparently if it dies.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use remora::config::{Config, LogFormat};
use remora::mcp::process::SubprocessDialer;
use remora::mcp::proxy::{proxy_stdio_conn, ProxyConfig};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Upstream server command (e.g. "python")
    #[arg(short, long)]
    upstream_cmd: String,

    /// Upstream server arguments (e.g. "server.py")
    #[arg(last = true)]
    upstream_args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    install_panic_hook();

    let config = Config::from_env();
    init_tracing(&config);

    info!("starting remora stdio proxy");
    info!("upstream: {} {:?}", cli.upstream_cmd, cli.upstream_args);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received");
            cancel.cancel();
        });
    }

    // stdout is the protocol channel; all diagnostics go to stderr.
    let client_stdio = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
    let dialer = Arc::new(SubprocessDialer::new(cli.upstream_cmd, cli.upstream_args));

    proxy_stdio_conn(
        ProxyConfig {
            client_stdio,
            dialer,
            make_user_message: Arc::new(|error| {
                format!("Failed to forward the message to the server: {error}. The connection will be retried on the next message.")
            }),
            error_notification_method: None,
            on_server_conn_closed: None,
        },
        cancel,
    )
    .await
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        eprintln!("PANIC: {message} at {location}");
    }));
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.log_format == LogFormat::Json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
