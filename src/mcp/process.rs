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

//! Subprocess-backed upstream dialer.
//!
//! Spawns the upstream MCP server as a child process per dial and speaks to
//! it over its stdin/stdout. The child's lifetime is bound to the stream:
//! dropping the stream (reconnect or shutdown) kills the child, and on Linux
//! the child is additionally killed if the proxy itself dies.

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, Join, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info};

use super::reconnect::{Dialer, ServerStream};

/// Dials by spawning `command args...` with piped stdio.
pub struct SubprocessDialer {
    command: String,
    args: Vec<String>,
}

impl SubprocessDialer {
    pub fn new(command: String, args: Vec<String>) -> Self {
        Self { command, args }
    }
}

#[async_trait]
impl Dialer for SubprocessDialer {
    async fn dial(&self) -> io::Result<Box<dyn ServerStream>> {
        info!(command = %self.command, args = ?self.args, "spawning upstream server");

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // SAFETY: PR_SET_PDEATHSIG with SIGKILL is the standard Linux
        // mechanism to terminate the child when the parent dies; the
        // constants come from libc and are valid for this platform.
        #[cfg(target_os = "linux")]
        unsafe {
            command.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not piped"))?;
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(stderr);
        }

        debug!(pid = ?child.id(), "upstream server spawned");
        Ok(Box::new(ChildStream {
            io: tokio::io::join(stdout, stdin),
            _child: child,
        }))
    }
}

/// Forward the child's stderr lines into our structured log.
fn spawn_stderr_drain(stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if !line.is_empty() {
                info!(target: "remora::upstream_stderr", "{line}");
            }
        }
    });
}

/// The child's stdout/stdin glued into one duplex stream. Dropping it drops
/// the `Child`, which kills the process (`kill_on_drop`).
struct ChildStream {
    io: Join<ChildStdout, ChildStdin>,
    _child: Child,
}

impl AsyncRead for ChildStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for ChildStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}
