//! SSH transport via the system OpenSSH client.
//!
//! # Data Flow
//! ```text
//! hyper ──▶ SshStream ──stdin/stdout──▶ ssh host -- docker system dial-stdio
//!                                                    └──▶ remote engine socket
//! ```
//!
//! # Design Decisions
//! - Reuses the user's ssh config, agent and known_hosts instead of a second
//!   SSH implementation
//! - `BatchMode=yes`: a prompt would hang a non-interactive client
//! - The child is killed when the stream is dropped

use std::io;
use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::transport::connection_spec::SshAuth;
use crate::transport::error::ConnectError;

/// How the local ssh client and remote engine CLI are invoked.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SshOptions {
    /// Local ssh executable.
    pub program: String,
    /// Engine CLI on the remote host.
    pub remote_command: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            remote_command: "docker".to_string(),
        }
    }
}

/// Arguments passed to the ssh client for one engine connection.
pub fn ssh_args(
    options: &SshOptions,
    host: &str,
    port: u16,
    auth: &SshAuth,
    remote_socket_path: &str,
) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-p".to_string(),
        port.to_string(),
    ];
    if let Some(user) = &auth.user {
        args.push("-l".to_string());
        args.push(user.clone());
    }
    if let Some(identity) = &auth.identity_file {
        args.push("-i".to_string());
        args.push(identity.display().to_string());
    }
    args.push(host.to_string());
    args.push("--".to_string());
    args.push(options.remote_command.clone());
    args.push("--host".to_string());
    args.push(format!("unix://{remote_socket_path}"));
    args.push("system".to_string());
    args.push("dial-stdio".to_string());
    args
}

/// Byte stream tunnelled through an ssh child process.
#[derive(Debug)]
pub struct SshStream {
    stdin: ChildStdin,
    stdout: ChildStdout,
    _child: Child,
}

impl SshStream {
    /// Spawn the ssh client and attach to its stdio.
    pub fn spawn(
        options: &SshOptions,
        host: &str,
        port: u16,
        auth: &SshAuth,
        remote_socket_path: &str,
    ) -> Result<Self, ConnectError> {
        let spawn_err = |source| ConnectError::SshSpawn {
            program: options.program.clone(),
            source,
        };

        let mut child = Command::new(&options.program)
            .args(ssh_args(options, host, port, auth, remote_socket_path))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        let missing = || spawn_err(io::Error::new(io::ErrorKind::BrokenPipe, "ssh stdio not captured"));
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;

        if let Some(stderr) = child.stderr.take() {
            let host = host.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(host = %host, "ssh: {}", line);
                }
            });
        }

        tracing::debug!(host = %host, port, "SSH tunnel started");
        Ok(Self {
            stdin,
            stdout,
            _child: child,
        })
    }
}

impl AsyncRead for SshStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for SshStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdin).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_shutdown(cx)
    }
}
