// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

// Event socket served by a mirrored session
//
// Hooks running inside the mirrored shell find the socket through
// `TAT_EVENT_SOCKET` and send the same JSON lines `tat record` reads from
// stdin. Each line gets exactly one JSON reply line:
//
//   {"ok":true,"command_id":"..."}
//   {"ok":true,"command_id":null,"ignored":"excluded_directory"}
//   {"ok":false,"error":"..."}

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::intake::{EventIntake, IntakeOutcome};

pub const EVENT_SOCKET_ENV: &str = "TAT_EVENT_SOCKET";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default)]
    pub command_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn from_outcome(outcome: IntakeOutcome) -> Self {
        match outcome {
            IntakeOutcome::Queued { command_id } => Self {
                ok: true,
                command_id,
                ignored: None,
                error: None,
            },
            IntakeOutcome::Ignored(reason) => Self {
                ok: true,
                command_id: None,
                ignored: Some(reason.as_str().to_string()),
                error: None,
            },
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            ok: false,
            command_id: None,
            ignored: None,
            error: Some(message),
        }
    }
}

/// Handle to a running event socket
pub struct EventServer {
    socket_path: PathBuf,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl EventServer {
    /// Bind `socket_path` and start accepting connections.
    pub async fn start(socket_path: PathBuf, intake: Arc<EventIntake>) -> io::Result<Self> {
        // A stale socket from a crashed session blocks bind
        if socket_path.exists() {
            std::fs::remove_file(&socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        info!(path = %socket_path.display(), "Event socket listening");

        let shutdown = Arc::new(Notify::new());
        let stop = Arc::clone(&shutdown);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _addr)) => {
                            let intake = Arc::clone(&intake);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, intake).await {
                                    debug!(error = %e, "Event connection closed with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting event connection");
                            break;
                        }
                    }
                }
            }
            debug!("Event socket accept loop finished");
        });

        Ok(Self {
            socket_path,
            shutdown,
            task,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Stop accepting connections and remove the socket file.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            error!(error = %e, "Event socket task failed");
        }
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                debug!(error = %e, "Failed to remove event socket");
            }
        }
    }
}

async fn handle_connection(stream: UnixStream, intake: Arc<EventIntake>) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let reply = match intake.submit_line(&line) {
            Ok(outcome) => Reply::from_outcome(outcome),
            Err(e) => {
                debug!(error = %e, "Rejected event line");
                Reply::error(e.to_string())
            }
        };
        let mut encoded = serde_json::to_vec(&reply)?;
        encoded.push(b'\n');
        write_half.write_all(&encoded).await?;
        write_half.flush().await?;
    }
    Ok(())
}

/// Client used by `tat record` inside a mirrored shell
#[derive(Debug, Clone)]
pub struct EventClient {
    socket_path: PathBuf,
}

impl EventClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// Client for the socket named by `TAT_EVENT_SOCKET`, if set.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(EVENT_SOCKET_ENV)
            .filter(|path| !path.is_empty())
            .map(|path| Self::new(PathBuf::from(path)))
    }

    pub async fn send_line(&self, line: &str) -> io::Result<Reply> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();

        let mut request = line.trim_end().as_bytes().to_vec();
        request.push(b'\n');
        write_half.write_all(&request).await?;
        write_half.flush().await?;

        let mut reply = String::new();
        BufReader::new(read_half).read_line(&mut reply).await?;
        if reply.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "event socket closed without replying",
            ));
        }
        Ok(serde_json::from_str(&reply)?)
    }
}
