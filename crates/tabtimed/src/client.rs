//! Control client for the daemon socket.
//!
//! Used by the `tabtime` CLI and by tests. One client holds one connection:
//! [`ControlClient::connect`] performs the handshake, then each
//! [`ControlClient::request`] writes one message and reads its reply.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;

use tabtime_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

/// How long to wait for any single reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from the control client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The socket could not be reached.
    #[error("cannot connect to daemon at {path}: {message} (is tabtimed running?)")]
    Connect { path: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),

    /// The daemon refused the handshake.
    #[error("protocol version mismatch: client {client}, daemon {daemon}")]
    VersionMismatch { client: String, daemon: String },

    /// The daemon replied with something other than what was expected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The daemon closed the connection.
    #[error("daemon closed the connection")]
    Closed,

    #[error("timed out waiting for daemon")]
    Timeout,
}

/// A connected, handshaken client.
pub struct ControlClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: String,
}

impl ControlClient {
    /// Connects to the daemon and performs the handshake.
    pub async fn connect(socket_path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| ClientError::Connect {
                path: socket_path.display().to_string(),
                message: e.to_string(),
            })?;
        let (reader, writer) = stream.into_split();

        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            client_id: String::new(),
        };

        client.send(&ClientMessage::connect(None)).await?;
        match client.next_message().await? {
            DaemonMessage::Connected {
                protocol_version,
                client_id,
            } => {
                if !ProtocolVersion::CURRENT.is_compatible_with(&protocol_version) {
                    return Err(ClientError::VersionMismatch {
                        client: ProtocolVersion::CURRENT.to_string(),
                        daemon: protocol_version.to_string(),
                    });
                }
                debug!(client_id = %client_id, "Connected to daemon");
                client.client_id = client_id;
                Ok(client)
            }
            DaemonMessage::Rejected {
                protocol_version, ..
            } => Err(ClientError::VersionMismatch {
                client: ProtocolVersion::CURRENT.to_string(),
                daemon: protocol_version.to_string(),
            }),
            other => Err(ClientError::Protocol(format!(
                "unexpected response to connect: {other:?}"
            ))),
        }
    }

    /// The ID the daemon assigned to this connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Sends one message and returns the daemon's reply.
    ///
    /// State-change notifications that arrive ahead of the reply (when
    /// subscribed) are skipped.
    pub async fn request(&mut self, message: MessageType) -> Result<DaemonMessage, ClientError> {
        self.send(&ClientMessage::new(message)).await?;

        loop {
            match self.next_message().await? {
                DaemonMessage::TrackingChanged { .. } => continue,
                reply => return Ok(reply),
            }
        }
    }

    /// Reads the next message from the daemon without a deadline.
    ///
    /// Used to stream notifications after subscribing.
    pub async fn recv(&mut self) -> Result<DaemonMessage, ClientError> {
        self.read_line().await
    }

    /// Says goodbye and closes the connection.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::disconnect()).await?;
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to daemon");
        Ok(())
    }

    async fn next_message(&mut self) -> Result<DaemonMessage, ClientError> {
        timeout(REPLY_TIMEOUT, self.read_line())
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    async fn read_line(&mut self) -> Result<DaemonMessage, ClientError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(line.trim())?)
    }
}
