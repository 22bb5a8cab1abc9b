//! One client connection: handshake, then a request/reply loop.
//!
//! Every request line gets exactly one reply line. Platform notifications
//! and UI commands go to the [`TrackerHandle`]; `Subscribe` additionally
//! shares this connection's writer with the server's event broadcaster.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use tabtime_core::DayKey;
use tabtime_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

use crate::tracker::{TrackerError, TrackerHandle, TrackingSnapshot};

/// Write half of a connection, shared with the broadcaster.
pub type SubscriberWriter = Arc<Mutex<BufWriter<OwnedWriteHalf>>>;

/// Subscribed connections by client id.
pub type SubscribersMap = Arc<RwLock<HashMap<String, SubscriberWriter>>>;

pub(crate) const MAX_SUBSCRIBERS: usize = 10;

/// Longest accepted request line, newline included.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Idle connections are closed after this long.
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves a single client.
pub struct ConnectionHandler {
    reader: BufReader<OwnedReadHalf>,
    writer: SubscriberWriter,
    tracker: TrackerHandle,
    subscribers: SubscribersMap,
    /// Set by the handshake
    client_id: Option<String>,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        tracker: TrackerHandle,
        subscribers: SubscribersMap,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: Arc::new(Mutex::new(BufWriter::new(writer))),
            tracker,
            subscribers,
            client_id: None,
            connection_number,
        }
    }

    /// Serves the connection until it closes.
    ///
    /// Returns the client id assigned at handshake, so the server can drop a
    /// subscription left behind.
    pub async fn run(mut self) -> Option<String> {
        if let Err(e) = self.handshake().await {
            warn!(connection = self.connection_number, error = %e, "Handshake failed");
            return None;
        }

        let client_id = self.client_id.clone();
        debug!(client_id = ?client_id, "Client connected");

        match self.serve().await {
            Ok(()) => debug!(client_id = ?client_id, "Client disconnected"),
            Err(e) => debug!(client_id = ?client_id, error = %e, "Connection dropped"),
        }
        client_id
    }

    /// Expects `Connect` from a client speaking a compatible version.
    async fn handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = timeout(IDLE_TIMEOUT, self.read_message())
            .await
            .map_err(|_| ConnectionError::Timeout)??;

        let server = ProtocolVersion::CURRENT;
        let client = msg.protocol_version;
        if !client.is_compatible_with(&server) {
            self.send(DaemonMessage::rejected(&format!(
                "protocol {client} is not supported (daemon speaks {server})"
            )))
            .await?;
            return Err(ConnectionError::VersionMismatch { client, server });
        }

        let client_id = match msg.message {
            MessageType::Connect { client_id } => client_id,
            other => {
                self.send(DaemonMessage::error("first message must be connect"))
                    .await?;
                return Err(ConnectionError::UnexpectedMessage(format!("{other:?}")));
            }
        };

        let client_id = client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
        self.client_id = Some(client_id.clone());
        self.send(DaemonMessage::connected(client_id)).await
    }

    /// Answers requests until EOF, `Disconnect` or the idle timeout.
    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let msg = match timeout(IDLE_TIMEOUT, self.read_message()).await {
                Err(_) => return Err(ConnectionError::Timeout),
                Ok(Err(ConnectionError::Eof)) => return Ok(()),
                Ok(Err(ConnectionError::Parse(e))) => {
                    self.send(DaemonMessage::error_with_code(&e, "parse_error"))
                        .await?;
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(msg)) => msg,
            };

            let reply = match self.reply_to(msg.message).await {
                Ok(Some(reply)) => reply,
                Ok(None) => return Ok(()),
                Err(e) => {
                    error!(client_id = ?self.client_id, error = %e, "Request failed");
                    DaemonMessage::error(&e.to_string())
                }
            };
            self.send(reply).await?;
        }
    }

    /// Computes the reply to one request. `None` ends the connection.
    async fn reply_to(&self, message: MessageType) -> Result<Option<DaemonMessage>, TrackerError> {
        let tracker = &self.tracker;

        let reply = match message {
            MessageType::Connect { .. } => DaemonMessage::error("Already connected"),

            MessageType::TabActivated { tab_id, url } => {
                tracker.tab_activated(tab_id, url).await?;
                DaemonMessage::ok()
            }
            MessageType::TabUpdated { tab_id, url } => {
                tracker.tab_updated(tab_id, url).await?;
                DaemonMessage::ok()
            }
            MessageType::TabClosed { tab_id } => {
                tracker.tab_closed(tab_id).await?;
                DaemonMessage::ok()
            }
            MessageType::WindowFocusChanged { focused } => {
                tracker.observe_focus(focused).await?;
                DaemonMessage::ok()
            }
            MessageType::Suspend => flush_outcome(tracker.suspend().await)?,

            MessageType::GetTrackingState => state_message(tracker.state().await?),
            MessageType::EnableTracking => {
                tracker.enable().await?;
                DaemonMessage::ok()
            }
            MessageType::DisableTracking {
                auto_resume_minutes,
            } => {
                // Tracking is off even when the follow-up flush fails; the
                // time stays buffered for the next one
                match tracker.disable(auto_resume_minutes.map(minutes)).await {
                    Ok(()) | Err(TrackerError::Flush(_)) => DaemonMessage::ok(),
                    Err(e) => return Err(e),
                }
            }
            MessageType::Flush => flush_outcome(tracker.flush().await)?,
            MessageType::StartAutoResume { minutes: m } => {
                tracker.start_auto_resume(minutes(m)).await?;
                DaemonMessage::ok()
            }
            MessageType::CancelAutoResume => {
                tracker.cancel_auto_resume().await?;
                DaemonMessage::ok()
            }
            MessageType::GetDay { date } => {
                let date = date.unwrap_or_else(|| DayKey::from_instant(Utc::now()));
                let record = tracker.day_record(date).await?;
                DaemonMessage::DayRecord { date, record }
            }

            MessageType::Subscribe => self.subscribe().await?,
            MessageType::Unsubscribe => {
                if let Some(client_id) = &self.client_id {
                    self.subscribers.write().await.remove(client_id);
                }
                DaemonMessage::ok()
            }
            MessageType::Ping { seq } => DaemonMessage::pong(seq),
            MessageType::Disconnect => return Ok(None),
        };

        Ok(Some(reply))
    }

    /// Shares this connection's writer with the broadcaster and replies
    /// with the current state.
    async fn subscribe(&self) -> Result<DaemonMessage, TrackerError> {
        let Some(client_id) = self.client_id.clone() else {
            return Ok(DaemonMessage::error("Must connect before subscribing"));
        };

        {
            let mut subs = self.subscribers.write().await;
            if subs.len() >= MAX_SUBSCRIBERS && !subs.contains_key(&client_id) {
                return Ok(DaemonMessage::error(&format!(
                    "Too many subscribers (max: {MAX_SUBSCRIBERS})"
                )));
            }
            subs.insert(client_id.clone(), Arc::clone(&self.writer));
        }
        info!(client_id = %client_id, "Client subscribed");

        Ok(state_message(self.tracker.state().await?))
    }

    /// Reads one request line of at most [`MAX_LINE_BYTES`].
    async fn read_message(&mut self) -> Result<ClientMessage, ConnectionError> {
        let mut line = String::new();
        let read = (&mut self.reader)
            .take(MAX_LINE_BYTES as u64)
            .read_line(&mut line)
            .await?;

        if read == 0 {
            return Err(ConnectionError::Eof);
        }
        if !line.ends_with('\n') && read == MAX_LINE_BYTES {
            return Err(ConnectionError::LineTooLong {
                max: MAX_LINE_BYTES,
            });
        }

        let msg: ClientMessage =
            serde_json::from_str(&line).map_err(|e| ConnectionError::Parse(e.to_string()))?;
        debug!(client_id = ?self.client_id, message = ?msg.message, "Request");
        Ok(msg)
    }

    async fn send(&self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        write_message(&self.writer, &msg).await
    }
}

/// Writes `msg` as one JSON line within [`WRITE_TIMEOUT`].
pub(crate) async fn write_message(
    writer: &SubscriberWriter,
    msg: &DaemonMessage,
) -> Result<(), ConnectionError> {
    let mut line =
        serde_json::to_vec(msg).map_err(|e| ConnectionError::Parse(e.to_string()))?;
    line.push(b'\n');

    let mut writer = writer.lock().await;
    timeout(WRITE_TIMEOUT, async {
        writer.write_all(&line).await?;
        writer.flush().await
    })
    .await
    .map_err(|_| ConnectionError::WriteTimeout)??;
    Ok(())
}

/// A failed write is reported as `failed`; the deltas are already requeued.
fn flush_outcome<T>(result: Result<T, TrackerError>) -> Result<DaemonMessage, TrackerError> {
    match result {
        Ok(_) => Ok(DaemonMessage::ok()),
        Err(TrackerError::Flush(e)) => Ok(DaemonMessage::failed(e.to_string())),
        Err(e) => Err(e),
    }
}

fn state_message(state: TrackingSnapshot) -> DaemonMessage {
    DaemonMessage::TrackingState {
        is_tracking: state.is_tracking,
        auto_resume_at: state.auto_resume_at,
        active_key: state.active_key,
    }
}

fn minutes(m: u32) -> Duration {
    Duration::from_secs(u64::from(m) * 60)
}

/// Errors that end a connection, or, for `Parse`, a single request.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    Eof,

    #[error("Idle timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Request line longer than {max} bytes")]
    LineTooLong { max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use crate::writer::FlushError;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::VersionMismatch {
            client: ProtocolVersion::new(2, 0),
            server: ProtocolVersion::new(1, 0),
        };
        assert!(err.to_string().contains("2.0"));
        assert!(err.to_string().contains("1.0"));

        let err = ConnectionError::LineTooLong { max: MAX_LINE_BYTES };
        assert!(err.to_string().contains("65536"));
    }

    #[test]
    fn test_flush_outcome() {
        assert!(matches!(
            flush_outcome(Ok(())),
            Ok(DaemonMessage::Ack { success: true, .. })
        ));

        let failed = flush_outcome::<()>(Err(TrackerError::Flush(FlushError {
            day: DayKey::from_ymd(2024, 3, 1).unwrap(),
            source: StoreError::Unavailable("full".to_string()),
            unwritten: Vec::new(),
        })));
        assert!(matches!(
            failed,
            Ok(DaemonMessage::Ack { success: false, .. })
        ));

        assert!(flush_outcome::<()>(Err(TrackerError::ChannelClosed)).is_err());
    }

    #[test]
    fn test_minutes() {
        assert_eq!(minutes(0), Duration::ZERO);
        assert_eq!(minutes(15), Duration::from_secs(900));
        assert_eq!(minutes(u32::MAX), Duration::from_secs(u64::from(u32::MAX) * 60));
    }
}
