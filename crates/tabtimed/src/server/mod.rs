//! Unix socket server for the tabtime daemon.
//!
//! Each accepted connection gets its own `ConnectionHandler` task. A
//! single broadcaster task turns [`TrackerEvent`]s into `TrackingChanged`
//! lines for every subscribed connection. Cancelling the token stops the
//! accept loop and removes the socket file.

mod connection;

pub use connection::ConnectionError;

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tabtime_protocol::DaemonMessage;

use connection::{ConnectionHandler, SubscribersMap};
use crate::tracker::{TrackerEvent, TrackerHandle};

/// Default socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/tabtime.sock";

/// Unix socket server for the daemon.
pub struct DaemonServer {
    socket_path: PathBuf,
    tracker: TrackerHandle,
    cancel_token: CancellationToken,
    /// Numbers connections for default client ids
    connections: AtomicU64,
    subscribers: SubscribersMap,
}

impl DaemonServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        tracker: TrackerHandle,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            tracker,
            cancel_token,
            connections: AtomicU64::new(0),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Binds the socket and serves until the token is cancelled.
    ///
    /// A stale socket file at the path is replaced.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        info!(socket = %self.socket_path.display(), "Daemon server listening");

        self.spawn_event_broadcaster();

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => self.spawn_connection(stream),
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
            }
        }

        self.subscribers.write().await.clear();
        match std::fs::remove_file(&self.socket_path) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                warn!(socket = %self.socket_path.display(), error = %e, "Failed to remove socket file");
            }
            _ => {}
        }
        info!("Daemon server stopped");
        Ok(())
    }

    fn bind(&self) -> Result<UnixListener, ServerError> {
        let setup_err = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        match std::fs::remove_file(&self.socket_path) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(setup_err(e)),
            _ => {}
        }
        if let Some(parent) = self.socket_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(setup_err)?;
        }

        UnixListener::bind(&self.socket_path).map_err(setup_err)
    }

    fn spawn_connection(&self, stream: UnixStream) {
        let number = self.connections.fetch_add(1, Ordering::Relaxed);
        let (reader, writer) = stream.into_split();
        let subscribers = Arc::clone(&self.subscribers);
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.tracker.clone(),
            Arc::clone(&subscribers),
            number,
        );

        tokio::spawn(async move {
            if let Some(client_id) = handler.run().await {
                subscribers.write().await.remove(&client_id);
            }
        });
    }

    /// Forwards tracker events to every subscriber.
    fn spawn_event_broadcaster(&self) {
        let mut events = self.tracker.subscribe();
        let subscribers = Arc::clone(&self.subscribers);
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => broadcast_event(&subscribers, &event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event broadcaster lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Event broadcaster stopped");
        });
    }
}

/// Sends an event to all subscribers, dropping those that cannot be written.
async fn broadcast_event(subscribers: &SubscribersMap, event: &TrackerEvent) {
    let TrackerEvent::StateChanged { is_tracking, cause } = *event;
    let msg = DaemonMessage::TrackingChanged { is_tracking, cause };

    let mut dead = Vec::new();
    for (client_id, writer) in subscribers.read().await.iter() {
        if let Err(e) = connection::write_message(writer, &msg).await {
            debug!(client_id = %client_id, error = %e, "Dropping subscriber");
            dead.push(client_id.clone());
        }
    }

    if !dead.is_empty() {
        let mut subs = subscribers.write().await;
        for client_id in &dead {
            subs.remove(client_id);
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },
}
