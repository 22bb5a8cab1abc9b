//! Protocol message types for daemon communication.
//!
//! Every client message gets exactly one reply. Platform notifications
//! (tab and focus changes) are acknowledged with [`DaemonMessage::Ack`] once
//! the tracker has applied them, so a client that waits for the reply knows
//! its event is ordered before anything it sends next.

use crate::version::ProtocolVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tabtime_core::{DayKey, DayRecord, TabId, TrackingCause, TrackingKey};

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    // ------------------------------------------------------------------
    // Platform notifications
    // ------------------------------------------------------------------
    /// A tab became the foreground tab
    TabActivated { tab_id: TabId, url: String },

    /// A tab navigated to a new address
    TabUpdated { tab_id: TabId, url: String },

    /// A tab was closed
    TabClosed { tab_id: TabId },

    /// The browser window gained or lost focus
    WindowFocusChanged { focused: bool },

    /// The host is about to suspend or shut down
    Suspend,

    // ------------------------------------------------------------------
    // UI requests
    // ------------------------------------------------------------------
    /// Query whether tracking is enabled
    GetTrackingState,

    /// Turn tracking on
    EnableTracking,

    /// Turn tracking off, optionally re-enabling after a delay
    DisableTracking {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_resume_minutes: Option<u32>,
    },

    /// Flush buffered time to the store now
    Flush,

    /// Arm the auto-resume timer without changing the tracking flag
    StartAutoResume { minutes: u32 },

    /// Disarm the auto-resume timer
    CancelAutoResume,

    /// Read one day record (today when `date` is omitted)
    GetDay {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date: Option<DayKey>,
    },

    /// Receive tracking state change notifications
    Subscribe,

    /// Stop receiving notifications
    Unsubscribe,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    /// Creates a connect message.
    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    /// Creates a tab-activated notification.
    pub fn tab_activated(tab_id: TabId, url: impl Into<String>) -> Self {
        Self::new(MessageType::TabActivated {
            tab_id,
            url: url.into(),
        })
    }

    /// Creates a tab-updated notification.
    pub fn tab_updated(tab_id: TabId, url: impl Into<String>) -> Self {
        Self::new(MessageType::TabUpdated {
            tab_id,
            url: url.into(),
        })
    }

    /// Creates a tab-closed notification.
    pub fn tab_closed(tab_id: TabId) -> Self {
        Self::new(MessageType::TabClosed { tab_id })
    }

    /// Creates a window focus notification.
    pub fn window_focus(focused: bool) -> Self {
        Self::new(MessageType::WindowFocusChanged { focused })
    }

    /// Creates a disable request.
    pub fn disable(auto_resume_minutes: Option<u32>) -> Self {
        Self::new(MessageType::DisableTracking {
            auto_resume_minutes,
        })
    }

    /// Creates a day record query.
    pub fn get_day(date: Option<DayKey>) -> Self {
        Self::new(MessageType::GetDay { date })
    }

    /// Creates a ping message.
    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    /// Creates a disconnect message.
    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// Outcome of a command or notification
    Ack {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },

    /// Current tracking state
    TrackingState {
        is_tracking: bool,
        /// Pending auto-resume deadline, if armed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto_resume_at: Option<DateTime<Utc>>,
        /// Page currently being timed, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_key: Option<TrackingKey>,
    },

    /// Tracking was switched on or off (sent to subscribers)
    TrackingChanged {
        is_tracking: bool,
        cause: TrackingCause,
    },

    /// One day's accumulated time
    DayRecord { date: DayKey, record: DayRecord },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code (optional)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates a connected response.
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    /// Creates a successful acknowledgement.
    pub fn ok() -> Self {
        Self::Ack {
            success: true,
            detail: None,
        }
    }

    /// Creates a failed acknowledgement.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::Ack {
            success: false,
            detail: Some(detail.into()),
        }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabtime_core::normalize;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::tab_activated(TabId::new(4), "https://example.com/");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "tab_activated");
        assert_eq!(json["tab_id"], 4);
        assert_eq!(json["url"], "https://example.com/");
        assert_eq!(json["protocol_version"]["major"], 1);
    }

    #[test]
    fn test_disable_without_minutes_omits_field() {
        let json = serde_json::to_string(&ClientMessage::disable(None)).unwrap();
        assert!(json.contains("\"type\":\"disable_tracking\""));
        assert!(!json.contains("auto_resume_minutes"));
    }

    #[test]
    fn test_parse_hand_written_request() {
        let line = r#"{"protocol_version":{"major":1,"minor":0},"type":"disable_tracking","auto_resume_minutes":15}"#;
        let parsed: ClientMessage = serde_json::from_str(line).unwrap();
        match parsed.message {
            MessageType::DisableTracking {
                auto_resume_minutes,
            } => assert_eq!(auto_resume_minutes, Some(15)),
            other => panic!("Expected DisableTracking, got {other:?}"),
        }
    }

    #[test]
    fn test_get_day_parses_date() {
        let line = r#"{"protocol_version":{"major":1,"minor":0},"type":"get_day","date":"2024-03-05"}"#;
        let parsed: ClientMessage = serde_json::from_str(line).unwrap();
        match parsed.message {
            MessageType::GetDay { date } => {
                assert_eq!(date, DayKey::from_ymd(2024, 3, 5));
            }
            other => panic!("Expected GetDay, got {other:?}"),
        }
    }

    #[test]
    fn test_ack_shape() {
        let json = serde_json::to_value(DaemonMessage::ok()).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ack", "success": true}));

        let json = serde_json::to_value(DaemonMessage::failed("store unavailable")).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["detail"], "store unavailable");
    }

    #[test]
    fn test_day_record_message() {
        let mut record = DayRecord::new();
        record.add(&normalize("https://a.com/page"), 20_000);
        let msg = DaemonMessage::DayRecord {
            date: DayKey::from_ymd(2024, 3, 5).unwrap(),
            record,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["date"], "2024-03-05");
        assert_eq!(json["record"]["https://a.com/page"], 20000);
    }

    #[test]
    fn test_tracking_changed_roundtrip() {
        let msg = DaemonMessage::TrackingChanged {
            is_tracking: true,
            cause: TrackingCause::AutoResumed,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: DaemonMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed,
            DaemonMessage::TrackingChanged {
                is_tracking: true,
                cause: TrackingCause::AutoResumed
            }
        ));
    }
}
