//! tabtime Protocol - Wire protocol for daemon communication
//!
//! Newline-delimited JSON messages exchanged between the daemon and its
//! clients: the browser-side shim reporting tab and focus changes, and the
//! UI issuing tracking commands and reading day records.

pub mod message;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType};
pub use version::{ProtocolVersion, VersionError};
