//! tabtime Core - Shared types for browsing-time tracking
//!
//! This crate provides the domain types and pure logic shared between
//! the daemon (tabtimed) and its clients: URL normalization, the validity
//! filter, the single-session clock, and the persisted record shapes.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod day;
pub mod error;
pub mod key;
pub mod record;
pub mod retention;
pub mod session;
pub mod state;
pub mod time;

// Re-exports for convenience
pub use day::DayKey;
pub use error::{DomainError, DomainResult};
pub use key::{is_trackable, normalize, TrackingKey};
pub use record::{DayRecord, PendingDelta};
pub use retention::{is_expired, retention_cutoff, DEFAULT_RETENTION_MONTHS};
pub use session::{Session, SessionClock, TabId, MIN_VISIT_DURATION};
pub use state::{
    AutoResumeTimer, CleanupMetadata, TrackingCause, AUTO_RESUME_KEY, CLEANUP_METADATA_KEY,
    TRACKING_FLAG_KEY,
};
pub use time::{Clock, ManualClock, SystemClock};
