//! tabtime Daemon - Browsing-time tracker and day-record store
//!
//! This crate provides the daemon infrastructure:
//! - `tracker` - Actor owning the session clock, focus state and tracking flag
//! - `buffer` / `writer` - In-memory accumulation and serialized day merges
//! - `resume` - Auto-resume timer that survives restarts
//! - `retention` - Periodic deletion of expired day records
//! - `server` / `client` - Unix socket protocol endpoints
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        tabtimed daemon                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────────────┐     ┌──────────────────────────────┐    │
//! │  │  DaemonServer   │────▶│        TrackerActor          │    │
//! │  │ (Unix Socket)   │     │  (session + tracking owner)  │    │
//! │  └─────────────────┘     └───────┬──────────────┬───────┘    │
//! │           ▲                      │ deltas       │ events     │
//! │           │                      ▼              ▼            │
//! │  ┌────────┴────────┐     ┌──────────────┐  ┌────────────┐    │
//! │  │ focus poll task │     │DurableWriter │  │ broadcast  │    │
//! │  └─────────────────┘     └──────┬───────┘  └────────────┘    │
//! │                                 ▼                            │
//! │  ┌─────────────────┐     ┌──────────────┐                    │
//! │  │RetentionSweeper │────▶│   KvStore    │                    │
//! │  └─────────────────┘     └──────────────┘                    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code avoids `.unwrap()`, `.expect()`, `panic!()` and
//! `unreachable!()`. Fallible operations return `Result` or `Option`, and
//! closed channels are treated as shutdown.

pub mod buffer;
pub mod client;
pub mod config;
pub mod focus;
pub mod resume;
pub mod retention;
pub mod server;
pub mod store;
pub mod tracker;
pub mod writer;
