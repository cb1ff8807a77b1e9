//! projsync library
//!
//! Client side of the remote build engine's project sync protocol: walk a
//! project tree, pick the files changed since the last sync, encode them
//! and push them through the bind or sync handshake.

pub mod changeset;
pub mod cli;
pub mod codec;
pub mod config;
pub mod envelope;
pub mod error;
pub mod fs_enum;
pub mod log;
pub mod logger;
pub mod orchestrator;
pub mod progress;
pub mod project;
pub mod protocol;
pub mod session;
pub mod transport;

pub use changeset::{ChangeSet, SyncCursor};
pub use error::{Result, SyncError};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
pub use transport::{HttpTransport, Transport};
