//! Error taxonomy for the sync core
//!
//! File-level problems never abort a run: they are collected as
//! [`SkippedFile`] entries. Handshake and transport problems abort the run
//! and surface as [`SyncError`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::session::{PendingCompletion, Phase};

pub type Result<T> = std::result::Result<T, SyncError>;

/// One remote call of the bind/sync handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Call {
    BindStart,
    BindUpload,
    BindEnd,
    SyncUpload,
    SyncEnd,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Call::BindStart => "remote-bind start",
            Call::BindUpload => "remote-bind upload",
            Call::BindEnd => "remote-bind end",
            Call::SyncUpload => "upload",
            Call::SyncEnd => "upload end",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("cannot read project root {}: {source}", .path.display())]
    RootPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{call} failed{}: {reason}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Transport {
        call: Call,
        status: Option<u16>,
        reason: String,
    },
    #[error("unexpected response to {call}: {reason}")]
    Protocol { call: Call, reason: String },
    #[error("cannot {op} while session is {phase:?}")]
    InvalidState { op: &'static str, phase: Phase },
    #[error("run for {project_id} cancelled after {uploaded} of {pending} uploads")]
    Cancelled {
        project_id: String,
        uploaded: usize,
        pending: usize,
    },
    #[error("{} was not acknowledged, the end call can be retried: {source}", .pending.call())]
    CompletionFailed {
        pending: Box<PendingCompletion>,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// True for failures that reached (or tried to reach) the remote engine
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. }
                | SyncError::Protocol { .. }
                | SyncError::CompletionFailed { .. }
        )
    }
}

/// Failure of one codec step
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("content is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("compressed stream is invalid: {0}")]
    Compression(#[from] std::io::Error),
    #[error("content is not a valid JSON string literal: {0}")]
    JsonString(String),
}

/// Why a file did not get its content transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipKind {
    /// Entry vanished or could not be stat'ed during the walk
    Walk,
    /// Content could not be read at upload time
    Read,
    Encoding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub kind: SkipKind,
    pub reason: String,
}

impl fmt::Display for SkippedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}: {})", self.path, self.kind, self.reason)
    }
}
