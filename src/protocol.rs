//! Wire protocol of the remote build engine
//!
//! Bind:  POST remote-bind/start -> PUT {id}/remote-bind/upload* -> POST {id}/remote-bind/end
//! Sync:  PUT {id}/upload* -> POST {id}/upload/end

use serde::{Deserialize, Serialize};

use crate::error::Call;

/// Engine routes, relative to the engine's base URL
pub mod routes {
    pub const BIND_START: &str = "projects/remote-bind/start";

    pub fn bind_upload(project_id: &str) -> String {
        format!("projects/{}/remote-bind/upload", project_id)
    }

    pub fn bind_end(project_id: &str) -> String {
        format!("projects/{}/remote-bind/end", project_id)
    }

    pub fn sync_upload(project_id: &str) -> String {
        format!("projects/{}/upload", project_id)
    }

    pub fn sync_end(project_id: &str) -> String {
        format!("projects/{}/upload/end", project_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Post,
    Put,
}

impl Call {
    pub fn method(self) -> Method {
        match self {
            Call::BindUpload | Call::SyncUpload => Method::Put,
            Call::BindStart | Call::BindEnd | Call::SyncEnd => Method::Post,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindRequest {
    pub language: String,
    #[serde(rename = "projectType")]
    pub project_type: String,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindEndRequest {
    #[serde(rename = "id")]
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRequest {
    #[serde(rename = "fileList")]
    pub file_list: Vec<String>,
    #[serde(rename = "modifiedList")]
    pub modified_list: Vec<String>,
    #[serde(rename = "timeStamp")]
    pub time_stamp: i64,
}

/// Reply to the bind start call; other fields the engine sends are ignored
#[derive(Debug, Clone, Deserialize)]
pub struct BindStartResponse {
    #[serde(rename = "projectID")]
    pub project_id: String,
}

// Centralized timeout defaults for the HTTP transport
pub mod timeouts {
    // Connection establishment timeout (s)
    pub const CONNECT_SECS: u64 = 10;

    // Whole-request timeout, uploads included (s)
    pub const REQUEST_SECS: u64 = 120;

    // Pause between end-call retries (ms)
    pub const END_RETRY_BACKOFF_MS: u64 = 500;
}
