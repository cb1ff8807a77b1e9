//! Three-phase handshake with the remote engine
//!
//! ```text
//! Unbound --begin--> Started --upload--> Transferring --complete--> Completed
//!                       |                     |
//!                       +------ failure ------+--> Failed
//! ```
//!
//! Every call is sent and acknowledged before the next one leaves.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::changeset::SyncCursor;
use crate::envelope::TransferEnvelope;
use crate::error::{Call, Result, SyncError};
use crate::protocol::{routes, BindEndRequest, BindRequest, BindStartResponse, CompleteRequest};
use crate::transport::{EngineRequest, EngineResponse, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Unbound,
    Started,
    Transferring,
    Completed,
    Failed,
}

/// What `begin` should do
#[derive(Debug, Clone)]
pub enum SyncMode {
    /// Register a new project; the engine assigns its id
    Bind(BindRequest),
    /// Transfer changes for a project the engine already knows
    Incremental { project_id: String },
}

impl SyncMode {
    fn is_bind(&self) -> bool {
        matches!(self, SyncMode::Bind(_))
    }
}

/// An end call that was not acknowledged and can be re-sent on its own.
///
/// Serializable so a later process can finish the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCompletion {
    pub project_id: String,
    /// Cursor the completed run hands to the next one
    pub cursor: SyncCursor,
    request: EngineRequest,
}

impl PendingCompletion {
    pub fn call(&self) -> Call {
        self.request.call
    }

    pub fn resend(&self, transport: &dyn Transport) -> Result<()> {
        exchange(transport, &self.request).map(|_| ())
    }
}

fn serialize_body<T: Serialize>(call: Call, body: &T) -> Result<serde_json::Value> {
    serde_json::to_value(body).map_err(|e| SyncError::Protocol {
        call,
        reason: format!("cannot serialize request: {}", e),
    })
}

/// Send a request and insist on a 2xx reply
fn exchange(transport: &dyn Transport, request: &EngineRequest) -> Result<EngineResponse> {
    let response = transport
        .send(request)
        .map_err(|e| SyncError::Transport {
            call: request.call,
            status: None,
            reason: format!("{:#}", e),
        })?;
    if !response.is_success() {
        let text = String::from_utf8_lossy(&response.body);
        return Err(SyncError::Transport {
            call: request.call,
            status: Some(response.status),
            reason: if text.trim().is_empty() {
                "engine rejected the request".to_string()
            } else {
                text.trim().to_string()
            },
        });
    }
    Ok(response)
}

pub struct SyncSession<'t> {
    transport: &'t dyn Transport,
    bind: bool,
    project_id: Option<String>,
    phase: Phase,
    acknowledged: HashSet<String>,
    failure: Option<String>,
}

impl<'t> SyncSession<'t> {
    pub fn new(transport: &'t dyn Transport) -> Self {
        Self {
            transport,
            bind: false,
            project_id: None,
            phase: Phase::Unbound,
            acknowledged: HashSet::new(),
            failure: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Description of the error that moved the session to `Failed`
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn acknowledged(&self) -> usize {
        self.acknowledged.len()
    }

    fn require(&self, op: &'static str, allowed: &[Phase]) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(SyncError::InvalidState {
                op,
                phase: self.phase,
            })
        }
    }

    fn fail<T>(&mut self, err: SyncError) -> Result<T> {
        self.phase = Phase::Failed;
        self.failure = Some(err.to_string());
        Err(err)
    }

    fn current_id(&self) -> Result<&str> {
        self.project_id.as_deref().ok_or(SyncError::InvalidState {
            op: "address the project",
            phase: self.phase,
        })
    }

    /// Open the session. A bind asks the engine for a project id; an
    /// incremental sync already has one and sends nothing.
    pub fn begin(&mut self, mode: SyncMode) -> Result<&str> {
        self.require("begin", &[Phase::Unbound])?;
        self.bind = mode.is_bind();

        let project_id = match mode {
            SyncMode::Incremental { project_id } => project_id,
            SyncMode::Bind(bind) => match self.start_bind(&bind) {
                Ok(id) => id,
                Err(e) => return self.fail(e),
            },
        };
        self.phase = Phase::Started;
        let id: &str = self.project_id.insert(project_id);
        Ok(id)
    }

    fn start_bind(&self, bind: &BindRequest) -> Result<String> {
        let request = EngineRequest {
            call: Call::BindStart,
            path: routes::BIND_START.to_string(),
            body: serialize_body(Call::BindStart, bind)?,
        };
        let response = exchange(self.transport, &request)?;
        let parsed: BindStartResponse =
            serde_json::from_slice(&response.body).map_err(|e| SyncError::Protocol {
                call: Call::BindStart,
                reason: format!("missing or invalid projectID: {}", e),
            })?;
        if parsed.project_id.trim().is_empty() {
            return Err(SyncError::Protocol {
                call: Call::BindStart,
                reason: "engine returned an empty projectID".to_string(),
            });
        }
        Ok(parsed.project_id)
    }

    /// Send one envelope and wait for the acknowledgement
    pub fn upload(&mut self, envelope: &TransferEnvelope) -> Result<()> {
        self.require("upload", &[Phase::Started, Phase::Transferring])?;
        let id = self.current_id()?;
        let (call, path) = if self.bind {
            (Call::BindUpload, routes::bind_upload(id))
        } else {
            (Call::SyncUpload, routes::sync_upload(id))
        };
        let result = serialize_body(call, envelope).and_then(|body| {
            exchange(self.transport, &EngineRequest { call, path, body })
        });
        match result {
            Ok(_) => {
                self.phase = Phase::Transferring;
                self.acknowledged.insert(envelope.relative_path.clone());
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Close the session. Every path in `modified_files` must have been
    /// acknowledged by `upload` first.
    pub fn complete(
        &mut self,
        all_files: &[String],
        modified_files: &[String],
        cursor: SyncCursor,
    ) -> Result<()> {
        self.require("complete", &[Phase::Started, Phase::Transferring])?;
        if modified_files.iter().any(|p| !self.acknowledged.contains(p)) {
            return Err(SyncError::InvalidState {
                op: "complete with unacknowledged uploads",
                phase: self.phase,
            });
        }
        let project_id = self.current_id()?.to_string();

        let request = if self.bind {
            EngineRequest {
                call: Call::BindEnd,
                path: routes::bind_end(&project_id),
                body: serialize_body(
                    Call::BindEnd,
                    &BindEndRequest {
                        project_id: project_id.clone(),
                    },
                )?,
            }
        } else {
            EngineRequest {
                call: Call::SyncEnd,
                path: routes::sync_end(&project_id),
                body: serialize_body(
                    Call::SyncEnd,
                    &CompleteRequest {
                        file_list: all_files.to_vec(),
                        modified_list: modified_files.to_vec(),
                        time_stamp: cursor.millis(),
                    },
                )?,
            }
        };

        match exchange(self.transport, &request) {
            Ok(_) => {
                self.phase = Phase::Completed;
                Ok(())
            }
            Err(source) => self.fail(SyncError::CompletionFailed {
                pending: Box::new(PendingCompletion {
                    project_id,
                    cursor,
                    request,
                }),
                source: Box::new(source),
            }),
        }
    }
}
