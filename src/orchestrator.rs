//! Drives one bind or sync run end to end:
//! walk -> change set -> begin -> upload* -> complete.

use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::changeset::{ChangeSet, SyncCursor};
use crate::envelope::TransferEnvelope;
use crate::error::{Result, SkippedFile, SyncError};
use crate::fs_enum::{self, FileFilter, FileRecord};
use crate::logger::{Logger, NoopLogger};
use crate::project::ProjectIdentity;
use crate::protocol::timeouts;
use crate::session::{SyncMode, SyncSession};
use crate::transport::Transport;

/// Cursor for the run after this one.
///
/// Stays put when nothing was sent. Otherwise moves to the run start, but
/// never past a file whose content could not be sent, so that file is
/// picked up again next time.
fn next_cursor(
    cursor: SyncCursor,
    run_started: SyncCursor,
    unchanged: bool,
    oldest_skipped: Option<i64>,
) -> SyncCursor {
    if unchanged {
        return cursor;
    }
    match oldest_skipped {
        Some(m) => SyncCursor(run_started.millis().min(m.saturating_sub(1))),
        None => run_started,
    }
}

/// Result of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    #[serde(rename = "projectID")]
    pub project_id: String,
    #[serde(rename = "fileList")]
    pub all_files: Vec<String>,
    /// Files whose content was sent and acknowledged
    #[serde(rename = "modifiedList")]
    pub modified_files: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    /// Cursor to pass to the next incremental run
    #[serde(rename = "timeStamp")]
    pub next_cursor: SyncCursor,
}

pub struct SyncOrchestrator<'a> {
    transport: &'a dyn Transport,
    logger: &'a dyn Logger,
    filter: FileFilter,
    cancel: Option<Arc<AtomicBool>>,
    clock: fn() -> SyncCursor,
    end_retries: u32,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            logger: &NoopLogger,
            filter: FileFilter::default(),
            cancel: None,
            clock: SyncCursor::now,
            end_retries: 0,
        }
    }

    pub fn with_logger(mut self, logger: &'a dyn Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_filter(mut self, filter: FileFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Flag checked before every upload; once set, the run stops sending
    /// content but still closes the handshake.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_clock(mut self, clock: fn() -> SyncCursor) -> Self {
        self.clock = clock;
        self
    }

    /// Re-send an unacknowledged end call up to `retries` more times
    pub fn with_end_retries(mut self, retries: u32) -> Self {
        self.end_retries = retries;
        self
    }

    /// Register a new project and transfer all of its files
    pub fn run_bind(&self, identity: &ProjectIdentity) -> Result<SyncOutcome> {
        self.run(
            SyncMode::Bind(identity.bind_request()),
            identity.local_path(),
            SyncCursor::INITIAL,
        )
    }

    /// Transfer files changed since `cursor` for a known project
    pub fn run_sync(&self, project_id: &str, root: &Path, cursor: SyncCursor) -> Result<SyncOutcome> {
        self.run(
            SyncMode::Incremental {
                project_id: project_id.to_string(),
            },
            root,
            cursor,
        )
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    fn walk(&self, root: &Path) -> Result<(Vec<FileRecord>, Vec<SkippedFile>)> {
        let mut records = Vec::new();
        let mut skipped = Vec::new();
        for item in fs_enum::walk(root, &self.filter)? {
            match item {
                Ok(record) => records.push(record),
                Err(skip) => {
                    self.logger.skipped(&skip);
                    skipped.push(skip);
                }
            }
        }
        Ok((records, skipped))
    }

    fn retry_completion(&self, err: SyncError) -> Result<()> {
        let (pending, source) = match err {
            SyncError::CompletionFailed { pending, source } => (pending, source),
            other => return Err(other),
        };
        for attempt in 1..=self.end_retries {
            std::thread::sleep(Duration::from_millis(
                timeouts::END_RETRY_BACKOFF_MS * attempt as u64,
            ));
            match pending.resend(self.transport) {
                Ok(()) => return Ok(()),
                Err(e) => self
                    .logger
                    .error(&pending.call().to_string(), &format!("attempt {}: {}", attempt, e)),
            }
        }
        Err(SyncError::CompletionFailed { pending, source })
    }

    fn run(&self, mode: SyncMode, root: &Path, cursor: SyncCursor) -> Result<SyncOutcome> {
        // Taken before the walk so edits made during the run count next time
        let run_started = (self.clock)();
        let timer = Instant::now();
        let mode_name = if matches!(mode, SyncMode::Bind(_)) { "bind" } else { "sync" };

        let (records, mut skipped) = self.walk(root)?;
        let changes = ChangeSet::compute(&records, cursor);
        self.logger.planned(changes.all_files.len(), changes.modified_files.len());

        let mut session = SyncSession::new(self.transport);
        let project_id = match session.begin(mode) {
            Ok(id) => id.to_string(),
            Err(e) => {
                self.logger.error(mode_name, &e.to_string());
                return Err(e);
            }
        };
        self.logger.run_start(mode_name, &project_id, root);

        let mut uploaded = Vec::with_capacity(changes.modified_files.len());
        let mut oldest_skipped: Option<i64> = None;
        let mut interrupted = false;
        for record in ChangeSet::stale(&records, cursor) {
            if self.cancelled() {
                interrupted = true;
                break;
            }
            let envelope = match TransferEnvelope::from_record(record) {
                Ok(envelope) => envelope,
                Err(skip) => {
                    self.logger.skipped(&skip);
                    skipped.push(skip);
                    oldest_skipped = Some(
                        oldest_skipped.map_or(record.modified_at_millis, |m| m.min(record.modified_at_millis)),
                    );
                    continue;
                }
            };
            if let Err(e) = session.upload(&envelope) {
                self.logger.error(&record.relative_path, &e.to_string());
                return Err(e);
            }
            self.logger
                .upload_done(&record.relative_path, envelope.encoded_content.len() as u64);
            uploaded.push(record.relative_path.clone());
        }

        let next_cursor = next_cursor(
            cursor,
            run_started,
            interrupted || uploaded.is_empty(),
            oldest_skipped,
        );
        if let Err(e) = session
            .complete(&changes.all_files, &uploaded, next_cursor)
            .or_else(|e| self.retry_completion(e))
        {
            self.logger.error(mode_name, &e.to_string());
            return Err(e);
        }

        if interrupted {
            return Err(SyncError::Cancelled {
                project_id,
                uploaded: uploaded.len(),
                pending: changes.modified_files.len(),
            });
        }

        self.logger
            .run_done(changes.all_files.len(), uploaded.len(), timer.elapsed().as_secs_f64());
        Ok(SyncOutcome {
            project_id,
            all_files: changes.all_files,
            modified_files: uploaded,
            skipped,
            next_cursor,
        })
    }
}
