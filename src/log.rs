//! JSONL record of sync runs, used to recover the last good cursor

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::changeset::SyncCursor;
use crate::session::PendingCompletion;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    InProgress,
    Completed,
    Interrupted,
    Failed,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Bind,
    Sync,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SyncLogEntry {
    pub timestamp: String,
    pub run_id: String,
    /// Empty for a bind that never got an id from the engine
    pub project_id: String,
    pub project_path: PathBuf,
    pub mode: RunMode,
    pub status: RunStatus,
    /// Cursor the next run should start from
    pub cursor: SyncCursor,
    pub files: usize,
    pub uploaded: usize,
    pub skipped: usize,
    pub error: Option<String>,
    /// End call that was never acknowledged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingCompletion>,
}

impl SyncLogEntry {
    pub fn new(run_id: &str, mode: RunMode, project_path: &Path, status: RunStatus) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            project_id: String::new(),
            project_path: project_path.to_path_buf(),
            mode,
            status,
            cursor: SyncCursor::INITIAL,
            files: 0,
            uploaded: 0,
            skipped: 0,
            error: None,
            pending: None,
        }
    }
}

pub struct SyncLog {
    log_file_path: PathBuf,
}

impl SyncLog {
    pub fn new(log_file_path: &Path) -> Self {
        SyncLog {
            log_file_path: log_file_path.to_path_buf(),
        }
    }

    pub fn new_run_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn add_entry(&self, entry: &SyncLogEntry) -> Result<()> {
        if let Some(parent) = self.log_file_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open sync log file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<SyncLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open sync log file for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: SyncLogEntry = serde_json::from_str(&line)
                .with_context(|| format!("Corrupt sync log line: {}", line))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Cursor of the newest completed run for `project_id`.
    ///
    /// Runs that never completed are ignored, so an interrupted transfer
    /// is re-sent from the previous good point.
    pub fn last_completed_cursor(&self, project_id: &str) -> Result<SyncCursor> {
        Ok(self
            .read_log()?
            .iter()
            .rev()
            .find(|e| e.project_id == project_id && e.status == RunStatus::Completed)
            .map(|e| e.cursor)
            .unwrap_or(SyncCursor::INITIAL))
    }

    /// Newest run for `project_id` whose end call is still outstanding.
    /// A later completed run for the project supersedes it.
    pub fn pending_completion(&self, project_id: &str) -> Result<Option<SyncLogEntry>> {
        for entry in self.read_log()?.into_iter().rev() {
            if entry.project_id != project_id {
                continue;
            }
            if entry.status == RunStatus::Completed {
                return Ok(None);
            }
            if entry.pending.is_some() {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(project: &str, status: RunStatus, cursor: i64) -> SyncLogEntry {
        let mut e = SyncLogEntry::new(&SyncLog::new_run_id(), RunMode::Sync, Path::new("/p"), status);
        e.project_id = project.to_string();
        e.cursor = SyncCursor(cursor);
        e
    }

    #[test]
    fn test_missing_log_means_initial_cursor() {
        let tmp = tempfile::tempdir().unwrap();
        let log = SyncLog::new(&tmp.path().join("runs.jsonl"));
        assert!(log.read_log().unwrap().is_empty());
        assert_eq!(log.last_completed_cursor("p").unwrap(), SyncCursor::INITIAL);
    }

    #[test]
    fn test_last_completed_cursor_skips_unfinished_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let log = SyncLog::new(&tmp.path().join("state/runs.jsonl"));
        log.add_entry(&entry("p", RunStatus::Completed, 100)).unwrap();
        log.add_entry(&entry("other", RunStatus::Completed, 999)).unwrap();
        log.add_entry(&entry("p", RunStatus::Completed, 200)).unwrap();
        log.add_entry(&entry("p", RunStatus::InProgress, 0)).unwrap();
        log.add_entry(&entry("p", RunStatus::Failed, 300)).unwrap();

        assert_eq!(log.read_log().unwrap().len(), 5);
        assert_eq!(log.last_completed_cursor("p").unwrap(), SyncCursor(200));
        assert_eq!(log.last_completed_cursor("other").unwrap(), SyncCursor(999));
        assert_eq!(log.last_completed_cursor("none").unwrap(), SyncCursor::INITIAL);
    }

    #[test]
    fn test_pending_completion_until_superseded() {
        let tmp = tempfile::tempdir().unwrap();
        let log = SyncLog::new(&tmp.path().join("runs.jsonl"));
        assert!(log.pending_completion("p").unwrap().is_none());

        // Older lines without a pending field still parse
        std::fs::write(
            tmp.path().join("runs.jsonl"),
            format!("{}\n", serde_json::to_string(&entry("p", RunStatus::Completed, 100)).unwrap()),
        )
        .unwrap();
        let pending = pending_end("p", 250);
        let mut failed = entry("p", RunStatus::Failed, 100);
        failed.pending = Some(pending.clone());
        log.add_entry(&failed).unwrap();
        log.add_entry(&entry("p", RunStatus::Failed, 100)).unwrap();

        let found = log.pending_completion("p").unwrap().unwrap();
        assert_eq!(found.pending, Some(pending));
        assert!(log.pending_completion("other").unwrap().is_none());

        log.add_entry(&entry("p", RunStatus::Completed, 250)).unwrap();
        assert!(log.pending_completion("p").unwrap().is_none());
    }

    fn pending_end(project: &str, cursor: i64) -> PendingCompletion {
        serde_json::from_value(serde_json::json!({
            "project_id": project,
            "cursor": cursor,
            "request": {
                "call": "SyncEnd",
                "path": format!("projects/{}/upload/end", project),
                "body": {"fileList": ["a"], "modifiedList": ["a"], "timeStamp": cursor}
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_corrupt_line_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runs.jsonl");
        std::fs::write(&path, "{not json}\n").unwrap();
        assert!(SyncLog::new(&path).read_log().is_err());
    }
}
