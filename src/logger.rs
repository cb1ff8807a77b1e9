use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::error::SkippedFile;

pub trait Logger: Send + Sync {
    fn run_start(&self, _mode: &str, _project_id: &str, _root: &Path) {}
    fn planned(&self, _files: usize, _modified: usize) {}
    fn upload_done(&self, _path: &str, _bytes: u64) {}
    fn skipped(&self, _file: &SkippedFile) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn run_done(&self, _files: usize, _uploaded: usize, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn run_start(&self, mode: &str, project_id: &str, root: &Path) {
        self.line(&format!(
            "START mode={} project={} root={}",
            mode,
            project_id,
            root.display()
        ));
    }
    fn planned(&self, files: usize, modified: usize) {
        self.line(&format!("PLAN files={files} modified={modified}"));
    }
    fn upload_done(&self, path: &str, bytes: u64) {
        self.line(&format!("UPLOAD path={} bytes={}", path, bytes));
    }
    fn skipped(&self, file: &SkippedFile) {
        self.line(&format!(
            "SKIP path={} kind={:?} reason={}",
            file.path, file.kind, file.reason
        ));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
    fn run_done(&self, files: usize, uploaded: usize, seconds: f64) {
        self.line(&format!("DONE files={files} uploaded={uploaded} seconds={seconds:.3}"));
    }
}

/// Forwards every event to each inner logger
#[derive(Default)]
pub struct MultiLogger {
    loggers: Vec<Box<dyn Logger>>,
}

impl MultiLogger {
    pub fn push(&mut self, logger: Box<dyn Logger>) {
        self.loggers.push(logger);
    }
}

impl Logger for MultiLogger {
    fn run_start(&self, mode: &str, project_id: &str, root: &Path) {
        self.loggers.iter().for_each(|l| l.run_start(mode, project_id, root));
    }
    fn planned(&self, files: usize, modified: usize) {
        self.loggers.iter().for_each(|l| l.planned(files, modified));
    }
    fn upload_done(&self, path: &str, bytes: u64) {
        self.loggers.iter().for_each(|l| l.upload_done(path, bytes));
    }
    fn skipped(&self, file: &SkippedFile) {
        self.loggers.iter().for_each(|l| l.skipped(file));
    }
    fn error(&self, context: &str, msg: &str) {
        self.loggers.iter().for_each(|l| l.error(context, msg));
    }
    fn run_done(&self, files: usize, uploaded: usize, seconds: f64) {
        self.loggers.iter().for_each(|l| l.run_done(files, uploaded, seconds));
    }
}
