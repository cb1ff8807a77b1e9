//! Cargo-style progress display
//!
//! Per-file lines scroll above a spinner that stays at the bottom.

use crossterm::{
    cursor,
    style::{Color, Stylize},
    ExecutableCommand,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::error::SkippedFile;
use crate::logger::Logger;

pub struct SyncProgress {
    spinner: ProgressBar,
    start_time: Instant,
    show_files: bool,
    /// Cursor was hidden and must be restored
    hid_cursor: bool,
    total: AtomicUsize,
    done: AtomicUsize,
    bytes: AtomicU64,
}

impl SyncProgress {
    pub fn new(verbose: bool) -> Self {
        let hid_cursor = io::stderr().is_terminal() && io::stderr().execute(cursor::Hide).is_ok();

        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        Self {
            spinner,
            start_time: Instant::now(),
            show_files: verbose,
            hid_cursor,
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Print a file operation above the progress line
    fn print_file_op(&self, operation: &str, color: Color, path: &str) {
        if self.show_files {
            self.spinner.suspend(|| {
                eprintln!("  {} {}", operation.with(color).bold(), path.with(Color::Cyan));
            });
        }
    }

    fn set_status(&self, stage: &str) {
        let done = self.done.load(Ordering::Relaxed);
        let total = self.total.load(Ordering::Relaxed);
        self.spinner.set_message(format!(
            "{} ({}/{}) in {:.1}s",
            stage.with(Color::Green).bold(),
            done,
            total,
            self.start_time.elapsed().as_secs_f64()
        ));
    }

    fn cleanup(&self) {
        if self.hid_cursor {
            let _ = io::stderr().execute(cursor::Show);
        }
    }
}

impl Logger for SyncProgress {
    fn run_start(&self, mode: &str, project_id: &str, _root: &Path) {
        self.print_file_op(if mode == "bind" { "Binding" } else { "Syncing" }, Color::Green, project_id);
        self.set_status("Uploading");
    }

    fn planned(&self, _files: usize, modified: usize) {
        self.total.store(modified, Ordering::Relaxed);
        self.set_status("Scanning");
    }

    fn upload_done(&self, path: &str, bytes: u64) {
        self.done.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.print_file_op("Uploaded", Color::Green, path);
        self.set_status("Uploading");
    }

    fn skipped(&self, file: &SkippedFile) {
        self.spinner.suspend(|| {
            eprintln!(
                "  {} {} ({})",
                "Skipped".with(Color::Yellow).bold(),
                file.path.as_str().with(Color::Cyan),
                file.reason
            );
        });
    }

    fn error(&self, context: &str, msg: &str) {
        self.spinner.finish_with_message(format!(
            "{} {}: {}",
            "Failed".with(Color::Red).bold(),
            context,
            msg
        ));
        self.cleanup();
    }

    fn run_done(&self, files: usize, uploaded: usize, seconds: f64) {
        let bytes = self.bytes.load(Ordering::Relaxed);
        self.spinner.finish_with_message(format!(
            "{} {} of {} files ({:.1} KB encoded) in {:.1}s",
            "Synchronized".with(Color::Green).bold(),
            uploaded,
            files,
            bytes as f64 / 1024.0,
            seconds
        ));
        self.cleanup();
    }
}

impl Drop for SyncProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_left_alone_without_terminal() {
        let progress = SyncProgress::new(false);
        assert_eq!(progress.hid_cursor, io::stderr().is_terminal());
        progress.planned(3, 2);
        progress.upload_done("a.txt", 10);
        assert_eq!(progress.done.load(Ordering::Relaxed), 1);
        assert_eq!(progress.bytes.load(Ordering::Relaxed), 10);
    }
}
