//! Project tree enumeration
//!
//! Walks every regular file below a project root and yields one
//! [`FileRecord`] per file. Unreadable entries are yielded as
//! [`SkippedFile`] so the caller can report them and carry on.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, SkipKind, SkippedFile, SyncError};

/// One walked entry, relative to the project root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Forward-slash separated path relative to the root
    pub relative_path: String,
    pub is_directory: bool,
    pub modified_at_millis: i64,
    /// Location on disk, used to read the content
    pub path: PathBuf,
}

/// File filter options
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub exclude_files: Vec<String>,
    pub exclude_dirs: Vec<String>,
    /// Emit empty directories as directory records
    pub include_empty_dirs: bool,
}

impl FileFilter {
    /// Check if a file should be included
    fn should_include_file(&self, file_name: &str) -> bool {
        !self
            .exclude_files
            .iter()
            .any(|pattern| glob_match(pattern, file_name))
    }

    /// Check if a directory should be descended into
    fn should_include_dir(&self, dir_name: &str) -> bool {
        !self
            .exclude_dirs
            .iter()
            .any(|pattern| glob_match(pattern, dir_name))
    }
}

/// Simple glob matching: `*` matches any run of characters, anywhere
/// in the pattern. No other metacharacters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    // split always yields at least one item
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };
    let middle: Vec<&str> = parts.collect();
    let Some((last, middle)) = middle.split_last() else {
        // no `*` at all
        return rest.is_empty();
    };
    for part in middle {
        match rest.find(part) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

/// Milliseconds since the epoch, truncated toward zero.
///
/// Times before the epoch come out negative.
pub fn mtime_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

type EntryPredicate = Box<dyn FnMut(&DirEntry) -> bool + Send>;

/// Lazy, single-pass walk over a project tree.
///
/// Order is by file name within each directory, so two walks of an
/// unchanged tree yield the same sequence.
pub struct FileTreeWalker {
    root: PathBuf,
    filter: FileFilter,
    inner: walkdir::FilterEntry<walkdir::IntoIter, EntryPredicate>,
}

/// Start walking `root`. Fails only when the root itself is unusable.
pub fn walk(root: &Path, filter: &FileFilter) -> Result<FileTreeWalker> {
    let root_err = |source: io::Error| SyncError::RootPath {
        path: root.to_path_buf(),
        source,
    };
    let meta = fs::metadata(root).map_err(root_err)?;
    if !meta.is_dir() {
        return Err(root_err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a directory",
        )));
    }
    // Surface an unreadable root up front rather than as a skipped entry
    fs::read_dir(root).map_err(root_err)?;

    let dir_filter = filter.clone();
    let predicate: EntryPredicate = Box::new(move |e: &DirEntry| {
        if e.depth() == 0 || !e.file_type().is_dir() {
            return true;
        }
        dir_filter.should_include_dir(&e.file_name().to_string_lossy())
    });

    let inner = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(predicate);

    Ok(FileTreeWalker {
        root: root.to_path_buf(),
        filter: filter.clone(),
        inner,
    })
}

impl FileTreeWalker {
    fn relative(&self, path: &Path) -> std::result::Result<String, String> {
        let rel = path
            .strip_prefix(&self.root)
            .map_err(|_| format!("{} is outside the project root", path.display()))?;
        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(s) => match s.to_str() {
                    Some(s) => parts.push(s),
                    None => return Err("path is not valid UTF-8".to_string()),
                },
                Component::CurDir => {}
                other => return Err(format!("unexpected path component {:?}", other)),
            }
        }
        Ok(parts.join("/"))
    }

    fn skipped(&self, path: &Path, reason: String) -> SkippedFile {
        let path = self
            .relative(path)
            .unwrap_or_else(|_| path.to_string_lossy().into_owned());
        SkippedFile {
            path,
            kind: SkipKind::Walk,
            reason,
        }
    }

    fn record(&self, entry: &DirEntry, is_directory: bool) -> std::result::Result<FileRecord, SkippedFile> {
        let relative_path = self
            .relative(entry.path())
            .map_err(|reason| self.skipped(entry.path(), reason))?;
        let modified = entry
            .metadata()
            .map_err(|e| e.to_string())
            .and_then(|m| m.modified().map_err(|e| e.to_string()))
            .map_err(|reason| self.skipped(entry.path(), reason))?;
        Ok(FileRecord {
            relative_path,
            is_directory,
            modified_at_millis: mtime_millis(modified),
            path: entry.path().to_path_buf(),
        })
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut it| it.next().is_none())
        .unwrap_or(false)
}

impl Iterator for FileTreeWalker {
    type Item = std::result::Result<FileRecord, SkippedFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    let reason = err.to_string();
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    return Some(Err(self.skipped(&path, reason)));
                }
            };
            if entry.depth() == 0 {
                continue;
            }

            let file_type = entry.file_type();
            if file_type.is_dir() {
                if self.filter.include_empty_dirs && is_empty_dir(entry.path()) {
                    return Some(self.record(&entry, true));
                }
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            if !self
                .filter
                .should_include_file(&entry.file_name().to_string_lossy())
            {
                continue;
            }
            return Some(self.record(&entry, false));
        }
    }
}
