//! Persistent settings (`projsync.toml`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fs_enum::FileFilter;
use crate::protocol::timeouts;
use crate::transport::TransportOptions;

pub fn config_dir() -> PathBuf {
    #[cfg(windows)]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("projsync");
        }
    }
    // Unix-like default
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config").join("projsync");
    }
    PathBuf::from(".projsync")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("projsync.toml")
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine API base, e.g. http://localhost:9090/api/v1
    pub url: Option<String>,
    pub token: Option<String>,
    pub insecure: bool,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Extra attempts for an unacknowledged end call
    pub end_retries: u32,
    pub log_file: Option<PathBuf>,
    /// JSONL run log; defaults to sync-runs.jsonl in the config dir
    pub sync_log: Option<PathBuf>,
    pub exclude_files: Vec<String>,
    pub exclude_dirs: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            insecure: false,
            connect_timeout_secs: timeouts::CONNECT_SECS,
            request_timeout_secs: timeouts::REQUEST_SECS,
            end_retries: 2,
            log_file: None,
            sync_log: None,
            exclude_files: Vec::new(),
            exclude_dirs: Vec::new(),
        }
    }
}

impl Config {
    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => toml::from_str(&data)
                .with_context(|| format!("Invalid config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).ok();
        let data = toml::to_string(self)?;
        // atomic write
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        use std::io::Write as _;
        tmp.write_all(data.as_bytes())?;
        tmp.flush()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o600));
        }
        tmp.persist(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            token: self.token.clone(),
            insecure: self.insecure,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn file_filter(&self) -> FileFilter {
        FileFilter {
            exclude_files: self.exclude_files.clone(),
            exclude_dirs: self.exclude_dirs.clone(),
            include_empty_dirs: false,
        }
    }

    pub fn sync_log_path(&self) -> PathBuf {
        self.sync_log
            .clone()
            .unwrap_or_else(|| config_dir().join("sync-runs.jsonl"))
    }
}
