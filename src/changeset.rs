//! Change detection against a sync cursor

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use crate::fs_enum::{mtime_millis, FileRecord};

/// Milliseconds since the epoch of the last successful transfer.
/// Zero means nothing has been transferred yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(pub i64);

impl SyncCursor {
    pub const INITIAL: SyncCursor = SyncCursor(0);

    pub fn now() -> Self {
        SyncCursor(mtime_millis(SystemTime::now()))
    }

    pub fn is_initial(self) -> bool {
        self.0 == 0
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    /// Whether a file last modified at `modified_at_millis` still needs sending.
    /// Equal timestamps count as already synchronized.
    pub fn is_stale(self, modified_at_millis: i64) -> bool {
        self.is_initial() || modified_at_millis > self.0
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SyncCursor {
    fn from(v: i64) -> Self {
        SyncCursor(v)
    }
}

/// Every walked path plus the subset modified since the cursor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub all_files: Vec<String>,
    pub modified_files: Vec<String>,
}

impl ChangeSet {
    pub fn compute(records: &[FileRecord], cursor: SyncCursor) -> Self {
        let mut set = ChangeSet::default();
        for record in records {
            set.all_files.push(record.relative_path.clone());
            if cursor.is_stale(record.modified_at_millis) {
                set.modified_files.push(record.relative_path.clone());
            }
        }
        set
    }

    /// Records that need their content sent, in walk order
    pub fn stale<'a>(
        records: &'a [FileRecord],
        cursor: SyncCursor,
    ) -> impl Iterator<Item = &'a FileRecord> + 'a {
        records
            .iter()
            .filter(move |r| cursor.is_stale(r.modified_at_millis))
    }
}
