//! Per-file unit of transfer

use serde::{Deserialize, Serialize};
use std::fs;

use crate::codec;
use crate::error::{SkipKind, SkippedFile};
use crate::fs_enum::FileRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEnvelope {
    #[serde(rename = "isDirectory")]
    pub is_directory: bool,
    #[serde(rename = "path")]
    pub relative_path: String,
    /// Codec output; empty for directories
    #[serde(rename = "msg")]
    pub encoded_content: String,
}

impl TransferEnvelope {
    pub fn file(relative_path: &str, raw: &[u8]) -> Result<Self, SkippedFile> {
        let encoded_content = codec::encode(raw).map_err(|e| SkippedFile {
            path: relative_path.to_string(),
            kind: SkipKind::Encoding,
            reason: e.to_string(),
        })?;
        Ok(Self {
            is_directory: false,
            relative_path: relative_path.to_string(),
            encoded_content,
        })
    }

    pub fn directory(relative_path: &str) -> Self {
        Self {
            is_directory: true,
            relative_path: relative_path.to_string(),
            encoded_content: String::new(),
        }
    }

    /// Read and encode a walked record
    pub fn from_record(record: &FileRecord) -> Result<Self, SkippedFile> {
        if record.is_directory {
            return Ok(Self::directory(&record.relative_path));
        }
        let raw = fs::read(&record.path).map_err(|e| SkippedFile {
            path: record.relative_path.clone(),
            kind: SkipKind::Read,
            reason: e.to_string(),
        })?;
        Self::file(&record.relative_path, &raw)
    }

    pub fn decoded_content(&self) -> Result<Vec<u8>, crate::error::CodecError> {
        if self.is_directory {
            return Ok(Vec::new());
        }
        codec::decode(&self.encoded_content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_wire_field_names() {
        let env = TransferEnvelope::file("src/main.txt", b"hello").unwrap();
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["isDirectory"], false);
        assert_eq!(v["path"], "src/main.txt");
        assert_eq!(v["msg"], codec::encode(b"hello").unwrap());
        assert_eq!(v.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_directory_has_no_content() {
        let env = TransferEnvelope::directory("assets");
        assert!(env.is_directory);
        assert!(env.encoded_content.is_empty());
        assert!(env.decoded_content().unwrap().is_empty());
    }

    #[test]
    fn test_from_record_reads_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data.bin");
        fs::write(&path, [0u8, 159, 146, 150]).unwrap();
        let record = FileRecord {
            relative_path: "data.bin".into(),
            is_directory: false,
            modified_at_millis: 1,
            path,
        };
        let env = TransferEnvelope::from_record(&record).unwrap();
        assert_eq!(env.decoded_content().unwrap(), vec![0u8, 159, 146, 150]);
    }

    #[test]
    fn test_from_record_missing_file_is_read_skip() {
        let record = FileRecord {
            relative_path: "gone.txt".into(),
            is_directory: false,
            modified_at_millis: 1,
            path: PathBuf::from("/definitely/not/here/gone.txt"),
        };
        let skip = TransferEnvelope::from_record(&record).unwrap_err();
        assert_eq!(skip.kind, SkipKind::Read);
        assert_eq!(skip.path, "gone.txt");
    }
}
