use anyhow::Result;
use filetime::FileTime;
use projsync::changeset::SyncCursor;
use projsync::envelope::TransferEnvelope;
use projsync::error::{Call, SkipKind, SyncError};
use projsync::orchestrator::SyncOrchestrator;
use projsync::project::ProjectIdentity;
use projsync::session::PendingCompletion;
use projsync::transport::{EngineRequest, EngineResponse, Transport};
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// In-memory engine that records every request it receives
#[derive(Default)]
struct FakeEngine {
    seen: RefCell<Vec<EngineRequest>>,
    /// End calls to reject before accepting one
    end_failures: Cell<u32>,
    upload_status: Option<u16>,
    /// Removed from disk when the first upload arrives
    delete_on_upload: Option<PathBuf>,
}

impl FakeEngine {
    fn calls(&self) -> Vec<Call> {
        self.seen.borrow().iter().map(|r| r.call).collect()
    }

    fn last(&self) -> EngineRequest {
        self.seen.borrow().last().cloned().unwrap()
    }

    fn uploads(&self) -> Vec<TransferEnvelope> {
        self.seen
            .borrow()
            .iter()
            .filter(|r| matches!(r.call, Call::BindUpload | Call::SyncUpload))
            .map(|r| serde_json::from_value(r.body.clone()).unwrap())
            .collect()
    }
}

fn ok(body: &str) -> EngineResponse {
    EngineResponse {
        status: 200,
        body: body.as_bytes().to_vec(),
    }
}

impl Transport for FakeEngine {
    fn send(&self, request: &EngineRequest) -> Result<EngineResponse> {
        self.seen.borrow_mut().push(request.clone());
        match request.call {
            Call::BindStart => Ok(ok(r#"{"projectID":"p-42","status":"ok"}"#)),
            Call::BindUpload | Call::SyncUpload => {
                if let Some(path) = &self.delete_on_upload {
                    let _ = std::fs::remove_file(path);
                }
                match self.upload_status {
                    Some(status) => Ok(EngineResponse {
                        status,
                        body: b"engine busy".to_vec(),
                    }),
                    None => Ok(ok("")),
                }
            }
            Call::BindEnd | Call::SyncEnd => {
                if self.end_failures.get() > 0 {
                    self.end_failures.set(self.end_failures.get() - 1);
                    return Ok(EngineResponse {
                        status: 500,
                        body: Vec::new(),
                    });
                }
                Ok(ok(""))
            }
        }
    }
}

fn write_with_mtime(root: &Path, rel: &str, content: &[u8], millis: i64) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    let ft = FileTime::from_unix_time(millis / 1000, ((millis % 1000) * 1_000_000) as u32);
    filetime::set_file_mtime(&path, ft).unwrap();
}

fn fixed_clock() -> SyncCursor {
    SyncCursor(9_999)
}

#[test]
fn bind_sends_start_upload_end_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    write_with_mtime(tmp.path(), "main.txt", b"hello", 500);
    let engine = FakeEngine::default();
    let identity = ProjectIdentity::new("demo", "go", "docker", tmp.path()).unwrap();

    let outcome = SyncOrchestrator::new(&engine).run_bind(&identity).unwrap();

    assert_eq!(engine.calls(), vec![Call::BindStart, Call::BindUpload, Call::BindEnd]);
    let expected = TransferEnvelope::file("main.txt", b"hello").unwrap();
    assert_eq!(engine.uploads(), vec![expected.clone()]);
    assert!(!expected.is_directory);
    assert_eq!(expected.decoded_content().unwrap(), b"hello");

    let seen = engine.seen.borrow();
    assert_eq!(seen[0].path, "projects/remote-bind/start");
    assert_eq!(seen[0].body["name"], "demo");
    assert_eq!(seen[0].body["projectType"], "docker");
    assert_eq!(seen[1].path, "projects/p-42/remote-bind/upload");
    assert_eq!(seen[2].path, "projects/p-42/remote-bind/end");
    assert_eq!(seen[2].body, serde_json::json!({ "id": "p-42" }));

    assert_eq!(outcome.project_id, "p-42");
    assert_eq!(outcome.all_files, vec!["main.txt"]);
    assert_eq!(outcome.modified_files, vec!["main.txt"]);
    assert!(outcome.skipped.is_empty());
}

#[test]
fn unchanged_tree_sends_only_the_end_call() {
    let tmp = tempfile::tempdir().unwrap();
    write_with_mtime(tmp.path(), "a.txt", b"a", 1_000);
    write_with_mtime(tmp.path(), "src/b.rs", b"b", 2_000);
    let engine = FakeEngine::default();

    let outcome = SyncOrchestrator::new(&engine)
        .with_clock(fixed_clock)
        .run_sync("p-7", tmp.path(), SyncCursor(5_000))
        .unwrap();

    assert_eq!(engine.calls(), vec![Call::SyncEnd]);
    let end = engine.last();
    assert_eq!(end.path, "projects/p-7/upload/end");
    assert_eq!(
        end.body,
        serde_json::json!({
            "fileList": ["a.txt", "src/b.rs"],
            "modifiedList": [],
            "timeStamp": 5_000,
        })
    );
    assert!(outcome.modified_files.is_empty());
    assert_eq!(outcome.next_cursor, SyncCursor(5_000));
}

#[test]
fn incremental_sync_uploads_only_newer_files() {
    let tmp = tempfile::tempdir().unwrap();
    write_with_mtime(tmp.path(), "old.txt", b"old", 1_000);
    write_with_mtime(tmp.path(), "new.txt", b"new", 6_000);
    let engine = FakeEngine::default();

    let outcome = SyncOrchestrator::new(&engine)
        .with_clock(fixed_clock)
        .run_sync("p-7", tmp.path(), SyncCursor(5_000))
        .unwrap();

    assert_eq!(engine.calls(), vec![Call::SyncUpload, Call::SyncEnd]);
    assert_eq!(engine.uploads()[0].relative_path, "new.txt");
    assert_eq!(engine.last().body["modifiedList"], serde_json::json!(["new.txt"]));
    assert_eq!(engine.last().body["timeStamp"], 9_999);
    assert_eq!(outcome.all_files, vec!["new.txt", "old.txt"]);
    assert_eq!(outcome.next_cursor, SyncCursor(9_999));
}

#[test]
fn cancelled_run_still_closes_the_handshake() {
    let tmp = tempfile::tempdir().unwrap();
    write_with_mtime(tmp.path(), "a.txt", b"a", 500);
    write_with_mtime(tmp.path(), "b.txt", b"b", 500);
    let engine = FakeEngine::default();
    let flag = Arc::new(AtomicBool::new(true));

    let err = SyncOrchestrator::new(&engine)
        .with_cancel(flag)
        .with_clock(fixed_clock)
        .run_sync("p-7", tmp.path(), SyncCursor(100))
        .unwrap_err();

    assert_eq!(engine.calls(), vec![Call::SyncEnd]);
    assert_eq!(engine.last().body["modifiedList"], serde_json::json!([]));
    assert_eq!(engine.last().body["timeStamp"], 100);
    match err {
        SyncError::Cancelled {
            project_id,
            uploaded,
            pending,
        } => {
            assert_eq!(project_id, "p-7");
            assert_eq!(uploaded, 0);
            assert_eq!(pending, 2);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn rejected_end_call_is_retried() {
    let tmp = tempfile::tempdir().unwrap();
    write_with_mtime(tmp.path(), "a.txt", b"a", 500);
    let engine = FakeEngine {
        end_failures: Cell::new(1),
        ..Default::default()
    };

    let outcome = SyncOrchestrator::new(&engine)
        .with_end_retries(1)
        .run_sync("p-7", tmp.path(), SyncCursor::INITIAL)
        .unwrap();

    assert_eq!(
        engine.calls(),
        vec![Call::SyncUpload, Call::SyncEnd, Call::SyncEnd]
    );
    assert_eq!(outcome.modified_files, vec!["a.txt"]);
}

#[test]
fn failed_end_call_can_be_resent_later() {
    let tmp = tempfile::tempdir().unwrap();
    write_with_mtime(tmp.path(), "a.txt", b"a", 500);
    let engine = FakeEngine {
        end_failures: Cell::new(1),
        ..Default::default()
    };

    let err = SyncOrchestrator::new(&engine)
        .with_clock(fixed_clock)
        .run_sync("p-7", tmp.path(), SyncCursor::INITIAL)
        .unwrap_err();

    let (pending, source) = match err {
        SyncError::CompletionFailed { pending, source } => (pending, source),
        other => panic!("expected CompletionFailed, got {other:?}"),
    };
    assert!(matches!(
        *source,
        SyncError::Transport {
            call: Call::SyncEnd,
            status: Some(500),
            ..
        }
    ));
    assert_eq!(pending.project_id, "p-7");
    assert_eq!(pending.call(), Call::SyncEnd);
    assert_eq!(pending.cursor, SyncCursor(9_999));

    // Survives being stored and reloaded by a later process
    let stored = serde_json::to_string(&pending).unwrap();
    let reloaded: PendingCompletion = serde_json::from_str(&stored).unwrap();
    assert_eq!(reloaded, *pending);
    reloaded.resend(&engine).unwrap();
    assert_eq!(engine.last().body["timeStamp"], 9_999);
    assert_eq!(
        engine.calls(),
        vec![Call::SyncUpload, Call::SyncEnd, Call::SyncEnd]
    );
}

#[test]
fn rejected_upload_aborts_without_end_call() {
    let tmp = tempfile::tempdir().unwrap();
    write_with_mtime(tmp.path(), "a.txt", b"a", 500);
    write_with_mtime(tmp.path(), "b.txt", b"b", 500);
    let engine = FakeEngine {
        upload_status: Some(503),
        ..Default::default()
    };

    let err = SyncOrchestrator::new(&engine)
        .run_sync("p-7", tmp.path(), SyncCursor::INITIAL)
        .unwrap_err();

    assert_eq!(engine.calls(), vec![Call::SyncUpload]);
    match err {
        SyncError::Transport {
            call,
            status,
            reason,
        } => {
            assert_eq!(call, Call::SyncUpload);
            assert_eq!(status, Some(503));
            assert_eq!(reason, "engine busy");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn missing_root_sends_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = FakeEngine::default();

    let err = SyncOrchestrator::new(&engine)
        .run_sync("p-7", &tmp.path().join("gone"), SyncCursor::INITIAL)
        .unwrap_err();

    assert!(matches!(err, SyncError::RootPath { .. }));
    assert!(engine.calls().is_empty());
}

#[test]
fn file_removed_mid_run_is_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    write_with_mtime(tmp.path(), "a.txt", b"a", 500);
    write_with_mtime(tmp.path(), "b.txt", b"b", 500);
    let engine = FakeEngine {
        delete_on_upload: Some(tmp.path().join("b.txt")),
        ..Default::default()
    };

    let outcome = SyncOrchestrator::new(&engine)
        .with_clock(fixed_clock)
        .run_sync("p-7", tmp.path(), SyncCursor::INITIAL)
        .unwrap();

    assert_eq!(engine.calls(), vec![Call::SyncUpload, Call::SyncEnd]);
    assert_eq!(outcome.all_files, vec!["a.txt", "b.txt"]);
    assert_eq!(outcome.modified_files, vec!["a.txt"]);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].path, "b.txt");
    assert_eq!(outcome.skipped[0].kind, SkipKind::Read);
    assert_eq!(engine.last().body["modifiedList"], serde_json::json!(["a.txt"]));
}

#[test]
fn skipped_file_is_sent_on_the_next_run() {
    let tmp = tempfile::tempdir().unwrap();
    write_with_mtime(tmp.path(), "a.txt", b"a", 500);
    write_with_mtime(tmp.path(), "b.txt", b"b", 500);
    let first = FakeEngine {
        delete_on_upload: Some(tmp.path().join("b.txt")),
        ..Default::default()
    };

    let outcome = SyncOrchestrator::new(&first)
        .with_clock(fixed_clock)
        .run_sync("p-7", tmp.path(), SyncCursor::INITIAL)
        .unwrap();
    assert_eq!(outcome.modified_files, vec!["a.txt"]);
    assert_eq!(outcome.skipped[0].path, "b.txt");
    assert!(outcome.next_cursor.millis() < 500);
    assert_eq!(first.last().body["timeStamp"], outcome.next_cursor.millis());

    write_with_mtime(tmp.path(), "b.txt", b"b", 500);
    let second = FakeEngine::default();
    let again = SyncOrchestrator::new(&second)
        .with_clock(fixed_clock)
        .run_sync("p-7", tmp.path(), outcome.next_cursor)
        .unwrap();

    assert!(again.modified_files.contains(&"b.txt".to_string()));
    assert!(second
        .uploads()
        .iter()
        .any(|e| e.relative_path == "b.txt" && e.decoded_content().unwrap() == b"b"));
    assert!(again.skipped.is_empty());
    assert_eq!(again.next_cursor, SyncCursor(9_999));
}

#[test]
fn sync_after_bind_with_returned_cursor_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    write_with_mtime(tmp.path(), "main.txt", b"hello", 500);
    write_with_mtime(tmp.path(), "lib/util.txt", b"util", 1_500);
    let identity = ProjectIdentity::new("demo", "go", "docker", tmp.path()).unwrap();

    let bound = SyncOrchestrator::new(&FakeEngine::default())
        .run_bind(&identity)
        .unwrap();
    assert_eq!(bound.modified_files.len(), 2);
    assert!(bound.next_cursor.millis() > 1_500);

    let engine = FakeEngine::default();
    let outcome = SyncOrchestrator::new(&engine)
        .run_sync(&bound.project_id, tmp.path(), bound.next_cursor)
        .unwrap();

    assert_eq!(engine.calls(), vec![Call::SyncEnd]);
    assert_eq!(engine.last().body["timeStamp"], bound.next_cursor.millis());
    assert_eq!(engine.last().body["modifiedList"], serde_json::json!([]));
    assert_eq!(outcome.next_cursor, bound.next_cursor);
}
