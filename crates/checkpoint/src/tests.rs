//! Unit tests for the checkpoint crate.

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::{Checkpoint, CheckpointFile, FilesystemStore, SyncPhase};

/// Checkpoint type exercising the trait without a database.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct TestCheckpoint {
    position: String,
}

impl Checkpoint for TestCheckpoint {
    const DATABASE_TYPE: &'static str = "test";

    fn to_cli_string(&self) -> String {
        self.position.clone()
    }

    fn from_cli_string(s: &str) -> anyhow::Result<Self> {
        Ok(Self {
            position: s.to_string(),
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct OtherCheckpoint {
    position: String,
}

impl Checkpoint for OtherCheckpoint {
    const DATABASE_TYPE: &'static str = "other";

    fn to_cli_string(&self) -> String {
        self.position.clone()
    }

    fn from_cli_string(s: &str) -> anyhow::Result<Self> {
        Ok(Self {
            position: s.to_string(),
        })
    }
}

#[test]
fn test_checkpoint_file_records_type_and_phase() {
    let cp = TestCheckpoint {
        position: "0/16B3748".to_string(),
    };
    let file = CheckpointFile::new(&cp, SyncPhase::BookmarkCreated).unwrap();

    assert_eq!(file.database_type, "test");
    assert_eq!(file.phase, SyncPhase::BookmarkCreated);
    assert_eq!(file.parse::<TestCheckpoint>().unwrap(), cp);
}

#[test]
fn test_checkpoint_file_type_mismatch() {
    let cp = TestCheckpoint {
        position: "0/1".to_string(),
    };
    let file = CheckpointFile::new(&cp, SyncPhase::BookmarkCreated).unwrap();

    let err = file.parse::<OtherCheckpoint>().unwrap_err();
    assert!(err.to_string().contains("type mismatch"));
}

#[test]
fn test_store_save_then_load() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path().join("nested"));
    let cp = TestCheckpoint {
        position: "0/ABCDEF".to_string(),
    };

    let path = store.save(&cp, SyncPhase::BookmarkCreated).unwrap();
    assert!(path.ends_with("checkpoint_bookmark_created.json"));
    assert!(!path.with_extension("json.tmp").exists());

    let loaded: Option<TestCheckpoint> = store.load(SyncPhase::BookmarkCreated).unwrap();
    assert_eq!(loaded, Some(cp));

    let missing: Option<TestCheckpoint> = store.load(SyncPhase::BulkCopyComplete).unwrap();
    assert!(missing.is_none());
}

#[test]
fn test_store_overwrites_same_phase() {
    let tmp = TempDir::new().unwrap();
    let store = FilesystemStore::new(tmp.path());

    for position in ["0/1", "0/2"] {
        store
            .save(
                &TestCheckpoint {
                    position: position.to_string(),
                },
                SyncPhase::BulkCopyComplete,
            )
            .unwrap();
    }

    let loaded: TestCheckpoint = store.load(SyncPhase::BulkCopyComplete).unwrap().unwrap();
    assert_eq!(loaded.position, "0/2");
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 1);
}

#[test]
fn test_phase_names() {
    assert_eq!(SyncPhase::BookmarkCreated.as_str(), "bookmark_created");
    assert_eq!(SyncPhase::BulkCopyComplete.to_string(), "bulk_copy_complete");
}
