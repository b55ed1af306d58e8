use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use commitsync_core::CommitId;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationKind {
    ReplaceTrackedFile,
    StoreAsset,
}

/// One write plus its add/commit/push. Never persisted.
#[derive(Clone, Debug)]
pub struct SyncOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub message: String,
}

impl SyncOperation {
    pub fn replace_tracked_file(path: PathBuf, contents: Vec<u8>) -> Self {
        let message = format!("Update {} - {}", display(&path), timestamp());

        Self {
            id: Uuid::new_v4(),
            kind: OperationKind::ReplaceTrackedFile,
            path,
            contents,
            message,
        }
    }

    pub fn store_asset(path: PathBuf, contents: Vec<u8>) -> Self {
        let message = format!("Add/Update asset {} - {}", display(&path), timestamp());

        Self {
            id: Uuid::new_v4(),
            kind: OperationKind::StoreAsset,
            path,
            contents,
            message,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyncReport {
    pub operation_id: Uuid,
    pub path: PathBuf,
    /// `None` when the content matched what was already committed.
    pub commit: Option<CommitId>,
    pub attempts: u32,
}

impl SyncReport {
    pub fn changed(&self) -> bool {
        self.commit.is_some()
    }
}

fn display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
