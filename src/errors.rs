use std::{io, path::PathBuf, time::Duration};

use commitsync_core::GitError;
use thiserror::Error;

/// Coarse classification used for logging and for choosing the HTTP status.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Validation,
    Filesystem,
    Sync,
    Unavailable,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Validation(String),

    #[error("filesystem error at {}: {source}", .path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Sync(#[from] GitError),

    #[error("working copy unavailable: {0}")]
    Initialization(#[source] GitError),

    #[error("working copy is busy with another operation")]
    Busy,

    #[error("sync operation did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("sync operation aborted: {0}")]
    Aborted(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::Filesystem { .. } => ErrorKind::Filesystem,
            SyncError::Sync(_) | SyncError::Initialization(_) | SyncError::Aborted(_) => {
                ErrorKind::Sync
            }
            SyncError::Busy | SyncError::TimedOut(_) => ErrorKind::Unavailable,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Sync(err) | SyncError::Initialization(err) => err.is_transient(),
            SyncError::Busy | SyncError::TimedOut(_) => true,
            SyncError::Validation(_) | SyncError::Filesystem { .. } | SyncError::Aborted(_) => {
                false
            }
        }
    }
}

pub(crate) fn fs_err(path: impl Into<PathBuf>, source: io::Error) -> SyncError {
    SyncError::Filesystem {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use commitsync_core::GitOp;

    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            SyncError::Validation("content is required".to_string()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            fs_err("data/members.ts", io::Error::from(io::ErrorKind::PermissionDenied)).kind(),
            ErrorKind::Filesystem
        );
        assert_eq!(SyncError::Busy.kind(), ErrorKind::Unavailable);

        let rejected = SyncError::from(GitError::PushRejected {
            message: "fetch first".to_string(),
        });
        assert_eq!(rejected.kind(), ErrorKind::Sync);
        assert!(rejected.is_transient());

        let clone_failed = SyncError::Initialization(GitError::operation(
            GitOp::Clone,
            "repository not found",
        ));
        assert_eq!(clone_failed.kind(), ErrorKind::Sync);
        assert!(!clone_failed.is_transient());
    }
}
