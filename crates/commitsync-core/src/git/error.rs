use std::{fmt, path::PathBuf};

use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GitOp {
    Clone,
    Open,
    Configure,
    Pull,
    Add,
    Commit,
    Push,
    Reset,
}

impl fmt::Display for GitOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GitOp::Clone => "clone",
            GitOp::Open => "open",
            GitOp::Configure => "configure",
            GitOp::Pull => "pull",
            GitOp::Add => "add",
            GitOp::Commit => "commit",
            GitOp::Push => "push",
            GitOp::Reset => "reset",
        };

        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {op} failed: {message}")]
    Operation {
        op: GitOp,
        message: String,
        transient: bool,
    },

    #[error("push rejected: {message}")]
    PushRejected { message: String },

    #[error("git {op} exceeded its network deadline")]
    TimedOut { op: GitOp },

    #[error("{} exists but is not a git working copy", .path.display())]
    NotARepository { path: PathBuf },
}

impl GitError {
    pub fn operation(op: GitOp, message: impl Into<String>) -> Self {
        GitError::Operation {
            op,
            message: message.into(),
            transient: false,
        }
    }

    /// Classifies a libgit2 error. Transport failures are worth retrying,
    /// everything else is reported as is.
    pub fn from_git2(op: GitOp, err: git2::Error) -> Self {
        if err.code() == git2::ErrorCode::NotFastForward {
            return GitError::PushRejected {
                message: err.message().to_string(),
            };
        }

        let transient = matches!(
            err.class(),
            git2::ErrorClass::Net | git2::ErrorClass::Ssh | git2::ErrorClass::Http
        );

        GitError::Operation {
            op,
            message: err.message().to_string(),
            transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            GitError::Operation { transient, .. } => *transient,
            GitError::PushRejected { .. } | GitError::TimedOut { .. } => true,
            GitError::NotARepository { .. } => false,
        }
    }
}
