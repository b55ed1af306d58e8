use std::fmt::{self, Debug};
use std::num::NonZeroU32;
use std::path::Path;

use super::GitError;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommitId(pub String);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PullOutcome {
    /// Local branch already contains the remote head (it may be ahead).
    UpToDate,
    FastForwarded,
    /// Remote and local both moved. Nothing was changed locally.
    Diverged,
}

pub trait GitRepo: Debug + Send + Sync {
    /// Opens the working copy at `local_path` if it is already a repository.
    fn open(&self, local_path: &Path) -> Result<Option<Box<dyn ClonedGitRepo>>, GitError>;

    /// Clones the remote into `local_path`. `depth` limits history for a shallow clone.
    fn clone_repo(
        &self,
        local_path: &Path,
        depth: Option<NonZeroU32>,
    ) -> Result<Box<dyn ClonedGitRepo>, GitError>;
}

pub trait ClonedGitRepo: Debug + Send {
    fn local_path(&self) -> &Path;
    fn configure_identity(&self, identity: &Identity) -> Result<(), GitError>;
    fn pull(&self) -> Result<PullOutcome, GitError>;
    /// Hard-resets the branch to the last fetched remote head.
    fn reset_to_remote(&self) -> Result<(), GitError>;
    fn add_path(&self, repo_path: &Path) -> Result<(), GitError>;
    /// Returns `None` when the index matches HEAD and there is nothing to commit.
    fn commit(&self, identity: &Identity, message: &str) -> Result<Option<CommitId>, GitError>;
    fn push(&self) -> Result<(), GitError>;
}
