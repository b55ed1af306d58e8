pub mod git;

pub use git::{
    set_transport_timeouts, ClonedGitRepo, CommitId, GitError, GitOp, GitRepo, Identity,
    MemoryGitRepo, PullOutcome, RemoteGitRepo,
};
