mod error;
pub mod memory;
pub mod remote;
mod repo;

pub use error::{GitError, GitOp};
pub use memory::MemoryGitRepo;
pub use remote::{set_transport_timeouts, RemoteGitRepo, RemoteOptions};
pub use repo::{ClonedGitRepo, CommitId, GitRepo, Identity, PullOutcome};
