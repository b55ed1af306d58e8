use std::{
    collections::{BTreeMap, HashMap},
    fs,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use super::{ClonedGitRepo, CommitId, GitError, GitOp, GitRepo, Identity, PullOutcome};

const GIT_DIR: &str = ".git";

#[derive(Clone, Debug)]
pub struct MemoryCommit {
    pub id: CommitId,
    pub author: Identity,
    pub message: String,
    pub paths: Vec<PathBuf>,
    pub pushed: bool,
}

/// Shared state standing in for the remote. Counters record what happened,
/// the remaining fields inject failures into the next calls.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    pub clones: Vec<Option<NonZeroU32>>,
    pub identities: Vec<Identity>,
    pub pulls: usize,
    pub resets: usize,
    pub pushes: usize,
    pub commits: Vec<MemoryCommit>,

    pub fail_clone: bool,
    pub failed_pulls: usize,
    pub diverged_pulls: usize,
    pub rejected_pushes: usize,
    pub push_delay: Duration,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryGitRepo {
    pub remote: Arc<Mutex<MemoryRemote>>,
}

impl MemoryGitRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MemoryRemote> {
        lock(&self.remote)
    }

    fn cloned(&self, local_path: &Path) -> MemoryClonedGitRepo {
        MemoryClonedGitRepo {
            local_path: local_path.to_path_buf(),
            remote: Arc::clone(&self.remote),
            staged: Mutex::new(BTreeMap::new()),
            committed: Mutex::new(HashMap::new()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct MemoryClonedGitRepo {
    pub local_path: PathBuf,
    remote: Arc<Mutex<MemoryRemote>>,
    staged: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    committed: Mutex<HashMap<PathBuf, Vec<u8>>>,
}

impl GitRepo for MemoryGitRepo {
    fn open(&self, local_path: &Path) -> Result<Option<Box<dyn ClonedGitRepo>>, GitError> {
        if local_path.join(GIT_DIR).is_dir() {
            return Ok(Some(Box::new(self.cloned(local_path))));
        }

        let occupied = fs::read_dir(local_path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);

        if occupied {
            return Err(GitError::NotARepository {
                path: local_path.to_path_buf(),
            });
        }

        Ok(None)
    }

    fn clone_repo(
        &self,
        local_path: &Path,
        depth: Option<NonZeroU32>,
    ) -> Result<Box<dyn ClonedGitRepo>, GitError> {
        let mut remote = self.state();
        if remote.fail_clone {
            return Err(GitError::Operation {
                op: GitOp::Clone,
                message: "remote unreachable".to_string(),
                transient: true,
            });
        }

        fs::create_dir_all(local_path.join(GIT_DIR))
            .map_err(|err| GitError::operation(GitOp::Clone, err.to_string()))?;

        remote.clones.push(depth);

        Ok(Box::new(self.cloned(local_path)))
    }
}

impl ClonedGitRepo for MemoryClonedGitRepo {
    fn local_path(&self) -> &Path {
        &self.local_path
    }

    fn configure_identity(&self, identity: &Identity) -> Result<(), GitError> {
        lock(&self.remote).identities.push(identity.clone());

        Ok(())
    }

    fn pull(&self) -> Result<PullOutcome, GitError> {
        let mut remote = lock(&self.remote);
        remote.pulls += 1;

        if remote.failed_pulls > 0 {
            remote.failed_pulls -= 1;
            return Err(GitError::Operation {
                op: GitOp::Pull,
                message: "connection reset".to_string(),
                transient: true,
            });
        }

        if remote.diverged_pulls > 0 {
            remote.diverged_pulls -= 1;
            return Ok(PullOutcome::Diverged);
        }

        Ok(PullOutcome::UpToDate)
    }

    fn reset_to_remote(&self) -> Result<(), GitError> {
        lock(&self.remote).resets += 1;

        Ok(())
    }

    fn add_path(&self, repo_path: &Path) -> Result<(), GitError> {
        let contents = fs::read(self.local_path.join(repo_path)).map_err(|err| {
            GitError::operation(
                GitOp::Add,
                format!("{}: {}", repo_path.to_string_lossy(), err),
            )
        })?;

        lock(&self.staged).insert(repo_path.to_path_buf(), contents);

        Ok(())
    }

    fn commit(&self, identity: &Identity, message: &str) -> Result<Option<CommitId>, GitError> {
        let staged = std::mem::take(&mut *lock(&self.staged));
        let mut committed = lock(&self.committed);

        let mut paths = vec![];
        for (path, contents) in staged {
            if committed.get(&path) != Some(&contents) {
                paths.push(path.clone());
                committed.insert(path, contents);
            }
        }

        if paths.is_empty() {
            return Ok(None);
        }

        let mut remote = lock(&self.remote);
        let id = CommitId(format!("memory-{}", remote.commits.len() + 1));

        remote.commits.push(MemoryCommit {
            id: id.clone(),
            author: identity.clone(),
            message: message.to_string(),
            paths,
            pushed: false,
        });

        Ok(Some(id))
    }

    fn push(&self) -> Result<(), GitError> {
        let push_delay = lock(&self.remote).push_delay;
        if !push_delay.is_zero() {
            thread::sleep(push_delay);
        }

        let mut remote = lock(&self.remote);
        if remote.rejected_pushes > 0 {
            remote.rejected_pushes -= 1;
            return Err(GitError::PushRejected {
                message: "refs/heads/main: fetch first".to_string(),
            });
        }

        remote.pushes += 1;
        for commit in remote.commits.iter_mut() {
            commit.pushed = true;
        }

        Ok(())
    }
}
