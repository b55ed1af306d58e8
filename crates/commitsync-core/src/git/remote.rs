use git2::{
    build::{CheckoutBuilder, RepoBuilder},
    CertificateCheckStatus, Cred, CredentialType, ErrorCode, FetchOptions, ObjectType,
    PushOptions, RemoteCallbacks, Repository, ResetType, Signature,
};
use std::{
    cell::RefCell,
    fmt::Debug,
    fs,
    num::NonZeroU32,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use super::{ClonedGitRepo, CommitId, GitError, GitOp, GitRepo, Identity, PullOutcome};

const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct RemoteOptions {
    pub deploy_key_path: Option<PathBuf>,
    pub verify_host_key: bool,
    pub network_timeout: Duration,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            deploy_key_path: None,
            verify_host_key: true,
            network_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub struct RemoteGitRepo {
    pub repo_url: String,
    pub branch: String,
    pub options: RemoteOptions,
}

pub struct RemoteClonedGitRepo {
    pub branch: String,
    pub options: RemoteOptions,

    pub local_path: PathBuf,
    pub repository: Repository,
}

impl RemoteGitRepo {
    pub fn new(repo_url: &str, branch: &str, options: RemoteOptions) -> Self {
        Self {
            repo_url: repo_url.to_string(),
            branch: branch.to_string(),
            options,
        }
    }

    fn get_callbacks(options: &RemoteOptions, deadline: Instant) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();

        let mut attempts = 0;
        callbacks.credentials(move |_url, username_from_url, allowed_types| {
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str("remote rejected the configured credential"));
            }

            credential(options, username_from_url.unwrap_or("git"), allowed_types)
        });

        let verify_host_key = options.verify_host_key;
        callbacks.certificate_check(move |_cert, host| {
            if verify_host_key {
                Ok(CertificateCheckStatus::CertificatePassthrough)
            } else {
                tracing::warn!("host key verification disabled, accepting {}", host);
                Ok(CertificateCheckStatus::CertificateOk)
            }
        });

        // returning false or an error aborts the transfer
        callbacks.transfer_progress(move |_progress| Instant::now() < deadline);
        callbacks.sideband_progress(move |_message| Instant::now() < deadline);
        callbacks.push_negotiation(move |_updates| {
            if Instant::now() < deadline {
                Ok(())
            } else {
                Err(git2::Error::from_str("network deadline exceeded"))
            }
        });

        callbacks
    }

    fn cloned(&self, local_path: &Path, repository: Repository) -> RemoteClonedGitRepo {
        RemoteClonedGitRepo {
            branch: self.branch.clone(),
            options: self.options.clone(),
            local_path: local_path.to_path_buf(),
            repository,
        }
    }
}

/// Bounds connecting to and waiting on a remote. libgit2 keeps these as
/// process-wide settings, so call this before spawning threads that use git.
pub fn set_transport_timeouts(timeout: Duration) {
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

    // SAFETY: both settings are plain ints read when a socket stream opens.
    unsafe {
        let _ = git2::opts::set_server_connect_timeout_in_milliseconds(millis);
        let _ = git2::opts::set_server_timeout_in_milliseconds(millis);
    }
}

/// The deploy key when one is configured, otherwise whatever the SSH agent holds.
fn credential(
    options: &RemoteOptions,
    username: &str,
    allowed_types: CredentialType,
) -> Result<Cred, git2::Error> {
    if allowed_types.contains(CredentialType::USERNAME) {
        return Cred::username(username);
    }

    match &options.deploy_key_path {
        Some(deploy_key_path) => Cred::ssh_key(username, None, deploy_key_path, None),
        None if allowed_types.contains(CredentialType::SSH_KEY) => {
            Cred::ssh_key_from_agent(username)
        }
        None => Cred::default(),
    }
}

fn network_error(op: GitOp, err: git2::Error, deadline: Instant) -> GitError {
    let expired = err.code() == ErrorCode::Timeout
        || (err.code() != ErrorCode::NotFastForward && Instant::now() >= deadline);
    if expired {
        return GitError::TimedOut { op };
    }

    GitError::from_git2(op, err)
}

fn is_empty_dir(path: &Path) -> Result<bool, GitError> {
    let mut entries =
        fs::read_dir(path).map_err(|err| GitError::operation(GitOp::Open, err.to_string()))?;

    Ok(entries.next().is_none())
}

impl GitRepo for RemoteGitRepo {
    #[tracing::instrument]
    fn open(&self, local_path: &Path) -> Result<Option<Box<dyn ClonedGitRepo>>, GitError> {
        if !local_path.exists() {
            return Ok(None);
        }

        match Repository::open(local_path) {
            Ok(repository) => Ok(Some(Box::new(self.cloned(local_path, repository)))),
            Err(err) if err.code() == ErrorCode::NotFound => {
                if is_empty_dir(local_path)? {
                    Ok(None)
                } else {
                    Err(GitError::NotARepository {
                        path: local_path.to_path_buf(),
                    })
                }
            }
            Err(err) => Err(GitError::from_git2(GitOp::Open, err)),
        }
    }

    #[tracing::instrument]
    fn clone_repo(
        &self,
        local_path: &Path,
        depth: Option<NonZeroU32>,
    ) -> Result<Box<dyn ClonedGitRepo>, GitError> {
        let deadline = Instant::now() + self.options.network_timeout;

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(RemoteGitRepo::get_callbacks(&self.options, deadline));
        if let Some(depth) = depth {
            fetch_options.depth(i32::try_from(depth.get()).unwrap_or(i32::MAX));
        }

        let mut repo_builder = RepoBuilder::new();
        repo_builder.fetch_options(fetch_options);

        let repository = repo_builder
            .branch(&self.branch)
            .clone(&self.repo_url, local_path)
            .map_err(|err| network_error(GitOp::Clone, err, deadline))?;

        tracing::info!(
            "cloned branch {} into {}",
            self.branch,
            local_path.to_string_lossy()
        );

        Ok(Box::new(self.cloned(local_path, repository)))
    }
}

impl RemoteClonedGitRepo {
    fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    fn tracking_ref(&self) -> String {
        format!("refs/remotes/origin/{}", self.branch)
    }
}

impl Debug for RemoteClonedGitRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ClonedGitRepo({})", self.local_path.to_string_lossy())
    }
}

impl ClonedGitRepo for RemoteClonedGitRepo {
    fn local_path(&self) -> &Path {
        &self.local_path
    }

    #[tracing::instrument]
    fn configure_identity(&self, identity: &Identity) -> Result<(), GitError> {
        let configure = |err| GitError::from_git2(GitOp::Configure, err);

        let mut config = self.repository.config().map_err(configure)?;
        config
            .set_str("user.name", &identity.name)
            .map_err(configure)?;
        config
            .set_str("user.email", &identity.email)
            .map_err(configure)?;

        Ok(())
    }

    #[tracing::instrument]
    fn pull(&self) -> Result<PullOutcome, GitError> {
        let pull = |err| GitError::from_git2(GitOp::Pull, err);
        let deadline = Instant::now() + self.options.network_timeout;

        let mut remote = self.repository.find_remote("origin").map_err(pull)?;

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(RemoteGitRepo::get_callbacks(&self.options, deadline));

        let ref_spec = format!("+{}:{}", self.branch_ref(), self.tracking_ref());
        remote
            .fetch(&[ref_spec.as_str()], Some(&mut fetch_options), None)
            .map_err(|err| network_error(GitOp::Pull, err, deadline))?;

        let tracking = self
            .repository
            .find_reference(&self.tracking_ref())
            .map_err(pull)?;
        let fetch_commit = self
            .repository
            .reference_to_annotated_commit(&tracking)
            .map_err(pull)?;

        let (analysis, _) = self
            .repository
            .merge_analysis(&[&fetch_commit])
            .map_err(pull)?;

        if analysis.is_up_to_date() {
            return Ok(PullOutcome::UpToDate);
        }

        if analysis.is_fast_forward() {
            let branch_ref = self.branch_ref();
            let mut reference = self.repository.find_reference(&branch_ref).map_err(pull)?;
            reference
                .set_target(fetch_commit.id(), "fast-forward")
                .map_err(pull)?;
            self.repository.set_head(&branch_ref).map_err(pull)?;
            self.repository
                .checkout_head(Some(CheckoutBuilder::default().force()))
                .map_err(pull)?;

            tracing::info!("fast-forwarded branch {} to {}", self.branch, fetch_commit.id());

            return Ok(PullOutcome::FastForwarded);
        }

        Ok(PullOutcome::Diverged)
    }

    #[tracing::instrument]
    fn reset_to_remote(&self) -> Result<(), GitError> {
        let reset = |err| GitError::from_git2(GitOp::Reset, err);

        let target = self
            .repository
            .revparse_single(&self.tracking_ref())
            .map_err(reset)?;
        self.repository
            .reset(&target, ResetType::Hard, None)
            .map_err(reset)?;

        tracing::warn!("reset branch {} to {}", self.branch, target.id());

        Ok(())
    }

    #[tracing::instrument]
    fn add_path(&self, repo_path: &Path) -> Result<(), GitError> {
        let add = |err| GitError::from_git2(GitOp::Add, err);

        let mut index = self.repository.index().map_err(add)?;
        index.add_path(repo_path).map_err(add)?;
        index.write().map_err(add)?;

        Ok(())
    }

    #[tracing::instrument]
    fn commit(&self, identity: &Identity, message: &str) -> Result<Option<CommitId>, GitError> {
        let commit = |err| GitError::from_git2(GitOp::Commit, err);

        let mut index = self.repository.index().map_err(commit)?;
        let oid = index.write_tree().map_err(commit)?;

        let obj = self
            .repository
            .head()
            .map_err(commit)?
            .resolve()
            .map_err(commit)?
            .peel(ObjectType::Commit)
            .map_err(commit)?;

        let parent_commit = obj
            .into_commit()
            .map_err(|_| GitError::operation(GitOp::Commit, "HEAD does not point at a commit"))?;

        if parent_commit.tree_id() == oid {
            tracing::info!("nothing to commit on branch {}", self.branch);
            return Ok(None);
        }

        let signature = Signature::now(&identity.name, &identity.email).map_err(commit)?;
        let tree = self.repository.find_tree(oid).map_err(commit)?;

        let commit_oid = self
            .repository
            .commit(
                Some("HEAD"),
                &signature,
                &signature,
                message,
                &tree,
                &[&parent_commit],
            )
            .map_err(commit)?;

        tracing::info!("commit {} completed on branch {}", commit_oid, self.branch);

        Ok(Some(CommitId(commit_oid.to_string())))
    }

    #[tracing::instrument]
    fn push(&self) -> Result<(), GitError> {
        let deadline = Instant::now() + self.options.network_timeout;

        let mut remote = self
            .repository
            .find_remote("origin")
            .map_err(|err| GitError::from_git2(GitOp::Push, err))?;

        let rejection: RefCell<Option<String>> = RefCell::new(None);

        let mut push_callbacks = RemoteGitRepo::get_callbacks(&self.options, deadline);
        push_callbacks.push_update_reference(|refname, status| {
            if let Some(status) = status {
                *rejection.borrow_mut() = Some(format!("{refname}: {status}"));
            }
            Ok(())
        });

        let mut push_options = PushOptions::new();
        push_options.remote_callbacks(push_callbacks);

        let ref_spec = format!("{}:{}", self.branch_ref(), self.branch_ref());

        remote
            .push(&[ref_spec.as_str()], Some(&mut push_options))
            .map_err(|err| network_error(GitOp::Push, err, deadline))?;

        drop(push_options);

        if let Some(message) = rejection.into_inner() {
            return Err(GitError::PushRejected { message });
        }

        tracing::info!("push completed on branch {}", self.branch);

        Ok(())
    }
}
