use std::{path::Path, sync::Arc, thread};

use commitsync_core::{CommitId, GitRepo};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    config::SyncSettings,
    errors::SyncError,
    models::{public_url, AssetName, StoredAsset, SyncOperation, SyncReport},
    working_copy::{confine, WorkingCopy},
};

type WorkingCopySlot = Option<WorkingCopy>;

/// Applies writes to the working copy and publishes them, one at a time.
///
/// The working copy sits in a single-slot mutex. A caller that cannot take
/// the slot within `lock_wait` gets [`SyncError::Busy`]. The git work runs on
/// the blocking pool and keeps the slot until it really ends, even when the
/// caller already gave up on it with [`SyncError::TimedOut`].
pub struct SyncService {
    pub git_repo: Arc<dyn GitRepo>,
    pub settings: SyncSettings,

    working_copy: Arc<Mutex<WorkingCopySlot>>,
}

impl SyncService {
    pub fn new(git_repo: Arc<dyn GitRepo>, settings: SyncSettings) -> Self {
        Self {
            git_repo,
            settings,
            working_copy: Arc::new(Mutex::new(None)),
        }
    }

    #[tracing::instrument(name = "sync::ensure_working_copy_ready", skip(self))]
    pub async fn ensure_working_copy_ready(&self) -> Result<(), SyncError> {
        let slot = self.acquire().await?;
        let git_repo = Arc::clone(&self.git_repo);
        let settings = self.settings.clone();

        self.run_blocking(move || {
            let mut slot = slot;
            let working_copy = ready(&mut slot, git_repo.as_ref(), &settings)?;
            let outcome = working_copy.sync()?;

            tracing::info!("working copy ready ({:?})", outcome);

            Ok(())
        })
        .await
    }

    pub async fn replace_tracked_file(
        &self,
        path: &Path,
        content: Vec<u8>,
    ) -> Result<SyncReport, SyncError> {
        let path = confine(path)?;

        self.execute(SyncOperation::replace_tracked_file(path, content))
            .await
    }

    pub async fn store_uploaded_asset(
        &self,
        directory: &Path,
        desired_name: &str,
        payload: Vec<u8>,
        original_extension: &str,
    ) -> Result<StoredAsset, SyncError> {
        let filename = AssetName::new(desired_name, original_extension)?.file_name();
        let path = confine(&directory.join(&filename))?;
        let url = public_url(&path);

        let report = self
            .execute(SyncOperation::store_asset(path.clone(), payload))
            .await?;

        Ok(StoredAsset {
            filename,
            path,
            url,
            report,
        })
    }

    #[tracing::instrument(
        name = "sync::execute",
        skip_all,
        fields(
            operation_id = %operation.id,
            kind = ?operation.kind,
            path = %operation.path.display()
        )
    )]
    async fn execute(&self, operation: SyncOperation) -> Result<SyncReport, SyncError> {
        let slot = self.acquire().await?;
        let git_repo = Arc::clone(&self.git_repo);
        let settings = self.settings.clone();

        let report = self
            .run_blocking(move || {
                let mut slot = slot;
                run_operation(&mut slot, git_repo.as_ref(), &settings, &operation)
            })
            .await?;

        match &report.commit {
            Some(commit) => tracing::info!(
                attempts = report.attempts,
                "committed and pushed {}",
                commit
            ),
            None => tracing::info!(attempts = report.attempts, "no changes to commit"),
        }

        Ok(report)
    }

    async fn acquire(&self) -> Result<OwnedMutexGuard<WorkingCopySlot>, SyncError> {
        let lock = Arc::clone(&self.working_copy).lock_owned();

        match tokio::time::timeout(self.settings.lock_wait, lock).await {
            Ok(slot) => Ok(slot),
            Err(_) => {
                tracing::warn!(
                    "working copy still busy after {:?}",
                    self.settings.lock_wait
                );
                Err(SyncError::Busy)
            }
        }
    }

    async fn run_blocking<T, F>(&self, task: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Result<T, SyncError> + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(task);

        match tokio::time::timeout(self.settings.operation_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(SyncError::Aborted(err.to_string())),
            Err(_) => Err(SyncError::TimedOut(self.settings.operation_timeout)),
        }
    }
}

fn ready<'a>(
    slot: &'a mut WorkingCopySlot,
    git_repo: &dyn GitRepo,
    settings: &SyncSettings,
) -> Result<&'a WorkingCopy, SyncError> {
    let working_copy = match slot.take() {
        Some(working_copy) => working_copy,
        None => WorkingCopy::ready(git_repo, settings).map_err(SyncError::Initialization)?,
    };

    Ok(slot.insert(working_copy))
}

fn run_operation(
    slot: &mut WorkingCopySlot,
    git_repo: &dyn GitRepo,
    settings: &SyncSettings,
    operation: &SyncOperation,
) -> Result<SyncReport, SyncError> {
    let mut attempt = 1;

    loop {
        match attempt_operation(slot, git_repo, settings, operation) {
            Ok(commit) => {
                return Ok(SyncReport {
                    operation_id: operation.id,
                    path: operation.path.clone(),
                    commit,
                    attempts: attempt,
                })
            }
            Err(err) if err.is_transient() && attempt < settings.max_attempts => {
                tracing::warn!(attempt, "retrying after transient failure: {}", err);

                thread::sleep(settings.retry_backoff * attempt);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn attempt_operation(
    slot: &mut WorkingCopySlot,
    git_repo: &dyn GitRepo,
    settings: &SyncSettings,
    operation: &SyncOperation,
) -> Result<Option<CommitId>, SyncError> {
    let working_copy = ready(slot, git_repo, settings)?;

    working_copy.sync()?;
    working_copy.write_file(&operation.path, &operation.contents)?;
    let commit = working_copy.commit_path(&operation.path, &operation.message)?;
    working_copy.push()?;

    Ok(commit)
}

#[cfg(test)]
mod tests {
    use std::{fs, num::NonZeroU32, path::PathBuf, time::Duration};

    use commitsync_core::{Identity, MemoryGitRepo};
    use tempfile::TempDir;

    use super::*;

    fn settings(dir: &TempDir) -> SyncSettings {
        SyncSettings {
            working_copy_path: dir.path().join("site"),
            clone_depth: NonZeroU32::new(1),
            identity: Identity {
                name: "commitsync-bot".to_string(),
                email: "bot@example.com".to_string(),
            },
            max_attempts: 3,
            retry_backoff: Duration::ZERO,
            lock_wait: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(10),
        }
    }

    fn service(dir: &TempDir) -> (SyncService, MemoryGitRepo) {
        let git_repo = MemoryGitRepo::new();
        let service = SyncService::new(Arc::new(git_repo.clone()), settings(dir));

        (service, git_repo)
    }

    #[tokio::test]
    async fn test_ensure_ready_clones_shallow_once() {
        let dir = TempDir::new().unwrap();
        let (service, git_repo) = service(&dir);

        service.ensure_working_copy_ready().await.unwrap();
        service.ensure_working_copy_ready().await.unwrap();

        let state = git_repo.state();
        assert_eq!(state.clones, vec![NonZeroU32::new(1)]);
        assert_eq!(state.pulls, 2);
    }

    #[tokio::test]
    async fn test_failed_clone_is_reported_and_retried_next_time() {
        let dir = TempDir::new().unwrap();
        let (service, git_repo) = service(&dir);
        git_repo.state().fail_clone = true;

        let err = service
            .replace_tracked_file(Path::new("data/members.ts"), b"[]".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Initialization(_)));

        git_repo.state().fail_clone = false;
        service
            .replace_tracked_file(Path::new("data/members.ts"), b"[]".to_vec())
            .await
            .unwrap();

        assert_eq!(git_repo.state().clones.len(), 1);
    }

    #[tokio::test]
    async fn test_replace_tracked_file_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (service, git_repo) = service(&dir);
        let path = Path::new("data/members.ts");

        let first = service
            .replace_tracked_file(path, b"{\"a\":1}".to_vec())
            .await
            .unwrap();
        let second = service
            .replace_tracked_file(path, b"{\"a\":1}".to_vec())
            .await
            .unwrap();

        assert!(first.changed());
        assert!(!second.changed());

        let contents = fs::read(dir.path().join("site/data/members.ts")).unwrap();
        assert_eq!(contents, b"{\"a\":1}");

        let state = git_repo.state();
        assert_eq!(state.commits.len(), 1);
        assert_eq!(state.commits[0].paths, vec![PathBuf::from("data/members.ts")]);
        assert!(state.commits[0].message.starts_with("Update data/members.ts - "));
        assert_eq!(state.pushes, 2);
    }

    #[tokio::test]
    async fn test_rejects_paths_outside_working_copy() {
        let dir = TempDir::new().unwrap();
        let (service, git_repo) = service(&dir);

        let err = service
            .replace_tracked_file(Path::new("../escape.ts"), b"x".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Validation(_)));
        assert!(git_repo.state().clones.is_empty());
        assert!(!dir.path().join("escape.ts").exists());
    }

    #[tokio::test]
    async fn test_push_rejection_is_retried() {
        let dir = TempDir::new().unwrap();
        let (service, git_repo) = service(&dir);
        {
            let mut state = git_repo.state();
            state.rejected_pushes = 1;
            state.diverged_pulls = 0;
        }

        let report = service
            .replace_tracked_file(Path::new("data/schedules.ts"), b"[]".to_vec())
            .await
            .unwrap();

        assert_eq!(report.attempts, 2);
        let state = git_repo.state();
        assert_eq!(state.pushes, 1);
        assert!(state.commits.iter().all(|commit| commit.pushed));
    }

    #[tokio::test]
    async fn test_transient_pull_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let (service, git_repo) = service(&dir);
        service.ensure_working_copy_ready().await.unwrap();
        git_repo.state().failed_pulls = 2;

        let report = service
            .replace_tracked_file(Path::new("data/members.ts"), b"[1]".to_vec())
            .await
            .unwrap();

        assert_eq!(report.attempts, 3);
        let state = git_repo.state();
        assert_eq!(state.pulls, 4);
        assert_eq!(state.commits.len(), 1);
        assert!(state.commits[0].pushed);
    }

    #[tokio::test]
    async fn test_pull_failure_on_last_attempt_is_reported() {
        let dir = TempDir::new().unwrap();
        let (service, git_repo) = service(&dir);
        service.ensure_working_copy_ready().await.unwrap();
        git_repo.state().failed_pulls = 10;

        let err = service
            .replace_tracked_file(Path::new("data/members.ts"), b"[1]".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Sync(commitsync_core::GitError::Operation {
                op: commitsync_core::GitOp::Pull,
                ..
            })
        ));
        assert_eq!(err.kind(), crate::errors::ErrorKind::Sync);

        let state = git_repo.state();
        assert_eq!(state.pulls, 4);
        assert_eq!(state.failed_pulls, 7);
        assert!(state.commits.is_empty());
        assert!(!dir.path().join("site/data/members.ts").exists());
    }

    #[tokio::test]
    async fn test_persistent_rejection_keeps_local_write() {
        let dir = TempDir::new().unwrap();
        let (service, git_repo) = service(&dir);
        git_repo.state().rejected_pushes = 10;

        let err = service
            .replace_tracked_file(Path::new("data/members.ts"), b"local".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Sync(commitsync_core::GitError::PushRejected { .. })
        ));
        assert_eq!(git_repo.state().rejected_pushes, 7);

        let contents = fs::read(dir.path().join("site/data/members.ts")).unwrap();
        assert_eq!(contents, b"local");
    }

    #[tokio::test]
    async fn test_store_uploaded_asset() {
        let dir = TempDir::new().unwrap();
        let (service, git_repo) = service(&dir);

        let asset = service
            .store_uploaded_asset(
                Path::new("public/images"),
                "Jane/Doe*.png",
                vec![0xff, 0xd8, 0xff],
                ".JPG",
            )
            .await
            .unwrap();

        assert_eq!(asset.filename, "JaneDoe.jpg");
        assert_eq!(asset.url, "/images/JaneDoe.jpg");
        assert_eq!(
            fs::read(dir.path().join("site/public/images/JaneDoe.jpg")).unwrap(),
            vec![0xff, 0xd8, 0xff]
        );

        // last write wins
        service
            .store_uploaded_asset(Path::new("public/images"), "JaneDoe", vec![1, 2], "jpg")
            .await
            .unwrap();
        assert_eq!(
            fs::read(dir.path().join("site/public/images/JaneDoe.jpg")).unwrap(),
            vec![1, 2]
        );

        let state = git_repo.state();
        assert_eq!(state.commits.len(), 2);
        assert!(state.commits[0]
            .message
            .starts_with("Add/Update asset public/images/JaneDoe.jpg - "));
    }

    #[tokio::test]
    async fn test_busy_when_slot_not_released_in_time() {
        let dir = TempDir::new().unwrap();
        let git_repo = MemoryGitRepo::new();
        git_repo.state().push_delay = Duration::from_millis(500);

        let mut settings = settings(&dir);
        settings.lock_wait = Duration::from_millis(20);
        let service = Arc::new(SyncService::new(Arc::new(git_repo.clone()), settings));

        let slow = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                service
                    .replace_tracked_file(Path::new("data/members.ts"), b"slow".to_vec())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;

        let err = service
            .replace_tracked_file(Path::new("data/schedules.ts"), b"fast".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Busy));

        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_operation_timeout() {
        let dir = TempDir::new().unwrap();
        let git_repo = MemoryGitRepo::new();
        git_repo.state().push_delay = Duration::from_millis(300);

        let mut settings = settings(&dir);
        settings.operation_timeout = Duration::from_millis(50);
        let service = SyncService::new(Arc::new(git_repo.clone()), settings);

        let err = service
            .replace_tracked_file(Path::new("data/members.ts"), b"x".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::TimedOut(_)));
        assert!(err.is_transient());
    }
}
