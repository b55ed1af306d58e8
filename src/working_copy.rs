//! The local checkout every write lands in.
//!
//! A `WorkingCopy` is created by opening an existing repository or cloning
//! the remote, then configuring the commit identity. It confines every path
//! to its root and writes files by staging them next to the target and
//! renaming, so a failed write never leaves a half-written tracked file.

use std::{
    ffi::OsString,
    fs,
    path::{Component, Path, PathBuf},
};

use commitsync_core::{ClonedGitRepo, CommitId, GitError, GitRepo, Identity, PullOutcome};

use crate::config::SyncSettings;
use crate::errors::{fs_err, SyncError};

const TMP_SUFFIX: &str = ".commitsync.tmp";

#[derive(Debug)]
pub struct WorkingCopy {
    repo: Box<dyn ClonedGitRepo>,
    identity: Identity,
}

impl WorkingCopy {
    pub fn ready(git_repo: &dyn GitRepo, settings: &SyncSettings) -> Result<Self, GitError> {
        let local_path = &settings.working_copy_path;

        let repo = match git_repo.open(local_path)? {
            Some(repo) => {
                tracing::info!("opened working copy at {}", local_path.display());
                repo
            }
            None => {
                tracing::info!(
                    depth = settings.clone_depth.map(|depth| depth.get()),
                    "cloning remote into {}",
                    local_path.display()
                );
                git_repo.clone_repo(local_path, settings.clone_depth)?
            }
        };

        repo.configure_identity(&settings.identity)?;

        Ok(Self {
            repo,
            identity: settings.identity.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        self.repo.local_path()
    }

    /// Pulls the remote branch. A diverged branch (left behind by an earlier
    /// failed push) is reset to the remote head.
    pub fn sync(&self) -> Result<PullOutcome, GitError> {
        let outcome = self.repo.pull()?;

        if outcome == PullOutcome::Diverged {
            tracing::warn!(
                "working copy at {} diverged from remote, resetting to remote head",
                self.root().display()
            );
            self.repo.reset_to_remote()?;
        }

        Ok(outcome)
    }

    pub fn write_file(&self, relative: &Path, contents: &[u8]) -> Result<(), SyncError> {
        let relative = confine(relative)?;
        let file_path = self.root().join(&relative);

        if let Some(directory) = file_path.parent() {
            fs::create_dir_all(directory).map_err(|err| fs_err(directory, err))?;
        }

        let mut tmp_name = OsString::from(file_path.as_os_str());
        tmp_name.push(TMP_SUFFIX);
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, contents).map_err(|err| fs_err(&tmp_path, err))?;

        if let Err(err) = fs::rename(&tmp_path, &file_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(fs_err(&file_path, err));
        }

        tracing::info!(
            bytes = contents.len(),
            "wrote {}",
            file_path.display()
        );

        Ok(())
    }

    /// Stages exactly `relative` and commits it.
    pub fn commit_path(&self, relative: &Path, message: &str) -> Result<Option<CommitId>, SyncError> {
        let relative = confine(relative)?;

        self.repo.add_path(&relative)?;

        Ok(self.repo.commit(&self.identity, message)?)
    }

    pub fn push(&self) -> Result<(), GitError> {
        self.repo.push()
    }
}

/// Normalizes a caller supplied path and rejects anything that could leave
/// the working copy root.
pub fn confine(relative: &Path) -> Result<PathBuf, SyncError> {
    let mut confined = PathBuf::new();

    for component in relative.components() {
        match component {
            Component::Normal(segment) => confined.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(SyncError::Validation(format!(
                    "path {} escapes the working copy",
                    relative.display()
                )))
            }
        }
    }

    if confined.as_os_str().is_empty() {
        return Err(SyncError::Validation("path is empty".to_string()));
    }

    Ok(confined)
}
