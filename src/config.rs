use std::{
    net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration,
};

use anyhow::Context;
use commitsync_core::{git::RemoteOptions, Identity};

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
const DEFAULT_BRANCH: &str = "main";
const DEFAULT_WORKING_COPY_PATH: &str = "./repo";
const DEFAULT_CLONE_DEPTH: u32 = 1;
const DEFAULT_GIT_USER_NAME: &str = "commitsync-bot";
const DEFAULT_GIT_USER_EMAIL: &str = "commitsync-bot@users.noreply.github.com";
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_LOCK_WAIT_SECS: u64 = 30;
const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 120;
const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub working_copy_path: PathBuf,
    pub clone_depth: Option<NonZeroU32>,
    pub identity: Identity,

    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub lock_wait: Duration,
    pub operation_timeout: Duration,
}

/// Where each endpoint writes inside the working copy.
#[derive(Clone, Debug)]
pub struct Targets {
    pub members_ts: PathBuf,
    pub schedules_ts: PathBuf,
    pub members_json: PathBuf,

    pub images_dir: PathBuf,
    pub profile_images_dir: PathBuf,
    pub member_images_dir: PathBuf,

    pub max_upload_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub bind_address: String,
    pub port: u16,

    pub repo_url: String,
    pub branch: String,
    pub deploy_key_path: Option<PathBuf>,
    pub verify_host_key: bool,
    pub network_timeout: Duration,

    pub sync: SyncSettings,
    pub targets: Targets,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let path = |key: &str, default: &str| PathBuf::from(text(key, default));

        let repo_url = lookup("REPO_URL").context("REPO_URL must be set")?;

        let clone_depth = parse_or(&lookup, "CLONE_DEPTH", DEFAULT_CLONE_DEPTH)?;
        let max_attempts = parse_or(&lookup, "SYNC_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;

        let sync = SyncSettings {
            working_copy_path: path("WORKING_COPY_PATH", DEFAULT_WORKING_COPY_PATH),
            // 0 means full history
            clone_depth: NonZeroU32::new(clone_depth),
            identity: Identity {
                name: text("GIT_USER_NAME", DEFAULT_GIT_USER_NAME),
                email: text("GIT_USER_EMAIL", DEFAULT_GIT_USER_EMAIL),
            },
            max_attempts: max_attempts.max(1),
            retry_backoff: Duration::from_millis(parse_or(
                &lookup,
                "SYNC_RETRY_BACKOFF_MS",
                DEFAULT_RETRY_BACKOFF_MS,
            )?),
            lock_wait: Duration::from_secs(parse_or(
                &lookup,
                "SYNC_LOCK_WAIT_SECS",
                DEFAULT_LOCK_WAIT_SECS,
            )?),
            operation_timeout: Duration::from_secs(parse_or(
                &lookup,
                "SYNC_TIMEOUT_SECS",
                DEFAULT_SYNC_TIMEOUT_SECS,
            )?),
        };

        let targets = Targets {
            members_ts: path("MEMBERS_TS_PATH", "data/members.ts"),
            schedules_ts: path("SCHEDULES_TS_PATH", "data/schedules.ts"),
            members_json: path("MEMBERS_JSON_PATH", "data/members.json"),
            images_dir: path("IMAGES_DIR", "public/images"),
            profile_images_dir: path("PROFILE_IMAGES_DIR", "public/images"),
            member_images_dir: path("MEMBER_IMAGES_DIR", "public/images/members"),
            max_upload_bytes: parse_or(&lookup, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        };

        Ok(Self {
            bind_address: text("BIND_ADDRESS", DEFAULT_BIND_ADDRESS),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            repo_url,
            branch: text("REPO_BRANCH", DEFAULT_BRANCH),
            deploy_key_path: lookup("DEPLOY_KEY_PATH")
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
            verify_host_key: parse_flag(&lookup, "SSH_HOST_KEY_CHECK", true)?,
            network_timeout: Duration::from_secs(parse_or(
                &lookup,
                "NETWORK_TIMEOUT_SECS",
                DEFAULT_NETWORK_TIMEOUT_SECS,
            )?),
            sync,
            targets,
        })
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let endpoint = format!("{}:{}", self.bind_address, self.port);

        endpoint
            .parse()
            .with_context(|| format!("invalid listen address {endpoint}"))
    }

    pub fn remote_options(&self) -> RemoteOptions {
        RemoteOptions {
            deploy_key_path: self.deploy_key_path.clone(),
            verify_host_key: self.verify_host_key,
            network_timeout: self.network_timeout,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} has invalid value {value:?}")),
        None => Ok(default),
    }
}

fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> anyhow::Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    let value = match lookup(key) {
        Some(value) => value,
        None => return Ok(default),
    };

    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow::anyhow!("{key} has invalid value {value:?}")),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::HashMap, path::Path};

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> anyhow::Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[("REPO_URL", "git@github.com:example/site.git")]).unwrap();

        assert_eq!(settings.port, 4000);
        assert_eq!(settings.branch, "main");
        assert!(settings.verify_host_key);
        assert!(settings.deploy_key_path.is_none());
        assert_eq!(settings.sync.clone_depth, NonZeroU32::new(1));
        assert_eq!(settings.sync.max_attempts, 3);
        assert_eq!(settings.targets.members_ts, PathBuf::from("data/members.ts"));
        assert_eq!(
            settings.listen_addr().unwrap(),
            "0.0.0.0:4000".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            ("REPO_URL", "git@github.com:example/site.git"),
            ("PORT", "8080"),
            ("CLONE_DEPTH", "0"),
            ("SSH_HOST_KEY_CHECK", "false"),
            ("DEPLOY_KEY_PATH", "/etc/secrets/deploy-key"),
            ("SYNC_MAX_ATTEMPTS", "0"),
        ])
        .unwrap();

        assert_eq!(settings.port, 8080);
        assert_eq!(settings.sync.clone_depth, None);
        assert!(!settings.verify_host_key);
        assert_eq!(settings.sync.max_attempts, 1);

        let options = settings.remote_options();
        assert_eq!(
            options.deploy_key_path,
            Some(PathBuf::from("/etc/secrets/deploy-key"))
        );
        assert!(!options.verify_host_key);
    }

    #[test]
    fn test_invalid_values() {
        assert!(settings(&[]).is_err());
        assert!(settings(&[("REPO_URL", "x"), ("PORT", "eighty")]).is_err());
        assert!(settings(&[("REPO_URL", "x"), ("SSH_HOST_KEY_CHECK", "maybe")]).is_err());
    }

    #[test]
    fn test_env_example_lists_every_variable() {
        let example = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env.example");
        let vars: HashMap<String, String> = dotenvy::from_path_iter(&example)
            .unwrap()
            .map(|item| item.unwrap())
            .collect();

        let requested = RefCell::new(Vec::new());
        let settings = Settings::from_lookup(|key| {
            requested.borrow_mut().push(key.to_string());
            vars.get(key).cloned()
        })
        .unwrap();

        let missing: Vec<String> = requested
            .into_inner()
            .into_iter()
            .filter(|key| !vars.contains_key(key))
            .collect();
        assert!(missing.is_empty(), "missing from .env.example: {missing:?}");

        assert_eq!(settings.targets.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.sync.retry_backoff, Duration::from_millis(1000));
    }
}
