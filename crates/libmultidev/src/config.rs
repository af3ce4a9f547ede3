use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    error::{MultidevError, Result},
    job::PollPolicy,
    provisioner::{ProvisionOptions, TruncationPolicy},
    types::PreviewUrl,
};

/// Settings read from the TOML config file. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Command used to invoke Terminus, e.g. `["lando", "terminus"]`.
    pub terminus: Vec<String>,
    /// Git executable.
    pub git: String,
    /// Parent directory for build directories; system temp dir when unset.
    pub scratch_root: Option<PathBuf>,
    /// Maximum environment name length.
    pub name_limit: usize,
    /// Delete the version-control branch along with a stale environment.
    pub delete_branch: bool,
    /// What to do when a branch name had to be truncated.
    pub truncation: TruncationPolicy,
    /// External remote used when none is given on the command line.
    pub remote: Option<String>,
    /// Job polling settings.
    pub poll: PollConfig,
    /// Preview URL convention.
    pub preview: PreviewConfig,
}

/// `[poll]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// First delay between status checks, in milliseconds.
    pub interval_ms: u64,
    /// Largest delay between status checks, in milliseconds.
    pub max_interval_ms: u64,
    /// Give up on a job after this many seconds.
    pub timeout_secs: u64,
}

/// `[preview]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreviewConfig {
    /// URL scheme.
    pub scheme: String,
    /// Platform domain.
    pub domain: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            terminus: vec!["terminus".to_string()],
            git: "git".to_string(),
            scratch_root: None,
            name_limit: 11,
            delete_branch: true,
            truncation: TruncationPolicy::Warn,
            remote: None,
            poll: PollConfig::default(),
            preview: PreviewConfig::default(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            max_interval_ms: 5000,
            timeout_secs: 300,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        let preview = PreviewUrl::default();
        Self {
            scheme: preview.scheme,
            domain: preview.domain,
        }
    }
}

impl Config {
    /// Load config from `path`.
    ///
    /// When `required` is false a missing file yields the defaults; otherwise
    /// it is an error.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() {
            if required {
                return Err(MultidevError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            MultidevError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&contents)
            .map_err(|e| MultidevError::Config(format!("{}: {e}", path.display())))
    }

    /// Parse and validate TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| MultidevError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the provisioner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.terminus.is_empty() || self.terminus[0].trim().is_empty() {
            return Err(MultidevError::Config("terminus command is empty".into()));
        }
        if self.git.trim().is_empty() {
            return Err(MultidevError::Config("git executable is empty".into()));
        }
        if self.name_limit == 0 {
            return Err(MultidevError::Config("name_limit must be at least 1".into()));
        }
        if self.poll.interval_ms == 0 {
            return Err(MultidevError::Config("poll.interval_ms must be at least 1".into()));
        }
        if self.poll.max_interval_ms < self.poll.interval_ms {
            return Err(MultidevError::Config(
                "poll.max_interval_ms must not be below poll.interval_ms".into(),
            ));
        }
        if self.poll.timeout_secs == 0 {
            return Err(MultidevError::Config("poll.timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Translate the config into provisioner options.
    pub fn provision_options(&self) -> ProvisionOptions {
        ProvisionOptions {
            scratch_root: self.scratch_root.clone().unwrap_or_else(env::temp_dir),
            name_limit: self.name_limit,
            delete_branch: self.delete_branch,
            truncation: self.truncation,
            poll: PollPolicy {
                interval: Duration::from_millis(self.poll.interval_ms),
                max_interval: Duration::from_millis(self.poll.max_interval_ms),
                timeout: Duration::from_secs(self.poll.timeout_secs),
            },
            preview: PreviewUrl {
                scheme: self.preview.scheme.clone(),
                domain: self.preview.domain.clone(),
            },
        }
    }
}
