use std::{fmt, str::FromStr};

use crate::error::{MultidevError, Result};

/// Environment names the platform reserves and will not accept for a multidev.
const RESERVED_NAMES: &[&str] = &[
    "dev", "test", "live", "master", "settings", "team", "support", "multidev", "debug", "files",
    "tags", "bot",
];

/// Canonical suffix for git repository URLs.
const GIT_SUFFIX: &str = ".git";

/// A `site.env` pair naming the environment to branch from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReference {
    /// Platform site name.
    pub site: String,
    /// Environment within the site.
    pub env: String,
}

impl SourceReference {
    /// Parse a `site.env` identifier. Both halves must be non-empty.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || MultidevError::InvalidSourceReference(input.to_string());
        let (site, env) = input.trim().split_once('.').ok_or_else(invalid)?;
        if site.is_empty() || env.is_empty() || env.contains('.') {
            return Err(invalid());
        }
        Ok(Self {
            site: site.to_string(),
            env: env.to_string(),
        })
    }
}

impl fmt::Display for SourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.site, self.env)
    }
}

/// The platform environment name derived from a branch name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultidevName {
    /// The derived, platform-valid name.
    name: String,
    /// Whether characters were dropped to fit the length limit.
    truncated: bool,
    /// Whether characters outside `[a-z0-9-]` were replaced or trailing
    /// hyphens dropped.
    sanitized: bool,
}

impl MultidevName {
    /// Derive an environment name: lower-case, map invalid characters to `-`,
    /// keep the first `limit` characters, then drop trailing hyphens.
    pub fn derive(branch: &str, limit: usize) -> Result<Self> {
        let lowered = branch.trim().to_lowercase();
        let cleaned: String = lowered
            .chars()
            .map(|c| {
                if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let truncated = cleaned.chars().count() > limit;
        let kept: String = cleaned.chars().take(limit).collect();
        // A trailing hyphen would run into the site name in the preview URL.
        let name = kept.trim_end_matches('-').to_string();

        validate_name(&name)?;

        Ok(Self {
            sanitized: cleaned != lowered || name != kept,
            name,
            truncated,
        })
    }

    /// The derived name.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Whether the branch name was longer than the limit.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// Whether invalid characters were replaced or trailing hyphens dropped.
    pub fn was_sanitized(&self) -> bool {
        self.sanitized
    }
}

impl fmt::Display for MultidevName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Check that a derived name is something the platform accepts.
fn validate_name(name: &str) -> Result<()> {
    let invalid = |message: &str| MultidevError::InvalidEnvironmentName {
        name: name.to_string(),
        message: message.to_string(),
    };

    match name.chars().next() {
        None => return Err(invalid("name is empty")),
        Some(first) if !first.is_ascii_alphanumeric() => {
            return Err(invalid("names must start with a letter or digit"));
        }
        Some(_) => {}
    }

    if RESERVED_NAMES.contains(&name) {
        return Err(invalid("name is reserved by the platform"));
    }

    Ok(())
}

/// External repository and branch merged into the new environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteGitSource {
    /// Normalized repository URL.
    pub url: String,
    /// Branch to pull from `url`.
    pub branch: String,
}

impl RemoteGitSource {
    /// Build a remote source, normalizing `url` to end in `.git`.
    pub fn new(url: &str, branch: &str) -> Result<Self> {
        Ok(Self {
            url: normalize_git_url(url)?,
            branch: branch.trim().to_string(),
        })
    }
}

/// Append the `.git` suffix unless it is already present (case-insensitive).
pub fn normalize_git_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(MultidevError::InvalidRemoteUrl(url.to_string()));
    }

    let has_suffix = trimmed.len() >= GIT_SUFFIX.len()
        && trimmed
            .get(trimmed.len() - GIT_SUFFIX.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(GIT_SUFFIX));

    if has_suffix {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}{GIT_SUFFIX}"))
    }
}

/// How code reaches an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Version-control managed; pushes are accepted.
    Git,
    /// Direct file editing.
    Sftp,
}

impl ConnectionMode {
    /// The platform's spelling of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Sftp => "sftp",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = MultidevError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "git" => Ok(Self::Git),
            "sftp" => Ok(Self::Sftp),
            _ => Err(MultidevError::InvalidConnectionMode(s.to_string())),
        }
    }
}

/// Scheme and domain used to compose environment preview URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewUrl {
    /// URL scheme, e.g. `http`.
    pub scheme: String,
    /// Platform domain appended after `<env>-<site>.`.
    pub domain: String,
}

impl PreviewUrl {
    /// Compose `<scheme>://<env>-<site>.<domain>`.
    pub fn for_environment(&self, env: &MultidevName, site: &str) -> String {
        format!("{}://{}-{}.{}", self.scheme, env, site, self.domain)
    }
}

impl Default for PreviewUrl {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            domain: "pantheon.io".to_string(),
        }
    }
}
