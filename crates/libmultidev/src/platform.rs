//! Interfaces the provisioner needs from the hosting platform.
//!
//! The platform client caches environment listings; nothing here refreshes
//! implicitly. Callers must invoke [`EnvironmentDirectory::refresh`] after any
//! mutation before trusting a listing again.

use crate::{
    error::Result,
    types::{ConnectionMode, MultidevName, SourceReference},
};

/// `git clone` options whose value is the following token.
const CLONE_VALUE_FLAGS: &[&str] = &[
    "-b",
    "--branch",
    "-o",
    "--origin",
    "--depth",
    "-c",
    "--config",
    "-u",
    "--upload-pack",
    "--reference",
    "-j",
    "--jobs",
];

/// A site on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    /// Platform identifier (UUID on Pantheon).
    pub id: String,
    /// Machine name used in `site.env` references.
    pub name: String,
}

/// An environment belonging to a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    /// Name of the owning site.
    pub site: String,
    /// Environment name.
    pub name: String,
    /// Current connection mode, when the listing reports one.
    pub connection_mode: Option<ConnectionMode>,
}

impl Environment {
    /// The `site.env` reference for this environment.
    pub fn reference(&self) -> String {
        format!("{}.{}", self.site, self.name)
    }
}

/// Options for deleting an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Also delete the environment's version-control branch.
    pub delete_branch: bool,
}

/// Clone credentials the platform issues for an environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GitConnectionInfo {
    /// Ready-to-run clone command, e.g. `git clone ssh://... site`.
    pub clone_command: Option<String>,
    /// Bare repository URL, when reported separately.
    pub url: Option<String>,
}

impl GitConnectionInfo {
    /// Resolve the repository URL to clone from.
    ///
    /// The explicit URL wins; otherwise the URL is extracted from a
    /// `git clone [--flags] <url> [dir]` command without involving a shell.
    pub fn clone_url(&self) -> Option<String> {
        if let Some(url) = self.url.as_deref().map(str::trim)
            && !url.is_empty()
        {
            return Some(url.to_string());
        }

        let command = self.clone_command.as_deref()?;
        let mut tokens = command.split_whitespace();
        if tokens.next() != Some("git") || tokens.next() != Some("clone") {
            return None;
        }
        while let Some(token) = tokens.next() {
            if CLONE_VALUE_FLAGS.contains(&token) {
                tokens.next();
            } else if !token.starts_with('-') {
                return Some(token.to_string());
            }
        }
        None
    }
}

/// An asynchronous server-side operation that must be polled to completion.
pub trait Job {
    /// Check progress once without blocking. Returns `true` once finished.
    fn poll(&mut self) -> Result<bool>;
    /// Whether the finished job succeeded.
    fn is_successful(&self) -> bool;
    /// The job's final status message.
    fn message(&self) -> String;
}

/// Outcome of a connection mode change.
pub enum ModeChangeResult {
    /// The platform acknowledged synchronously with a message.
    Immediate(String),
    /// The change runs as a job that must be waited on.
    Async(Box<dyn Job>),
}

/// Lookup side of the platform: sites and their environment listings.
pub trait EnvironmentDirectory {
    /// Resolve a source reference, returning `None` when either half is unknown.
    fn resolve(&mut self, source: &SourceReference) -> Result<Option<(Site, Environment)>>;
    /// Find an environment by name in the (possibly cached) listing.
    fn environment(&mut self, site: &Site, name: &str) -> Result<Option<Environment>>;
    /// Drop cached state for `site` and fetch it again.
    fn refresh(&mut self, site: &Site) -> Result<Site>;
}

/// Mutating side of the platform.
pub trait EnvironmentLifecycle {
    /// Start deleting `env`.
    fn delete_environment(&mut self, env: &Environment, options: DeleteOptions)
    -> Result<Box<dyn Job>>;
    /// Start creating `name` on `site`, cloned from `from`.
    fn create_environment(
        &mut self,
        site: &Site,
        name: &MultidevName,
        from: &Environment,
    ) -> Result<Box<dyn Job>>;
    /// Switch `env` to `mode`.
    fn set_connection_mode(
        &mut self,
        env: &Environment,
        mode: ConnectionMode,
    ) -> Result<ModeChangeResult>;
    /// Fetch clone credentials for `env`.
    fn connection_info(&mut self, env: &Environment) -> Result<GitConnectionInfo>;
}

/// Everything the provisioner drives.
pub trait Platform: EnvironmentDirectory + EnvironmentLifecycle {}

impl<T: EnvironmentDirectory + EnvironmentLifecycle + ?Sized> Platform for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_url_prefers_explicit_url() {
        let info = GitConnectionInfo {
            clone_command: Some("git clone ssh://other/repo.git site".into()),
            url: Some("ssh://codeserver/~/repository.git".into()),
        };
        assert_eq!(
            info.clone_url().as_deref(),
            Some("ssh://codeserver/~/repository.git")
        );
    }

    #[test]
    fn clone_url_parses_command() {
        let info = GitConnectionInfo {
            clone_command: Some(
                "git clone --quiet ssh://codeserver.dev.1234@codeserver.dev.1234.drush.in:2222/~/repository.git myapp"
                    .into(),
            ),
            url: None,
        };
        assert_eq!(
            info.clone_url().as_deref(),
            Some("ssh://codeserver.dev.1234@codeserver.dev.1234.drush.in:2222/~/repository.git")
        );
    }

    #[test]
    fn clone_url_skips_option_values() {
        for command in [
            "git clone -b master ssh://codeserver/~/repository.git myapp",
            "git clone --depth 1 --origin platform ssh://codeserver/~/repository.git",
            "git clone --branch=master -q ssh://codeserver/~/repository.git myapp",
        ] {
            let info = GitConnectionInfo {
                clone_command: Some(command.into()),
                url: None,
            };
            assert_eq!(
                info.clone_url().as_deref(),
                Some("ssh://codeserver/~/repository.git"),
                "{command:?}"
            );
        }
    }

    #[test]
    fn clone_url_rejects_non_clone_commands() {
        for command in ["", "rm -rf /", "git fetch origin", "git clone"] {
            let info = GitConnectionInfo {
                clone_command: Some(command.into()),
                url: None,
            };
            assert_eq!(info.clone_url(), None, "{command:?}");
        }
        assert_eq!(GitConnectionInfo::default().clone_url(), None);
    }

    #[test]
    fn environment_reference() {
        let env = Environment {
            site: "myapp".into(),
            name: "feature-log".into(),
            connection_mode: None,
        };
        assert_eq!(env.reference(), "myapp.feature-log");
    }
}
