use std::{io, path::PathBuf, result::Result as StdResult, time::Duration};

use thiserror::Error;

use crate::output::OutputError;

/// Custom Result type for multidev operations.
pub type Result<T> = StdResult<T, MultidevError>;

/// Errors raised while provisioning a multidev environment.
#[derive(Error, Debug)]
pub enum MultidevError {
    /// The source argument was not of the form `site.env`.
    #[error("Invalid source reference '{0}': expected <site>.<env>")]
    InvalidSourceReference(String),

    /// The environment name derived from a branch is not usable on the platform.
    #[error("Invalid environment name '{name}': {message}")]
    InvalidEnvironmentName {
        /// The offending derived name.
        name: String,
        /// Human-readable error description.
        message: String,
    },

    /// Truncating the branch name produced a name other branches may share.
    #[error(
        "Branch '{branch}' truncates to '{name}', which other branches sharing that prefix would also use"
    )]
    NameCollision {
        /// Original branch name.
        branch: String,
        /// Truncated environment name.
        name: String,
    },

    /// The external git remote URL is unusable.
    #[error("Invalid remote URL '{0}'")]
    InvalidRemoteUrl(String),

    /// The source site or environment could not be found on the platform.
    #[error("Could not find environment '{env}' on site '{site}'")]
    LookupFailed {
        /// Site name that was looked up.
        site: String,
        /// Environment name that was looked up.
        env: String,
    },

    /// The scratch build directory could not be created.
    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreateFailed {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// Another invocation holds the scratch workspace for this branch.
    #[error("Scratch workspace {} is in use by another invocation", path.display())]
    WorkspaceBusy {
        /// Lock file guarding the workspace.
        path: PathBuf,
    },

    /// Deleting a stale environment failed.
    #[error("Failed to delete environment '{name}': {message}")]
    EnvironmentDeleteFailed {
        /// Environment being deleted.
        name: String,
        /// Message reported by the platform.
        message: String,
    },

    /// Creating the target environment failed.
    #[error("Failed to create environment '{name}': {message}")]
    EnvironmentCreateFailed {
        /// Environment being created.
        name: String,
        /// Message reported by the platform.
        message: String,
    },

    /// The platform did not supply a clone command for the environment.
    #[error("No git connection info available for environment '{name}'")]
    GitInfoUnavailable {
        /// Environment whose connection info was requested.
        name: String,
    },

    /// A connection mode outside `{git, sftp}` was requested.
    #[error("Invalid connection mode '{0}': expected 'git' or 'sftp'")]
    InvalidConnectionMode(String),

    /// Switching the connection mode of the environment failed.
    #[error("Failed to switch environment '{name}' to {mode} mode: {message}")]
    ModeChangeFailed {
        /// Environment being switched.
        name: String,
        /// Requested mode.
        mode: String,
        /// Message reported by the platform.
        message: String,
    },

    /// A git command failed.
    #[error("Git command failed: {command}\nError: {message}")]
    GitCommandFailed {
        /// The command line that was run.
        command: String,
        /// Output captured from the failing command.
        message: String,
    },

    /// A remote job did not finish before its deadline.
    #[error("Timed out after {}s waiting for {operation}", waited.as_secs())]
    Timeout {
        /// Description of the operation being waited on.
        operation: String,
        /// How long the job was polled.
        waited: Duration,
    },

    /// Removing the scratch workspace failed. Logged, never fatal.
    #[error("Failed to remove {}: {message}", path.display())]
    CleanupFailed {
        /// Directory that could not be removed.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// The platform client failed outside of a job (spawn, parse).
    #[error("Platform error: {0}")]
    Platform(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// Writing to the output handler failed.
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// An underlying I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl MultidevError {
    /// Return the recommended process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidSourceReference(_)
            | Self::InvalidEnvironmentName { .. }
            | Self::NameCollision { .. }
            | Self::InvalidRemoteUrl(_)
            | Self::InvalidConnectionMode(_)
            | Self::LookupFailed { .. }
            | Self::Config(_) => 2,
            Self::EnvironmentDeleteFailed { .. }
            | Self::EnvironmentCreateFailed { .. }
            | Self::ModeChangeFailed { .. }
            | Self::GitInfoUnavailable { .. } => 3,
            Self::GitCommandFailed { .. } => 4,
            Self::Timeout { .. } => 5,
            _ => 1,
        }
    }
}
