#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Core library for provisioning Pantheon multidev environments from a git
//! branch.
//!
//! The [`Provisioner`] drives a single run: it derives a platform-valid
//! environment name from the branch, replaces any stale environment with
//! that name, creates a fresh one from the source environment, merges the
//! external branch into it and pushes the result. The platform is reached
//! through the [`Platform`] traits; [`Terminus`] is the concrete client. The
//! CLI binary in `crates/multidev-branch` builds on top of this library.

/// Settings file handling.
mod config;
/// Error type shared by the whole crate.
mod error;
/// Local git invocations.
mod git;
/// Polling of asynchronous platform jobs.
mod job;
/// Output channel abstractions and implementations.
mod output;
/// Collaborator interfaces for the hosting platform.
mod platform;
/// The provisioning pipeline.
mod provisioner;
/// Terminus-backed platform client.
mod terminus;
/// Validated domain values.
mod types;
/// Per-branch scratch directories.
mod workspace;

pub use config::{Config, PollConfig, PreviewConfig};
pub use error::{MultidevError, Result};
pub use git::{Git, PushOutcome};
pub use job::{JobOutcome, PollPolicy, wait};
/// Re-exports for output abstraction and concrete implementations.
pub use output::{Output, OutputError, Quiet, Spinner, Terminal};
pub use platform::{
    DeleteOptions, Environment, EnvironmentDirectory, EnvironmentLifecycle, GitConnectionInfo,
    Job, ModeChangeResult, Platform, Site,
};
pub use provisioner::{
    ProvisionOptions, ProvisionReport, ProvisionRequest, Provisioner, Stage, TruncationPolicy,
};
pub use terminus::{Terminus, TerminusJob};
pub use types::{
    ConnectionMode, MultidevName, PreviewUrl, RemoteGitSource, SourceReference, normalize_git_url,
};
pub use workspace::ScratchWorkspace;
