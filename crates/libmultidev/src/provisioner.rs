use std::{env, fmt, path::PathBuf};

use serde::Deserialize;

use crate::{
    error::{MultidevError, Result},
    git::{Git, PushOutcome},
    job::{self, JobOutcome, PollPolicy},
    output::Output,
    platform::{DeleteOptions, Environment, Job, ModeChangeResult, Platform, Site},
    types::{ConnectionMode, MultidevName, PreviewUrl, RemoteGitSource, SourceReference},
    workspace::ScratchWorkspace,
};

/// Policy for branch names that had to be truncated to fit the platform limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TruncationPolicy {
    /// Proceed, but warn that other branches may share the environment.
    Warn,
    /// Refuse to proceed.
    Reject,
}

/// Tunables for a provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Parent directory for build directories.
    pub scratch_root: PathBuf,
    /// Maximum environment name length.
    pub name_limit: usize,
    /// Delete the version-control branch along with a stale environment.
    pub delete_branch: bool,
    /// Handling of truncated branch names.
    pub truncation: TruncationPolicy,
    /// Job polling settings.
    pub poll: PollPolicy,
    /// Preview URL convention.
    pub preview: PreviewUrl,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            scratch_root: env::temp_dir(),
            name_limit: 11,
            delete_branch: true,
            truncation: TruncationPolicy::Warn,
            poll: PollPolicy::default(),
            preview: PreviewUrl::default(),
        }
    }
}

/// Inputs to a single provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Source environment as `site.env`.
    pub source: String,
    /// External branch to merge.
    pub branch: String,
    /// External repository URL; git stages are skipped when absent.
    pub remote_url: Option<String>,
}

/// Pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Parsing inputs and resolving the source environment.
    Validating,
    /// Locking and clearing the scratch workspace.
    PreparingWorkspace,
    /// Deleting a leftover environment with the target name.
    ReconcilingStaleEnvironment,
    /// Creating the target environment.
    CreatingEnvironment,
    /// Fetching clone credentials.
    ResolvingGitInfo,
    /// Cloning the environment repository.
    Cloning,
    /// Pulling the external branch.
    Merging,
    /// Switching the environment to git mode.
    SwitchingMode,
    /// Pushing the merged branch.
    Pushing,
    /// Removing the scratch workspace.
    CleaningUp,
    /// Finished successfully.
    Done,
    /// Aborted on error.
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Validating => "validating inputs",
            Self::PreparingWorkspace => "preparing workspace",
            Self::ReconcilingStaleEnvironment => "checking for a stale environment",
            Self::CreatingEnvironment => "creating environment",
            Self::ResolvingGitInfo => "resolving git connection info",
            Self::Cloning => "cloning",
            Self::Merging => "merging external branch",
            Self::SwitchingMode => "switching to git mode",
            Self::Pushing => "pushing",
            Self::CleaningUp => "cleaning up",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    /// The environment that now exists.
    pub environment: MultidevName,
    /// Site the environment belongs to.
    pub site: String,
    /// Where the environment can be viewed.
    pub preview_url: String,
    /// Whether a stale environment was deleted first.
    pub replaced_existing: bool,
    /// Push result, or `None` when no external remote was given.
    pub push: Option<PushOutcome>,
}

/// Validated inputs.
struct Plan {
    /// Resolved site.
    site: Site,
    /// Environment the new one is cloned from.
    source_env: Environment,
    /// Name of the environment to create.
    target: MultidevName,
    /// External branch to merge, if any.
    remote: Option<RemoteGitSource>,
}

/// What the remote-facing part of the pipeline did.
struct Deployment {
    /// Whether a stale environment was deleted.
    replaced_existing: bool,
    /// Push result, when the git stages ran.
    push: Option<PushOutcome>,
}

/// Drives one environment through delete, create, clone, merge and push.
pub struct Provisioner<'a, P: Platform + ?Sized> {
    /// Platform client.
    platform: &'a mut P,
    /// Local git runner.
    git: Git,
    /// Progress sink.
    output: &'a dyn Output,
    /// Run settings.
    options: ProvisionOptions,
    /// Stages entered during the most recent run.
    history: Vec<Stage>,
}

impl<'a, P: Platform + ?Sized> Provisioner<'a, P> {
    /// Create a provisioner over `platform`.
    pub fn new(
        platform: &'a mut P,
        git: Git,
        output: &'a dyn Output,
        options: ProvisionOptions,
    ) -> Self {
        Self {
            platform,
            git,
            output,
            options,
            history: Vec::new(),
        }
    }

    /// Stages entered by the most recent [`Provisioner::provision`] call.
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Create the multidev environment for `request.branch` and return its
    /// preview URL.
    ///
    /// Once the workspace exists it is always cleaned up, including after a
    /// failure; the earlier error is the one returned.
    pub fn provision(&mut self, request: &ProvisionRequest) -> Result<ProvisionReport> {
        self.history.clear();
        let result = self.run_pipeline(request);
        self.history.push(match result {
            Ok(_) => Stage::Done,
            Err(_) => Stage::Failed,
        });
        result
    }

    /// Record `stage` and open an output section for it.
    fn enter(&mut self, stage: Stage) -> Box<dyn Output> {
        self.history.push(stage);
        self.output.section(&stage.to_string())
    }

    /// Poll `job` to completion under the configured policy.
    fn wait_for(&self, job: &mut dyn Job, operation: &str, out: &dyn Output) -> Result<JobOutcome> {
        job::wait(job, &self.options.poll, operation, out)
    }

    /// Full sequence from validation to cleanup.
    fn run_pipeline(&mut self, request: &ProvisionRequest) -> Result<ProvisionReport> {
        let out = self.enter(Stage::Validating);
        let plan = self.validate(request, out.as_ref())?;

        let out = self.enter(Stage::PreparingWorkspace);
        let workspace = ScratchWorkspace::prepare(
            &self.options.scratch_root,
            &request.branch,
            &plan.site.name,
        )?;
        let deployed = out
            .message(&format!(
                "build directory {}",
                workspace.build_dir().display()
            ))
            .map_err(MultidevError::from)
            .and_then(|()| self.deploy(&plan, &workspace));

        let out = self.enter(Stage::CleaningUp);
        let logged = match workspace.cleanup() {
            Ok(true) => out.message("removed build directory"),
            Ok(false) => Ok(()),
            Err(err) => out.warn(&err.to_string()),
        };
        drop(workspace);

        let deployed = deployed?;
        logged?;

        let preview_url = self
            .options
            .preview
            .for_environment(&plan.target, &plan.site.name);
        Ok(ProvisionReport {
            environment: plan.target,
            site: plan.site.name,
            preview_url,
            replaced_existing: deployed.replaced_existing,
            push: deployed.push,
        })
    }

    /// Parse inputs, apply the naming policy, and resolve the source.
    fn validate(&mut self, request: &ProvisionRequest, out: &dyn Output) -> Result<Plan> {
        let source = SourceReference::parse(&request.source)?;
        let target = MultidevName::derive(&request.branch, self.options.name_limit)?;

        if target.was_sanitized() {
            out.warn(&format!(
                "branch '{}' contains characters environments cannot use; using '{target}'",
                request.branch
            ))?;
        }
        if target.was_truncated() {
            match self.options.truncation {
                TruncationPolicy::Reject => {
                    return Err(MultidevError::NameCollision {
                        branch: request.branch.clone(),
                        name: target.to_string(),
                    });
                }
                TruncationPolicy::Warn => out.warn(&format!(
                    "branch '{}' truncated to '{target}'; any branch starting with '{target}' maps to the same environment",
                    request.branch
                ))?,
            }
        }

        let remote = request
            .remote_url
            .as_deref()
            .map(|url| RemoteGitSource::new(url, &request.branch))
            .transpose()?;

        let (site, source_env) =
            self.platform
                .resolve(&source)?
                .ok_or_else(|| MultidevError::LookupFailed {
                    site: source.site.clone(),
                    env: source.env.clone(),
                })?;

        if source_env.name == target.as_str() {
            return Err(MultidevError::InvalidEnvironmentName {
                name: target.to_string(),
                message: format!(
                    "branch '{}' maps to the source environment {source}, which would be deleted",
                    request.branch
                ),
            });
        }

        out.message(&format!("{source} -> {}.{target}", site.name))?;
        Ok(Plan {
            site,
            source_env,
            target,
            remote,
        })
    }

    /// Reconcile, create, then run the git stages when a remote is given.
    fn deploy(&mut self, plan: &Plan, workspace: &ScratchWorkspace) -> Result<Deployment> {
        let name = plan.target.as_str();

        let out = self.enter(Stage::ReconcilingStaleEnvironment);
        let mut site = plan.site.clone();
        let replaced_existing = match self.platform.environment(&site, name)? {
            Some(stale) => {
                out.warn(&format!("{} already exists, deleting it", stale.reference()))?;
                let options = DeleteOptions {
                    delete_branch: self.options.delete_branch,
                };
                let mut job = self.platform.delete_environment(&stale, options)?;
                let outcome = self.wait_for(
                    job.as_mut(),
                    &format!("deleting {}", stale.reference()),
                    out.as_ref(),
                )?;
                if !outcome.successful {
                    return Err(MultidevError::EnvironmentDeleteFailed {
                        name: name.to_string(),
                        message: outcome.message,
                    });
                }
                show(out.as_ref(), &outcome.message)?;
                site = self.platform.refresh(&site)?;
                true
            }
            None => false,
        };

        let out = self.enter(Stage::CreatingEnvironment);
        let mut job = self
            .platform
            .create_environment(&site, &plan.target, &plan.source_env)?;
        let outcome = self.wait_for(
            job.as_mut(),
            &format!("creating {}.{name}", site.name),
            out.as_ref(),
        )?;
        if !outcome.successful {
            return Err(MultidevError::EnvironmentCreateFailed {
                name: name.to_string(),
                message: outcome.message,
            });
        }
        show(out.as_ref(), &outcome.message)?;
        site = self.platform.refresh(&site)?;
        let target = self.platform.environment(&site, name)?.ok_or_else(|| {
            MultidevError::EnvironmentCreateFailed {
                name: name.to_string(),
                message: "environment is not listed after creation".to_string(),
            }
        })?;

        let Some(remote) = &plan.remote else {
            out.warn("no external remote given, skipping clone, merge and push")?;
            return Ok(Deployment {
                replaced_existing,
                push: None,
            });
        };

        self.enter(Stage::ResolvingGitInfo);
        let url = self
            .platform
            .connection_info(&target)?
            .clone_url()
            .ok_or_else(|| MultidevError::GitInfoUnavailable {
                name: name.to_string(),
            })?;

        let out = self.enter(Stage::Cloning);
        let clone_dir = workspace.clone_dir();
        show(
            out.as_ref(),
            &self.git.clone(workspace.build_dir(), &url, clone_dir)?,
        )?;
        show(out.as_ref(), &self.git.checkout_new_branch(clone_dir, name)?)?;

        let out = self.enter(Stage::Merging);
        out.message(&format!("{} {}", remote.url, remote.branch))?;
        show(
            out.as_ref(),
            &self.git.pull(clone_dir, &remote.url, &remote.branch)?,
        )?;

        let out = self.enter(Stage::SwitchingMode);
        match self.platform.set_connection_mode(&target, ConnectionMode::Git)? {
            ModeChangeResult::Immediate(message) => show(out.as_ref(), &message)?,
            ModeChangeResult::Async(mut job) => {
                let outcome = self.wait_for(
                    job.as_mut(),
                    &format!("switching {} to git mode", target.reference()),
                    out.as_ref(),
                )?;
                if !outcome.successful {
                    return Err(MultidevError::ModeChangeFailed {
                        name: name.to_string(),
                        mode: ConnectionMode::Git.to_string(),
                        message: outcome.message,
                    });
                }
                show(out.as_ref(), &outcome.message)?;
            }
        }

        let out = self.enter(Stage::Pushing);
        let push = self.git.push(clone_dir, name)?;
        match &push {
            PushOutcome::Pushed(report) => show(out.as_ref(), report)?,
            PushOutcome::UpToDate => out.message("already merged, nothing to push")?,
        }

        Ok(Deployment {
            replaced_existing,
            push: Some(push),
        })
    }
}

/// Print command or job output when there is any.
fn show(out: &dyn Output, text: &str) -> Result<()> {
    let text = text.trim();
    if !text.is_empty() {
        out.message(text)?;
    }
    Ok(())
}
