//! [`Platform`](crate::platform::Platform) implementation backed by the
//! Terminus CLI.
//!
//! Queries run to completion and are parsed as JSON. Mutations are spawned
//! and handed back as [`TerminusJob`]s for the caller to poll. Environment
//! listings are cached per site until [`EnvironmentDirectory::refresh`].

use std::{
    collections::{BTreeMap, HashMap, hash_map::Entry},
    io::{BufRead, BufReader},
    process::{Child, Command, ExitStatus, Stdio},
    result::Result as StdResult,
    thread::{self, JoinHandle},
};

use serde::{Deserialize, de::DeserializeOwned};

use crate::{
    error::{MultidevError, Result},
    platform::{
        DeleteOptions, Environment, EnvironmentDirectory, EnvironmentLifecycle,
        GitConnectionInfo, Job, ModeChangeResult, Site,
    },
    types::{ConnectionMode, MultidevName, SourceReference},
};

/// Log prefixes Terminus puts in front of status lines.
const LOG_PREFIXES: &[&str] = &["[notice]", "[error]", "[warning]", "[info]"];

/// `site:info` payload.
#[derive(Debug, Deserialize)]
struct SiteInfo {
    /// Site UUID.
    id: String,
    /// Machine name.
    name: String,
}

/// One entry of the `env:list` payload.
#[derive(Debug, Deserialize)]
struct EnvInfo {
    /// `git` or `sftp`; absent for environments that are still initialising.
    #[serde(default)]
    connection_mode: Option<String>,
}

/// `connection:info` payload.
#[derive(Debug, Deserialize)]
struct ConnectionInfo {
    /// Full clone command.
    #[serde(default)]
    git_command: Option<String>,
    /// Repository URL.
    #[serde(default)]
    git_url: Option<String>,
}

/// Knows how to start Terminus.
#[derive(Debug, Clone)]
struct Runner {
    /// Program followed by leading arguments, e.g. `lando terminus`.
    command: Vec<String>,
}

impl Runner {
    /// Build the process for `args`.
    fn command(&self, args: &[&str]) -> Result<Command> {
        let (program, prefix) = self
            .command
            .split_first()
            .ok_or_else(|| MultidevError::Config("terminus command is empty".into()))?;
        let mut cmd = Command::new(program);
        cmd.args(prefix).args(args).stdin(Stdio::null());
        Ok(cmd)
    }

    /// Textual form of an invocation for error messages.
    fn describe(&self, args: &[&str]) -> String {
        let mut parts = self.command.clone();
        parts.extend(args.iter().map(|a| a.to_string()));
        parts.join(" ")
    }

    /// Run to completion. Returns stdout on success and `None` on a non-zero
    /// exit.
    fn query(&self, args: &[&str]) -> Result<Option<String>> {
        let output = self.command(args)?.output().map_err(|e| {
            MultidevError::Platform(format!("failed to run {}: {e}", self.describe(args)))
        })?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    /// Run to completion, treating a non-zero exit as an error.
    fn query_required(&self, args: &[&str]) -> Result<String> {
        let output = self.command(args)?.output().map_err(|e| {
            MultidevError::Platform(format!("failed to run {}: {e}", self.describe(args)))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<String> = stderr.lines().map(str::to_string).collect();
            return Err(MultidevError::Platform(format!(
                "{} failed: {}",
                self.describe(args),
                last_message(&lines).unwrap_or_else(|| output.status.to_string())
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Start `args` in the background.
    fn spawn(&self, args: &[&str]) -> Result<TerminusJob> {
        let operation = self.describe(args);
        let mut child = self
            .command(args)?
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MultidevError::Platform(format!("failed to run {operation}: {e}")))?;

        let stderr = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                BufReader::new(stderr)
                    .lines()
                    .map_while(StdResult::ok)
                    .collect()
            })
        });

        Ok(TerminusJob {
            operation,
            child,
            stderr,
            status: None,
            message: String::new(),
        })
    }
}

/// Parse a JSON payload, naming the command on failure.
fn parse_json<T: DeserializeOwned>(what: &str, text: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| MultidevError::Platform(format!("unexpected {what} output: {e}")))
}

/// The last meaningful log line, with any Terminus level prefix removed.
fn last_message(lines: &[String]) -> Option<String> {
    let line = lines.iter().rev().map(|l| l.trim()).find(|l| !l.is_empty())?;
    let stripped = LOG_PREFIXES
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .unwrap_or(line);
    Some(stripped.trim().to_string())
}

/// A spawned Terminus command.
///
/// Dropping an unfinished job kills the process.
pub struct TerminusJob {
    /// Command line, used in fallback messages.
    operation: String,
    /// The running process.
    child: Child,
    /// Thread collecting stderr lines.
    stderr: Option<JoinHandle<Vec<String>>>,
    /// Exit status once reaped.
    status: Option<ExitStatus>,
    /// Final message, filled in once finished.
    message: String,
}

impl Job for TerminusJob {
    fn poll(&mut self) -> Result<bool> {
        if self.status.is_some() {
            return Ok(true);
        }
        let Some(status) = self.child.try_wait()? else {
            return Ok(false);
        };

        let lines = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        self.message = last_message(&lines)
            .unwrap_or_else(|| format!("{} exited with {status}", self.operation));
        self.status = Some(status);
        Ok(true)
    }

    fn is_successful(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }

    fn message(&self) -> String {
        self.message.clone()
    }
}

impl Drop for TerminusJob {
    #[allow(clippy::let_underscore_must_use)]
    fn drop(&mut self) {
        if self.status.is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Terminus-backed platform client.
#[derive(Debug)]
pub struct Terminus {
    /// How to start Terminus.
    runner: Runner,
    /// Cached environment listings, keyed by site name.
    environments: HashMap<String, BTreeMap<String, Environment>>,
}

impl Terminus {
    /// Create a client that starts Terminus with `command`.
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().is_none_or(|p| p.trim().is_empty()) {
            return Err(MultidevError::Config("terminus command is empty".into()));
        }
        Ok(Self {
            runner: Runner { command },
            environments: HashMap::new(),
        })
    }

    /// Fetch site metadata, or `None` when Terminus cannot find the site.
    fn site_info(&self, site: &str) -> Result<Option<Site>> {
        let Some(text) = self.runner.query(&["site:info", site, "--format=json"])? else {
            return Ok(None);
        };
        let info: SiteInfo = parse_json("site:info", &text)?;
        Ok(Some(Site {
            id: info.id,
            name: info.name,
        }))
    }

    /// The cached listing for `site`, fetched on first use.
    fn listing(&mut self, site: &Site) -> Result<&BTreeMap<String, Environment>> {
        match self.environments.entry(site.name.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let text = self
                    .runner
                    .query_required(&["env:list", &site.name, "--format=json"])?;
                let raw: BTreeMap<String, EnvInfo> = parse_json("env:list", &text)?;
                let listing = raw
                    .into_iter()
                    .map(|(name, info)| {
                        let env = Environment {
                            site: site.name.clone(),
                            name: name.clone(),
                            connection_mode: info
                                .connection_mode
                                .and_then(|m| m.parse::<ConnectionMode>().ok()),
                        };
                        (name, env)
                    })
                    .collect();
                Ok(entry.insert(listing))
            }
        }
    }
}

impl EnvironmentDirectory for Terminus {
    fn resolve(&mut self, source: &SourceReference) -> Result<Option<(Site, Environment)>> {
        let Some(site) = self.site_info(&source.site)? else {
            return Ok(None);
        };
        let env = self.listing(&site)?.get(&source.env).cloned();
        Ok(env.map(|env| (site, env)))
    }

    fn environment(&mut self, site: &Site, name: &str) -> Result<Option<Environment>> {
        Ok(self.listing(site)?.get(name).cloned())
    }

    fn refresh(&mut self, site: &Site) -> Result<Site> {
        self.environments.remove(&site.name);
        self.site_info(&site.name)?.ok_or_else(|| {
            MultidevError::Platform(format!("site {} is no longer available", site.name))
        })
    }
}

impl EnvironmentLifecycle for Terminus {
    fn delete_environment(
        &mut self,
        env: &Environment,
        options: DeleteOptions,
    ) -> Result<Box<dyn Job>> {
        let reference = env.reference();
        let mut args = vec!["multidev:delete", reference.as_str()];
        if options.delete_branch {
            args.push("--delete-branch");
        }
        args.push("--yes");
        Ok(Box::new(self.runner.spawn(&args)?))
    }

    fn create_environment(
        &mut self,
        site: &Site,
        name: &MultidevName,
        from: &Environment,
    ) -> Result<Box<dyn Job>> {
        let source = format!("{}.{}", site.name, from.name);
        Ok(Box::new(
            self.runner
                .spawn(&["multidev:create", &source, name.as_str()])?,
        ))
    }

    fn set_connection_mode(
        &mut self,
        env: &Environment,
        mode: ConnectionMode,
    ) -> Result<ModeChangeResult> {
        let reference = env.reference();
        if env.connection_mode == Some(mode) {
            return Ok(ModeChangeResult::Immediate(format!(
                "{reference} is already in {mode} mode"
            )));
        }
        let job = self
            .runner
            .spawn(&["connection:set", &reference, mode.as_str()])?;
        Ok(ModeChangeResult::Async(Box::new(job)))
    }

    fn connection_info(&mut self, env: &Environment) -> Result<GitConnectionInfo> {
        let reference = env.reference();
        let text = self
            .runner
            .query_required(&["connection:info", &reference, "--format=json"])?;
        let info: ConnectionInfo = parse_json("connection:info", &text)?;
        Ok(GitConnectionInfo {
            clone_command: info.git_command,
            url: info.git_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::Path,
        time::{Duration, Instant},
    };

    use tempfile::TempDir;

    use super::*;
    use crate::{
        job::{self, PollPolicy},
        output::Quiet,
    };

    /// Write a fake Terminus script that keeps one file per environment
    /// under `state/envs` (contents: connection mode) and logs every call.
    fn fake_terminus(dir: &Path, envs: &[(&str, &str)]) -> Vec<String> {
        let state = dir.join("state");
        fs::create_dir_all(state.join("envs")).unwrap();
        for (name, mode) in envs {
            fs::write(state.join("envs").join(name), mode).unwrap();
        }

        let script = format!(
            r#"STATE='{state}'
cmd="$1"; shift
echo "$cmd $*" >> "$STATE/calls"
case "$cmd" in
  site:info)
    if [ "$1" != "myapp" ]; then
      echo " [error] Could not locate a site your user may access identified by $1." >&2
      exit 1
    fi
    echo '{{"id":"1234","name":"myapp"}}'
    ;;
  env:list)
    printf '{{'
    sep=''
    for f in "$STATE"/envs/*; do
      [ -e "$f" ] || continue
      name=$(basename "$f")
      printf '%s"%s":{{"id":"%s","connection_mode":"%s"}}' "$sep" "$name" "$name" "$(cat "$f")"
      sep=','
    done
    echo '}}'
    ;;
  multidev:delete)
    env="${{1#*.}}"
    rm -f "$STATE/envs/$env"
    echo " [notice] Deleted the multidev environment $env." >&2
    ;;
  multidev:create)
    if [ -e "$STATE/fail-create" ]; then
      echo " [error] $(cat "$STATE/fail-create")" >&2
      exit 1
    fi
    echo sftp > "$STATE/envs/$2"
    echo " [notice] Created Multidev environment \"$2\"" >&2
    ;;
  connection:info)
    echo '{{"git_command":"git clone ssh://codeserver.example/~/repository.git myapp","git_url":"ssh://codeserver.example/~/repository.git"}}'
    ;;
  connection:set)
    env="${{1#*.}}"
    echo "$2" > "$STATE/envs/$env"
    echo " [notice] Enabled git push mode for \"$env\"" >&2
    ;;
  *)
    echo " [error] Command \"$cmd\" is not defined." >&2
    exit 1
    ;;
esac
"#,
            state = state.display()
        );
        let path = dir.join("terminus.sh");
        fs::write(&path, script).unwrap();
        vec!["sh".to_string(), path.to_str().unwrap().to_string()]
    }

    fn calls(dir: &Path) -> Vec<String> {
        fs::read_to_string(dir.join("state").join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(5),
            max_interval: Duration::from_millis(20),
            timeout: Duration::from_secs(10),
        }
    }

    fn source(s: &str) -> SourceReference {
        SourceReference::parse(s).unwrap()
    }

    #[test]
    fn test_last_message() {
        let lines = vec![
            " [notice] Creating Multidev environment".to_string(),
            " [error] Multidev quota exceeded ".to_string(),
            String::new(),
        ];
        assert_eq!(
            last_message(&lines).as_deref(),
            Some("Multidev quota exceeded")
        );
        assert_eq!(
            last_message(&["plain line".to_string()]).as_deref(),
            Some("plain line")
        );
        assert_eq!(last_message(&[]), None);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(matches!(
            Terminus::new(Vec::new()),
            Err(MultidevError::Config(_))
        ));
        assert!(matches!(
            Terminus::new(vec![" ".into()]),
            Err(MultidevError::Config(_))
        ));
    }

    #[test]
    fn resolves_sites_and_environments() {
        let tmp = TempDir::new().unwrap();
        let mut terminus = Terminus::new(fake_terminus(tmp.path(), &[("dev", "git")])).unwrap();

        let (site, env) = terminus.resolve(&source("myapp.dev")).unwrap().unwrap();
        assert_eq!(site.id, "1234");
        assert_eq!(env.reference(), "myapp.dev");
        assert_eq!(env.connection_mode, Some(ConnectionMode::Git));

        assert!(terminus.resolve(&source("myapp.qa")).unwrap().is_none());
        assert!(terminus.resolve(&source("other.dev")).unwrap().is_none());
    }

    #[test]
    fn listing_is_cached_until_refresh() {
        let tmp = TempDir::new().unwrap();
        let mut terminus = Terminus::new(fake_terminus(tmp.path(), &[("dev", "git")])).unwrap();
        let (site, dev) = terminus.resolve(&source("myapp.dev")).unwrap().unwrap();

        let name = MultidevName::derive("hotfix", 11).unwrap();
        let mut job = terminus.create_environment(&site, &name, &dev).unwrap();
        let outcome = job::wait(job.as_mut(), &policy(), "create", &Quiet).unwrap();
        assert!(outcome.successful);
        assert_eq!(outcome.message, "Created Multidev environment \"hotfix\"");

        // The cached listing predates the creation.
        assert!(terminus.environment(&site, "hotfix").unwrap().is_none());

        let site = terminus.refresh(&site).unwrap();
        let hotfix = terminus.environment(&site, "hotfix").unwrap().unwrap();
        assert_eq!(hotfix.connection_mode, Some(ConnectionMode::Sftp));

        let listings = calls(tmp.path())
            .iter()
            .filter(|c| c.starts_with("env:list"))
            .count();
        assert_eq!(listings, 2);
        assert!(
            calls(tmp.path()).contains(&"multidev:create myapp.dev hotfix".to_string())
        );
    }

    #[test]
    fn delete_passes_branch_flag() {
        let tmp = TempDir::new().unwrap();
        let mut terminus = Terminus::new(fake_terminus(
            tmp.path(),
            &[("dev", "git"), ("hotfix", "git"), ("old", "git")],
        ))
        .unwrap();
        let (site, _) = terminus.resolve(&source("myapp.dev")).unwrap().unwrap();

        let hotfix = terminus.environment(&site, "hotfix").unwrap().unwrap();
        let mut job = terminus
            .delete_environment(&hotfix, DeleteOptions { delete_branch: true })
            .unwrap();
        assert!(job::wait(job.as_mut(), &policy(), "delete", &Quiet)
            .unwrap()
            .successful);

        let old = terminus.environment(&site, "old").unwrap().unwrap();
        let mut job = terminus
            .delete_environment(&old, DeleteOptions { delete_branch: false })
            .unwrap();
        assert!(job::wait(job.as_mut(), &policy(), "delete", &Quiet)
            .unwrap()
            .successful);

        let calls = calls(tmp.path());
        assert!(calls.contains(&"multidev:delete myapp.hotfix --delete-branch --yes".to_string()));
        assert!(calls.contains(&"multidev:delete myapp.old --yes".to_string()));

        let site = terminus.refresh(&site).unwrap();
        assert!(terminus.environment(&site, "hotfix").unwrap().is_none());
    }

    #[test]
    fn failed_job_carries_platform_message() {
        let tmp = TempDir::new().unwrap();
        let command = fake_terminus(tmp.path(), &[("dev", "git")]);
        fs::write(
            tmp.path().join("state").join("fail-create"),
            "Multidev quota exceeded",
        )
        .unwrap();
        let mut terminus = Terminus::new(command).unwrap();
        let (site, dev) = terminus.resolve(&source("myapp.dev")).unwrap().unwrap();

        let name = MultidevName::derive("hotfix", 11).unwrap();
        let mut job = terminus.create_environment(&site, &name, &dev).unwrap();
        let outcome = job::wait(job.as_mut(), &policy(), "create", &Quiet).unwrap();
        assert!(!outcome.successful);
        assert_eq!(outcome.message, "Multidev quota exceeded");
    }

    #[test]
    fn mode_change_is_immediate_when_already_set() {
        let tmp = TempDir::new().unwrap();
        let mut terminus = Terminus::new(fake_terminus(
            tmp.path(),
            &[("dev", "git"), ("hotfix", "sftp")],
        ))
        .unwrap();
        let (site, dev) = terminus.resolve(&source("myapp.dev")).unwrap().unwrap();

        match terminus.set_connection_mode(&dev, ConnectionMode::Git).unwrap() {
            ModeChangeResult::Immediate(msg) => assert!(msg.contains("already in git mode")),
            ModeChangeResult::Async(_) => panic!("expected an immediate result"),
        }

        let hotfix = terminus.environment(&site, "hotfix").unwrap().unwrap();
        match terminus
            .set_connection_mode(&hotfix, ConnectionMode::Git)
            .unwrap()
        {
            ModeChangeResult::Async(mut job) => {
                let outcome = job::wait(job.as_mut(), &policy(), "mode", &Quiet).unwrap();
                assert!(outcome.successful);
                assert!(outcome.message.contains("Enabled git push mode"));
            }
            ModeChangeResult::Immediate(_) => panic!("expected a job"),
        }
        assert!(calls(tmp.path()).contains(&"connection:set myapp.hotfix git".to_string()));
    }

    #[test]
    fn connection_info_reports_clone_url() {
        let tmp = TempDir::new().unwrap();
        let mut terminus = Terminus::new(fake_terminus(tmp.path(), &[("dev", "git")])).unwrap();
        let (_, dev) = terminus.resolve(&source("myapp.dev")).unwrap().unwrap();

        let info = terminus.connection_info(&dev).unwrap();
        assert_eq!(
            info.clone_url().as_deref(),
            Some("ssh://codeserver.example/~/repository.git")
        );
        assert!(info.clone_command.unwrap().starts_with("git clone"));
    }

    #[test]
    fn unknown_command_is_a_platform_error() {
        let tmp = TempDir::new().unwrap();
        let runner = Runner {
            command: fake_terminus(tmp.path(), &[]),
        };
        match runner.query_required(&["env:bogus"]) {
            Err(MultidevError::Platform(msg)) => {
                assert!(msg.contains("Command \"env:bogus\" is not defined."), "{msg}")
            }
            other => panic!("expected platform error, got {other:?}"),
        }
    }

    #[test]
    fn dropping_an_unfinished_job_kills_it() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("slow.sh");
        fs::write(&script, "sleep 30\n").unwrap();
        let runner = Runner {
            command: vec!["sh".into(), script.to_str().unwrap().into()],
        };

        let mut job = runner.spawn(&[]).unwrap();
        assert!(!job.poll().unwrap());
        let started = Instant::now();
        drop(job);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
