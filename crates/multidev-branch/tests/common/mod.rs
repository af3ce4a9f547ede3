#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use anyhow::Result;
use tempfile::TempDir;

/// Path to the compiled binary under test.
pub fn multidev_binary() -> &'static str {
    env!("CARGO_BIN_EXE_multidev-branch")
}

/// Run git for fixture setup, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .current_dir(dir)
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .output()
        .expect("failed to run git");

    if !output.status.success() {
        panic!(
            "git {:?} failed: stdout={} stderr={}",
            args,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Throwaway platform: a fake Terminus script plus the git repositories it
/// points at.
pub struct Sandbox {
    /// Root of everything the test touches.
    pub tmp: TempDir,
    /// Bare repository served as the environment's code repository.
    pub platform_repo: PathBuf,
    /// External repository URL, without the `.git` suffix it lives under.
    pub external_url: String,
    /// Config file handed to the binary.
    pub config: PathBuf,
}

impl Sandbox {
    /// Build a sandbox whose site `myapp` starts with `envs` (name, mode).
    pub fn new(envs: &[(&str, &str)]) -> Result<Self> {
        let tmp = TempDir::new()?;
        let root = tmp.path();

        let seed = root.join("seed");
        fs::create_dir_all(&seed)?;
        git(&seed, &["init", "-b", "master"]);
        git(&seed, &["config", "user.email", "test@example.com"]);
        git(&seed, &["config", "user.name", "Test User"]);
        fs::write(seed.join("README.md"), "base")?;
        git(&seed, &["add", "README.md"]);
        git(&seed, &["commit", "-m", "Initial commit"]);

        let platform_repo = root.join("platform.git");
        git(
            root,
            &[
                "clone",
                "--bare",
                seed.to_str().unwrap(),
                platform_repo.to_str().unwrap(),
            ],
        );

        let external = root.join("external.git");
        git(
            root,
            &["clone", seed.to_str().unwrap(), external.to_str().unwrap()],
        );
        git(&external, &["config", "user.email", "test@example.com"]);
        git(&external, &["config", "user.name", "Test User"]);
        git(&external, &["checkout", "-b", "feature/login-v2"]);
        fs::write(external.join("login.txt"), "login v2")?;
        git(&external, &["add", "login.txt"]);
        git(&external, &["commit", "-m", "Login v2"]);

        let state = root.join("state");
        fs::create_dir_all(state.join("envs"))?;
        for (name, mode) in envs {
            fs::write(state.join("envs").join(name), mode)?;
        }
        let script = root.join("terminus.sh");
        fs::write(&script, fake_terminus(&state, &platform_repo))?;

        let config = root.join("config.toml");
        fs::write(
            &config,
            format!(
                "terminus = [\"sh\", \"{}\"]\nscratch_root = \"{}\"\n\n[poll]\ninterval_ms = 10\nmax_interval_ms = 50\ntimeout_secs = 30\n",
                script.display(),
                root.join("scratch").display()
            ),
        )?;

        Ok(Self {
            external_url: root.join("external").to_str().unwrap().to_string(),
            tmp,
            platform_repo,
            config,
        })
    }

    /// Scratch root configured for the binary.
    pub fn scratch_root(&self) -> PathBuf {
        self.tmp.path().join("scratch")
    }

    /// Make the next `multidev:create` fail with `message`.
    pub fn fail_create(&self, message: &str) -> Result<()> {
        fs::write(self.tmp.path().join("state").join("fail-create"), message)?;
        Ok(())
    }

    /// Every Terminus invocation so far, one per line.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.tmp.path().join("state").join("calls"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Run the binary with `--config` pointing at this sandbox.
    pub fn run(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new(multidev_binary())
            .arg("--config")
            .arg(&self.config)
            .args(args)
            .env_remove("MULTIDEV_CONFIG")
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()?;
        Ok(output)
    }
}

/// Shell script standing in for Terminus. Environment state lives in one
/// file per environment under `state/envs`, holding its connection mode.
fn fake_terminus(state: &Path, platform_repo: &Path) -> String {
    format!(
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
    echo '{{"git_command":"git clone {repo} myapp"}}'
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
        state = state.display(),
        repo = platform_repo.display()
    )
}
