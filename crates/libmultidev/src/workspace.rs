use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use fs4::FileExt;

use crate::error::{MultidevError, Result};

/// Prefix for per-branch build directories under the scratch root.
const BUILD_PREFIX: &str = "multidev-build-";

/// Replace characters outside `[a-zA-Z0-9-_]` with hyphens so a branch or
/// site name can be used as a single path component.
fn clean_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Local scratch space for one invocation: a build directory keyed by branch
/// and a clone directory inside it keyed by site.
#[derive(Debug)]
pub struct ScratchWorkspace {
    /// Directory the clone runs from.
    build_dir: PathBuf,
    /// Checkout of the platform repository.
    clone_dir: PathBuf,
    /// Exclusive lock held for the lifetime of the workspace.
    lock_file: File,
    /// Path of the lock file, kept for error reporting.
    lock_path: PathBuf,
}

impl Drop for ScratchWorkspace {
    #[allow(clippy::let_underscore_must_use)]
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock_file);
    }
}

impl ScratchWorkspace {
    /// Lock and prepare the workspace for `branch` and `site` under `root`.
    ///
    /// A missing build directory is created. A leftover one from an earlier
    /// run is reused, but its clone directory is removed first.
    pub fn prepare(root: &Path, branch: &str, site: &str) -> Result<Self> {
        let key = format!("{BUILD_PREFIX}{}", clean_name(branch));
        let build_dir = root.join(&key);
        let clone_dir = build_dir.join(clean_name(site));
        let lock_path = root.join(format!("{key}.lock"));

        fs::create_dir_all(root).map_err(|source| MultidevError::DirectoryCreateFailed {
            path: root.to_path_buf(),
            source,
        })?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if FileExt::try_lock_exclusive(&lock_file).is_err() {
            return Err(MultidevError::WorkspaceBusy { path: lock_path });
        }

        if !build_dir.exists() {
            fs::create_dir_all(&build_dir).map_err(|source| {
                MultidevError::DirectoryCreateFailed {
                    path: build_dir.clone(),
                    source,
                }
            })?;
        } else if clone_dir.exists() {
            fs::remove_dir_all(&clone_dir)?;
        }

        Ok(Self {
            build_dir,
            clone_dir,
            lock_file,
            lock_path,
        })
    }

    /// Directory the clone command runs from.
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Checkout location inside the build directory.
    pub fn clone_dir(&self) -> &Path {
        &self.clone_dir
    }

    /// Lock file guarding this workspace.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Remove the build directory tree. Returns whether anything was removed.
    pub fn cleanup(&self) -> Result<bool> {
        if !self.build_dir.exists() {
            return Ok(false);
        }
        fs::remove_dir_all(&self.build_dir).map_err(|e| MultidevError::CleanupFailed {
            path: self.build_dir.clone(),
            message: e.to_string(),
        })?;
        Ok(true)
    }
}
