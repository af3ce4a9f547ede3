use std::{env, path::PathBuf};

/// Default config file location.
const DEFAULT_CONFIG: &str = "~/.config/multidev-branch/config.toml";

/// Environment variable naming an alternative config file.
const CONFIG_ENV: &str = "MULTIDEV_CONFIG";

/// Expand a leading `~` in a filesystem path using the `HOME` environment variable.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~")
        && let Ok(home) = env::var("HOME")
    {
        return PathBuf::from(path.replacen("~", &home, 1));
    }
    PathBuf::from(path)
}

/// Pick the config file: the `--config` flag, then `MULTIDEV_CONFIG`, then
/// the default location.
///
/// The boolean is true when the file was named explicitly and so must exist.
pub fn config_location(flag: Option<&str>) -> (PathBuf, bool) {
    if let Some(path) = flag {
        (expand_tilde(path), true)
    } else if let Ok(path) = env::var(CONFIG_ENV)
        && !path.is_empty()
    {
        (expand_tilde(&path), true)
    } else {
        (expand_tilde(DEFAULT_CONFIG), false)
    }
}
