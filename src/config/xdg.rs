//! XDG Base Directory locations for per-workspace data and the global config.

use crate::error::ApiError;
use std::path::{Component, Path, PathBuf};

const APP_DIR: &str = "embedsync";

/// `$<var>` when set and non-empty, else `$HOME/<fallback>`.
fn base_dir(var: &str, fallback: &[&str]) -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os(var).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    let home = std::env::var_os("HOME").filter(|v| !v.is_empty())?;
    let mut dir = PathBuf::from(home);
    dir.extend(fallback);
    Some(dir)
}

/// `$XDG_DATA_HOME`, default `~/.local/share`
pub fn data_home() -> Option<PathBuf> {
    base_dir("XDG_DATA_HOME", &[".local", "share"])
}

/// `$XDG_CONFIG_HOME`, default `~/.config`
pub fn config_home() -> Option<PathBuf> {
    base_dir("XDG_CONFIG_HOME", &[".config"])
}

/// `$XDG_CONFIG_HOME/embedsync/config.toml`
pub fn global_config_path() -> Option<PathBuf> {
    config_home().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

/// Data directory for one workspace: the canonical workspace path mirrored
/// under `$XDG_DATA_HOME/embedsync/`, so `/home/user/vault` maps to
/// `$XDG_DATA_HOME/embedsync/home/user/vault/`.
pub fn workspace_data_dir(workspace_root: &Path) -> Result<PathBuf, ApiError> {
    let mut dir = data_home()
        .ok_or_else(|| {
            ApiError::ConfigError("Could not determine XDG data home directory (HOME not set)".to_string())
        })?
        .join(APP_DIR);

    let canonical = dunce::canonicalize(workspace_root).map_err(|e| {
        ApiError::ConfigError(format!(
            "Failed to canonicalize workspace path {}: {}",
            workspace_root.display(),
            e
        ))
    })?;
    dir.extend(canonical.components().filter_map(|c| match c {
        Component::Normal(name) => Some(name),
        _ => None,
    }));
    Ok(dir)
}
