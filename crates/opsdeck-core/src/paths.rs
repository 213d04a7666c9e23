use crate::error::{OpsError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File name constants
// ---------------------------------------------------------------------------

/// Per-user state directory, relative to `$HOME`.
pub const STATE_DIR: &str = ".opsdeck";

pub const CONFIG_FILE: &str = "config.yaml";
pub const KNOWLEDGE_BASE_FILE: &str = "agent_knowledge_base.json";
pub const COMMUNICATION_FILE: &str = "agent_communication.json";
pub const INTEGRITY_FILE: &str = "integrity.json";
pub const SECURITY_LOG: &str = "security.log";
pub const PID_FILE: &str = "monitor.pid";
pub const REPORTS_DIR: &str = "reports";

/// Dashboard output, relative to the project root.
pub const DASHBOARD_FILE: &str = "dashboard_data.json";
/// Conventional directory holding one app repository per child.
pub const APPS_DIR: &str = "apps";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Resolve the state directory: an explicit override wins, otherwise
/// `$HOME/.opsdeck`.
pub fn state_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    let home = home::home_dir().ok_or(OpsError::HomeNotFound)?;
    Ok(home.join(STATE_DIR))
}

pub fn config_path(state: &Path) -> PathBuf {
    state.join(CONFIG_FILE)
}

pub fn knowledge_base_path(state: &Path) -> PathBuf {
    state.join(KNOWLEDGE_BASE_FILE)
}

pub fn communication_path(state: &Path) -> PathBuf {
    state.join(COMMUNICATION_FILE)
}

pub fn integrity_path(state: &Path) -> PathBuf {
    state.join(INTEGRITY_FILE)
}

pub fn security_log_path(state: &Path) -> PathBuf {
    state.join(SECURITY_LOG)
}

pub fn pid_path(state: &Path) -> PathBuf {
    state.join(PID_FILE)
}

pub fn reports_dir(state: &Path) -> PathBuf {
    state.join(REPORTS_DIR)
}

pub fn dashboard_path(root: &Path) -> PathBuf {
    root.join(DASHBOARD_FILE)
}

pub fn apps_dir(root: &Path) -> PathBuf {
    root.join(APPS_DIR)
}

/// Expand a leading `~/` against the user's home directory. Paths without
/// the prefix, or when no home directory is known, are returned unchanged.
pub fn expand_tilde(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = home::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
