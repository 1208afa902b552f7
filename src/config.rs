//! Policy Configuration
//!
//! Loads and saves the pipeline policy from `~/.promptgate/policy.json`.
//! The policy is read once at process start and never mutated afterwards.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::types::{default_policy, PolicyConfig};

/// Policy file name within the promptgate directory.
const POLICY_FILENAME: &str = "policy.json";

/// Returns the promptgate config directory: `~/.promptgate`.
pub fn get_promptgate_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
    home.join(".promptgate")
}

/// Returns the full path to the policy file: `~/.promptgate/policy.json`.
pub fn get_policy_path() -> PathBuf {
    get_promptgate_dir().join(POLICY_FILENAME)
}

/// Load the policy from disk, merging missing or unset fields with the
/// defended defaults.
///
/// Returns `None` if the file does not exist or cannot be parsed.
pub fn load_policy(path: Option<&str>) -> Option<PolicyConfig> {
    let policy_path = path.map(PathBuf::from).unwrap_or_else(get_policy_path);
    if !policy_path.exists() {
        return None;
    }

    let contents = fs::read_to_string(&policy_path).ok()?;
    let mut policy: PolicyConfig = serde_json::from_str(&contents).ok()?;

    let defaults = default_policy();

    if policy.input_risk_threshold <= 0.0 || policy.input_risk_threshold > 1.0 {
        policy.input_risk_threshold = defaults.input_risk_threshold;
    }
    if policy.inference_api_url.is_empty() {
        policy.inference_api_url = defaults.inference_api_url;
    }
    if policy.inference_model.is_empty() {
        policy.inference_model = defaults.inference_model;
    }
    if policy.max_tokens == 0 {
        policy.max_tokens = defaults.max_tokens;
    }
    if policy.model_timeout_secs == 0 {
        policy.model_timeout_secs = defaults.model_timeout_secs;
    }
    if policy.documents_dir.is_empty() {
        policy.documents_dir = defaults.documents_dir;
    }
    if policy.directory_db_path.is_empty() {
        policy.directory_db_path = defaults.directory_db_path;
    }

    Some(policy)
}

/// Save the policy to disk at `~/.promptgate/policy.json`.
///
/// Creates the promptgate directory with mode 0o700 if it does not
/// exist. The policy file is written with mode 0o600 since it may
/// contain an inference API key.
pub fn save_policy(policy: &PolicyConfig) -> Result<()> {
    let dir = get_promptgate_dir();
    if !dir.exists() {
        fs::create_dir_all(&dir).context("Failed to create promptgate directory")?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
    }

    let policy_path = get_policy_path();
    let json = serde_json::to_string_pretty(policy).context("Failed to serialize policy")?;

    fs::write(&policy_path, &json).context("Failed to write policy file")?;
    fs::set_permissions(&policy_path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

/// Resolve a path that may start with `~` to an absolute path.
pub fn resolve_path(p: &str) -> String {
    if let Some(rest) = p.strip_prefix('~') {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        home.join(rest).to_string_lossy().to_string()
    } else {
        p.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LogLevel;

    #[test]
    fn test_resolve_path_with_tilde() {
        let resolved = resolve_path("~/some/path");
        assert!(!resolved.starts_with('~'));
        assert!(resolved.ends_with("some/path"));
    }

    #[test]
    fn test_resolve_path_without_tilde() {
        let path = "/absolute/path/to/file";
        assert_eq!(resolve_path(path), path);
    }

    #[test]
    fn test_default_policy_is_defended() {
        let policy = default_policy();
        assert!(!policy.tool_execution_enabled);
        assert_eq!(policy.input_risk_threshold, 0.75);
        assert!(policy.allowed_origins.is_empty());
        assert_eq!(policy.inference_model, "llama3:8b");
        assert_eq!(policy.log_level, LogLevel::Info);
    }
}
