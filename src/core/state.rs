//! Lock file management: load, save (atomic), path derivation.

use super::types::StateLock;
use crate::error::{ProvisionError, Result};
use std::path::{Path, PathBuf};

/// Derive the lock file path for an environment within the state directory.
pub fn lock_file_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join(name).join("state.lock.yaml")
}

/// Load the lock file for an environment. Returns None if it doesn't exist.
pub fn load_lock(state_dir: &Path, name: &str) -> Result<Option<StateLock>> {
    let path = lock_file_path(state_dir, name);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| ProvisionError::io(&path, e))?;
    let lock: StateLock = serde_yaml_ng::from_str(&content).map_err(|e| {
        ProvisionError::Serialization(format!("invalid lock file {}: {}", path.display(), e))
    })?;
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<()> {
    let path = lock_file_path(state_dir, &lock.name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
    }

    let yaml = serde_yaml_ng::to_string(lock)?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml).map_err(|e| ProvisionError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| ProvisionError::io(&path, e))?;

    Ok(())
}

/// Create a new empty StateLock for an environment.
pub fn new_lock(name: &str, prefix: &Path) -> StateLock {
    use crate::provenance::eventlog::now_iso8601;
    StateLock {
        schema: "1.0".to_string(),
        name: name.to_string(),
        python: None,
        prefix: prefix.display().to_string(),
        generated_at: now_iso8601(),
        generator: format!("condaprov {}", env!("CARGO_PKG_VERSION")),
        blake3_version: "1.8".to_string(),
        steps: indexmap::IndexMap::new(),
    }
}

/// Every environment name that has a lock under `state_dir`, sorted.
pub fn list_environments(state_dir: &Path) -> Result<Vec<String>> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(state_dir).map_err(|e| ProvisionError::io(state_dir, e))?;
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| lock_file_path(state_dir, name).exists())
        .collect();
    names.sort();
    Ok(names)
}
