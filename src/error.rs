//! Error taxonomy for provisioning runs.

use crate::core::types::Step;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0} validation error(s)")]
    Validation(usize),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("step '{step}' failed with exit code {exit_code}: {stderr}")]
    StepFailed {
        step: Step,
        exit_code: i32,
        stderr: String,
    },

    #[error("download of {url} failed after {attempts} attempt(s): {detail}")]
    FetchFailed {
        url: String,
        attempts: u32,
        detail: String,
    },

    #[error("installer artifact {} is missing; dependent steps were skipped", .path.display())]
    ArtifactMissing { path: PathBuf },

    #[error("unsupported platform {os}/{arch}: only linux/x86_64 is supported")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("required tool '{0}' not found on PATH")]
    MissingTool(String),

    #[error("verification found {0} problem(s)")]
    Verification(usize),
}

impl ProvisionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProvisionError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_yaml_ng::Error> for ProvisionError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        ProvisionError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for ProvisionError {
    fn from(err: serde_json::Error) -> Self {
        ProvisionError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_failed_message_names_step() {
        let e = ProvisionError::StepFailed {
            step: Step::InstallPackages,
            exit_code: 1,
            stderr: "PackagesNotFoundError".to_string(),
        };
        let msg = e.to_string();
        assert!(msg.contains("install-packages"));
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("PackagesNotFoundError"));
    }

    #[test]
    fn test_artifact_missing_mentions_path() {
        let e = ProvisionError::ArtifactMissing {
            path: PathBuf::from("/work/miniconda.sh"),
        };
        assert!(e.to_string().contains("/work/miniconda.sh"));
    }

    #[test]
    fn test_yaml_error_maps_to_serialization() {
        let err = serde_yaml_ng::from_str::<serde_yaml_ng::Value>("a: [b: {{").unwrap_err();
        let e: ProvisionError = err.into();
        assert!(matches!(e, ProvisionError::Serialization(_)));
    }
}
