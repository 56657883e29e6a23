//! Preflight checks: host platform and required tools.

use crate::error::{ProvisionError, Result};
use std::env;

/// Tools the generated scripts call directly.
pub const REQUIRED_TOOLS: &[&str] = &["bash", "wget"];

/// The installer is a 64-bit Linux build; nothing else can run it.
pub fn check_platform(os: &str, arch: &str) -> Result<()> {
    if os == "linux" && arch == "x86_64" {
        Ok(())
    } else {
        Err(ProvisionError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        })
    }
}

/// Fail on the first tool that is not on `PATH`.
pub fn check_tools(tools: &[&str]) -> Result<()> {
    for tool in tools {
        match which::which(tool) {
            Ok(path) => tracing::debug!(tool, path = %path.display(), "found"),
            Err(_) => return Err(ProvisionError::MissingTool(tool.to_string())),
        }
    }
    Ok(())
}

/// Run every check against the current host.
pub fn run() -> Result<()> {
    check_platform(env::consts::OS, env::consts::ARCH)?;
    check_tools(REQUIRED_TOOLS)
}
