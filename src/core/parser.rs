//! Descriptor parsing and validation.
//!
//! Parses condaprov.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Installer URL must be https, tries bounded, file a bare name
//! - Prefix absolute or home-relative
//! - Channel and package names well-formed
//! - Python selector parses (when present)

use super::selector::PythonSelector;
use super::types::*;
use crate::error::{ProvisionError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const DEFAULT_CONFIG_FILE: &str = "condaprov.yaml";

const MAX_TRIES: u32 = 20;

fn package_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static regex"))
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a descriptor file from disk.
pub fn parse_config_file(path: &Path) -> Result<ProvisionConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ProvisionError::io(path, e))?;
    parse_config(&content)
}

/// Parse a descriptor from a string.
pub fn parse_config(yaml: &str) -> Result<ProvisionConfig> {
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Parse the descriptor if it exists, otherwise fall back to the
/// built-in defaults.
pub fn load_or_default(path: &Path) -> Result<ProvisionConfig> {
    if path.exists() {
        parse_config_file(path)
    } else {
        tracing::debug!(path = %path.display(), "no descriptor found, using defaults");
        Ok(ProvisionConfig::default())
    }
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &ProvisionConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        ));
    }

    if config.name.is_empty() {
        push("name must not be empty".to_string());
    } else if !package_name_re().is_match(&config.name) {
        push(format!(
            "name '{}' must be a single path-safe word",
            config.name
        ));
    }

    if config.environment.is_empty() {
        push("environment must not be empty".to_string());
    }

    // Installer
    let installer = &config.installer;
    if !installer.url.starts_with("https://") {
        push(format!("installer.url must use https, got '{}'", installer.url));
    }
    if installer.tries == 0 || installer.tries > MAX_TRIES {
        push(format!(
            "installer.tries must be between 1 and {}, got {}",
            MAX_TRIES, installer.tries
        ));
    }
    if installer.file.is_empty()
        || installer.file.contains('/')
        || installer.file == "."
        || installer.file == ".."
    {
        push(format!(
            "installer.file must be a bare file name, got '{}'",
            installer.file
        ));
    }
    if !(installer.prefix.starts_with('/') || installer.prefix.starts_with("~/")) {
        push(format!(
            "installer.prefix must be absolute or start with ~/, got '{}'",
            installer.prefix
        ));
    }

    // Packages
    if config.install.channel.is_empty() {
        push("install.channel must not be empty".to_string());
    }
    if config.install.packages.is_empty() {
        push("install.packages must name at least one package".to_string());
    }
    for pkg in config
        .install
        .packages
        .iter()
        .chain(config.upgrade.packages.iter())
    {
        if !package_name_re().is_match(pkg) {
            push(format!("invalid package name '{}'", pkg));
        }
    }

    if let Some(ref python) = config.python {
        if let Err(e) = PythonSelector::parse(python) {
            push(e.to_string());
        }
    }

    errors
}

/// Pick the python selector: command line wins over the descriptor.
pub fn resolve_python(config: &ProvisionConfig, cli: Option<&str>) -> Result<PythonSelector> {
    match cli.or(config.python.as_deref()) {
        Some(raw) => PythonSelector::parse(raw),
        None => Err(ProvisionError::Config(
            "no python version given: pass --python or set `python` in the descriptor"
                .to_string(),
        )),
    }
}

/// Expand a leading `~/` to the current user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .ok_or_else(|| {
                ProvisionError::Config(format!("cannot expand '{}': home directory unknown", path))
            }),
        None => Ok(PathBuf::from(path)),
    }
}
