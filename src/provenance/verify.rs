//! Environment verification: query the activated environment and compare
//! it to the descriptor.

use crate::core::selector::PythonSelector;
use crate::core::types::{EnvHandle, ProvisionConfig};
use crate::error::{ProvisionError, Result};
use crate::provenance::hasher;
use crate::resources::conda;
use crate::transport::Transport;
use indexmap::IndexMap;
use std::path::Path;

/// A single verification finding.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyFinding {
    pub subject: String,
    pub expected: String,
    pub actual: String,
}

impl std::fmt::Display for VerifyFinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: expected {}, found {}",
            self.subject, self.expected, self.actual
        )
    }
}

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub python_version: Option<String>,
    pub packages: IndexMap<String, bool>,
    /// BLAKE3 of the raw query output
    pub live_hash: String,
    pub findings: Vec<VerifyFinding>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Every package the descriptor expects to find.
pub fn expected_packages(config: &ProvisionConfig) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for p in config.install.packages.iter().chain(&config.upgrade.packages) {
        if !out.contains(p) {
            out.push(p.clone());
        }
    }
    out
}

/// Parse `python=X.Y.Z` and `name=installed|MISSING` lines.
pub fn parse_query_output(stdout: &str) -> (Option<String>, IndexMap<String, bool>) {
    let mut python = None;
    let mut packages = IndexMap::new();
    for line in stdout.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        if key == "python" {
            python = Some(value.to_string());
        } else if value == "installed" || value == "MISSING" {
            packages.insert(key.to_string(), value == "installed");
        }
    }
    (python, packages)
}

/// Compare parsed query output to what the descriptor asks for.
pub fn evaluate(
    python: &PythonSelector,
    expected: &[String],
    observed_python: Option<&str>,
    observed_packages: &IndexMap<String, bool>,
    artifact: &Path,
) -> Vec<VerifyFinding> {
    let mut findings = Vec::new();

    match observed_python {
        Some(v) if python.matches(v) => {}
        Some(v) => findings.push(VerifyFinding {
            subject: "python".to_string(),
            expected: python.to_string(),
            actual: v.to_string(),
        }),
        None => findings.push(VerifyFinding {
            subject: "python".to_string(),
            expected: python.to_string(),
            actual: "MISSING".to_string(),
        }),
    }

    for pkg in expected {
        if observed_packages.get(pkg).copied() != Some(true) {
            findings.push(VerifyFinding {
                subject: pkg.clone(),
                expected: "installed".to_string(),
                actual: "MISSING".to_string(),
            });
        }
    }

    if artifact.exists() {
        findings.push(VerifyFinding {
            subject: "installer artifact".to_string(),
            expected: "removed".to_string(),
            actual: artifact.display().to_string(),
        });
    }

    findings
}

/// Run the verification query through `transport` and evaluate it.
pub fn verify(
    transport: &dyn Transport,
    handle: &EnvHandle,
    config: &ProvisionConfig,
    python: &PythonSelector,
    artifact: &Path,
) -> Result<VerifyReport> {
    let expected = expected_packages(config);
    let script = conda::verify_query_script(handle, &expected);
    let out = transport.exec(&script)?;
    if !out.success() {
        return Err(ProvisionError::Transport(format!(
            "verification query exited {}: {}",
            out.exit_code,
            out.stderr_tail(5)
        )));
    }

    let (observed_python, packages) = parse_query_output(&out.stdout);
    let findings = evaluate(
        python,
        &expected,
        observed_python.as_deref(),
        &packages,
        artifact,
    );
    for f in &findings {
        tracing::warn!(finding = %f, "verification");
    }

    Ok(VerifyReport {
        python_version: observed_python,
        packages,
        live_hash: hasher::hash_string(&out.stdout),
        findings,
    })
}
