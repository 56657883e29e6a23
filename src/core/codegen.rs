//! Script generation: dispatch each step to its resource handler, and
//! render the whole sequence as a single script or composite action.

use super::selector::PythonSelector;
use super::types::{EnvHandle, FetchFailurePolicy, ProvisionConfig, Step};
use crate::error::Result;
use crate::resources::{conda, installer, quote_path};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything a step script may interpolate.
pub struct StepInputs<'a> {
    pub config: &'a ProvisionConfig,
    pub python: &'a PythonSelector,
    /// Absolute path of the downloaded installer
    pub artifact: &'a Path,
    /// Environment the package steps run in
    pub handle: &'a EnvHandle,
    /// Pass `-u` to the installer because the prefix already exists
    pub update_install: bool,
}

/// Generate the script that converges a single step.
pub fn step_script(step: Step, inputs: &StepInputs) -> String {
    match step {
        Step::Fetch => installer::fetch_script(&inputs.config.installer, inputs.artifact),
        Step::Install => installer::install_script(
            inputs.artifact,
            inputs.handle.prefix(),
            inputs.update_install,
        ),
        Step::Activate => conda::activate_script(inputs.handle),
        Step::InstallPackages => conda::install_packages_script(
            inputs.handle,
            &inputs.config.install,
            &inputs.python.match_spec(),
        ),
        Step::Upgrade => conda::upgrade_script(inputs.handle, &inputs.config.upgrade),
    }
}

/// Render all five steps as one bash script.
///
/// `python_expr` is substituted verbatim after `python=`: a concrete
/// selector, or an expression such as `${{ inputs.python-version }}`.
/// Paths stay unexpanded (`~/` renders as `"$HOME"/...`) and the artifact
/// is relative to the directory the script runs in. Re-running the script
/// skips fetch and install once conda is present, and an existing prefix
/// without conda is installed over with `-u`.
pub fn render_action_script(config: &ProvisionConfig, python_expr: &str) -> String {
    let artifact = Path::new(&config.installer.file);
    let prefix = Path::new(&config.installer.prefix);
    let handle = EnvHandle::new(prefix, config.environment.as_str());

    let (guard_exit, guard_note) = match config.policy.on_fetch_failure {
        FetchFailurePolicy::Abort => ("exit 1", "aborting"),
        FetchFailurePolicy::Continue => ("exit 0", "continuing without install (masked)"),
    };
    let skipped: Vec<String> = Step::ALL
        .iter()
        .filter(|s| s.depends_on_fetch())
        .map(|s| s.to_string())
        .collect();

    let conda = quote_path(&prefix.join("bin").join("conda"));
    let mut lines = vec![
        format!(
            "# Generated by condaprov {} for '{}'",
            env!("CARGO_PKG_VERSION"),
            config.name
        ),
        "set -eo pipefail".to_string(),
        // Fetch and install only when the prefix holds no conda yet.
        format!(
            "if [ -x {conda} ]; then\n\
             \x20 echo \"condaprov: conda found at \"{conda}\", skipping fetch and install\" >&2\n\
             else"
        ),
        installer::download_block(&config.installer, artifact, ":"),
        format!(
            "if [ ! -f {artifact} ]; then\n\
             \x20 echo \"condaprov: installer missing, skipped {steps}; {note}\" >&2\n\
             \x20 {exit}\n\
             fi",
            artifact = quote_path(artifact),
            steps = skipped.join(", "),
            note = guard_note,
            exit = guard_exit,
        ),
        format!(
            "if [ -d {prefix} ]; then\n{update}\nelse\n{fresh}\nfi",
            prefix = quote_path(prefix),
            update = installer::run_installer_lines(artifact, prefix, true),
            fresh = installer::run_installer_lines(artifact, prefix, false),
        ),
        "fi".to_string(),
        conda::preamble(&handle),
        conda::install_command(&config.install, &format!("python={}", python_expr)),
    ];
    if let Some(upgrade) = conda::upgrade_command(&config.upgrade) {
        lines.push(upgrade);
    }
    let mut script = lines.join("\n");
    script.push('\n');
    script
}

/// Input name the composite action exposes for the interpreter version.
pub const PYTHON_INPUT: &str = "python-version";

#[derive(Debug, Serialize, Deserialize)]
pub struct CompositeAction {
    pub name: String,
    pub description: String,
    pub inputs: IndexMap<String, ActionInput>,
    pub runs: ActionRuns,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionInput {
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionRuns {
    pub using: String,
    pub steps: Vec<ActionStep>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionStep {
    pub name: String,
    pub shell: String,
    pub run: String,
}

/// Emit the composite action descriptor YAML.
pub fn render_composite_action(config: &ProvisionConfig) -> Result<String> {
    let mut inputs = IndexMap::new();
    inputs.insert(
        PYTHON_INPUT.to_string(),
        ActionInput {
            description: "Python version to install packages against".to_string(),
            required: true,
        },
    );

    let packages = config.install.packages.join(", ");
    let action = CompositeAction {
        name: format!("Install {} via Miniconda", packages),
        description: config.description.clone().unwrap_or_else(|| {
            format!(
                "Install Miniconda and use it to install {} from the {} channel",
                packages, config.install.channel
            )
        }),
        inputs,
        runs: ActionRuns {
            using: "composite".to_string(),
            steps: vec![ActionStep {
                name: format!("Provision {}", config.name),
                shell: "bash".to_string(),
                run: render_action_script(config, &format!("${{{{ inputs.{} }}}}", PYTHON_INPUT)),
            }],
        },
    };

    Ok(serde_yaml_ng::to_string(&action)?)
}
