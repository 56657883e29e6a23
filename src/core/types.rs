//! Descriptor, step, lock, plan and provenance types.
//!
//! Everything that lands on disk (descriptor, lock file, event log) derives
//! Serialize/Deserialize so it roundtrips through YAML or JSON.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Descriptor (condaprov.yaml)
// ============================================================================

pub const DEFAULT_INSTALLER_URL: &str =
    "https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-x86_64.sh";

/// Desired state of the provisioned environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Name of this environment; also names its state directory
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Interpreter version selector; `--python` overrides it
    #[serde(default)]
    pub python: Option<String>,

    /// Environment to activate after install
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub installer: InstallerSpec,

    #[serde(default)]
    pub install: InstallSpec,

    #[serde(default)]
    pub upgrade: UpgradeSpec,

    #[serde(default)]
    pub policy: Policy,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: "psi4".to_string(),
            description: None,
            python: None,
            environment: default_environment(),
            installer: InstallerSpec::default(),
            install: InstallSpec::default(),
            upgrade: UpgradeSpec::default(),
            policy: Policy::default(),
        }
    }
}

fn default_environment() -> String {
    "base".to_string()
}

/// Where the installer comes from and where it installs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerSpec {
    #[serde(default = "default_installer_url")]
    pub url: String,

    /// File name of the downloaded artifact inside the work directory
    #[serde(default = "default_installer_file")]
    pub file: String,

    /// Download attempts (`wget --tries`)
    #[serde(default = "default_tries")]
    pub tries: u32,

    /// Install prefix; `~/` expands to the home directory
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for InstallerSpec {
    fn default() -> Self {
        Self {
            url: default_installer_url(),
            file: default_installer_file(),
            tries: default_tries(),
            prefix: default_prefix(),
        }
    }
}

fn default_installer_url() -> String {
    DEFAULT_INSTALLER_URL.to_string()
}

fn default_installer_file() -> String {
    "miniconda.sh".to_string()
}

fn default_tries() -> u32 {
    3
}

fn default_prefix() -> String {
    "~/miniconda".to_string()
}

/// Packages installed from a channel, pinned against the interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSpec {
    #[serde(default = "default_channel")]
    pub channel: String,

    #[serde(default = "default_install_packages")]
    pub packages: Vec<String>,
}

impl Default for InstallSpec {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            packages: default_install_packages(),
        }
    }
}

fn default_channel() -> String {
    "psi4".to_string()
}

fn default_install_packages() -> Vec<String> {
    vec!["psi4".to_string()]
}

/// Packages upgraded to their latest release after the install.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeSpec {
    #[serde(default)]
    pub tool: UpgradeTool,

    #[serde(default = "default_upgrade_packages")]
    pub packages: Vec<String>,
}

impl Default for UpgradeSpec {
    fn default() -> Self {
        Self {
            tool: UpgradeTool::default(),
            packages: default_upgrade_packages(),
        }
    }
}

fn default_upgrade_packages() -> Vec<String> {
    vec!["numpy".to_string()]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeTool {
    #[default]
    Pip,
    Conda,
}

impl fmt::Display for UpgradeTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pip => write!(f, "pip"),
            Self::Conda => write!(f, "conda"),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// What a failed download does to the rest of the run
    #[serde(default)]
    pub on_fetch_failure: FetchFailurePolicy,

    /// Append provenance events to `events.jsonl`
    #[serde(default = "default_true")]
    pub event_log: bool,

    /// Persist step state after every run
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            on_fetch_failure: FetchFailurePolicy::default(),
            event_log: true,
            lock_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Behavior after the installer download exhausts its retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailurePolicy {
    /// Skip the dependent steps and fail the run.
    #[default]
    Abort,
    /// Skip the dependent steps and report success with a warning.
    Continue,
}

impl fmt::Display for FetchFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Continue => write!(f, "continue"),
        }
    }
}

// ============================================================================
// Steps
// ============================================================================

/// The five provisioning steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Fetch,
    Install,
    Activate,
    InstallPackages,
    Upgrade,
}

impl Step {
    pub const ALL: [Step; 5] = [
        Step::Fetch,
        Step::Install,
        Step::Activate,
        Step::InstallPackages,
        Step::Upgrade,
    ];

    /// Steps that only make sense once the installer was fetched.
    pub fn depends_on_fetch(self) -> bool {
        self != Step::Fetch
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Install => write!(f, "install"),
            Self::Activate => write!(f, "activate"),
            Self::InstallPackages => write!(f, "install-packages"),
            Self::Upgrade => write!(f, "upgrade"),
        }
    }
}

/// Result of the download step. Dependent steps guard on this value
/// instead of probing the filesystem after a swallowed error.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Fetched {
        path: PathBuf,
        hash: String,
        bytes: u64,
    },
    FetchFailed {
        attempts: u32,
        detail: String,
    },
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchOutcome::Fetched { .. })
    }
}

/// Explicit handle to an activated conda environment.
///
/// Each step renders its own activation preamble from the handle, so no
/// shell state leaks between steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvHandle {
    pub prefix: PathBuf,
    pub environment: String,
}

impl EnvHandle {
    pub fn new(prefix: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            environment: environment.into(),
        }
    }

    /// Shell integration script shipped with the installation.
    pub fn conda_sh(&self) -> PathBuf {
        self.prefix.join("etc").join("profile.d").join("conda.sh")
    }

    pub fn conda_bin(&self) -> PathBuf {
        self.prefix.join("bin").join("conda")
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-environment state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    pub schema: String,

    /// Environment name (descriptor `name`)
    pub name: String,

    /// Python selector of the last run
    #[serde(default)]
    pub python: Option<String>,

    /// Expanded install prefix
    pub prefix: String,

    pub generated_at: String,

    pub generator: String,

    pub blake3_version: String,

    pub steps: IndexMap<Step, StepLock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLock {
    pub status: StepStatus,

    #[serde(default)]
    pub applied_at: Option<String>,

    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 of the step's desired state
    pub hash: String,

    /// Why the step was skipped or failed
    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub details: IndexMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Converged,
    Failed,
    Skipped,
    Unknown,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "CONVERGED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlannedStep {
    pub step: Step,
    pub action: PlanAction,
    pub description: String,
    /// Desired-state hash recorded in the lock on success
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub name: String,
    pub steps: Vec<PlannedStep>,
    pub to_create: u32,
    pub to_update: u32,
    pub unchanged: u32,
}

impl ExecutionPlan {
    pub fn action(&self, step: Step) -> PlanAction {
        self.steps
            .iter()
            .find(|p| p.step == step)
            .map(|p| p.action)
            .unwrap_or(PlanAction::NoOp)
    }
}

// ============================================================================
// Provenance events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ProvisionStarted {
        name: String,
        run_id: String,
        python: String,
        condaprov_version: String,
    },
    StepStarted {
        step: Step,
        action: String,
    },
    StepConverged {
        step: Step,
        duration_seconds: f64,
        hash: String,
    },
    StepSkipped {
        step: Step,
        reason: String,
    },
    StepFailed {
        step: Step,
        error: String,
    },
    FetchFailed {
        url: String,
        attempts: u32,
        detail: String,
    },
    ProvisionCompleted {
        name: String,
        run_id: String,
        steps_converged: u32,
        steps_unchanged: u32,
        steps_skipped: u32,
        steps_failed: u32,
        masked: bool,
        total_seconds: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Run report
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Converged,
    Unchanged,
    Skipped { reason: String },
    Failed { error: String, exit_code: Option<i32> },
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: Step,
    pub outcome: StepOutcome,
    pub duration: Duration,
}

/// Outcome of a provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub name: String,
    pub run_id: String,
    pub dry_run: bool,
    /// The plan a dry run stopped at
    pub plan: Option<ExecutionPlan>,
    pub steps: Vec<StepReport>,
    /// Where the installer is (or would be) downloaded
    pub artifact: PathBuf,
    pub fetch: Option<FetchOutcome>,
    pub env: Option<EnvHandle>,
    /// A failed download was downgraded to success by policy
    pub masked: bool,
    pub total_duration: Duration,
}

impl ProvisionReport {
    fn count(&self, pred: impl Fn(&StepOutcome) -> bool) -> u32 {
        self.steps.iter().filter(|s| pred(&s.outcome)).count() as u32
    }

    pub fn converged(&self) -> u32 {
        self.count(|o| matches!(o, StepOutcome::Converged))
    }

    pub fn unchanged(&self) -> u32 {
        self.count(|o| matches!(o, StepOutcome::Unchanged))
    }

    pub fn skipped(&self) -> u32 {
        self.count(|o| matches!(o, StepOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> u32 {
        self.count(|o| matches!(o, StepOutcome::Failed { .. }))
    }

    pub fn outcome(&self, step: Step) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.outcome)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse_full() {
        let yaml = r#"
version: "1.0"
name: psi4-ci
python: "3.9"
environment: base
installer:
  url: https://mirror.example.org/Miniconda3-latest-Linux-x86_64.sh
  file: installer.sh
  tries: 5
  prefix: /opt/conda
install:
  channel: conda-forge
  packages: [psi4, libint]
upgrade:
  tool: conda
  packages: [numpy, scipy]
policy:
  on_fetch_failure: continue
  event_log: false
"#;
        let config: ProvisionConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.python.as_deref(), Some("3.9"));
        assert_eq!(config.installer.tries, 5);
        assert_eq!(config.installer.prefix, "/opt/conda");
        assert_eq!(config.install.packages, vec!["psi4", "libint"]);
        assert_eq!(config.upgrade.tool, UpgradeTool::Conda);
        assert_eq!(config.policy.on_fetch_failure, FetchFailurePolicy::Continue);
        assert!(!config.policy.event_log);
        assert!(config.policy.lock_file);
    }

    #[test]
    fn test_config_minimal_uses_action_defaults() {
        let yaml = r#"
version: "1.0"
name: minimal
"#;
        let config: ProvisionConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.installer.url, DEFAULT_INSTALLER_URL);
        assert_eq!(config.installer.file, "miniconda.sh");
        assert_eq!(config.installer.tries, 3);
        assert_eq!(config.installer.prefix, "~/miniconda");
        assert_eq!(config.environment, "base");
        assert_eq!(config.install.channel, "psi4");
        assert_eq!(config.install.packages, vec!["psi4"]);
        assert_eq!(config.upgrade.tool, UpgradeTool::Pip);
        assert_eq!(config.upgrade.packages, vec!["numpy"]);
        assert_eq!(config.policy.on_fetch_failure, FetchFailurePolicy::Abort);
    }

    #[test]
    fn test_step_order_and_display() {
        let names: Vec<String> = Step::ALL.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec!["fetch", "install", "activate", "install-packages", "upgrade"]
        );
        assert!(!Step::Fetch.depends_on_fetch());
        assert!(Step::Upgrade.depends_on_fetch());
    }

    #[test]
    fn test_env_handle_paths() {
        let h = EnvHandle::new("/home/ci/miniconda", "base");
        assert_eq!(
            h.conda_sh(),
            PathBuf::from("/home/ci/miniconda/etc/profile.d/conda.sh")
        );
        assert_eq!(h.conda_bin(), PathBuf::from("/home/ci/miniconda/bin/conda"));
    }

    #[test]
    fn test_state_lock_roundtrip_keeps_step_order() {
        let mut steps = IndexMap::new();
        for step in [Step::Fetch, Step::Install, Step::Upgrade] {
            steps.insert(
                step,
                StepLock {
                    status: StepStatus::Converged,
                    applied_at: Some("2026-10-16T09:00:00Z".to_string()),
                    duration_seconds: Some(1.0),
                    hash: "blake3:abc".to_string(),
                    reason: None,
                    details: IndexMap::new(),
                },
            );
        }
        let lock = StateLock {
            schema: "1.0".to_string(),
            name: "psi4".to_string(),
            python: Some("3.9".to_string()),
            prefix: "/home/ci/miniconda".to_string(),
            generated_at: "2026-10-16T09:00:00Z".to_string(),
            generator: "condaprov 0.3.0".to_string(),
            blake3_version: "1.8".to_string(),
            steps,
        };
        let yaml = serde_yaml_ng::to_string(&lock).unwrap();
        assert!(yaml.contains("fetch:"));
        let back: StateLock = serde_yaml_ng::from_str(&yaml).unwrap();
        let keys: Vec<_> = back.steps.keys().copied().collect();
        assert_eq!(keys, vec![Step::Fetch, Step::Install, Step::Upgrade]);
    }

    #[test]
    fn test_provenance_event_serde() {
        let event = ProvenanceEvent::StepSkipped {
            step: Step::InstallPackages,
            reason: "installer was not fetched".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"step_skipped\""));
        assert!(json.contains("\"step\":\"install-packages\""));
    }

    #[test]
    fn test_report_counts() {
        let report = ProvisionReport {
            name: "psi4".to_string(),
            run_id: "r-1".to_string(),
            dry_run: false,
            plan: None,
            steps: vec![
                StepReport {
                    step: Step::Fetch,
                    outcome: StepOutcome::Failed {
                        error: "404".to_string(),
                        exit_code: Some(8),
                    },
                    duration: Duration::ZERO,
                },
                StepReport {
                    step: Step::Install,
                    outcome: StepOutcome::Skipped {
                        reason: "x".to_string(),
                    },
                    duration: Duration::ZERO,
                },
            ],
            artifact: PathBuf::from("/work/miniconda.sh"),
            fetch: None,
            env: None,
            masked: false,
            total_duration: Duration::ZERO,
        };
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.converged(), 0);
        assert!(matches!(
            report.outcome(Step::Install),
            Some(StepOutcome::Skipped { .. })
        ));
    }
}
