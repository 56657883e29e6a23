//! Plan generation: diff desired steps against the lock and the install prefix.

use super::selector::PythonSelector;
use super::types::*;
use crate::provenance::hasher;
use std::path::Path;

/// Generate an execution plan for the five steps.
///
/// Fetch and install are skipped when `<prefix>/bin/conda` already exists.
/// Package steps are skipped when the lock holds a converged entry with
/// the same desired-state hash, and upgrade always re-runs after a package
/// install. `force` re-runs everything.
pub fn plan(
    config: &ProvisionConfig,
    python: &PythonSelector,
    prefix: &Path,
    lock: Option<&StateLock>,
    force: bool,
) -> ExecutionPlan {
    let conda_present = prefix.join("bin").join("conda").exists();

    let mut steps: Vec<PlannedStep> = Step::ALL
        .iter()
        .map(|&step| {
            let hash = hash_desired_state(step, config, python, prefix);
            let action = determine_action(step, &hash, lock, conda_present, force);
            PlannedStep {
                step,
                action,
                description: String::new(),
                hash,
            }
        })
        .collect();

    // The upgrade pass follows every package install; a fresh solve can
    // leave the upgraded packages behind.
    let packages_action = steps
        .iter()
        .find(|p| p.step == Step::InstallPackages)
        .map(|p| p.action)
        .unwrap_or(PlanAction::NoOp);
    if packages_action != PlanAction::NoOp {
        if let Some(upgrade) = steps
            .iter_mut()
            .find(|p| p.step == Step::Upgrade && p.action == PlanAction::NoOp)
        {
            upgrade.action = PlanAction::Update;
        }
    }

    // Activation runs whenever a later step needs the environment.
    let downstream_runs = steps.iter().any(|p| {
        matches!(p.step, Step::InstallPackages | Step::Upgrade) && p.action != PlanAction::NoOp
    });
    let install_action = steps
        .iter()
        .find(|p| p.step == Step::Install)
        .map(|p| p.action)
        .unwrap_or(PlanAction::NoOp);
    if let Some(activate) = steps.iter_mut().find(|p| p.step == Step::Activate) {
        activate.action = match (downstream_runs, install_action) {
            (false, _) => PlanAction::NoOp,
            (true, PlanAction::Create) => PlanAction::Create,
            (true, _) => PlanAction::Update,
        };
    }

    let (mut to_create, mut to_update, mut unchanged) = (0u32, 0u32, 0u32);
    for p in &mut steps {
        p.description = describe_action(p.step, p.action, config, python, prefix);
        match p.action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::NoOp => unchanged += 1,
        }
    }

    ExecutionPlan {
        name: config.name.clone(),
        steps,
        to_create,
        to_update,
        unchanged,
    }
}

fn determine_action(
    step: Step,
    desired_hash: &str,
    lock: Option<&StateLock>,
    conda_present: bool,
    force: bool,
) -> PlanAction {
    let previous = lock.and_then(|l| l.steps.get(&step));

    match step {
        Step::Fetch | Step::Install => {
            if conda_present && !force {
                PlanAction::NoOp
            } else if previous.is_some() {
                PlanAction::Update
            } else {
                PlanAction::Create
            }
        }
        // Recomputed from downstream steps in `plan`.
        Step::Activate => PlanAction::NoOp,
        Step::InstallPackages | Step::Upgrade => match previous {
            Some(sl)
                if !force
                    && conda_present
                    && sl.status == StepStatus::Converged
                    && sl.hash == desired_hash =>
            {
                PlanAction::NoOp
            }
            Some(_) => PlanAction::Update,
            None => PlanAction::Create,
        },
    }
}

/// Compute a hash of a step's desired state for comparison with the lock.
pub fn hash_desired_state(
    step: Step,
    config: &ProvisionConfig,
    python: &PythonSelector,
    prefix: &Path,
) -> String {
    let step_name = step.to_string();
    let prefix = prefix.display().to_string();
    let tries = config.installer.tries.to_string();
    let tool = config.upgrade.tool.to_string();

    let mut components: Vec<&str> = vec![step_name.as_str()];
    match step {
        Step::Fetch => {
            components.extend([
                config.installer.url.as_str(),
                config.installer.file.as_str(),
                tries.as_str(),
            ]);
        }
        Step::Install => {
            components.extend([config.installer.url.as_str(), prefix.as_str()]);
        }
        Step::Activate => {
            components.extend([prefix.as_str(), config.environment.as_str()]);
        }
        Step::InstallPackages => {
            components.extend([
                prefix.as_str(),
                config.environment.as_str(),
                config.install.channel.as_str(),
                python.as_str(),
            ]);
            components.extend(config.install.packages.iter().map(String::as_str));
        }
        Step::Upgrade => {
            components.extend([
                prefix.as_str(),
                config.environment.as_str(),
                tool.as_str(),
                python.as_str(),
            ]);
            components.extend(config.upgrade.packages.iter().map(String::as_str));
        }
    }

    hasher::composite_hash(&components)
}

fn describe_action(
    step: Step,
    action: PlanAction,
    config: &ProvisionConfig,
    python: &PythonSelector,
    prefix: &Path,
) -> String {
    let what = match step {
        Step::Fetch => format!(
            "download {} ({} tries)",
            config.installer.url, config.installer.tries
        ),
        Step::Install => format!("install Miniconda into {}", prefix.display()),
        Step::Activate => format!("activate environment '{}'", config.environment),
        Step::InstallPackages => format!(
            "conda install -c {} {} python={}",
            config.install.channel,
            config.install.packages.join(" "),
            python
        ),
        Step::Upgrade => format!(
            "{} upgrade {}",
            config.upgrade.tool,
            config.upgrade.packages.join(" ")
        ),
    };
    match action {
        PlanAction::Create => format!("{}: {}", step, what),
        PlanAction::Update => format!("{}: {} (re-run)", step, what),
        PlanAction::NoOp => format!("{}: no changes", step),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state;
    use indexmap::IndexMap;

    fn sel() -> PythonSelector {
        PythonSelector::parse("3.9").unwrap()
    }

    fn fake_install(prefix: &Path) {
        std::fs::create_dir_all(prefix.join("bin")).unwrap();
        std::fs::write(prefix.join("bin").join("conda"), "#!/bin/sh\n").unwrap();
    }

    fn converged_lock(config: &ProvisionConfig, prefix: &Path) -> StateLock {
        let mut lock = state::new_lock(&config.name, prefix);
        for step in Step::ALL {
            lock.steps.insert(
                step,
                StepLock {
                    status: StepStatus::Converged,
                    applied_at: None,
                    duration_seconds: None,
                    hash: hash_desired_state(step, config, &sel(), prefix),
                    reason: None,
                    details: IndexMap::new(),
                },
            );
        }
        lock
    }

    #[test]
    fn test_fresh_machine_creates_everything() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProvisionConfig::default();
        let p = plan(&config, &sel(), &dir.path().join("miniconda"), None, false);
        assert_eq!(p.to_create, 5);
        assert_eq!(p.unchanged, 0);
        assert!(p.steps.iter().all(|s| s.action == PlanAction::Create));
        let order: Vec<Step> = p.steps.iter().map(|s| s.step).collect();
        assert_eq!(order, Step::ALL.to_vec());
    }

    #[test]
    fn test_second_run_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("miniconda");
        fake_install(&prefix);
        let config = ProvisionConfig::default();
        let lock = converged_lock(&config, &prefix);
        let p = plan(&config, &sel(), &prefix, Some(&lock), false);
        assert_eq!(p.unchanged, 5, "{:?}", p.steps);
    }

    #[test]
    fn test_existing_install_without_lock_skips_fetch_only() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("miniconda");
        fake_install(&prefix);
        let config = ProvisionConfig::default();
        let p = plan(&config, &sel(), &prefix, None, false);
        assert_eq!(p.action(Step::Fetch), PlanAction::NoOp);
        assert_eq!(p.action(Step::Install), PlanAction::NoOp);
        assert_eq!(p.action(Step::Activate), PlanAction::Update);
        assert_eq!(p.action(Step::InstallPackages), PlanAction::Create);
        assert_eq!(p.action(Step::Upgrade), PlanAction::Create);
    }

    #[test]
    fn test_python_change_reinstalls_packages() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("miniconda");
        fake_install(&prefix);
        let config = ProvisionConfig::default();
        let lock = converged_lock(&config, &prefix);
        let other = PythonSelector::parse("3.10").unwrap();
        let p = plan(&config, &other, &prefix, Some(&lock), false);
        assert_eq!(p.action(Step::Fetch), PlanAction::NoOp);
        assert_eq!(p.action(Step::InstallPackages), PlanAction::Update);
        assert_eq!(p.action(Step::Activate), PlanAction::Update);
    }

    #[test]
    fn test_force_reruns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("miniconda");
        fake_install(&prefix);
        let config = ProvisionConfig::default();
        let lock = converged_lock(&config, &prefix);
        let p = plan(&config, &sel(), &prefix, Some(&lock), true);
        assert_eq!(p.unchanged, 0);
        assert_eq!(p.to_update, 5);
    }

    #[test]
    fn test_failed_step_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("miniconda");
        fake_install(&prefix);
        let config = ProvisionConfig::default();
        let mut lock = converged_lock(&config, &prefix);
        lock.steps[&Step::Upgrade].status = StepStatus::Failed;
        let p = plan(&config, &sel(), &prefix, Some(&lock), false);
        assert_eq!(p.action(Step::InstallPackages), PlanAction::NoOp);
        assert_eq!(p.action(Step::Upgrade), PlanAction::Update);
    }

    #[test]
    fn test_channel_change_reruns_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("miniconda");
        fake_install(&prefix);
        let config = ProvisionConfig::default();
        let lock = converged_lock(&config, &prefix);

        let mut changed = config.clone();
        changed.install.channel = "conda-forge".to_string();
        changed.install.packages.push("scipy".to_string());
        let p = plan(&changed, &sel(), &prefix, Some(&lock), false);
        assert_eq!(p.action(Step::InstallPackages), PlanAction::Update);
        assert_eq!(p.action(Step::Upgrade), PlanAction::Update);
        assert_eq!(p.action(Step::Activate), PlanAction::Update);
        assert_eq!(p.unchanged, 2);
    }

    #[test]
    fn test_failed_package_install_retries_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("miniconda");
        fake_install(&prefix);
        let config = ProvisionConfig::default();
        let mut lock = converged_lock(&config, &prefix);
        // Upgrade keeps its converged entry when the install before it fails
        lock.steps[&Step::InstallPackages].status = StepStatus::Failed;
        let p = plan(&config, &sel(), &prefix, Some(&lock), false);
        assert_eq!(p.action(Step::InstallPackages), PlanAction::Update);
        assert_eq!(p.action(Step::Upgrade), PlanAction::Update);
    }

    #[test]
    fn test_hash_depends_on_python() {
        let config = ProvisionConfig::default();
        let prefix = Path::new("/opt/conda");
        let a = hash_desired_state(Step::InstallPackages, &config, &sel(), prefix);
        let b = hash_desired_state(
            Step::InstallPackages,
            &config,
            &PythonSelector::parse("3.10").unwrap(),
            prefix,
        );
        assert_ne!(a, b);
        // Fetch does not care about python
        let f1 = hash_desired_state(Step::Fetch, &config, &sel(), prefix);
        let f2 = hash_desired_state(
            Step::Fetch,
            &config,
            &PythonSelector::parse("3.10").unwrap(),
            prefix,
        );
        assert_eq!(f1, f2);
    }

    #[test]
    fn test_descriptions() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProvisionConfig::default();
        let p = plan(&config, &sel(), &dir.path().join("miniconda"), None, false);
        assert!(p.steps[0].description.contains("download https://repo.anaconda.com"));
        assert!(p.steps[3]
            .description
            .contains("conda install -c psi4 psi4 python=3.9"));
        assert!(p.steps[4].description.contains("pip upgrade numpy"));
    }
}
