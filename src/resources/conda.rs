//! Conda handler: activation, channel installs, upgrades, environment queries.
//!
//! All scripts start from [`preamble`], which rebuilds the activated
//! environment from an [`EnvHandle`]. `set -u` is left off because
//! conda's shell functions read unset variables.

use super::{quote, quote_path};
use crate::core::types::{EnvHandle, InstallSpec, UpgradeSpec, UpgradeTool};

/// Prefix emitted by the activation probe before the active prefix.
pub const ACTIVE_PREFIX_MARKER: &str = "active_prefix=";

/// Shell lines that initialize conda and activate the handle's environment.
pub fn preamble(handle: &EnvHandle) -> String {
    format!(
        "set -eo pipefail\n\
         source {conda_sh}\n\
         conda activate {env}",
        conda_sh = quote_path(&handle.conda_sh()),
        env = quote(&handle.environment),
    )
}

/// Activate and report the active prefix.
pub fn activate_script(handle: &EnvHandle) -> String {
    format!(
        "{}\necho \"{}$CONDA_PREFIX\"",
        preamble(handle),
        ACTIVE_PREFIX_MARKER
    )
}

/// Extract the active prefix from the activation probe's stdout.
pub fn parse_active_prefix(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .rev()
        .find_map(|l| l.trim().strip_prefix(ACTIVE_PREFIX_MARKER))
        .map(str::to_string)
        .filter(|p| !p.is_empty())
}

/// Install packages from the channel, pinning the interpreter.
/// `python_spec` is a full match spec such as `python=3.9`.
pub fn install_packages_script(handle: &EnvHandle, spec: &InstallSpec, python_spec: &str) -> String {
    format!("{}\n{}", preamble(handle), install_command(spec, python_spec))
}

pub fn install_command(spec: &InstallSpec, python_spec: &str) -> String {
    let packages: Vec<String> = spec.packages.iter().map(|p| quote(p)).collect();
    format!(
        "conda install -y -c {} {} {}",
        quote(&spec.channel),
        packages.join(" "),
        quote(python_spec),
    )
}

/// Upgrade packages to their latest release.
pub fn upgrade_script(handle: &EnvHandle, spec: &UpgradeSpec) -> String {
    let cmd = upgrade_command(spec).unwrap_or_else(|| "true".to_string());
    format!("{}\n{}", preamble(handle), cmd)
}

/// `None` when there is nothing to upgrade.
pub fn upgrade_command(spec: &UpgradeSpec) -> Option<String> {
    if spec.packages.is_empty() {
        return None;
    }
    let packages: Vec<String> = spec.packages.iter().map(|p| quote(p)).collect();
    let joined = packages.join(" ");
    Some(match spec.tool {
        UpgradeTool::Pip => format!("python -m pip install --upgrade {}", joined),
        UpgradeTool::Conda => format!("conda update -y {}", joined),
    })
}

/// Read-only query: interpreter version plus one `name=installed|MISSING`
/// line per package.
pub fn verify_query_script(handle: &EnvHandle, packages: &[String]) -> String {
    let mut lines = vec![
        preamble(handle),
        "python -c 'import platform; print(\"python=\" + platform.python_version())'".to_string(),
    ];
    for p in packages {
        let q = quote(p);
        let anchored = quote(&format!("^{} ", p));
        lines.push(format!(
            "if conda list -f {q} 2>/dev/null | grep {anchored} >/dev/null; then echo {ok}; else echo {missing}; fi",
            ok = quote(&format!("{}=installed", p)),
            missing = quote(&format!("{}=MISSING", p)),
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::selector::PythonSelector;

    fn handle() -> EnvHandle {
        EnvHandle::new("/home/ci/miniconda", "base")
    }

    #[test]
    fn test_preamble_sources_and_activates() {
        let p = preamble(&handle());
        assert!(p.contains("source '/home/ci/miniconda/etc/profile.d/conda.sh'"));
        assert!(p.contains("conda activate 'base'"));
        assert!(!p.contains("set -u"));
    }

    #[test]
    fn test_activate_reports_prefix() {
        let s = activate_script(&handle());
        assert!(s.contains("echo \"active_prefix=$CONDA_PREFIX\""));
    }

    #[test]
    fn test_parse_active_prefix() {
        let out = "some banner\nactive_prefix=/home/ci/miniconda\n";
        assert_eq!(
            parse_active_prefix(out).as_deref(),
            Some("/home/ci/miniconda")
        );
        assert_eq!(parse_active_prefix("active_prefix=\n"), None);
        assert_eq!(parse_active_prefix("nothing"), None);
    }

    #[test]
    fn test_install_pins_python() {
        let python = PythonSelector::parse("3.9").unwrap();
        let s = install_packages_script(&handle(), &InstallSpec::default(), &python.match_spec());
        assert!(s.contains("conda install -y -c 'psi4' 'psi4' 'python=3.9'"));
    }

    #[test]
    fn test_install_range_selector_stays_one_word() {
        let python = PythonSelector::parse(">=3.8,<3.11").unwrap();
        let s = install_packages_script(&handle(), &InstallSpec::default(), &python.match_spec());
        assert!(s.contains("'python=>=3.8,<3.11'"));
    }

    #[test]
    fn test_upgrade_pip() {
        let s = upgrade_script(&handle(), &UpgradeSpec::default());
        assert!(s.contains("python -m pip install --upgrade 'numpy'"));
    }

    #[test]
    fn test_upgrade_conda() {
        let spec = UpgradeSpec {
            tool: UpgradeTool::Conda,
            packages: vec!["numpy".to_string(), "scipy".to_string()],
        };
        let s = upgrade_script(&handle(), &spec);
        assert!(s.contains("conda update -y 'numpy' 'scipy'"));
    }

    #[test]
    fn test_upgrade_nothing() {
        let spec = UpgradeSpec {
            tool: UpgradeTool::Pip,
            packages: vec![],
        };
        assert!(upgrade_command(&spec).is_none());
        let s = upgrade_script(&handle(), &spec);
        assert!(!s.contains("pip install"));
        assert!(s.ends_with("true"));
    }

    #[test]
    fn test_verify_query_lines() {
        let s = verify_query_script(&handle(), &["psi4".to_string(), "numpy".to_string()]);
        assert!(s.contains("python=\" + platform.python_version()"));
        assert!(s.contains("conda list -f 'psi4'"));
        assert!(s.contains("grep '^psi4 '"));
        assert!(s.contains("echo 'numpy=MISSING'"));
    }
}
