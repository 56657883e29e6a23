//! Installer handler: download the Miniconda installer and run it in batch mode.

use super::{quote, quote_path};
use crate::core::types::InstallerSpec;
use std::path::{Path, PathBuf};

/// Marker printed on stderr when the download gives up.
pub const FETCH_FAILED_MARKER: &str = "condaprov: download failed";

/// Generate shell that downloads the installer to `artifact`.
///
/// Downloads land in `<artifact>.part` and are renamed only on success,
/// so a failed download never leaves a file at `artifact`.
pub fn fetch_script(spec: &InstallerSpec, artifact: &Path) -> String {
    format!(
        "set -euo pipefail\n{}",
        download_block(spec, artifact, "exit \"$rc\"")
    )
}

/// The `wget` block shared by [`fetch_script`] and the single-script
/// rendering. `on_failure` runs after the diagnostic; `$rc` holds the
/// wget exit code.
pub fn download_block(spec: &InstallerSpec, artifact: &Path, on_failure: &str) -> String {
    let target = quote_path(artifact);
    let partial = quote_path(&partial_path(artifact));
    let url = quote(&spec.url);
    format!(
        "rm -f {partial}\n\
         if wget --tries={tries} --no-verbose -O {partial} {url}; then\n\
         \x20 mv -f {partial} {target}\n\
         else\n\
         \x20 rc=$?\n\
         \x20 rm -f {partial}\n\
         \x20 echo \"{marker}: \"{url} >&2\n\
         \x20 {on_failure}\n\
         fi",
        tries = spec.tries,
        marker = FETCH_FAILED_MARKER,
    )
}

/// Temporary download location for `artifact`.
pub fn partial_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Generate shell that runs the installer non-interactively and deletes it.
///
/// `update` passes `-u` so an existing prefix is upgraded in place rather
/// than rejected.
pub fn install_script(artifact: &Path, prefix: &Path, update: bool) -> String {
    format!(
        "set -euo pipefail\n\
         test -f {artifact}\n\
         {run}\n\
         # Postcondition: conda is installed\n\
         test -x {conda}",
        artifact = quote_path(artifact),
        run = run_installer_lines(artifact, prefix, update),
        conda = quote_path(&prefix.join("bin").join("conda")),
    )
}

/// Batch-mode installer invocation followed by artifact removal.
pub fn run_installer_lines(artifact: &Path, prefix: &Path, update: bool) -> String {
    let artifact = quote_path(artifact);
    let update_flag = if update { " -u" } else { "" };
    format!(
        "bash {artifact} -b{update_flag} -p {prefix}\nrm -f {artifact}",
        prefix = quote_path(prefix),
    )
}

/// Generate shell to query whether an installation exists at `prefix`.
pub fn state_query_script(prefix: &Path) -> String {
    let conda = quote_path(&prefix.join("bin").join("conda"));
    format!(
        "if [ -x {conda} ]; then {conda} --version; else echo 'conda=MISSING'; fi"
    )
}
