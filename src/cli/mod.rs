//! CLI subcommands: init, validate, plan, provision, script, action,
//! verify, status, completions.

use crate::core::executor::{self, ProvisionOptions};
use crate::core::parser::{self, DEFAULT_CONFIG_FILE};
use crate::core::{codegen, planner, preflight, state, types};
use crate::error::{ProvisionError, Result};
use crate::logging::LogFormat;
use crate::provenance::verify;
use crate::transport::LocalTransport;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "condaprov",
    version,
    about = "Provision Miniconda and a pinned package set, step by step, with a lock file and provenance log"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter condaprov.yaml
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate condaprov.yaml without touching the machine
    Validate {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,
    },

    /// Show which steps would run
    Plan {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,

        /// Interpreter version selector (overrides the descriptor)
        #[arg(short, long)]
        python: Option<String>,

        /// Plan as if every step had to re-run
        #[arg(long)]
        force: bool,

        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Fetch, install, activate, install packages, upgrade
    Provision {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,

        /// Interpreter version selector (overrides the descriptor)
        #[arg(short, long)]
        python: Option<String>,

        /// Re-run every step
        #[arg(long)]
        force: bool,

        /// Show the plan without running anything
        #[arg(long)]
        dry_run: bool,

        /// Directory the installer is downloaded into
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,

        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Skip the platform and tool checks
        #[arg(long)]
        skip_preflight: bool,
    },

    /// Print the whole sequence as one bash script
    Script {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,

        /// Interpreter version selector (overrides the descriptor)
        #[arg(short, long)]
        python: Option<String>,
    },

    /// Emit a composite action (action.yml) running the sequence
    Action {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,

        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check the live environment against the descriptor
    Verify {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        file: PathBuf,

        /// Interpreter version selector (overrides the descriptor)
        #[arg(short, long)]
        python: Option<String>,

        /// Directory the installer was downloaded into
        #[arg(long, default_value = ".")]
        work_dir: PathBuf,
    },

    /// Show recorded state from lock files
    Status {
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Show a single environment
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan {
            file,
            python,
            force,
            state_dir,
        } => cmd_plan(&file, python.as_deref(), &state_dir, force),
        Commands::Provision {
            file,
            python,
            force,
            dry_run,
            work_dir,
            state_dir,
            skip_preflight,
        } => cmd_provision(
            &file,
            python.as_deref(),
            &work_dir,
            &state_dir,
            force,
            dry_run,
            skip_preflight,
        ),
        Commands::Script { file, python } => cmd_script(&file, python.as_deref()),
        Commands::Action { file, output } => cmd_action(&file, output.as_deref()),
        Commands::Verify {
            file,
            python,
            work_dir,
        } => cmd_verify(&file, python.as_deref(), &work_dir),
        Commands::Status { state_dir, name } => cmd_status(&state_dir, name.as_deref()),
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "condaprov",
                &mut std::io::stdout(),
            );
            Ok(())
        }
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
name: psi4
description: "Miniconda with PSI4 from the psi4 channel"

# Interpreter selector; `--python` overrides it
python: "3.9"
environment: base

installer:
  url: https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-x86_64.sh
  file: miniconda.sh
  tries: 3
  prefix: ~/miniconda

install:
  channel: psi4
  packages: [psi4]

upgrade:
  tool: pip
  packages: [numpy]

policy:
  on_fetch_failure: abort
  event_log: true
  lock_file: true
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join(DEFAULT_CONFIG_FILE);
    if config_path.exists() {
        return Err(ProvisionError::Config(format!(
            "{} already exists",
            config_path.display()
        )));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| ProvisionError::io(&state_dir, e))?;
    std::fs::write(&config_path, INIT_TEMPLATE).map_err(|e| ProvisionError::io(&config_path, e))?;

    println!("Initialized condaprov project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<()> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);

    if errors.is_empty() {
        println!(
            "OK: {} ({} package(s) from {}, {} to upgrade)",
            config.name,
            config.install.packages.len(),
            config.install.channel,
            config.upgrade.packages.len()
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(ProvisionError::Validation(errors.len()))
    }
}

/// Load the descriptor (defaults when absent) and reject invalid ones.
fn load_and_validate(file: &Path) -> Result<types::ProvisionConfig> {
    let config = parser::load_or_default(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(ProvisionError::Validation(errors.len()))
}

fn cmd_plan(file: &Path, python: Option<&str>, state_dir: &Path, force: bool) -> Result<()> {
    let config = load_and_validate(file)?;
    let python = parser::resolve_python(&config, python)?;
    let prefix = parser::expand_home(&config.installer.prefix)?;
    let lock = state::load_lock(state_dir, &config.name)?;

    let plan = planner::plan(&config, &python, &prefix, lock.as_ref(), force);
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} steps)", plan.name, plan.steps.len());
    println!();
    for planned in &plan.steps {
        let symbol = match planned.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, planned.description);
    }
    println!();
    println!(
        "Plan: {} to add, {} to change, {} unchanged.",
        plan.to_create, plan.to_update, plan.unchanged
    );
}

fn cmd_provision(
    file: &Path,
    python: Option<&str>,
    work_dir: &Path,
    state_dir: &Path,
    force: bool,
    dry_run: bool,
    skip_preflight: bool,
) -> Result<()> {
    let config = load_and_validate(file)?;
    let python = parser::resolve_python(&config, python)?;

    if skip_preflight {
        tracing::warn!("preflight checks skipped");
    } else if !dry_run {
        preflight::run()?;
    }

    // A dry run leaves the filesystem alone, work directory included.
    let work_dir = if dry_run {
        work_dir.to_path_buf()
    } else {
        resolve_work_dir(work_dir)?
    };
    let opts = ProvisionOptions {
        config: &config,
        python: &python,
        work_dir: &work_dir,
        state_dir,
        force,
        dry_run,
    };
    let transport = LocalTransport::in_dir(&work_dir);
    let report = executor::provision(&opts, &transport)?;
    if let Some(ref plan) = report.plan {
        print_plan(plan);
        println!();
        println!("Dry run: nothing executed.");
        return Ok(());
    }
    print_report(&report);

    match executor::run_error(&report, &config) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Scripts run inside the work directory, so artifact paths must not be
/// relative to ours.
fn resolve_work_dir(work_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(work_dir).map_err(|e| ProvisionError::io(work_dir, e))?;
    std::fs::canonicalize(work_dir).map_err(|e| ProvisionError::io(work_dir, e))
}

fn print_report(report: &types::ProvisionReport) {
    for s in &report.steps {
        let line = match &s.outcome {
            types::StepOutcome::Converged => {
                format!("converged ({:.1}s)", s.duration.as_secs_f64())
            }
            types::StepOutcome::Unchanged => "unchanged".to_string(),
            types::StepOutcome::Skipped { reason } => format!("SKIPPED: {}", reason),
            types::StepOutcome::Failed { error, exit_code } => match exit_code {
                Some(code) => format!("FAILED (exit {}): {}", code, error),
                None => format!("FAILED: {}", error),
            },
        };
        println!("  {:<17} {}", s.step, line);
    }
    println!();

    if report.failed() > 0 && !report.masked {
        println!(
            "Provision completed with errors: {} converged, {} unchanged, {} skipped, {} FAILED",
            report.converged(),
            report.unchanged(),
            report.skipped(),
            report.failed()
        );
        return;
    }
    if report.masked {
        println!(
            "WARNING: installer download failed; {} step(s) skipped and the run reported as success",
            report.skipped()
        );
    }
    println!(
        "Provision complete: {} converged, {} unchanged ({:.1}s).",
        report.converged(),
        report.unchanged(),
        report.total_duration.as_secs_f64()
    );
}

fn cmd_script(file: &Path, python: Option<&str>) -> Result<()> {
    let config = load_and_validate(file)?;
    let python = parser::resolve_python(&config, python)?;
    print!("{}", codegen::render_action_script(&config, python.as_str()));
    Ok(())
}

fn cmd_action(file: &Path, output: Option<&Path>) -> Result<()> {
    let config = load_and_validate(file)?;
    let yaml = codegen::render_composite_action(&config)?;
    match output {
        Some(path) => {
            std::fs::write(path, &yaml).map_err(|e| ProvisionError::io(path, e))?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", yaml),
    }
    Ok(())
}

fn cmd_verify(file: &Path, python: Option<&str>, work_dir: &Path) -> Result<()> {
    let config = load_and_validate(file)?;
    let python = parser::resolve_python(&config, python)?;
    let prefix = parser::expand_home(&config.installer.prefix)?;
    let handle = types::EnvHandle::new(&prefix, config.environment.as_str());
    if !handle.conda_bin().exists() {
        return Err(ProvisionError::Config(format!(
            "no conda installation at {}",
            prefix.display()
        )));
    }

    let artifact = work_dir.join(&config.installer.file);
    let transport = LocalTransport::new();
    let report = verify::verify(&transport, &handle, &config, &python, &artifact)?;

    println!(
        "python: {}",
        report.python_version.as_deref().unwrap_or("MISSING")
    );
    for (pkg, present) in &report.packages {
        println!("  {}: {}", pkg, if *present { "installed" } else { "MISSING" });
    }
    println!("live hash: {}", report.live_hash);

    if report.is_clean() {
        println!("OK: environment matches {}", config.name);
        return Ok(());
    }
    for f in &report.findings {
        println!("  MISMATCH: {}", f);
    }
    Err(ProvisionError::Verification(report.findings.len()))
}

fn cmd_status(state_dir: &Path, name_filter: Option<&str>) -> Result<()> {
    let mut found = false;

    for name in state::list_environments(state_dir)? {
        if name_filter.is_some_and(|filter| filter != name) {
            continue;
        }
        let Some(lock) = state::load_lock(state_dir, &name)? else {
            continue;
        };
        found = true;
        println!("Environment: {} ({})", lock.name, lock.prefix);
        println!(
            "  Python:    {}",
            lock.python.as_deref().unwrap_or("unknown")
        );
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        for (step, sl) in &lock.steps {
            let duration = sl
                .duration_seconds
                .map(|d| format!(" ({:.2}s)", d))
                .unwrap_or_default();
            let reason = sl
                .reason
                .as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default();
            println!("    {}: {}{}{}", step, sl.status, duration, reason);
        }
        println!();
    }

    if !found {
        println!("No state found. Run `condaprov provision` first.");
    }
    Ok(())
}
