//! Executor: orchestration loop for a provisioning run.
//!
//! expand prefix → load lock → plan → for each step: codegen → transport
//! → hash → lock → events. The fetch step yields a [`FetchOutcome`]; when
//! it is `FetchFailed` every dependent step is skipped and reported.

use super::codegen::{self, StepInputs};
use super::parser;
use super::planner;
use super::selector::PythonSelector;
use super::state;
use super::types::*;
use crate::error::{ProvisionError, Result};
use crate::provenance::{eventlog, hasher, verify};
use crate::resources::{conda, installer};
use crate::transport::Transport;
use indexmap::IndexMap;
use std::path::Path;
use std::time::{Duration, Instant};

/// Reason recorded for steps skipped after a failed download.
pub const NOT_FETCHED: &str = "installer was not fetched";

/// Configuration for a provisioning run.
pub struct ProvisionOptions<'a> {
    pub config: &'a ProvisionConfig,
    pub python: &'a PythonSelector,
    /// Directory the installer is downloaded into
    pub work_dir: &'a Path,
    pub state_dir: &'a Path,
    pub force: bool,
    pub dry_run: bool,
}

/// Shared context for recording step outcomes.
struct RecordCtx<'a> {
    lock: &'a mut StateLock,
    state_dir: &'a Path,
    name: &'a str,
    event_log: bool,
    reports: Vec<StepReport>,
}

impl RecordCtx<'_> {
    fn event(&self, event: ProvenanceEvent) {
        if !self.event_log {
            return;
        }
        if let Err(e) = eventlog::append_event(self.state_dir, self.name, event) {
            tracing::warn!(error = %e, "could not append provenance event");
        }
    }

    fn report(&mut self, step: Step, outcome: StepOutcome, duration: Duration) {
        self.reports.push(StepReport {
            step,
            outcome,
            duration,
        });
    }
}

/// Record a converged step into the lock and event log.
fn record_success(
    ctx: &mut RecordCtx,
    planned: &PlannedStep,
    duration: Duration,
    details: IndexMap<String, String>,
) {
    let secs = duration.as_secs_f64();
    tracing::info!(step = %planned.step, seconds = secs, "step converged");
    ctx.lock.steps.insert(
        planned.step,
        StepLock {
            status: StepStatus::Converged,
            applied_at: Some(eventlog::now_iso8601()),
            duration_seconds: Some(secs),
            hash: planned.hash.clone(),
            reason: None,
            details,
        },
    );
    ctx.event(ProvenanceEvent::StepConverged {
        step: planned.step,
        duration_seconds: secs,
        hash: planned.hash.clone(),
    });
    ctx.report(planned.step, StepOutcome::Converged, duration);
}

/// Record a step failure into the lock and event log.
fn record_failure(
    ctx: &mut RecordCtx,
    step: Step,
    duration: Duration,
    error: String,
    exit_code: Option<i32>,
) {
    tracing::error!(step = %step, exit_code = ?exit_code, error = %error, "step failed");
    ctx.lock.steps.insert(
        step,
        StepLock {
            status: StepStatus::Failed,
            applied_at: Some(eventlog::now_iso8601()),
            duration_seconds: Some(duration.as_secs_f64()),
            hash: String::new(),
            reason: Some(error.clone()),
            details: IndexMap::new(),
        },
    );
    ctx.event(ProvenanceEvent::StepFailed {
        step,
        error: error.clone(),
    });
    ctx.report(step, StepOutcome::Failed { error, exit_code }, duration);
}

/// Record a step that never ran. The previous converged entry, if any,
/// keeps its hash so a later run can still no-op against it.
fn record_skipped(ctx: &mut RecordCtx, step: Step, reason: &str) {
    tracing::warn!(step = %step, reason, "step skipped");
    let converged_before = ctx
        .lock
        .steps
        .get(&step)
        .is_some_and(|sl| sl.status == StepStatus::Converged);
    if !converged_before {
        ctx.lock.steps.insert(
            step,
            StepLock {
                status: StepStatus::Skipped,
                applied_at: Some(eventlog::now_iso8601()),
                duration_seconds: None,
                hash: String::new(),
                reason: Some(reason.to_string()),
                details: IndexMap::new(),
            },
        );
    }
    ctx.event(ProvenanceEvent::StepSkipped {
        step,
        reason: reason.to_string(),
    });
    ctx.report(
        step,
        StepOutcome::Skipped {
            reason: reason.to_string(),
        },
        Duration::ZERO,
    );
}

/// Run the fetch step and turn its output into a [`FetchOutcome`].
fn run_fetch(
    opts: &ProvisionOptions,
    transport: &dyn Transport,
    inputs: &StepInputs,
    planned: &PlannedStep,
    ctx: &mut RecordCtx,
) -> FetchOutcome {
    let started = Instant::now();
    let attempts = opts.config.installer.tries;
    let script = codegen::step_script(Step::Fetch, inputs);
    tracing::debug!(script = %script, "fetch script");

    let detail = match transport.exec(&script) {
        Ok(out) if out.success() && inputs.artifact.is_file() => {
            match hasher::hash_file(inputs.artifact) {
                Ok((hash, bytes)) => {
                    let mut details = IndexMap::new();
                    details.insert("installer_hash".to_string(), hash.clone());
                    details.insert("installer_bytes".to_string(), bytes.to_string());
                    record_success(ctx, planned, started.elapsed(), details);
                    return FetchOutcome::Fetched {
                        path: inputs.artifact.to_path_buf(),
                        hash,
                        bytes,
                    };
                }
                Err(e) => e.to_string(),
            }
        }
        Ok(out) if out.success() => format!(
            "download reported success but {} is absent",
            inputs.artifact.display()
        ),
        Ok(out) => format!("wget exited {}: {}", out.exit_code, out.stderr_tail(3)),
        Err(e) => e.to_string(),
    };

    record_failure(ctx, Step::Fetch, started.elapsed(), detail.clone(), None);
    ctx.event(ProvenanceEvent::FetchFailed {
        url: opts.config.installer.url.clone(),
        attempts,
        detail: detail.clone(),
    });
    FetchOutcome::FetchFailed { attempts, detail }
}

/// Execute the provisioning run.
pub fn provision(opts: &ProvisionOptions, transport: &dyn Transport) -> Result<ProvisionReport> {
    let start = Instant::now();
    let config = opts.config;
    let run_id = eventlog::generate_run_id();

    let prefix = parser::expand_home(&config.installer.prefix)?;
    let artifact = opts.work_dir.join(&config.installer.file);
    let existing = state::load_lock(opts.state_dir, &config.name)?;
    let plan = planner::plan(config, opts.python, &prefix, existing.as_ref(), opts.force);

    let mut report = ProvisionReport {
        name: config.name.clone(),
        run_id: run_id.clone(),
        dry_run: opts.dry_run,
        plan: None,
        steps: Vec::new(),
        artifact: artifact.clone(),
        fetch: None,
        env: None,
        masked: false,
        total_duration: Duration::ZERO,
    };

    if opts.dry_run {
        tracing::info!(
            create = plan.to_create,
            update = plan.to_update,
            unchanged = plan.unchanged,
            "dry run, nothing executed"
        );
        report.plan = Some(plan);
        report.total_duration = start.elapsed();
        return Ok(report);
    }

    let mut lock = existing.unwrap_or_else(|| state::new_lock(&config.name, &prefix));
    lock.python = Some(opts.python.to_string());
    lock.prefix = prefix.display().to_string();

    let mut ctx = RecordCtx {
        lock: &mut lock,
        state_dir: opts.state_dir,
        name: &config.name,
        event_log: config.policy.event_log,
        reports: Vec::new(),
    };

    tracing::info!(name = %config.name, run_id = %run_id, python = %opts.python, "provision started");
    ctx.event(ProvenanceEvent::ProvisionStarted {
        name: config.name.clone(),
        run_id: run_id.clone(),
        python: opts.python.to_string(),
        condaprov_version: env!("CARGO_PKG_VERSION").to_string(),
    });

    let handle = EnvHandle::new(&prefix, config.environment.as_str());
    let inputs = StepInputs {
        config,
        python: opts.python,
        artifact: &artifact,
        handle: &handle,
        update_install: prefix.exists(),
    };

    // A skip reason, once set, applies to every remaining step.
    let mut skip_reason: Option<String> = None;

    for planned in &plan.steps {
        let step = planned.step;

        if let Some(ref reason) = skip_reason {
            record_skipped(&mut ctx, step, reason);
            continue;
        }

        if planned.action == PlanAction::NoOp {
            tracing::debug!(step = %step, "unchanged");
            ctx.report(step, StepOutcome::Unchanged, Duration::ZERO);
            continue;
        }

        tracing::info!(step = %step, action = %planned.action, "{}", planned.description);
        ctx.event(ProvenanceEvent::StepStarted {
            step,
            action: planned.action.to_string(),
        });

        if step == Step::Fetch {
            let outcome = run_fetch(opts, transport, &inputs, planned, &mut ctx);
            if let FetchOutcome::FetchFailed { attempts, ref detail } = outcome {
                match config.policy.on_fetch_failure {
                    FetchFailurePolicy::Abort => tracing::error!(
                        url = %config.installer.url,
                        attempts,
                        detail = %detail,
                        "installer download failed"
                    ),
                    FetchFailurePolicy::Continue => {
                        tracing::warn!(
                            url = %config.installer.url,
                            attempts,
                            detail = %detail,
                            "installer download failed; continuing as configured (masked)"
                        );
                        report.masked = true;
                    }
                }
                skip_reason = Some(NOT_FETCHED.to_string());
            }
            report.fetch = Some(outcome);
            continue;
        }

        let step_start = Instant::now();

        if step == Step::Install && !artifact.is_file() {
            let err = ProvisionError::ArtifactMissing {
                path: artifact.clone(),
            };
            record_failure(&mut ctx, step, step_start.elapsed(), err.to_string(), None);
            skip_reason = Some(format!("step '{}' failed", step));
            continue;
        }

        let script = codegen::step_script(step, &inputs);
        tracing::debug!(step = %step, script = %script, "step script");

        match transport.exec(&script) {
            Ok(out) if out.success() => {
                let mut details = IndexMap::new();
                match step {
                    Step::Install => {
                        let query = installer::state_query_script(&prefix);
                        if let Ok(q) = transport.exec(&query) {
                            let version = q.stdout.trim();
                            if q.success() && !version.is_empty() {
                                details.insert("conda_version".to_string(), version.to_string());
                            }
                        }
                    }
                    Step::Activate => {
                        if let Some(active) = conda::parse_active_prefix(&out.stdout) {
                            details.insert("active_prefix".to_string(), active);
                        }
                        report.env = Some(handle.clone());
                    }
                    Step::InstallPackages => {
                        details.insert("python".to_string(), opts.python.to_string());
                        details.insert("channel".to_string(), config.install.channel.clone());
                    }
                    _ => {}
                }
                record_success(&mut ctx, planned, step_start.elapsed(), details);
            }
            Ok(out) => {
                record_failure(
                    &mut ctx,
                    step,
                    step_start.elapsed(),
                    out.stderr_tail(5),
                    Some(out.exit_code),
                );
                skip_reason = Some(format!("step '{}' failed", step));
            }
            Err(e) => {
                record_failure(&mut ctx, step, step_start.elapsed(), e.to_string(), None);
                skip_reason = Some(format!("step '{}' failed", step));
            }
        }
    }

    let failed = ctx.reports.iter().any(|r| matches!(r.outcome, StepOutcome::Failed { .. }));
    if !failed && handle.conda_bin().exists() {
        report.env = Some(handle.clone());
        record_verification(&mut ctx, transport, &inputs);
    }

    report.steps = std::mem::take(&mut ctx.reports);
    report.total_duration = start.elapsed();

    ctx.event(ProvenanceEvent::ProvisionCompleted {
        name: config.name.clone(),
        run_id,
        steps_converged: report.converged(),
        steps_unchanged: report.unchanged(),
        steps_skipped: report.skipped(),
        steps_failed: report.failed(),
        masked: report.masked,
        total_seconds: report.total_duration.as_secs_f64(),
    });

    lock.generated_at = eventlog::now_iso8601();
    if config.policy.lock_file {
        state::save_lock(opts.state_dir, &lock)?;
    }

    tracing::info!(
        converged = report.converged(),
        unchanged = report.unchanged(),
        skipped = report.skipped(),
        failed = report.failed(),
        masked = report.masked,
        "provision completed"
    );

    Ok(report)
}

/// Query the live environment and store what it reports in the lock.
/// Findings are warnings here; `condaprov verify` turns them into errors.
fn record_verification(ctx: &mut RecordCtx, transport: &dyn Transport, inputs: &StepInputs) {
    match verify::verify(
        transport,
        inputs.handle,
        inputs.config,
        inputs.python,
        inputs.artifact,
    ) {
        Ok(v) => {
            if let Some(entry) = ctx.lock.steps.get_mut(&Step::InstallPackages) {
                entry.details.insert("live_hash".to_string(), v.live_hash);
                if let Some(py) = v.python_version {
                    entry.details.insert("python_version".to_string(), py);
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "verification query failed"),
    }
}

/// The error a finished run should exit with, if any.
///
/// A failed download is an error unless the policy masked it. Otherwise
/// the first failed step decides.
pub fn run_error(report: &ProvisionReport, config: &ProvisionConfig) -> Option<ProvisionError> {
    if let Some(FetchOutcome::FetchFailed { attempts, detail }) = &report.fetch {
        if !report.masked {
            return Some(ProvisionError::FetchFailed {
                url: config.installer.url.clone(),
                attempts: *attempts,
                detail: detail.clone(),
            });
        }
        return None;
    }

    report.steps.iter().find_map(|r| match &r.outcome {
        StepOutcome::Failed {
            error,
            exit_code: Some(code),
        } => Some(ProvisionError::StepFailed {
            step: r.step,
            exit_code: *code,
            stderr: error.clone(),
        }),
        StepOutcome::Failed { .. } if r.step == Step::Install => {
            Some(ProvisionError::ArtifactMissing {
                path: report.artifact.clone(),
            })
        }
        StepOutcome::Failed { error, .. } => Some(ProvisionError::Transport(format!(
            "step '{}': {}",
            r.step, error
        ))),
        _ => None,
    })
}
