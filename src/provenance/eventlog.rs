//! Append-only JSONL provenance event log.

use crate::core::types::{ProvenanceEvent, TimestampedEvent};
use crate::error::{ProvisionError, Result};
use chrono::{SecondsFormat, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Current UTC time, RFC 3339 with second precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("r-{}", &id[..12])
}

/// Derive the event log path for an environment.
pub fn event_log_path(state_dir: &Path, name: &str) -> PathBuf {
    state_dir.join(name).join("events.jsonl")
}

/// Append an event to the environment's event log.
pub fn append_event(state_dir: &Path, name: &str, event: ProvenanceEvent) -> Result<()> {
    let path = event_log_path(state_dir, name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te)?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| ProvisionError::io(&path, e))?;

    writeln!(file, "{}", json).map_err(|e| ProvisionError::io(&path, e))?;

    Ok(())
}

/// Read every event back, oldest first.
pub fn read_events(state_dir: &Path, name: &str) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(state_dir, name);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|e| ProvisionError::io(&path, e))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(ProvisionError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Step;

    #[test]
    fn test_now_iso8601() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('T'));
        assert_eq!(ts.len(), "2026-10-16T09:00:00Z".len());
    }

    #[test]
    fn test_generate_run_id() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert!(a.starts_with("r-"));
        assert_eq!(a.len(), 14);
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_log_path() {
        let p = event_log_path(Path::new("/state"), "psi4");
        assert_eq!(p, PathBuf::from("/state/psi4/events.jsonl"));
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        append_event(
            dir.path(),
            "psi4",
            ProvenanceEvent::FetchFailed {
                url: "https://example.invalid/m.sh".to_string(),
                attempts: 3,
                detail: "unable to resolve host".to_string(),
            },
        )
        .unwrap();
        append_event(
            dir.path(),
            "psi4",
            ProvenanceEvent::StepSkipped {
                step: Step::Install,
                reason: "installer was not fetched".to_string(),
            },
        )
        .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("psi4/events.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains("\"event\":\"fetch_failed\""));

        let events = read_events(dir.path(), "psi4").unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1].event,
            ProvenanceEvent::StepSkipped {
                step: Step::Install,
                ..
            }
        ));
    }

    #[test]
    fn test_read_events_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_events(dir.path(), "ghost").unwrap().is_empty());
    }
}
