//! Human-readable and JSON renderings of a [`SessionReport`].

use crate::session::{SessionReport, TeardownStatus};
use crate::steps::StepOutcome;
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write report to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Per-outcome counts of a report's step results.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub passed: usize,
    pub warned: usize,
    pub failed: usize,
}

impl Tally {
    pub fn of(report: &SessionReport) -> Self {
        report
            .results
            .iter()
            .fold(Self::default(), |mut tally, result| {
                match result.outcome() {
                    StepOutcome::Pass => tally.passed += 1,
                    StepOutcome::Warn => tally.warned += 1,
                    StepOutcome::Fail => tally.failed += 1,
                }
                tally
            })
    }
}

/// Render the end-of-session summary printed by the CLI.
pub fn render_summary(report: &SessionReport) -> String {
    let mut out = String::new();
    let tally = Tally::of(report);

    let _ = writeln!(out, "=== {} ===", report.session);
    for result in &report.results {
        let marker = if result.is_critical() { "" } else { " (non-critical)" };
        let _ = writeln!(
            out,
            "[{}] {}{}: {}",
            result.outcome(),
            result.name(),
            marker,
            result.detail()
        );
    }

    let _ = writeln!(
        out,
        "{} passed, {} warnings, {} failed in {:.1}s",
        tally.passed,
        tally.warned,
        tally.failed,
        report.elapsed_ms as f64 / 1000.0
    );

    let teardown = match &report.teardown {
        TeardownStatus::Completed => "completed".to_string(),
        TeardownStatus::Kept => "skipped, environment kept".to_string(),
        TeardownStatus::Failed(reason) => format!("FAILED: {reason}"),
    };
    let _ = writeln!(out, "Teardown: {teardown}");
    if report.interrupted {
        let _ = writeln!(out, "Session was interrupted");
    }
    let _ = write!(out, "Result: {}", report.outcome);

    out
}

/// Pretty-printed JSON rendering.
pub fn to_json(report: &SessionReport) -> Result<String, ReportError> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Write the JSON rendering to `path`.
pub async fn write_json(report: &SessionReport, path: &Path) -> Result<(), ReportError> {
    let json = to_json(report)?;
    tokio::fs::write(path, json)
        .await
        .map_err(|source| ReportError::Write {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::session::SessionPhase;
    use crate::steps::{CheckOutcome, Outcome, StepResult};
    use chrono::Utc;

    fn report(teardown: TeardownStatus) -> SessionReport {
        SessionReport {
            session: "platform-registration-service (1.2.0)".to_string(),
            started_at: Utc::now(),
            elapsed_ms: 12_340,
            outcome: Outcome::Pass,
            results: vec![
                StepResult::from_check("registration liveness", true, CheckOutcome::passed("ok")),
                StepResult::from_check(
                    "registration metrics",
                    false,
                    CheckOutcome::failed("missing jvm_memory_used_bytes"),
                ),
                StepResult::from_check("GetService", false, CheckOutcome::skipped("no grpcurl")),
            ],
            phases: vec![SessionPhase::Idle, SessionPhase::Terminated(Outcome::Pass)],
            teardown,
            interrupted: false,
        }
    }

    #[test]
    fn test_tally() {
        let tally = Tally::of(&report(TeardownStatus::Completed));
        assert_eq!(
            tally,
            Tally {
                passed: 1,
                warned: 2,
                failed: 0
            }
        );
    }

    #[test]
    fn test_summary_lines() {
        let summary = render_summary(&report(TeardownStatus::Completed));

        assert!(summary.starts_with("=== platform-registration-service (1.2.0) ==="));
        assert!(summary.contains("[PASS] registration liveness: ok"));
        assert!(summary
            .contains("[WARN] registration metrics (non-critical): missing jvm_memory_used_bytes"));
        assert!(summary.contains("1 passed, 2 warnings, 0 failed in 12.3s"));
        assert!(summary.contains("Teardown: completed"));
        assert!(summary.ends_with("Result: PASS"));
    }

    #[test]
    fn test_summary_reports_failed_teardown() {
        let summary = render_summary(&report(TeardownStatus::Failed("docker gone".to_string())));
        assert!(summary.contains("Teardown: FAILED: docker gone"));
    }

    #[test]
    fn test_json_shape() {
        let json: serde_json::Value =
            serde_json::from_str(&to_json(&report(TeardownStatus::Kept)).unwrap()).unwrap();

        assert_eq!(json["outcome"], "pass");
        assert_eq!(json["teardown"]["status"], "kept");
        assert_eq!(json["results"][1]["outcome"], "warn");
        assert_eq!(json["results"][1]["critical"], false);
        assert_eq!(json["phases"][1]["phase"], "terminated");
        assert_eq!(json["phases"][1]["outcome"], "pass");
    }

    #[tokio::test]
    async fn test_write_json_to_missing_dir_fails() {
        let err = write_json(
            &report(TeardownStatus::Completed),
            Path::new("/nonexistent-dir/report.json"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReportError::Write { .. }));
    }
}
