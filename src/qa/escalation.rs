//! Human escalation report written when the QA loop gives up early.
//!
//! Layout:
//!   <spec_dir>/QA_ESCALATION.md: overwritten on every escalation
//!
//! The writer only creates the artifact; it never touches the iteration
//! history or the signoff.

use crate::errors::QaError;
use crate::io::atomic_write;
use crate::qa::recurrence::{RecurrenceDetector, RecurrenceSummary, RecurringIssue};
use crate::qa::store::IterationStore;
use chrono::Utc;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing::info;

pub const ESCALATION_FILE: &str = "QA_ESCALATION.md";

/// Why the loop is handing the work item to a human.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationReason {
    RecurringIssues(Vec<RecurringIssue>),
    ConsecutiveErrors { count: u32, last_error: String },
}

pub struct EscalationWriter {
    store: IterationStore,
    detector: RecurrenceDetector,
}

impl EscalationWriter {
    pub fn new(store: &IterationStore, detector: RecurrenceDetector) -> Self {
        Self {
            store: store.clone(),
            detector,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.store.spec_dir().join(ESCALATION_FILE)
    }

    /// Render and atomically write the report, replacing any previous one.
    pub fn escalate(&self, reason: &EscalationReason, iteration: u32) -> Result<PathBuf, QaError> {
        let history = self.store.load_history();
        let summary = self.detector.summarize(&history);
        let report = render_report(reason, iteration, history.len(), &summary);

        let path = self.path();
        atomic_write(&path, report.as_bytes()).map_err(|source| QaError::ArtifactWriteFailed {
            artifact: ESCALATION_FILE,
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), iteration, "Wrote QA escalation report");
        Ok(path)
    }
}

/// Markdown body of the escalation report.
pub fn render_report(
    reason: &EscalationReason,
    iteration: u32,
    total_iterations: usize,
    summary: &RecurrenceSummary,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# QA Escalation - Human Intervention Required\n");
    let _ = writeln!(out, "**Generated**: {}", Utc::now().to_rfc3339());
    let _ = writeln!(out, "**Triggered at iteration**: {}", iteration);
    let _ = writeln!(out, "**Total QA iterations**: {}", total_iterations);

    match reason {
        EscalationReason::RecurringIssues(recurring) => {
            let _ = writeln!(out, "**Recurring issues**: {}\n", recurring.len());
            let _ = writeln!(out, "## Summary\n");
            let _ = writeln!(
                out,
                "The QA loop detected issues that keep coming back after fix attempts. \
                 Automated fixing has stopped making progress on them.\n"
            );
            let _ = writeln!(out, "## Recurring Issues\n");
            for (i, r) in recurring.iter().enumerate() {
                let _ = writeln!(out, "### {}. {}\n", i + 1, r.issue.title);
                let _ = writeln!(out, "- **Occurrences**: {}", r.occurrence_count);
                if !r.iterations.is_empty() {
                    let seen: Vec<String> = r.iterations.iter().map(|n| n.to_string()).collect();
                    let _ = writeln!(out, "- **Previously seen in iterations**: {}", seen.join(", "));
                }
                let _ = writeln!(
                    out,
                    "- **Location**: {}",
                    r.issue.location().unwrap_or_else(|| "not specified".to_string())
                );
                if let Some(kind) = &r.issue.kind {
                    let _ = writeln!(out, "- **Type**: {}", kind);
                }
                if !r.issue.description.is_empty() {
                    let _ = writeln!(out, "- **Description**: {}", r.issue.description);
                }
                out.push('\n');
            }
        }
        EscalationReason::ConsecutiveErrors { count, last_error } => {
            let _ = writeln!(out, "**Consecutive errors**: {}\n", count);
            let _ = writeln!(out, "## Summary\n");
            let _ = writeln!(
                out,
                "The reviewer session failed {} times in a row without producing a verdict.\n",
                count
            );
            let _ = writeln!(out, "## Last Error\n");
            let _ = writeln!(out, "```\n{}\n```\n", last_error.trim());
        }
    }

    let _ = writeln!(out, "## Iteration Statistics\n");
    let _ = writeln!(out, "- Iterations approved: {}", summary.iterations_approved);
    let _ = writeln!(out, "- Iterations rejected: {}", summary.iterations_rejected);
    let _ = writeln!(
        out,
        "- Fix success rate: {:.0}%",
        summary.fix_success_rate * 100.0
    );
    let _ = writeln!(out, "- Total issues reported: {}", summary.total_issues);
    let _ = writeln!(out, "- Unique issues: {}\n", summary.unique_issues);

    if !summary.most_common.is_empty() {
        let _ = writeln!(out, "## Most Common Issues\n");
        for freq in &summary.most_common {
            let _ = writeln!(
                out,
                "- {} ({} occurrence{})",
                freq.title,
                freq.occurrences,
                if freq.occurrences == 1 { "" } else { "s" }
            );
        }
        out.push('\n');
    }

    let _ = writeln!(out, "## Recommended Actions\n");
    match reason {
        EscalationReason::RecurringIssues(_) => {
            let _ = writeln!(out, "1. Inspect the recurring issues above by hand");
            let _ = writeln!(out, "2. Check whether the acceptance criteria are achievable as written");
            let _ = writeln!(
                out,
                "3. Write guidance for the fixer into `QA_FIX_REQUEST.md` in this directory"
            );
        }
        EscalationReason::ConsecutiveErrors { .. } => {
            let _ = writeln!(out, "1. Verify the Claude CLI is installed and authenticated");
            let _ = writeln!(out, "2. Check the session logs under `.vigil/logs/`");
            let _ = writeln!(out, "3. Confirm the plan document is writable");
        }
    }
    let _ = writeln!(out, "4. Re-run `vigil qa run` once the blocker is resolved");
    out
}
