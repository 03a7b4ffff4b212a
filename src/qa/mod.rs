//! QA validation: issue matching, iteration history, recurrence detection,
//! escalation and the review/fix loop that ties them together.

pub mod criteria;
pub mod escalation;
pub mod issue;
pub mod manual_plan;
pub mod recurrence;
pub mod store;
pub mod validation;

pub use escalation::{ESCALATION_FILE, EscalationReason, EscalationWriter};
pub use issue::{Issue, is_same_issue, normalize_key, similarity};
pub use recurrence::{
    RecurrenceDetector, RecurrenceSummary, RecurringIssue, get_recurring_issue_summary,
    has_recurring_issues,
};
pub use store::{IterationRecord, IterationStatus, IterationStore, QaSignoff, SignoffStatus};
pub use validation::{
    FIX_REQUEST_FILE, QaLoopSettings, QaOutcome, QaRunReport, QaState, QaValidationLoop,
    run_qa_validation_loop,
};

/// Review passes allowed for one spec across all runs.
pub const DEFAULT_MAX_QA_ITERATIONS: u32 = 50;

/// Reviewer failures in a row before a run is aborted.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;
