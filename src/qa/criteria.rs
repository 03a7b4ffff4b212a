//! Signoff predicates used to decide whether QA (or a fix pass) should run.

use crate::qa::store::{BuildProgress, IterationStore, PlanDocument, SignoffStatus};

fn signoff_status(doc: &PlanDocument) -> Option<SignoffStatus> {
    doc.qa_signoff.as_ref().map(|s| s.status)
}

pub fn is_qa_approved(doc: &PlanDocument) -> bool {
    signoff_status(doc) == Some(SignoffStatus::Approved)
}

pub fn is_qa_rejected(doc: &PlanDocument) -> bool {
    signoff_status(doc) == Some(SignoffStatus::Rejected)
}

/// A fix pass finished and the reviewer has not looked at it yet.
pub fn is_fixes_applied(doc: &PlanDocument) -> bool {
    doc.qa_signoff.as_ref().is_some_and(|s| {
        s.status == SignoffStatus::FixesApplied && s.ready_for_qa_revalidation.unwrap_or(false)
    })
}

/// Completed QA sessions, from the signoff or the history, whichever is ahead.
pub fn qa_iteration_count(doc: &PlanDocument) -> u32 {
    let from_signoff = doc.qa_signoff.as_ref().map(|s| s.qa_session).unwrap_or(0);
    from_signoff.max(doc.last_iteration())
}

pub fn build_progress(doc: &PlanDocument) -> BuildProgress {
    doc.build_progress()
}

pub fn is_build_complete(doc: &PlanDocument) -> bool {
    doc.build_progress().is_complete()
}

/// QA should run once every subtask is done and nobody has approved yet.
pub fn should_run_qa(doc: &PlanDocument) -> bool {
    is_build_complete(doc) && !is_qa_approved(doc)
}

/// A fix pass is due after a rejection while budget remains.
pub fn should_run_fixes(doc: &PlanDocument, max_iterations: u32) -> bool {
    is_qa_rejected(doc) && qa_iteration_count(doc) < max_iterations
}

/// Snapshot used by `vigil qa status`.
#[derive(Debug, Clone, PartialEq)]
pub struct QaStatusReport {
    pub plan_exists: bool,
    pub status: Option<SignoffStatus>,
    pub iterations: u32,
    pub open_issues: usize,
    pub build: BuildProgress,
    pub ready_for_revalidation: bool,
}

pub fn status_report(store: &IterationStore) -> QaStatusReport {
    let doc = store.load();
    QaStatusReport {
        plan_exists: store.exists(),
        status: signoff_status(&doc),
        iterations: qa_iteration_count(&doc),
        open_issues: doc
            .qa_signoff
            .as_ref()
            .filter(|s| s.status == SignoffStatus::Rejected)
            .map(|s| s.issues_found.len())
            .unwrap_or(0),
        build: doc.build_progress(),
        ready_for_revalidation: is_fixes_applied(&doc),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> PlanDocument {
        PlanDocument::parse(json).unwrap()
    }

    const COMPLETE_BUILD: &str = r#""phases": [{"subtasks": [{"status": "completed"}]}]"#;

    #[test]
    fn test_signoff_predicates() {
        let approved = doc(r#"{"qa_signoff": {"status": "approved"}}"#);
        assert!(is_qa_approved(&approved));
        assert!(!is_qa_rejected(&approved));

        let rejected = doc(r#"{"qa_signoff": {"status": "rejected", "issues_found": ["x"]}}"#);
        assert!(is_qa_rejected(&rejected));

        let fixed = doc(
            r#"{"qa_signoff": {"status": "fixes_applied", "ready_for_qa_revalidation": true}}"#,
        );
        assert!(is_fixes_applied(&fixed));

        let not_ready = doc(r#"{"qa_signoff": {"status": "fixes_applied"}}"#);
        assert!(!is_fixes_applied(&not_ready));

        assert!(!is_qa_approved(&doc("{}")));
    }

    #[test]
    fn test_should_run_qa_requires_complete_build() {
        let incomplete = doc(r#"{"phases": [{"subtasks": [{"status": "pending"}]}]}"#);
        assert!(!should_run_qa(&incomplete));

        let complete = doc(&format!("{{{}}}", COMPLETE_BUILD));
        assert!(should_run_qa(&complete));

        let approved = doc(&format!(
            r#"{{{}, "qa_signoff": {{"status": "approved"}}}}"#,
            COMPLETE_BUILD
        ));
        assert!(!should_run_qa(&approved));
    }

    #[test]
    fn test_should_run_fixes_respects_budget() {
        let rejected = doc(r#"{"qa_signoff": {"status": "rejected", "qa_session": 2}}"#);
        assert!(should_run_fixes(&rejected, 3));
        assert!(!should_run_fixes(&rejected, 2));
    }

    #[test]
    fn test_qa_iteration_count_prefers_larger_source() {
        let d = doc(
            r#"{"qa_signoff": {"status": "rejected", "qa_session": 1},
                "qa_iteration_history": [
                    {"iteration": 1, "status": "rejected", "timestamp": "2026-01-01T00:00:00Z"},
                    {"iteration": 2, "status": "rejected", "timestamp": "2026-01-01T00:01:00Z"}
                ]}"#,
        );
        assert_eq!(qa_iteration_count(&d), 2);
    }

    #[test]
    fn test_status_report_counts_open_issues() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("implementation_plan.json"),
            r#"{"qa_signoff": {"status": "rejected", "qa_session": 1, "issues_found": ["a", "b"]}}"#,
        )
        .unwrap();
        let report = status_report(&IterationStore::new(dir.path()));
        assert!(report.plan_exists);
        assert_eq!(report.status, Some(SignoffStatus::Rejected));
        assert_eq!(report.open_issues, 2);
        assert_eq!(report.iterations, 1);
    }
}
