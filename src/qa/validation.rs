//! The QA validation loop: review, fix, repeat, escalate.
//!
//! ```text
//! NotStarted ─▶ Running ─┬─▶ Approved
//!                        ├─▶ RejectedExhausted
//!                        ├─▶ Escalated
//!                        └─▶ ErrorAborted
//! ```
//!
//! Each pass asks the reviewer for a verdict. A rejection is recorded,
//! checked for recurrence against the earlier history and, unless it recurs
//! or the budget is spent, handed to the fixer. Reviewer errors are retried
//! with exponential backoff and do not consume the iteration budget.
//!
//! The reviewer and fixer calls are the only await points that reach outside
//! the process; both are bounded by `call_timeout`.

use crate::agent::{
    FixOutcome, FixRequest, FixStatus, QaAgent, ReviewOutcome, ReviewRequest, ReviewStatus,
};
use crate::errors::{AgentError, QaError};
use crate::qa::criteria::{is_qa_approved, qa_iteration_count};
use crate::qa::escalation::{EscalationReason, EscalationWriter};
use crate::qa::issue::{DEFAULT_SIMILARITY_THRESHOLD, Issue};
use crate::qa::manual_plan::ensure_manual_test_plan;
use crate::qa::recurrence::{
    DEFAULT_RECURRING_THRESHOLD, RecurrenceDetector, RecurrenceSummary, RecurringIssue,
};
use crate::qa::store::{IterationStatus, IterationStore, SignoffStatus};
use crate::qa::{DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MAX_QA_ITERATIONS};
use crate::ui::QaUI;
use crate::util::truncate_chars;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Human-authored instructions for the fixer, consumed before the first review.
pub const FIX_REQUEST_FILE: &str = "QA_FIX_REQUEST.md";

/// Terminal states of a QA run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QaOutcome {
    Approved,
    RejectedExhausted,
    Escalated,
    ErrorAborted,
}

impl QaOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::RejectedExhausted => "rejected_exhausted",
            Self::Escalated => "escalated",
            Self::ErrorAborted => "error_aborted",
        }
    }
}

impl std::fmt::Display for QaOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QaState {
    NotStarted,
    Running,
    Terminal(QaOutcome),
}

#[derive(Debug, Clone)]
pub struct QaLoopSettings {
    pub max_iterations: u32,
    pub max_consecutive_errors: u32,
    pub recurring_threshold: usize,
    pub similarity_threshold: f64,
    /// Upper bound on one reviewer or fixer call; exceeding it counts as an error.
    pub call_timeout: Duration,
    /// Delay before the first retry; doubles with each consecutive error.
    pub error_backoff: Duration,
    pub manual_test_plan: bool,
}

impl Default for QaLoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_QA_ITERATIONS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            recurring_threshold: DEFAULT_RECURRING_THRESHOLD,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            call_timeout: Duration::from_secs(1800),
            error_backoff: Duration::from_secs(2),
            manual_test_plan: true,
        }
    }
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq)]
pub struct QaRunReport {
    pub outcome: QaOutcome,
    /// Last QA session number reached.
    pub iterations: u32,
    pub reviewer_calls: u32,
    pub fixer_calls: u32,
    pub escalation_path: Option<PathBuf>,
    pub recurring: Vec<RecurringIssue>,
    /// History summary, filled for exhausted and escalated runs.
    pub summary: Option<RecurrenceSummary>,
    /// Why the run aborted, for `ErrorAborted`.
    pub error: Option<String>,
}

impl QaRunReport {
    fn new() -> Self {
        Self {
            outcome: QaOutcome::ErrorAborted,
            iterations: 0,
            reviewer_calls: 0,
            fixer_calls: 0,
            escalation_path: None,
            recurring: Vec::new(),
            summary: None,
            error: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.outcome == QaOutcome::Approved
    }
}

/// A reviewer answer that is not an error.
enum ReviewVerdict {
    Approved,
    Rejected(Vec<Issue>),
}

pub struct QaValidationLoop<A: QaAgent> {
    store: IterationStore,
    agent: A,
    project_dir: PathBuf,
    settings: QaLoopSettings,
    detector: RecurrenceDetector,
    ui: Option<Arc<QaUI>>,
    state: QaState,
}

impl<A: QaAgent> QaValidationLoop<A> {
    pub fn new(store: IterationStore, agent: A, project_dir: &Path, settings: QaLoopSettings) -> Self {
        let detector =
            RecurrenceDetector::new(settings.recurring_threshold, settings.similarity_threshold);
        Self {
            store,
            agent,
            project_dir: project_dir.to_path_buf(),
            settings,
            detector,
            ui: None,
            state: QaState::NotStarted,
        }
    }

    pub fn with_ui(mut self, ui: Arc<QaUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn state(&self) -> QaState {
        self.state
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    fn ui(&self) -> Option<&QaUI> {
        self.ui.as_deref()
    }

    /// Drive the loop to a terminal state. Never returns an error: store and
    /// artifact failures end the run as `ErrorAborted`.
    pub async fn run(&mut self) -> QaRunReport {
        let mut report = QaRunReport::new();
        if let QaState::Terminal(outcome) = self.state {
            report.outcome = outcome;
            return report;
        }
        self.state = QaState::Running;

        let outcome = match self.drive(&mut report).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, spec_dir = %self.store.spec_dir().display(), "QA run aborted");
                if let Some(ui) = self.ui() {
                    ui.print_error_aborted(&e.to_string(), None);
                }
                report.error = Some(e.to_string());
                QaOutcome::ErrorAborted
            }
        };

        self.state = QaState::Terminal(outcome);
        report.outcome = outcome;
        info!(
            outcome = %outcome,
            iterations = report.iterations,
            reviewer_calls = report.reviewer_calls,
            fixer_calls = report.fixer_calls,
            "QA run finished"
        );
        report
    }

    async fn drive(&mut self, report: &mut QaRunReport) -> Result<QaOutcome, QaError> {
        let doc = self.store.load();
        let mut iteration = qa_iteration_count(&doc);
        report.iterations = iteration;

        if is_qa_approved(&doc) {
            info!(spec_dir = %self.store.spec_dir().display(), "QA already approved");
            return Ok(QaOutcome::Approved);
        }

        if let Some(ui) = self.ui() {
            ui.print_header(self.store.spec_dir(), self.settings.max_iterations);
        }
        self.prepare_manual_test_plan();

        if let Some(human_request) = self.pending_fix_request() {
            info!("Running fixer on human fix request before review");
            let fixed = self
                .run_fixer(report, iteration, Some(human_request))
                .await?;
            if !fixed {
                return Ok(QaOutcome::ErrorAborted);
            }
            let path = self.store.spec_dir().join(FIX_REQUEST_FILE);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "Failed to remove processed fix request");
            }
        }

        loop {
            if iteration >= self.settings.max_iterations {
                return Ok(self.exhausted(report));
            }
            let session = iteration + 1;
            report.iterations = session;

            let started = Instant::now();
            let Some(verdict) = self.review_with_retries(report, session).await? else {
                return Ok(QaOutcome::ErrorAborted);
            };
            let duration = Some(started.elapsed().as_secs_f64());

            match verdict {
                ReviewVerdict::Approved => {
                    self.store
                        .record_iteration(session, IterationStatus::Approved, &[], duration)?;
                    self.store.update_signoff(|s| {
                        s.status = SignoffStatus::Approved;
                        s.qa_session = session;
                        s.issues_found.clear();
                        s.ready_for_qa_revalidation = None;
                    })?;
                    info!(iteration = session, "QA approved");
                    if let Some(ui) = self.ui() {
                        ui.review_approved(session);
                        ui.print_approved(session);
                    }
                    return Ok(QaOutcome::Approved);
                }
                ReviewVerdict::Rejected(issues) => {
                    if let Some(ui) = self.ui() {
                        ui.review_rejected(session, &issues);
                    }

                    let history = self.store.load_history();
                    let (recurs, recurring) = self.detector.has_recurring_issues(&issues, &history);

                    self.store
                        .record_iteration(session, IterationStatus::Rejected, &issues, duration)?;
                    self.store.update_signoff(|s| {
                        s.status = SignoffStatus::Rejected;
                        s.qa_session = session;
                        s.issues_found = issues.clone();
                        s.ready_for_qa_revalidation = Some(false);
                    })?;
                    iteration = session;
                    info!(iteration = session, issues = issues.len(), "QA rejected");

                    if recurs {
                        return self.escalate_recurring(report, recurring, session);
                    }
                    if iteration >= self.settings.max_iterations {
                        return Ok(self.exhausted(report));
                    }

                    if !self.run_fixer(report, session, None).await? {
                        return Ok(QaOutcome::ErrorAborted);
                    }
                }
            }
        }
    }

    /// Call the reviewer until it yields a verdict. `None` means the error
    /// limit was hit; the error iteration and escalation report are written.
    async fn review_with_retries(
        &self,
        report: &mut QaRunReport,
        session: u32,
    ) -> Result<Option<ReviewVerdict>, QaError> {
        let max_errors = self.settings.max_consecutive_errors.max(1);
        let mut consecutive_errors = 0;
        let mut previous_error: Option<String> = None;

        loop {
            let request = ReviewRequest {
                project_dir: self.project_dir.clone(),
                spec_dir: self.store.spec_dir().to_path_buf(),
                qa_session: session,
                max_iterations: self.settings.max_iterations,
                previous_error: previous_error.take(),
            };
            if let Some(ui) = self.ui() {
                ui.start_review(session, self.settings.max_iterations);
            }
            report.reviewer_calls += 1;
            let outcome = self.call_reviewer(&request).await;

            match outcome.status {
                ReviewStatus::Approved => return Ok(Some(ReviewVerdict::Approved)),
                ReviewStatus::Rejected => {
                    return Ok(Some(ReviewVerdict::Rejected(rejected_issues(&outcome))));
                }
                ReviewStatus::Error => {}
            }

            consecutive_errors += 1;
            warn!(
                iteration = session,
                attempt = consecutive_errors,
                error = %outcome.message,
                "Reviewer session failed"
            );
            if let Some(ui) = self.ui() {
                ui.review_error(consecutive_errors, max_errors, &truncate_chars(&outcome.message, 80));
            }

            if consecutive_errors >= max_errors {
                self.store
                    .record_iteration(session, IterationStatus::Error, &[], None)?;
                let reason = EscalationReason::ConsecutiveErrors {
                    count: consecutive_errors,
                    last_error: outcome.message.clone(),
                };
                let path = EscalationWriter::new(&self.store, self.detector)
                    .escalate(&reason, session)?;
                if let Some(ui) = self.ui() {
                    ui.print_error_aborted(
                        &format!("reviewer failed {} times in a row", consecutive_errors),
                        Some(&path),
                    );
                }
                report.escalation_path = Some(path);
                report.error = Some(outcome.message);
                return Ok(None);
            }

            let delay = self.backoff(consecutive_errors);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            previous_error = Some(outcome.message);
        }
    }

    /// Run one fixer session. Returns `false` when the fixer failed; the run
    /// should then end as `ErrorAborted`.
    async fn run_fixer(
        &self,
        report: &mut QaRunReport,
        fix_session: u32,
        human_request: Option<String>,
    ) -> Result<bool, QaError> {
        let request = FixRequest {
            project_dir: self.project_dir.clone(),
            spec_dir: self.store.spec_dir().to_path_buf(),
            fix_session,
            human_request,
        };
        if let Some(ui) = self.ui() {
            ui.start_fix(fix_session, request.human_request.is_some());
        }
        report.fixer_calls += 1;
        let outcome = self.call_fixer(&request).await;

        if outcome.status == FixStatus::Error {
            warn!(fix_session, error = %outcome.message, "Fixer session failed");
            if let Some(ui) = self.ui() {
                ui.fix_failed(fix_session, &truncate_chars(&outcome.message, 80));
                ui.print_error_aborted("fixer failed", None);
            }
            report.error = Some(outcome.message);
            return Ok(false);
        }

        self.store.update_signoff(|s| {
            s.status = SignoffStatus::FixesApplied;
            s.ready_for_qa_revalidation = Some(true);
        })?;
        info!(fix_session, "Fixes applied");
        if let Some(ui) = self.ui() {
            ui.fix_applied(fix_session);
        }
        Ok(true)
    }

    async fn call_reviewer(&self, request: &ReviewRequest) -> ReviewOutcome {
        match tokio::time::timeout(self.settings.call_timeout, self.agent.review(request)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ReviewOutcome::error(e.to_string()),
            Err(_) => ReviewOutcome::error(self.timeout_error().to_string()),
        }
    }

    async fn call_fixer(&self, request: &FixRequest) -> FixOutcome {
        match tokio::time::timeout(self.settings.call_timeout, self.agent.fix(request)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => FixOutcome::error(e.to_string()),
            Err(_) => FixOutcome::error(self.timeout_error().to_string()),
        }
    }

    fn timeout_error(&self) -> AgentError {
        AgentError::Timeout {
            secs: self.settings.call_timeout.as_secs(),
        }
    }

    /// `error_backoff * 2^(n-1)` for the n-th consecutive error.
    fn backoff(&self, consecutive_errors: u32) -> Duration {
        let factor = 1u32 << consecutive_errors.saturating_sub(1).min(10);
        self.settings.error_backoff.saturating_mul(factor)
    }

    fn escalate_recurring(
        &self,
        report: &mut QaRunReport,
        recurring: Vec<RecurringIssue>,
        session: u32,
    ) -> Result<QaOutcome, QaError> {
        let path = EscalationWriter::new(&self.store, self.detector)
            .escalate(&EscalationReason::RecurringIssues(recurring.clone()), session)?;
        let summary = self.detector.summarize(&self.store.load_history());
        warn!(
            iteration = session,
            recurring = recurring.len(),
            report = %path.display(),
            "Recurring QA issues, escalating"
        );
        if let Some(ui) = self.ui() {
            ui.print_escalated(&path, &recurring);
            ui.print_summary(&summary);
        }
        report.escalation_path = Some(path);
        report.recurring = recurring;
        report.summary = Some(summary);
        Ok(QaOutcome::Escalated)
    }

    fn exhausted(&self, report: &mut QaRunReport) -> QaOutcome {
        let summary = self.detector.summarize(&self.store.load_history());
        warn!(
            max_iterations = self.settings.max_iterations,
            rejected = summary.iterations_rejected,
            unique_issues = summary.unique_issues,
            "QA iteration budget exhausted"
        );
        if let Some(ui) = self.ui() {
            ui.print_exhausted(self.settings.max_iterations, &summary);
        }
        report.summary = Some(summary);
        QaOutcome::RejectedExhausted
    }

    fn pending_fix_request(&self) -> Option<String> {
        std::fs::read_to_string(self.store.spec_dir().join(FIX_REQUEST_FILE))
            .ok()
            .filter(|content| !content.trim().is_empty())
    }

    fn prepare_manual_test_plan(&self) {
        if !self.settings.manual_test_plan {
            return;
        }
        match ensure_manual_test_plan(&self.project_dir, self.store.spec_dir()) {
            Ok(Some(path)) => {
                info!(path = %path.display(), "Generated manual test plan");
                if let Some(ui) = self.ui() {
                    ui.show_manual_test_plan(&path);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to write manual test plan"),
        }
    }
}

/// Issues of a rejection; a rejection without itemized issues becomes one
/// issue titled after the reviewer's message.
fn rejected_issues(outcome: &ReviewOutcome) -> Vec<Issue> {
    if !outcome.issues.is_empty() {
        return outcome.issues.clone();
    }
    let title = outcome
        .message
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| truncate_chars(l, 120))
        .unwrap_or_else(|| "QA rejected without itemized issues".to_string());
    vec![Issue::new(&title).with_description(outcome.message.trim())]
}

/// Run a QA loop against `spec_dir` and report whether it ended approved.
pub async fn run_qa_validation_loop<A: QaAgent>(
    agent: A,
    project_dir: &Path,
    spec_dir: &Path,
    settings: QaLoopSettings,
) -> bool {
    QaValidationLoop::new(IterationStore::new(spec_dir), agent, project_dir, settings)
        .run()
        .await
        .is_approved()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qa::escalation::ESCALATION_FILE;
    use crate::qa::recurrence::get_recurring_issue_summary;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    type ReviewScript = Box<dyn Fn(u32) -> Result<ReviewOutcome, AgentError> + Send + Sync>;
    type FixScript = Box<dyn Fn(u32) -> Result<FixOutcome, AgentError> + Send + Sync>;

    /// Agent whose answers are a function of the 1-based call number.
    struct ScriptedAgent {
        review_script: ReviewScript,
        fix_script: FixScript,
        review_delay: Option<(u32, Duration)>,
        review_calls: AtomicU32,
        fix_calls: AtomicU32,
        review_requests: Mutex<Vec<ReviewRequest>>,
        fix_requests: Mutex<Vec<FixRequest>>,
    }

    impl ScriptedAgent {
        fn new(review: ReviewScript) -> Self {
            Self {
                review_script: review,
                fix_script: Box::new(|_| Ok(FixOutcome::fixed("fixed"))),
                review_delay: None,
                review_calls: AtomicU32::new(0),
                fix_calls: AtomicU32::new(0),
                review_requests: Mutex::new(Vec::new()),
                fix_requests: Mutex::new(Vec::new()),
            }
        }

        fn with_fix(mut self, fix: FixScript) -> Self {
            self.fix_script = fix;
            self
        }

        /// Sleep for `delay` on review call number `call`.
        fn with_review_delay(mut self, call: u32, delay: Duration) -> Self {
            self.review_delay = Some((call, delay));
            self
        }

        fn reviews(&self) -> u32 {
            self.review_calls.load(Ordering::SeqCst)
        }

        fn fixes(&self) -> u32 {
            self.fix_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl QaAgent for ScriptedAgent {
        async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome, AgentError> {
            let call = self.review_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.review_requests.lock().unwrap().push(request.clone());
            if let Some((slow_call, delay)) = self.review_delay
                && slow_call == call
            {
                tokio::time::sleep(delay).await;
            }
            (self.review_script)(call)
        }

        async fn fix(&self, request: &FixRequest) -> Result<FixOutcome, AgentError> {
            let call = self.fix_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.fix_requests.lock().unwrap().push(request.clone());
            (self.fix_script)(call)
        }
    }

    fn settings(max_iterations: u32) -> QaLoopSettings {
        QaLoopSettings {
            max_iterations,
            error_backoff: Duration::ZERO,
            call_timeout: Duration::from_secs(5),
            manual_test_plan: false,
            ..QaLoopSettings::default()
        }
    }

    fn make_loop(
        agent: ScriptedAgent,
        settings: QaLoopSettings,
    ) -> (QaValidationLoop<ScriptedAgent>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = IterationStore::new(dir.path());
        (QaValidationLoop::new(store, agent, dir.path(), settings), dir)
    }

    fn same_issue() -> Issue {
        Issue::new("Missing null check")
            .with_file("src/auth.rs")
            .with_line(42)
    }

    #[tokio::test]
    async fn test_already_approved_skips_reviewer() {
        let agent = ScriptedAgent::new(Box::new(|_| Ok(ReviewOutcome::error("must not run"))));
        let (mut qa, dir) = make_loop(agent, settings(5));
        std::fs::write(
            dir.path().join("implementation_plan.json"),
            r#"{"qa_signoff": {"status": "approved", "qa_session": 2}}"#,
        )
        .unwrap();

        let report = qa.run().await;
        assert!(report.is_approved());
        assert_eq!(qa.agent().reviews(), 0);
        assert_eq!(qa.agent().fixes(), 0);
        assert_eq!(qa.state(), QaState::Terminal(QaOutcome::Approved));
    }

    #[tokio::test]
    async fn test_approved_on_first_review() {
        let agent = ScriptedAgent::new(Box::new(|_| Ok(ReviewOutcome::approved("all good"))));
        let (mut qa, dir) = make_loop(agent, settings(5));
        assert_eq!(qa.state(), QaState::NotStarted);

        let report = qa.run().await;
        assert_eq!(report.outcome, QaOutcome::Approved);
        assert_eq!(report.iterations, 1);

        let store = IterationStore::new(dir.path());
        let history = store.load_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, IterationStatus::Approved);
        let signoff = store.signoff().unwrap();
        assert_eq!(signoff.status, SignoffStatus::Approved);
        assert_eq!(signoff.qa_session, 1);
    }

    #[tokio::test]
    async fn test_unwritable_plan_aborts_run() {
        let agent = ScriptedAgent::new(Box::new(|_| {
            Ok(ReviewOutcome::rejected("broken", vec![same_issue()]))
        }));
        let (mut qa, dir) = make_loop(agent, settings(5));
        let plan_path = dir.path().join("implementation_plan.json");
        std::fs::create_dir(&plan_path).unwrap();

        let report = qa.run().await;
        assert_eq!(report.outcome, QaOutcome::ErrorAborted);
        assert_eq!(qa.state(), QaState::Terminal(QaOutcome::ErrorAborted));
        assert_eq!(qa.agent().reviews(), 1);
        assert_eq!(qa.agent().fixes(), 0);
        let error = report.error.unwrap();
        assert!(error.contains(&plan_path.display().to_string()), "{}", error);
        assert!(plan_path.is_dir());
    }

    #[tokio::test]
    async fn test_consecutive_errors_abort_after_limit() {
        let agent = ScriptedAgent::new(Box::new(|n| Ok(ReviewOutcome::error(format!("boom {}", n)))));
        let (mut qa, dir) = make_loop(agent, settings(5));

        let report = qa.run().await;
        assert_eq!(report.outcome, QaOutcome::ErrorAborted);
        assert!(!report.is_approved());
        assert_eq!(qa.agent().reviews(), DEFAULT_MAX_CONSECUTIVE_ERRORS);
        assert_eq!(qa.agent().fixes(), 0);

        let requests = qa.agent().review_requests.lock().unwrap().clone();
        assert_eq!(requests[0].previous_error, None);
        assert_eq!(requests[1].previous_error.as_deref(), Some("boom 1"));
        assert_eq!(requests[2].previous_error.as_deref(), Some("boom 2"));
        assert!(requests.iter().all(|r| r.qa_session == 1));

        let history = IterationStore::new(dir.path()).load_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, IterationStatus::Error);

        let escalation = std::fs::read_to_string(dir.path().join(ESCALATION_FILE)).unwrap();
        assert!(escalation.contains("boom 3"));
    }

    #[tokio::test]
    async fn test_agent_err_counts_as_error() {
        let agent = ScriptedAgent::new(Box::new(|n| {
            if n == 1 {
                Err(AgentError::NonZeroExit { exit_code: 2 })
            } else {
                Ok(ReviewOutcome::approved("ok"))
            }
        }));
        let (mut qa, _dir) = make_loop(agent, settings(5));

        let report = qa.run().await;
        assert!(report.is_approved());
        let requests = qa.agent().review_requests.lock().unwrap().clone();
        assert!(requests[1].previous_error.as_deref().unwrap().contains("code 2"));
    }

    #[tokio::test]
    async fn test_error_counter_resets_after_verdict() {
        // errors at 1,2 then reject at 3, errors at 4,5 then approve at 6
        let agent = ScriptedAgent::new(Box::new(|n| match n {
            1 | 2 | 4 | 5 => Ok(ReviewOutcome::error("flaky")),
            3 => Ok(ReviewOutcome::rejected("bad", vec![same_issue()])),
            _ => Ok(ReviewOutcome::approved("good")),
        }));
        let (mut qa, dir) = make_loop(agent, settings(5));

        let report = qa.run().await;
        assert!(report.is_approved());
        assert_eq!(report.iterations, 2);
        assert_eq!(qa.agent().reviews(), 6);

        let statuses: Vec<IterationStatus> = IterationStore::new(dir.path())
            .load_history()
            .iter()
            .map(|r| r.status)
            .collect();
        assert_eq!(statuses, vec![IterationStatus::Rejected, IterationStatus::Approved]);
    }

    #[tokio::test]
    async fn test_exhaustion_with_unique_issues() {
        let agent = ScriptedAgent::new(Box::new(|n| {
            Ok(ReviewOutcome::rejected(
                "still broken",
                vec![Issue::new(&format!("Unique problem {}", n)).with_file(&format!("src/mod{}.rs", n))],
            ))
        }));
        let (mut qa, dir) = make_loop(agent, settings(5));

        let report = qa.run().await;
        assert_eq!(report.outcome, QaOutcome::RejectedExhausted);
        assert_eq!(report.iterations, 5);
        assert_eq!(qa.agent().reviews(), 5);
        assert_eq!(qa.agent().fixes(), 4);
        assert_eq!(report.summary.as_ref().unwrap().iterations_rejected, 5);

        let history = IterationStore::new(dir.path()).load_history();
        let summary = get_recurring_issue_summary(&history);
        assert_eq!(summary.iterations_rejected, 5);
        assert_eq!(summary.unique_issues, 5);
        assert!(!dir.path().join(ESCALATION_FILE).exists());
    }

    #[tokio::test]
    async fn test_recurring_issue_escalates_on_third_occurrence() {
        let agent = ScriptedAgent::new(Box::new(|_| {
            Ok(ReviewOutcome::rejected("same again", vec![same_issue()]))
        }));
        let (mut qa, dir) = make_loop(agent, settings(50));

        let report = qa.run().await;
        assert_eq!(report.outcome, QaOutcome::Escalated);
        assert!(!report.is_approved());
        assert_eq!(qa.agent().reviews(), 3);
        assert_eq!(qa.agent().fixes(), 2);
        assert_eq!(report.recurring.len(), 1);
        assert_eq!(report.recurring[0].occurrence_count, 3);

        let path = report.escalation_path.unwrap();
        assert_eq!(path, dir.path().join(ESCALATION_FILE));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("Missing null check"));

        assert_eq!(IterationStore::new(dir.path()).load_history().len(), 3);
    }

    #[tokio::test]
    async fn test_fix_then_approve_updates_signoff() {
        let agent = ScriptedAgent::new(Box::new(|n| {
            if n == 1 {
                Ok(ReviewOutcome::rejected("nope", vec![same_issue()]))
            } else {
                Ok(ReviewOutcome::approved("fixed now"))
            }
        }));
        let (mut qa, dir) = make_loop(agent, settings(5));

        let report = qa.run().await;
        assert!(report.is_approved());
        assert_eq!(qa.agent().fixes(), 1);

        let fix_requests = qa.agent().fix_requests.lock().unwrap().clone();
        assert_eq!(fix_requests[0].fix_session, 1);
        assert!(fix_requests[0].human_request.is_none());

        let review_requests = qa.agent().review_requests.lock().unwrap().clone();
        assert_eq!(review_requests[1].qa_session, 2);

        let store = IterationStore::new(dir.path());
        let signoff = store.signoff().unwrap();
        assert_eq!(signoff.status, SignoffStatus::Approved);
        assert_eq!(signoff.qa_session, 2);
        assert!(signoff.issues_found.is_empty());
    }

    #[tokio::test]
    async fn test_fixer_error_aborts() {
        let agent = ScriptedAgent::new(Box::new(|_| {
            Ok(ReviewOutcome::rejected("nope", vec![same_issue()]))
        }))
        .with_fix(Box::new(|_| Ok(FixOutcome::error("could not edit"))));
        let (mut qa, dir) = make_loop(agent, settings(5));

        let report = qa.run().await;
        assert_eq!(report.outcome, QaOutcome::ErrorAborted);
        assert_eq!(report.error.as_deref(), Some("could not edit"));
        assert_eq!(qa.agent().reviews(), 1);

        let store = IterationStore::new(dir.path());
        assert_eq!(store.load_history().len(), 1);
        assert_eq!(store.signoff().unwrap().status, SignoffStatus::Rejected);
    }

    #[tokio::test]
    async fn test_human_fix_request_runs_first() {
        let agent = ScriptedAgent::new(Box::new(|_| Ok(ReviewOutcome::approved("ok"))));
        let (mut qa, dir) = make_loop(agent, settings(5));
        let request_path = dir.path().join(FIX_REQUEST_FILE);
        std::fs::write(&request_path, "Use the shared session helper").unwrap();

        let report = qa.run().await;
        assert!(report.is_approved());
        assert_eq!(qa.agent().fixes(), 1);
        let fix_requests = qa.agent().fix_requests.lock().unwrap().clone();
        assert_eq!(
            fix_requests[0].human_request.as_deref(),
            Some("Use the shared session helper")
        );
        assert!(!request_path.exists());
    }

    #[tokio::test]
    async fn test_human_fix_request_error_skips_review() {
        let agent = ScriptedAgent::new(Box::new(|_| Ok(ReviewOutcome::approved("ok"))))
            .with_fix(Box::new(|_| Err(AgentError::Reported("no".to_string()))));
        let (mut qa, dir) = make_loop(agent, settings(5));
        let request_path = dir.path().join(FIX_REQUEST_FILE);
        std::fs::write(&request_path, "Please fix the login page").unwrap();

        let report = qa.run().await;
        assert_eq!(report.outcome, QaOutcome::ErrorAborted);
        assert_eq!(qa.agent().reviews(), 0);
        assert!(request_path.exists());
    }

    #[tokio::test]
    async fn test_review_timeout_counts_as_error() {
        let agent = ScriptedAgent::new(Box::new(|_| Ok(ReviewOutcome::approved("ok"))))
            .with_review_delay(1, Duration::from_secs(30));
        let mut s = settings(5);
        s.call_timeout = Duration::from_millis(50);
        let (mut qa, _dir) = make_loop(agent, s);

        let report = qa.run().await;
        assert!(report.is_approved());
        assert_eq!(qa.agent().reviews(), 2);
        let requests = qa.agent().review_requests.lock().unwrap().clone();
        assert!(requests[1].previous_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_rejection_without_issues_synthesizes_one() {
        let agent = ScriptedAgent::new(Box::new(|n| {
            if n == 1 {
                Ok(ReviewOutcome::rejected("\nTests fail on CI\nmore detail", vec![]))
            } else {
                Ok(ReviewOutcome::approved("ok"))
            }
        }));
        let (mut qa, dir) = make_loop(agent, settings(5));

        assert!(qa.run().await.is_approved());
        let history = IterationStore::new(dir.path()).load_history();
        assert_eq!(history[0].issues.len(), 1);
        assert_eq!(history[0].issues[0].title, "Tests fail on CI");
    }

    #[tokio::test]
    async fn test_budget_counts_previous_runs() {
        let agent = ScriptedAgent::new(Box::new(|n| {
            Ok(ReviewOutcome::rejected(
                "again",
                vec![Issue::new(&format!("Issue {}", n)).with_file(&format!("f{}.rs", n))],
            ))
        }));
        let (mut qa, dir) = make_loop(agent, settings(3));
        let store = IterationStore::new(dir.path());
        store
            .record_iteration(1, IterationStatus::Rejected, &[Issue::new("Old").with_file("a.rs")], None)
            .unwrap();
        store
            .record_iteration(2, IterationStatus::Rejected, &[Issue::new("Older").with_file("b.rs")], None)
            .unwrap();

        let report = qa.run().await;
        assert_eq!(report.outcome, QaOutcome::RejectedExhausted);
        assert_eq!(qa.agent().reviews(), 1);
        assert_eq!(qa.agent().fixes(), 0);
        assert_eq!(store.load_history().last().unwrap().iteration, 3);
    }

    #[tokio::test]
    async fn test_zero_budget_is_exhausted_immediately() {
        let agent = ScriptedAgent::new(Box::new(|_| Ok(ReviewOutcome::approved("ok"))));
        let (mut qa, _dir) = make_loop(agent, settings(0));
        let report = qa.run().await;
        assert_eq!(report.outcome, QaOutcome::RejectedExhausted);
        assert_eq!(qa.agent().reviews(), 0);
    }

    #[tokio::test]
    async fn test_generates_manual_test_plan_when_enabled() {
        let agent = ScriptedAgent::new(Box::new(|_| Ok(ReviewOutcome::approved("ok"))));
        let mut s = settings(5);
        s.manual_test_plan = true;
        let (mut qa, dir) = make_loop(agent, s);

        assert!(qa.run().await.is_approved());
        assert!(dir.path().join("MANUAL_TEST_PLAN.md").exists());
    }

    #[tokio::test]
    async fn test_run_qa_validation_loop_returns_bool() {
        let dir = tempfile::tempdir().unwrap();
        let agent = ScriptedAgent::new(Box::new(|_| Ok(ReviewOutcome::error("down"))));
        let approved = run_qa_validation_loop(agent, dir.path(), dir.path(), settings(5)).await;
        assert!(!approved);
    }

    #[test]
    fn test_backoff_doubles() {
        let agent = ScriptedAgent::new(Box::new(|_| Ok(ReviewOutcome::approved("ok"))));
        let mut s = settings(5);
        s.error_backoff = Duration::from_millis(100);
        let (qa, _dir) = make_loop(agent, s);
        assert_eq!(qa.backoff(1), Duration::from_millis(100));
        assert_eq!(qa.backoff(2), Duration::from_millis(200));
        assert_eq!(qa.backoff(3), Duration::from_millis(400));
    }
}
