//! Recurring-issue detection across QA iterations.
//!
//! An issue "recurs" when it, or something at least as similar as the
//! similarity threshold, has been reported in enough iterations that another
//! fix pass is unlikely to help. The loop uses this to escalate early instead
//! of burning the whole iteration budget.

use crate::qa::issue::{DEFAULT_SIMILARITY_THRESHOLD, Issue, normalize_key, similarity};
use crate::qa::store::{IterationRecord, IterationStatus};
use serde::Serialize;

/// Occurrences (history plus current) at which an issue counts as recurring.
pub const DEFAULT_RECURRING_THRESHOLD: usize = 3;

/// How many entries `most_common` keeps.
pub const MOST_COMMON_LIMIT: usize = 5;

/// A current issue that crossed the recurrence threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringIssue {
    pub issue: Issue,
    pub key: String,
    /// Matching historical occurrences plus the current one.
    pub occurrence_count: usize,
    /// Historical iterations the issue was seen in, ascending.
    pub iterations: Vec<u32>,
}

/// One cluster of similar issues in the history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueFrequency {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub occurrences: usize,
    pub first_seen: u32,
}

/// Aggregate view of a QA history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurrenceSummary {
    pub total_issues: usize,
    pub unique_issues: usize,
    pub iterations_approved: usize,
    pub iterations_rejected: usize,
    pub fix_success_rate: f64,
    pub most_common: Vec<IssueFrequency>,
}

#[derive(Debug, Clone, Copy)]
pub struct RecurrenceDetector {
    recurring_threshold: usize,
    similarity_threshold: f64,
}

impl Default for RecurrenceDetector {
    fn default() -> Self {
        Self::new(DEFAULT_RECURRING_THRESHOLD, DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl RecurrenceDetector {
    pub fn new(recurring_threshold: usize, similarity_threshold: f64) -> Self {
        Self {
            recurring_threshold,
            similarity_threshold,
        }
    }

    pub fn recurring_threshold(&self) -> usize {
        self.recurring_threshold
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    /// Check `current` against every issue in `history`.
    ///
    /// `history` must not contain the iteration that produced `current`.
    /// The returned list follows the order of `current`.
    pub fn has_recurring_issues(
        &self,
        current: &[Issue],
        history: &[IterationRecord],
    ) -> (bool, Vec<RecurringIssue>) {
        let mut recurring = Vec::new();

        for issue in current {
            let mut occurrence_count = 1;
            let mut iterations: Vec<u32> = Vec::new();

            for record in history {
                for past in &record.issues {
                    if similarity(issue, past) >= self.similarity_threshold {
                        occurrence_count += 1;
                        if iterations.last() != Some(&record.iteration) {
                            iterations.push(record.iteration);
                        }
                    }
                }
            }

            if occurrence_count >= self.recurring_threshold {
                recurring.push(RecurringIssue {
                    issue: issue.clone(),
                    key: normalize_key(issue),
                    occurrence_count,
                    iterations,
                });
            }
        }

        (!recurring.is_empty(), recurring)
    }

    /// Totals, approval ratio and the most frequent issue clusters.
    pub fn summarize(&self, history: &[IterationRecord]) -> RecurrenceSummary {
        let mut clusters: Vec<(Issue, IssueFrequency)> = Vec::new();
        let mut total_issues = 0;
        let mut iterations_approved = 0;
        let mut iterations_rejected = 0;

        for record in history {
            match record.status {
                IterationStatus::Approved => iterations_approved += 1,
                IterationStatus::Rejected => iterations_rejected += 1,
                IterationStatus::Error => {}
            }

            for issue in &record.issues {
                total_issues += 1;
                let existing = clusters
                    .iter_mut()
                    .find(|(rep, _)| similarity(rep, issue) >= self.similarity_threshold);
                match existing {
                    Some((_, freq)) => freq.occurrences += 1,
                    None => clusters.push((
                        issue.clone(),
                        IssueFrequency {
                            title: issue.title.clone(),
                            file: issue.file.clone(),
                            line: issue.line,
                            occurrences: 1,
                            first_seen: record.iteration,
                        },
                    )),
                }
            }
        }

        let unique_issues = clusters.len();
        let mut most_common: Vec<IssueFrequency> =
            clusters.into_iter().map(|(_, freq)| freq).collect();
        most_common.sort_by(|a, b| {
            b.occurrences
                .cmp(&a.occurrences)
                .then(a.first_seen.cmp(&b.first_seen))
        });
        most_common.truncate(MOST_COMMON_LIMIT);

        let decided = iterations_approved + iterations_rejected;
        let fix_success_rate = if decided == 0 {
            0.0
        } else {
            iterations_approved as f64 / decided as f64
        };

        RecurrenceSummary {
            total_issues,
            unique_issues,
            iterations_approved,
            iterations_rejected,
            fix_success_rate,
            most_common,
        }
    }
}

/// [`RecurrenceDetector::has_recurring_issues`] with the default similarity threshold.
pub fn has_recurring_issues(
    current: &[Issue],
    history: &[IterationRecord],
    threshold: usize,
) -> (bool, Vec<RecurringIssue>) {
    RecurrenceDetector::new(threshold, DEFAULT_SIMILARITY_THRESHOLD)
        .has_recurring_issues(current, history)
}

/// [`RecurrenceDetector::summarize`] with default thresholds.
pub fn get_recurring_issue_summary(history: &[IterationRecord]) -> RecurrenceSummary {
    RecurrenceDetector::default().summarize(history)
}
