use crate::qa::recurrence::{RecurrenceSummary, RecurringIssue};
use crate::qa::issue::Issue;
use crate::ui::icons::{CHECK, CROSS, ESCALATE, FILE, FIX, RETRY, REVIEW, STATS, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Terminal UI for a QA run, rendered via `indicatif`.
///
/// A single spinner tracks the active reviewer or fixer session. Verdicts,
/// tool activity and final summaries are printed above it.
pub struct QaUI {
    multi: MultiProgress,
    session_bar: ProgressBar,
    verbose: bool,
    label: Mutex<String>,
}

impl QaUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let session_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let session_bar = multi.add(ProgressBar::new_spinner());
        session_bar.set_style(session_style);
        session_bar.set_prefix("   QA");

        Self {
            multi,
            session_bar,
            verbose,
            label: Mutex::new(String::new()),
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn set_status(&self, detail: impl std::fmt::Display) {
        let label = self.label.lock().map(|l| l.clone()).unwrap_or_default();
        self.session_bar.set_message(format!("{} {}", label, detail));
    }

    fn start_session(&self, label: String) {
        if let Ok(mut current) = self.label.lock() {
            *current = label;
        }
        self.session_bar.reset();
        self.set_status(style("(starting...)").dim());
        self.session_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    pub fn print_header(&self, spec_dir: &Path, max_iterations: u32) {
        self.print_line("");
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{} QA validation: {}",
            style("▶").green().bold(),
            style(spec_dir.display()).yellow().bold()
        ));
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
        self.print_line(format!(
            "{}  {} iterations max",
            style("Budget:").dim(),
            max_iterations
        ));
        self.print_line("");
    }

    pub fn start_review(&self, session: u32, max: u32) {
        self.start_session(format!(
            "{}Review {}/{}",
            REVIEW,
            style(session).cyan(),
            max
        ));
    }

    pub fn start_fix(&self, session: u32, human_request: bool) {
        let suffix = if human_request { " (human request)" } else { "" };
        self.start_session(format!("{}Fix {}{}", FIX, style(session).cyan(), suffix));
    }

    pub fn log_step(&self, msg: &str) {
        self.set_status(style(format!("({})", msg)).dim());
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(msg).dim()));
        }
    }

    pub fn update_elapsed(&self, elapsed: Duration) {
        let secs = elapsed.as_secs();
        let time_str = if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}s", secs)
        };
        self.set_status(style(format!("({})", time_str)).dim());
    }

    /// Show a tool use event (Read, Edit, Bash, ...).
    pub fn show_tool_use(&self, emoji: &str, description: &str) {
        self.set_status(format!("{} {}", emoji, style(description).yellow()));
        self.print_line(format!("    {} {}", emoji, style(description).yellow()));
    }

    pub fn show_thinking(&self, snippet: &str) {
        self.set_status(style(format!("💭 {}", snippet)).dim());
        if self.verbose {
            self.print_line(format!("    {} {}", style("💭").dim(), style(snippet).dim()));
        }
    }

    pub fn review_approved(&self, session: u32) {
        self.session_bar
            .finish_with_message(format!("{}Review {} approved", CHECK, session));
    }

    pub fn review_rejected(&self, session: u32, issues: &[Issue]) {
        self.session_bar.finish_with_message(format!(
            "{}Review {} rejected ({} issue{})",
            CROSS,
            session,
            issues.len(),
            if issues.len() == 1 { "" } else { "s" }
        ));
        for issue in issues {
            self.print_line(format!(
                "    {} {}",
                style("-").dim(),
                style(issue).red()
            ));
        }
    }

    pub fn review_error(&self, attempt: u32, max_attempts: u32, msg: &str) {
        self.session_bar.finish_with_message(format!(
            "{}Review attempt {}/{} failed: {}",
            RETRY, attempt, max_attempts, msg
        ));
    }

    pub fn fix_applied(&self, session: u32) {
        self.session_bar
            .finish_with_message(format!("{}Fix {} applied", CHECK, session));
    }

    pub fn fix_failed(&self, session: u32, msg: &str) {
        self.session_bar
            .finish_with_message(format!("{}Fix {} failed: {}", CROSS, session, msg));
    }

    pub fn show_manual_test_plan(&self, path: &Path) {
        self.print_line(format!(
            "{}No test framework detected, wrote {}",
            FILE,
            style(path.display()).cyan()
        ));
    }

    pub fn print_approved(&self, iterations: u32) {
        self.print_line(format!(
            "\n{}{} after {} iteration{}\n",
            CHECK,
            style("QA approved").green().bold(),
            iterations,
            if iterations == 1 { "" } else { "s" }
        ));
    }

    pub fn print_escalated(&self, report: &Path, recurring: &[RecurringIssue]) {
        self.print_line(format!(
            "\n{}{}",
            ESCALATE,
            style("Recurring issues detected, escalating to a human").red().bold()
        ));
        for r in recurring {
            self.print_line(format!(
                "    {} {} ({} occurrences)",
                style("-").dim(),
                r.issue,
                style(r.occurrence_count).yellow()
            ));
        }
        self.print_line(format!(
            "  {} {}\n",
            style("Report:").dim(),
            style(report.display()).cyan()
        ));
    }

    pub fn print_error_aborted(&self, reason: &str, report: Option<&Path>) {
        self.print_line(format!(
            "\n{}{}: {}",
            CROSS,
            style("QA aborted").red().bold(),
            reason
        ));
        if let Some(path) = report {
            self.print_line(format!(
                "  {} {}",
                style("Report:").dim(),
                style(path.display()).cyan()
            ));
        }
        self.print_line("");
    }

    /// Final summary after the iteration budget runs out.
    pub fn print_exhausted(&self, max_iterations: u32, summary: &RecurrenceSummary) {
        self.print_line(format!(
            "\n{}{} ({} iterations)",
            WARN,
            style("QA iteration budget exhausted").yellow().bold(),
            max_iterations
        ));
        self.print_summary(summary);
    }

    pub fn print_summary(&self, summary: &RecurrenceSummary) {
        for line in summary_lines(summary) {
            self.print_line(line);
        }
    }
}

/// Plain-text lines for a recurrence summary.
pub fn summary_lines(summary: &RecurrenceSummary) -> Vec<String> {
    let mut lines = vec![
        format!("{}{}", STATS, style("QA summary").underlined()),
        format!(
            "  Iterations: {} approved, {} rejected",
            style(summary.iterations_approved).green(),
            style(summary.iterations_rejected).red()
        ),
        format!(
            "  Fix success rate: {:.0}%",
            summary.fix_success_rate * 100.0
        ),
        format!(
            "  Issues: {} total, {} unique",
            summary.total_issues, summary.unique_issues
        ),
    ];
    if !summary.most_common.is_empty() {
        lines.push("  Most common:".to_string());
        for freq in &summary.most_common {
            lines.push(format!(
                "    {} {} (x{}, first seen in iteration {})",
                style("-").dim(),
                freq.title,
                freq.occurrences,
                freq.first_seen
            ));
        }
    }
    lines
}
