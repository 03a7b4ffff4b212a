//! [`QaAgent`] backed by the Claude CLI.
//!
//! Each session writes `qa-<kind>-<n>-prompt.md` and `qa-<kind>-<n>-output.log`
//! into the log directory. The reviewer's verdict is read back from the
//! plan document's `qa_signoff`; a JSON verdict at the end of the transcript
//! is accepted when the signoff was left untouched.

use crate::agent::prompts::{build_fix_prompt, build_review_prompt};
use crate::agent::{FixOutcome, FixRequest, QaAgent, ReviewOutcome, ReviewRequest};
use crate::config::Config;
use crate::errors::AgentError;
use crate::qa::issue::Issue;
use crate::qa::store::{IterationStore, SignoffStatus};
use crate::stream::{Activity, Transcript};
use crate::ui::QaUI;
use crate::util::{extract_json_objects, truncate_chars};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ClaudeCliAgent {
    claude_cmd: String,
    flags: Vec<String>,
    project_dir: PathBuf,
    log_dir: PathBuf,
    prompts_dir: Option<PathBuf>,
    ui: Option<Arc<QaUI>>,
}

/// Raw result of one Claude process.
struct Session {
    transcript: Transcript,
    exit_code: i32,
    duration: Duration,
}

/// Aborts the elapsed-time ticker however the session ends.
struct ElapsedTicker(JoinHandle<()>);

impl ElapsedTicker {
    fn spawn(ui: Option<Arc<QaUI>>, start: Instant) -> Self {
        Self(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Some(ref ui) = ui {
                    ui.update_elapsed(start.elapsed());
                }
            }
        }))
    }
}

impl Drop for ElapsedTicker {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Verdict object the reviewer prints at the end of its reply.
#[derive(Debug, Deserialize)]
struct Verdict {
    status: String,
    #[serde(default)]
    issues: Vec<Issue>,
    #[serde(default, alias = "summary")]
    message: Option<String>,
}

impl ClaudeCliAgent {
    pub fn new(config: &Config) -> Self {
        Self {
            claude_cmd: config.claude_cmd.clone(),
            flags: config.claude_flags(),
            project_dir: config.project_dir.clone(),
            log_dir: config.log_dir.clone(),
            prompts_dir: Some(config.prompts_dir.clone()),
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<QaUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    fn log_step(&self, msg: &str) {
        debug!("{}", msg);
        if let Some(ref ui) = self.ui {
            ui.log_step(msg);
        }
    }

    async fn run_session(&self, prompt: &str, label: &str) -> Result<Session, AgentError> {
        std::fs::create_dir_all(&self.log_dir)?;
        let prompt_file = self.log_dir.join(format!("qa-{}-prompt.md", label));
        std::fs::write(&prompt_file, prompt).map_err(|source| AgentError::PromptWriteFailed {
            path: prompt_file.clone(),
            source,
        })?;

        let start = Instant::now();
        let mut cmd = Command::new(&self.claude_cmd);
        cmd.args(&self.flags);

        self.log_step(&format!("Spawning: {} {}", self.claude_cmd, self.flags.join(" ")));

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .current_dir(&self.project_dir)
            .kill_on_drop(true)
            .spawn()
            .map_err(AgentError::SpawnFailed)?;

        if let Some(mut stdin) = child.stdin.take() {
            self.log_step(&format!("Writing {} chars to stdin...", prompt.len()));
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Reported("Claude stdout was not captured".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        let ticker = ElapsedTicker::spawn(self.ui.clone(), start);

        let mut transcript = Transcript::new();
        while let Some(line) = lines.next_line().await? {
            for activity in transcript.push_line(&line) {
                if let Some(ref ui) = self.ui {
                    match activity {
                        Activity::Tool { emoji, description } => ui.show_tool_use(emoji, &description),
                        Activity::Thinking(snippet) => ui.show_thinking(&snippet),
                    }
                }
            }
        }

        let status = child.wait().await;
        drop(ticker);
        let status = status?;

        let duration = start.elapsed();
        let exit_code = status.code().unwrap_or(-1);
        self.log_step(&format!(
            "Completed in {:.1}s (exit: {})",
            duration.as_secs_f64(),
            exit_code
        ));

        let output_file = self.log_dir.join(format!("qa-{}-output.log", label));
        if let Err(e) = std::fs::write(&output_file, transcript.output()) {
            warn!(path = %output_file.display(), error = %e, "Failed to write session output log");
        }

        Ok(Session {
            transcript,
            exit_code,
            duration,
        })
    }
}

#[async_trait]
impl QaAgent for ClaudeCliAgent {
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome, AgentError> {
        let store = IterationStore::new(&request.spec_dir);
        let before = store.signoff();

        let prompt = build_review_prompt(request, self.prompts_dir.as_deref());
        let session = self
            .run_session(&prompt, &format!("review-{}", request.qa_session))
            .await?;

        if session.exit_code != 0 {
            return Err(AgentError::NonZeroExit {
                exit_code: session.exit_code,
            });
        }

        info!(
            qa_session = request.qa_session,
            duration_secs = session.duration.as_secs_f64(),
            "Reviewer session finished"
        );
        Ok(review_outcome(
            &request.spec_dir,
            before,
            &session.transcript,
        ))
    }

    async fn fix(&self, request: &FixRequest) -> Result<FixOutcome, AgentError> {
        let prompt = build_fix_prompt(request, self.prompts_dir.as_deref());
        let session = self
            .run_session(&prompt, &format!("fix-{}", request.fix_session))
            .await?;

        if session.exit_code != 0 {
            return Err(AgentError::NonZeroExit {
                exit_code: session.exit_code,
            });
        }
        if session.transcript.is_error() {
            return Ok(FixOutcome::error(truncate_chars(
                session.transcript.output().trim(),
                500,
            )));
        }

        info!(
            fix_session = request.fix_session,
            duration_secs = session.duration.as_secs_f64(),
            "Fixer session finished"
        );
        Ok(FixOutcome::fixed(truncate_chars(
            session.transcript.output().trim(),
            500,
        )))
    }
}

/// Decide the reviewer outcome: the signoff written during the session wins,
/// then a JSON verdict in the transcript, otherwise an error.
fn review_outcome(
    spec_dir: &Path,
    before: Option<crate::qa::store::QaSignoff>,
    transcript: &Transcript,
) -> ReviewOutcome {
    let summary = truncate_chars(transcript.output().trim(), 500);

    let after = IterationStore::new(spec_dir).signoff();
    if after != before
        && let Some(signoff) = after
    {
        match signoff.status {
            SignoffStatus::Approved => return ReviewOutcome::approved(summary),
            SignoffStatus::Rejected => {
                return ReviewOutcome::rejected(summary, signoff.issues_found);
            }
            SignoffStatus::Pending | SignoffStatus::FixesApplied => {}
        }
    }

    if let Some(verdict) = find_verdict(&transcript.full_text()) {
        match verdict.status.to_lowercase().as_str() {
            "approved" | "pass" => {
                return ReviewOutcome::approved(verdict.message.unwrap_or(summary));
            }
            "rejected" | "fail" => {
                return ReviewOutcome::rejected(
                    verdict.message.unwrap_or(summary),
                    verdict.issues,
                );
            }
            other => debug!(status = other, "Ignoring verdict with unknown status"),
        }
    }

    if transcript.is_error() {
        ReviewOutcome::error(format!("Claude reported an error: {}", summary))
    } else {
        ReviewOutcome::error("Reviewer finished without updating qa_signoff or printing a verdict")
    }
}

/// The last JSON object in `text` that looks like a verdict.
fn find_verdict(text: &str) -> Option<Verdict> {
    extract_json_objects(text)
        .into_iter()
        .rev()
        .find_map(|candidate| serde_json::from_str::<Verdict>(candidate).ok())
}
