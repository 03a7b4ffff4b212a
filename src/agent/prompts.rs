//! Reviewer and fixer prompt templates.
//!
//! Built-in templates can be replaced per project by dropping
//! `qa_reviewer.md` or `qa_fixer.md` into `.vigil/prompts/`. Templates use
//! `{{name}}` placeholders:
//!
//! - `{{spec_dir}}`, `{{project_dir}}`
//! - `{{qa_session}}`, `{{max_iterations}}` (reviewer)
//! - `{{fix_session}}` (fixer)

use crate::agent::{FixRequest, ReviewRequest};
use std::path::Path;
use tracing::debug;

pub const REVIEWER_PROMPT_FILE: &str = "qa_reviewer.md";
pub const FIXER_PROMPT_FILE: &str = "qa_fixer.md";

const REVIEWER_TEMPLATE: &str = r#"# QA Reviewer - Session {{qa_session}} of {{max_iterations}}

You are the QA reviewer for the work item in `{{spec_dir}}`.
The project root is `{{project_dir}}`.

## Your Task

1. Read `spec.md` and `implementation_plan.json` in the work item directory
2. Verify every acceptance criterion against the actual code
3. Run the project's test suite; if `MANUAL_TEST_PLAN.md` exists, walk through it
4. Look for regressions in code touched by the implementation

## Recording Your Verdict

Update the `qa_signoff` object in `implementation_plan.json`:

- Approve: `{"status": "approved", "qa_session": {{qa_session}}}`
- Reject: `{"status": "rejected", "qa_session": {{qa_session}}, "issues_found": [...]}`

Each entry of `issues_found` is an object with `title`, and where known
`file`, `line`, `type` (critical, major or minor) and `description`.

Finish your reply with the same verdict as a JSON object:

```json
{"status": "approved|rejected", "issues": [{"title": "...", "file": "...", "line": 1}]}
```

Only approve when every criterion is met. Do not modify source code.
"#;

const FIXER_TEMPLATE: &str = r#"# QA Fixer - Session {{fix_session}}

The QA reviewer rejected the work item in `{{spec_dir}}`.
The project root is `{{project_dir}}`.

## Your Task

1. Read the `qa_signoff.issues_found` list in `implementation_plan.json`
2. Fix every listed issue in the source code
3. Run the test suite and make sure it passes
4. Do not change `qa_signoff` yourself; the QA loop records the fix pass

Keep changes minimal and focused on the reported issues.
"#;

/// Replace every `{{key}}` in `template` with its value.
pub fn render(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |out, (key, value)| {
        out.replace(&format!("{{{{{}}}}}", key), value)
    })
}

fn load_template(prompts_dir: Option<&Path>, file: &str, builtin: &str) -> String {
    if let Some(dir) = prompts_dir {
        let path = dir.join(file);
        if let Ok(content) = std::fs::read_to_string(&path) {
            debug!(path = %path.display(), "Using prompt override");
            return content;
        }
    }
    builtin.to_string()
}

pub fn build_review_prompt(request: &ReviewRequest, prompts_dir: Option<&Path>) -> String {
    let template = load_template(prompts_dir, REVIEWER_PROMPT_FILE, REVIEWER_TEMPLATE);
    let mut prompt = render(
        &template,
        &[
            ("spec_dir", request.spec_dir.display().to_string()),
            ("project_dir", request.project_dir.display().to_string()),
            ("qa_session", request.qa_session.to_string()),
            ("max_iterations", request.max_iterations.to_string()),
        ],
    );

    if let Some(error) = &request.previous_error {
        prompt.push_str("\n## Previous Attempt Failed\n\n");
        prompt.push_str("The last review attempt did not produce a verdict:\n\n```\n");
        prompt.push_str(error.trim());
        prompt.push_str("\n```\n\nAvoid repeating that failure and make sure the signoff is written.\n");
    }

    prompt
}

pub fn build_fix_prompt(request: &FixRequest, prompts_dir: Option<&Path>) -> String {
    let template = load_template(prompts_dir, FIXER_PROMPT_FILE, FIXER_TEMPLATE);
    let mut prompt = render(
        &template,
        &[
            ("spec_dir", request.spec_dir.display().to_string()),
            ("project_dir", request.project_dir.display().to_string()),
            ("fix_session", request.fix_session.to_string()),
        ],
    );

    if let Some(feedback) = &request.human_request {
        prompt.push_str("\n## Human Feedback (highest priority)\n\n");
        prompt.push_str("A human reviewer left the following instructions. Address them first:\n\n");
        prompt.push_str(feedback.trim());
        prompt.push('\n');
    }

    prompt
}
