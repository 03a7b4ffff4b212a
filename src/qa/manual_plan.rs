//! Test framework detection and the manual test plan fallback.
//!
//! When a project has no automated test framework the reviewer cannot run a
//! suite, so a `MANUAL_TEST_PLAN.md` checklist is generated once per spec
//! directory from the acceptance criteria in `spec.md`.

use crate::io::write_if_missing;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const MANUAL_TEST_PLAN_FILE: &str = "MANUAL_TEST_PLAN.md";
pub const SPEC_FILE: &str = "spec.md";

static CRITERIA_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^#{1,6}\s*(acceptance criteria|success criteria|requirements)\b").unwrap()
});

static LIST_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(?:\[[ xX]\]\s*)?(.+?)\s*$").unwrap());

const DEFAULT_CHECKLIST: &[&str] = &[
    "The application starts without errors",
    "The new feature is reachable from its intended entry point",
    "The primary user flow completes end to end",
    "Invalid input is rejected with a clear message",
    "Existing functionality touched by the change still works",
    "No errors or warnings appear in the console or logs",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestFramework {
    Cargo,
    GoTest,
    Pytest,
    Jest,
    Vitest,
    Mocha,
    Playwright,
    Cypress,
    RSpec,
    PhpUnit,
}

impl fmt::Display for TestFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cargo => "cargo test",
            Self::GoTest => "go test",
            Self::Pytest => "pytest",
            Self::Jest => "jest",
            Self::Vitest => "vitest",
            Self::Mocha => "mocha",
            Self::Playwright => "playwright",
            Self::Cypress => "cypress",
            Self::RSpec => "rspec",
            Self::PhpUnit => "phpunit",
        };
        f.write_str(s)
    }
}

const JS_FRAMEWORKS: &[(&str, TestFramework)] = &[
    ("vitest", TestFramework::Vitest),
    ("jest", TestFramework::Jest),
    ("mocha", TestFramework::Mocha),
    ("@playwright/test", TestFramework::Playwright),
    ("cypress", TestFramework::Cypress),
];

/// Detect the first automated test framework configured in `project_dir`.
pub fn detect_test_framework(project_dir: &Path) -> Option<TestFramework> {
    if project_dir.join("Cargo.toml").exists() {
        return Some(TestFramework::Cargo);
    }
    if project_dir.join("go.mod").exists() {
        return Some(TestFramework::GoTest);
    }
    if project_dir.join("pytest.ini").exists() || project_dir.join("conftest.py").exists() {
        return Some(TestFramework::Pytest);
    }
    for file in ["pyproject.toml", "setup.cfg", "tox.ini"] {
        if file_mentions(&project_dir.join(file), "pytest") {
            return Some(TestFramework::Pytest);
        }
    }
    if let Some(framework) = detect_js_framework(&project_dir.join("package.json")) {
        return Some(framework);
    }
    if project_dir.join(".rspec").exists() || file_mentions(&project_dir.join("Gemfile"), "rspec")
    {
        return Some(TestFramework::RSpec);
    }
    if project_dir.join("phpunit.xml").exists() || project_dir.join("phpunit.xml.dist").exists() {
        return Some(TestFramework::PhpUnit);
    }
    None
}

fn file_mentions(path: &Path, needle: &str) -> bool {
    std::fs::read_to_string(path)
        .map(|c| c.contains(needle))
        .unwrap_or(false)
}

fn detect_js_framework(package_json: &Path) -> Option<TestFramework> {
    let content = std::fs::read_to_string(package_json).ok()?;
    let manifest: serde_json::Value = serde_json::from_str(&content).ok()?;
    let has_dep = |name: &str| {
        ["dependencies", "devDependencies"]
            .iter()
            .any(|section| manifest.get(section).and_then(|d| d.get(name)).is_some())
    };
    JS_FRAMEWORKS
        .iter()
        .find(|(name, _)| has_dep(name))
        .map(|(_, framework)| *framework)
}

/// List items under the first acceptance/success criteria heading of a spec.
pub fn extract_acceptance_criteria(spec: &str) -> Vec<String> {
    let mut criteria = Vec::new();
    let mut in_section = false;

    for line in spec.lines() {
        if line.trim_start().starts_with('#') {
            if in_section {
                break;
            }
            in_section = CRITERIA_HEADING.is_match(line.trim_start());
            continue;
        }
        if in_section && let Some(caps) = LIST_ITEM.captures(line) {
            criteria.push(caps[1].to_string());
        }
    }

    criteria
}

/// Markdown checklist for manual verification.
pub fn render_manual_test_plan(spec_name: &str, criteria: &[String]) -> String {
    let mut out = format!("# Manual Test Plan - {}\n\n", spec_name);
    out.push_str(
        "No automated test framework was detected for this project. \
         Verify each item by hand before approving.\n\n",
    );

    if criteria.is_empty() {
        out.push_str("## Default Checklist\n\n");
        for item in DEFAULT_CHECKLIST {
            out.push_str(&format!("- [ ] {}\n", item));
        }
    } else {
        out.push_str("## Acceptance Criteria\n\n");
        for item in criteria {
            out.push_str(&format!("- [ ] {}\n", item));
        }
    }

    out.push_str("\n## Notes\n\n- Tester:\n- Date:\n- Result:\n");
    out
}

/// Generate `MANUAL_TEST_PLAN.md` in `spec_dir` unless the project has a test
/// framework or the plan already exists. Returns the path when a file was written.
pub fn ensure_manual_test_plan(
    project_dir: &Path,
    spec_dir: &Path,
) -> std::io::Result<Option<PathBuf>> {
    if detect_test_framework(project_dir).is_some() {
        return Ok(None);
    }

    let criteria = std::fs::read_to_string(spec_dir.join(SPEC_FILE))
        .map(|spec| extract_acceptance_criteria(&spec))
        .unwrap_or_default();
    let spec_name = spec_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "spec".to_string());

    let path = spec_dir.join(MANUAL_TEST_PLAN_FILE);
    let written = write_if_missing(&path, render_manual_test_plan(&spec_name, &criteria).as_bytes())?;
    Ok(written.then_some(path))
}
