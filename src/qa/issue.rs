//! QA issues and the normalization/similarity heuristic used to compare them
//! across iterations.
//!
//! Two issues are compared through a normalized key of the form
//! `"{title}|{file}|{line}"` and a similarity score in `[0, 1]` that blends
//! title edit-distance with file/line agreement.
//!
//! ## Example
//!
//! ```
//! use vigil::qa::issue::{Issue, normalize_key, similarity};
//!
//! let a = Issue::new("Error: Missing null check").with_file("src/auth.rs").with_line(42);
//! let b = Issue::new("missing null check").with_file("src/auth.rs").with_line(42);
//!
//! assert_eq!(normalize_key(&a), "missing null check|src/auth.rs|42");
//! assert_eq!(similarity(&a, &b), 1.0);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default score at or above which two issues are considered the same problem.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;

const TITLE_WEIGHT: f64 = 0.7;
const LOCATION_WEIGHT: f64 = 0.3;

/// Checked in this order, each at most once.
const TITLE_PREFIXES: [&str; 4] = ["error:", "issue:", "bug:", "fix:"];

/// A problem reported by the reviewer in one QA iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawIssue")]
pub struct Issue {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Category such as "critical" or "minor". Serialized as `type`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Issue {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, file: &str) -> Self {
        self.file = Some(file.to_string());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.kind = Some(kind.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    /// Category used for rollup counts; `"unknown"` when the reviewer gave none.
    pub fn kind_or_unknown(&self) -> &str {
        self.kind.as_deref().unwrap_or("unknown")
    }

    /// `file:line`, `file`, or `None` when the issue has no location.
    pub fn location(&self) -> Option<String> {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => Some(format!("{}:{}", file, line)),
            (Some(file), None) => Some(file.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location() {
            Some(loc) => write!(f, "{} ({})", self.title, loc),
            None => write!(f, "{}", self.title),
        }
    }
}

/// Wire shapes accepted for an issue. Reviewers sometimes emit bare strings,
/// numeric strings for lines, or `kind`/`severity` instead of `type`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawIssue {
    Text(String),
    Record(RawIssueRecord),
}

#[derive(Deserialize)]
struct RawIssueRecord {
    #[serde(default, alias = "issue", alias = "summary")]
    title: Option<String>,
    #[serde(default, alias = "path", alias = "location")]
    file: Option<String>,
    #[serde(default)]
    line: Option<RawLine>,
    #[serde(default, rename = "type", alias = "kind", alias = "severity")]
    kind: Option<String>,
    #[serde(default, alias = "details")]
    description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLine {
    Number(u64),
    Float(f64),
    Text(String),
}

impl RawLine {
    fn into_line(self) -> Option<u32> {
        match self {
            RawLine::Number(n) => u32::try_from(n).ok(),
            RawLine::Float(f) if f >= 0.0 && f <= u32::MAX as f64 => Some(f as u32),
            RawLine::Float(_) => None,
            RawLine::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl From<RawIssue> for Issue {
    fn from(raw: RawIssue) -> Self {
        match raw {
            RawIssue::Text(title) => Issue::new(&title),
            RawIssue::Record(r) => {
                let description = r.description.unwrap_or_default();
                let title = r
                    .title
                    .filter(|t| !t.trim().is_empty())
                    .or_else(|| description.lines().next().map(str::to_string))
                    .unwrap_or_default();
                Issue {
                    title,
                    file: r.file.filter(|f| !f.trim().is_empty()),
                    line: r.line.and_then(RawLine::into_line),
                    kind: r.kind.filter(|k| !k.trim().is_empty()),
                    description,
                }
            }
        }
    }
}

/// Lower-case the title and strip leading `error:`, `issue:`, `bug:` and
/// `fix:` prefixes in a single ordered pass.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let mut rest = lowered.as_str();
    for prefix in TITLE_PREFIXES {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped.trim_start();
        }
    }
    rest.trim_end().to_string()
}

/// Comparable key for an issue: `"{normalized_title}|{file}|{line}"`.
pub fn normalize_key(issue: &Issue) -> String {
    format!(
        "{}|{}|{}",
        normalize_title(&issue.title),
        issue.file.as_deref().map(str::trim).unwrap_or(""),
        issue.line.map(|l| l.to_string()).unwrap_or_default()
    )
}

/// Similarity of two issues in `[0, 1]`. Symmetric; identical keys score exactly 1.0.
///
/// Issues in different files never reach [`DEFAULT_SIMILARITY_THRESHOLD`].
pub fn similarity(a: &Issue, b: &Issue) -> f64 {
    if normalize_key(a) == normalize_key(b) {
        return 1.0;
    }

    let title = title_ratio(&normalize_title(&a.title), &normalize_title(&b.title));
    let location = location_agreement(a, b);
    (TITLE_WEIGHT * title + LOCATION_WEIGHT * location).clamp(0.0, 1.0)
}

/// Whether two issues should be treated as the same problem.
pub fn is_same_issue(a: &Issue, b: &Issue, threshold: f64) -> bool {
    similarity(a, b) >= threshold
}

fn location_agreement(a: &Issue, b: &Issue) -> f64 {
    let file_a = a.file.as_deref().map(|f| f.trim().to_lowercase());
    let file_b = b.file.as_deref().map(|f| f.trim().to_lowercase());

    match (file_a, file_b) {
        (Some(fa), Some(fb)) if fa != fb => 0.0,
        (Some(_), None) | (None, Some(_)) => 0.25,
        _ => match (a.line, b.line) {
            (Some(la), Some(lb)) if la == lb => 1.0,
            (None, None) => 1.0,
            (Some(_), None) | (None, Some(_)) => 0.75,
            _ => 0.5,
        },
    }
}

/// `1 - levenshtein / max_len` over characters.
fn title_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
