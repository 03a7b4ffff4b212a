//! JSON-backed plan document and the iteration store façade over it.
//!
//! The plan document (`implementation_plan.json`) is shared with the agents
//! that build the work item, so every top-level field vigil does not own is
//! carried through untouched. The three fields owned here are:
//!
//! - `qa_signoff`: authoritative approve/reject state
//! - `qa_iteration_history`: append-only list of QA iterations
//! - `qa_stats`: rollup recomputed on every append
//!
//! All defaulting of the external JSON shape happens in [`PlanDocument::from_map`].

use crate::errors::StoreError;
use crate::io::atomic_write;
use crate::qa::issue::Issue;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the plan document inside a spec directory.
pub const PLAN_FILE: &str = "implementation_plan.json";

const CORRUPT_BACKUP_SUFFIX: &str = "corrupt";

/// Outcome of one QA iteration as stored in the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IterationStatus {
    Approved,
    Rejected,
    Error,
}

impl IterationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Error => "error",
        }
    }
}

impl From<String> for IterationStatus {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "approved" | "passed" => Self::Approved,
            "rejected" | "failed" => Self::Rejected,
            _ => Self::Error,
        }
    }
}

impl From<IterationStatus> for String {
    fn from(status: IterationStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status field of the QA signoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignoffStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    FixesApplied,
}

impl SignoffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::FixesApplied => "fixes_applied",
        }
    }
}

impl From<String> for SignoffStatus {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "fixes_applied" => Self::FixesApplied,
            _ => Self::Pending,
        }
    }
}

impl From<SignoffStatus> for String {
    fn from(status: SignoffStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for SignoffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `qa_signoff` object. Extra keys written by the reviewer
/// (test results, report paths) are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaSignoff {
    #[serde(default)]
    pub status: SignoffStatus,
    #[serde(default)]
    pub qa_session: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues_found: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_for_qa_revalidation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of `qa_iteration_history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub status: IterationStatus,
    #[serde(default)]
    pub issues: Vec<Issue>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// The `qa_stats` rollup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaStats {
    #[serde(default)]
    pub total_iterations: u32,
    #[serde(default)]
    pub last_iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<IterationStatus>,
    #[serde(default)]
    pub issues_by_type: BTreeMap<String, usize>,
}

impl QaStats {
    /// Recompute the rollup from the full history.
    pub fn from_history(history: &[IterationRecord]) -> Self {
        let mut issues_by_type = BTreeMap::new();
        for record in history {
            for issue in &record.issues {
                *issues_by_type
                    .entry(issue.kind_or_unknown().to_string())
                    .or_insert(0) += 1;
            }
        }
        let last = history.last();
        Self {
            total_iterations: history.len() as u32,
            last_iteration: last.map(|r| r.iteration).unwrap_or(0),
            last_status: last.map(|r| r.status),
            issues_by_type,
        }
    }
}

/// Subtask completion counts taken from the plan's `phases[].subtasks[]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildProgress {
    pub completed: usize,
    pub total: usize,
}

impl BuildProgress {
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// Typed view of the plan document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanDocument {
    pub qa_signoff: Option<QaSignoff>,
    pub qa_iteration_history: Vec<IterationRecord>,
    pub qa_stats: Option<QaStats>,
    rest: Map<String, Value>,
}

impl PlanDocument {
    /// Parse a document. Only fails when the text is not a JSON object.
    pub fn parse(content: &str) -> Result<Self, serde_json::Error> {
        let map: Map<String, Value> = serde_json::from_str(content)?;
        Ok(Self::from_map(map))
    }

    /// Split a raw JSON object into the typed QA fields and everything else.
    ///
    /// Malformed QA fields are logged and replaced with defaults; malformed
    /// history entries are dropped individually.
    pub fn from_map(mut map: Map<String, Value>) -> Self {
        let qa_signoff = map
            .remove("qa_signoff")
            .filter(|v| !v.is_null())
            .and_then(|v| typed_field::<QaSignoff>("qa_signoff", v));

        let qa_iteration_history = match map.remove("qa_iteration_history") {
            Some(Value::Array(entries)) => entries
                .into_iter()
                .enumerate()
                .filter_map(|(i, entry)| {
                    typed_field::<IterationRecord>(&format!("qa_iteration_history[{}]", i), entry)
                })
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                warn!(found = %json_kind(&other), "qa_iteration_history is not an array, ignoring");
                Vec::new()
            }
        };

        let qa_stats = map
            .remove("qa_stats")
            .filter(|v| !v.is_null())
            .and_then(|v| typed_field::<QaStats>("qa_stats", v));

        Self {
            qa_signoff,
            qa_iteration_history,
            qa_stats,
            rest: map,
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let mut map = self.rest.clone();
        if let Some(signoff) = &self.qa_signoff {
            map.insert("qa_signoff".to_string(), serde_json::to_value(signoff)?);
        }
        if !self.qa_iteration_history.is_empty() {
            map.insert(
                "qa_iteration_history".to_string(),
                serde_json::to_value(&self.qa_iteration_history)?,
            );
        }
        if let Some(stats) = &self.qa_stats {
            map.insert("qa_stats".to_string(), serde_json::to_value(stats)?);
        }
        Ok(Value::Object(map))
    }

    /// A field vigil does not own, e.g. `feature` or `phases`.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.rest.get(key)
    }

    /// Count completed subtasks across all phases.
    pub fn build_progress(&self) -> BuildProgress {
        let mut progress = BuildProgress::default();
        let Some(Value::Array(phases)) = self.rest.get("phases") else {
            return progress;
        };
        for phase in phases {
            let Some(Value::Array(subtasks)) = phase.get("subtasks") else {
                continue;
            };
            for subtask in subtasks {
                progress.total += 1;
                if subtask.get("status").and_then(Value::as_str) == Some("completed") {
                    progress.completed += 1;
                }
            }
        }
        progress
    }

    /// Highest recorded iteration number, 0 when the history is empty.
    pub fn last_iteration(&self) -> u32 {
        self.qa_iteration_history
            .iter()
            .map(|r| r.iteration)
            .max()
            .unwrap_or(0)
    }
}

fn typed_field<T: DeserializeOwned>(name: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(field = name, error = %e, "Malformed plan field, using default");
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

enum Loaded {
    Missing,
    Parsed(PlanDocument),
    Corrupt,
    Unreadable(std::io::Error),
}

/// Read/write façade over one spec directory's plan document.
///
/// The store holds no cached state: every call reads the document from disk,
/// so it is safe to keep one handle for the duration of a QA run.
#[derive(Debug, Clone)]
pub struct IterationStore {
    spec_dir: PathBuf,
    plan_path: PathBuf,
}

impl IterationStore {
    pub fn new(spec_dir: &Path) -> Self {
        Self {
            spec_dir: spec_dir.to_path_buf(),
            plan_path: spec_dir.join(PLAN_FILE),
        }
    }

    pub fn spec_dir(&self) -> &Path {
        &self.spec_dir
    }

    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }

    pub fn exists(&self) -> bool {
        self.plan_path.exists()
    }

    fn read(&self) -> Loaded {
        let content = match std::fs::read_to_string(&self.plan_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Loaded::Missing,
            Err(e) => return Loaded::Unreadable(e),
        };
        match PlanDocument::parse(&content) {
            Ok(doc) => Loaded::Parsed(doc),
            Err(e) => {
                warn!(path = %self.plan_path.display(), error = %e, "Plan document is not valid JSON, treating as empty");
                Loaded::Corrupt
            }
        }
    }

    /// Load the document. Missing, corrupt or unreadable documents yield an
    /// empty one.
    pub fn load(&self) -> PlanDocument {
        match self.read() {
            Loaded::Parsed(doc) => doc,
            Loaded::Missing | Loaded::Corrupt => PlanDocument::default(),
            Loaded::Unreadable(e) => {
                warn!(path = %self.plan_path.display(), error = %e, "Failed to read plan document");
                PlanDocument::default()
            }
        }
    }

    /// Load for a read-modify-write cycle. A corrupt document is copied aside
    /// before it gets replaced so the original bytes are not lost. A document
    /// that cannot be read at all is an error: writing would clobber it.
    fn load_for_update(&self) -> Result<PlanDocument, StoreError> {
        let doc = match self.read() {
            Loaded::Parsed(doc) => doc,
            Loaded::Missing => PlanDocument::default(),
            Loaded::Unreadable(source) => {
                return Err(StoreError::ReadFailed {
                    path: self.plan_path.clone(),
                    source,
                });
            }
            Loaded::Corrupt => {
                let backup = self
                    .plan_path
                    .with_extension(format!("json.{}", CORRUPT_BACKUP_SUFFIX));
                if let Err(e) = std::fs::copy(&self.plan_path, &backup) {
                    warn!(error = %e, "Failed to back up corrupt plan document");
                } else {
                    warn!(backup = %backup.display(), "Backed up corrupt plan document");
                }
                PlanDocument::default()
            }
        };
        Ok(doc)
    }

    /// Persist the document atomically.
    pub fn save(&self, doc: &PlanDocument) -> Result<(), StoreError> {
        let value = doc.to_value()?;
        let content = serde_json::to_string_pretty(&value)?;
        atomic_write(&self.plan_path, content.as_bytes()).map_err(|source| {
            StoreError::WriteFailed {
                path: self.plan_path.clone(),
                source,
            }
        })
    }

    /// The ordered iteration history; empty when there is none.
    pub fn load_history(&self) -> Vec<IterationRecord> {
        self.load().qa_iteration_history
    }

    /// Append one iteration and refresh `qa_stats`.
    ///
    /// Iteration numbers must increase: a number at or below the last recorded
    /// one is rejected with [`StoreError::DuplicateIteration`].
    pub fn record_iteration(
        &self,
        iteration: u32,
        status: IterationStatus,
        issues: &[Issue],
        duration_seconds: Option<f64>,
    ) -> Result<IterationRecord, StoreError> {
        let mut doc = self.load_for_update()?;

        let last = doc.last_iteration();
        if !doc.qa_iteration_history.is_empty() && iteration <= last {
            return Err(StoreError::DuplicateIteration { iteration, last });
        }

        let record = IterationRecord {
            iteration,
            status,
            issues: issues.to_vec(),
            timestamp: Utc::now(),
            duration_seconds: duration_seconds.map(|d| (d * 100.0).round() / 100.0),
        };
        doc.qa_iteration_history.push(record.clone());
        doc.qa_stats = Some(QaStats::from_history(&doc.qa_iteration_history));
        self.save(&doc)?;

        debug!(iteration, status = %status, issues = issues.len(), "Recorded QA iteration");
        Ok(record)
    }

    /// Current QA signoff, if the reviewer or the loop has written one.
    pub fn signoff(&self) -> Option<QaSignoff> {
        self.load().qa_signoff
    }

    /// Apply a mutation to the signoff (created if absent) and persist it.
    pub fn update_signoff<F>(&self, f: F) -> Result<QaSignoff, StoreError>
    where
        F: FnOnce(&mut QaSignoff),
    {
        let mut doc = self.load_for_update()?;
        let signoff = doc.qa_signoff.get_or_insert_with(QaSignoff::default);
        f(signoff);
        signoff.timestamp = Some(Utc::now().to_rfc3339());
        let updated = signoff.clone();
        self.save(&doc)?;
        Ok(updated)
    }

    /// Remove signoff, history and stats, keeping every other plan field.
    pub fn reset_qa(&self) -> Result<(), StoreError> {
        if !self.exists() {
            return Ok(());
        }
        let mut doc = self.load_for_update()?;
        doc.qa_signoff = None;
        doc.qa_iteration_history.clear();
        doc.qa_stats = None;
        self.save(&doc)
    }
}
