//! Reviewer and fixer sessions consumed by the QA loop.
//!
//! The loop only sees the [`QaAgent`] trait. [`ClaudeCliAgent`] is the
//! production implementation; tests script their own.

pub mod claude;
pub mod prompts;

pub use claude::ClaudeCliAgent;

use crate::errors::AgentError;
use crate::qa::issue::Issue;
use async_trait::async_trait;
use std::path::PathBuf;

/// Input for one reviewer session.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub project_dir: PathBuf,
    pub spec_dir: PathBuf,
    /// 1-based QA session this review belongs to.
    pub qa_session: u32,
    pub max_iterations: u32,
    /// Error text from the previous failed attempt, used as a self-correction hint.
    pub previous_error: Option<String>,
}

/// Input for one fixer session.
#[derive(Debug, Clone)]
pub struct FixRequest {
    pub project_dir: PathBuf,
    pub spec_dir: PathBuf,
    pub fix_session: u32,
    /// Contents of a human-authored fix request, when one is pending.
    pub human_request: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Approved,
    Rejected,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub status: ReviewStatus,
    pub message: String,
    pub issues: Vec<Issue>,
}

impl ReviewOutcome {
    pub fn approved(message: impl Into<String>) -> Self {
        Self {
            status: ReviewStatus::Approved,
            message: message.into(),
            issues: Vec::new(),
        }
    }

    pub fn rejected(message: impl Into<String>, issues: Vec<Issue>) -> Self {
        Self {
            status: ReviewStatus::Rejected,
            message: message.into(),
            issues,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReviewStatus::Error,
            message: message.into(),
            issues: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixStatus {
    Fixed,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixOutcome {
    pub status: FixStatus,
    pub message: String,
}

impl FixOutcome {
    pub fn fixed(message: impl Into<String>) -> Self {
        Self {
            status: FixStatus::Fixed,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: FixStatus::Error,
            message: message.into(),
        }
    }
}

/// The two external calls the QA loop suspends on.
///
/// An `Err` from either method is treated the same as an `Error` status.
#[async_trait]
pub trait QaAgent: Send + Sync {
    async fn review(&self, request: &ReviewRequest) -> Result<ReviewOutcome, AgentError>;

    async fn fix(&self, request: &FixRequest) -> Result<FixOutcome, AgentError>;
}
