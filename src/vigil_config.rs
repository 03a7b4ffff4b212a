//! Layered configuration for vigil, read from `.vigil/vigil.toml`.
//!
//! Values resolve file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [agent]
//! claude_cmd = "claude"
//! skip_permissions = true
//! model = "sonnet"
//! call_timeout_secs = 1800
//!
//! [qa]
//! max_iterations = 50
//! max_consecutive_errors = 3
//! recurring_threshold = 3
//! similarity_threshold = 0.75
//! error_backoff_ms = 2000
//! manual_test_plan = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::qa::issue::DEFAULT_SIMILARITY_THRESHOLD;
use crate::qa::recurrence::DEFAULT_RECURRING_THRESHOLD;
use crate::qa::validation::QaLoopSettings;
use crate::qa::{DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MAX_QA_ITERATIONS};

pub const VIGIL_DIR: &str = ".vigil";
pub const CONFIG_FILE: &str = "vigil.toml";

/// Claude CLI settings for reviewer and fixer sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Claude CLI command (default: "claude", or `CLAUDE_CMD`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_cmd: Option<String>,
    /// Pass `--dangerously-skip-permissions` to Claude
    #[serde(default = "default_skip_permissions")]
    pub skip_permissions: bool,
    /// Model alias passed through `--model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Upper bound on a single reviewer or fixer session
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_skip_permissions() -> bool {
    true
}

fn default_call_timeout_secs() -> u64 {
    1800
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            claude_cmd: None,
            skip_permissions: default_skip_permissions(),
            model: None,
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// QA loop limits and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    /// Occurrences at which an issue counts as recurring
    #[serde(default = "default_recurring_threshold")]
    pub recurring_threshold: usize,
    /// Minimum similarity for two issues to be the same
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Base delay before retrying a failed review; doubles per consecutive error
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Generate MANUAL_TEST_PLAN.md when no test framework is found
    #[serde(default = "default_manual_test_plan")]
    pub manual_test_plan: bool,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_QA_ITERATIONS
}

fn default_max_consecutive_errors() -> u32 {
    DEFAULT_MAX_CONSECUTIVE_ERRORS
}

fn default_recurring_threshold() -> usize {
    DEFAULT_RECURRING_THRESHOLD
}

fn default_similarity_threshold() -> f64 {
    DEFAULT_SIMILARITY_THRESHOLD
}

fn default_error_backoff_ms() -> u64 {
    2000
}

fn default_manual_test_plan() -> bool {
    true
}

impl Default for QaSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_consecutive_errors: default_max_consecutive_errors(),
            recurring_threshold: default_recurring_threshold(),
            similarity_threshold: default_similarity_threshold(),
            error_backoff_ms: default_error_backoff_ms(),
            manual_test_plan: default_manual_test_plan(),
        }
    }
}

/// The complete vigil.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilToml {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub qa: QaSection,
}

impl VigilToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse vigil.toml")
    }

    /// Load `.vigil/vigil.toml`, or defaults when the file does not exist.
    pub fn load_or_default(vigil_dir: &Path) -> Result<Self> {
        let config_path = vigil_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize vigil.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Claude command (file → `CLAUDE_CMD` → "claude").
    pub fn claude_cmd(&self) -> String {
        self.agent
            .claude_cmd
            .clone()
            .or_else(|| std::env::var("CLAUDE_CMD").ok())
            .unwrap_or_else(|| "claude".to_string())
    }

    /// `SKIP_PERMISSIONS` overrides the file setting.
    pub fn skip_permissions(&self) -> bool {
        if let Ok(env_val) = std::env::var("SKIP_PERMISSIONS") {
            return env_val != "false";
        }
        self.agent.skip_permissions
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.qa.max_iterations == 0 {
            warnings.push("qa.max_iterations is 0: the QA loop will never review".to_string());
        }
        if self.qa.max_consecutive_errors == 0 {
            warnings.push(
                "qa.max_consecutive_errors is 0: treated as 1, the first error aborts".to_string(),
            );
        }
        if self.qa.recurring_threshold < 2 {
            warnings.push(format!(
                "qa.recurring_threshold {} escalates on the first occurrence of any issue",
                self.qa.recurring_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.qa.similarity_threshold) {
            warnings.push(format!(
                "Invalid qa.similarity_threshold {}: must be between 0.0 and 1.0",
                self.qa.similarity_threshold
            ));
        }
        if self.agent.call_timeout_secs == 0 {
            warnings.push("agent.call_timeout_secs is 0: every session will time out".to_string());
        }
        if let Some(model) = &self.agent.model
            && model.trim().is_empty()
        {
            warnings.push("agent.model is empty; remove it to use Claude's default".to_string());
        }

        warnings
    }
}

/// `.vigil` directory for a project.
pub fn get_vigil_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(VIGIL_DIR)
}

/// Configuration that combines vigil.toml with runtime settings.
#[derive(Debug, Clone)]
pub struct VigilConfig {
    pub project_dir: PathBuf,
    pub vigil_dir: PathBuf,
    pub toml: VigilToml,
    pub verbose: bool,
    /// CLI override for qa.max_iterations
    pub cli_max_iterations: Option<u32>,
}

impl VigilConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let vigil_dir = get_vigil_dir(&project_dir);
        let toml = VigilToml::load_or_default(&vigil_dir)?;

        Ok(Self {
            project_dir,
            vigil_dir,
            toml,
            verbose: false,
            cli_max_iterations: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        max_iterations: Option<u32>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_max_iterations = max_iterations;
        Ok(config)
    }

    pub fn claude_cmd(&self) -> String {
        self.toml.claude_cmd()
    }

    pub fn skip_permissions(&self) -> bool {
        self.toml.skip_permissions()
    }

    pub fn model(&self) -> Option<&str> {
        self.toml
            .agent
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
    }

    /// CLI → file → default.
    pub fn max_iterations(&self) -> u32 {
        self.cli_max_iterations
            .unwrap_or(self.toml.qa.max_iterations)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.agent.call_timeout_secs)
    }

    pub fn specs_dir(&self) -> PathBuf {
        self.vigil_dir.join("specs")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.vigil_dir.join("logs")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.vigil_dir.join("prompts")
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }

    /// Loop settings with CLI overrides applied.
    pub fn loop_settings(&self) -> QaLoopSettings {
        let qa = &self.toml.qa;
        QaLoopSettings {
            max_iterations: self.max_iterations(),
            max_consecutive_errors: qa.max_consecutive_errors.max(1),
            recurring_threshold: qa.recurring_threshold,
            similarity_threshold: qa.similarity_threshold,
            call_timeout: self.call_timeout(),
            error_backoff: Duration::from_millis(qa.error_backoff_ms),
            manual_test_plan: qa.manual_test_plan,
        }
    }

    /// Flags for Claude invocation.
    pub fn claude_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.skip_permissions() {
            flags.push("--dangerously-skip-permissions".to_string());
        }
        if let Some(model) = self.model() {
            flags.push("--model".to_string());
            flags.push(model.to_string());
        }
        flags.push("--print".to_string());
        flags.push("--output-format".to_string());
        flags.push("stream-json".to_string());
        flags.push("--verbose".to_string());
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_parse_empty_uses_defaults() {
        let toml = VigilToml::parse("").unwrap();
        assert_eq!(toml.qa.max_iterations, 50);
        assert_eq!(toml.qa.max_consecutive_errors, 3);
        assert_eq!(toml.qa.recurring_threshold, 3);
        assert_eq!(toml.qa.similarity_threshold, 0.75);
        assert_eq!(toml.qa.error_backoff_ms, 2000);
        assert!(toml.qa.manual_test_plan);
        assert!(toml.agent.skip_permissions);
        assert_eq!(toml.agent.call_timeout_secs, 1800);
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml = VigilToml::parse(
            r#"
[agent]
model = "opus"

[qa]
max_iterations = 10
similarity_threshold = 0.9
"#,
        )
        .unwrap();
        assert_eq!(toml.agent.model.as_deref(), Some("opus"));
        assert_eq!(toml.qa.max_iterations, 10);
        assert_eq!(toml.qa.similarity_threshold, 0.9);
        assert_eq!(toml.qa.max_consecutive_errors, 3);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = VigilToml::parse("[qa\nmax_iterations = ").unwrap_err();
        assert!(err.to_string().contains("Failed to parse vigil.toml"));
    }

    #[test]
    fn test_validate_defaults_clean() {
        assert!(VigilToml::default().validate().is_empty());
    }

    #[test]
    fn test_validate_reports_bad_values() {
        let mut toml = VigilToml::default();
        toml.qa.similarity_threshold = 1.5;
        toml.qa.max_iterations = 0;
        toml.qa.recurring_threshold = 1;
        let warnings = toml.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("similarity_threshold")));
        assert!(warnings.iter().any(|w| w.contains("max_iterations")));
    }

    #[test]
    fn test_save_and_load_round_trip_values() {
        let dir = tempdir().unwrap();
        let mut toml = VigilToml::default();
        toml.qa.max_iterations = 7;
        toml.agent.claude_cmd = Some("/opt/claude".to_string());
        let path = dir.path().join(CONFIG_FILE);
        toml.save(&path).unwrap();

        let loaded = VigilToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.qa.max_iterations, 7);
        assert_eq!(loaded.agent.claude_cmd.as_deref(), Some("/opt/claude"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let toml = VigilToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.qa.max_iterations, DEFAULT_MAX_QA_ITERATIONS);
    }

    #[test]
    fn test_claude_cmd_file_then_env_then_default() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var("CLAUDE_CMD").ok();
        unsafe { std::env::remove_var("CLAUDE_CMD") };

        let mut toml = VigilToml::default();
        assert_eq!(toml.claude_cmd(), "claude");

        unsafe { std::env::set_var("CLAUDE_CMD", "/env/claude") };
        assert_eq!(toml.claude_cmd(), "/env/claude");

        toml.agent.claude_cmd = Some("/file/claude".to_string());
        assert_eq!(toml.claude_cmd(), "/file/claude");

        match saved {
            Some(val) => unsafe { std::env::set_var("CLAUDE_CMD", val) },
            None => unsafe { std::env::remove_var("CLAUDE_CMD") },
        }
    }

    #[test]
    fn test_skip_permissions_env_override() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let saved = std::env::var("SKIP_PERMISSIONS").ok();

        let toml = VigilToml::default();
        unsafe { std::env::set_var("SKIP_PERMISSIONS", "false") };
        assert!(!toml.skip_permissions());
        unsafe { std::env::remove_var("SKIP_PERMISSIONS") };
        assert!(toml.skip_permissions());

        if let Some(val) = saved {
            unsafe { std::env::set_var("SKIP_PERMISSIONS", val) };
        }
    }

    #[test]
    fn test_vigil_config_cli_override_and_paths() {
        let dir = tempdir().unwrap();
        let config = VigilConfig::with_cli_args(dir.path().to_path_buf(), true, Some(4)).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.max_iterations(), 4);
        assert_eq!(config.log_dir(), root.join(".vigil/logs"));
        assert_eq!(config.prompts_dir(), root.join(".vigil/prompts"));
        assert_eq!(config.specs_dir(), root.join(".vigil/specs"));
        assert_eq!(config.loop_settings().max_iterations, 4);
    }

    #[test]
    fn test_loop_settings_clamps_zero_error_limit() {
        let dir = tempdir().unwrap();
        let mut config = VigilConfig::new(dir.path().to_path_buf()).unwrap();
        config.toml.qa.max_consecutive_errors = 0;
        assert_eq!(config.loop_settings().max_consecutive_errors, 1);
    }

    #[test]
    fn test_claude_flags_include_model() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempdir().unwrap();
        let mut config = VigilConfig::new(dir.path().to_path_buf()).unwrap();
        config.toml.agent.model = Some("sonnet".to_string());
        let flags = config.claude_flags();
        let pos = flags.iter().position(|f| f == "--model").unwrap();
        assert_eq!(flags[pos + 1], "sonnet");
        assert!(flags.contains(&"stream-json".to_string()));
    }
}
