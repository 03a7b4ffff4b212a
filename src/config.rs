use anyhow::{Context, Result, anyhow};
use glob::glob;
use std::path::{Path, PathBuf};

use crate::qa::store::PLAN_FILE;
use crate::vigil_config::VigilConfig;

/// Runtime configuration for a QA command.
///
/// Bridges [`VigilConfig`] with the work item being validated: resolves the
/// spec directory and the paths the agent writes into.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub spec_dir: PathBuf,
    pub log_dir: PathBuf,
    pub prompts_dir: PathBuf,
    pub claude_cmd: String,
    vigil_config: VigilConfig,
}

impl Config {
    pub fn new(
        project_dir: PathBuf,
        verbose: bool,
        spec_dir: Option<PathBuf>,
        max_iterations: Option<u32>,
    ) -> Result<Self> {
        let vigil_config = VigilConfig::with_cli_args(project_dir, verbose, max_iterations)?;
        let project_dir = vigil_config.project_dir.clone();

        let spec_dir = match spec_dir {
            Some(path) => {
                let path = if path.is_absolute() {
                    path
                } else {
                    project_dir.join(path)
                };
                path.canonicalize()
                    .with_context(|| format!("Spec directory not found: {}", path.display()))?
            }
            None => Self::find_spec_dir(&vigil_config.specs_dir())?,
        };

        Ok(Self {
            log_dir: vigil_config.log_dir(),
            prompts_dir: vigil_config.prompts_dir(),
            claude_cmd: vigil_config.claude_cmd(),
            project_dir,
            spec_dir,
            vigil_config,
        })
    }

    pub fn vigil_config(&self) -> &VigilConfig {
        &self.vigil_config
    }

    pub fn plan_file(&self) -> PathBuf {
        self.spec_dir.join(PLAN_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.spec_dir.join(".qa.lock")
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    pub fn claude_flags(&self) -> Vec<String> {
        self.vigil_config.claude_flags()
    }

    /// Most recently modified `<specs_dir>/*/implementation_plan.json`.
    fn find_spec_dir(specs_dir: &Path) -> Result<PathBuf> {
        let pattern = specs_dir
            .join("*")
            .join(PLAN_FILE)
            .to_string_lossy()
            .to_string();

        let mut plans: Vec<PathBuf> = glob(&pattern)
            .context("Failed to read glob pattern")?
            .filter_map(|entry| entry.ok())
            .collect();

        if plans.is_empty() {
            return Err(anyhow!(
                "No spec directory found. Create .vigil/specs/<name>/{} or pass --spec-dir",
                PLAN_FILE
            ));
        }

        plans.sort_by(|a, b| {
            let a_time = a.metadata().and_then(|m| m.modified()).ok();
            let b_time = b.metadata().and_then(|m| m.modified()).ok();
            b_time.cmp(&a_time)
        });

        let plan = plans.remove(0);
        plan.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow!("Plan file has no parent directory: {}", plan.display()))
    }
}
