//! QA validation commands: `vigil qa run|status|summary|reset`.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::super::Cli;

/// Hold an exclusive lock on `spec_dir/.qa.lock` for the life of the run.
fn acquire_run_lock(path: &Path) -> Result<File> {
    use vigil::errors::QaError;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))?;

    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(file),
        Err(err) if err.kind() == ErrorKind::WouldBlock => Err(QaError::Locked {
            path: path.to_path_buf(),
        }
        .into()),
        Err(err) => Err(err).context("Failed to lock spec directory"),
    }
}

pub async fn cmd_qa_run(
    cli: &Cli,
    project_dir: PathBuf,
    max_iterations: Option<u32>,
    force: bool,
) -> Result<bool> {
    use std::sync::Arc;
    use vigil::agent::ClaudeCliAgent;
    use vigil::config::Config;
    use vigil::qa::criteria::is_build_complete;
    use vigil::qa::{IterationStore, QaValidationLoop};
    use vigil::ui::QaUI;

    let config = Config::new(project_dir, cli.verbose, cli.spec_dir.clone(), max_iterations)?;
    config.ensure_directories()?;

    for warning in config.vigil_config().validate() {
        tracing::warn!("vigil.toml: {}", warning);
    }

    let store = IterationStore::new(&config.spec_dir);
    let doc = store.load();
    if !force && !is_build_complete(&doc) {
        let progress = doc.build_progress();
        anyhow::bail!(
            "Build is not complete ({}/{} subtasks done). Finish the build or pass --force.",
            progress.completed,
            progress.total
        );
    }

    let _lock = acquire_run_lock(&config.lock_file())?;
    tracing::info!(spec_dir = %config.spec_dir.display(), "Starting QA run");

    let ui = Arc::new(QaUI::new(cli.verbose));
    let agent = ClaudeCliAgent::new(&config).with_ui(ui.clone());
    let settings = config.vigil_config().loop_settings();

    let mut qa = QaValidationLoop::new(store, agent, &config.project_dir, settings).with_ui(ui);
    let report = qa.run().await;
    Ok(report.is_approved())
}

pub fn cmd_qa_status(cli: &Cli, project_dir: PathBuf) -> Result<()> {
    use vigil::config::Config;
    use vigil::qa::criteria::status_report;
    use vigil::qa::IterationStore;

    let config = Config::new(project_dir, cli.verbose, cli.spec_dir.clone(), None)?;
    let report = status_report(&IterationStore::new(&config.spec_dir));
    let max_iterations = config.vigil_config().max_iterations();

    println!();
    println!("QA Status");
    println!("=========");
    println!();
    println!("Spec:       {}", config.spec_dir.display());

    if !report.plan_exists {
        println!("Plan:       Missing ({})", config.plan_file().display());
        println!();
        return Ok(());
    }

    let status = match report.status {
        Some(status) => status.to_string(),
        None => "not started".to_string(),
    };
    println!("Signoff:    {}", status);
    println!("Iterations: {}/{}", report.iterations, max_iterations);
    println!(
        "Build:      {}/{} subtasks{}",
        report.build.completed,
        report.build.total,
        if report.build.is_complete() {
            " (complete)"
        } else {
            ""
        }
    );
    if report.open_issues > 0 {
        println!("Open issues: {}", report.open_issues);
    }
    if report.ready_for_revalidation {
        println!("Fixes applied, ready for re-review.");
    }
    println!();
    Ok(())
}

pub fn cmd_qa_summary(cli: &Cli, project_dir: PathBuf, json: bool) -> Result<()> {
    use vigil::config::Config;
    use vigil::qa::{IterationStore, RecurrenceDetector};
    use vigil::ui::progress::summary_lines;

    let config = Config::new(project_dir, cli.verbose, cli.spec_dir.clone(), None)?;
    let qa = &config.vigil_config().toml.qa;
    let detector = RecurrenceDetector::new(qa.recurring_threshold, qa.similarity_threshold);
    let summary = detector.summarize(&IterationStore::new(&config.spec_dir).load_history());

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    for line in summary_lines(&summary) {
        println!("{}", line);
    }
    println!();
    Ok(())
}

pub fn cmd_qa_reset(cli: &Cli, project_dir: PathBuf) -> Result<()> {
    use vigil::config::Config;
    use vigil::qa::IterationStore;

    let config = Config::new(project_dir, cli.verbose, cli.spec_dir.clone(), None)?;
    let store = IterationStore::new(&config.spec_dir);
    if !store.exists() {
        println!("No plan found at {}. Nothing to reset.", config.plan_file().display());
        return Ok(());
    }

    let _lock = acquire_run_lock(&config.lock_file())?;
    store.reset_qa()?;
    println!("QA state reset for {}", config.spec_dir.display());
    Ok(())
}
