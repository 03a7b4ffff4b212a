//! Configuration view and validation commands: `vigil config`.

use anyhow::Result;

use super::super::ConfigCommands;

fn print_toml(toml: &vigil::vigil_config::VigilToml) {
    println!("[agent]");
    if let Some(cmd) = &toml.agent.claude_cmd {
        println!("  claude_cmd = \"{}\"", cmd);
    }
    if let Some(model) = &toml.agent.model {
        println!("  model = \"{}\"", model);
    }
    println!("  skip_permissions = {}", toml.agent.skip_permissions);
    println!("  call_timeout_secs = {}", toml.agent.call_timeout_secs);
    println!();

    println!("[qa]");
    println!("  max_iterations = {}", toml.qa.max_iterations);
    println!("  max_consecutive_errors = {}", toml.qa.max_consecutive_errors);
    println!("  recurring_threshold = {}", toml.qa.recurring_threshold);
    println!("  similarity_threshold = {}", toml.qa.similarity_threshold);
    println!("  error_backoff_ms = {}", toml.qa.error_backoff_ms);
    println!("  manual_test_plan = {}", toml.qa.manual_test_plan);
    println!();
}

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use vigil::vigil_config::{CONFIG_FILE, VigilConfig, VigilToml, get_vigil_dir};

    let vigil_dir = get_vigil_dir(project_dir);
    let config_path = vigil_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Vigil Configuration");
            println!("===================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();
                print_toml(&VigilToml::load(&config_path)?);
            } else {
                println!("No vigil.toml found at {}", config_path.display());
                println!();
                println!("Using default configuration:");
                print_toml(&VigilToml::default());
                println!("Run 'vigil config init' to create a vigil.toml file.");
                println!();
            }

            println!("Effective values (with env/CLI overrides):");
            let config = VigilConfig::new(project_dir.to_path_buf())?;
            println!("  claude_cmd = \"{}\"", config.claude_cmd());
            println!("  skip_permissions = {}", config.skip_permissions());
            println!("  max_iterations = {}", config.max_iterations());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No vigil.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = VigilToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("vigil.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&vigil_dir)?;
            VigilToml::default().save(&config_path)?;

            println!("Created vigil.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [agent] claude_cmd, model, call_timeout_secs");
            println!("  - [qa] max_iterations, recurring_threshold, similarity_threshold");
            println!();
        }
    }

    Ok(())
}
