//! `parley onboard`: write a default configuration file.

use std::path::PathBuf;

use anyhow::Context;
use parley_config::AppConfig;
use parley_providers::PRESET_NAMES;

pub fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path = config_path.unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    println!("Parley First-Time Setup");
    println!("=========================\n");

    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            println!("Created config directory: {}", dir.display());
        }
    }

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        println!("Edit it manually or delete it and re-run onboard.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!("Created config.toml at: {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Pick a model in [model] name: {}", PRESET_NAMES.join(", "));
    println!("  2. Run: parley chat\n");

    Ok(())
}
