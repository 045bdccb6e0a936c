//! `drover config` subcommands

use anyhow::{Context, Result};
use drover_config::{ConfigLoader, DroverConfig};
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub fn handle_config_validate(config_file: &Path) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    if !config_file.exists() {
        return Err(anyhow::anyhow!(
            "Configuration file not found: {:?}",
            config_file
        ));
    }

    match ConfigLoader::new().from_file(config_file) {
        Ok(config) => {
            println!("Configuration file is valid");
            println!(
                "  store: {:?}, task types: {}, schedules: {}",
                config.store.backend,
                config.workers.task_types().count(),
                config.scheduler.tasks.len()
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration validation failed: {}", e);
            error!("Configuration validation failed: {}", e);
            Err(e.into())
        }
    }
}

pub fn handle_config_generate(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    fs::write(output, DroverConfig::generate_sample())
        .context("Failed to write configuration file")?;

    println!("Sample configuration generated at: {:?}", output);
    println!("Validate with: drover config validate --config-file {:?}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_sample_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("drover.yaml");

        handle_config_generate(&path, false).unwrap();
        handle_config_validate(&path).unwrap();

        assert!(handle_config_generate(&path, false).is_err());
        handle_config_generate(&path, true).unwrap();
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(handle_config_validate(&dir.path().join("absent.yaml")).is_err());
    }
}
