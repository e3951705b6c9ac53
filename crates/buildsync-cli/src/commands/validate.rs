//! The `validate` command.

use super::load_catalog;
use anyhow::{Context, Result};
use buildsync_config::load_configuration_file;
use std::path::Path;

pub fn run(config: &Path, catalog: &Path) -> Result<()> {
    let catalog = load_catalog(catalog)?;
    let configuration = load_configuration_file(config, &catalog)
        .with_context(|| format!("configuration error in {}", config.display()))?;

    println!("Configuration is valid");
    for group in configuration.common.repository_groups.values() {
        println!(
            "  repository group {}: {} repositories{}",
            group.name,
            group.repositories.len(),
            if group.build_properties.is_some() {
                ", buildable"
            } else {
                ""
            }
        );
    }
    for builder in &configuration.builders {
        let role = builder
            .role()
            .map(|role| role.to_string())
            .unwrap_or_else(|| "unused".to_string());
        println!(
            "  {} ({role}): {} configurations, slaves: {}",
            builder.builder_name,
            builder.configurations().len(),
            builder
                .slave_list
                .as_ref()
                .map(|slaves| slaves.join(", "))
                .unwrap_or_else(|| "any".to_string())
        );
    }
    Ok(())
}
