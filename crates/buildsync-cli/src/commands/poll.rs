//! The `poll` command.

use super::load_catalog;
use anyhow::{Context, Result};
use buildsync_config::load_configuration_file;
use buildsync_scheduler::{BuilderSynchronizer, HttpRemote, Poller, PollerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct PollOptions {
    pub remote: String,
    pub config: PathBuf,
    pub catalog: PathBuf,
    pub count: usize,
    pub interval: u64,
    pub once: bool,
}

pub async fn run(options: PollOptions) -> Result<()> {
    let catalog = load_catalog(&options.catalog)?;
    let configuration = load_configuration_file(&options.config, &catalog)
        .with_context(|| format!("configuration error in {}", options.config.display()))?;

    let remote = HttpRemote::new(&options.remote)
        .with_context(|| format!("invalid remote URL {}", options.remote))?;
    let synchronizers = BuilderSynchronizer::from_configuration(Arc::new(remote), configuration);
    info!(remote = %options.remote, builders = synchronizers.len(), "Loaded configuration");

    let mut poller = Poller::new(
        synchronizers,
        Arc::new(catalog),
        PollerConfig {
            recent_build_count: options.count,
            interval: Duration::from_secs(options.interval),
        },
    );

    if options.once {
        let report = poller.run_cycle().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    poller.run().await?;
    Ok(())
}
