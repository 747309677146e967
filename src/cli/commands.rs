//! Command handlers for the `dbweave` binary.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::adapters::sqlite::{SqliteBackend, SqlitePoolSettings};
use crate::cli::output::{output, ConfigOutput, HealthOutput, StatsOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::SecretScrubber;
use crate::services::DatabaseService;

/// Load configuration from `path`, or from the default locations.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

async fn connect(config: &Config, scrubber: &SecretScrubber) -> Result<DatabaseService> {
    let url = &config.backend.url;
    tracing::info!(url = %scrubber.scrub_url(url), "connecting to backend");

    let backend = SqliteBackend::connect(url, SqlitePoolSettings::for_pools(&config.pool))
        .await
        .with_context(|| format!("Failed to connect to {}", scrubber.scrub_url(url)))?;
    Ok(DatabaseService::new(config.clone(), Arc::new(backend)))
}

pub async fn health(config: &Config, json: bool) -> Result<()> {
    let scrubber = SecretScrubber::new()?;
    let service = connect(config, &scrubber).await?;

    let result = service.health_check().await;
    service.stop().await;

    output(
        &HealthOutput {
            backend: scrubber.scrub_url(&config.backend.url),
            result,
        },
        json,
    );
    Ok(())
}

pub async fn stats(config: &Config, json: bool) -> Result<()> {
    let scrubber = SecretScrubber::new()?;
    let service = connect(config, &scrubber).await?;

    service
        .pools()
        .warm_up()
        .await
        .context("Failed to warm up connection pools")?;
    let stats = StatsOutput {
        connections: service.get_connection_stats(),
        queries: service.get_query_metrics(),
    };
    service.stop().await;

    output(&stats, json);
    Ok(())
}

pub fn show_config(config: &Config, json: bool) -> Result<()> {
    let scrubber = SecretScrubber::new()?;
    let mut config = config.clone();
    config.backend.url = scrubber.scrub_url(&config.backend.url);

    output(&ConfigOutput { config }, json);
    Ok(())
}
