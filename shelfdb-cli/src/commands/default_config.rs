//! `show-default` / `save-default`: persisted default target

use super::target::TargetArgs;
use anyhow::{Context, Result};
use shelfdb::{DatabaseConfig, DatabaseManager, JsonFileStore};
use std::path::PathBuf;

pub async fn show(manager: &DatabaseManager, store: PathBuf) -> Result<()> {
    let store = JsonFileStore::new(store);
    match manager.load_default_config(&store).await? {
        Some(config) => println!("{}", serde_json::to_string_pretty(&redacted(config))?),
        None => println!("No default target saved in {}", store.path().display()),
    }
    Ok(())
}

pub async fn save(manager: &DatabaseManager, store: PathBuf, target: &TargetArgs) -> Result<()> {
    let config = target.to_config();
    config
        .check()
        .map_err(|e| anyhow::anyhow!("[{}] {}", e.error_code(), e))?;

    let store = JsonFileStore::new(store);
    manager
        .save_default_config(&store, &config)
        .await
        .with_context(|| format!("saving default target to {}", store.path().display()))?;

    println!("Saved default target to {}", store.path().display());
    Ok(())
}

fn redacted(mut config: DatabaseConfig) -> DatabaseConfig {
    if config.password.is_some() {
        config.password = Some("***".to_string());
    }
    config
}
