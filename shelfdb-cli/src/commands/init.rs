//! `init`: connect and run the schema pass

use super::target::TargetArgs;
use anyhow::Result;
use shelfdb::error::ErrorChain;
use shelfdb::{DatabaseManager, SchemaReport};

pub async fn run(manager: &DatabaseManager, target: &TargetArgs) -> Result<()> {
    let config = target.to_config();

    let report = match manager.initialize_database(&config).await {
        Ok(report) => report,
        Err(e) => {
            if let Some(hint) = e.hint() {
                eprintln!("hint: {}", hint);
            }
            anyhow::bail!("[{}] {}", e.error_code(), ErrorChain::new(&e));
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    eprintln!("{}", summary(&config.database_name, &report));
    Ok(())
}

fn summary(database: &str, report: &SchemaReport) -> String {
    if report.is_noop() && !report.has_failures() {
        return format!("Schema of '{}' is up to date", database);
    }

    let mut line = format!(
        "Schema of '{}': {} created, {} column(s) added, {} widened, {} index(es) created",
        database,
        report.created.len(),
        report.columns_added.len(),
        report.columns_widened.len(),
        report.indexes_created.len()
    );
    if report.has_failures() {
        line.push_str(&format!(", {} step(s) failed", report.failures.len()));
    }
    line
}
