//! Backend adapter implementations

pub mod mongo;
pub mod mysql;
pub mod postgres;

pub use mongo::{MongoAdapter, MongoConnection, MongoTarget};
pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;

use crate::config::ManagerSettings;
use crate::database::config::{BackendKind, DatabaseConfig};
use crate::error::{Error, Result};
use std::fmt::Display;
use std::future::Future;

/// Connect error for `config`, with a "start the server" hint for loopback hosts
pub(crate) fn connect_error(config: &DatabaseConfig, stage: &str, err: impl Display) -> Error {
    let message = format!(
        "{} {} failed for {}:{}/{}: {}",
        config.kind.display_name(),
        stage,
        config.host,
        config.port,
        config.database_name,
        err
    );

    if config.is_loopback() {
        let daemon = match config.kind {
            BackendKind::Mysql => "mysqld",
            BackendKind::Postgresql => "postgres",
            BackendKind::Mongodb => "mongod",
        };
        Error::connect_with_hint(
            message,
            format!(
                "start the local {} server ({}) on {}:{}",
                config.kind.display_name(),
                daemon,
                config.host,
                config.port
            ),
        )
    } else {
        Error::connect(message)
    }
}

/// Bound a whole dial by `settings.dial_timeout()`
pub(crate) async fn with_dial_timeout<T, F>(
    config: &DatabaseConfig,
    settings: &ManagerSettings,
    dial: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(settings.dial_timeout(), dial).await {
        Ok(result) => result,
        Err(_) => Err(connect_error(
            config,
            "dial",
            format!("timed out after {}s", settings.dial_timeout_secs),
        )),
    }
}

/// Strip the password from a connection URI before it reaches a log line
pub(crate) fn sanitize_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut sanitized = parsed.clone();
        if sanitized.password().is_some() {
            let _ = sanitized.set_password(Some("***"));
        }
        sanitized.to_string()
    } else {
        "[invalid URL]".to_string()
    }
}

/// True for SQL that produces a row set
pub(crate) fn returns_rows(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    matches!(
        head.as_str(),
        "SELECT" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "WITH" | "VALUES" | "TABLE"
    ) || sql.to_ascii_uppercase().contains(" RETURNING ")
}

/// Pool size for `config`, falling back to the manager default
pub(crate) fn pool_size(config: &DatabaseConfig, settings: &ManagerSettings) -> u32 {
    config.options.pool_size.unwrap_or(settings.default_pool_size)
}
