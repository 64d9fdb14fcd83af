//! MySQL / MariaDB adapter

use crate::config::ManagerSettings;
use crate::database::adapter::{BackendAdapter, QueryOutput, Statement};
use crate::database::adapters::{connect_error, pool_size, returns_rows, with_dial_timeout};
use crate::database::config::{BackendKind, DatabaseConfig};
use crate::database::handle::{ConnectionHandle, RawConnection};
use crate::database::schema::{
    create_table_statements, plan_migrations, ColumnMeta, Dialect, SchemaReport, INDEXES,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, ConnectOptions, Connection, MySqlPool, Row, TypeInfo, ValueRef};
use std::sync::Arc;

/// MySQL adapter; stateless, the pool lives in the handle
#[derive(Debug, Clone, Default)]
pub struct MySqlAdapter;

impl MySqlAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Server-level options (no database selected)
    fn connect_options(config: &DatabaseConfig, settings: &ManagerSettings) -> MySqlConnectOptions {
        let charset = config
            .options
            .charset
            .as_deref()
            .unwrap_or(&settings.default_charset);
        let ssl_mode = if config.options.tls.unwrap_or(false) {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Preferred
        };

        MySqlConnectOptions::new()
            .host(config.bare_host())
            .port(config.port)
            .username(config.username().unwrap_or_default())
            .password(config.password().unwrap_or_default())
            .charset(charset)
            .ssl_mode(ssl_mode)
    }

    /// Create the target database on a short-lived server connection
    ///
    /// Authentication failures abort the dial. A failed `CREATE DATABASE`
    /// only warns: the account may lack the privilege for a database that
    /// already exists, and the scoped dial reports a missing one clearly.
    async fn create_database(
        options: &MySqlConnectOptions,
        config: &DatabaseConfig,
        charset: &str,
    ) -> Result<()> {
        let mut conn = options
            .connect()
            .await
            .map_err(|e| connect_error(config, "connect", e))?;

        // Database name is restricted to [A-Za-z0-9_-] by validation
        let sql = format!(
            "CREATE DATABASE IF NOT EXISTS `{}` CHARACTER SET {}",
            config.database_name, charset
        );
        let result = sqlx::query(&sql).execute(&mut conn).await;
        let _ = conn.close().await;

        if let Err(e) = result {
            log::warn!(
                "Could not create MySQL database '{}' ({}), connecting to it directly",
                config.database_name,
                e
            );
        }
        Ok(())
    }

    fn pool(handle: &ConnectionHandle) -> Result<&MySqlPool> {
        handle
            .mysql_pool()
            .ok_or_else(|| Error::query(format!("Handle {} does not hold a MySQL pool", handle.key())))
    }

    async fn existing_tables(pool: &MySqlPool) -> Result<Vec<String>> {
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT CAST(TABLE_NAME AS CHAR) FROM information_schema.tables WHERE table_schema = DATABASE()",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| Error::schema(format!("Failed to list MySQL tables: {}", e)))?;

        Ok(tables.into_iter().map(|t| t.to_lowercase()).collect())
    }

    async fn existing_columns(pool: &MySqlPool) -> std::result::Result<Vec<ColumnMeta>, sqlx::Error> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT CAST(TABLE_NAME AS CHAR), CAST(COLUMN_NAME AS CHAR), CAST(DATA_TYPE AS CHAR) \
             FROM information_schema.columns WHERE table_schema = DATABASE()",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows
            .iter()
            .map(|(table, column, data_type)| ColumnMeta::new(&table.to_lowercase(), column, data_type))
            .collect())
    }

    async fn existing_indexes(pool: &MySqlPool) -> std::result::Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT DISTINCT CAST(INDEX_NAME AS CHAR) FROM information_schema.statistics \
             WHERE table_schema = DATABASE()",
        )
        .fetch_all(pool)
        .await
    }
}

#[async_trait]
impl BackendAdapter for MySqlAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Mysql
    }

    async fn dial(&self, config: &DatabaseConfig, settings: &ManagerSettings) -> Result<RawConnection> {
        log::info!(
            "Connecting to MySQL at {}:{}/{}",
            config.host,
            config.port,
            config.database_name
        );

        with_dial_timeout(config, settings, async {
            let options = Self::connect_options(config, settings);
            let charset = config
                .options
                .charset
                .as_deref()
                .unwrap_or(&settings.default_charset);
            Self::create_database(&options, config, charset).await?;

            let pool = MySqlPoolOptions::new()
                .max_connections(pool_size(config, settings))
                .acquire_timeout(settings.dial_timeout())
                .idle_timeout(settings.idle_timeout())
                .max_lifetime(settings.max_lifetime())
                .test_before_acquire(true)
                .connect_with(options.database(&config.database_name))
                .await
                .map_err(|e| connect_error(config, "connect", e))?;

            if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
                pool.close().await;
                return Err(connect_error(config, "verification", e));
            }

            Ok(Arc::new(pool) as RawConnection)
        })
        .await
    }

    async fn ensure_schema(
        &self,
        handle: &ConnectionHandle,
        _tenant: Option<&str>,
    ) -> Result<SchemaReport> {
        let pool = Self::pool(handle)?;
        let mut report = SchemaReport::default();

        let existing = Self::existing_tables(pool).await?;
        for (table, ddl) in create_table_statements(Dialect::MySql) {
            if existing.iter().any(|t| t == table) {
                continue;
            }
            sqlx::query(ddl)
                .execute(pool)
                .await
                .map_err(|e| Error::schema(format!("Failed to create table '{}': {}", table, e)))?;
            log::info!("Created MySQL table '{}'", table);
            report.created.push(table.to_string());
        }

        match Self::existing_columns(pool).await {
            Ok(columns) => {
                for step in plan_migrations(Dialect::MySql, &columns) {
                    match sqlx::query(&step.sql(Dialect::MySql)).execute(pool).await {
                        Ok(_) => {
                            log::info!("Migrated {}", step.target());
                            report.record_step(&step);
                        }
                        Err(e) => report.record_failure(&format!("migrate {}", step.target()), e),
                    }
                }
            }
            Err(e) => report.record_failure("inspect columns", e),
        }

        match Self::existing_indexes(pool).await {
            Ok(indexes) => {
                for index in INDEXES.iter().filter(|i| !indexes.iter().any(|n| n == i.name)) {
                    match sqlx::query(&index.create_sql(Dialect::MySql)).execute(pool).await {
                        Ok(_) => report.indexes_created.push(index.name.to_string()),
                        Err(e) => report.record_failure(&format!("create index {}", index.name), e),
                    }
                }
            }
            Err(e) => report.record_failure("inspect indexes", e),
        }

        Ok(report)
    }

    async fn ping(&self, handle: &ConnectionHandle) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(Self::pool(handle)?)
            .await
            .map(|_| ())
            .map_err(|e| Error::connect(format!("MySQL ping failed: {}", e)))
    }

    async fn close(&self, handle: &ConnectionHandle) {
        if let Some(pool) = handle.mysql_pool() {
            pool.close().await;
        }
    }

    async fn execute(&self, handle: &ConnectionHandle, statement: &Statement) -> Result<QueryOutput> {
        let pool = Self::pool(handle)?;
        let sql = match statement {
            Statement::Sql(sql) => sql,
            Statement::Command(_) => {
                return Err(Error::query("MySQL accepts SQL statements only"));
            }
        };

        #[cfg(debug_assertions)]
        log::debug!("MySQL EXECUTE: {}", sql);

        if returns_rows(sql) {
            let rows = sqlx::query(sql)
                .fetch_all(pool)
                .await
                .map_err(|e| Error::query(format!("MySQL fetch_all failed: {}", e)))?;
            Ok(QueryOutput::Rows(rows.iter().map(row_to_json).collect()))
        } else {
            let result = sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(|e| Error::query(format!("MySQL execute failed: {}", e)))?;
            Ok(QueryOutput::Affected(result.rows_affected()))
        }
    }
}

/// Convert a MySQL row to a JSON object keyed by column name
fn row_to_json(row: &MySqlRow) -> JsonValue {
    let mut obj = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        obj.insert(
            column.name().to_string(),
            column_to_json(row, index, column.type_info().name()),
        );
    }
    JsonValue::Object(obj)
}

fn column_to_json(row: &MySqlRow, index: usize, type_name: &str) -> JsonValue {
    let is_null = row
        .try_get_raw(index)
        .map(|raw| raw.is_null())
        .unwrap_or(true);
    if is_null {
        return JsonValue::Null;
    }

    let decoded = match type_name {
        "BOOLEAN" => row.try_get::<bool, _>(index).map(JsonValue::from),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index).map(JsonValue::from)
        }
        t if t.ends_with("UNSIGNED") => row.try_get::<u64, _>(index).map(JsonValue::from),
        "FLOAT" | "DOUBLE" => row.try_get::<f64, _>(index).map(JsonValue::from),
        "DECIMAL" => row
            .try_get::<Decimal, _>(index)
            .map(|d| JsonValue::String(d.to_string())),
        "DATETIME" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|d| JsonValue::String(d.to_string())),
        "TIMESTAMP" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|d| JsonValue::String(d.to_rfc3339())),
        "DATE" => row
            .try_get::<NaiveDate, _>(index)
            .map(|d| JsonValue::String(d.to_string())),
        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|t| JsonValue::String(t.to_string())),
        "JSON" => row.try_get::<JsonValue, _>(index),
        _ => row.try_get::<String, _>(index).map(JsonValue::String).or_else(|_| {
            row.try_get::<Vec<u8>, _>(index)
                .map(|bytes| JsonValue::String(String::from_utf8_lossy(&bytes).into_owned()))
        }),
    };

    decoded.unwrap_or_else(|e| {
        log::debug!("Undecodable MySQL {} column at index {}: {}", type_name, index, e);
        JsonValue::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DatabaseConfig {
        DatabaseConfig::new(BackendKind::Mysql, "db.internal", "shop").with_credentials("app", "pw")
    }

    #[test]
    fn test_connect_options_tls() {
        let settings = ManagerSettings::default();
        let mut config = config();
        let options = MySqlAdapter::connect_options(&config, &settings);
        assert!(matches!(options.get_ssl_mode(), MySqlSslMode::Preferred));

        config.options.tls = Some(true);
        let options = MySqlAdapter::connect_options(&config, &settings);
        assert!(matches!(options.get_ssl_mode(), MySqlSslMode::Required));
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 3306);
    }

    #[test]
    fn test_connect_options_unbracket_ipv6() {
        let settings = ManagerSettings::default();
        for host in ["::1", "[::1]"] {
            let config =
                DatabaseConfig::new(BackendKind::Mysql, host, "shop").with_credentials("app", "pw");
            let options = MySqlAdapter::connect_options(&config, &settings);
            assert_eq!(options.get_host(), "::1");
        }
    }

    #[tokio::test]
    async fn test_execute_rejects_foreign_handle() {
        let handle = ConnectionHandle::new(
            crate::database::key::CanonicalKey::from_config(&config(), false),
            Arc::new(()),
        );
        let err = MySqlAdapter::new()
            .execute(&handle, &Statement::sql("SELECT 1"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "E_QUERY");
    }

    #[tokio::test]
    #[ignore = "needs a closed local port; run with --ignored"]
    async fn test_closed_port_fails_within_dial_timeout() {
        let config = DatabaseConfig::new(BackendKind::Mysql, "127.0.0.1", "shop")
            .with_port(1)
            .with_credentials("app", "pw");
        let settings = ManagerSettings {
            dial_timeout_secs: 2,
            ..ManagerSettings::default()
        };

        let started = std::time::Instant::now();
        let err = MySqlAdapter::new().dial(&config, &settings).await.err().unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert!(err.hint().is_some());
    }
}
