//! PostgreSQL adapter

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
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{Column, ConnectOptions, Connection, PgPool, Row, TypeInfo, ValueRef};
use std::sync::Arc;

/// Maintenance database used to create the target
const ADMIN_DATABASE: &str = "postgres";

/// SQLSTATEs meaning "database already exists", including the creation race
const DUPLICATE_DATABASE_CODES: [&str; 2] = ["42P04", "23505"];

/// PostgreSQL adapter; stateless, the pool lives in the handle
#[derive(Debug, Clone, Default)]
pub struct PostgresAdapter;

impl PostgresAdapter {
    pub fn new() -> Self {
        Self
    }

    fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
        let ssl_mode = if config.options.tls.unwrap_or(false) {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(config.bare_host())
            .port(config.port)
            .username(config.username().unwrap_or_default())
            .password(config.password().unwrap_or_default())
            .ssl_mode(ssl_mode)
    }

    /// Create the target database through the maintenance database
    ///
    /// Best effort: any failure is logged and the dial goes straight to the
    /// target, which then reports the real problem.
    async fn create_database(options: &PgConnectOptions, config: &DatabaseConfig) {
        let mut conn = match options.clone().database(ADMIN_DATABASE).connect().await {
            Ok(conn) => conn,
            Err(e) => {
                log::warn!(
                    "Could not reach PostgreSQL maintenance database ({}), connecting to '{}' directly",
                    e,
                    config.database_name
                );
                return;
            }
        };

        let exists: std::result::Result<Option<i32>, sqlx::Error> =
            sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
                .bind(&config.database_name)
                .fetch_optional(&mut conn)
                .await;

        match exists {
            Ok(Some(_)) => {}
            Ok(None) => {
                // Database name is restricted to [A-Za-z0-9_-] by validation
                let sql = format!("CREATE DATABASE \"{}\"", config.database_name);
                match sqlx::query(&sql).execute(&mut conn).await {
                    Ok(_) => log::info!("Created PostgreSQL database '{}'", config.database_name),
                    Err(sqlx::Error::Database(db)) if is_duplicate_database(db.code().as_deref()) => {
                        log::debug!(
                            "PostgreSQL database '{}' was created concurrently",
                            config.database_name
                        );
                    }
                    Err(e) => log::warn!(
                        "Could not create PostgreSQL database '{}': {}",
                        config.database_name,
                        e
                    ),
                }
            }
            Err(e) => log::warn!("Could not check for PostgreSQL database: {}", e),
        }

        let _ = conn.close().await;
    }

    fn pool(handle: &ConnectionHandle) -> Result<&PgPool> {
        handle.pg_pool().ok_or_else(|| {
            Error::query(format!("Handle {} does not hold a PostgreSQL pool", handle.key()))
        })
    }

    async fn existing_tables(pool: &PgPool) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables WHERE table_schema = current_schema()",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| Error::schema(format!("Failed to list PostgreSQL tables: {}", e)))
    }

    async fn existing_columns(pool: &PgPool) -> std::result::Result<Vec<ColumnMeta>, sqlx::Error> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT table_name::text, column_name::text, data_type::text \
             FROM information_schema.columns WHERE table_schema = current_schema()",
        )
        .fetch_all(pool)
        .await?;

        Ok(rows
            .iter()
            .map(|(table, column, data_type)| ColumnMeta::new(table, column, data_type))
            .collect())
    }

    async fn existing_indexes(pool: &PgPool) -> std::result::Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT indexname::text FROM pg_indexes WHERE schemaname = current_schema()")
            .fetch_all(pool)
            .await
    }
}

#[async_trait]
impl BackendAdapter for PostgresAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgresql
    }

    async fn dial(&self, config: &DatabaseConfig, settings: &ManagerSettings) -> Result<RawConnection> {
        log::info!(
            "Connecting to PostgreSQL at {}:{}/{}",
            config.host,
            config.port,
            config.database_name
        );

        with_dial_timeout(config, settings, async {
            let options = Self::connect_options(config);
            Self::create_database(&options, config).await;

            let pool = PgPoolOptions::new()
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
        for (table, ddl) in create_table_statements(Dialect::Postgres) {
            if existing.iter().any(|t| t == table) {
                continue;
            }
            sqlx::query(ddl)
                .execute(pool)
                .await
                .map_err(|e| Error::schema(format!("Failed to create table '{}': {}", table, e)))?;
            log::info!("Created PostgreSQL table '{}'", table);
            report.created.push(table.to_string());
        }

        match Self::existing_columns(pool).await {
            Ok(columns) => {
                for step in plan_migrations(Dialect::Postgres, &columns) {
                    match sqlx::query(&step.sql(Dialect::Postgres)).execute(pool).await {
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
                    match sqlx::query(&index.create_sql(Dialect::Postgres)).execute(pool).await {
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
            .map_err(|e| Error::connect(format!("PostgreSQL ping failed: {}", e)))
    }

    async fn close(&self, handle: &ConnectionHandle) {
        if let Some(pool) = handle.pg_pool() {
            pool.close().await;
        }
    }

    async fn execute(&self, handle: &ConnectionHandle, statement: &Statement) -> Result<QueryOutput> {
        let pool = Self::pool(handle)?;
        let sql = match statement {
            Statement::Sql(sql) => sql,
            Statement::Command(_) => {
                return Err(Error::query("PostgreSQL accepts SQL statements only"));
            }
        };

        #[cfg(debug_assertions)]
        log::debug!("PostgreSQL EXECUTE: {}", sql);

        if returns_rows(sql) {
            let rows = sqlx::query(sql)
                .fetch_all(pool)
                .await
                .map_err(|e| Error::query(format!("PostgreSQL fetch_all failed: {}", e)))?;
            Ok(QueryOutput::Rows(rows.iter().map(row_to_json).collect()))
        } else {
            let result = sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(|e| Error::query(format!("PostgreSQL execute failed: {}", e)))?;
            Ok(QueryOutput::Affected(result.rows_affected()))
        }
    }
}

fn row_to_json(row: &PgRow) -> JsonValue {
    let mut obj = serde_json::Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        obj.insert(
            column.name().to_string(),
            column_to_json(row, index, column.type_info().name()),
        );
    }
    JsonValue::Object(obj)
}

fn column_to_json(row: &PgRow, index: usize, type_name: &str) -> JsonValue {
    let is_null = row
        .try_get_raw(index)
        .map(|raw| raw.is_null())
        .unwrap_or(true);
    if is_null {
        return JsonValue::Null;
    }

    let decoded = match type_name {
        "BOOL" => row.try_get::<bool, _>(index).map(JsonValue::from),
        "INT2" => row.try_get::<i16, _>(index).map(JsonValue::from),
        "INT4" => row.try_get::<i32, _>(index).map(JsonValue::from),
        "INT8" => row.try_get::<i64, _>(index).map(JsonValue::from),
        "FLOAT4" => row.try_get::<f32, _>(index).map(JsonValue::from),
        "FLOAT8" => row.try_get::<f64, _>(index).map(JsonValue::from),
        "NUMERIC" => row
            .try_get::<Decimal, _>(index)
            .map(|d| JsonValue::String(d.to_string())),
        "TIMESTAMP" => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|d| JsonValue::String(d.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|d| JsonValue::String(d.to_rfc3339())),
        "DATE" => row
            .try_get::<NaiveDate, _>(index)
            .map(|d| JsonValue::String(d.to_string())),
        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|t| JsonValue::String(t.to_string())),
        "JSON" | "JSONB" => row.try_get::<JsonValue, _>(index),
        "BYTEA" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| JsonValue::String(String::from_utf8_lossy(&bytes).into_owned())),
        _ => row.try_get::<String, _>(index).map(JsonValue::String),
    };

    decoded.unwrap_or_else(|e| {
        log::debug!("Undecodable PostgreSQL {} column at index {}: {}", type_name, index, e);
        JsonValue::Null
    })
}

/// Whether a CREATE DATABASE failure means another session created it first
fn is_duplicate_database(code: Option<&str>) -> bool {
    code.is_some_and(|code| DUPLICATE_DATABASE_CODES.contains(&code))
}
