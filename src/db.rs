//! Database connection and schema bootstrap for the issue store and run ledger.

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::AppConfig;

/// Connection attempts made before startup gives up.
const CONNECT_ATTEMPTS: u32 = 5;

/// Delay before the second attempt; doubled after every failure.
const INITIAL_CONNECT_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("could not connect to the database after {attempts} attempts: {source}")]
    ConnectionFailed {
        attempts: u32,
        #[source]
        source: sea_orm::DbErr,
    },
    #[error("database URL is empty")]
    EmptyUrl,
}

/// Open the connection pool. Both loops usually start alongside the database
/// under one supervisor, so a few failed attempts are tolerated.
///
/// ```no_run
/// use bec_alerts::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let db = init_pool(&AppConfig::default()).await?;
///     bec_alerts::db::migrate(&db).await
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::EmptyUrl.into());
    }

    let mut options = ConnectOptions::new(&cfg.database_url);
    options
        .max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let mut delay = INITIAL_CONNECT_DELAY;
    let mut attempt = 1;
    loop {
        match Database::connect(options.clone()).await {
            Ok(db) => {
                info!(attempt, "Connected to database");
                return Ok(db);
            }
            Err(source) if attempt == CONNECT_ATTEMPTS => {
                return Err(DatabaseError::ConnectionFailed {
                    attempts: attempt,
                    source,
                }
                .into());
            }
            Err(err) => {
                warn!(attempt, error = %err, retry_in_ms = delay.as_millis() as u64, "Database connection failed");
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Apply pending migrations. Every command calls this before starting.
pub async fn migrate(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("applying database migrations")
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, Statement};

    #[tokio::test]
    async fn empty_url_is_rejected_without_connecting() {
        let config = AppConfig {
            database_url: String::new(),
            ..AppConfig::default()
        };

        let err = init_pool(&config).await.unwrap_err();
        assert!(matches!(
            err.downcast::<DatabaseError>(),
            Ok(DatabaseError::EmptyUrl)
        ));
    }

    #[tokio::test]
    async fn unreachable_database_fails_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            // mode=ro refuses to create the missing file
            database_url: format!("sqlite://{}?mode=ro", dir.path().join("missing.sqlite").display()),
            ..AppConfig::default()
        };

        let err = init_pool(&config).await.unwrap_err();
        assert!(matches!(
            err.downcast::<DatabaseError>(),
            Ok(DatabaseError::ConnectionFailed { attempts: CONNECT_ATTEMPTS, .. })
        ));
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let config = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            db_max_connections: 1,
            ..AppConfig::default()
        };
        let db = init_pool(&config).await.expect("connect");
        migrate(&db).await.expect("first migrate");
        migrate(&db).await.expect("second migrate");

        let row = db
            .query_one(Statement::from_string(
                db.get_database_backend(),
                "SELECT COUNT(*) AS n FROM trigger_runs".to_string(),
            ))
            .await
            .unwrap()
            .expect("count row");
        assert_eq!(row.try_get::<i64>("", "n").unwrap(), 0);
    }
}
