//! Embedded SQLite project store
//!
//! Opens the pool behind [`DatabaseAdapter`](crate::storage::DatabaseAdapter)
//! and brings its schema up to date.

use crate::storage::migrations;
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const MEMORY_PATH: &str = ":memory:";

/// Pool size for an on-disk project database
const FILE_POOL_SIZE: u32 = 5;

/// How to open the project database
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database file, or `:memory:`
    pub path: PathBuf,
    pub max_connections: u32,
    /// Apply pending schema migrations on open
    pub auto_migrate: bool,
    pub journal_mode: SqliteJournalMode,
    /// FULL for files so a committed save survives power loss
    pub synchronous: SqliteSynchronous,
}

impl DatabaseConfig {
    /// Project database stored at `path`
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: FILE_POOL_SIZE,
            auto_migrate: true,
            journal_mode: SqliteJournalMode::Wal,
            synchronous: SqliteSynchronous::Full,
        }
    }

    /// Private in-process database. A second connection would see a
    /// different empty database, so the pool holds exactly one.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(MEMORY_PATH),
            max_connections: 1,
            auto_migrate: true,
            journal_mode: SqliteJournalMode::Memory,
            synchronous: SqliteSynchronous::Normal,
        }
    }

    /// Open without touching the schema (used by `hvacstore doctor`)
    pub fn no_migrate(mut self) -> Self {
        self.auto_migrate = false;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == MEMORY_PATH
    }

    fn connect_options(&self) -> Result<SqliteConnectOptions> {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new().filename(&self.path)
        };
        Ok(options
            .journal_mode(self.journal_mode)
            .synchronous(self.synchronous)
            .create_if_missing(true))
    }
}

/// `<data dir>/hvacstore/projects.db`, or `hvacstore.db` in the working
/// directory when the platform has no data dir
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("hvacstore").join("projects.db"))
        .unwrap_or_else(|| PathBuf::from("hvacstore.db"))
}

/// Open project database
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if !config.is_in_memory() {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Cannot create database directory {}", parent.display())
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(config.connect_options()?)
            .await
            .with_context(|| format!("Cannot open project database {}", config.path.display()))?;

        let db = Self {
            pool,
            path: config.path,
        };
        if config.auto_migrate {
            db.migrate().await?;
        }
        Ok(db)
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn migrate(&self) -> Result<()> {
        migrations::run_migrations(&self.pool)
            .await
            .context("Project database migration failed")
    }

    pub async fn migration_status(&self) -> Result<migrations::MigrationStatus> {
        migrations::migration_status(&self.pool)
            .await
            .context("Cannot read project database schema version")
    }

    /// Round-trip a trivial query through the pool
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Project database is not responding")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
