//! Storage layer - project persistence and recovery
//!
//! One contract, three substrates.
//!
//! # Architecture
//!
//! - `adapter`: the [`StorageAdapter`] contract and its outcome types
//! - `serialization`: validate, encode, decode and version-migrate documents
//! - `recovery`: primary → backup → auto-saves → lenient load chain
//! - `timestamp`: ISO timestamps and auto-save identifiers
//! - `filesystem` / `fs`: path-addressed adapter over a [`FileSystem`]
//! - `directory` / `handle`: handle-addressed adapter over a [`DirectoryHandle`]
//! - `database_adapter` / `database` / `migrations`: SQLite adapter via sqlx
//! - `factory`: picks the adapter for a session
//! - `transfer`: moves projects between adapters
//!
//! # Usage
//!
//! ```ignore
//! use hvacstore_core::storage::{FileSystemAdapter, SaveOptions, StorageAdapter};
//!
//! let adapter = FileSystemAdapter::new("/srv/projects", Arc::new(SystemClock));
//! adapter.save_project(&project, SaveOptions::default()).await?;
//! let loaded = adapter.load_project(project.project_id).await?;
//! ```

pub mod adapter;
pub mod database;
pub mod database_adapter;
pub mod directory;
pub mod factory;
pub mod filesystem;
pub mod fs;
pub mod handle;
pub mod migrations;
pub(crate) mod recovery;
pub mod serialization;
pub mod timestamp;
pub mod transfer;

// Re-export commonly used types
pub use adapter::{
    AutoSaveOutcome, AutoSaveRecord, DuplicateOutcome, LoadOutcome, LoadSource, Platform,
    SaveOptions, SaveOutcome, StorageAdapter, StorageInfo, StorageKind, StorageResult,
};
pub use database::{Database, DatabaseConfig};
pub use database_adapter::DatabaseAdapter;
pub use directory::DirectoryAdapter;
pub use factory::create_adapter;
pub use filesystem::FileSystemAdapter;
pub use fs::{FileSystem, TokioFileSystem};
pub use handle::{DirectoryHandle, PermissionGrant, PermissionState, ScopedDirectory};
pub use migrations::{CURRENT_VERSION, MigrationStatus, migration_status, run_migrations};
pub use serialization::{CURRENT_SCHEMA_VERSION, DeserializeError, MigrationError};
pub use transfer::{MigrationProgress, migrate_projects};
