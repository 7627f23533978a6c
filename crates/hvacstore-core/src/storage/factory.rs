//! Adapter selection
//!
//! Builds the one adapter a session works with. Callers own the result; there
//! is no process-wide instance.

use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::config::{Config, StorageBackend};
use crate::error::{Error, Result};
use crate::storage::adapter::StorageAdapter;
use crate::storage::database::{DatabaseConfig, default_database_path};
use crate::storage::database_adapter::DatabaseAdapter;
use crate::storage::directory::DirectoryAdapter;
use crate::storage::filesystem::{FileSystemAdapter, default_projects_root};
use crate::storage::handle::{DirectoryHandle, PermissionState};

/// Create the adapter selected by `config.storage.backend`
///
/// `handle` is the caller's directory capability, if one was granted. The
/// `directory` backend requires it; `auto` uses it when granted and falls back
/// to the filesystem otherwise.
pub async fn create_adapter(
    config: &Config,
    handle: Option<Arc<dyn DirectoryHandle>>,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn StorageAdapter>> {
    let keep_count = config.auto_save.keep_count;
    let granted = handle.filter(|h| h.permission() == PermissionState::Granted);

    let adapter: Box<dyn StorageAdapter> = match (config.storage.backend, granted) {
        (StorageBackend::Directory | StorageBackend::Auto, Some(handle)) => {
            info!(backend = "directory", root = handle.name(), "Using directory storage");
            Box::new(DirectoryAdapter::new(handle, clock).with_auto_save_keep(keep_count))
        }
        (StorageBackend::Directory, None) => {
            let target = config
                .storage
                .directory_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(unset)".to_string());
            return Err(Error::PermissionNotGranted(target));
        }
        (StorageBackend::Filesystem | StorageBackend::Auto, _) => {
            let root = config
                .storage
                .base_dir
                .clone()
                .unwrap_or_else(default_projects_root);
            info!(backend = "filesystem", root = %root.display(), "Using filesystem storage");
            Box::new(FileSystemAdapter::new(root, clock).with_auto_save_keep(keep_count))
        }
        (StorageBackend::Database, _) => {
            let path = config
                .storage
                .database_path
                .clone()
                .unwrap_or_else(default_database_path);
            info!(backend = "database", path = %path.display(), "Using database storage");
            let adapter = DatabaseAdapter::open(DatabaseConfig::with_path(path), clock).await?;
            Box::new(adapter.with_auto_save_keep(keep_count))
        }
    };

    Ok(adapter)
}
