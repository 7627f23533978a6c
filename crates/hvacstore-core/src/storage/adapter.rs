//! Storage adapter contract
//!
//! Every backend implements [`StorageAdapter`] with identical semantics so
//! callers never branch on the substrate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StorageError;
use crate::project::{MetadataUpdate, ProjectDocument, ProjectMetadata};

/// Result of a storage adapter operation
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Options for [`StorageAdapter::save_project`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOptions {
    /// Copy the current primary to the backup slot first
    pub create_backup: bool,
    /// Write through a temporary file and rename where the substrate allows
    pub atomic: bool,
    /// Also write the metadata projection next to the primary
    pub update_metadata: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            create_backup: true,
            atomic: true,
            update_metadata: false,
        }
    }
}

impl SaveOptions {
    pub fn without_backup() -> Self {
        Self {
            create_backup: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// Location of the primary record, in the adapter's own addressing
    pub file_path: String,
    pub size_bytes: u64,
    /// `modifiedAt` as written
    pub modified_at: DateTime<Utc>,
}

/// Recovery tier a load was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Primary,
    Backup,
    AutoSave,
}

impl LoadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Backup => "backup",
            Self::AutoSave => "auto_save",
        }
    }
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub project: ProjectDocument,
    pub source: LoadSource,
    /// The stored document had an older schema version
    pub migrated: bool,
    /// Recovered by best-effort decoding of a damaged primary
    pub lenient: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateOutcome {
    pub project: ProjectDocument,
    /// Tier the original was loaded from
    pub source: LoadSource,
}

/// One point-in-time auto-save of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSaveRecord {
    pub project_id: Uuid,
    pub timestamp: String,
    pub auto_save_id: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoSaveOutcome {
    pub record: AutoSaveRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Desktop,
    Web,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Filesystem,
    Directory,
    Database,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Directory => "directory",
            Self::Database => "database",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of substrate usage; never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub platform: Platform,
    pub storage_type: StorageKind,
    pub total_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub available_bytes: Option<u64>,
    pub quota_exceeded: bool,
}

/// Durable project storage over a single substrate
///
/// Implementations own their substrate handle for their whole lifetime.
/// There is no internal locking: callers serialize access per project.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Backend identity, for logging and diagnostics
    fn kind(&self) -> StorageKind;

    /// Time source for every timestamp the adapter writes
    fn clock(&self) -> &dyn Clock;

    /// Validate, back up the current primary and write the project
    ///
    /// `modifiedAt` is refreshed from the clock before encoding. A document
    /// that fails validation is rejected with `VALIDATION_ERROR` and nothing
    /// is written.
    async fn save_project(
        &self,
        project: &ProjectDocument,
        options: SaveOptions,
    ) -> StorageResult<SaveOutcome>;

    /// Load a project, walking the recovery tiers when the primary is damaged
    async fn load_project(&self, project_id: Uuid) -> StorageResult<LoadOutcome>;

    /// Remove every record of a project; succeeds when nothing exists
    async fn delete_project(&self, project_id: Uuid) -> StorageResult<()>;

    /// Copy a project under a new identity and name
    async fn duplicate_project(
        &self,
        project_id: Uuid,
        new_name: &str,
    ) -> StorageResult<DuplicateOutcome> {
        let loaded = self.load_project(project_id).await?;
        let now = self.clock().now();

        let mut copy = loaded.project;
        copy.project_id = Uuid::new_v4();
        copy.project_name = new_name.to_string();
        copy.created_at = now;
        copy.modified_at = now;
        copy.is_archived = false;

        let saved = self.save_project(&copy, SaveOptions::default()).await?;
        copy.modified_at = saved.modified_at;

        info!(
            adapter = %self.kind(),
            source_id = %project_id,
            project_id = %copy.project_id,
            "Duplicated project"
        );
        Ok(DuplicateOutcome {
            project: copy,
            source: loaded.source,
        })
    }

    /// Metadata of every readable project, most recently modified first
    async fn list_projects(&self) -> StorageResult<Vec<ProjectMetadata>>;

    /// Case-insensitive substring search over name, number, client and location
    async fn search_projects(&self, query: &str) -> StorageResult<Vec<ProjectMetadata>> {
        let needle = query.to_lowercase();
        let projects = self.list_projects().await?;
        Ok(projects
            .into_iter()
            .filter(|metadata| metadata.matches_query(&needle))
            .collect())
    }

    /// Write a point-in-time copy, then prune to the configured retention
    ///
    /// Never writes a backup and never touches the primary.
    async fn auto_save(&self, project: &ProjectDocument) -> StorageResult<AutoSaveOutcome>;

    /// Auto-saves of a project, newest first
    async fn list_auto_saves(&self, project_id: Uuid) -> StorageResult<Vec<AutoSaveRecord>>;

    /// Promote an auto-save to primary after backing up the current primary
    async fn restore_auto_save(
        &self,
        project_id: Uuid,
        timestamp: &str,
    ) -> StorageResult<LoadOutcome>;

    /// Delete all but the `keep_count` newest auto-saves; returns the removed count
    async fn cleanup_auto_saves(&self, project_id: Uuid, keep_count: usize)
    -> StorageResult<usize>;

    /// Merge a metadata patch into the stored project without a backup
    async fn update_metadata(
        &self,
        project_id: Uuid,
        update: &MetadataUpdate,
    ) -> StorageResult<()>;

    /// Store raw PNG bytes as the project thumbnail
    async fn save_thumbnail(&self, project_id: Uuid, image: &[u8]) -> StorageResult<()>;

    async fn storage_info(&self) -> StorageResult<StorageInfo>;
}
