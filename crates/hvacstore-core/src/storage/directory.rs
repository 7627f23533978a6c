//! Sandboxed directory adapter
//!
//! Works through a caller-granted [`DirectoryHandle`]. Layout per project:
//!
//! ```text
//! <id>/<id>.hvac                             primary
//! <id>/metadata.json                         listing projection
//! <id>/<id>.hvac.backup                      backup
//! <id>/.autosaves/<id>-<timestamp>.hvac      auto-saves (sanitized timestamp)
//! <id>/thumbnail.png
//! ```
//!
//! The handle API has no rename, so primary writes are not atomic. Backup
//! before overwrite and the recovery chain cover a torn write.

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::DEFAULT_AUTO_SAVE_KEEP;
use crate::error::{ErrorCode, StorageError};
use crate::project::metadata::sort_by_modified_desc;
use crate::project::{MetadataUpdate, ProjectDocument, ProjectMetadata};
use crate::storage::adapter::{
    AutoSaveOutcome, AutoSaveRecord, LoadOutcome, LoadSource, Platform, SaveOptions, SaveOutcome,
    StorageAdapter, StorageInfo, StorageKind, StorageResult,
};
use crate::storage::handle::{DirectoryHandle, EntryKind, PermissionState};
use crate::storage::recovery::{self, RecoverySource};
use crate::storage::serialization;
use crate::storage::timestamp::{self, unsanitize};

const METADATA_FILE: &str = "metadata.json";
const AUTOSAVE_DIR: &str = ".autosaves";
const THUMBNAIL_FILE: &str = "thumbnail.png";

fn primary_name(project_id: Uuid) -> String {
    format!("{}.hvac", project_id)
}

fn backup_name(project_id: Uuid) -> String {
    format!("{}.hvac.backup", project_id)
}

fn auto_save_file_name(auto_save_id: &str) -> String {
    format!("{}.hvac", auto_save_id)
}

/// Adapter over a permissioned directory handle
pub struct DirectoryAdapter {
    root: Arc<dyn DirectoryHandle>,
    clock: Arc<dyn Clock>,
    keep_count: usize,
}

impl DirectoryAdapter {
    pub fn new(root: Arc<dyn DirectoryHandle>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root,
            clock,
            keep_count: DEFAULT_AUTO_SAVE_KEEP,
        }
    }

    pub fn with_auto_save_keep(mut self, keep_count: usize) -> Self {
        self.keep_count = keep_count;
        self
    }

    pub fn root(&self) -> &Arc<dyn DirectoryHandle> {
        &self.root
    }

    fn ensure_permission(&self) -> StorageResult<()> {
        match self.root.permission() {
            PermissionState::Granted => Ok(()),
            state => Err(StorageError::PermissionDenied(format!(
                "directory access is {:?}; the folder must be granted again",
                state
            ))),
        }
    }

    async fn project_dir(
        &self,
        project_id: Uuid,
        create: bool,
    ) -> io::Result<Option<Arc<dyn DirectoryHandle>>> {
        self.root.directory(&project_id.to_string(), create).await
    }

    async fn writable_project_dir(&self, project_id: Uuid) -> StorageResult<Arc<dyn DirectoryHandle>> {
        self.project_dir(project_id, true)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?
            .ok_or_else(|| {
                StorageError::Write(format!("could not create entry for project {}", project_id))
            })
    }

    async fn auto_save_dir(
        &self,
        project_id: Uuid,
        create: bool,
    ) -> io::Result<Option<Arc<dyn DirectoryHandle>>> {
        match self.project_dir(project_id, create).await? {
            Some(dir) => dir.directory(AUTOSAVE_DIR, create).await,
            None => Ok(None),
        }
    }

    async fn read_in_project(&self, project_id: Uuid, name: &str) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_permission()?;
        let read = async {
            match self.project_dir(project_id, false).await? {
                Some(dir) => dir.read_file(name).await,
                None => Ok(None),
            }
        };
        read.await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::ReadError))
    }

    /// Copy the current primary to the backup slot; failures are logged only
    async fn create_backup(&self, dir: &dyn DirectoryHandle, project_id: Uuid) {
        match dir.read_file(&primary_name(project_id)).await {
            Ok(Some(existing)) => {
                if let Err(e) = dir.write_file(&backup_name(project_id), &existing).await {
                    warn!(adapter = "directory", %project_id, error = %e, "Failed to create backup");
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(adapter = "directory", %project_id, error = %e, "Failed to read primary for backup")
            }
        }
    }

    async fn write_metadata(&self, dir: &dyn DirectoryHandle, project: &ProjectDocument) {
        let metadata = ProjectMetadata::from(project);
        let result = match serde_json::to_vec_pretty(&metadata) {
            Ok(json) => dir.write_file(METADATA_FILE, &json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(adapter = "directory", project_id = %project.project_id, error = %e, "Failed to write metadata");
        }
    }

    /// Metadata projection of one project entry, if present and valid
    async fn read_metadata(&self, dir: &dyn DirectoryHandle, project_id: Uuid) -> Option<ProjectMetadata> {
        let bytes = dir.read_file(METADATA_FILE).await.ok()??;
        let metadata: ProjectMetadata = serde_json::from_slice(&bytes).ok()?;
        if metadata.project_id != project_id || metadata.validate().is_err() {
            return None;
        }
        Some(metadata)
    }

    async fn tree_size(&self) -> io::Result<u64> {
        let mut total = 0;
        let mut pending = vec![Arc::clone(&self.root)];
        while let Some(dir) = pending.pop() {
            for entry in dir.entries().await? {
                match entry.kind {
                    EntryKind::File => total += entry.size,
                    EntryKind::Directory => {
                        if let Some(child) = dir.directory(&entry.name, false).await? {
                            pending.push(child);
                        }
                    }
                }
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl RecoverySource for DirectoryAdapter {
    fn source_kind(&self) -> StorageKind {
        StorageKind::Directory
    }

    async fn read_primary(&self, project_id: Uuid) -> StorageResult<Option<Vec<u8>>> {
        self.read_in_project(project_id, &primary_name(project_id)).await
    }

    async fn read_backup(&self, project_id: Uuid) -> StorageResult<Option<Vec<u8>>> {
        self.read_in_project(project_id, &backup_name(project_id)).await
    }

    async fn auto_save_records(&self, project_id: Uuid) -> StorageResult<Vec<AutoSaveRecord>> {
        self.list_auto_saves(project_id).await
    }

    async fn read_auto_save(&self, record: &AutoSaveRecord) -> StorageResult<Option<Vec<u8>>> {
        let dir = self
            .auto_save_dir(record.project_id, false)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::ReadError))?;
        let Some(dir) = dir else {
            return Ok(None);
        };
        dir.read_file(&auto_save_file_name(&record.auto_save_id))
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::ReadError))
    }
}

#[async_trait]
impl StorageAdapter for DirectoryAdapter {
    fn kind(&self) -> StorageKind {
        StorageKind::Directory
    }

    fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    async fn save_project(
        &self,
        project: &ProjectDocument,
        options: SaveOptions,
    ) -> StorageResult<SaveOutcome> {
        let project_id = project.project_id;
        if let Err(e) = project.validate() {
            warn!(adapter = "directory", %project_id, error = %e, "Rejected invalid project");
            return Err(StorageError::Validation(e.to_string()));
        }
        self.ensure_permission()?;

        let mut updated = project.clone();
        updated.modified_at = self.clock.now();
        let content = serialization::serialize(&updated)
            .map_err(|e| StorageError::Validation(e.to_string()))?;

        let dir = self.writable_project_dir(project_id).await?;
        if options.create_backup {
            self.create_backup(dir.as_ref(), project_id).await;
        }

        dir.write_file(&primary_name(project_id), content.as_bytes())
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?;
        self.write_metadata(dir.as_ref(), &updated).await;

        info!(adapter = "directory", %project_id, bytes = content.len(), "Saved project");
        Ok(SaveOutcome {
            file_path: format!("{}/{}", project_id, primary_name(project_id)),
            size_bytes: content.len() as u64,
            modified_at: updated.modified_at,
        })
    }

    async fn load_project(&self, project_id: Uuid) -> StorageResult<LoadOutcome> {
        self.ensure_permission()?;
        recovery::load_with_fallback(self, project_id, self.clock.now()).await
    }

    async fn delete_project(&self, project_id: Uuid) -> StorageResult<()> {
        self.ensure_permission()?;
        match self.root.remove_entry(&project_id.to_string(), true).await {
            Ok(()) => {
                info!(adapter = "directory", %project_id, "Deleted project");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(&e, ErrorCode::DeleteError)),
        }
    }

    async fn list_projects(&self) -> StorageResult<Vec<ProjectMetadata>> {
        self.ensure_permission()?;
        let entries = self
            .root
            .entries()
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::ReadError))?;

        let mut projects = Vec::new();
        for entry in entries {
            if entry.kind != EntryKind::Directory || entry.name.starts_with('.') {
                continue;
            }
            let Ok(project_id) = Uuid::parse_str(&entry.name) else {
                continue;
            };
            let dir = match self.project_dir(project_id, false).await {
                Ok(Some(dir)) => dir,
                Ok(None) => continue,
                Err(e) => {
                    warn!(adapter = "directory", %project_id, error = %e, "Skipping unreadable project");
                    continue;
                }
            };

            if let Some(metadata) = self.read_metadata(dir.as_ref(), project_id).await {
                projects.push(metadata);
                continue;
            }
            debug!(adapter = "directory", %project_id, "No usable metadata, loading project");
            match self.load_project(project_id).await {
                Ok(loaded) => projects.push(ProjectMetadata::from(&loaded.project)),
                Err(e) => warn!(adapter = "directory", %project_id, error = %e, "Skipping project"),
            }
        }

        sort_by_modified_desc(&mut projects);
        Ok(projects)
    }

    async fn auto_save(&self, project: &ProjectDocument) -> StorageResult<AutoSaveOutcome> {
        let project_id = project.project_id;
        self.ensure_permission()?;
        let content = serialization::serialize(project)
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        let timestamp = timestamp::now_iso(self.clock.as_ref());
        let auto_save_id = timestamp::auto_save_id(project_id, &timestamp);

        let dir = self
            .auto_save_dir(project_id, true)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?
            .ok_or_else(|| StorageError::Write("could not create auto-save folder".to_string()))?;
        dir.write_file(&auto_save_file_name(&auto_save_id), content.as_bytes())
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?;

        let record = AutoSaveRecord {
            project_id,
            timestamp,
            auto_save_id,
            size_bytes: content.len() as u64,
        };
        debug!(adapter = "directory", %project_id, auto_save_id = %record.auto_save_id, "Auto-saved project");

        if let Err(e) = self.cleanup_auto_saves(project_id, self.keep_count).await {
            warn!(adapter = "directory", %project_id, error = %e, "Auto-save cleanup failed");
        }
        Ok(AutoSaveOutcome { record })
    }

    async fn list_auto_saves(&self, project_id: Uuid) -> StorageResult<Vec<AutoSaveRecord>> {
        self.ensure_permission()?;
        let dir = self
            .auto_save_dir(project_id, false)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::ReadError))?;
        let Some(dir) = dir else {
            return Ok(Vec::new());
        };
        let entries = dir
            .entries()
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::ReadError))?;

        let prefix = format!("{}-", project_id);
        let mut records: Vec<AutoSaveRecord> = entries
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .filter_map(|entry| {
                let auto_save_id = entry.name.strip_suffix(".hvac")?;
                let sanitized = auto_save_id.strip_prefix(&prefix)?;
                Some(AutoSaveRecord {
                    project_id,
                    timestamp: unsanitize(sanitized),
                    auto_save_id: auto_save_id.to_string(),
                    size_bytes: entry.size,
                })
            })
            .collect();
        records.sort_by(|a, b| timestamp::cmp_newest_first(&a.timestamp, &b.timestamp));
        Ok(records)
    }

    async fn restore_auto_save(
        &self,
        project_id: Uuid,
        timestamp: &str,
    ) -> StorageResult<LoadOutcome> {
        self.ensure_permission()?;
        let auto_save_id = timestamp::auto_save_id(project_id, timestamp);
        let record = AutoSaveRecord {
            project_id,
            timestamp: timestamp.to_string(),
            auto_save_id: auto_save_id.clone(),
            size_bytes: 0,
        };
        let text = self
            .read_auto_save(&record)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("Auto-save {} not found", auto_save_id)))?;
        let (project, migrated) =
            recovery::decode(&text).map_err(|f| f.into_storage_error(&auto_save_id))?;

        let dir = self.writable_project_dir(project_id).await?;
        self.create_backup(dir.as_ref(), project_id).await;

        let content = if migrated {
            serialization::serialize(&project)
                .map_err(|e| StorageError::Write(e.to_string()))?
                .into_bytes()
        } else {
            text
        };
        dir.write_file(&primary_name(project_id), &content)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?;
        self.write_metadata(dir.as_ref(), &project).await;

        info!(adapter = "directory", %project_id, %timestamp, "Restored project from auto-save");
        Ok(LoadOutcome {
            project,
            source: LoadSource::AutoSave,
            migrated,
            lenient: false,
        })
    }

    async fn cleanup_auto_saves(
        &self,
        project_id: Uuid,
        keep_count: usize,
    ) -> StorageResult<usize> {
        let records = self.list_auto_saves(project_id).await?;
        if records.len() <= keep_count {
            return Ok(0);
        }
        let Some(dir) = self
            .auto_save_dir(project_id, false)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::DeleteError))?
        else {
            return Ok(0);
        };

        let mut removed = 0;
        for record in records.iter().skip(keep_count) {
            match dir
                .remove_entry(&auto_save_file_name(&record.auto_save_id), false)
                .await
            {
                Ok(()) => removed += 1,
                Err(e) => warn!(
                    adapter = "directory",
                    auto_save_id = %record.auto_save_id,
                    error = %e,
                    "Failed to remove auto-save"
                ),
            }
        }
        debug!(adapter = "directory", %project_id, removed, "Cleaned up auto-saves");
        Ok(removed)
    }

    async fn update_metadata(
        &self,
        project_id: Uuid,
        update: &MetadataUpdate,
    ) -> StorageResult<()> {
        let mut project = self.load_project(project_id).await?.project;
        update.apply_to(&mut project);
        self.save_project(&project, SaveOptions::without_backup()).await?;
        Ok(())
    }

    async fn save_thumbnail(&self, project_id: Uuid, image: &[u8]) -> StorageResult<()> {
        self.ensure_permission()?;
        let dir = self.writable_project_dir(project_id).await?;
        dir.write_file(THUMBNAIL_FILE, image)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))
    }

    async fn storage_info(&self) -> StorageResult<StorageInfo> {
        self.ensure_permission()?;
        let used = self
            .tree_size()
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::ReadError))?;
        Ok(StorageInfo {
            platform: Platform::Web,
            storage_type: StorageKind::Directory,
            total_bytes: None,
            used_bytes: Some(used),
            available_bytes: None,
            quota_exceeded: false,
        })
    }
}
