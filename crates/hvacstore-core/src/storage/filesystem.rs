//! Direct filesystem adapter
//!
//! Layout under the root, one directory per project:
//!
//! ```text
//! <root>/<id>/<id>.hvac                   primary
//! <root>/<id>/<id>.hvac.bak               backup
//! <root>/<id>/.autosave/<timestamp>.hvac  auto-saves (sanitized timestamp)
//! <root>/<id>/.metadata/thumbnail.png
//! <root>/<id>/.metadata/metadata.json     written when requested
//! <root>/<id>/exports/
//! ```

use async_trait::async_trait;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
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
use crate::storage::fs::{FileSystem, TokioFileSystem};
use crate::storage::recovery::{self, RecoverySource};
use crate::storage::serialization;
use crate::storage::timestamp::{self, sanitize, unsanitize};

pub const PROJECT_EXTENSION: &str = "hvac";
const BACKUP_SUFFIX: &str = ".bak";
const TEMP_SUFFIX: &str = ".tmp";
const AUTOSAVE_DIR: &str = ".autosave";
const METADATA_DIR: &str = ".metadata";
const EXPORTS_DIR: &str = "exports";
const THUMBNAIL_FILE: &str = "thumbnail.png";
const METADATA_FILE: &str = "metadata.json";

/// Default project root: `<documents>/HvacStore/Projects`
pub fn default_projects_root() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("HvacStore")
        .join("Projects")
}

/// Adapter over a directly addressable filesystem
pub struct FileSystemAdapter<F = TokioFileSystem> {
    root: PathBuf,
    fs: F,
    clock: Arc<dyn Clock>,
    keep_count: usize,
}

impl FileSystemAdapter<TokioFileSystem> {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self::with_file_system(root, TokioFileSystem, clock)
    }
}

impl<F: FileSystem> FileSystemAdapter<F> {
    pub fn with_file_system(root: impl Into<PathBuf>, fs: F, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            fs,
            clock,
            keep_count: DEFAULT_AUTO_SAVE_KEEP,
        }
    }

    /// Number of auto-saves kept after each auto-save
    pub fn with_auto_save_keep(mut self, keep_count: usize) -> Self {
        self.keep_count = keep_count;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project_id: Uuid) -> PathBuf {
        self.root.join(project_id.to_string())
    }

    pub fn primary_path(&self, project_id: Uuid) -> PathBuf {
        self.project_dir(project_id)
            .join(format!("{}.{}", project_id, PROJECT_EXTENSION))
    }

    pub fn backup_path(&self, project_id: Uuid) -> PathBuf {
        with_suffix(&self.primary_path(project_id), BACKUP_SUFFIX)
    }

    pub fn auto_save_dir(&self, project_id: Uuid) -> PathBuf {
        self.project_dir(project_id).join(AUTOSAVE_DIR)
    }

    fn auto_save_path(&self, project_id: Uuid, timestamp: &str) -> PathBuf {
        self.auto_save_dir(project_id)
            .join(format!("{}.{}", sanitize(timestamp), PROJECT_EXTENSION))
    }

    pub fn metadata_dir(&self, project_id: Uuid) -> PathBuf {
        self.project_dir(project_id).join(METADATA_DIR)
    }

    pub fn thumbnail_path(&self, project_id: Uuid) -> PathBuf {
        self.metadata_dir(project_id).join(THUMBNAIL_FILE)
    }

    pub fn metadata_path(&self, project_id: Uuid) -> PathBuf {
        self.metadata_dir(project_id).join(METADATA_FILE)
    }

    pub fn exports_dir(&self, project_id: Uuid) -> PathBuf {
        self.project_dir(project_id).join(EXPORTS_DIR)
    }

    async fn ensure_project_dirs(&self, project_id: Uuid) -> io::Result<()> {
        self.fs.create_dir_all(&self.project_dir(project_id)).await?;
        self.fs.create_dir_all(&self.auto_save_dir(project_id)).await?;
        self.fs.create_dir_all(&self.metadata_dir(project_id)).await?;
        self.fs.create_dir_all(&self.exports_dir(project_id)).await
    }

    /// Write through `<target>.tmp` and rename over the target
    ///
    /// On failure the temp file is removed and the target is untouched.
    async fn atomic_write(&self, target: &Path, contents: &[u8]) -> io::Result<()> {
        let temp = with_suffix(target, TEMP_SUFFIX);
        let result = match self.fs.write(&temp, contents).await {
            Ok(()) => self.fs.rename(&temp, target).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            if let Err(e) = self.fs.remove_file(&temp).await {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path = %temp.display(), error = %e, "Failed to remove temp file");
                }
            }
        }
        result
    }

    /// Copy the current primary to the backup slot; failures are logged only
    async fn create_backup(&self, project_id: Uuid) {
        let primary = self.primary_path(project_id);
        match self.fs.exists(&primary).await {
            Ok(true) => {
                if let Err(e) = self.fs.copy(&primary, &self.backup_path(project_id)).await {
                    warn!(%project_id, error = %e, "Failed to create backup");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(%project_id, error = %e, "Failed to check for existing primary"),
        }
    }

    async fn read_optional(&self, path: &Path) -> StorageResult<Option<Vec<u8>>> {
        match self.fs.read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::from_io(&e, ErrorCode::ReadError)),
        }
    }

    async fn write_metadata(&self, project: &ProjectDocument) -> io::Result<()> {
        let metadata = ProjectMetadata::from(project);
        let json = serde_json::to_vec_pretty(&metadata)?;
        self.atomic_write(&self.metadata_path(project.project_id), &json)
            .await
    }

    async fn directory_size(&self, root: &Path) -> io::Result<u64> {
        let mut total = 0;
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let entries = match self.fs.read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                if entry.is_dir {
                    pending.push(dir.join(&entry.name));
                } else {
                    total += entry.len;
                }
            }
        }
        Ok(total)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[async_trait]
impl<F: FileSystem> RecoverySource for FileSystemAdapter<F> {
    fn source_kind(&self) -> StorageKind {
        StorageKind::Filesystem
    }

    async fn read_primary(&self, project_id: Uuid) -> StorageResult<Option<Vec<u8>>> {
        self.read_optional(&self.primary_path(project_id)).await
    }

    async fn read_backup(&self, project_id: Uuid) -> StorageResult<Option<Vec<u8>>> {
        self.read_optional(&self.backup_path(project_id)).await
    }

    async fn auto_save_records(&self, project_id: Uuid) -> StorageResult<Vec<AutoSaveRecord>> {
        self.list_auto_saves(project_id).await
    }

    async fn read_auto_save(&self, record: &AutoSaveRecord) -> StorageResult<Option<Vec<u8>>> {
        self.read_optional(&self.auto_save_path(record.project_id, &record.timestamp))
            .await
    }
}

#[async_trait]
impl<F: FileSystem> StorageAdapter for FileSystemAdapter<F> {
    fn kind(&self) -> StorageKind {
        StorageKind::Filesystem
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
            warn!(%project_id, error = %e, "Rejected invalid project");
            return Err(StorageError::Validation(e.to_string()));
        }

        let mut updated = project.clone();
        updated.modified_at = self.clock.now();
        let content = serialization::serialize(&updated)
            .map_err(|e| StorageError::Validation(e.to_string()))?;

        self.ensure_project_dirs(project_id)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?;

        if options.create_backup {
            self.create_backup(project_id).await;
        }

        let path = self.primary_path(project_id);
        let written = if options.atomic {
            self.atomic_write(&path, content.as_bytes()).await
        } else {
            self.fs.write(&path, content.as_bytes()).await
        };
        written.map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?;

        if options.update_metadata {
            if let Err(e) = self.write_metadata(&updated).await {
                warn!(%project_id, error = %e, "Failed to write metadata projection");
            }
        }

        info!(%project_id, path = %path.display(), bytes = content.len(), "Saved project");
        Ok(SaveOutcome {
            file_path: path.display().to_string(),
            size_bytes: content.len() as u64,
            modified_at: updated.modified_at,
        })
    }

    async fn load_project(&self, project_id: Uuid) -> StorageResult<LoadOutcome> {
        recovery::load_with_fallback(self, project_id, self.clock.now()).await
    }

    async fn delete_project(&self, project_id: Uuid) -> StorageResult<()> {
        let dir = self.project_dir(project_id);
        match self.fs.remove_dir_all(&dir).await {
            Ok(()) => {
                info!(%project_id, "Deleted project");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::from_io(&e, ErrorCode::DeleteError)),
        }
    }

    async fn list_projects(&self) -> StorageResult<Vec<ProjectMetadata>> {
        let entries = match self.fs.read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.fs
                    .create_dir_all(&self.root)
                    .await
                    .map_err(|e| StorageError::from_io(&e, ErrorCode::ReadError))?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(StorageError::from_io(&e, ErrorCode::ReadError)),
        };

        let mut projects = Vec::new();
        for entry in entries {
            if !entry.is_dir || entry.name.starts_with('.') {
                continue;
            }
            let Ok(project_id) = Uuid::parse_str(&entry.name) else {
                debug!(name = %entry.name, "Skipping non-project directory");
                continue;
            };

            let text = match self.read_primary(project_id).await {
                Ok(Some(text)) => text,
                Ok(None) => {
                    warn!(%project_id, "Skipping project without a primary file");
                    continue;
                }
                Err(e) => {
                    warn!(%project_id, error = %e, "Skipping unreadable project");
                    continue;
                }
            };
            match recovery::decode(&text) {
                Ok((project, _)) => projects.push(ProjectMetadata::from(&project)),
                Err(failure) => warn!(%project_id, ?failure, "Skipping undecodable project"),
            }
        }

        sort_by_modified_desc(&mut projects);
        Ok(projects)
    }

    async fn auto_save(&self, project: &ProjectDocument) -> StorageResult<AutoSaveOutcome> {
        let project_id = project.project_id;
        let content = serialization::serialize(project)
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        let timestamp = timestamp::now_iso(self.clock.as_ref());

        self.fs
            .create_dir_all(&self.auto_save_dir(project_id))
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?;
        self.fs
            .write(&self.auto_save_path(project_id, &timestamp), content.as_bytes())
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?;

        let record = AutoSaveRecord {
            project_id,
            auto_save_id: timestamp::auto_save_id(project_id, &timestamp),
            timestamp,
            size_bytes: content.len() as u64,
        };
        debug!(%project_id, auto_save_id = %record.auto_save_id, "Auto-saved project");

        if let Err(e) = self.cleanup_auto_saves(project_id, self.keep_count).await {
            warn!(%project_id, error = %e, "Auto-save cleanup failed");
        }
        Ok(AutoSaveOutcome { record })
    }

    async fn list_auto_saves(&self, project_id: Uuid) -> StorageResult<Vec<AutoSaveRecord>> {
        let entries = match self.fs.read_dir(&self.auto_save_dir(project_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::from_io(&e, ErrorCode::ReadError)),
        };

        let suffix = format!(".{}", PROJECT_EXTENSION);
        let mut records: Vec<AutoSaveRecord> = entries
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .filter_map(|entry| {
                let stem = entry.name.strip_suffix(&suffix)?;
                let timestamp = unsanitize(stem);
                Some(AutoSaveRecord {
                    project_id,
                    auto_save_id: timestamp::auto_save_id(project_id, &timestamp),
                    timestamp,
                    size_bytes: entry.len,
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
        let path = self.auto_save_path(project_id, timestamp);
        let text = self.read_optional(&path).await?.ok_or_else(|| {
            StorageError::NotFound(format!(
                "Auto-save {} not found",
                timestamp::auto_save_id(project_id, timestamp)
            ))
        })?;
        let (project, migrated) =
            recovery::decode(&text).map_err(|f| f.into_storage_error(&path.display().to_string()))?;

        self.ensure_project_dirs(project_id)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?;
        self.create_backup(project_id).await;

        let content = if migrated {
            serialization::serialize(&project)
                .map_err(|e| StorageError::Write(e.to_string()))?
                .into_bytes()
        } else {
            text
        };
        self.atomic_write(&self.primary_path(project_id), &content)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?;

        info!(%project_id, %timestamp, "Restored project from auto-save");
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
        let mut removed = 0;
        for record in records.iter().skip(keep_count) {
            let path = self.auto_save_path(project_id, &record.timestamp);
            match self.fs.remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(%project_id, path = %path.display(), error = %e, "Failed to remove auto-save"),
            }
        }
        if removed > 0 {
            debug!(%project_id, removed, "Cleaned up auto-saves");
        }
        Ok(removed)
    }

    async fn update_metadata(
        &self,
        project_id: Uuid,
        update: &MetadataUpdate,
    ) -> StorageResult<()> {
        let mut project = self.load_project(project_id).await?.project;
        update.apply_to(&mut project);
        let metadata_exists = self
            .fs
            .exists(&self.metadata_path(project_id))
            .await
            .unwrap_or(false);
        let options = SaveOptions {
            update_metadata: metadata_exists,
            ..SaveOptions::without_backup()
        };
        self.save_project(&project, options).await?;
        Ok(())
    }

    async fn save_thumbnail(&self, project_id: Uuid, image: &[u8]) -> StorageResult<()> {
        self.fs
            .create_dir_all(&self.metadata_dir(project_id))
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))?;
        self.fs
            .write(&self.thumbnail_path(project_id), image)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::WriteError))
    }

    async fn storage_info(&self) -> StorageResult<StorageInfo> {
        let used = self
            .directory_size(&self.root)
            .await
            .map_err(|e| StorageError::from_io(&e, ErrorCode::ReadError))?;
        Ok(StorageInfo {
            platform: Platform::Desktop,
            storage_type: StorageKind::Filesystem,
            total_bytes: None,
            used_bytes: Some(used),
            available_bytes: None,
            quota_exceeded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteppingClock;
    use crate::storage::fs::DirEntryInfo;
    use crate::storage::serialization::serialize;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn adapter(temp: &TempDir) -> FileSystemAdapter {
        FileSystemAdapter::new(temp.path(), Arc::new(SteppingClock::starting_2024()))
    }

    fn project(name: &str) -> ProjectDocument {
        let mut project = ProjectDocument::new(name, Utc::now());
        project.entities.insert("room-1", json!({"type": "room", "area": 240}));
        project
    }

    /// Delegates to tokio but fails renames while `fail_rename` is set
    #[derive(Default)]
    struct FlakyFileSystem {
        inner: TokioFileSystem,
        fail_rename: AtomicBool,
    }

    #[async_trait]
    impl FileSystem for FlakyFileSystem {
        async fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            self.inner.read(path).await
        }
        async fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            self.inner.write(path, contents).await
        }
        async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            if self.fail_rename.load(Ordering::SeqCst) {
                return Err(io::Error::other("injected rename failure"));
            }
            self.inner.rename(from, to).await
        }
        async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
            self.inner.copy(from, to).await
        }
        async fn remove_file(&self, path: &Path) -> io::Result<()> {
            self.inner.remove_file(path).await
        }
        async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
            self.inner.remove_dir_all(path).await
        }
        async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
            self.inner.create_dir_all(path).await
        }
        async fn exists(&self, path: &Path) -> io::Result<bool> {
            self.inner.exists(path).await
        }
        async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntryInfo>> {
            self.inner.read_dir(path).await
        }
    }

    #[tokio::test]
    async fn test_save_creates_layout() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let doc = project("Layout");

        let outcome = adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let id = doc.project_id;
        assert!(adapter.primary_path(id).exists());
        assert!(adapter.auto_save_dir(id).is_dir());
        assert!(adapter.metadata_dir(id).is_dir());
        assert!(adapter.exports_dir(id).is_dir());
        assert!(!adapter.backup_path(id).exists());
        assert!(!adapter.metadata_path(id).exists());
        assert_eq!(
            outcome.size_bytes,
            std::fs::metadata(adapter.primary_path(id)).unwrap().len()
        );
        assert_eq!(outcome.file_path, adapter.primary_path(id).display().to_string());
    }

    #[tokio::test]
    async fn test_save_refreshes_modified_at() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let doc = project("Clocked");

        let outcome = adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        let loaded = adapter.load_project(doc.project_id).await.unwrap();

        assert_eq!(outcome.modified_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(loaded.project.modified_at, outcome.modified_at);
        assert_eq!(loaded.project.created_at, doc.created_at);
    }

    #[tokio::test]
    async fn test_second_save_writes_backup_of_first() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let mut doc = project("Version One");

        adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        let first_bytes = std::fs::read(adapter.primary_path(doc.project_id)).unwrap();

        doc.project_name = "Version Two".to_string();
        adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let backup_bytes = std::fs::read(adapter.backup_path(doc.project_id)).unwrap();
        assert_eq!(backup_bytes, first_bytes);
    }

    #[tokio::test]
    async fn test_invalid_project_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let mut doc = project("Invalid");
        doc.viewport_state.zoom = 42.0;

        let err = adapter.save_project(&doc, SaveOptions::default()).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(!adapter.project_dir(doc.project_id).exists());
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_primary_untouched() {
        let temp = TempDir::new().unwrap();
        let fs = FlakyFileSystem::default();
        let adapter = FileSystemAdapter::with_file_system(
            temp.path(),
            fs,
            Arc::new(SteppingClock::starting_2024()),
        );
        let mut doc = project("Atomic");
        adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        let before = std::fs::read(adapter.primary_path(doc.project_id)).unwrap();

        adapter.fs.fail_rename.store(true, Ordering::SeqCst);
        doc.project_name = "Never Written".to_string();
        let err = adapter
            .save_project(&doc, SaveOptions::without_backup())
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::WriteError);
        let after = std::fs::read(adapter.primary_path(doc.project_id)).unwrap();
        assert_eq!(before, after);
        assert!(!with_suffix(&adapter.primary_path(doc.project_id), TEMP_SUFFIX).exists());
    }

    #[tokio::test]
    async fn test_non_atomic_save_writes_directly() {
        let temp = TempDir::new().unwrap();
        let fs = FlakyFileSystem::default();
        fs.fail_rename.store(true, Ordering::SeqCst);
        let adapter = FileSystemAdapter::with_file_system(
            temp.path(),
            fs,
            Arc::new(SteppingClock::starting_2024()),
        );
        let doc = project("Direct");
        let options = SaveOptions {
            atomic: false,
            ..SaveOptions::default()
        };

        adapter.save_project(&doc, options).await.unwrap();
        assert!(adapter.primary_path(doc.project_id).exists());
    }

    #[tokio::test]
    async fn test_update_metadata_option_writes_projection() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let doc = project("With Metadata");
        let options = SaveOptions {
            update_metadata: true,
            ..SaveOptions::default()
        };

        adapter.save_project(&doc, options).await.unwrap();

        let text = std::fs::read_to_string(adapter.metadata_path(doc.project_id)).unwrap();
        let metadata: ProjectMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(metadata.project_name, "With Metadata");
        assert!(!text.contains("\"entities\""));
    }

    #[tokio::test]
    async fn test_list_skips_dot_dirs_and_broken_projects() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let first = project("First");
        let second = project("Second");
        adapter.save_project(&first, SaveOptions::default()).await.unwrap();
        adapter.save_project(&second, SaveOptions::default()).await.unwrap();

        std::fs::create_dir_all(temp.path().join(".trash")).unwrap();
        std::fs::create_dir_all(temp.path().join("not-a-project")).unwrap();
        let broken = Uuid::new_v4();
        std::fs::create_dir_all(temp.path().join(broken.to_string())).unwrap();
        std::fs::write(
            temp.path().join(broken.to_string()).join(format!("{}.hvac", broken)),
            "{oops",
        )
        .unwrap();

        let listed = adapter.list_projects().await.unwrap();
        let names: Vec<&str> = listed.iter().map(|m| m.project_name.as_str()).collect();
        assert_eq!(names, vec!["Second", "First"]);
    }

    #[tokio::test]
    async fn test_list_creates_missing_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("nested/root");
        let adapter = FileSystemAdapter::new(&root, Arc::new(SteppingClock::starting_2024()));

        assert!(adapter.list_projects().await.unwrap().is_empty());
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_list_migrates_legacy_in_memory() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let id = Uuid::new_v4();
        let legacy = json!({
            "schemaVersion": "0.9.0",
            "projectId": id.to_string(),
            "name": "Legacy Listing",
            "createdAt": "2023-01-01T00:00:00.000Z",
            "modifiedAt": "2023-01-01T00:00:00.000Z",
            "entities": []
        });
        std::fs::create_dir_all(adapter.project_dir(id)).unwrap();
        std::fs::write(adapter.primary_path(id), legacy.to_string()).unwrap();

        let listed = adapter.list_projects().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].project_name, "Legacy Listing");
        assert_eq!(listed[0].schema_version, "1.0.0");

        let on_disk = std::fs::read_to_string(adapter.primary_path(id)).unwrap();
        assert!(on_disk.contains("\"0.9.0\""));
    }

    #[tokio::test]
    async fn test_auto_save_file_naming_and_listing() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let doc = project("Auto");

        let outcome = adapter.auto_save(&doc).await.unwrap();

        assert_eq!(outcome.record.timestamp, "2024-01-01T00:00:00.000Z");
        let file = adapter
            .auto_save_dir(doc.project_id)
            .join("2024-01-01T00-00-00.000Z.hvac");
        assert!(file.exists());
        assert!(!adapter.primary_path(doc.project_id).exists());

        let listed = adapter.list_auto_saves(doc.project_id).await.unwrap();
        assert_eq!(listed, vec![outcome.record]);
    }

    #[tokio::test]
    async fn test_auto_save_retention_keeps_newest() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp).with_auto_save_keep(3);
        let doc = project("Retention");

        for _ in 0..5 {
            adapter.auto_save(&doc).await.unwrap();
        }

        let listed = adapter.list_auto_saves(doc.project_id).await.unwrap();
        let stamps: Vec<&str> = listed.iter().map(|r| r.timestamp.as_str()).collect();
        assert_eq!(
            stamps,
            vec![
                "2024-01-01T00:00:04.000Z",
                "2024-01-01T00:00:03.000Z",
                "2024-01-01T00:00:02.000Z",
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_keep_zero_removes_all() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp).with_auto_save_keep(10);
        let doc = project("Cleanup");
        for _ in 0..3 {
            adapter.auto_save(&doc).await.unwrap();
        }

        let removed = adapter.cleanup_auto_saves(doc.project_id, 0).await.unwrap();

        assert_eq!(removed, 3);
        assert!(adapter.list_auto_saves(doc.project_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_auto_save_backs_up_and_promotes() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let mut doc = project("Draft");
        let auto = adapter.auto_save(&doc).await.unwrap();

        doc.project_name = "Saved Later".to_string();
        adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        let saved_bytes = std::fs::read(adapter.primary_path(doc.project_id)).unwrap();

        let restored = adapter
            .restore_auto_save(doc.project_id, &auto.record.timestamp)
            .await
            .unwrap();

        assert_eq!(restored.source, LoadSource::AutoSave);
        assert_eq!(restored.project.project_name, "Draft");
        assert_eq!(
            std::fs::read(adapter.backup_path(doc.project_id)).unwrap(),
            saved_bytes
        );
        let loaded = adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.project.project_name, "Draft");
    }

    #[tokio::test]
    async fn test_restore_missing_auto_save() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let err = adapter
            .restore_auto_save(Uuid::new_v4(), "2024-01-01T00:00:00.000Z")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound);
    }

    #[tokio::test]
    async fn test_restore_corrupt_auto_save() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let id = Uuid::new_v4();
        std::fs::create_dir_all(adapter.auto_save_dir(id)).unwrap();
        std::fs::write(
            adapter.auto_save_dir(id).join("2024-01-01T00-00-00.000Z.hvac"),
            "corrupt",
        )
        .unwrap();

        let err = adapter
            .restore_auto_save(id, "2024-01-01T00:00:00.000Z")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptedFile);
    }

    #[tokio::test]
    async fn test_load_recovers_from_backup() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let doc = project("Recoverable");
        adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        std::fs::write(adapter.primary_path(doc.project_id), "\u{0}\u{1}garbage").unwrap();

        let loaded = adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.source, LoadSource::Backup);
        assert_eq!(loaded.project.entities, doc.entities);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let doc = project("Doomed");
        adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        adapter.delete_project(doc.project_id).await.unwrap();
        assert!(!adapter.project_dir(doc.project_id).exists());
        adapter.delete_project(doc.project_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_metadata_without_backup() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let doc = project("Before");
        adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let update = MetadataUpdate {
            project_name: Some("After".to_string()),
            client_name: Some("Acme Mechanical".to_string()),
            ..Default::default()
        };
        adapter.update_metadata(doc.project_id, &update).await.unwrap();

        let loaded = adapter.load_project(doc.project_id).await.unwrap().project;
        assert_eq!(loaded.project_name, "After");
        assert_eq!(loaded.client_name.as_deref(), Some("Acme Mechanical"));
        assert!(!adapter.backup_path(doc.project_id).exists());
    }

    #[tokio::test]
    async fn test_thumbnail_and_storage_info() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let doc = project("Thumb");
        adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

        adapter.save_thumbnail(doc.project_id, &png).await.unwrap();

        assert_eq!(std::fs::read(adapter.thumbnail_path(doc.project_id)).unwrap(), png);
        let info = adapter.storage_info().await.unwrap();
        let primary_len = std::fs::metadata(adapter.primary_path(doc.project_id)).unwrap().len();
        assert_eq!(info.used_bytes, Some(primary_len + png.len() as u64));
        assert_eq!(info.platform, Platform::Desktop);
        assert_eq!(info.storage_type, StorageKind::Filesystem);
        assert!(!info.quota_exceeded);
    }

    #[tokio::test]
    async fn test_primary_with_serialized_helper_matches_save() {
        let temp = TempDir::new().unwrap();
        let adapter = adapter(&temp);
        let doc = project("Bytes");
        adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let loaded = adapter.load_project(doc.project_id).await.unwrap().project;
        let on_disk = std::fs::read_to_string(adapter.primary_path(doc.project_id)).unwrap();
        assert_eq!(on_disk, serialize(&loaded).unwrap());
    }
}
