//! Embedded database adapter
//!
//! Stores every record in SQLite tables created by [`super::migrations`]:
//! `projects`, `backups`, `auto_saves` and `thumbnails`. Writes that touch
//! more than one row run inside a single transaction.

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::DEFAULT_AUTO_SAVE_KEEP;
use crate::error::{Error, ErrorCode, Result, StorageError};
use crate::project::metadata::sort_by_modified_desc;
use crate::project::{MetadataUpdate, ProjectDocument, ProjectMetadata};
use crate::storage::adapter::{
    AutoSaveOutcome, AutoSaveRecord, LoadOutcome, LoadSource, Platform, SaveOptions, SaveOutcome,
    StorageAdapter, StorageInfo, StorageKind, StorageResult,
};
use crate::storage::database::{Database, DatabaseConfig};
use crate::storage::recovery::{self, RecoverySource};
use crate::storage::serialization;
use crate::storage::timestamp::{self, format_iso};

fn read_err(e: sqlx::Error) -> StorageError {
    StorageError::from_sqlx(&e, ErrorCode::ReadError)
}

fn write_err(e: sqlx::Error) -> StorageError {
    StorageError::from_sqlx(&e, ErrorCode::WriteError)
}

/// Adapter over the embedded SQLite store
pub struct DatabaseAdapter {
    db: Database,
    clock: Arc<dyn Clock>,
    keep_count: usize,
}

impl DatabaseAdapter {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            keep_count: DEFAULT_AUTO_SAVE_KEEP,
        }
    }

    /// Open (and migrate) the database described by `config`
    pub async fn open(config: DatabaseConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Database::new(config)
            .await
            .map_err(|e| Error::Other(format!("{:#}", e)))?;
        Ok(Self::new(db, clock))
    }

    pub fn with_auto_save_keep(mut self, keep_count: usize) -> Self {
        self.keep_count = keep_count;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    /// Copy the current primary row to the backup slot
    async fn backup_in_tx(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        project_id: &str,
    ) -> std::result::Result<(), sqlx::Error> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT content FROM projects WHERE project_id = ?")
                .bind(project_id)
                .fetch_optional(&mut **tx)
                .await?;
        if let Some((content,)) = existing {
            sqlx::query(
                r#"
                INSERT INTO backups (project_id, content, timestamp)
                VALUES (?, ?, ?)
                ON CONFLICT(project_id) DO UPDATE SET
                    content = excluded.content,
                    timestamp = excluded.timestamp
                "#,
            )
            .bind(project_id)
            .bind(content)
            .bind(timestamp::now_iso(self.clock.as_ref()))
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Upsert the primary row together with its metadata projection
    async fn write_primary_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        project: &ProjectDocument,
        content: &str,
    ) -> StorageResult<()> {
        let metadata = serde_json::to_string(&ProjectMetadata::from(project))
            .map_err(|e| StorageError::Write(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO projects (project_id, content, metadata, modified_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id) DO UPDATE SET
                content = excluded.content,
                metadata = excluded.metadata,
                modified_at = excluded.modified_at
            "#,
        )
        .bind(project.project_id.to_string())
        .bind(content)
        .bind(metadata)
        .bind(format_iso(project.modified_at))
        .execute(&mut **tx)
        .await
        .map_err(write_err)?;
        Ok(())
    }

    /// Stored content as raw bytes; decoding happens in the recovery chain
    async fn fetch_bytes(&self, sql: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(sql)
            .bind(key)
            .fetch_optional(self.pool())
            .await
            .map_err(read_err)?;
        Ok(row.map(|(content,)| content))
    }
}

#[async_trait]
impl RecoverySource for DatabaseAdapter {
    fn source_kind(&self) -> StorageKind {
        StorageKind::Database
    }

    async fn read_primary(&self, project_id: Uuid) -> StorageResult<Option<Vec<u8>>> {
        self.fetch_bytes(
            "SELECT content FROM projects WHERE project_id = ?",
            &project_id.to_string(),
        )
        .await
    }

    async fn read_backup(&self, project_id: Uuid) -> StorageResult<Option<Vec<u8>>> {
        self.fetch_bytes(
            "SELECT content FROM backups WHERE project_id = ?",
            &project_id.to_string(),
        )
        .await
    }

    async fn auto_save_records(&self, project_id: Uuid) -> StorageResult<Vec<AutoSaveRecord>> {
        self.list_auto_saves(project_id).await
    }

    async fn read_auto_save(&self, record: &AutoSaveRecord) -> StorageResult<Option<Vec<u8>>> {
        self.fetch_bytes(
            "SELECT content FROM auto_saves WHERE auto_save_id = ?",
            &record.auto_save_id,
        )
        .await
    }
}

#[async_trait]
impl StorageAdapter for DatabaseAdapter {
    fn kind(&self) -> StorageKind {
        StorageKind::Database
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
            warn!(adapter = "database", %project_id, error = %e, "Rejected invalid project");
            return Err(StorageError::Validation(e.to_string()));
        }

        let mut updated = project.clone();
        updated.modified_at = self.clock.now();
        let content = serialization::serialize(&updated)
            .map_err(|e| StorageError::Validation(e.to_string()))?;
        let key = project_id.to_string();

        let mut tx = self.pool().begin().await.map_err(write_err)?;
        if options.create_backup {
            self.backup_in_tx(&mut tx, &key).await.map_err(write_err)?;
        }
        Self::write_primary_in_tx(&mut tx, &updated, &content).await?;
        tx.commit().await.map_err(write_err)?;

        info!(adapter = "database", %project_id, bytes = content.len(), "Saved project");
        Ok(SaveOutcome {
            file_path: format!("projects/{}", key),
            size_bytes: content.len() as u64,
            modified_at: updated.modified_at,
        })
    }

    async fn load_project(&self, project_id: Uuid) -> StorageResult<LoadOutcome> {
        recovery::load_with_fallback(self, project_id, self.clock.now()).await
    }

    async fn delete_project(&self, project_id: Uuid) -> StorageResult<()> {
        let key = project_id.to_string();
        let delete_err = |e: sqlx::Error| StorageError::from_sqlx(&e, ErrorCode::DeleteError);

        let mut tx = self.pool().begin().await.map_err(delete_err)?;
        for sql in [
            "DELETE FROM projects WHERE project_id = ?",
            "DELETE FROM backups WHERE project_id = ?",
            "DELETE FROM auto_saves WHERE project_id = ?",
            "DELETE FROM thumbnails WHERE project_id = ?",
        ] {
            sqlx::query(sql)
                .bind(&key)
                .execute(&mut *tx)
                .await
                .map_err(delete_err)?;
        }
        tx.commit().await.map_err(delete_err)?;

        info!(adapter = "database", %project_id, "Deleted project");
        Ok(())
    }

    async fn list_projects(&self) -> StorageResult<Vec<ProjectMetadata>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT project_id, metadata FROM projects ORDER BY modified_at DESC",
        )
        .fetch_all(self.pool())
        .await
        .map_err(read_err)?;

        let mut projects = Vec::with_capacity(rows.len());
        for (key, metadata_json) in rows {
            let Ok(project_id) = Uuid::parse_str(&key) else {
                warn!(adapter = "database", project_id = %key, "Skipping row with invalid id");
                continue;
            };
            let projection = serde_json::from_str::<ProjectMetadata>(&metadata_json)
                .ok()
                .filter(|m| m.project_id == project_id && m.validate().is_ok());
            if let Some(metadata) = projection {
                projects.push(metadata);
                continue;
            }
            match self.load_project(project_id).await {
                Ok(loaded) => projects.push(ProjectMetadata::from(&loaded.project)),
                Err(e) => warn!(adapter = "database", %project_id, error = %e, "Skipping project"),
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
        let auto_save_id = timestamp::auto_save_id(project_id, &timestamp);

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO auto_saves (auto_save_id, project_id, timestamp, content)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&auto_save_id)
        .bind(project_id.to_string())
        .bind(&timestamp)
        .bind(&content)
        .execute(self.pool())
        .await
        .map_err(write_err)?;

        let record = AutoSaveRecord {
            project_id,
            timestamp,
            auto_save_id,
            size_bytes: content.len() as u64,
        };
        debug!(adapter = "database", %project_id, auto_save_id = %record.auto_save_id, "Auto-saved project");

        if let Err(e) = self.cleanup_auto_saves(project_id, self.keep_count).await {
            warn!(adapter = "database", %project_id, error = %e, "Auto-save cleanup failed");
        }
        Ok(AutoSaveOutcome { record })
    }

    async fn list_auto_saves(&self, project_id: Uuid) -> StorageResult<Vec<AutoSaveRecord>> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT auto_save_id, timestamp, length(CAST(content AS BLOB))
            FROM auto_saves
            WHERE project_id = ?
            "#,
        )
        .bind(project_id.to_string())
        .fetch_all(self.pool())
        .await
        .map_err(read_err)?;

        let mut records: Vec<AutoSaveRecord> = rows
            .into_iter()
            .map(|(auto_save_id, timestamp, size)| AutoSaveRecord {
                project_id,
                timestamp,
                auto_save_id,
                size_bytes: u64::try_from(size).unwrap_or(0),
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
        let auto_save_id = timestamp::auto_save_id(project_id, timestamp);
        let bytes = self
            .fetch_bytes(
                "SELECT content FROM auto_saves WHERE auto_save_id = ?",
                &auto_save_id,
            )
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("Auto-save {} not found", auto_save_id)))?;
        let (project, migrated) =
            recovery::decode(&bytes).map_err(|f| f.into_storage_error(&auto_save_id))?;
        let content = if migrated {
            serialization::serialize(&project).map_err(|e| StorageError::Write(e.to_string()))?
        } else {
            String::from_utf8(bytes).map_err(|e| StorageError::Corrupted(e.to_string()))?
        };

        let mut tx = self.pool().begin().await.map_err(write_err)?;
        self.backup_in_tx(&mut tx, &project_id.to_string())
            .await
            .map_err(write_err)?;
        Self::write_primary_in_tx(&mut tx, &project, &content).await?;
        tx.commit().await.map_err(write_err)?;

        info!(adapter = "database", %project_id, %timestamp, "Restored project from auto-save");
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
            let result = sqlx::query("DELETE FROM auto_saves WHERE auto_save_id = ?")
                .bind(&record.auto_save_id)
                .execute(self.pool())
                .await;
            match result {
                Ok(_) => removed += 1,
                Err(e) => warn!(
                    adapter = "database",
                    auto_save_id = %record.auto_save_id,
                    error = %e,
                    "Failed to remove auto-save"
                ),
            }
        }
        if removed > 0 {
            debug!(adapter = "database", %project_id, removed, "Cleaned up auto-saves");
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
        project.modified_at = self.clock.now();
        let content = serialization::serialize(&project)
            .map_err(|e| StorageError::Validation(e.to_string()))?;

        let mut tx = self.pool().begin().await.map_err(write_err)?;
        Self::write_primary_in_tx(&mut tx, &project, &content).await?;
        tx.commit().await.map_err(write_err)?;

        debug!(adapter = "database", %project_id, "Updated project metadata");
        Ok(())
    }

    async fn save_thumbnail(&self, project_id: Uuid, image: &[u8]) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO thumbnails (project_id, data, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(project_id) DO UPDATE SET
                data = excluded.data,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id.to_string())
        .bind(image)
        .execute(self.pool())
        .await
        .map_err(write_err)?;
        Ok(())
    }

    async fn storage_info(&self) -> StorageResult<StorageInfo> {
        let (page_count,): (i64,) = sqlx::query_as("PRAGMA page_count")
            .fetch_one(self.pool())
            .await
            .map_err(read_err)?;
        let (page_size,): (i64,) = sqlx::query_as("PRAGMA page_size")
            .fetch_one(self.pool())
            .await
            .map_err(read_err)?;
        let used = u64::try_from(page_count.saturating_mul(page_size)).unwrap_or(0);

        Ok(StorageInfo {
            platform: Platform::Web,
            storage_type: StorageKind::Database,
            total_bytes: None,
            used_bytes: Some(used),
            available_bytes: None,
            quota_exceeded: false,
        })
    }
}
