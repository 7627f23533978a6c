//! Layered load recovery shared by every adapter
//!
//! Tiers are tried in order: primary, backup, auto-saves from newest to
//! oldest, then a lenient decode of the primary bytes. Each tier may
//! succeed through schema migration.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StorageError;
use crate::project::ProjectDocument;
use crate::storage::adapter::{AutoSaveRecord, LoadOutcome, LoadSource, StorageKind, StorageResult};
use crate::storage::serialization::{self, DeserializeError, CURRENT_SCHEMA_VERSION};

/// Raw reads an adapter exposes to the recovery chain
///
/// Records come back as stored bytes; `Ok(None)` means the record does not
/// exist.
#[async_trait]
pub(crate) trait RecoverySource: Send + Sync {
    fn source_kind(&self) -> StorageKind;

    async fn read_primary(&self, project_id: Uuid) -> StorageResult<Option<Vec<u8>>>;

    async fn read_backup(&self, project_id: Uuid) -> StorageResult<Option<Vec<u8>>>;

    /// Auto-saves newest first
    async fn auto_save_records(&self, project_id: Uuid) -> StorageResult<Vec<AutoSaveRecord>>;

    async fn read_auto_save(&self, record: &AutoSaveRecord) -> StorageResult<Option<Vec<u8>>>;
}

/// Why a single tier could not produce a document
#[derive(Debug)]
pub(crate) enum TierFailure {
    /// Not UTF-8, unparseable or structurally invalid
    Corrupted(String),
    /// Older or unknown schema version that could not be upgraded
    Migration(String),
}

impl TierFailure {
    pub(crate) fn into_storage_error(self, subject: &str) -> StorageError {
        match self {
            Self::Corrupted(reason) => {
                StorageError::Corrupted(format!("{}: {}", subject, reason))
            }
            Self::Migration(reason) => StorageError::MigrationRequired(reason),
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<&str, TierFailure> {
    std::str::from_utf8(bytes).map_err(|e| TierFailure::Corrupted(format!("Invalid UTF-8: {}", e)))
}

/// Decode stored bytes, migrating older schema versions in memory
///
/// Returns the document and whether a migration was applied.
pub(crate) fn decode(bytes: &[u8]) -> Result<(ProjectDocument, bool), TierFailure> {
    match serialization::deserialize(utf8(bytes)?) {
        Ok(project) => Ok((project, false)),
        Err(DeserializeError::RequiresMigration { found_version, raw }) => {
            match serialization::migrate(raw, &found_version) {
                Ok(project) => Ok((project, true)),
                Err(e) => Err(TierFailure::Migration(e.to_string())),
            }
        }
        Err(e) => Err(TierFailure::Corrupted(e.to_string())),
    }
}

/// Last-resort decode of damaged primary bytes
fn decode_lenient(bytes: &[u8], now: DateTime<Utc>) -> Result<(ProjectDocument, bool), TierFailure> {
    let project = serialization::deserialize_lenient(utf8(bytes)?, now)
        .map_err(|e| TierFailure::Corrupted(e.to_string()))?;
    if project.schema_version == CURRENT_SCHEMA_VERSION {
        return Ok((project, false));
    }

    let found_version = project.schema_version.clone();
    let raw = serde_json::to_value(&project).map_err(|e| TierFailure::Corrupted(e.to_string()))?;
    serialization::migrate(raw, &found_version)
        .map(|project| (project, true))
        .map_err(|e| TierFailure::Migration(e.to_string()))
}

/// Load a project through every recovery tier
///
/// `now` fills timestamps the lenient tier cannot recover. When every tier
/// fails, a primary that only lacked a migration path reports
/// `MIGRATION_REQUIRED`; anything else is `CORRUPTED_FILE`.
pub(crate) async fn load_with_fallback<S>(
    source: &S,
    project_id: Uuid,
    now: DateTime<Utc>,
) -> StorageResult<LoadOutcome>
where
    S: RecoverySource + ?Sized,
{
    let adapter = source.source_kind();
    let primary = source
        .read_primary(project_id)
        .await?
        .ok_or_else(|| StorageError::NotFound(format!("Project {} not found", project_id)))?;

    let primary_failure = match decode(&primary) {
        Ok((project, migrated)) => {
            if migrated {
                info!(%adapter, %project_id, "Migrated project to current schema");
            }
            return Ok(LoadOutcome {
                project,
                source: LoadSource::Primary,
                migrated,
                lenient: false,
            });
        }
        Err(failure) => {
            warn!(%adapter, %project_id, ?failure, "Primary is unusable, trying backup");
            failure
        }
    };

    match source.read_backup(project_id).await {
        Ok(Some(bytes)) => match decode(&bytes) {
            Ok((project, migrated)) => {
                info!(%adapter, %project_id, "Recovered project from backup");
                return Ok(LoadOutcome {
                    project,
                    source: LoadSource::Backup,
                    migrated,
                    lenient: false,
                });
            }
            Err(failure) => debug!(%adapter, %project_id, ?failure, "Backup is unusable"),
        },
        Ok(None) => debug!(%adapter, %project_id, "No backup present"),
        Err(e) => warn!(%adapter, %project_id, error = %e, "Failed to read backup"),
    }

    let records = match source.auto_save_records(project_id).await {
        Ok(records) => records,
        Err(e) => {
            warn!(%adapter, %project_id, error = %e, "Failed to list auto-saves");
            Vec::new()
        }
    };
    for record in &records {
        let bytes = match source.read_auto_save(record).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => continue,
            Err(e) => {
                debug!(%adapter, auto_save_id = %record.auto_save_id, error = %e, "Failed to read auto-save");
                continue;
            }
        };
        match decode(&bytes) {
            Ok((project, migrated)) => {
                info!(
                    %adapter,
                    %project_id,
                    timestamp = %record.timestamp,
                    "Recovered project from auto-save"
                );
                return Ok(LoadOutcome {
                    project,
                    source: LoadSource::AutoSave,
                    migrated,
                    lenient: false,
                });
            }
            Err(failure) => {
                debug!(%adapter, auto_save_id = %record.auto_save_id, ?failure, "Auto-save is unusable")
            }
        }
    }

    match decode_lenient(&primary, now) {
        Ok((project, migrated)) => {
            warn!(%adapter, %project_id, "Recovered project with lenient parsing");
            Ok(LoadOutcome {
                project,
                source: LoadSource::Primary,
                migrated,
                lenient: true,
            })
        }
        Err(failure) => {
            warn!(%adapter, %project_id, ?failure, "All recovery tiers failed");
            match primary_failure {
                // A well-formed file from an unknown schema is not corruption
                TierFailure::Migration(reason) => Err(StorageError::MigrationRequired(reason)),
                TierFailure::Corrupted(_) => Err(StorageError::Corrupted(format!(
                    "Project {} is corrupted and could not be recovered",
                    project_id
                ))),
            }
        }
    }
}
