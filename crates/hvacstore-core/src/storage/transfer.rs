//! Bulk move of projects between two adapters
//!
//! Used to move everything out of the embedded database into a granted
//! directory. A project is removed from the source only after the destination
//! save succeeded.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::adapter::{SaveOptions, StorageAdapter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferError {
    pub project_id: Uuid,
    pub error: String,
}

/// Running state of a transfer, reported before and after each project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    pub total: usize,
    pub completed: usize,
    /// Name of the project being moved
    pub current: String,
    pub errors: Vec<TransferError>,
}

impl MigrationProgress {
    pub fn is_complete(&self) -> bool {
        self.completed + self.errors.len() == self.total
    }
}

/// Move every project listed by `source` into `destination`
///
/// Per-project failures are collected in the returned progress; only a
/// failure to list the source is fatal.
pub async fn migrate_projects<F>(
    source: &dyn StorageAdapter,
    destination: &dyn StorageAdapter,
    mut on_progress: F,
) -> crate::Result<MigrationProgress>
where
    F: FnMut(&MigrationProgress),
{
    let projects = source.list_projects().await?;
    let mut progress = MigrationProgress {
        total: projects.len(),
        ..Default::default()
    };

    info!(
        from = %source.kind(),
        to = %destination.kind(),
        total = progress.total,
        "Starting project transfer"
    );

    for metadata in projects {
        let project_id = metadata.project_id;
        progress.current = metadata.project_name.clone();
        on_progress(&progress);

        let moved = async {
            let loaded = source
                .load_project(project_id)
                .await
                .map_err(|e| format!("Failed to load from {}: {}", source.kind(), e))?;
            destination
                .save_project(&loaded.project, SaveOptions::default())
                .await
                .map_err(|e| format!("Failed to save to {}: {}", destination.kind(), e))?;
            source
                .delete_project(project_id)
                .await
                .map_err(|e| format!("Saved but failed to remove from {}: {}", source.kind(), e))
        }
        .await;

        match moved {
            Ok(()) => progress.completed += 1,
            Err(error) => {
                warn!(%project_id, %error, "Project transfer failed");
                progress.errors.push(TransferError { project_id, error });
            }
        }
        on_progress(&progress);
    }

    info!(
        completed = progress.completed,
        failed = progress.errors.len(),
        "Project transfer finished"
    );
    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SteppingClock;
    use crate::project::ProjectDocument;
    use crate::storage::database::Database;
    use crate::storage::database_adapter::DatabaseAdapter;
    use crate::storage::filesystem::FileSystemAdapter;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn adapter(temp: &TempDir, name: &str) -> FileSystemAdapter {
        FileSystemAdapter::new(
            temp.path().join(name),
            Arc::new(SteppingClock::starting_2024()),
        )
    }

    #[tokio::test]
    async fn test_progress_reported_before_and_after_each_project() {
        let temp = TempDir::new().unwrap();
        let source = adapter(&temp, "source");
        let destination = adapter(&temp, "destination");
        for name in ["Alpha", "Beta"] {
            source
                .save_project(&ProjectDocument::new(name, Utc::now()), SaveOptions::default())
                .await
                .unwrap();
        }

        let mut reports = Vec::new();
        let progress = migrate_projects(&source, &destination, |p| reports.push(p.clone()))
            .await
            .unwrap();

        assert_eq!(reports.len(), 4);
        assert_eq!(reports[0].completed, 0);
        assert_eq!(reports[1].completed, 1);
        assert_eq!(reports[3].completed, 2);
        assert_eq!(progress.total, 2);
        assert!(progress.errors.is_empty());
        assert!(progress.is_complete());
        assert!(source.list_projects().await.unwrap().is_empty());
        assert_eq!(destination.list_projects().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_load_keeps_source_and_records_error() {
        let temp = TempDir::new().unwrap();
        let db = Database::in_memory().await.unwrap();
        let source = DatabaseAdapter::new(db, Arc::new(SteppingClock::starting_2024()));
        let destination = adapter(&temp, "destination");
        let good = ProjectDocument::new("Good", Utc::now());
        let bad = ProjectDocument::new("Bad", Utc::now());
        source.save_project(&good, SaveOptions::default()).await.unwrap();
        source.save_project(&bad, SaveOptions::default()).await.unwrap();

        // Projection stays listable while the content is unusable
        sqlx::query("UPDATE projects SET content = '{ not json' WHERE project_id = ?")
            .bind(bad.project_id.to_string())
            .execute(source.database().pool())
            .await
            .unwrap();

        let progress = migrate_projects(&source, &destination, |_| {}).await.unwrap();

        assert_eq!(progress.total, 2);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.errors.len(), 1);
        assert_eq!(progress.errors[0].project_id, bad.project_id);
        assert!(progress.errors[0].error.contains("Failed to load"));
        assert_eq!(source.list_projects().await.unwrap().len(), 1);
        assert_eq!(destination.list_projects().await.unwrap().len(), 1);
    }
}
