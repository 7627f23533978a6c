//! Storage adapter contract tests
//!
//! Every scenario runs against the filesystem, directory-handle and database
//! adapters and must behave identically.

use chrono::Utc;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use hvacstore_core::clock::SteppingClock;
use hvacstore_core::error::ErrorCode;
use hvacstore_core::project::{MetadataUpdate, ProjectDocument};
use hvacstore_core::storage::timestamp::sanitize;
use hvacstore_core::storage::{
    AutoSaveRecord, Database, DatabaseAdapter, DirectoryAdapter, FileSystemAdapter, LoadSource,
    PermissionGrant, SaveOptions, ScopedDirectory, StorageAdapter, StorageKind, migrate_projects,
};

const KEEP: usize = 3;
const GARBAGE: &str = "{ \"schemaVersion\": \"1.0.0\", truncated";

#[derive(Debug, Clone, Copy)]
enum Backend {
    Filesystem,
    Directory,
    Database,
}

const BACKENDS: [Backend; 3] = [Backend::Filesystem, Backend::Directory, Backend::Database];

/// Where a raw record lives, so tests can damage it behind the adapter
enum Substrate {
    Files { root: PathBuf },
    Handle { root: PathBuf, grant: Arc<PermissionGrant> },
    Sql(Database),
}

enum Record<'a> {
    Primary,
    Backup,
    AutoSave(&'a AutoSaveRecord),
}

struct Harness {
    backend: Backend,
    adapter: Box<dyn StorageAdapter>,
    substrate: Substrate,
    _temp: TempDir,
}

impl Harness {
    async fn new(backend: Backend) -> Self {
        let temp = TempDir::new().unwrap();
        let clock = Arc::new(SteppingClock::starting_2024());
        let (adapter, substrate): (Box<dyn StorageAdapter>, Substrate) = match backend {
            Backend::Filesystem => {
                let root = temp.path().join("projects");
                let adapter = FileSystemAdapter::new(&root, clock).with_auto_save_keep(KEEP);
                (Box::new(adapter), Substrate::Files { root })
            }
            Backend::Directory => {
                let root = temp.path().to_path_buf();
                let grant = PermissionGrant::granted();
                let handle = ScopedDirectory::open(&root, Arc::clone(&grant)).await.unwrap();
                let adapter = DirectoryAdapter::new(Arc::new(handle), clock).with_auto_save_keep(KEEP);
                (Box::new(adapter), Substrate::Handle { root, grant })
            }
            Backend::Database => {
                let db = Database::in_memory().await.unwrap();
                let adapter = DatabaseAdapter::new(db.clone(), clock).with_auto_save_keep(KEEP);
                (Box::new(adapter), Substrate::Sql(db))
            }
        };
        Self {
            backend,
            adapter,
            substrate,
            _temp: temp,
        }
    }

    /// Replace a stored record's raw text
    async fn overwrite(&self, project_id: Uuid, record: Record<'_>, text: &str) {
        self.overwrite_bytes(project_id, record, text.as_bytes()).await;
    }

    /// Replace a stored record with arbitrary bytes
    async fn overwrite_bytes(&self, project_id: Uuid, record: Record<'_>, bytes: &[u8]) {
        let id = project_id.to_string();
        match &self.substrate {
            Substrate::Files { root } => {
                let dir = root.join(&id);
                let path = match record {
                    Record::Primary => dir.join(format!("{}.hvac", id)),
                    Record::Backup => dir.join(format!("{}.hvac.bak", id)),
                    Record::AutoSave(r) => dir
                        .join(".autosave")
                        .join(format!("{}.hvac", sanitize(&r.timestamp))),
                };
                assert!(path.exists(), "{} missing", path.display());
                std::fs::write(path, bytes).unwrap();
            }
            Substrate::Handle { root, .. } => {
                let dir = root.join(&id);
                let path = match record {
                    Record::Primary => dir.join(format!("{}.hvac", id)),
                    Record::Backup => dir.join(format!("{}.hvac.backup", id)),
                    Record::AutoSave(r) => dir
                        .join(".autosaves")
                        .join(format!("{}.hvac", r.auto_save_id)),
                };
                assert!(path.exists(), "{} missing", path.display());
                std::fs::write(path, bytes).unwrap();
            }
            Substrate::Sql(db) => {
                let (sql, key) = match record {
                    Record::Primary => ("UPDATE projects SET content = ? WHERE project_id = ?", id),
                    Record::Backup => ("UPDATE backups SET content = ? WHERE project_id = ?", id),
                    Record::AutoSave(r) => (
                        "UPDATE auto_saves SET content = ? WHERE auto_save_id = ?",
                        r.auto_save_id.clone(),
                    ),
                };
                let query = match std::str::from_utf8(bytes) {
                    Ok(text) => sqlx::query(sql).bind(text.to_string()),
                    Err(_) => sqlx::query(sql).bind(bytes.to_vec()),
                };
                let result = query.bind(key).execute(db.pool()).await.unwrap();
                assert_eq!(result.rows_affected(), 1);
            }
        }
    }
}

fn project(name: &str) -> ProjectDocument {
    let mut project = ProjectDocument::new(name, Utc::now());
    project.client_name = Some("Acme Mechanical".to_string());
    for (id, kind) in [("room-2", "room"), ("duct-1", "duct"), ("ahu-1", "equipment")] {
        project.entities.insert(id, json!({"id": id, "type": kind}));
    }
    project
}

#[tokio::test]
async fn test_save_load_round_trip() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let doc = project("Round Trip");

        let saved = h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();

        assert_eq!(loaded.source, LoadSource::Primary, "{:?}", backend);
        assert!(!loaded.migrated && !loaded.lenient, "{:?}", backend);
        assert_eq!(loaded.project.modified_at, saved.modified_at, "{:?}", backend);
        assert_eq!(loaded.project.entities, doc.entities, "{:?}", backend);
        let order: Vec<&str> = loaded.project.entities.all_ids.iter().map(String::as_str).collect();
        assert_eq!(order, ["room-2", "duct-1", "ahu-1"], "{:?}", backend);
        assert_eq!(h.adapter.kind(), match backend {
            Backend::Filesystem => StorageKind::Filesystem,
            Backend::Directory => StorageKind::Directory,
            Backend::Database => StorageKind::Database,
        });
    }
}

#[tokio::test]
async fn test_invalid_project_is_not_written() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let mut doc = project("Valid");
        doc.project_name = String::new();

        let err = h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError, "{:?}", backend);

        let err = h.adapter.load_project(doc.project_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound, "{:?}", backend);
        assert!(h.adapter.list_projects().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_backup_holds_previous_version() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let mut doc = project("First Draft");
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        doc.project_name = "Second Draft".to_string();
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        h.overwrite(doc.project_id, Record::Primary, GARBAGE).await;
        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();

        assert_eq!(loaded.source, LoadSource::Backup, "{:?}", backend);
        assert_eq!(loaded.project.project_name, "First Draft", "{:?}", backend);
    }
}

#[tokio::test]
async fn test_falls_back_to_newest_valid_auto_save() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let mut doc = project("Saved");
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        doc.project_name = "Auto One".to_string();
        h.adapter.auto_save(&doc).await.unwrap();
        doc.project_name = "Auto Two".to_string();
        let newest = h.adapter.auto_save(&doc).await.unwrap().record;

        h.overwrite(doc.project_id, Record::Primary, GARBAGE).await;
        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.source, LoadSource::AutoSave, "{:?}", backend);
        assert_eq!(loaded.project.project_name, "Auto Two", "{:?}", backend);

        h.overwrite(doc.project_id, Record::AutoSave(&newest), GARBAGE).await;
        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.source, LoadSource::AutoSave, "{:?}", backend);
        assert_eq!(loaded.project.project_name, "Auto One", "{:?}", backend);
    }
}

#[tokio::test]
async fn test_every_tier_corrupt_is_reported() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let doc = project("Doomed");
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        let auto = h.adapter.auto_save(&doc).await.unwrap().record;

        h.overwrite(doc.project_id, Record::Primary, GARBAGE).await;
        h.overwrite(doc.project_id, Record::Backup, GARBAGE).await;
        h.overwrite(doc.project_id, Record::AutoSave(&auto), GARBAGE).await;

        let err = h.adapter.load_project(doc.project_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CorruptedFile, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_lenient_parse_is_last_resort() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let doc = project("Partial");
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let damaged = json!({
            "projectId": doc.project_id,
            "projectName": "Salvaged",
            "viewportState": {"panX": 0, "panY": 0, "zoom": 40},
        });
        h.overwrite(doc.project_id, Record::Primary, &damaged.to_string()).await;

        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.source, LoadSource::Primary, "{:?}", backend);
        assert!(loaded.lenient, "{:?}", backend);
        assert_eq!(loaded.project.project_name, "Salvaged");
        assert_eq!(loaded.project.viewport_state.zoom, 10.0);
    }
}

#[tokio::test]
async fn test_legacy_document_is_migrated() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let doc = project("Legacy Plant");
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let mut legacy = serde_json::to_value(&doc).unwrap();
        let fields = legacy.as_object_mut().unwrap();
        fields.insert("schemaVersion".to_string(), json!("0.9.0"));
        let name = fields.remove("projectName").unwrap();
        fields.insert("name".to_string(), name);
        let entities: Vec<Value> = doc.entities.iter().map(|(_, e)| e.clone()).collect();
        fields.insert("entities".to_string(), Value::Array(entities));
        h.overwrite(doc.project_id, Record::Primary, &legacy.to_string()).await;

        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.source, LoadSource::Primary, "{:?}", backend);
        assert!(loaded.migrated, "{:?}", backend);
        assert_eq!(loaded.project.project_name, "Legacy Plant");
        assert_eq!(loaded.project.schema_version, "1.0.0");
        assert_eq!(loaded.project.entities, doc.entities, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_newer_schema_falls_back_then_requires_migration() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let mut doc = project("From The Future");
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        doc.project_name = "From The Future v2".to_string();
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let mut future = serde_json::to_value(&doc).unwrap();
        future["schemaVersion"] = json!("3.0.0");
        h.overwrite(doc.project_id, Record::Primary, &future.to_string()).await;

        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.source, LoadSource::Backup, "{:?}", backend);
        assert_eq!(loaded.project.project_name, "From The Future", "{:?}", backend);

        h.overwrite(doc.project_id, Record::Backup, &future.to_string()).await;
        let err = h.adapter.load_project(doc.project_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MigrationRequired, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_non_utf8_primary_uses_backup() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let mut doc = project("Encoding");
        doc.client_name = Some("Acme".to_string());
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        doc.project_name = "Encoding v2".to_string();
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();
        let mut bytes = serde_json::to_vec_pretty(&loaded.project).unwrap();
        let at = bytes.windows(6).position(|w| w == b"\"Acme\"").unwrap();
        bytes[at + 1] = 0xFF;
        h.overwrite_bytes(doc.project_id, Record::Primary, &bytes).await;

        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.source, LoadSource::Backup, "{:?}", backend);
        assert_eq!(loaded.project.project_name, "Encoding", "{:?}", backend);
        assert_eq!(loaded.project.client_name.as_deref(), Some("Acme"), "{:?}", backend);
    }
}

#[tokio::test]
async fn test_auto_save_retention_keeps_newest() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let mut doc = project("Retained");
        let mut created = Vec::new();
        for i in 0..5 {
            doc.project_name = format!("Auto {}", i);
            created.push(h.adapter.auto_save(&doc).await.unwrap().record);
        }

        let remaining = h.adapter.list_auto_saves(doc.project_id).await.unwrap();
        let remaining_ts: Vec<&str> = remaining.iter().map(|r| r.timestamp.as_str()).collect();
        let expected: Vec<&str> = created.iter().rev().take(KEEP).map(|r| r.timestamp.as_str()).collect();
        assert_eq!(remaining_ts, expected, "{:?}", backend);

        // Auto-saves never create a primary
        let err = h.adapter.load_project(doc.project_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound, "{:?}", backend);

        let removed = h.adapter.cleanup_auto_saves(doc.project_id, 1).await.unwrap();
        assert_eq!(removed, KEEP - 1, "{:?}", backend);
        assert_eq!(h.adapter.list_auto_saves(doc.project_id).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_restore_auto_save_promotes_to_primary() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let mut doc = project("Checkpoint");
        let auto = h.adapter.auto_save(&doc).await.unwrap().record;
        doc.project_name = "Later Edit".to_string();
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let restored = h
            .adapter
            .restore_auto_save(doc.project_id, &auto.timestamp)
            .await
            .unwrap();
        assert_eq!(restored.source, LoadSource::AutoSave, "{:?}", backend);
        assert_eq!(restored.project.project_name, "Checkpoint");

        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.project.project_name, "Checkpoint", "{:?}", backend);

        // Previous primary went to the backup slot
        h.overwrite(doc.project_id, Record::Primary, GARBAGE).await;
        let loaded = h.adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.source, LoadSource::Backup, "{:?}", backend);
        assert_eq!(loaded.project.project_name, "Later Edit", "{:?}", backend);

        let err = h
            .adapter
            .restore_auto_save(doc.project_id, "2001-01-01T00:00:00.000Z")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let doc = project("Short Lived");
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        h.adapter.auto_save(&doc).await.unwrap();

        h.adapter.delete_project(doc.project_id).await.unwrap();
        h.adapter.delete_project(doc.project_id).await.unwrap();
        h.adapter.delete_project(Uuid::new_v4()).await.unwrap();

        let err = h.adapter.load_project(doc.project_id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound, "{:?}", backend);
        assert!(h.adapter.list_auto_saves(doc.project_id).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_duplicate_gets_new_identity() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let mut doc = project("Original");
        doc.is_archived = true;
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let copy = h.adapter.duplicate_project(doc.project_id, "Copy of Original").await.unwrap();

        assert_ne!(copy.project.project_id, doc.project_id, "{:?}", backend);
        assert_eq!(copy.project.project_name, "Copy of Original");
        assert_eq!(copy.project.entities, doc.entities, "{:?}", backend);
        assert!(!copy.project.is_archived);
        assert_eq!(copy.project.created_at, copy.project.modified_at, "{:?}", backend);

        let listed = h.adapter.list_projects().await.unwrap();
        assert_eq!(listed.len(), 2, "{:?}", backend);
        // Most recently modified first
        assert_eq!(listed[0].project_id, copy.project.project_id, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_search_is_case_insensitive_and_ordered() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let mut hospital = project("County Hospital");
        hospital.location = Some("Boise, ID".to_string());
        let mut school = project("Elementary School");
        school.project_number = Some("HOSP-22".to_string());
        let office = project("Office Tower");
        for doc in [&hospital, &school, &office] {
            h.adapter.save_project(doc, SaveOptions::default()).await.unwrap();
        }

        let found = h.adapter.search_projects("hosp").await.unwrap();
        let names: Vec<&str> = found.iter().map(|m| m.project_name.as_str()).collect();
        assert_eq!(names, ["Elementary School", "County Hospital"], "{:?}", backend);

        let by_client = h.adapter.search_projects("ACME").await.unwrap();
        assert_eq!(by_client.len(), 3, "{:?}", backend);
        assert!(h.adapter.search_projects("warehouse").await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_update_metadata_merges_patch() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let doc = project("Before");
        let saved = h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

        let update = MetadataUpdate {
            project_name: Some("After".to_string()),
            is_archived: Some(true),
            ..Default::default()
        };
        h.adapter.update_metadata(doc.project_id, &update).await.unwrap();

        let loaded = h.adapter.load_project(doc.project_id).await.unwrap().project;
        assert_eq!(loaded.project_name, "After", "{:?}", backend);
        assert!(loaded.is_archived);
        assert_eq!(loaded.client_name.as_deref(), Some("Acme Mechanical"));
        assert_eq!(loaded.entities, doc.entities);
        assert!(loaded.modified_at > saved.modified_at, "{:?}", backend);

        let listed = h.adapter.list_projects().await.unwrap();
        assert_eq!(listed[0].project_name, "After", "{:?}", backend);

        let err = h
            .adapter
            .update_metadata(Uuid::new_v4(), &update)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_thumbnail_and_storage_info() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let doc = project("Pictured");
        h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();
        h.adapter
            .save_thumbnail(doc.project_id, &[0x89, b'P', b'N', b'G'])
            .await
            .unwrap();

        let info = h.adapter.storage_info().await.unwrap();
        assert!(!info.quota_exceeded, "{:?}", backend);
        assert!(info.used_bytes.unwrap_or(0) > 0, "{:?}", backend);
    }
}

#[tokio::test]
async fn test_revoked_directory_permission() {
    let h = Harness::new(Backend::Directory).await;
    let doc = project("Locked Out");
    h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap();

    let Substrate::Handle { grant, .. } = &h.substrate else {
        unreachable!("directory harness uses a handle");
    };
    grant.revoke();

    let err = h.adapter.load_project(doc.project_id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    let err = h.adapter.save_project(&doc, SaveOptions::default()).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    let err = h.adapter.list_projects().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    assert!(matches!(h.backend, Backend::Directory));
}

#[tokio::test]
async fn test_database_to_directory_transfer() {
    let source = Harness::new(Backend::Database).await;
    let destination = Harness::new(Backend::Directory).await;

    let docs: Vec<ProjectDocument> = ["Library", "Fire Station", "Data Center"]
        .into_iter()
        .map(project)
        .collect();
    for doc in &docs {
        source.adapter.save_project(doc, SaveOptions::default()).await.unwrap();
    }

    let mut reports = 0;
    let progress = migrate_projects(source.adapter.as_ref(), destination.adapter.as_ref(), |_| {
        reports += 1
    })
    .await
    .unwrap();

    assert_eq!(progress.total, 3);
    assert_eq!(progress.completed, 3);
    assert!(progress.errors.is_empty());
    assert_eq!(reports, 6);
    assert!(source.adapter.list_projects().await.unwrap().is_empty());

    let moved = destination.adapter.list_projects().await.unwrap();
    assert_eq!(moved.len(), 3);
    for doc in &docs {
        let loaded = destination.adapter.load_project(doc.project_id).await.unwrap();
        assert_eq!(loaded.source, LoadSource::Primary);
        assert_eq!(loaded.project.project_name, doc.project_name);
        assert_eq!(loaded.project.client_name, doc.client_name);
        assert_eq!(loaded.project.entities, doc.entities);
    }
}
