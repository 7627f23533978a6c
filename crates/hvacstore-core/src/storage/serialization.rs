//! Project file encoding, decoding and schema migration
//!
//! Pure functions, no I/O. Every adapter writes what [`serialize`] produces
//! and reads through [`deserialize`], falling back to [`migrate`] when the
//! stored schema version is older and to [`deserialize_lenient`] as the last
//! recovery tier.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::project::validation::{self, MAX_PROJECT_NAME_LEN, MAX_ZOOM, MIN_ZOOM, ValidationError};
use crate::project::{EntityCollection, ProjectDocument, ProjectSettings};

/// Schema version written by this build
pub const CURRENT_SCHEMA_VERSION: &str = "1.0.0";

/// Pre-release layout with `name` and a flat entity array
pub const LEGACY_SCHEMA_VERSION: &str = "0.9.0";

/// Name given to projects recovered without a usable name
pub const RECOVERED_PROJECT_NAME: &str = "Recovered Project";

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("JSON encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum DeserializeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Missing schemaVersion field")]
    MissingVersion,

    #[error("Schema version mismatch: found {found_version}, expected 1.0.0")]
    RequiresMigration { found_version: String, raw: Value },

    #[error("Document does not match the project schema: {0}")]
    Schema(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DeserializeError {
    pub fn requires_migration(&self) -> bool {
        matches!(self, Self::RequiresMigration { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("Unknown schema version: {0}")]
    UnknownVersion(String),

    #[error("Migration from {from} failed: {reason}")]
    Failed { from: String, reason: String },
}

/// Validate and encode a project as 2-space indented JSON
pub fn serialize(project: &ProjectDocument) -> Result<String, SerializationError> {
    project.validate()?;
    Ok(serde_json::to_string_pretty(project)?)
}

/// Decode a project written with the current schema version
///
/// A different version is reported as [`DeserializeError::RequiresMigration`]
/// with the parsed JSON, before any validation.
pub fn deserialize(text: &str) -> Result<ProjectDocument, DeserializeError> {
    let raw: Value =
        serde_json::from_str(text).map_err(|e| DeserializeError::InvalidJson(e.to_string()))?;
    deserialize_value(raw)
}

fn deserialize_value(raw: Value) -> Result<ProjectDocument, DeserializeError> {
    let found_version = match raw.get("schemaVersion") {
        Some(Value::String(version)) => version.clone(),
        Some(_) => {
            return Err(DeserializeError::Schema(
                "schemaVersion must be a string".to_string(),
            ));
        }
        None => return Err(DeserializeError::MissingVersion),
    };

    if found_version != CURRENT_SCHEMA_VERSION {
        return Err(DeserializeError::RequiresMigration { found_version, raw });
    }

    let project: ProjectDocument =
        serde_json::from_value(raw).map_err(|e| DeserializeError::Schema(e.to_string()))?;
    project.validate()?;
    Ok(project)
}

/// Upgrade a parsed document from `from_version` to the current schema
pub fn migrate(raw: Value, from_version: &str) -> Result<ProjectDocument, MigrationError> {
    match from_version {
        CURRENT_SCHEMA_VERSION => deserialize_value(raw).map_err(|e| MigrationError::Failed {
            from: from_version.to_string(),
            reason: e.to_string(),
        }),
        LEGACY_SCHEMA_VERSION => {
            let upgraded = upgrade_legacy(raw)?;
            migrate(upgraded, CURRENT_SCHEMA_VERSION)
        }
        other => Err(MigrationError::UnknownVersion(other.to_string())),
    }
}

/// 0.9.0 -> 1.0.0: `name` became `projectName`, entities became keyed
fn upgrade_legacy(raw: Value) -> Result<Value, MigrationError> {
    let failed = |reason: &str| MigrationError::Failed {
        from: LEGACY_SCHEMA_VERSION.to_string(),
        reason: reason.to_string(),
    };

    let Value::Object(mut doc) = raw else {
        return Err(failed("document is not a JSON object"));
    };

    if let Some(name) = doc.remove("name") {
        doc.entry("projectName").or_insert(name);
    }

    if let Some(entities) = doc.remove("entities") {
        let keyed = match entities {
            Value::Array(items) => {
                let mut collection = EntityCollection::default();
                for item in items {
                    let id = item
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| failed("legacy entity without a string id"))?;
                    collection.insert(id, item);
                }
                serde_json::to_value(collection).map_err(|e| failed(&e.to_string()))?
            }
            already_keyed => already_keyed,
        };
        doc.insert("entities".to_string(), keyed);
    }

    doc.insert(
        "schemaVersion".to_string(),
        Value::String(CURRENT_SCHEMA_VERSION.to_string()),
    );
    Ok(Value::Object(doc))
}

/// Best-effort decode used as the final recovery tier
///
/// Only valid JSON with a parseable `projectId` is required. Every other
/// field falls back to its default, entity ids are reconciled and zoom is
/// clamped. Missing timestamps become `now`. The stored `schemaVersion` is
/// kept so the caller can still migrate.
pub fn deserialize_lenient(
    text: &str,
    now: DateTime<Utc>,
) -> Result<ProjectDocument, DeserializeError> {
    let raw: Value =
        serde_json::from_str(text).map_err(|e| DeserializeError::InvalidJson(e.to_string()))?;
    let Value::Object(doc) = raw else {
        return Err(DeserializeError::Schema(
            "top-level value is not an object".to_string(),
        ));
    };

    let project_id = doc
        .get("projectId")
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok())
        .ok_or_else(|| DeserializeError::Schema("missing or invalid projectId".to_string()))?;

    let schema_version = string_field(&doc, "schemaVersion")
        .filter(|version| validation::is_semver(version))
        .unwrap_or_else(|| CURRENT_SCHEMA_VERSION.to_string());
    let project_name = string_field(&doc, "projectName")
        .or_else(|| string_field(&doc, "name"))
        .map(|name| name.chars().take(MAX_PROJECT_NAME_LEN).collect::<String>())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| RECOVERED_PROJECT_NAME.to_string());

    let mut project = ProjectDocument {
        schema_version,
        project_id,
        project_name,
        project_number: string_field(&doc, "projectNumber"),
        client_name: string_field(&doc, "clientName"),
        location: string_field(&doc, "location"),
        scope: typed_field(&doc, "scope").unwrap_or_default(),
        site_conditions: typed_field(&doc, "siteConditions").unwrap_or_default(),
        created_at: timestamp_field(&doc, "createdAt").unwrap_or(now),
        modified_at: timestamp_field(&doc, "modifiedAt").unwrap_or(now),
        is_archived: doc
            .get("isArchived")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        entities: lenient_entities(doc.get("entities")),
        viewport_state: typed_field(&doc, "viewportState").unwrap_or_default(),
        settings: typed_field(&doc, "settings").unwrap_or_default(),
        thumbnail_url: string_field(&doc, "thumbnailUrl"),
        version: string_field(&doc, "version"),
        command_history: doc.get("commandHistory").filter(|v| !v.is_null()).cloned(),
    };

    let zoom = project.viewport_state.zoom;
    project.viewport_state.zoom = if zoom.is_nan() { 1.0 } else { zoom.clamp(MIN_ZOOM, MAX_ZOOM) };
    if validation::check_grid_size(project.settings.grid_size).is_err() {
        project.settings.grid_size = ProjectSettings::default().grid_size;
    }

    Ok(project)
}

fn string_field(doc: &Map<String, Value>, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_string)
}

fn typed_field<T: DeserializeOwned>(doc: &Map<String, Value>, key: &str) -> Option<T> {
    doc.get(key)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

fn timestamp_field(doc: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    doc.get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn lenient_entities(value: Option<&Value>) -> EntityCollection {
    let mut collection = EntityCollection::default();
    match value {
        Some(Value::Object(entities)) => {
            if let Some(Value::Object(by_id)) = entities.get("byId") {
                collection.by_id = by_id
                    .iter()
                    .map(|(id, entity)| (id.clone(), entity.clone()))
                    .collect();
            }
            if let Some(Value::Array(ids)) = entities.get("allIds") {
                collection.all_ids = ids
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect();
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(id) = item.get("id").and_then(Value::as_str) {
                    collection.insert(id, item.clone());
                }
            }
        }
        _ => {}
    }
    collection.reconcile();
    collection
}

/// The `schemaVersion` of a project file, if it parses
pub fn schema_version(text: &str) -> Option<String> {
    serde_json::from_str::<Value>(text)
        .ok()?
        .get("schemaVersion")?
        .as_str()
        .map(str::to_string)
}

/// Cheap shape check without full decoding
pub fn is_project_file(text: &str) -> bool {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(doc)) => {
            doc.get("schemaVersion").is_some_and(Value::is_string)
                && doc.get("projectId").is_some_and(Value::is_string)
                && doc.get("entities").is_some_and(|e| e.is_object() || e.is_array())
        }
        _ => false,
    }
}
