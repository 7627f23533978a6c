//! The persisted project document

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::storage::serialization::CURRENT_SCHEMA_VERSION;

/// A complete HVAC design project as written to storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDocument {
    pub schema_version: String,
    pub project_id: Uuid,
    pub project_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub scope: ProjectScope,
    #[serde(default)]
    pub site_conditions: SiteConditions,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub entities: EntityCollection,
    #[serde(default)]
    pub viewport_state: ViewportState,
    #[serde(default)]
    pub settings: ProjectSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_history: Option<Value>,
}

impl ProjectDocument {
    /// Create an empty project with a fresh identity
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            project_id: Uuid::new_v4(),
            project_name: name.into(),
            project_number: None,
            client_name: None,
            location: None,
            scope: ProjectScope::default(),
            site_conditions: SiteConditions::default(),
            created_at: now,
            modified_at: now,
            is_archived: false,
            entities: EntityCollection::default(),
            viewport_state: ViewportState::default(),
            settings: ProjectSettings::default(),
            thumbnail_url: None,
            version: None,
            command_history: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectScope {
    pub details: Vec<String>,
    pub materials: Vec<Material>,
    pub project_type: String,
}

impl Default for ProjectScope {
    fn default() -> Self {
        Self {
            details: Vec::new(),
            materials: Vec::new(),
            project_type: "Commercial".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    #[serde(rename = "type")]
    pub material_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
}

/// Design conditions entered by the engineer, kept as entered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteConditions {
    pub elevation: String,
    pub outdoor_temp: String,
    pub indoor_temp: String,
    pub wind_speed: String,
    pub humidity: String,
    pub local_codes: String,
}

impl Default for SiteConditions {
    fn default() -> Self {
        Self {
            elevation: "0".to_string(),
            outdoor_temp: "70".to_string(),
            indoor_temp: "70".to_string(),
            wind_speed: "0".to_string(),
            humidity: "50".to_string(),
            local_codes: String::new(),
        }
    }
}

/// Canvas entities keyed by id, with an ordered id list
///
/// `all_ids` carries insertion order; `by_id` is ordered by key so encoding
/// is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityCollection {
    pub by_id: BTreeMap<String, Value>,
    pub all_ids: Vec<String>,
}

impl EntityCollection {
    /// Insert or replace an entity, appending new ids to the order
    pub fn insert(&mut self, id: impl Into<String>, entity: Value) {
        let id = id.into();
        if self.by_id.insert(id.clone(), entity).is_none() {
            self.all_ids.push(id);
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Value> {
        let removed = self.by_id.remove(id);
        if removed.is_some() {
            self.all_ids.retain(|existing| existing != id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Entities in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.all_ids
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|entity| (id.as_str(), entity)))
    }

    /// Repair the id list so it lists every entity exactly once
    ///
    /// Ids without an entity and repeated ids are dropped; entities missing
    /// from the list are appended in key order.
    pub fn reconcile(&mut self) {
        let mut seen = HashSet::new();
        self.all_ids
            .retain(|id| self.by_id.contains_key(id) && seen.insert(id.clone()));
        for key in self.by_id.keys() {
            if !seen.contains(key) {
                self.all_ids.push(key.clone());
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewportState {
    pub pan_x: f64,
    pub pan_y: f64,
    pub zoom: f64,
}

impl Default for ViewportState {
    fn default() -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    #[default]
    Imperial,
    Metric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectSettings {
    pub unit_system: UnitSystem,
    pub grid_size: f64,
    pub grid_visible: bool,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            unit_system: UnitSystem::Imperial,
            grid_size: 12.0,
            grid_visible: true,
        }
    }
}
