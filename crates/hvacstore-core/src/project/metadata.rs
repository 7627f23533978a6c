//! Listing projection and metadata patch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::{ProjectDocument, ProjectScope, ProjectSettings, SiteConditions};
use super::validation::{self, ValidationError};

/// A project document without its canvas payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
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
    pub settings: ProjectSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl From<&ProjectDocument> for ProjectMetadata {
    fn from(project: &ProjectDocument) -> Self {
        Self {
            schema_version: project.schema_version.clone(),
            project_id: project.project_id,
            project_name: project.project_name.clone(),
            project_number: project.project_number.clone(),
            client_name: project.client_name.clone(),
            location: project.location.clone(),
            scope: project.scope.clone(),
            site_conditions: project.site_conditions.clone(),
            created_at: project.created_at,
            modified_at: project.modified_at,
            is_archived: project.is_archived,
            settings: project.settings.clone(),
            thumbnail_url: project.thumbnail_url.clone(),
            version: project.version.clone(),
        }
    }
}

impl ProjectMetadata {
    /// Case-insensitive substring match over name, number, client and location
    ///
    /// `needle` must already be lowercased. An empty needle matches everything.
    pub fn matches_query(&self, needle: &str) -> bool {
        let hit = |field: &str| field.to_lowercase().contains(needle);
        hit(&self.project_name)
            || self.project_number.as_deref().is_some_and(hit)
            || self.client_name.as_deref().is_some_and(hit)
            || self.location.as_deref().is_some_and(hit)
    }

    /// Check the fields a projection shares with the full document
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::check_schema_version(&self.schema_version)?;
        validation::check_project_name(&self.project_name)?;
        validation::check_grid_size(self.settings.grid_size)
    }
}

/// Order projects most recently modified first
pub fn sort_by_modified_desc(projects: &mut [ProjectMetadata]) {
    projects.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
}

/// Partial update of the user-editable metadata fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_archived: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl MetadataUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge the patch into a document; unset fields are left alone
    pub fn apply_to(&self, project: &mut ProjectDocument) {
        if let Some(name) = &self.project_name {
            project.project_name = name.clone();
        }
        if let Some(number) = &self.project_number {
            project.project_number = Some(number.clone());
        }
        if let Some(client) = &self.client_name {
            project.client_name = Some(client.clone());
        }
        if let Some(location) = &self.location {
            project.location = Some(location.clone());
        }
        if let Some(archived) = self.is_archived {
            project.is_archived = archived;
        }
        if let Some(url) = &self.thumbnail_url {
            project.thumbnail_url = Some(url.clone());
        }
    }
}
