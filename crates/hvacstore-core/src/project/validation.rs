//! Structural validation of project documents

use std::collections::HashSet;
use thiserror::Error;

use super::document::{EntityCollection, ProjectDocument};

pub const MAX_PROJECT_NAME_LEN: usize = 100;
pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 10.0;

/// A rule the document violates
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("projectName must be 1 to 100 characters (got {0})")]
    InvalidName(usize),

    #[error("schemaVersion '{0}' is not a semantic version")]
    InvalidSchemaVersion(String),

    #[error("viewportState.zoom {0} is outside 0.1..=10")]
    ZoomOutOfRange(f64),

    #[error("viewportState.{0} must be a finite number (got {1})")]
    NonFiniteViewport(&'static str, f64),

    #[error("settings.gridSize must be positive (got {0})")]
    InvalidGridSize(f64),

    #[error("entity id '{0}' appears more than once in allIds")]
    DuplicateEntityId(String),

    #[error("entity id '{0}' is listed in allIds but missing from byId")]
    DanglingEntityId(String),

    #[error("entity '{0}' is missing from allIds")]
    UnlistedEntity(String),
}

impl ProjectDocument {
    /// Check every structural rule a persisted document must satisfy
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_schema_version(&self.schema_version)?;
        check_project_name(&self.project_name)?;
        check_pan("panX", self.viewport_state.pan_x)?;
        check_pan("panY", self.viewport_state.pan_y)?;
        check_zoom(self.viewport_state.zoom)?;
        check_grid_size(self.settings.grid_size)?;
        check_entities(&self.entities)
    }
}

pub(crate) fn check_project_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if len == 0 || len > MAX_PROJECT_NAME_LEN {
        return Err(ValidationError::InvalidName(len));
    }
    Ok(())
}

pub(crate) fn check_schema_version(version: &str) -> Result<(), ValidationError> {
    if is_semver(version) {
        Ok(())
    } else {
        Err(ValidationError::InvalidSchemaVersion(version.to_string()))
    }
}

/// JSON has no encoding for NaN or infinity
fn check_pan(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFiniteViewport(field, value))
    }
}

fn check_zoom(zoom: f64) -> Result<(), ValidationError> {
    if (MIN_ZOOM..=MAX_ZOOM).contains(&zoom) {
        Ok(())
    } else {
        Err(ValidationError::ZoomOutOfRange(zoom))
    }
}

pub(crate) fn check_grid_size(grid_size: f64) -> Result<(), ValidationError> {
    // NaN fails this comparison too
    if grid_size > 0.0 && grid_size.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::InvalidGridSize(grid_size))
    }
}

fn check_entities(entities: &EntityCollection) -> Result<(), ValidationError> {
    let mut seen = HashSet::with_capacity(entities.all_ids.len());
    for id in &entities.all_ids {
        if !seen.insert(id.as_str()) {
            return Err(ValidationError::DuplicateEntityId(id.clone()));
        }
        if !entities.by_id.contains_key(id) {
            return Err(ValidationError::DanglingEntityId(id.clone()));
        }
    }
    if let Some(unlisted) = entities.by_id.keys().find(|key| !seen.contains(key.as_str())) {
        return Err(ValidationError::UnlistedEntity(unlisted.clone()));
    }
    Ok(())
}

/// `MAJOR.MINOR.PATCH` with numeric components
pub fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}
