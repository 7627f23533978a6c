//! Project document model
//!
//! - `document`: the persisted project document and its nested value types
//! - `metadata`: the listing projection and the metadata patch
//! - `validation`: structural rules every persisted document must satisfy

pub mod document;
pub mod metadata;
pub mod validation;

pub use document::{
    EntityCollection, Material, ProjectDocument, ProjectScope, ProjectSettings, SiteConditions,
    UnitSystem, ViewportState,
};
pub use metadata::{MetadataUpdate, ProjectMetadata};
pub use validation::{ValidationError, MAX_PROJECT_NAME_LEN, MAX_ZOOM, MIN_ZOOM};
