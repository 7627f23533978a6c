//! HvacStore Core Library
//!
//! Project persistence and recovery for the HVAC design tool:
//! - Project document model and validation
//! - Versioned serialization with schema migration
//! - A shared storage adapter contract with three backends
//!   (direct filesystem, sandboxed directory handle, embedded SQLite)
//! - Layered load recovery (primary, backup, auto-saves, lenient parse)
//! - Periodic auto-save and cross-backend project transfer

pub mod autosave;
pub mod clock;
pub mod config;
pub mod error;
pub mod project;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCode, Result, StorageError};
    pub use crate::project::{MetadataUpdate, ProjectDocument, ProjectMetadata};
    pub use crate::storage::{
        create_adapter, LoadOutcome, LoadSource, SaveOptions, StorageAdapter, StorageResult,
    };
}
