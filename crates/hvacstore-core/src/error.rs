//! Error types for HvacStore

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias using HvacStore's Error
pub type Result<T> = std::result::Result<T, Error>;

/// HvacStore error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Project '{0}' not found. Run `hvacstore list` to see all projects.")]
    ProjectNotFound(String),

    #[error("Auto-save '{0}' not found. Run `hvacstore autosaves list <project>` to see available auto-saves.")]
    AutoSaveNotFound(String),

    // Storage errors (E100-E199)
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Directory access not granted for '{0}'. Select the projects folder again.")]
    PermissionNotGranted(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProjectNotFound(_) => "E002",
            Self::AutoSaveNotFound(_) => "E004",
            Self::Storage(inner) => inner.code().numeric(),
            Self::PermissionNotGranted(_) => "E110",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) => "E999",
            Self::Io(_) => "E998",
        }
    }

    /// Get suggested fix command if available
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::ProjectNotFound(_) => Some("hvacstore list".to_string()),
            Self::AutoSaveNotFound(project) => {
                Some(format!("hvacstore autosaves list {}", project))
            }
            Self::Storage(StorageError::MigrationRequired(_)) => {
                Some("Open the project in a newer version of the application".to_string())
            }
            Self::Storage(StorageError::QuotaExceeded(_)) => {
                Some("hvacstore autosaves cleanup <project> --keep 1".to_string())
            }
            Self::PermissionNotGranted(_) => {
                Some("hvacstore config set storage.directory_path <path>".to_string())
            }
            Self::ConfigError(_) => Some("hvacstore config list".to_string()),
            _ => None,
        }
    }
}

/// Failure categories reported by every storage adapter operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    WriteError,
    ReadError,
    FileNotFound,
    CorruptedFile,
    MigrationRequired,
    PermissionDenied,
    DeleteError,
    QuotaExceeded,
}

impl ErrorCode {
    /// Wire name of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::WriteError => "WRITE_ERROR",
            Self::ReadError => "READ_ERROR",
            Self::FileNotFound => "FILE_NOT_FOUND",
            Self::CorruptedFile => "CORRUPTED_FILE",
            Self::MigrationRequired => "MIGRATION_REQUIRED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::DeleteError => "DELETE_ERROR",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
        }
    }

    fn numeric(&self) -> &'static str {
        match self {
            Self::ValidationError => "E100",
            Self::WriteError => "E101",
            Self::ReadError => "E102",
            Self::FileNotFound => "E103",
            Self::CorruptedFile => "E104",
            Self::MigrationRequired => "E105",
            Self::PermissionDenied => "E106",
            Self::DeleteError => "E107",
            Self::QuotaExceeded => "E108",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a storage adapter operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Project failed validation: {0}")]
    Validation(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Project '{0}' is corrupted and no recovery source was usable")]
    Corrupted(String),

    #[error("Migration required: {0}")]
    MigrationRequired(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Delete failed: {0}")]
    Delete(String),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),
}

impl StorageError {
    /// The error code surfaced to callers
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Write(_) => ErrorCode::WriteError,
            Self::Read(_) => ErrorCode::ReadError,
            Self::NotFound(_) => ErrorCode::FileNotFound,
            Self::Corrupted(_) => ErrorCode::CorruptedFile,
            Self::MigrationRequired(_) => ErrorCode::MigrationRequired,
            Self::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Self::Delete(_) => ErrorCode::DeleteError,
            Self::QuotaExceeded(_) => ErrorCode::QuotaExceeded,
        }
    }

    /// The human-readable detail carried by the error
    pub fn message(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::Write(m)
            | Self::Read(m)
            | Self::NotFound(m)
            | Self::Corrupted(m)
            | Self::MigrationRequired(m)
            | Self::PermissionDenied(m)
            | Self::Delete(m)
            | Self::QuotaExceeded(m) => m,
        }
    }

    /// Build an error for the given code
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::ValidationError => Self::Validation(message),
            ErrorCode::WriteError => Self::Write(message),
            ErrorCode::ReadError => Self::Read(message),
            ErrorCode::FileNotFound => Self::NotFound(message),
            ErrorCode::CorruptedFile => Self::Corrupted(message),
            ErrorCode::MigrationRequired => Self::MigrationRequired(message),
            ErrorCode::PermissionDenied => Self::PermissionDenied(message),
            ErrorCode::DeleteError => Self::Delete(message),
            ErrorCode::QuotaExceeded => Self::QuotaExceeded(message),
        }
    }

    /// Classify an I/O failure, falling back to the operation's own code
    pub fn from_io(err: &io::Error, fallback: ErrorCode) -> Self {
        let code = match err.kind() {
            io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            io::ErrorKind::StorageFull => ErrorCode::WriteError,
            _ => classify_message(&err.to_string(), fallback),
        };
        Self::from_code(code, err.to_string())
    }

    /// Classify a database failure, falling back to the operation's own code
    pub fn from_sqlx(err: &sqlx::Error, fallback: ErrorCode) -> Self {
        let code = match err {
            sqlx::Error::Io(io_err) => return Self::from_io(io_err, fallback),
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(SQLITE_FULL) => {
                ErrorCode::QuotaExceeded
            }
            other => classify_message(&other.to_string(), fallback),
        };
        Self::from_code(code, err.to_string())
    }
}

/// SQLite primary result code for a full database or disk
const SQLITE_FULL: &str = "13";

/// Map a platform failure message onto an error code
///
/// Matching is case-insensitive. Quota markers win over disk-full markers
/// because SQLite reports quota exhaustion as "database or disk is full".
pub fn classify_message(message: &str, fallback: ErrorCode) -> ErrorCode {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("access denied") {
        ErrorCode::PermissionDenied
    } else if lower.contains("quota") || lower.contains("database or disk is full") {
        ErrorCode::QuotaExceeded
    } else if lower.contains("disk full") || lower.contains("no space") {
        ErrorCode::WriteError
    } else {
        fallback
    }
}
