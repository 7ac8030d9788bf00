//! Error types for the sync-configuration store.
//!
//! The storage layer reports [`DatabaseError`], configuration loading reports
//! [`ConfigError`], and the converter surfaces everything through
//! [`StoreError`], which carries enough context (entity kind and external id)
//! for a caller to locate the offending input.

use std::fmt;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Errors returned by the import/export converter and administrative calls.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested document or group does not exist.
    #[error("{entity} not found: {id}")]
    RecordNotFound { entity: String, id: String },

    /// A dependency or list reference does not resolve.
    #[error("{kind} '{id}' referenced by {referenced_by} does not exist")]
    ReferenceNotFound {
        kind: ReferenceKind,
        id: String,
        referenced_by: String,
    },

    /// The group dependency graph contains a cycle.
    #[error("circular group dependency involving '{group}'")]
    CircularDependency { group: String },

    /// A repository string is not in `organization/repository` form.
    #[error("invalid repository '{0}': expected 'organization/repository'")]
    InvalidRepoFormat(String),

    /// A field-level rule was violated.
    #[error("invalid {entity} field '{field}': {detail}")]
    ValidationFailed {
        entity: String,
        field: String,
        detail: String,
    },

    /// A storage call failed while writing part of a document.
    #[error("failed to {operation} {entity} '{id}': {source}")]
    ImportFailed {
        operation: Operation,
        entity: String,
        id: String,
        #[source]
        source: DatabaseError,
    },

    /// A storage call failed while reading part of a document.
    #[error("failed to export {entity} '{id}': {source}")]
    ExportFailed {
        entity: String,
        id: String,
        #[source]
        source: DatabaseError,
    },

    /// The caller's deadline passed or the call was cancelled.
    #[error("operation cancelled during {stage}")]
    Cancelled { stage: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    /// Shorthand for a [`StoreError::ValidationFailed`].
    pub fn validation(entity: &str, field: &str, detail: impl Into<String>) -> Self {
        Self::ValidationFailed {
            entity: entity.to_string(),
            field: field.to_string(),
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`StoreError::RecordNotFound`].
    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            entity: entity.to_string(),
            id: id.into(),
        }
    }
}

/// The kind of entity a cross-reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Group,
    FileList,
    DirectoryList,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group => write!(f, "group"),
            Self::FileList => write!(f, "file list"),
            Self::DirectoryList => write!(f, "directory list"),
        }
    }
}

/// The storage operation being attempted when an import write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Lookup,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Lookup => write!(f, "look up"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A JSON column could not be encoded.
    #[error("cannot encode column '{column}': {detail}")]
    Encoding { column: String, detail: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = StoreError::ReferenceNotFound {
            kind: ReferenceKind::FileList,
            id: "shared".into(),
            referenced_by: "target 'acme/web' in group 'core'".into(),
        };
        assert_eq!(
            err.to_string(),
            "file list 'shared' referenced by target 'acme/web' in group 'core' does not exist"
        );

        let err = StoreError::CircularDependency { group: "a".into() };
        assert!(err.to_string().contains("'a'"));

        let err = StoreError::InvalidRepoFormat("noslash".into());
        assert!(err.to_string().contains("organization/repository"));
    }

    #[test]
    fn test_import_failed_keeps_context() {
        let err = StoreError::ImportFailed {
            operation: Operation::Create,
            entity: "group".into(),
            id: "core".into(),
            source: DatabaseError::NotFound {
                entity: "repo".into(),
                id: "1".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.starts_with("failed to create group 'core'"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_store_error_from_subsystem() {
        let db_err = DatabaseError::NotFound {
            entity: "document".into(),
            id: "abc".into(),
        };
        let err: StoreError = db_err.into();
        assert!(matches!(err, StoreError::Database(_)));

        let cfg_err = ConfigError::FileNotFound("/x.toml".into());
        let err: StoreError = cfg_err.into();
        assert!(matches!(err, StoreError::Config(_)));
    }
}
