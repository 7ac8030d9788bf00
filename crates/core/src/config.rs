//! TOML-based configuration for the sync-configuration store.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! [database]
//! path = "/var/lib/syncstore/sync.db"
//! busy_timeout_ms = 5000
//! wal = true
//!
//! [import]
//! default_client = "default"
//! strict_fields = true
//!
//! [export]
//! on_missing_reference = "placeholder"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level store configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Import pipeline settings.
    #[serde(default)]
    pub import: ImportConfig,

    /// Export pipeline settings.
    #[serde(default)]
    pub export: ExportConfig,
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// SQLite connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path of the database file (created if missing).
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// How long a writer waits on a locked database, in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Use WAL journaling.
    #[serde(default = "default_true")]
    pub wal: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("syncstore.db")
}
fn default_busy_timeout() -> u64 {
    5000
}
fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout(),
            wal: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Import pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Client name used when the first organization is auto-provisioned.
    #[serde(default = "default_client")]
    pub default_client: String,

    /// Check email and branch-name syntax in addition to required fields.
    #[serde(default = "default_true")]
    pub strict_fields: bool,
}

fn default_client() -> String {
    "default".into()
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_client: default_client(),
            strict_fields: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// What export does when a stored list reference has no external id.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MissingReferencePolicy {
    /// Emit a synthetic id and log a warning.
    #[default]
    Placeholder,
    /// Fail the export.
    Error,
}

/// Export pipeline settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub on_missing_reference: MissingReferencePolicy,
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl StoreConfig {
    /// Load a [`StoreConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: StoreConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all values are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "database.path".into(),
                detail: "database path must not be empty".into(),
            });
        }
        if self.database.busy_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "database.busy_timeout_ms".into(),
                detail: "busy timeout must be > 0".into(),
            });
        }
        if self.import.default_client.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "import.default_client".into(),
                detail: "default client name must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_toml() -> &'static str {
        r#"
[database]
path = "/tmp/syncstore/sync.db"
busy_timeout_ms = 250
wal = false

[import]
default_client = "acme"
strict_fields = false

[export]
on_missing_reference = "error"
"#
    }

    #[test]
    fn test_parse_full_config() {
        let config: StoreConfig = toml::from_str(sample_toml()).expect("failed to parse toml");
        assert_eq!(config.database.path, PathBuf::from("/tmp/syncstore/sync.db"));
        assert_eq!(config.database.busy_timeout_ms, 250);
        assert!(!config.database.wal);
        assert_eq!(config.import.default_client, "acme");
        assert!(!config.import.strict_fields);
        assert_eq!(
            config.export.on_missing_reference,
            MissingReferencePolicy::Error
        );
    }

    #[test]
    fn test_defaults() {
        let config: StoreConfig = toml::from_str("").unwrap();
        assert_eq!(config.database.path, PathBuf::from("syncstore.db"));
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert!(config.database.wal);
        assert_eq!(config.import.default_client, "default");
        assert!(config.import.strict_fields);
        assert_eq!(
            config.export.on_missing_reference,
            MissingReferencePolicy::Placeholder
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syncstore.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(sample_toml().as_bytes()).unwrap();

        let config = StoreConfig::load_and_validate(&path).expect("load failed");
        assert_eq!(config.import.default_client, "acme");
    }

    #[test]
    fn test_file_not_found() {
        let result = StoreConfig::load_from_file("/nonexistent/syncstore.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = StoreConfig::default();
        config.database.busy_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "database.busy_timeout_ms"
        ));
    }

    #[test]
    fn test_validate_rejects_blank_client() {
        let mut config = StoreConfig::default();
        config.import.default_client = "  ".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "import.default_client"
        ));
    }
}
