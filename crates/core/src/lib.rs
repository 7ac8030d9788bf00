//! syncstore core library.
//!
//! Persists declarative repository-sync configuration documents into a
//! normalized SQLite store and reconstructs equivalent documents on demand:
//! configuration, document model, field validation, database persistence,
//! and the import/export converter.

pub mod config;
pub mod convert;
pub mod db;
pub mod errors;
pub mod models;
pub mod validation;

// Re-exports for convenience.
pub use config::StoreConfig;
pub use convert::{CallContext, Converter, ConverterConfig, ImportHints};
pub use db::Database;
pub use errors::StoreError;
pub use models::Document;
