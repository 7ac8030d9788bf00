//! Bidirectional conversion between [`Document`] trees and stored rows.
//!
//! [`Converter`] is the entry point. Each call builds its own resolver and
//! repository-name cache, so a converter holds no mutable state and can be
//! shared freely.

pub mod context;
pub mod export;
pub mod graph;
pub mod import;
pub mod repo_names;
pub mod resolver;

pub use context::CallContext;
pub use import::{enrich_document, ImportHints};

use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::config::{MissingReferencePolicy, StoreConfig};
use crate::db::Database;
use crate::errors::StoreError;
use crate::models::{Document, Group, StoredDocument};

/// Converter settings, usually taken from a [`StoreConfig`].
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Client that owns auto-provisioned organizations when none exists.
    pub default_client: String,
    /// Check email and branch-name syntax.
    pub strict_fields: bool,
    /// What export does with a list reference it cannot name.
    pub on_missing_reference: MissingReferencePolicy,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

impl From<&StoreConfig> for ConverterConfig {
    fn from(config: &StoreConfig) -> Self {
        Self {
            default_client: config.import.default_client.clone(),
            strict_fields: config.import.strict_fields,
            on_missing_reference: config.export.on_missing_reference,
        }
    }
}

/// Imports and exports documents against one [`Database`].
pub struct Converter<'a> {
    db: &'a Database,
    config: ConverterConfig,
}

impl<'a> Converter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self::with_config(db, ConverterConfig::default())
    }

    pub fn with_config(db: &'a Database, config: ConverterConfig) -> Self {
        Self { db, config }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Import `doc`, replacing the stored state of the document with the
    /// same external id.
    pub fn import(&self, doc: &Document) -> Result<StoredDocument, StoreError> {
        self.import_with(doc, &ImportHints::default(), &CallContext::new())
    }

    /// Import with enrichment hints and a caller-supplied context. The whole
    /// tree commits in one transaction or not at all.
    pub fn import_with(
        &self,
        doc: &Document,
        hints: &ImportHints,
        ctx: &CallContext,
    ) -> Result<StoredDocument, StoreError> {
        let run_id = Uuid::new_v4().to_string();
        let doc = enrich_document(doc, hints);
        let span = info_span!("import", run_id = %run_id, document = %doc.id);
        let _guard = span.enter();

        ctx.check("import")?;
        info!(
            file_lists = doc.file_lists.len(),
            directory_lists = doc.directory_lists.len(),
            groups = doc.groups.len(),
            "starting import"
        );

        let stored = self.db.transaction(|conn| {
            import::Importer::new(conn, &self.config, ctx).run(&doc, hints, &run_id)
        })?;

        info!(id = stored.id, version = stored.version, "import committed");
        Ok(stored)
    }

    /// Reconstruct the document stored under `external_id`.
    pub fn export(&self, external_id: &str) -> Result<Document, StoreError> {
        self.export_with(external_id, &CallContext::new())
    }

    pub fn export_with(&self, external_id: &str, ctx: &CallContext) -> Result<Document, StoreError> {
        let span = info_span!("export", document = %external_id);
        let _guard = span.enter();

        ctx.check("export")?;
        let conn = self.db.conn();
        let doc = export::Exporter::new(&conn, &self.config, ctx).document(external_id)?;
        info!(groups = doc.groups.len(), "export finished");
        Ok(doc)
    }

    /// Reconstruct a single group of the document with surrogate id
    /// `document_id`.
    pub fn export_group(&self, document_id: i64, group_id: &str) -> Result<Group, StoreError> {
        let span = info_span!("export", document = document_id, group = %group_id);
        let _guard = span.enter();

        let ctx = CallContext::new();
        let conn = self.db.conn();
        let group = export::Exporter::new(&conn, &self.config, &ctx).group(document_id, group_id)?;
        debug!(targets = group.targets.len(), "group export finished");
        Ok(group)
    }
}
