//! Export pipeline: rebuilds a document tree from stored rows.
//!
//! Storage queries already order by position, but every positioned
//! collection is sorted again here before it is returned.

use rusqlite::Connection;
use tracing::{debug, warn};

use super::context::CallContext;
use super::resolver::ReferenceResolver;
use super::ConverterConfig;
use crate::config::MissingReferencePolicy;
use crate::db::mappings::{self, ListRow, ListTable, Owner};
use crate::db::queries::{self, GroupRow, TargetRow};
use crate::errors::{DatabaseError, ReferenceKind, StoreError};
use crate::models::{
    DirectoryList, DirectoryMapping, Document, FileList, FileMapping, Group, Target,
};

fn failed<'a>(entity: &'a str, id: &'a str) -> impl FnOnce(DatabaseError) -> StoreError + 'a {
    move |source| StoreError::ExportFailed {
        entity: entity.to_string(),
        id: id.to_string(),
        source,
    }
}

/// State for one export call.
pub(crate) struct Exporter<'c> {
    conn: &'c Connection,
    ctx: &'c CallContext,
    policy: MissingReferencePolicy,
    refs: ReferenceResolver,
}

impl<'c> Exporter<'c> {
    pub(crate) fn new(conn: &'c Connection, config: &ConverterConfig, ctx: &'c CallContext) -> Self {
        Self {
            conn,
            ctx,
            policy: config.on_missing_reference,
            refs: ReferenceResolver::new(),
        }
    }

    /// The whole live document with external id `external_id`.
    pub(crate) fn document(mut self, external_id: &str) -> Result<Document, StoreError> {
        let row = queries::find_document(self.conn, external_id)
            .map_err(failed("document", external_id))?
            .filter(|row| row.deleted_at.is_none())
            .ok_or_else(|| StoreError::not_found("document", external_id))?;

        self.ctx.check("lists")?;
        let file_lists = self.file_lists(row.id, external_id)?;
        let directory_lists = self.directory_lists(row.id, external_id)?;

        let mut group_rows = queries::list_groups(self.conn, row.id)
            .map_err(failed("document", external_id))?;
        group_rows.sort_by_key(|g| (g.position, g.id));
        for group in &group_rows {
            self.refs
                .register(ReferenceKind::Group, &group.external_id, group.id);
        }

        let mut groups = Vec::with_capacity(group_rows.len());
        for group in &group_rows {
            self.ctx.check("groups")?;
            groups.push(self.group_row(group)?);
        }

        debug!(
            document = external_id,
            file_lists = file_lists.len(),
            directory_lists = directory_lists.len(),
            groups = groups.len(),
            "rebuilt document"
        );
        Ok(Document {
            version: row.version,
            id: row.external_id,
            name: row.name,
            file_lists,
            directory_lists,
            groups,
        })
    }

    /// One live group of the document with surrogate id `document_id`.
    pub(crate) fn group(mut self, document_id: i64, external_id: &str) -> Result<Group, StoreError> {
        let document = queries::get_document(self.conn, document_id)
            .map_err(failed("document", &document_id.to_string()))?
            .ok_or_else(|| StoreError::not_found("document", document_id.to_string()))?;
        let row = queries::find_live_group(self.conn, document_id, external_id)
            .map_err(failed("group", external_id))?
            .ok_or_else(|| StoreError::not_found("group", external_id))?;

        self.register_lists(ListTable::Files, document.id, &document.external_id)?;
        self.register_lists(ListTable::Directories, document.id, &document.external_id)?;
        self.group_row(&row)
    }

    // -- lists ------------------------------------------------------------

    fn register_lists(
        &mut self,
        table: ListTable,
        document_id: i64,
        document: &str,
    ) -> Result<Vec<ListRow>, StoreError> {
        let rows = mappings::list_lists(self.conn, table, document_id)
            .map_err(failed("document", document))?;
        let kind = match table {
            ListTable::Files => ReferenceKind::FileList,
            ListTable::Directories => ReferenceKind::DirectoryList,
        };
        for row in &rows {
            self.refs.register(kind, &row.external_id, row.id);
        }
        Ok(rows)
    }

    fn file_lists(&mut self, document_id: i64, document: &str) -> Result<Vec<FileList>, StoreError> {
        let mut rows = self.register_lists(ListTable::Files, document_id, document)?;
        rows.sort_by_key(|r| (r.position, r.id));
        rows.into_iter()
            .map(|row| {
                Ok(FileList {
                    files: self.file_mappings(Owner::file_list(row.id), "file list", &row.external_id)?,
                    id: row.external_id,
                    name: row.name,
                    description: row.description,
                })
            })
            .collect()
    }

    fn directory_lists(
        &mut self,
        document_id: i64,
        document: &str,
    ) -> Result<Vec<DirectoryList>, StoreError> {
        let mut rows = self.register_lists(ListTable::Directories, document_id, document)?;
        rows.sort_by_key(|r| (r.position, r.id));
        rows.into_iter()
            .map(|row| {
                Ok(DirectoryList {
                    directories: self.directory_mappings(
                        Owner::directory_list(row.id),
                        "directory list",
                        &row.external_id,
                    )?,
                    id: row.external_id,
                    name: row.name,
                    description: row.description,
                })
            })
            .collect()
    }

    // -- mappings ---------------------------------------------------------

    fn file_mappings(
        &self,
        owner: Owner,
        entity: &str,
        id: &str,
    ) -> Result<Vec<FileMapping>, StoreError> {
        let mut rows = mappings::list_file_mappings(self.conn, owner).map_err(failed(entity, id))?;
        rows.sort_by_key(|r| (r.position, r.id));
        Ok(rows.into_iter().map(|r| r.mapping).collect())
    }

    fn directory_mappings(
        &self,
        owner: Owner,
        entity: &str,
        id: &str,
    ) -> Result<Vec<DirectoryMapping>, StoreError> {
        let mut rows =
            mappings::list_directory_mappings(self.conn, owner).map_err(failed(entity, id))?;
        rows.sort_by_key(|r| (r.position, r.id));
        Ok(rows.into_iter().map(|r| r.mapping).collect())
    }

    // -- groups -----------------------------------------------------------

    fn group_row(&self, row: &GroupRow) -> Result<Group, StoreError> {
        let id = row.external_id.as_str();
        let source = queries::get_group_source(self.conn, row.id).map_err(failed("group", id))?;
        let global = queries::get_group_global(self.conn, row.id).map_err(failed("group", id))?;
        let defaults =
            queries::get_group_defaults(self.conn, row.id).map_err(failed("group", id))?;

        let mut dependencies =
            queries::list_group_dependencies(self.conn, row.id).map_err(failed("group", id))?;
        dependencies.sort_by_key(|d| d.position);

        let mut target_rows = queries::list_targets(self.conn, row.id).map_err(failed("group", id))?;
        target_rows.sort_by_key(|t| (t.position, t.id));
        let mut targets = Vec::with_capacity(target_rows.len());
        for target in target_rows {
            self.ctx.check("targets")?;
            targets.push(self.target(id, target)?);
        }

        Ok(Group {
            id: row.external_id.clone(),
            name: row.name.clone(),
            description: row.description.clone(),
            priority: row.priority,
            enabled: row.enabled,
            depends_on: dependencies.into_iter().map(|d| d.depends_on).collect(),
            source: source.unwrap_or_default(),
            global: global.unwrap_or_default(),
            defaults: defaults.unwrap_or_default(),
            targets,
        })
    }

    fn target(&self, group: &str, row: TargetRow) -> Result<Target, StoreError> {
        let label = format!("{group}:{}", row.repo);
        let owner = Owner::target(row.id);

        let files = self.file_mappings(owner, "target", &label)?;
        let directories = self.directory_mappings(owner, "target", &label)?;
        let transform = mappings::get_transform(self.conn, owner)
            .map_err(failed("target", &label))?
            .unwrap_or_default();
        let file_list_refs = self.list_refs(ListTable::Files, row.id, &label)?;
        let directory_list_refs = self.list_refs(ListTable::Directories, row.id, &label)?;

        Ok(Target {
            repo: row.repo,
            branch: row.branch,
            blob_size_limit: row.blob_size_limit,
            security_email: row.security_email,
            support_email: row.support_email,
            pr_labels: row.pr_labels,
            pr_assignees: row.pr_assignees,
            pr_reviewers: row.pr_reviewers,
            pr_team_reviewers: row.pr_team_reviewers,
            files,
            directories,
            file_list_refs,
            directory_list_refs,
            transform,
        })
    }

    fn list_refs(
        &self,
        table: ListTable,
        target_id: i64,
        label: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut rows =
            queries::list_list_refs(self.conn, table, target_id).map_err(failed("target", label))?;
        rows.sort_by_key(|r| r.position);

        let kind = match table {
            ListTable::Files => ReferenceKind::FileList,
            ListTable::Directories => ReferenceKind::DirectoryList,
        };
        rows.into_iter()
            .map(|r| match self.refs.external_id(kind, r.list_id) {
                Some(external_id) => Ok(external_id.to_string()),
                None => self.missing_reference(kind, r.list_id, label),
            })
            .collect()
    }

    fn missing_reference(
        &self,
        kind: ReferenceKind,
        list_id: i64,
        label: &str,
    ) -> Result<String, StoreError> {
        match self.policy {
            MissingReferencePolicy::Placeholder => {
                let placeholder = format!(
                    "unresolved-{}-{list_id}",
                    kind.to_string().replace(' ', "-")
                );
                warn!(
                    target_label = label,
                    %kind,
                    list_id,
                    placeholder = %placeholder,
                    "stored list reference has no external id"
                );
                Ok(placeholder)
            }
            MissingReferencePolicy::Error => Err(StoreError::ExportFailed {
                entity: "target".into(),
                id: label.to_string(),
                source: DatabaseError::NotFound {
                    entity: kind.to_string(),
                    id: list_id.to_string(),
                },
            }),
        }
    }
}
