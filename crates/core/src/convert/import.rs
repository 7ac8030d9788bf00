//! Import pipeline: writes a candidate document into the store.
//!
//! Order of work inside the transaction:
//!
//! 1. upsert the document root
//! 2. upsert file lists, then directory lists, re-creating their mappings
//! 3. check dependencies and list references against the candidate
//! 4. upsert each group, replacing its dependencies and targets wholesale
//! 5. purge groups and lists the new document no longer contains
//!
//! Lists come first because targets reference them and they never reference
//! anything back.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, info};

use super::context::CallContext;
use super::graph::{
    validate_dependencies, validate_list_references, validate_repo_names, validate_unique_ids,
};
use super::repo_names::RepoNameResolver;
use super::resolver::ReferenceResolver;
use super::ConverterConfig;
use crate::db::mappings::{self, ListTable, Owner};
use crate::db::queries;
use crate::errors::{DatabaseError, Operation, ReferenceKind, StoreError};
use crate::models::{
    DirectoryList, DirectoryMapping, Document, FileList, FileMapping, Group, Metadata,
    StoredDocument, Target,
};
use crate::validation::{
    require_non_empty, validate_directory_mapping, validate_file_mapping, validate_transform,
    FieldRules,
};

/// Caller-supplied context used to fill in missing document fields.
#[derive(Debug, Clone, Default)]
pub struct ImportHints {
    /// Where the document was read from.
    pub source_path: Option<PathBuf>,
}

/// Fill in an empty name from the source path's file stem, and an empty id
/// from a slug of the name. Depends only on `doc` and `hints`.
pub fn enrich_document(doc: &Document, hints: &ImportHints) -> Document {
    let mut doc = doc.clone();
    if doc.name.trim().is_empty() {
        if let Some(stem) = hints
            .source_path
            .as_deref()
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().into_owned())
        {
            doc.name = stem;
        }
    }
    if doc.id.trim().is_empty() && !doc.name.trim().is_empty() {
        doc.id = slugify(&doc.name);
    }
    doc
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Wrap a storage error with the write being attempted.
fn failed<'a>(
    operation: Operation,
    entity: &'a str,
    id: &'a str,
) -> impl FnOnce(DatabaseError) -> StoreError + 'a {
    move |source| StoreError::ImportFailed {
        operation,
        entity: entity.to_string(),
        id: id.to_string(),
        source,
    }
}

/// State for one import call. Lives inside the transaction.
pub(crate) struct Importer<'c> {
    conn: &'c Connection,
    ctx: &'c CallContext,
    rules: FieldRules,
    refs: ReferenceResolver,
    repos: RepoNameResolver,
}

impl<'c> Importer<'c> {
    pub(crate) fn new(conn: &'c Connection, config: &ConverterConfig, ctx: &'c CallContext) -> Self {
        Self {
            conn,
            ctx,
            rules: FieldRules::new(config.strict_fields),
            refs: ReferenceResolver::new(),
            repos: RepoNameResolver::new(config.default_client.clone()),
        }
    }

    pub(crate) fn run(
        mut self,
        doc: &Document,
        hints: &ImportHints,
        run_id: &str,
    ) -> Result<StoredDocument, StoreError> {
        require_non_empty("document", "id", &doc.id)?;
        require_non_empty("document", "name", &doc.name)?;
        validate_unique_ids(doc)?;
        validate_repo_names(doc)?;

        self.ctx.check("document")?;
        let document_id = self.upsert_document(doc, hints, run_id)?;

        let stale_file_lists = self.existing_lists(ListTable::Files, document_id, &doc.id)?;
        let stale_directory_lists =
            self.existing_lists(ListTable::Directories, document_id, &doc.id)?;
        let stale_groups: Vec<(i64, String)> = queries::all_groups(self.conn, document_id)
            .map_err(failed(Operation::Lookup, "document", &doc.id))?
            .into_iter()
            .map(|g| (g.id, g.external_id))
            .collect();

        for (position, list) in doc.file_lists.iter().enumerate() {
            self.ctx.check("file lists")?;
            self.import_file_list(document_id, list, position as i64)?;
        }
        for (position, list) in doc.directory_lists.iter().enumerate() {
            self.ctx.check("directory lists")?;
            self.import_directory_list(document_id, list, position as i64)?;
        }

        validate_dependencies(doc)?;
        validate_list_references(doc)?;

        for (position, group) in doc.groups.iter().enumerate() {
            self.ctx.check("groups")?;
            self.import_group(document_id, group, position as i64)?;
        }

        self.ctx.check("cleanup")?;
        let keep: HashSet<&str> = doc.groups.iter().map(|g| g.id.as_str()).collect();
        for (id, external_id) in stale_groups {
            if !keep.contains(external_id.as_str()) {
                queries::hard_delete_group(self.conn, id)
                    .map_err(failed(Operation::Delete, "group", &external_id))?;
                info!(group = %external_id, "removed group absent from document");
            }
        }
        self.purge_lists(
            ListTable::Files,
            stale_file_lists,
            doc.file_lists.iter().map(|l| l.id.as_str()).collect(),
        )?;
        self.purge_lists(
            ListTable::Directories,
            stale_directory_lists,
            doc.directory_lists.iter().map(|l| l.id.as_str()).collect(),
        )?;

        let row = queries::get_document(self.conn, document_id)
            .map_err(failed(Operation::Lookup, "document", &doc.id))?
            .ok_or_else(|| StoreError::not_found("document", doc.id.clone()))?;
        Ok(row.into_stored())
    }

    // -- document ---------------------------------------------------------

    fn upsert_document(
        &self,
        doc: &Document,
        hints: &ImportHints,
        run_id: &str,
    ) -> Result<i64, StoreError> {
        let existing = queries::find_document(self.conn, &doc.id)
            .map_err(failed(Operation::Lookup, "document", &doc.id))?;

        let mut metadata: Metadata = existing
            .as_ref()
            .map(|row| row.metadata.clone())
            .unwrap_or_default();
        metadata.insert("last_import_id".into(), run_id.into());
        if let Some(path) = &hints.source_path {
            metadata.insert("source_path".into(), path.display().to_string().into());
        }

        match existing {
            Some(row) => {
                queries::update_document(self.conn, row.id, &doc.name, doc.version, &metadata)
                    .map_err(failed(Operation::Update, "document", &doc.id))?;
                debug!(id = row.id, "updating existing document");
                Ok(row.id)
            }
            None => queries::insert_document(self.conn, &doc.id, &doc.name, doc.version, &metadata)
                .map_err(failed(Operation::Create, "document", &doc.id)),
        }
    }

    // -- lists ------------------------------------------------------------

    fn existing_lists(
        &self,
        table: ListTable,
        document_id: i64,
        document: &str,
    ) -> Result<Vec<(i64, String)>, StoreError> {
        let rows = mappings::all_lists(self.conn, table, document_id)
            .map_err(failed(Operation::Lookup, "document", document))?;
        Ok(rows.into_iter().map(|l| (l.id, l.external_id)).collect())
    }

    /// Upsert a list row and clear its mappings so they can be re-created.
    fn upsert_list(
        &self,
        table: ListTable,
        document_id: i64,
        external_id: &str,
        name: &str,
        description: &str,
        position: i64,
    ) -> Result<i64, StoreError> {
        let entity = table.entity();
        let existing = mappings::find_list(self.conn, table, document_id, external_id)
            .map_err(failed(Operation::Lookup, entity, external_id))?;
        match existing {
            Some(row) => {
                mappings::update_list(self.conn, table, row.id, name, description, position)
                    .map_err(failed(Operation::Update, entity, external_id))?;
                let owner = table.owner(row.id);
                let cleared = match table {
                    ListTable::Files => mappings::delete_file_mappings(self.conn, owner),
                    ListTable::Directories => mappings::delete_directory_mappings(self.conn, owner),
                };
                cleared.map_err(failed(Operation::Delete, entity, external_id))?;
                Ok(row.id)
            }
            None => mappings::insert_list(
                self.conn,
                table,
                document_id,
                external_id,
                name,
                description,
                position,
            )
            .map_err(failed(Operation::Create, entity, external_id)),
        }
    }

    fn import_file_list(
        &mut self,
        document_id: i64,
        list: &FileList,
        position: i64,
    ) -> Result<(), StoreError> {
        require_non_empty("file list", "id", &list.id)?;
        for mapping in &list.files {
            validate_file_mapping("file list", mapping)?;
        }
        let id = self.upsert_list(
            ListTable::Files,
            document_id,
            &list.id,
            &list.name,
            &list.description,
            position,
        )?;
        self.write_file_mappings(Owner::file_list(id), &list.files, "file list", &list.id)?;
        self.refs.register(ReferenceKind::FileList, &list.id, id);
        debug!(list = %list.id, id, files = list.files.len(), "imported file list");
        Ok(())
    }

    fn import_directory_list(
        &mut self,
        document_id: i64,
        list: &DirectoryList,
        position: i64,
    ) -> Result<(), StoreError> {
        require_non_empty("directory list", "id", &list.id)?;
        for mapping in &list.directories {
            validate_directory_mapping("directory list", mapping)?;
        }
        let id = self.upsert_list(
            ListTable::Directories,
            document_id,
            &list.id,
            &list.name,
            &list.description,
            position,
        )?;
        self.write_directory_mappings(
            Owner::directory_list(id),
            &list.directories,
            "directory list",
            &list.id,
        )?;
        self.refs.register(ReferenceKind::DirectoryList, &list.id, id);
        debug!(list = %list.id, id, directories = list.directories.len(), "imported directory list");
        Ok(())
    }

    fn purge_lists(
        &self,
        table: ListTable,
        previous: Vec<(i64, String)>,
        keep: HashSet<&str>,
    ) -> Result<(), StoreError> {
        for (id, external_id) in previous {
            if !keep.contains(external_id.as_str()) {
                mappings::hard_delete_list(self.conn, table, id)
                    .map_err(failed(Operation::Delete, table.entity(), &external_id))?;
                info!(list = %external_id, kind = table.entity(), "removed list absent from document");
            }
        }
        Ok(())
    }

    // -- mappings ---------------------------------------------------------

    fn write_file_mappings(
        &self,
        owner: Owner,
        files: &[FileMapping],
        entity: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        for (position, mapping) in files.iter().enumerate() {
            mappings::insert_file_mapping(self.conn, owner, mapping, position as i64)
                .map_err(failed(Operation::Create, entity, id))?;
        }
        Ok(())
    }

    fn write_directory_mappings(
        &self,
        owner: Owner,
        directories: &[DirectoryMapping],
        entity: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        for (position, mapping) in directories.iter().enumerate() {
            mappings::insert_directory_mapping(self.conn, owner, mapping, position as i64)
                .map_err(failed(Operation::Create, entity, id))?;
        }
        Ok(())
    }

    // -- groups -----------------------------------------------------------

    fn validate_group(&self, group: &Group) -> Result<(), StoreError> {
        require_non_empty("group", "id", &group.id)?;
        require_non_empty("group", "source.repo", &group.source.repo)?;
        self.rules.branch("group", "source.branch", &group.source.branch)?;
        self.rules
            .email("group", "source.securityEmail", &group.source.security_email)?;
        self.rules
            .email("group", "source.supportEmail", &group.source.support_email)?;
        Ok(())
    }

    fn import_group(
        &mut self,
        document_id: i64,
        group: &Group,
        position: i64,
    ) -> Result<(), StoreError> {
        self.validate_group(group)?;

        let mut existing = queries::find_group(self.conn, &group.id)
            .map_err(failed(Operation::Lookup, "group", &group.id))?;
        if let Some(row) = existing.as_ref().filter(|row| row.document_id != document_id) {
            let owner_live = queries::get_document(self.conn, row.document_id)
                .map_err(failed(Operation::Lookup, "group", &group.id))?
                .is_some();
            if !owner_live {
                // The owning document is soft-deleted, so the id is free again.
                queries::hard_delete_group(self.conn, row.id)
                    .map_err(failed(Operation::Delete, "group", &group.id))?;
                info!(group = %group.id, "reclaimed group from deleted document");
                existing = None;
            }
        }
        let group_id = match existing {
            Some(row) if row.document_id != document_id => {
                return Err(StoreError::validation(
                    "group",
                    "id",
                    format!("'{}' already belongs to another document", group.id),
                ));
            }
            Some(row) => {
                queries::update_group(self.conn, row.id, group, position)
                    .map_err(failed(Operation::Update, "group", &group.id))?;
                queries::delete_targets_for_group(self.conn, row.id)
                    .and_then(|_| queries::delete_group_dependencies(self.conn, row.id))
                    .map_err(failed(Operation::Delete, "group", &group.id))?;
                row.id
            }
            None => queries::insert_group(self.conn, document_id, group, position)
                .map_err(failed(Operation::Create, "group", &group.id))?,
        };
        self.refs.register(ReferenceKind::Group, &group.id, group_id);

        let source_repo = self.resolve_repo(&group.source.repo, "group", &group.id)?;
        queries::upsert_group_source(self.conn, group_id, source_repo, &group.source)
            .and_then(|_| queries::upsert_group_global(self.conn, group_id, &group.global))
            .and_then(|_| queries::upsert_group_defaults(self.conn, group_id, &group.defaults))
            .map_err(failed(Operation::Update, "group", &group.id))?;

        for (position, dep) in group.depends_on.iter().enumerate() {
            queries::insert_group_dependency(self.conn, group_id, dep, position as i64)
                .map_err(failed(Operation::Create, "group dependency", &group.id))?;
        }

        for (position, target) in group.targets.iter().enumerate() {
            self.ctx.check("targets")?;
            self.import_target(group_id, group, target, position as i64)?;
        }

        debug!(
            group = %group.id,
            id = group_id,
            targets = group.targets.len(),
            "imported group"
        );
        Ok(())
    }

    fn resolve_repo(&mut self, repo: &str, entity: &str, id: &str) -> Result<i64, StoreError> {
        match self.repos.resolve(self.conn, repo) {
            Err(StoreError::Database(source)) => Err(StoreError::ImportFailed {
                operation: Operation::Lookup,
                entity: entity.to_string(),
                id: id.to_string(),
                source,
            }),
            other => other,
        }
    }

    // -- targets ----------------------------------------------------------

    fn validate_target(&self, target: &Target) -> Result<(), StoreError> {
        require_non_empty("target", "repo", &target.repo)?;
        self.rules.branch("target", "branch", &target.branch)?;
        self.rules
            .email("target", "securityEmail", &target.security_email)?;
        self.rules.email("target", "supportEmail", &target.support_email)?;
        for mapping in &target.files {
            validate_file_mapping("target", mapping)?;
        }
        for mapping in &target.directories {
            validate_directory_mapping("target", mapping)?;
        }
        validate_transform("target", &target.transform)
    }

    fn import_target(
        &mut self,
        group_id: i64,
        group: &Group,
        target: &Target,
        position: i64,
    ) -> Result<(), StoreError> {
        self.validate_target(target)?;
        let label = format!("{}:{}", group.id, target.repo);

        let repo_id = self.resolve_repo(&target.repo, "target", &label)?;
        let target_id = queries::insert_target(self.conn, group_id, repo_id, target, position)
            .map_err(failed(Operation::Create, "target", &label))?;
        let owner = Owner::target(target_id);

        self.write_file_mappings(owner, &target.files, "target", &label)?;
        self.write_directory_mappings(owner, &target.directories, "target", &label)?;
        if !target.transform.is_empty() {
            mappings::upsert_transform(self.conn, owner, &target.transform)
                .map_err(failed(Operation::Create, "transform", &label))?;
        }

        let referenced_by = format!("target '{label}'");
        for (position, list) in target.file_list_refs.iter().enumerate() {
            let list_id = self
                .refs
                .resolve(ReferenceKind::FileList, list, &referenced_by)?;
            queries::insert_list_ref(
                self.conn,
                ListTable::Files,
                target_id,
                list_id,
                position as i64,
            )
            .map_err(failed(Operation::Create, "file list reference", &label))?;
        }
        for (position, list) in target.directory_list_refs.iter().enumerate() {
            let list_id = self
                .refs
                .resolve(ReferenceKind::DirectoryList, list, &referenced_by)?;
            queries::insert_list_ref(
                self.conn,
                ListTable::Directories,
                target_id,
                list_id,
                position as i64,
            )
            .map_err(failed(Operation::Create, "directory list reference", &label))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enrich_fills_name_and_id_from_path() {
        let doc = Document::default();
        let hints = ImportHints {
            source_path: Some(PathBuf::from("/etc/sync/Platform Repos.yaml")),
        };
        let enriched = enrich_document(&doc, &hints);
        assert_eq!(enriched.name, "Platform Repos");
        assert_eq!(enriched.id, "platform-repos");
    }

    #[test]
    fn test_enrich_keeps_explicit_values() {
        let doc = Document {
            id: "main".into(),
            name: "Main".into(),
            ..Default::default()
        };
        let hints = ImportHints {
            source_path: Some(PathBuf::from("other.yaml")),
        };
        assert_eq!(enrich_document(&doc, &hints), doc);
        assert_eq!(enrich_document(&Document::default(), &ImportHints::default()).id, "");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Hello, World!  "), "hello-world");
        assert_eq!(slugify("a--b"), "a-b");
        assert_eq!(slugify("***"), "");
    }
}
