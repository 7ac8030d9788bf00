//! Typed query helpers for documents, groups and targets.
//!
//! Free functions take a `&Connection` so the import pipeline can call them
//! inside its transaction. Administrative operations that stand on their own
//! are methods on [`Database`].

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::mappings::{self, ListTable, Owner};
use super::{decode_json, encode_json, now, parse_datetime, Database};
use crate::errors::DatabaseError;
use crate::models::{
    Defaults, DeleteMode, GlobalSettings, Group, Metadata, Source, StoredDocument, Target,
};

// ---------------------------------------------------------------------------
// Row structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `documents` table.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
    pub metadata: Metadata,
}

impl DocumentRow {
    pub fn into_stored(self) -> StoredDocument {
        StoredDocument {
            id: self.id,
            external_id: self.external_id,
            name: self.name,
            version: self.version,
            created_at: parse_datetime(&self.created_at),
            updated_at: parse_datetime(&self.updated_at),
            metadata: self.metadata,
        }
    }
}

/// A row from the `sync_groups` table.
#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: i64,
    pub document_id: i64,
    pub external_id: String,
    pub name: String,
    pub description: String,
    pub priority: i64,
    pub enabled: Option<bool>,
    pub position: i64,
    pub deleted_at: Option<String>,
}

/// A row from `group_dependencies`.
#[derive(Debug, Clone)]
pub struct DependencyRow {
    pub depends_on: String,
    pub position: i64,
}

/// A row from `targets`, with the repository name resolved.
#[derive(Debug, Clone)]
pub struct TargetRow {
    pub id: i64,
    pub group_id: i64,
    pub repo: String,
    pub branch: String,
    pub blob_size_limit: String,
    pub security_email: String,
    pub support_email: String,
    pub pr_labels: Vec<String>,
    pub pr_assignees: Vec<String>,
    pub pr_reviewers: Vec<String>,
    pub pr_team_reviewers: Vec<String>,
    pub position: i64,
}

/// A row from `target_file_list_refs` or `target_directory_list_refs`.
#[derive(Debug, Clone)]
pub struct ListRefRow {
    pub list_id: i64,
    pub position: i64,
}

/// Tables whose rows carry a `metadata` column, for [`Database::get_metadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityTable {
    Documents,
    Groups,
    Targets,
    FileLists,
    DirectoryLists,
    Repos,
}

impl EntityTable {
    fn table(&self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Groups => "sync_groups",
            Self::Targets => "targets",
            Self::FileLists => "file_lists",
            Self::DirectoryLists => "directory_lists",
            Self::Repos => "repos",
        }
    }
}

// ---------------------------------------------------------------------------
// documents
// ---------------------------------------------------------------------------

const DOCUMENT_COLUMNS: &str =
    "id, external_id, name, version, created_at, updated_at, deleted_at, metadata";

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok(DocumentRow {
        id: row.get(0)?,
        external_id: row.get(1)?,
        name: row.get(2)?,
        version: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        deleted_at: row.get(6)?,
        metadata: decode_json(row, 7)?,
    })
}

/// Find a document by external id, including soft-deleted rows.
pub fn find_document(
    conn: &Connection,
    external_id: &str,
) -> Result<Option<DocumentRow>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE external_id = ?1"),
            params![external_id],
            row_to_document,
        )
        .optional()?;
    Ok(row)
}

/// Find a live document by surrogate id.
pub fn get_document(conn: &Connection, id: i64) -> Result<Option<DocumentRow>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1 AND deleted_at IS NULL"
            ),
            params![id],
            row_to_document,
        )
        .optional()?;
    Ok(row)
}

/// Insert a document root and return its id.
pub fn insert_document(
    conn: &Connection,
    external_id: &str,
    name: &str,
    version: i64,
    metadata: &Metadata,
) -> Result<i64, DatabaseError> {
    let metadata = encode_json("metadata", metadata)?;
    conn.execute(
        "INSERT INTO documents (external_id, name, version, created_at, updated_at, metadata)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
        params![external_id, name, version, now(), metadata],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, external_id, "inserted document");
    Ok(id)
}

/// Update a document root in place and clear any soft-delete marker.
pub fn update_document(
    conn: &Connection,
    id: i64,
    name: &str,
    version: i64,
    metadata: &Metadata,
) -> Result<(), DatabaseError> {
    let metadata = encode_json("metadata", metadata)?;
    let changed = conn.execute(
        "UPDATE documents SET name = ?1, version = ?2, metadata = ?3, updated_at = ?4,
         deleted_at = NULL WHERE id = ?5",
        params![name, version, metadata, now(), id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "document".into(),
            id: id.to_string(),
        });
    }
    debug!(id, "updated document");
    Ok(())
}

/// Delete a document and everything it owns.
pub fn hard_delete_document(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    for group in all_groups(conn, id)? {
        hard_delete_group(conn, group.id)?;
    }
    for table in [ListTable::Files, ListTable::Directories] {
        for list in mappings::all_lists(conn, table, id)? {
            mappings::hard_delete_list(conn, table, list.id)?;
        }
    }
    conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
    debug!(id, "deleted document");
    Ok(())
}

// ---------------------------------------------------------------------------
// groups
// ---------------------------------------------------------------------------

const GROUP_COLUMNS: &str =
    "id, document_id, external_id, name, description, priority, enabled, position, deleted_at";

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupRow> {
    Ok(GroupRow {
        id: row.get(0)?,
        document_id: row.get(1)?,
        external_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        priority: row.get(5)?,
        enabled: row.get(6)?,
        position: row.get(7)?,
        deleted_at: row.get(8)?,
    })
}

/// Find a group by its store-wide external id, including soft-deleted rows.
pub fn find_group(conn: &Connection, external_id: &str) -> Result<Option<GroupRow>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM sync_groups WHERE external_id = ?1"),
            params![external_id],
            row_to_group,
        )
        .optional()?;
    Ok(row)
}

/// Find a live group of a given document.
pub fn find_live_group(
    conn: &Connection,
    document_id: i64,
    external_id: &str,
) -> Result<Option<GroupRow>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {GROUP_COLUMNS} FROM sync_groups
                 WHERE document_id = ?1 AND external_id = ?2 AND deleted_at IS NULL"
            ),
            params![document_id, external_id],
            row_to_group,
        )
        .optional()?;
    Ok(row)
}

/// Live groups of a document, ordered by position.
pub fn list_groups(conn: &Connection, document_id: i64) -> Result<Vec<GroupRow>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GROUP_COLUMNS} FROM sync_groups
         WHERE document_id = ?1 AND deleted_at IS NULL ORDER BY position, id"
    ))?;
    let rows = stmt
        .query_map(params![document_id], row_to_group)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every group row of a document, live or soft-deleted.
pub fn all_groups(conn: &Connection, document_id: i64) -> Result<Vec<GroupRow>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GROUP_COLUMNS} FROM sync_groups WHERE document_id = ?1 ORDER BY position, id"
    ))?;
    let rows = stmt
        .query_map(params![document_id], row_to_group)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Insert a group row and return its id.
pub fn insert_group(
    conn: &Connection,
    document_id: i64,
    group: &Group,
    position: i64,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO sync_groups (document_id, external_id, name, description, priority, enabled,
         position, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            document_id,
            group.id,
            group.name,
            group.description,
            group.priority,
            group.enabled,
            position,
            now()
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, external_id = %group.id, "inserted group");
    Ok(id)
}

/// Update a group row in place and clear any soft-delete marker.
pub fn update_group(
    conn: &Connection,
    id: i64,
    group: &Group,
    position: i64,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE sync_groups SET name = ?1, description = ?2, priority = ?3, enabled = ?4,
         position = ?5, updated_at = ?6, deleted_at = NULL WHERE id = ?7",
        params![
            group.name,
            group.description,
            group.priority,
            group.enabled,
            position,
            now(),
            id
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: "group".into(),
            id: id.to_string(),
        });
    }
    debug!(id, external_id = %group.id, "updated group");
    Ok(())
}

/// Delete a group and everything it owns. Singletons and dependencies go
/// through the foreign-key cascade; targets are purged explicitly so their
/// polymorphic children go too.
pub fn hard_delete_group(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    delete_targets_for_group(conn, id)?;
    conn.execute("DELETE FROM sync_groups WHERE id = ?1", params![id])?;
    debug!(id, "deleted group");
    Ok(())
}

// ---------------------------------------------------------------------------
// group singletons
// ---------------------------------------------------------------------------

/// Insert or update the source row of a group.
pub fn upsert_group_source(
    conn: &Connection,
    group_id: i64,
    repo_id: i64,
    source: &Source,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO group_sources (group_id, repo_id, branch, blob_size_limit, security_email,
         support_email, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT (group_id) DO UPDATE SET
             repo_id = excluded.repo_id,
             branch = excluded.branch,
             blob_size_limit = excluded.blob_size_limit,
             security_email = excluded.security_email,
             support_email = excluded.support_email,
             updated_at = excluded.updated_at",
        params![
            group_id,
            repo_id,
            source.branch,
            source.blob_size_limit,
            source.security_email,
            source.support_email,
            now()
        ],
    )?;
    Ok(())
}

pub fn get_group_source(conn: &Connection, group_id: i64) -> Result<Option<Source>, DatabaseError> {
    let source = conn
        .query_row(
            "SELECT o.name || '/' || r.name, s.branch, s.blob_size_limit, s.security_email,
             s.support_email FROM group_sources s
             JOIN repos r ON r.id = s.repo_id
             JOIN organizations o ON o.id = r.organization_id
             WHERE s.group_id = ?1",
            params![group_id],
            |row| {
                Ok(Source {
                    repo: row.get(0)?,
                    branch: row.get(1)?,
                    blob_size_limit: row.get(2)?,
                    security_email: row.get(3)?,
                    support_email: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(source)
}

/// Insert or update the global PR settings of a group.
pub fn upsert_group_global(
    conn: &Connection,
    group_id: i64,
    global: &GlobalSettings,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO group_globals (group_id, pr_labels, pr_assignees, pr_reviewers,
         pr_team_reviewers, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT (group_id) DO UPDATE SET
             pr_labels = excluded.pr_labels,
             pr_assignees = excluded.pr_assignees,
             pr_reviewers = excluded.pr_reviewers,
             pr_team_reviewers = excluded.pr_team_reviewers,
             updated_at = excluded.updated_at",
        params![
            group_id,
            encode_json("pr_labels", &global.pr_labels)?,
            encode_json("pr_assignees", &global.pr_assignees)?,
            encode_json("pr_reviewers", &global.pr_reviewers)?,
            encode_json("pr_team_reviewers", &global.pr_team_reviewers)?,
            now()
        ],
    )?;
    Ok(())
}

pub fn get_group_global(
    conn: &Connection,
    group_id: i64,
) -> Result<Option<GlobalSettings>, DatabaseError> {
    let global = conn
        .query_row(
            "SELECT pr_labels, pr_assignees, pr_reviewers, pr_team_reviewers
             FROM group_globals WHERE group_id = ?1",
            params![group_id],
            |row| {
                Ok(GlobalSettings {
                    pr_labels: decode_json(row, 0)?,
                    pr_assignees: decode_json(row, 1)?,
                    pr_reviewers: decode_json(row, 2)?,
                    pr_team_reviewers: decode_json(row, 3)?,
                })
            },
        )
        .optional()?;
    Ok(global)
}

/// Insert or update the defaults row of a group.
pub fn upsert_group_defaults(
    conn: &Connection,
    group_id: i64,
    defaults: &Defaults,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO group_defaults (group_id, branch_prefix, pr_labels, pr_assignees,
         pr_reviewers, pr_team_reviewers, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT (group_id) DO UPDATE SET
             branch_prefix = excluded.branch_prefix,
             pr_labels = excluded.pr_labels,
             pr_assignees = excluded.pr_assignees,
             pr_reviewers = excluded.pr_reviewers,
             pr_team_reviewers = excluded.pr_team_reviewers,
             updated_at = excluded.updated_at",
        params![
            group_id,
            defaults.branch_prefix,
            encode_json("pr_labels", &defaults.pr_labels)?,
            encode_json("pr_assignees", &defaults.pr_assignees)?,
            encode_json("pr_reviewers", &defaults.pr_reviewers)?,
            encode_json("pr_team_reviewers", &defaults.pr_team_reviewers)?,
            now()
        ],
    )?;
    Ok(())
}

pub fn get_group_defaults(
    conn: &Connection,
    group_id: i64,
) -> Result<Option<Defaults>, DatabaseError> {
    let defaults = conn
        .query_row(
            "SELECT branch_prefix, pr_labels, pr_assignees, pr_reviewers, pr_team_reviewers
             FROM group_defaults WHERE group_id = ?1",
            params![group_id],
            |row| {
                Ok(Defaults {
                    branch_prefix: row.get(0)?,
                    pr_labels: decode_json(row, 1)?,
                    pr_assignees: decode_json(row, 2)?,
                    pr_reviewers: decode_json(row, 3)?,
                    pr_team_reviewers: decode_json(row, 4)?,
                })
            },
        )
        .optional()?;
    Ok(defaults)
}

// ---------------------------------------------------------------------------
// group_dependencies
// ---------------------------------------------------------------------------

pub fn insert_group_dependency(
    conn: &Connection,
    group_id: i64,
    depends_on: &str,
    position: i64,
) -> Result<i64, DatabaseError> {
    let ts = now();
    conn.execute(
        "INSERT INTO group_dependencies (group_id, depends_on, position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![group_id, depends_on, position, ts],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Dependencies of a group, ordered by position.
pub fn list_group_dependencies(
    conn: &Connection,
    group_id: i64,
) -> Result<Vec<DependencyRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT depends_on, position FROM group_dependencies
         WHERE group_id = ?1 AND deleted_at IS NULL ORDER BY position, id",
    )?;
    let rows = stmt
        .query_map(params![group_id], |row| {
            Ok(DependencyRow {
                depends_on: row.get(0)?,
                position: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn delete_group_dependencies(conn: &Connection, group_id: i64) -> Result<usize, DatabaseError> {
    let n = conn.execute(
        "DELETE FROM group_dependencies WHERE group_id = ?1",
        params![group_id],
    )?;
    Ok(n)
}

/// Remove every `dependsOn` entry of the document's groups that names
/// `depends_on`.
pub fn delete_dependencies_on(
    conn: &Connection,
    document_id: i64,
    depends_on: &str,
) -> Result<usize, DatabaseError> {
    let n = conn.execute(
        "DELETE FROM group_dependencies WHERE depends_on = ?1
         AND group_id IN (SELECT id FROM sync_groups WHERE document_id = ?2)",
        params![depends_on, document_id],
    )?;
    Ok(n)
}

// ---------------------------------------------------------------------------
// targets
// ---------------------------------------------------------------------------

/// Insert a target row (not its children) and return its id.
pub fn insert_target(
    conn: &Connection,
    group_id: i64,
    repo_id: i64,
    target: &Target,
    position: i64,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO targets (group_id, repo_id, branch, blob_size_limit, security_email,
         support_email, pr_labels, pr_assignees, pr_reviewers, pr_team_reviewers, position,
         created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            group_id,
            repo_id,
            target.branch,
            target.blob_size_limit,
            target.security_email,
            target.support_email,
            encode_json("pr_labels", &target.pr_labels)?,
            encode_json("pr_assignees", &target.pr_assignees)?,
            encode_json("pr_reviewers", &target.pr_reviewers)?,
            encode_json("pr_team_reviewers", &target.pr_team_reviewers)?,
            position,
            now()
        ],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, group_id, repo = %target.repo, "inserted target");
    Ok(id)
}

/// Targets of a group, ordered by position.
pub fn list_targets(conn: &Connection, group_id: i64) -> Result<Vec<TargetRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.group_id, o.name || '/' || r.name, t.branch, t.blob_size_limit,
         t.security_email, t.support_email, t.pr_labels, t.pr_assignees, t.pr_reviewers,
         t.pr_team_reviewers, t.position
         FROM targets t
         JOIN repos r ON r.id = t.repo_id
         JOIN organizations o ON o.id = r.organization_id
         WHERE t.group_id = ?1 AND t.deleted_at IS NULL
         ORDER BY t.position, t.id",
    )?;
    let rows = stmt
        .query_map(params![group_id], |row| {
            Ok(TargetRow {
                id: row.get(0)?,
                group_id: row.get(1)?,
                repo: row.get(2)?,
                branch: row.get(3)?,
                blob_size_limit: row.get(4)?,
                security_email: row.get(5)?,
                support_email: row.get(6)?,
                pr_labels: decode_json(row, 7)?,
                pr_assignees: decode_json(row, 8)?,
                pr_reviewers: decode_json(row, 9)?,
                pr_team_reviewers: decode_json(row, 10)?,
                position: row.get(11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete every target of a group with its mappings, transform and list
/// references. Returns the number of targets removed.
pub fn delete_targets_for_group(conn: &Connection, group_id: i64) -> Result<usize, DatabaseError> {
    let ids: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT id FROM targets WHERE group_id = ?1")?;
        let ids = stmt
            .query_map(params![group_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };
    for &id in &ids {
        let owner = Owner::target(id);
        mappings::delete_file_mappings(conn, owner)?;
        mappings::delete_directory_mappings(conn, owner)?;
        mappings::delete_transform(conn, owner)?;
    }
    conn.execute("DELETE FROM targets WHERE group_id = ?1", params![group_id])?;
    debug!(group_id, count = ids.len(), "deleted targets");
    Ok(ids.len())
}

// ---------------------------------------------------------------------------
// list references
// ---------------------------------------------------------------------------

fn ref_table(table: ListTable) -> (&'static str, &'static str) {
    match table {
        ListTable::Files => ("target_file_list_refs", "file_list_id"),
        ListTable::Directories => ("target_directory_list_refs", "directory_list_id"),
    }
}

/// Link a target to a list at `position`.
pub fn insert_list_ref(
    conn: &Connection,
    table: ListTable,
    target_id: i64,
    list_id: i64,
    position: i64,
) -> Result<(), DatabaseError> {
    let (ref_table, column) = ref_table(table);
    conn.execute(
        &format!(
            "INSERT INTO {ref_table} (target_id, {column}, position, created_at)
             VALUES (?1, ?2, ?3, ?4)"
        ),
        params![target_id, list_id, position, now()],
    )?;
    Ok(())
}

/// List references of a target, ordered by position.
pub fn list_list_refs(
    conn: &Connection,
    table: ListTable,
    target_id: i64,
) -> Result<Vec<ListRefRow>, DatabaseError> {
    let (ref_table, column) = ref_table(table);
    let mut stmt = conn.prepare(&format!(
        "SELECT {column}, position FROM {ref_table} WHERE target_id = ?1 ORDER BY position, id"
    ))?;
    let rows = stmt
        .query_map(params![target_id], |row| {
            Ok(ListRefRow {
                list_id: row.get(0)?,
                position: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Administrative operations
// ---------------------------------------------------------------------------

impl Database {
    /// All live documents, ordered by external id.
    pub fn list_documents(&self) -> Result<Vec<StoredDocument>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE deleted_at IS NULL
             ORDER BY external_id"
        ))?;
        let docs = stmt
            .query_map([], row_to_document)?
            .map(|r| r.map(DocumentRow::into_stored))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(docs)
    }

    /// Delete a document by external id.
    pub fn delete_document(&self, external_id: &str, mode: DeleteMode) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            let doc = find_document(conn, external_id)?
                .filter(|d| d.deleted_at.is_none())
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "document".into(),
                    id: external_id.to_string(),
                })?;
            match mode {
                DeleteMode::Soft => {
                    conn.execute(
                        "UPDATE documents SET deleted_at = ?1 WHERE id = ?2",
                        params![now(), doc.id],
                    )?;
                }
                DeleteMode::Hard => hard_delete_document(conn, doc.id)?,
            }
            info!(external_id, %mode, "deleted document");
            Ok(())
        })
    }

    /// Delete a group by external id.
    pub fn delete_group(&self, external_id: &str, mode: DeleteMode) -> Result<(), DatabaseError> {
        self.transaction(|conn| {
            let group = find_group(conn, external_id)?
                .filter(|g| g.deleted_at.is_none())
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "group".into(),
                    id: external_id.to_string(),
                })?;
            match mode {
                DeleteMode::Soft => {
                    conn.execute(
                        "UPDATE sync_groups SET deleted_at = ?1 WHERE id = ?2",
                        params![now(), group.id],
                    )?;
                }
                DeleteMode::Hard => hard_delete_group(conn, group.id)?,
            }
            let dropped = delete_dependencies_on(conn, group.document_id, external_id)?;
            info!(external_id, %mode, dropped_dependencies = dropped, "deleted group");
            Ok(())
        })
    }

    /// Read the metadata of any entity row.
    pub fn get_metadata(&self, table: EntityTable, id: i64) -> Result<Metadata, DatabaseError> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT metadata FROM {} WHERE id = ?1", table.table()),
            params![id],
            |row| decode_json(row, 0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity: table.table().into(),
                id: id.to_string(),
            },
            other => other.into(),
        })
    }

    /// Replace the metadata of any entity row.
    pub fn set_metadata(
        &self,
        table: EntityTable,
        id: i64,
        metadata: &Metadata,
    ) -> Result<(), DatabaseError> {
        let encoded = encode_json("metadata", metadata)?;
        let conn = self.conn();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET metadata = ?1, updated_at = ?2 WHERE id = ?3",
                table.table()
            ),
            params![encoded, now(), id],
        )?;
        if changed == 0 {
            return Err(DatabaseError::NotFound {
                entity: table.table().into(),
                id: id.to_string(),
            });
        }
        debug!(table = table.table(), id, "set metadata");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repos;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn repo_id(conn: &Connection) -> i64 {
        let client = repos::insert_client(conn, "default").unwrap();
        let org = repos::insert_organization(conn, client, "acme").unwrap();
        repos::insert_repo(conn, org, "template").unwrap()
    }

    #[test]
    fn test_document_crud() {
        let db = setup_db();
        let conn = db.conn();
        let mut metadata = Metadata::new();
        metadata.insert("owner".into(), "platform".into());

        let id = insert_document(&conn, "main", "Main", 1, &metadata).unwrap();
        let row = find_document(&conn, "main").unwrap().unwrap();
        assert_eq!(row.id, id);
        assert_eq!(row.metadata, metadata);

        update_document(&conn, id, "Renamed", 2, &Metadata::new()).unwrap();
        let row = get_document(&conn, id).unwrap().unwrap();
        assert_eq!(row.name, "Renamed");
        assert_eq!(row.version, 2);
        assert!(row.metadata.is_empty());

        assert!(matches!(
            update_document(&conn, 999, "x", 1, &Metadata::new()),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn test_group_singletons_update_in_place() {
        let db = setup_db();
        let conn = db.conn();
        let doc = insert_document(&conn, "main", "Main", 1, &Metadata::new()).unwrap();
        let repo = repo_id(&conn);

        let group = Group {
            id: "core".into(),
            name: "Core".into(),
            enabled: Some(false),
            ..Default::default()
        };
        let gid = insert_group(&conn, doc, &group, 0).unwrap();

        let mut source = Source {
            repo: "acme/template".into(),
            branch: "main".into(),
            ..Default::default()
        };
        upsert_group_source(&conn, gid, repo, &source).unwrap();
        let first_id: i64 = conn
            .query_row("SELECT id FROM group_sources WHERE group_id = ?1", [gid], |r| r.get(0))
            .unwrap();

        source.branch = "develop".into();
        upsert_group_source(&conn, gid, repo, &source).unwrap();
        let second_id: i64 = conn
            .query_row("SELECT id FROM group_sources WHERE group_id = ?1", [gid], |r| r.get(0))
            .unwrap();
        assert_eq!(first_id, second_id);
        assert_eq!(get_group_source(&conn, gid).unwrap(), Some(source));

        let global = GlobalSettings {
            pr_labels: vec!["sync".into()],
            ..Default::default()
        };
        upsert_group_global(&conn, gid, &global).unwrap();
        assert_eq!(get_group_global(&conn, gid).unwrap(), Some(global));

        let defaults = Defaults {
            branch_prefix: "chore/sync".into(),
            pr_reviewers: vec!["alice".into()],
            ..Default::default()
        };
        upsert_group_defaults(&conn, gid, &defaults).unwrap();
        assert_eq!(get_group_defaults(&conn, gid).unwrap(), Some(defaults));

        let row = find_group(&conn, "core").unwrap().unwrap();
        assert_eq!(row.enabled, Some(false));
    }

    #[test]
    fn test_hard_delete_group_purges_polymorphic_children() {
        let db = setup_db();
        let conn = db.conn();
        let doc = insert_document(&conn, "main", "Main", 1, &Metadata::new()).unwrap();
        let repo = repo_id(&conn);
        let gid = insert_group(&conn, doc, &Group { id: "g".into(), ..Default::default() }, 0)
            .unwrap();
        let target = Target {
            repo: "acme/template".into(),
            ..Default::default()
        };
        let tid = insert_target(&conn, gid, repo, &target, 0).unwrap();
        let mapping = crate::models::FileMapping {
            src: "a".into(),
            dest: "a".into(),
            delete: false,
        };
        mappings::insert_file_mapping(&conn, Owner::target(tid), &mapping, 0).unwrap();
        insert_group_dependency(&conn, gid, "other", 0).unwrap();

        hard_delete_group(&conn, gid).unwrap();

        let count = |sql: &str| -> i64 { conn.query_row(sql, [], |r| r.get(0)).unwrap() };
        assert_eq!(count("SELECT COUNT(*) FROM targets"), 0);
        assert_eq!(count("SELECT COUNT(*) FROM file_mappings"), 0);
        assert_eq!(count("SELECT COUNT(*) FROM group_dependencies"), 0);
        assert_eq!(count("SELECT COUNT(*) FROM sync_groups"), 0);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let db = setup_db();
        let id = insert_document(&db.conn(), "main", "Main", 1, &Metadata::new()).unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("ticket".into(), serde_json::json!({"id": 42}));
        db.set_metadata(EntityTable::Documents, id, &metadata).unwrap();
        assert_eq!(db.get_metadata(EntityTable::Documents, id).unwrap(), metadata);

        assert!(matches!(
            db.get_metadata(EntityTable::Groups, 1),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn test_soft_delete_hides_document() {
        let db = setup_db();
        insert_document(&db.conn(), "main", "Main", 1, &Metadata::new()).unwrap();
        assert_eq!(db.list_documents().unwrap().len(), 1);

        db.delete_document("main", DeleteMode::Soft).unwrap();
        assert!(db.list_documents().unwrap().is_empty());
        assert!(find_document(&db.conn(), "main").unwrap().unwrap().deleted_at.is_some());

        assert!(matches!(
            db.delete_document("main", DeleteMode::Hard),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
