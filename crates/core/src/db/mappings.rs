//! Reusable lists and polymorphically owned rows.
//!
//! File mappings, directory mappings and transforms do not have a fixed
//! parent table. Each row names its owner through an [`Owner`], the pair
//! `(owner_kind, owner_id)`, and every query filters by that pair.

use std::fmt;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{decode_json, decode_json_opt, encode_json, now};
use crate::errors::DatabaseError;
use crate::models::{DirectoryMapping, FileMapping, ModuleConfig, Transform};

// ---------------------------------------------------------------------------
// Ownership
// ---------------------------------------------------------------------------

/// The entity kind that owns a polymorphic row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    Target,
    FileList,
    DirectoryList,
    DirectoryMapping,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::FileList => "file_list",
            Self::DirectoryList => "directory_list",
            Self::DirectoryMapping => "directory_mapping",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged owner of a polymorphic row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    pub kind: OwnerKind,
    pub id: i64,
}

impl Owner {
    pub fn target(id: i64) -> Self {
        Self {
            kind: OwnerKind::Target,
            id,
        }
    }

    pub fn file_list(id: i64) -> Self {
        Self {
            kind: OwnerKind::FileList,
            id,
        }
    }

    pub fn directory_list(id: i64) -> Self {
        Self {
            kind: OwnerKind::DirectoryList,
            id,
        }
    }

    pub fn directory_mapping(id: i64) -> Self {
        Self {
            kind: OwnerKind::DirectoryMapping,
            id,
        }
    }
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

/// Which reusable list table a call addresses. Both tables share a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListTable {
    Files,
    Directories,
}

impl ListTable {
    fn table(&self) -> &'static str {
        match self {
            Self::Files => "file_lists",
            Self::Directories => "directory_lists",
        }
    }

    /// The owner tag this list's mappings carry.
    pub fn owner(&self, list_id: i64) -> Owner {
        match self {
            Self::Files => Owner::file_list(list_id),
            Self::Directories => Owner::directory_list(list_id),
        }
    }

    pub fn entity(&self) -> &'static str {
        match self {
            Self::Files => "file list",
            Self::Directories => "directory list",
        }
    }
}

/// A row from `file_lists` or `directory_lists`.
#[derive(Debug, Clone)]
pub struct ListRow {
    pub id: i64,
    pub document_id: i64,
    pub external_id: String,
    pub name: String,
    pub description: String,
    pub position: i64,
    pub deleted_at: Option<String>,
}

fn row_to_list(row: &rusqlite::Row<'_>) -> rusqlite::Result<ListRow> {
    Ok(ListRow {
        id: row.get(0)?,
        document_id: row.get(1)?,
        external_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        position: row.get(5)?,
        deleted_at: row.get(6)?,
    })
}

const LIST_COLUMNS: &str =
    "id, document_id, external_id, name, description, position, deleted_at";

/// Find a list of a document by external id, including soft-deleted rows.
pub fn find_list(
    conn: &Connection,
    table: ListTable,
    document_id: i64,
    external_id: &str,
) -> Result<Option<ListRow>, DatabaseError> {
    let sql = format!(
        "SELECT {LIST_COLUMNS} FROM {} WHERE document_id = ?1 AND external_id = ?2",
        table.table()
    );
    let row = conn
        .query_row(&sql, params![document_id, external_id], row_to_list)
        .optional()?;
    Ok(row)
}

/// Insert a list and return its id.
pub fn insert_list(
    conn: &Connection,
    table: ListTable,
    document_id: i64,
    external_id: &str,
    name: &str,
    description: &str,
    position: i64,
) -> Result<i64, DatabaseError> {
    let sql = format!(
        "INSERT INTO {} (document_id, external_id, name, description, position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        table.table()
    );
    conn.execute(
        &sql,
        params![document_id, external_id, name, description, position, now()],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, external_id, table = table.table(), "inserted list");
    Ok(id)
}

/// Update a list's attributes in place and clear any soft-delete marker.
pub fn update_list(
    conn: &Connection,
    table: ListTable,
    id: i64,
    name: &str,
    description: &str,
    position: i64,
) -> Result<(), DatabaseError> {
    let sql = format!(
        "UPDATE {} SET name = ?1, description = ?2, position = ?3, updated_at = ?4,
         deleted_at = NULL WHERE id = ?5",
        table.table()
    );
    let changed = conn.execute(&sql, params![name, description, position, now(), id])?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity: table.entity().into(),
            id: id.to_string(),
        });
    }
    debug!(id, table = table.table(), "updated list");
    Ok(())
}

/// Live lists of a document, ordered by position.
pub fn list_lists(
    conn: &Connection,
    table: ListTable,
    document_id: i64,
) -> Result<Vec<ListRow>, DatabaseError> {
    let sql = format!(
        "SELECT {LIST_COLUMNS} FROM {} WHERE document_id = ?1 AND deleted_at IS NULL
         ORDER BY position, id",
        table.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![document_id], row_to_list)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every list row of a document, live or soft-deleted.
pub fn all_lists(
    conn: &Connection,
    table: ListTable,
    document_id: i64,
) -> Result<Vec<ListRow>, DatabaseError> {
    let sql = format!(
        "SELECT {LIST_COLUMNS} FROM {} WHERE document_id = ?1 ORDER BY position, id",
        table.table()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![document_id], row_to_list)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete a list row and all the mappings it owns. References from targets
/// go with it through the foreign-key cascade.
pub fn hard_delete_list(conn: &Connection, table: ListTable, id: i64) -> Result<(), DatabaseError> {
    match table {
        ListTable::Files => delete_file_mappings(conn, table.owner(id))?,
        ListTable::Directories => delete_directory_mappings(conn, table.owner(id))?,
    };
    let sql = format!("DELETE FROM {} WHERE id = ?1", table.table());
    conn.execute(&sql, params![id])?;
    debug!(id, table = table.table(), "deleted list");
    Ok(())
}

// ---------------------------------------------------------------------------
// File mappings
// ---------------------------------------------------------------------------

/// A row from `file_mappings`.
#[derive(Debug, Clone)]
pub struct FileMappingRow {
    pub id: i64,
    pub owner: Owner,
    pub position: i64,
    pub mapping: FileMapping,
}

/// Insert a file mapping for `owner` at `position`.
pub fn insert_file_mapping(
    conn: &Connection,
    owner: Owner,
    mapping: &FileMapping,
    position: i64,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO file_mappings (owner_kind, owner_id, src, dest, delete_flag, position,
         created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            owner.kind.as_str(),
            owner.id,
            mapping.src,
            mapping.dest,
            mapping.delete,
            position,
            now()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// File mappings of `owner`, ordered by position.
pub fn list_file_mappings(
    conn: &Connection,
    owner: Owner,
) -> Result<Vec<FileMappingRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, src, dest, delete_flag, position FROM file_mappings
         WHERE owner_kind = ?1 AND owner_id = ?2 AND deleted_at IS NULL
         ORDER BY position, id",
    )?;
    let rows = stmt
        .query_map(params![owner.kind.as_str(), owner.id], |row| {
            Ok(FileMappingRow {
                id: row.get(0)?,
                owner,
                mapping: FileMapping {
                    src: row.get(1)?,
                    dest: row.get(2)?,
                    delete: row.get(3)?,
                },
                position: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Delete every file mapping of `owner`.
pub fn delete_file_mappings(conn: &Connection, owner: Owner) -> Result<usize, DatabaseError> {
    let n = conn.execute(
        "DELETE FROM file_mappings WHERE owner_kind = ?1 AND owner_id = ?2",
        params![owner.kind.as_str(), owner.id],
    )?;
    Ok(n)
}

// ---------------------------------------------------------------------------
// Directory mappings
// ---------------------------------------------------------------------------

/// A row from `directory_mappings`, with its transform attached.
#[derive(Debug, Clone)]
pub struct DirectoryMappingRow {
    pub id: i64,
    pub owner: Owner,
    pub position: i64,
    pub mapping: DirectoryMapping,
}

/// Insert a directory mapping (and its transform, if any) for `owner`.
pub fn insert_directory_mapping(
    conn: &Connection,
    owner: Owner,
    mapping: &DirectoryMapping,
    position: i64,
) -> Result<i64, DatabaseError> {
    let exclude = encode_json("exclude", &mapping.exclude)?;
    let include_only = encode_json("include_only", &mapping.include_only)?;
    let module = mapping
        .module
        .as_ref()
        .map(|m| encode_json("module", m))
        .transpose()?;
    conn.execute(
        "INSERT INTO directory_mappings (owner_kind, owner_id, src, dest, exclude, include_only,
         preserve_structure, include_hidden, delete_flag, module, position, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
        params![
            owner.kind.as_str(),
            owner.id,
            mapping.src,
            mapping.dest,
            exclude,
            include_only,
            mapping.preserve_structure,
            mapping.include_hidden,
            mapping.delete,
            module,
            position,
            now()
        ],
    )?;
    let id = conn.last_insert_rowid();
    if !mapping.transform.is_empty() {
        upsert_transform(conn, Owner::directory_mapping(id), &mapping.transform)?;
    }
    Ok(id)
}

/// Directory mappings of `owner`, ordered by position, transforms loaded.
pub fn list_directory_mappings(
    conn: &Connection,
    owner: Owner,
) -> Result<Vec<DirectoryMappingRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, src, dest, exclude, include_only, preserve_structure, include_hidden,
         delete_flag, module, position FROM directory_mappings
         WHERE owner_kind = ?1 AND owner_id = ?2 AND deleted_at IS NULL
         ORDER BY position, id",
    )?;
    let mut rows = stmt
        .query_map(params![owner.kind.as_str(), owner.id], |row| {
            let module: Option<ModuleConfig> = decode_json_opt(row, 8)?;
            Ok(DirectoryMappingRow {
                id: row.get(0)?,
                owner,
                mapping: DirectoryMapping {
                    src: row.get(1)?,
                    dest: row.get(2)?,
                    exclude: decode_json(row, 3)?,
                    include_only: decode_json(row, 4)?,
                    preserve_structure: row.get(5)?,
                    include_hidden: row.get(6)?,
                    delete: row.get(7)?,
                    module,
                    transform: Transform::default(),
                },
                position: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for row in &mut rows {
        if let Some(transform) = get_transform(conn, Owner::directory_mapping(row.id))? {
            row.mapping.transform = transform;
        }
    }
    Ok(rows)
}

/// Delete every directory mapping of `owner` together with their transforms.
pub fn delete_directory_mappings(conn: &Connection, owner: Owner) -> Result<usize, DatabaseError> {
    conn.execute(
        "DELETE FROM transforms WHERE owner_kind = 'directory_mapping' AND owner_id IN
         (SELECT id FROM directory_mappings WHERE owner_kind = ?1 AND owner_id = ?2)",
        params![owner.kind.as_str(), owner.id],
    )?;
    let n = conn.execute(
        "DELETE FROM directory_mappings WHERE owner_kind = ?1 AND owner_id = ?2",
        params![owner.kind.as_str(), owner.id],
    )?;
    Ok(n)
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

/// Insert or replace the single transform of `owner`.
pub fn upsert_transform(
    conn: &Connection,
    owner: Owner,
    transform: &Transform,
) -> Result<(), DatabaseError> {
    let variables = encode_json("variables", &transform.variables)?;
    conn.execute(
        "INSERT INTO transforms (owner_kind, owner_id, repo_name, variables, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT (owner_kind, owner_id) DO UPDATE SET
             repo_name = excluded.repo_name,
             variables = excluded.variables,
             updated_at = excluded.updated_at,
             deleted_at = NULL",
        params![owner.kind.as_str(), owner.id, transform.repo_name, variables, now()],
    )?;
    Ok(())
}

/// The transform of `owner`, if one is stored.
pub fn get_transform(conn: &Connection, owner: Owner) -> Result<Option<Transform>, DatabaseError> {
    let transform = conn
        .query_row(
            "SELECT repo_name, variables FROM transforms
             WHERE owner_kind = ?1 AND owner_id = ?2 AND deleted_at IS NULL",
            params![owner.kind.as_str(), owner.id],
            |row| {
                Ok(Transform {
                    repo_name: row.get(0)?,
                    variables: decode_json(row, 1)?,
                })
            },
        )
        .optional()?;
    Ok(transform)
}

pub fn delete_transform(conn: &Connection, owner: Owner) -> Result<usize, DatabaseError> {
    let n = conn.execute(
        "DELETE FROM transforms WHERE owner_kind = ?1 AND owner_id = ?2",
        params![owner.kind.as_str(), owner.id],
    )?;
    Ok(n)
}
