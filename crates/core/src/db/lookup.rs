//! Read-only search queries across stored documents.
//!
//! Every query skips soft-deleted documents, groups, targets and lists.

use rusqlite::params;
use tracing::debug;

use super::mappings::{ListTable, OwnerKind};
use super::Database;
use crate::convert::repo_names::parse_repo_name;
use crate::errors::{DatabaseError, StoreError};
use crate::models::FileMapping;
use crate::validation::validate_glob;

/// A target found by a lookup, with enough context to locate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUsage {
    pub document_id: i64,
    pub document: String,
    pub group: String,
    pub target_id: i64,
    pub repo: String,
    pub branch: String,
    pub position: i64,
}

/// Who owns a matched file mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingOwner {
    Target {
        group: String,
        repo: String,
        target_id: i64,
    },
    FileList {
        list: String,
    },
}

/// A file mapping whose source or destination matched a glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMappingMatch {
    pub document: String,
    pub owner: MappingOwner,
    pub position: i64,
    pub mapping: FileMapping,
}

const TARGET_USAGE_SELECT: &str = "SELECT d.id, d.external_id, g.external_id, t.id,
    o.name || '/' || r.name, t.branch, t.position
    FROM targets t
    JOIN sync_groups g ON g.id = t.group_id
    JOIN documents d ON d.id = g.document_id
    JOIN repos r ON r.id = t.repo_id
    JOIN organizations o ON o.id = r.organization_id";

const LIVE: &str = "t.deleted_at IS NULL AND g.deleted_at IS NULL AND d.deleted_at IS NULL";

fn row_to_usage(row: &rusqlite::Row<'_>) -> rusqlite::Result<TargetUsage> {
    Ok(TargetUsage {
        document_id: row.get(0)?,
        document: row.get(1)?,
        group: row.get(2)?,
        target_id: row.get(3)?,
        repo: row.get(4)?,
        branch: row.get(5)?,
        position: row.get(6)?,
    })
}

impl Database {
    /// Every live target syncing into `repo` (`organization/repository`).
    pub fn targets_for_repo(&self, repo: &str) -> Result<Vec<TargetUsage>, StoreError> {
        let (org, name) = parse_repo_name(repo)?;
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "{TARGET_USAGE_SELECT} WHERE o.name = ?1 AND r.name = ?2 AND {LIVE}
                 ORDER BY d.external_id, g.position, t.position"
            ))
            .map_err(DatabaseError::from)?;
        let rows = stmt
            .query_map(params![org, name], row_to_usage)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(DatabaseError::from)?;
        debug!(repo, count = rows.len(), "looked up targets for repo");
        Ok(rows)
    }

    /// Live targets of a document that reference the file list `list`.
    pub fn targets_using_file_list(
        &self,
        document: &str,
        list: &str,
    ) -> Result<Vec<TargetUsage>, StoreError> {
        self.targets_using_list(ListTable::Files, document, list)
    }

    /// Live targets of a document that reference the directory list `list`.
    pub fn targets_using_directory_list(
        &self,
        document: &str,
        list: &str,
    ) -> Result<Vec<TargetUsage>, StoreError> {
        self.targets_using_list(ListTable::Directories, document, list)
    }

    fn targets_using_list(
        &self,
        table: ListTable,
        document: &str,
        list: &str,
    ) -> Result<Vec<TargetUsage>, StoreError> {
        let (list_table, ref_table, column) = match table {
            ListTable::Files => ("file_lists", "target_file_list_refs", "file_list_id"),
            ListTable::Directories => (
                "directory_lists",
                "target_directory_list_refs",
                "directory_list_id",
            ),
        };
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "{TARGET_USAGE_SELECT}
                 JOIN {ref_table} lr ON lr.target_id = t.id
                 JOIN {list_table} l ON l.id = lr.{column}
                 WHERE d.external_id = ?1 AND l.external_id = ?2 AND l.deleted_at IS NULL
                 AND {LIVE}
                 ORDER BY g.position, t.position"
            ))
            .map_err(DatabaseError::from)?;
        let rows = stmt
            .query_map(params![document, list], row_to_usage)
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(DatabaseError::from)?;
        debug!(
            document,
            list,
            kind = table.entity(),
            count = rows.len(),
            "looked up list usage"
        );
        Ok(rows)
    }

    /// Every live file mapping, inline or in a file list, whose source or
    /// destination path matches `pattern`.
    pub fn file_mappings_matching(&self, pattern: &str) -> Result<Vec<FileMappingMatch>, StoreError> {
        validate_glob("lookup", "pattern", pattern)?;
        let pattern = pattern.replace('\\', "/");
        let matches = |path: &str| {
            !path.is_empty() && glob_match::glob_match(&pattern, &path.replace('\\', "/"))
        };

        let conn = self.conn();
        let mut found = Vec::new();

        let mut stmt = conn
            .prepare(
                "SELECT d.external_id, g.external_id, o.name || '/' || r.name, t.id,
                 m.position, m.src, m.dest, m.delete_flag
                 FROM file_mappings m
                 JOIN targets t ON m.owner_kind = ?1 AND t.id = m.owner_id
                 JOIN sync_groups g ON g.id = t.group_id
                 JOIN documents d ON d.id = g.document_id
                 JOIN repos r ON r.id = t.repo_id
                 JOIN organizations o ON o.id = r.organization_id
                 WHERE m.deleted_at IS NULL AND t.deleted_at IS NULL
                 AND g.deleted_at IS NULL AND d.deleted_at IS NULL
                 ORDER BY d.external_id, g.position, t.position, m.position",
            )
            .map_err(DatabaseError::from)?;
        let inline = stmt
            .query_map(params![OwnerKind::Target.as_str()], |row| {
                Ok(FileMappingMatch {
                    document: row.get(0)?,
                    owner: MappingOwner::Target {
                        group: row.get(1)?,
                        repo: row.get(2)?,
                        target_id: row.get(3)?,
                    },
                    position: row.get(4)?,
                    mapping: FileMapping {
                        src: row.get(5)?,
                        dest: row.get(6)?,
                        delete: row.get(7)?,
                    },
                })
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(DatabaseError::from)?;
        found.extend(inline);

        let mut stmt = conn
            .prepare(
                "SELECT d.external_id, l.external_id, m.position, m.src, m.dest, m.delete_flag
                 FROM file_mappings m
                 JOIN file_lists l ON m.owner_kind = ?1 AND l.id = m.owner_id
                 JOIN documents d ON d.id = l.document_id
                 WHERE m.deleted_at IS NULL AND l.deleted_at IS NULL AND d.deleted_at IS NULL
                 ORDER BY d.external_id, l.position, m.position",
            )
            .map_err(DatabaseError::from)?;
        let listed = stmt
            .query_map(params![OwnerKind::FileList.as_str()], |row| {
                Ok(FileMappingMatch {
                    document: row.get(0)?,
                    owner: MappingOwner::FileList { list: row.get(1)? },
                    position: row.get(2)?,
                    mapping: FileMapping {
                        src: row.get(3)?,
                        dest: row.get(4)?,
                        delete: row.get(5)?,
                    },
                })
            })
            .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
            .map_err(DatabaseError::from)?;
        found.extend(listed);

        found.retain(|m| matches(&m.mapping.src) || matches(&m.mapping.dest));
        debug!(pattern = %pattern, count = found.len(), "looked up file mappings");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Converter;
    use crate::models::{DeleteMode, Document, FileList, Group, Source, Target};

    fn fixture() -> Document {
        Document {
            version: 1,
            id: "main".into(),
            name: "Main".into(),
            file_lists: vec![FileList {
                id: "shared".into(),
                name: "Shared".into(),
                files: vec![FileMapping {
                    src: "ci/build.yml".into(),
                    dest: ".github/workflows/build.yml".into(),
                    delete: false,
                }],
                ..Default::default()
            }],
            groups: vec![Group {
                id: "core".into(),
                name: "Core".into(),
                source: Source {
                    repo: "acme/template".into(),
                    ..Default::default()
                },
                targets: vec![
                    Target {
                        repo: "acme/web".into(),
                        branch: "main".into(),
                        file_list_refs: vec!["shared".into()],
                        files: vec![FileMapping {
                            src: "README.md".into(),
                            dest: "README.md".into(),
                            delete: false,
                        }],
                        ..Default::default()
                    },
                    Target {
                        repo: "acme/api".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn setup() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        Converter::new(&db).import(&fixture()).unwrap();
        db
    }

    #[test]
    fn test_targets_for_repo() {
        let db = setup();
        let found = db.targets_for_repo("acme/web").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].group, "core");
        assert_eq!(found[0].branch, "main");
        assert_eq!(found[0].position, 0);

        assert!(db.targets_for_repo("acme/unknown").unwrap().is_empty());
        assert!(matches!(
            db.targets_for_repo("not-a-repo"),
            Err(StoreError::InvalidRepoFormat(_))
        ));
    }

    #[test]
    fn test_targets_using_file_list() {
        let db = setup();
        let found = db.targets_using_file_list("main", "shared").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].repo, "acme/web");
        assert!(db.targets_using_directory_list("main", "shared").unwrap().is_empty());
    }

    #[test]
    fn test_file_mappings_matching() {
        let db = setup();
        let found = db.file_mappings_matching("**/*.yml").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].owner,
            MappingOwner::FileList {
                list: "shared".into()
            }
        );

        let found = db.file_mappings_matching("README*").unwrap();
        assert_eq!(found.len(), 1);
        assert!(matches!(found[0].owner, MappingOwner::Target { .. }));

        assert!(db.file_mappings_matching("[broken").is_err());
    }

    #[test]
    fn test_lookups_skip_soft_deleted_groups() {
        let db = setup();
        db.delete_group("core", DeleteMode::Soft).unwrap();
        assert!(db.targets_for_repo("acme/web").unwrap().is_empty());
        assert!(db.targets_using_file_list("main", "shared").unwrap().is_empty());
        assert!(db
            .file_mappings_matching("README*")
            .unwrap()
            .is_empty());
    }
}
