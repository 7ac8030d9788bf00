//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The SQLite
//! `user_version` pragma tracks which migrations have already been applied.
//!
//! Rows owned through a fixed parent use `ON DELETE CASCADE`. Mappings and
//! transforms are owned polymorphically through `(owner_kind, owner_id)`,
//! which no foreign key can express; the query layer deletes them
//! explicitly before deleting their owner.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "repository dimension",
        r#"
        CREATE TABLE IF NOT EXISTS clients (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT    NOT NULL UNIQUE,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL,
            deleted_at  TEXT,
            metadata    TEXT    NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS organizations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            client_id   INTEGER NOT NULL REFERENCES clients (id),
            name        TEXT    NOT NULL UNIQUE,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL,
            deleted_at  TEXT,
            metadata    TEXT    NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS repos (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id  INTEGER NOT NULL REFERENCES organizations (id),
            name             TEXT    NOT NULL,
            created_at       TEXT    NOT NULL,
            updated_at       TEXT    NOT NULL,
            deleted_at       TEXT,
            metadata         TEXT    NOT NULL DEFAULT '{}',
            UNIQUE (organization_id, name)
        );
        "#,
    ),
    (
        2,
        "documents, lists and groups",
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            external_id  TEXT    NOT NULL UNIQUE,
            name         TEXT    NOT NULL,
            version      INTEGER NOT NULL DEFAULT 1,
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL,
            deleted_at   TEXT,
            metadata     TEXT    NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS file_lists (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id  INTEGER NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
            external_id  TEXT    NOT NULL,
            name         TEXT    NOT NULL,
            description  TEXT    NOT NULL DEFAULT '',
            position     INTEGER NOT NULL,
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL,
            deleted_at   TEXT,
            metadata     TEXT    NOT NULL DEFAULT '{}',
            UNIQUE (document_id, external_id)
        );

        CREATE TABLE IF NOT EXISTS directory_lists (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id  INTEGER NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
            external_id  TEXT    NOT NULL,
            name         TEXT    NOT NULL,
            description  TEXT    NOT NULL DEFAULT '',
            position     INTEGER NOT NULL,
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL,
            deleted_at   TEXT,
            metadata     TEXT    NOT NULL DEFAULT '{}',
            UNIQUE (document_id, external_id)
        );

        CREATE TABLE IF NOT EXISTS sync_groups (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id  INTEGER NOT NULL REFERENCES documents (id) ON DELETE CASCADE,
            external_id  TEXT    NOT NULL UNIQUE,
            name         TEXT    NOT NULL,
            description  TEXT    NOT NULL DEFAULT '',
            priority     INTEGER NOT NULL DEFAULT 0,
            enabled      INTEGER,
            position     INTEGER NOT NULL,
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL,
            deleted_at   TEXT,
            metadata     TEXT    NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_sync_groups_document ON sync_groups (document_id, position);

        CREATE TABLE IF NOT EXISTS group_sources (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id        INTEGER NOT NULL UNIQUE REFERENCES sync_groups (id) ON DELETE CASCADE,
            repo_id         INTEGER NOT NULL REFERENCES repos (id),
            branch          TEXT    NOT NULL DEFAULT '',
            blob_size_limit TEXT    NOT NULL DEFAULT '',
            security_email  TEXT    NOT NULL DEFAULT '',
            support_email   TEXT    NOT NULL DEFAULT '',
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL,
            deleted_at      TEXT,
            metadata        TEXT    NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS group_globals (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id           INTEGER NOT NULL UNIQUE REFERENCES sync_groups (id) ON DELETE CASCADE,
            pr_labels          TEXT    NOT NULL DEFAULT '[]',
            pr_assignees       TEXT    NOT NULL DEFAULT '[]',
            pr_reviewers       TEXT    NOT NULL DEFAULT '[]',
            pr_team_reviewers  TEXT    NOT NULL DEFAULT '[]',
            created_at         TEXT    NOT NULL,
            updated_at         TEXT    NOT NULL,
            deleted_at         TEXT,
            metadata           TEXT    NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS group_defaults (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id           INTEGER NOT NULL UNIQUE REFERENCES sync_groups (id) ON DELETE CASCADE,
            branch_prefix      TEXT    NOT NULL DEFAULT '',
            pr_labels          TEXT    NOT NULL DEFAULT '[]',
            pr_assignees       TEXT    NOT NULL DEFAULT '[]',
            pr_reviewers       TEXT    NOT NULL DEFAULT '[]',
            pr_team_reviewers  TEXT    NOT NULL DEFAULT '[]',
            created_at         TEXT    NOT NULL,
            updated_at         TEXT    NOT NULL,
            deleted_at         TEXT,
            metadata           TEXT    NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS group_dependencies (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id    INTEGER NOT NULL REFERENCES sync_groups (id) ON DELETE CASCADE,
            depends_on  TEXT    NOT NULL,
            position    INTEGER NOT NULL,
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL,
            deleted_at  TEXT,
            metadata    TEXT    NOT NULL DEFAULT '{}',
            UNIQUE (group_id, depends_on)
        );
        "#,
    ),
    (
        3,
        "targets, mappings, transforms and list references",
        r#"
        CREATE TABLE IF NOT EXISTS targets (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id           INTEGER NOT NULL REFERENCES sync_groups (id) ON DELETE CASCADE,
            repo_id            INTEGER NOT NULL REFERENCES repos (id),
            branch             TEXT    NOT NULL DEFAULT '',
            blob_size_limit    TEXT    NOT NULL DEFAULT '',
            security_email     TEXT    NOT NULL DEFAULT '',
            support_email      TEXT    NOT NULL DEFAULT '',
            pr_labels          TEXT    NOT NULL DEFAULT '[]',
            pr_assignees       TEXT    NOT NULL DEFAULT '[]',
            pr_reviewers       TEXT    NOT NULL DEFAULT '[]',
            pr_team_reviewers  TEXT    NOT NULL DEFAULT '[]',
            position           INTEGER NOT NULL,
            created_at         TEXT    NOT NULL,
            updated_at         TEXT    NOT NULL,
            deleted_at         TEXT,
            metadata           TEXT    NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_targets_group ON targets (group_id, position);
        CREATE INDEX IF NOT EXISTS idx_targets_repo ON targets (repo_id);

        CREATE TABLE IF NOT EXISTS file_mappings (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_kind   TEXT    NOT NULL CHECK (owner_kind IN ('target', 'file_list')),
            owner_id     INTEGER NOT NULL,
            src          TEXT    NOT NULL DEFAULT '',
            dest         TEXT    NOT NULL,
            delete_flag  INTEGER NOT NULL DEFAULT 0,
            position     INTEGER NOT NULL,
            created_at   TEXT    NOT NULL,
            updated_at   TEXT    NOT NULL,
            deleted_at   TEXT,
            metadata     TEXT    NOT NULL DEFAULT '{}',
            CHECK (delete_flag = 1 OR src <> '')
        );

        CREATE INDEX IF NOT EXISTS idx_file_mappings_owner
            ON file_mappings (owner_kind, owner_id, position);

        CREATE TABLE IF NOT EXISTS directory_mappings (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_kind          TEXT    NOT NULL CHECK (owner_kind IN ('target', 'directory_list')),
            owner_id            INTEGER NOT NULL,
            src                 TEXT    NOT NULL DEFAULT '',
            dest                TEXT    NOT NULL,
            exclude             TEXT    NOT NULL DEFAULT '[]',
            include_only        TEXT    NOT NULL DEFAULT '[]',
            preserve_structure  INTEGER,
            include_hidden      INTEGER,
            delete_flag         INTEGER NOT NULL DEFAULT 0,
            module              TEXT,
            position            INTEGER NOT NULL,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL,
            deleted_at          TEXT,
            metadata            TEXT    NOT NULL DEFAULT '{}',
            CHECK (delete_flag = 1 OR src <> '')
        );

        CREATE INDEX IF NOT EXISTS idx_directory_mappings_owner
            ON directory_mappings (owner_kind, owner_id, position);

        CREATE TABLE IF NOT EXISTS transforms (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_kind  TEXT    NOT NULL CHECK (owner_kind IN ('target', 'directory_mapping')),
            owner_id    INTEGER NOT NULL,
            repo_name   INTEGER NOT NULL DEFAULT 0,
            variables   TEXT    NOT NULL DEFAULT '{}',
            created_at  TEXT    NOT NULL,
            updated_at  TEXT    NOT NULL,
            deleted_at  TEXT,
            metadata    TEXT    NOT NULL DEFAULT '{}',
            UNIQUE (owner_kind, owner_id)
        );

        CREATE TABLE IF NOT EXISTS target_file_list_refs (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            target_id     INTEGER NOT NULL REFERENCES targets (id) ON DELETE CASCADE,
            file_list_id  INTEGER NOT NULL REFERENCES file_lists (id) ON DELETE CASCADE,
            position      INTEGER NOT NULL,
            created_at    TEXT    NOT NULL,
            UNIQUE (target_id, file_list_id)
        );

        CREATE TABLE IF NOT EXISTS target_directory_list_refs (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            target_id          INTEGER NOT NULL REFERENCES targets (id) ON DELETE CASCADE,
            directory_list_id  INTEGER NOT NULL REFERENCES directory_lists (id) ON DELETE CASCADE,
            position           INTEGER NOT NULL,
            created_at         TEXT    NOT NULL,
            UNIQUE (target_id, directory_list_id)
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 3);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        for expected in [
            "clients",
            "organizations",
            "repos",
            "documents",
            "file_lists",
            "directory_lists",
            "sync_groups",
            "group_sources",
            "group_globals",
            "group_defaults",
            "group_dependencies",
            "targets",
            "file_mappings",
            "directory_mappings",
            "transforms",
            "target_file_list_refs",
            "target_directory_list_refs",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_mapping_requires_src_unless_deleting() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let insert = |src: &str, delete: bool| {
            conn.execute(
                "INSERT INTO file_mappings (owner_kind, owner_id, src, dest, delete_flag, position,
                 created_at, updated_at) VALUES ('file_list', 1, ?1, 'x', ?2, 0, 'now', 'now')",
                rusqlite::params![src, delete],
            )
        };
        assert!(insert("", true).is_ok());
        assert!(insert("a", false).is_ok());
        assert!(insert("", false).is_err());
    }
}
