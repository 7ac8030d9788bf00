//! Repository dimension: clients, organizations and repos.
//!
//! Targets and group sources point at a `repos` row instead of storing the
//! `organization/repository` string. Rows are provisioned on first use.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::now;
use crate::errors::DatabaseError;

/// Find a client by name.
pub fn find_client(conn: &Connection, name: &str) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT id FROM clients WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// The oldest client, if any exists.
pub fn first_client(conn: &Connection) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT id FROM clients WHERE deleted_at IS NULL ORDER BY id LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Insert a client and return its id.
pub fn insert_client(conn: &Connection, name: &str) -> Result<i64, DatabaseError> {
    let ts = now();
    conn.execute(
        "INSERT INTO clients (name, created_at, updated_at) VALUES (?1, ?2, ?2)",
        params![name, ts],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, name, "inserted client");
    Ok(id)
}

/// Find an organization by name.
pub fn find_organization(conn: &Connection, name: &str) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT id FROM organizations WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Insert an organization under `client_id` and return its id.
pub fn insert_organization(
    conn: &Connection,
    client_id: i64,
    name: &str,
) -> Result<i64, DatabaseError> {
    let ts = now();
    conn.execute(
        "INSERT INTO organizations (client_id, name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![client_id, name, ts],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, client_id, name, "inserted organization");
    Ok(id)
}

/// Find a repo by organization id and name.
pub fn find_repo(
    conn: &Connection,
    organization_id: i64,
    name: &str,
) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT id FROM repos WHERE organization_id = ?1 AND name = ?2",
            params![organization_id, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Find a repo by its `organization/repository` parts.
pub fn find_repo_by_name(
    conn: &Connection,
    organization: &str,
    name: &str,
) -> Result<Option<i64>, DatabaseError> {
    let id = conn
        .query_row(
            "SELECT r.id FROM repos r JOIN organizations o ON o.id = r.organization_id
             WHERE o.name = ?1 AND r.name = ?2",
            params![organization, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Insert a repo under `organization_id` and return its id.
pub fn insert_repo(conn: &Connection, organization_id: i64, name: &str) -> Result<i64, DatabaseError> {
    let ts = now();
    conn.execute(
        "INSERT INTO repos (organization_id, name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![organization_id, name, ts],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, organization_id, name, "inserted repo");
    Ok(id)
}

/// The `organization/repository` string for a repo id.
pub fn repo_full_name(conn: &Connection, repo_id: i64) -> Result<String, DatabaseError> {
    conn.query_row(
        "SELECT o.name || '/' || r.name FROM repos r
         JOIN organizations o ON o.id = r.organization_id WHERE r.id = ?1",
        params![repo_id],
        |row| row.get(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
            entity: "repo".into(),
            id: repo_id.to_string(),
        },
        other => other.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_repo_dimension_crud() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let conn = db.conn();

        assert!(first_client(&conn).unwrap().is_none());
        let client = insert_client(&conn, "default").unwrap();
        assert_eq!(first_client(&conn).unwrap(), Some(client));
        assert_eq!(find_client(&conn, "default").unwrap(), Some(client));

        let org = insert_organization(&conn, client, "acme").unwrap();
        assert_eq!(find_organization(&conn, "acme").unwrap(), Some(org));

        let repo = insert_repo(&conn, org, "web").unwrap();
        assert_eq!(find_repo(&conn, org, "web").unwrap(), Some(repo));
        assert_eq!(find_repo_by_name(&conn, "acme", "web").unwrap(), Some(repo));
        assert_eq!(repo_full_name(&conn, repo).unwrap(), "acme/web");

        assert!(matches!(
            repo_full_name(&conn, 999),
            Err(DatabaseError::NotFound { .. })
        ));
    }
}
