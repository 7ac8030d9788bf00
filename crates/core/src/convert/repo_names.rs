//! Resolution of `organization/repository` strings to repo rows.
//!
//! Organizations and repos are provisioned on first use. When no client
//! exists yet, the configured default client is created to own the first
//! organization.

use std::collections::HashMap;

use rusqlite::Connection;
use tracing::debug;

use crate::db::repos;
use crate::errors::{DatabaseError, StoreError};

/// Split `organization/repository` into its two non-empty parts.
pub fn parse_repo_name(full: &str) -> Result<(&str, &str), StoreError> {
    match full.split_once('/') {
        Some((org, name))
            if !org.trim().is_empty() && !name.trim().is_empty() && !name.contains('/') =>
        {
            Ok((org, name))
        }
        _ => Err(StoreError::InvalidRepoFormat(full.to_string())),
    }
}

/// Memoizing resolver, one per import call.
#[derive(Debug)]
pub struct RepoNameResolver {
    default_client: String,
    client_id: Option<i64>,
    organizations: HashMap<String, i64>,
    repos: HashMap<String, i64>,
}

impl RepoNameResolver {
    pub fn new(default_client: impl Into<String>) -> Self {
        Self {
            default_client: default_client.into(),
            client_id: None,
            organizations: HashMap::new(),
            repos: HashMap::new(),
        }
    }

    /// Return the repo id for `full`, creating rows as needed.
    pub fn resolve(&mut self, conn: &Connection, full: &str) -> Result<i64, StoreError> {
        if let Some(&id) = self.repos.get(full) {
            return Ok(id);
        }
        let (org, name) = parse_repo_name(full)?;
        let org_id = self.organization(conn, org)?;
        let repo_id = match repos::find_repo(conn, org_id, name)? {
            Some(id) => id,
            None => repos::insert_repo(conn, org_id, name)?,
        };
        self.repos.insert(full.to_string(), repo_id);
        debug!(repo = full, repo_id, "resolved repository");
        Ok(repo_id)
    }

    fn organization(&mut self, conn: &Connection, name: &str) -> Result<i64, DatabaseError> {
        if let Some(&id) = self.organizations.get(name) {
            return Ok(id);
        }
        let id = match repos::find_organization(conn, name)? {
            Some(id) => id,
            None => {
                let client_id = self.client(conn)?;
                repos::insert_organization(conn, client_id, name)?
            }
        };
        self.organizations.insert(name.to_string(), id);
        Ok(id)
    }

    fn client(&mut self, conn: &Connection) -> Result<i64, DatabaseError> {
        if let Some(id) = self.client_id {
            return Ok(id);
        }
        let id = match repos::first_client(conn)? {
            Some(id) => id,
            None => match repos::find_client(conn, &self.default_client)? {
                Some(id) => id,
                None => repos::insert_client(conn, &self.default_client)?,
            },
        };
        self.client_id = Some(id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_parse_repo_name() {
        assert_eq!(parse_repo_name("acme/web").unwrap(), ("acme", "web"));
        for bad in ["acme", "/web", "acme/", "", "a/b/c", " /web"] {
            assert!(
                matches!(parse_repo_name(bad), Err(StoreError::InvalidRepoFormat(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_provisions_once() {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        let conn = db.conn();

        let mut resolver = RepoNameResolver::new("default");
        let web = resolver.resolve(&conn, "acme/web").unwrap();
        let api = resolver.resolve(&conn, "acme/api").unwrap();
        assert_ne!(web, api);
        assert_eq!(resolver.resolve(&conn, "acme/web").unwrap(), web);

        let count = |sql: &str| -> i64 { conn.query_row(sql, [], |r| r.get(0)).unwrap() };
        assert_eq!(count("SELECT COUNT(*) FROM clients"), 1);
        assert_eq!(count("SELECT COUNT(*) FROM organizations"), 1);
        assert_eq!(count("SELECT COUNT(*) FROM repos"), 2);

        // A fresh resolver finds the existing rows instead of duplicating them.
        let mut again = RepoNameResolver::new("other");
        assert_eq!(again.resolve(&conn, "acme/web").unwrap(), web);
        again.resolve(&conn, "globex/site").unwrap();
        assert_eq!(count("SELECT COUNT(*) FROM clients"), 1);
    }
}
