//! Mapping between external identifiers and surrogate keys.
//!
//! A resolver lives for exactly one import or export call. Import fills the
//! forward direction as rows are written; export fills the reverse direction
//! from the rows it loads.

use std::collections::HashMap;

use crate::errors::{ReferenceKind, StoreError};

#[derive(Debug, Default)]
pub struct ReferenceResolver {
    forward: HashMap<(ReferenceKind, String), i64>,
    reverse: HashMap<(ReferenceKind, i64), String>,
}

impl ReferenceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record both directions for one entity.
    pub fn register(&mut self, kind: ReferenceKind, external_id: &str, id: i64) {
        self.forward.insert((kind, external_id.to_string()), id);
        self.reverse.insert((kind, id), external_id.to_string());
    }

    /// Surrogate key for `external_id`, or [`StoreError::ReferenceNotFound`]
    /// naming `referenced_by`.
    pub fn resolve(
        &self,
        kind: ReferenceKind,
        external_id: &str,
        referenced_by: &str,
    ) -> Result<i64, StoreError> {
        self.forward
            .get(&(kind, external_id.to_string()))
            .copied()
            .ok_or_else(|| StoreError::ReferenceNotFound {
                kind,
                id: external_id.to_string(),
                referenced_by: referenced_by.to_string(),
            })
    }

    pub fn contains(&self, kind: ReferenceKind, external_id: &str) -> bool {
        self.forward.contains_key(&(kind, external_id.to_string()))
    }

    /// External id for a surrogate key, if known.
    pub fn external_id(&self, kind: ReferenceKind, id: i64) -> Option<&str> {
        self.reverse.get(&(kind, id)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve_both_ways() {
        let mut resolver = ReferenceResolver::new();
        resolver.register(ReferenceKind::FileList, "shared", 7);
        resolver.register(ReferenceKind::DirectoryList, "shared", 9);

        assert_eq!(
            resolver.resolve(ReferenceKind::FileList, "shared", "target").unwrap(),
            7
        );
        assert_eq!(resolver.external_id(ReferenceKind::DirectoryList, 9), Some("shared"));
        assert_eq!(resolver.external_id(ReferenceKind::DirectoryList, 7), None);
        assert_eq!(resolver.len(), 2);
    }

    #[test]
    fn test_missing_reference_names_kind_and_id() {
        let resolver = ReferenceResolver::new();
        let err = resolver
            .resolve(ReferenceKind::Group, "base", "group 'core'")
            .unwrap_err();
        match err {
            StoreError::ReferenceNotFound {
                kind,
                id,
                referenced_by,
            } => {
                assert_eq!(kind, ReferenceKind::Group);
                assert_eq!(id, "base");
                assert_eq!(referenced_by, "group 'core'");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(resolver.is_empty());
    }
}
