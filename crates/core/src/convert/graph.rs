//! Structural checks on a candidate document.
//!
//! These run against the in-memory document only, before any group-level
//! write, so a failure here never leaves partial state behind. None of them
//! have side effects.

use std::collections::{HashMap, HashSet};

use super::repo_names::parse_repo_name;
use crate::errors::{ReferenceKind, StoreError};
use crate::models::Document;
use crate::validation::require_non_empty;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Finished,
}

/// Check that every `dependsOn` entry names a group of the same document and
/// that the dependency relation is acyclic.
pub fn validate_dependencies(doc: &Document) -> Result<(), StoreError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for group in &doc.groups {
        adjacency.insert(group.id.as_str(), Vec::new());
    }
    for group in &doc.groups {
        for dep in &group.depends_on {
            if !adjacency.contains_key(dep.as_str()) {
                return Err(StoreError::ReferenceNotFound {
                    kind: ReferenceKind::Group,
                    id: dep.clone(),
                    referenced_by: format!("group '{}'", group.id),
                });
            }
            if let Some(edges) = adjacency.get_mut(group.id.as_str()) {
                edges.push(dep.as_str());
            }
        }
    }

    let mut marks: HashMap<&str, Mark> =
        adjacency.keys().map(|&id| (id, Mark::Unvisited)).collect();
    for group in &doc.groups {
        if marks.get(group.id.as_str()) == Some(&Mark::Unvisited) {
            visit(group.id.as_str(), &adjacency, &mut marks)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    node: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    marks: &mut HashMap<&'a str, Mark>,
) -> Result<(), StoreError> {
    marks.insert(node, Mark::OnStack);
    for &next in adjacency.get(node).map(Vec::as_slice).unwrap_or_default() {
        match marks.get(next).copied().unwrap_or(Mark::Unvisited) {
            Mark::OnStack => {
                return Err(StoreError::CircularDependency {
                    group: next.to_string(),
                })
            }
            Mark::Unvisited => visit(next, adjacency, marks)?,
            Mark::Finished => {}
        }
    }
    marks.insert(node, Mark::Finished);
    Ok(())
}

/// Check that every file-list and directory-list reference names a list of
/// the candidate document.
pub fn validate_list_references(doc: &Document) -> Result<(), StoreError> {
    let file_lists: HashSet<&str> = doc.file_lists.iter().map(|l| l.id.as_str()).collect();
    let directory_lists: HashSet<&str> =
        doc.directory_lists.iter().map(|l| l.id.as_str()).collect();

    for group in &doc.groups {
        for (index, target) in group.targets.iter().enumerate() {
            let referenced_by = format!("target {index} ({}) of group '{}'", target.repo, group.id);
            for (refs, known, kind, field) in [
                (
                    &target.file_list_refs,
                    &file_lists,
                    ReferenceKind::FileList,
                    "fileListRefs",
                ),
                (
                    &target.directory_list_refs,
                    &directory_lists,
                    ReferenceKind::DirectoryList,
                    "directoryListRefs",
                ),
            ] {
                let mut seen = HashSet::new();
                for id in refs {
                    if !known.contains(id.as_str()) {
                        return Err(StoreError::ReferenceNotFound {
                            kind,
                            id: id.clone(),
                            referenced_by,
                        });
                    }
                    if !seen.insert(id.as_str()) {
                        return Err(StoreError::validation(
                            "target",
                            field,
                            format!("'{id}' is referenced more than once by {referenced_by}"),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Reject duplicate external ids among the candidate's groups and lists, and
/// duplicate entries in a group's `dependsOn`.
pub fn validate_unique_ids(doc: &Document) -> Result<(), StoreError> {
    check_unique("file list", doc.file_lists.iter().map(|l| l.id.as_str()))?;
    check_unique(
        "directory list",
        doc.directory_lists.iter().map(|l| l.id.as_str()),
    )?;
    check_unique("group", doc.groups.iter().map(|g| g.id.as_str()))?;
    for group in &doc.groups {
        let mut seen = HashSet::new();
        for dep in &group.depends_on {
            if !seen.insert(dep.as_str()) {
                return Err(StoreError::validation(
                    "group",
                    "dependsOn",
                    format!("group '{}' lists '{dep}' more than once", group.id),
                ));
            }
        }
    }
    Ok(())
}

/// Check every group source and target repository string is a well-formed
/// `organization/repository` pair.
pub fn validate_repo_names(doc: &Document) -> Result<(), StoreError> {
    for group in &doc.groups {
        require_non_empty("group", "source.repo", &group.source.repo)?;
        parse_repo_name(&group.source.repo)?;
        for target in &group.targets {
            require_non_empty("target", "repo", &target.repo)?;
            parse_repo_name(&target.repo)?;
        }
    }
    Ok(())
}

fn check_unique<'a>(entity: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(StoreError::validation(
                entity,
                "id",
                format!("duplicate id '{id}'"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileList, Group, Target};

    fn group(id: &str, deps: &[&str]) -> Group {
        Group {
            id: id.into(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    fn doc(groups: Vec<Group>) -> Document {
        Document {
            id: "doc".into(),
            groups,
            ..Default::default()
        }
    }

    #[test]
    fn test_acyclic_graph_passes() {
        let d = doc(vec![group("a", &[]), group("b", &["a"]), group("c", &["a", "b"])]);
        assert!(validate_dependencies(&d).is_ok());
        // Validation is repeatable.
        assert!(validate_dependencies(&d).is_ok());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let d = doc(vec![group("a", &["a"])]);
        assert!(matches!(
            validate_dependencies(&d),
            Err(StoreError::CircularDependency { group }) if group == "a"
        ));
    }

    #[test]
    fn test_mutual_and_long_cycles() {
        let d = doc(vec![group("a", &["b"]), group("b", &["a"])]);
        assert!(matches!(
            validate_dependencies(&d),
            Err(StoreError::CircularDependency { .. })
        ));

        let d = doc(vec![
            group("a", &["b"]),
            group("b", &["c"]),
            group("c", &["a"]),
            group("d", &[]),
        ]);
        assert!(matches!(
            validate_dependencies(&d),
            Err(StoreError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let d = doc(vec![
            group("top", &["left", "right"]),
            group("left", &["base"]),
            group("right", &["base"]),
            group("base", &[]),
        ]);
        assert!(validate_dependencies(&d).is_ok());
    }

    #[test]
    fn test_missing_dependency() {
        let d = doc(vec![group("a", &["ghost"])]);
        assert!(matches!(
            validate_dependencies(&d),
            Err(StoreError::ReferenceNotFound { kind: ReferenceKind::Group, id, .. }) if id == "ghost"
        ));
    }

    #[test]
    fn test_list_references() {
        let mut d = doc(vec![Group {
            id: "g".into(),
            targets: vec![Target {
                repo: "acme/web".into(),
                file_list_refs: vec!["shared".into()],
                ..Default::default()
            }],
            ..Default::default()
        }]);
        assert!(matches!(
            validate_list_references(&d),
            Err(StoreError::ReferenceNotFound { kind: ReferenceKind::FileList, .. })
        ));

        d.file_lists.push(FileList {
            id: "shared".into(),
            ..Default::default()
        });
        assert!(validate_list_references(&d).is_ok());

        d.groups[0].targets[0].directory_list_refs.push("shared".into());
        assert!(matches!(
            validate_list_references(&d),
            Err(StoreError::ReferenceNotFound { kind: ReferenceKind::DirectoryList, .. })
        ));

        d.groups[0].targets[0].directory_list_refs.clear();
        d.groups[0].targets[0].file_list_refs.push("shared".into());
        assert!(matches!(
            validate_list_references(&d),
            Err(StoreError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids() {
        let d = doc(vec![group("a", &[]), group("a", &[])]);
        assert!(matches!(
            validate_unique_ids(&d),
            Err(StoreError::ValidationFailed { entity, .. }) if entity == "group"
        ));

        let d = doc(vec![group("a", &[]), group("b", &["a", "a"])]);
        assert!(validate_unique_ids(&d).is_err());
    }

    #[test]
    fn test_repo_names_checked_up_front() {
        let mut a = group("a", &[]);
        a.source.repo = "acme/template".into();
        a.targets.push(Target {
            repo: "acme/service".into(),
            ..Default::default()
        });
        let mut d = doc(vec![a]);
        assert!(validate_repo_names(&d).is_ok());

        d.groups[0].targets[0].repo = "acme/too/deep".into();
        assert!(matches!(
            validate_repo_names(&d),
            Err(StoreError::InvalidRepoFormat(repo)) if repo == "acme/too/deep"
        ));

        d.groups[0].targets[0].repo = "acme/service".into();
        d.groups[0].source.repo = String::new();
        assert!(matches!(
            validate_repo_names(&d),
            Err(StoreError::ValidationFailed { ref field, .. }) if field == "source.repo"
        ));
    }
}
