//! Document model: the tree-shaped sync configuration.
//!
//! These types are what callers import and what export reconstructs. They
//! carry only external identifiers; surrogate keys stay in the `db` layer.
//! Serde names follow the camelCase document shape so any serde format can
//! feed the converter.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Open-ended key/value metadata attached to stored rows.
pub type Metadata = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Document root
// ---------------------------------------------------------------------------

/// A complete sync configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub file_lists: Vec<FileList>,
    #[serde(default)]
    pub directory_lists: Vec<DirectoryList>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

/// A reusable, externally identified set of file mappings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub files: Vec<FileMapping>,
}

/// A reusable, externally identified set of directory mappings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryList {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub directories: Vec<DirectoryMapping>,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// One source repository broadcast to a set of targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Higher runs earlier.
    #[serde(default)]
    pub priority: i64,
    /// `None` inherits the default (enabled).
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub global: GlobalSettings,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Group {
    /// Effective enabled state; an unset flag means enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }
}

/// Where a group's content comes from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// `organization/repository`.
    pub repo: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub blob_size_limit: String,
    #[serde(default)]
    pub security_email: String,
    #[serde(default)]
    pub support_email: String,
}

/// Pull-request policy applied to every target of a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default)]
    pub pr_labels: Vec<String>,
    #[serde(default)]
    pub pr_assignees: Vec<String>,
    #[serde(default)]
    pub pr_reviewers: Vec<String>,
    #[serde(default)]
    pub pr_team_reviewers: Vec<String>,
}

/// Branch naming and fallback pull-request policy for a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    #[serde(default)]
    pub branch_prefix: String,
    #[serde(default)]
    pub pr_labels: Vec<String>,
    #[serde(default)]
    pub pr_assignees: Vec<String>,
    #[serde(default)]
    pub pr_reviewers: Vec<String>,
    #[serde(default)]
    pub pr_team_reviewers: Vec<String>,
}

// ---------------------------------------------------------------------------
// Targets
// ---------------------------------------------------------------------------

/// A destination repository and what gets synced into it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// `organization/repository`.
    pub repo: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub blob_size_limit: String,
    #[serde(default)]
    pub security_email: String,
    #[serde(default)]
    pub support_email: String,
    #[serde(default)]
    pub pr_labels: Vec<String>,
    #[serde(default)]
    pub pr_assignees: Vec<String>,
    #[serde(default)]
    pub pr_reviewers: Vec<String>,
    #[serde(default)]
    pub pr_team_reviewers: Vec<String>,
    #[serde(default)]
    pub files: Vec<FileMapping>,
    #[serde(default)]
    pub directories: Vec<DirectoryMapping>,
    #[serde(default)]
    pub file_list_refs: Vec<String>,
    #[serde(default)]
    pub directory_list_refs: Vec<String>,
    #[serde(default)]
    pub transform: Transform,
}

// ---------------------------------------------------------------------------
// Mappings
// ---------------------------------------------------------------------------

/// A single file copied (or deleted) in the destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMapping {
    /// May be empty only when `delete` is set.
    #[serde(default)]
    pub src: String,
    pub dest: String,
    #[serde(default)]
    pub delete: bool,
}

/// A directory tree copied (or deleted) in the destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMapping {
    #[serde(default)]
    pub src: String,
    pub dest: String,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub include_only: Vec<String>,
    #[serde(default)]
    pub preserve_structure: Option<bool>,
    #[serde(default)]
    pub include_hidden: Option<bool>,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub module: Option<ModuleConfig>,
    #[serde(default)]
    pub transform: Transform,
}

/// Version tracking for a directory that holds a versioned module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleConfig {
    #[serde(rename = "type", default)]
    pub module_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub check_tags: Option<bool>,
    #[serde(default)]
    pub update_refs: bool,
}

/// Content rewriting applied while syncing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    #[serde(default)]
    pub repo_name: bool,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl Transform {
    /// `true` when the transform would not change anything, in which case no
    /// row is stored for it.
    pub fn is_empty(&self) -> bool {
        !self.repo_name && self.variables.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Stored handle
// ---------------------------------------------------------------------------

/// The stored representation of a document root, returned by import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: i64,
    pub external_id: String,
    pub name: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Metadata,
}

/// How an administrative delete treats the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteMode {
    /// Keep the row, set its `deleted_at` marker.
    Soft,
    /// Purge the row and everything it owns.
    Hard,
}

impl std::fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Soft => write!(f, "soft"),
            Self::Hard => write!(f, "hard"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_uses_camel_case_names() {
        let json = r#"{
            "version": 1,
            "id": "main",
            "name": "Main",
            "fileLists": [{"id": "shared", "files": [{"dest": "old.txt", "delete": true}]}],
            "groups": [{
                "id": "core",
                "enabled": false,
                "dependsOn": ["base"],
                "source": {"repo": "acme/template", "blobSizeLimit": "10m"},
                "targets": [{
                    "repo": "acme/web",
                    "fileListRefs": ["shared"],
                    "directories": [{"src": "a", "dest": "b", "includeOnly": ["*.md"],
                                     "module": {"type": "go", "checkTags": true}}],
                    "transform": {"repoName": true, "variables": {"NAME": "web"}}
                }]
            }]
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert_eq!(doc.file_lists[0].files[0].src, "");
        assert!(doc.file_lists[0].files[0].delete);

        let group = &doc.groups[0];
        assert_eq!(group.enabled, Some(false));
        assert!(!group.is_enabled());
        assert_eq!(group.depends_on, vec!["base"]);
        assert_eq!(group.source.blob_size_limit, "10m");

        let target = &group.targets[0];
        assert_eq!(target.file_list_refs, vec!["shared"]);
        let module = target.directories[0].module.as_ref().unwrap();
        assert_eq!(module.module_type, "go");
        assert_eq!(module.check_tags, Some(true));
        assert!(target.transform.repo_name);
        assert!(!target.transform.is_empty());
    }

    #[test]
    fn test_unset_enabled_defaults_to_true() {
        let group = Group::default();
        assert_eq!(group.enabled, None);
        assert!(group.is_enabled());
        assert!(Transform::default().is_empty());
    }
}
