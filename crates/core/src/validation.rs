//! Field-level validation run by the import pipeline before each write.
//!
//! Structural rules (required ids, names and paths, the delete-flag rule)
//! always apply. Syntax rules for emails and branch names are part of
//! [`FieldRules`] and can be relaxed with `strict_fields = false`.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::errors::StoreError;
use crate::models::{DirectoryMapping, FileMapping, ModuleConfig, Transform};

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

/// The compiled email pattern, built on first use.
fn email_regex() -> Result<&'static Regex, regex_lite::Error> {
    if let Some(re) = EMAIL_REGEX.get() {
        return Ok(re);
    }
    let re = Regex::new(EMAIL_PATTERN)?;
    Ok(EMAIL_REGEX.get_or_init(|| re))
}

/// Characters git refuses anywhere in a ref name.
const FORBIDDEN_REF_CHARS: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];

/// Syntax checks for individual fields.
#[derive(Debug, Clone)]
pub struct FieldRules {
    strict: bool,
}

impl FieldRules {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Check an optional email address. Empty means "not set".
    pub fn email(&self, entity: &str, field: &str, value: &str) -> Result<(), StoreError> {
        if !self.strict || value.is_empty() {
            return Ok(());
        }
        let re = email_regex().map_err(|e| {
            StoreError::validation(entity, field, format!("email pattern is invalid: {e}"))
        })?;
        if re.is_match(value) {
            Ok(())
        } else {
            Err(StoreError::validation(
                entity,
                field,
                format!("'{value}' is not a valid email address"),
            ))
        }
    }

    /// Check an optional branch name against git's ref-name rules. Empty
    /// means "use the repository default".
    pub fn branch(&self, entity: &str, field: &str, value: &str) -> Result<(), StoreError> {
        if !self.strict || value.is_empty() {
            return Ok(());
        }
        match branch_name_problem(value) {
            Some(problem) => Err(StoreError::validation(
                entity,
                field,
                format!("'{value}' is not a valid branch name: {problem}"),
            )),
            None => Ok(()),
        }
    }
}

impl Default for FieldRules {
    fn default() -> Self {
        Self::new(true)
    }
}

fn branch_name_problem(name: &str) -> Option<&'static str> {
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Some("contains whitespace or control characters");
    }
    if name.contains(FORBIDDEN_REF_CHARS) {
        return Some("contains a forbidden character");
    }
    if name.contains("..") || name.contains("@{") || name.contains("//") {
        return Some("contains a forbidden sequence");
    }
    if name.starts_with('-') || name.starts_with('/') {
        return Some("starts with '-' or '/'");
    }
    if name.ends_with('/') || name.ends_with('.') || name.ends_with(".lock") {
        return Some("has a forbidden suffix");
    }
    if name == "@" {
        return Some("'@' alone is reserved");
    }
    None
}

/// Reject an empty (or all-whitespace) required value.
pub fn require_non_empty(entity: &str, field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::validation(entity, field, "must not be empty"));
    }
    Ok(())
}

/// A destination is always required; a source only when not deleting.
pub fn validate_file_mapping(entity: &str, mapping: &FileMapping) -> Result<(), StoreError> {
    require_non_empty(entity, "dest", &mapping.dest)?;
    if !mapping.delete {
        require_non_empty(entity, "src", &mapping.src)?;
    }
    Ok(())
}

pub fn validate_directory_mapping(
    entity: &str,
    mapping: &DirectoryMapping,
) -> Result<(), StoreError> {
    require_non_empty(entity, "dest", &mapping.dest)?;
    if !mapping.delete {
        require_non_empty(entity, "src", &mapping.src)?;
    }
    for pattern in &mapping.exclude {
        validate_glob(entity, "exclude", pattern)?;
    }
    for pattern in &mapping.include_only {
        validate_glob(entity, "includeOnly", pattern)?;
    }
    if let Some(module) = &mapping.module {
        validate_module(entity, module)?;
    }
    validate_transform(entity, &mapping.transform)
}

pub fn validate_module(entity: &str, module: &ModuleConfig) -> Result<(), StoreError> {
    require_non_empty(entity, "module.type", &module.module_type)
}

pub fn validate_transform(entity: &str, transform: &Transform) -> Result<(), StoreError> {
    if transform.variables.keys().any(|k| k.trim().is_empty()) {
        return Err(StoreError::validation(
            entity,
            "transform.variables",
            "variable names must not be empty",
        ));
    }
    Ok(())
}

/// A glob must be non-empty and have balanced `[]` and `{}`.
pub fn validate_glob(entity: &str, field: &str, pattern: &str) -> Result<(), StoreError> {
    require_non_empty(entity, field, pattern)?;
    let mut brackets = 0i32;
    let mut braces = 0i32;
    for c in pattern.chars() {
        match c {
            '[' => brackets += 1,
            ']' => brackets -= 1,
            '{' => braces += 1,
            '}' => braces -= 1,
            _ => {}
        }
        if brackets < 0 || braces < 0 {
            break;
        }
    }
    if brackets != 0 || braces != 0 {
        return Err(StoreError::validation(
            entity,
            field,
            format!("'{pattern}' has unbalanced brackets"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_flag_relaxes_src() {
        let deleting = FileMapping {
            src: String::new(),
            dest: "LEGACY.md".into(),
            delete: true,
        };
        assert!(validate_file_mapping("file", &deleting).is_ok());

        let copying = FileMapping {
            delete: false,
            ..deleting.clone()
        };
        assert!(matches!(
            validate_file_mapping("file", &copying),
            Err(StoreError::ValidationFailed { ref field, .. }) if field == "src"
        ));

        let no_dest = FileMapping {
            src: "a".into(),
            dest: " ".into(),
            delete: false,
        };
        assert!(matches!(
            validate_file_mapping("file", &no_dest),
            Err(StoreError::ValidationFailed { ref field, .. }) if field == "dest"
        ));
    }

    #[test]
    fn test_email_pattern_compiles() {
        let re = email_regex().unwrap();
        assert!(re.is_match("ops@acme.io"));
        assert!(std::ptr::eq(re, email_regex().unwrap()));
    }

    #[test]
    fn test_email_rules() {
        let rules = FieldRules::new(true);
        assert!(rules.email("source", "securityEmail", "").is_ok());
        assert!(rules.email("source", "securityEmail", "sec@acme.io").is_ok());
        assert!(rules.email("source", "securityEmail", "not-an-email").is_err());
        assert!(rules.email("source", "securityEmail", "a b@acme.io").is_err());

        let relaxed = FieldRules::new(false);
        assert!(relaxed.email("source", "securityEmail", "not-an-email").is_ok());
    }

    #[test]
    fn test_branch_rules() {
        let rules = FieldRules::default();
        for ok in ["main", "release/1.2", "feature/sync-v2", ""] {
            assert!(rules.branch("target", "branch", ok).is_ok(), "{ok}");
        }
        for bad in [
            "has space",
            "a..b",
            "-lead",
            "trail/",
            "x.lock",
            "what?",
            "dot.",
            "a//b",
            "@",
        ] {
            assert!(rules.branch("target", "branch", bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_directory_mapping_checks_nested_parts() {
        let mut mapping = DirectoryMapping {
            src: "docs".into(),
            dest: "docs".into(),
            exclude: vec!["*.tmp".into()],
            ..Default::default()
        };
        assert!(validate_directory_mapping("dir", &mapping).is_ok());

        mapping.include_only = vec!["[abc".into()];
        assert!(validate_directory_mapping("dir", &mapping).is_err());

        mapping.include_only.clear();
        mapping.module = Some(ModuleConfig::default());
        assert!(matches!(
            validate_directory_mapping("dir", &mapping),
            Err(StoreError::ValidationFailed { ref field, .. }) if field == "module.type"
        ));

        mapping.module = None;
        mapping.transform.variables.insert(String::new(), "x".into());
        assert!(validate_directory_mapping("dir", &mapping).is_err());
    }
}
