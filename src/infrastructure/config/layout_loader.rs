//! Monitoring layout loader: additive YAML merging with environment
//! substitution.

use regex::Regex;
use serde_yaml::Value;
use std::path::PathBuf;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Layout;
use crate::services::conversions;

/// Environment variable holding an inline layout document.
pub const LAYOUT_ENV_NAME: &str = "ARGUS_LAYOUT";

/// Merge `other` into `base` additively: maps deep-merge, sequences
/// concatenate, scalars override.
pub fn merge_values(base: &mut Value, other: Value) {
    match (base, other) {
        (Value::Mapping(base_map), Value::Mapping(other_map)) => {
            for (key, other_value) in other_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge_values(base_value, other_value),
                    None => {
                        base_map.insert(key, other_value);
                    }
                }
            }
        }
        (Value::Sequence(base_seq), Value::Sequence(other_seq)) => {
            base_seq.extend(other_seq);
        }
        (base_slot, other_value) => *base_slot = other_value,
    }
}

/// Replace every `${NAME}` token in string scalars from the process
/// environment. An unresolved token is a fatal load error.
pub fn substitute_env(value: &mut Value) -> DomainResult<()> {
    let pattern = Regex::new(r"\$\{(\w+)\}").expect("static pattern compiles");
    substitute_env_inner(value, &pattern)
}

fn substitute_env_inner(value: &mut Value, pattern: &Regex) -> DomainResult<()> {
    match value {
        Value::String(text) => {
            if !text.contains("${") {
                return Ok(());
            }
            let mut resolved = text.clone();
            for capture in pattern.captures_iter(text) {
                let name = &capture[1];
                let Ok(replacement) = std::env::var(name) else {
                    return Err(DomainError::ConfigurationError(format!(
                        "environment variable {name} referred in the layout is not set"
                    )));
                };
                resolved = resolved.replace(&format!("${{{name}}}"), &replacement);
            }
            *text = resolved;
            Ok(())
        }
        Value::Sequence(items) => {
            for item in items {
                substitute_env_inner(item, pattern)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                substitute_env_inner(item, pattern)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn parse_document(raw: &str, origin: &str) -> DomainResult<Option<Value>> {
    let mut value: Value = serde_yaml::from_str(raw).map_err(|err| {
        DomainError::ConfigurationError(format!("{origin}: unparseable layout: {err}"))
    })?;

    substitute_env(&mut value)?;

    // a disabled document is skipped before merging
    let enabled = value
        .get("enabled")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    if !enabled {
        tracing::info!(origin, "layout document disabled, skipping");
        return Ok(None);
    }

    // validate each document on its own so errors name their origin
    let layout: Layout = serde_yaml::from_value(value.clone()).map_err(|err| {
        DomainError::ConfigurationError(format!("{origin}: invalid layout: {err}"))
    })?;
    layout.validate().map_err(|err| {
        DomainError::ConfigurationError(format!("{origin}: {err}"))
    })?;
    validate_conversions(&layout).map_err(|err| {
        DomainError::ConfigurationError(format!("{origin}: {err}"))
    })?;

    Ok(Some(value))
}

/// Managed-bean value conversions are referenced by registry key; free
/// expressions in configuration are rejected.
fn validate_conversions(layout: &Layout) -> DomainResult<()> {
    for service in &layout.jmx {
        for mbean in &service.mbeans {
            if let Some(conv) = &mbean.conv {
                if !conversions::is_known(conv) {
                    return Err(DomainError::ValidationFailed(format!(
                        "mbean {} of {}: unknown conversion \"{conv}\" \
                         (known: {})",
                        mbean.our_alias,
                        service.service,
                        conversions::KNOWN_CONVERSIONS.join(", ")
                    )));
                }
            }
        }
    }
    Ok(())
}

fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .map(|dir| {
                    dir.filter_map(Result::ok)
                        .map(|entry| entry.path())
                        .filter(|p| {
                            p.is_file()
                                && p.extension()
                                    .is_some_and(|ext| ext == "yml" || ext == "yaml")
                        })
                        .collect()
                })
                .unwrap_or_default();
            entries.sort();
            files.extend(entries);
        } else {
            tracing::warn!(path = %path.display(), "ignoring: not a regular file or directory");
        }
    }
    files
}

/// Load and merge the monitoring layout from the given files and
/// directories, plus the inline environment document if present.
pub fn load_layout(paths: &[PathBuf]) -> DomainResult<Layout> {
    let mut merged = Value::Mapping(serde_yaml::Mapping::new());
    let mut loaded_any = false;

    if let Ok(inline) = std::env::var(LAYOUT_ENV_NAME) {
        tracing::debug!("loading layout from environment variable {LAYOUT_ENV_NAME}");
        if let Some(value) = parse_document(&inline, LAYOUT_ENV_NAME)? {
            merge_values(&mut merged, value);
            loaded_any = true;
        }
    }

    let files = collect_files(paths);
    tracing::debug!(
        files = %files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(","),
        "layout configuration files"
    );

    for file in files {
        let raw = std::fs::read_to_string(&file).map_err(|err| {
            DomainError::ConfigurationError(format!("{}: {err}", file.display()))
        })?;
        if let Some(value) = parse_document(&raw, &file.display().to_string())? {
            merge_values(&mut merged, value);
            loaded_any = true;
        }
    }

    if !loaded_any {
        return Err(DomainError::ConfigurationError(
            "no layout configuration found".to_string(),
        ));
    }

    let layout: Layout = serde_yaml::from_value(merged)
        .map_err(|err| DomainError::ConfigurationError(format!("merged layout invalid: {err}")))?;
    layout.validate()?;
    Ok(layout)
}

/// Derive missing action ids from the action name; explicit ids were
/// validated at load time.
pub fn assign_action_ids(layout: &mut Layout) {
    for action in &mut layout.actions {
        if action.id.is_none() {
            action.id = Some(derive_action_id(&action.name));
        }
    }
}

/// A short stable id for an action: the first 8 hex characters of the
/// SHA-256 of its name.
fn derive_action_id(name: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(name.as_bytes());
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(raw: &str) -> Value {
        serde_yaml::from_str(raw).unwrap()
    }

    #[test]
    fn test_merge_concatenates_arrays() {
        let mut base = yaml("blueprint:\n  - name: a\n");
        merge_values(&mut base, yaml("blueprint:\n  - name: b\n"));
        let layout: Layout = serde_yaml::from_value(base).unwrap();
        let names: Vec<&str> = layout.blueprint.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_merge_deep_merges_maps_and_overrides_scalars() {
        let mut base = yaml("name: first\nreadme: keep\n");
        merge_values(&mut base, yaml("name: second\n"));
        assert_eq!(base.get("name").unwrap().as_str(), Some("second"));
        assert_eq!(base.get("readme").unwrap().as_str(), Some("keep"));
    }

    #[test]
    fn test_substitute_env_resolves_tokens() {
        temp_env::with_var("ARGUS_TEST_TOKEN", Some("sekrit"), || {
            let mut value = yaml("token: abc-${ARGUS_TEST_TOKEN}-xyz\n");
            substitute_env(&mut value).unwrap();
            assert_eq!(
                value.get("token").unwrap().as_str(),
                Some("abc-sekrit-xyz")
            );
        });
    }

    #[test]
    fn test_substitute_env_missing_token_is_fatal() {
        temp_env::with_var_unset("ARGUS_SURELY_UNSET", || {
            let mut value = yaml("token: ${ARGUS_SURELY_UNSET}\n");
            assert!(substitute_env(&mut value).is_err());
        });
    }

    #[test]
    fn test_derive_action_id_is_stable_and_short() {
        let id = derive_action_id("restart frontend");
        assert_eq!(id.len(), 8);
        assert_eq!(id, derive_action_id("restart frontend"));
        assert_ne!(id, derive_action_id("restart backend"));
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
