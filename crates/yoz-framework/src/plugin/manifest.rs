//! Plugin manifest file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LifecycleError, LifecycleResult};

/// Metadata read from a plugin directory's manifest.
///
/// ```json
/// { "name": "forest", "altername": "种树", "version": "1.2.0" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Unique plugin name, also the factory lookup key.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altername: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl Manifest {
    /// Creates a manifest with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            altername: None,
            version: None,
            author: None,
            description: None,
            website: None,
        }
    }

    /// Parses manifest JSON. `path` is only used in error messages.
    pub fn parse(path: &Path, text: &str) -> LifecycleResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| LifecycleError::manifest(path, e.to_string()))?;
        match value.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => {}
            Some(Value::String(_)) => {
                return Err(LifecycleError::manifest(path, "field 'name' is empty"));
            }
            Some(_) => {
                return Err(LifecycleError::manifest(path, "field 'name' must be a string"));
            }
            None => {
                return Err(LifecycleError::manifest(path, "missing required field 'name'"));
            }
        }
        serde_json::from_value(value).map_err(|e| LifecycleError::manifest(path, e.to_string()))
    }

    /// Reads and parses the manifest at `path`.
    pub async fn read(path: &Path) -> LifecycleResult<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LifecycleError::io(path, e))?;
        Self::parse(path, &text)
    }

    /// Alternate name if present, otherwise the name.
    pub fn display_name(&self) -> &str {
        self.altername.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> LifecycleResult<Manifest> {
        Manifest::parse(Path::new("module/test/manifest.json"), text)
    }

    #[test]
    fn test_full_manifest() {
        let manifest = parse(
            r#"{"name": "forest", "altername": "种树", "version": "1.2.0",
                "author": "cat", "description": "grow trees", "website": "https://example.org"}"#,
        )
        .unwrap();
        assert_eq!(manifest.name, "forest");
        assert_eq!(manifest.display_name(), "种树");
        assert_eq!(manifest.version.as_deref(), Some("1.2.0"));
    }

    #[test]
    fn test_optional_fields_default() {
        let manifest = parse(r#"{"name": "dice", "unknown": true}"#).unwrap();
        assert_eq!(manifest, Manifest::new("dice"));
        assert_eq!(manifest.display_name(), "dice");
    }

    #[test]
    fn test_missing_name_is_manifest_error() {
        for text in [r#"{"version": "1"}"#, r#"{"name": ""}"#, r#"{"name": 3}"#, "not json"] {
            assert!(
                matches!(parse(text), Err(LifecycleError::Manifest { .. })),
                "{text}"
            );
        }
    }
}
