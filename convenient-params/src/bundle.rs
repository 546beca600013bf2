//! Loading parameter bundles from JSON sidecar files.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// A complete experiment configuration read from one sidecar file.
///
/// The bundle is never merged over defaults: the value handed to the
/// executed script is exactly what the file contains.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBundle {
    /// Path of the sidecar file, or empty for in-memory bundles
    pub path: PathBuf,
    value: Value,
    /// SHA256 of the file contents
    pub checksum: String,
}

impl ParameterBundle {
    /// Load and parse a sidecar file.
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError::Io`] when the file cannot be read,
    /// [`ParamsError::Parse`] for malformed JSON and
    /// [`ParamsError::NotAnObject`] when the top level is not an object.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ParamsError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ParamsError::Io(path.to_path_buf(), e.to_string()))?;

        let bundle = Self::parse(path, &content)?;
        debug!(
            "Loaded parameter bundle {} (sha256 {})",
            path.display(),
            bundle.checksum
        );
        Ok(bundle)
    }

    /// Parse sidecar text that was read from `path`.
    ///
    /// # Errors
    ///
    /// See [`ParameterBundle::load`].
    pub fn parse(path: impl AsRef<Path>, content: &str) -> Result<Self, ParamsError> {
        let path = path.as_ref();
        let value: Value = serde_json::from_str(content)
            .map_err(|e| ParamsError::Parse(path.to_path_buf(), e.to_string()))?;
        if !value.is_object() {
            return Err(ParamsError::NotAnObject(path.to_path_buf()));
        }

        Ok(Self {
            path: path.to_path_buf(),
            value,
            checksum: calculate_checksum(content),
        })
    }

    /// Wrap an already parsed value.
    ///
    /// # Errors
    ///
    /// Returns [`ParamsError::NotAnObject`] when `value` is not a JSON object.
    pub fn from_value(value: Value) -> Result<Self, ParamsError> {
        if !value.is_object() {
            return Err(ParamsError::NotAnObject(PathBuf::new()));
        }
        let checksum = calculate_checksum(&value.to_string());
        Ok(Self {
            path: PathBuf::new(),
            value,
            checksum,
        })
    }

    /// The bundle as parsed.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// One top-level section, if present and an object.
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.value.get(name).and_then(Value::as_object)
    }

    /// Consume the bundle, returning the parsed value.
    pub fn into_value(self) -> Value {
        self.value
    }
}

fn calculate_checksum(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Failure to turn a sidecar file into a [`ParameterBundle`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParamsError {
    /// File system I/O error
    #[error("IO error reading {0}: {1}")]
    Io(PathBuf, String),

    /// JSON parsing error
    #[error("Parse error in {0}: {1}")]
    Parse(PathBuf, String),

    /// The document is valid JSON but not an object
    #[error("Parameter bundle {0} must be a JSON object")]
    NotAnObject(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_keeps_every_field() {
        let text = r#"{"inputParameters": {"custom": [1, 2]}, "extra": null}"#;
        let bundle = ParameterBundle::parse("a.json", text).unwrap();
        assert_eq!(bundle.value()["inputParameters"]["custom"], json!([1, 2]));
        assert_eq!(bundle.value()["extra"], Value::Null);
        assert!(bundle.section("inputParameters").is_some());
        assert!(bundle.section("extra").is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = ParameterBundle::parse("broken.json", "{\"a\": ").unwrap_err();
        assert!(matches!(err, ParamsError::Parse(ref p, _) if p == Path::new("broken.json")));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        let err = ParameterBundle::parse("list.json", "[1, 2, 3]").unwrap_err();
        assert_eq!(err, ParamsError::NotAnObject(PathBuf::from("list.json")));
    }

    #[test]
    fn test_checksum_tracks_content() {
        let a = ParameterBundle::parse("a.json", r#"{"x": 1}"#).unwrap();
        let b = ParameterBundle::parse("b.json", r#"{"x": 1}"#).unwrap();
        let c = ParameterBundle::parse("c.json", r#"{"x": 2}"#).unwrap();
        assert_eq!(a.checksum, b.checksum);
        assert_ne!(a.checksum, c.checksum);
        assert_eq!(a.checksum.len(), 64);
    }
}
