//! Concrete [`ConfigSource`](super::ConfigSource) implementations.
//!
//! Provides the file-based source (JSON always, YAML and TOML behind
//! feature flags) and the [`parse_config_str`] helper for format-specific
//! deserialization into the raw model.

pub mod file_source;

use std::path::Path;

use sha2::{Digest, Sha256};

use super::model::RawConfig;
use super::ConfigSource;
use crate::error::ProxyHostError;

/// Parse a config string based on file extension.
pub fn parse_config_str(
    ext: &str,
    content: &str,
    path_display: &str,
) -> Result<RawConfig, ProxyHostError> {
    let malformed = |e: &dyn std::fmt::Display| {
        ProxyHostError::invalid("(document)", format!("{path_display}: {e}"))
    };

    match ext {
        "json" => serde_json::from_str(content).map_err(|e| malformed(&e)),

        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|e| malformed(&e)),

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(|e| malformed(&e)),

        other => Err(ProxyHostError::UnsupportedFormat(other.to_string())),
    }
}

/// Open a file source, picking the format from the extension.
pub fn open_file(path: &Path) -> Result<Box<dyn ConfigSource>, ProxyHostError> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "json" => Ok(Box::new(file_source::FileSource::new(path.to_path_buf(), "json"))),

        #[cfg(feature = "yaml")]
        "yaml" | "yml" => Ok(Box::new(file_source::FileSource::new(
            path.to_path_buf(),
            "yaml",
        ))),

        #[cfg(feature = "toml")]
        "toml" => Ok(Box::new(file_source::FileSource::new(path.to_path_buf(), "toml"))),

        other => Err(ProxyHostError::UnsupportedFormat(other.to_string())),
    }
}

/// Compute a lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_stable_hex() {
        let a = sha256_hex(b"listeners");
        assert_eq!(a.len(), 64);
        assert_eq!(a, sha256_hex(b"listeners"));
        assert_ne!(a, sha256_hex(b"routes"));
    }

    #[test]
    fn json_always_parses() {
        let raw = parse_config_str("json", r#"{"routes":[]}"#, "inline").unwrap();
        assert!(raw.routes.is_empty());
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = parse_config_str("ini", "", "x.ini").unwrap_err();
        assert!(matches!(err, ProxyHostError::UnsupportedFormat(ref e) if e == "ini"));
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn yaml_parses_same_model() {
        let raw = parse_config_str(
            "yaml",
            "listeners:\n  - addr: 127.0.0.1\n    port: 8080\n",
            "inline.yaml",
        )
        .unwrap();
        assert_eq!(raw.listeners.len(), 1);
    }
}
