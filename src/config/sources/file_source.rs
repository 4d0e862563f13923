//! Async file-based config source with SHA256 change detection.
//!
//! [`FileSource`] reads the file via Tokio, deserializes it into the raw
//! model by extension, and versions it by the SHA256 of the file bytes.
//! Translation (and therefore placeholder expansion) happens later, in the
//! controller, so the same file can resolve differently per environment.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{parse_config_str, sha256_hex};
use crate::config::model::RawConfig;
use crate::config::{ConfigSource, ConfigVersion};
use crate::error::ProxyHostError;

pub struct FileSource {
    path: PathBuf,
    format: &'static str,
}

impl FileSource {
    #[must_use]
    pub const fn new(path: PathBuf, format: &'static str) -> Self {
        Self { path, format }
    }

    async fn read_content(&self) -> Result<String, ProxyHostError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProxyHostError::ConfigFileNotFound {
                    path: self.path.clone(),
                }
            } else {
                ProxyHostError::Io(e)
            }
        })
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &'static str {
        self.format
    }

    async fn load(&self) -> Result<(RawConfig, ConfigVersion), ProxyHostError> {
        let content = self.read_content().await?;
        let raw = parse_config_str(self.format, &content, &self.path.display().to_string())?;
        Ok((raw, ConfigVersion::Hash(sha256_hex(content.as_bytes()))))
    }

    async fn has_changed(&self, current: &ConfigVersion) -> Result<bool, ProxyHostError> {
        let content = self.read_content().await?;
        let hash = sha256_hex(content.as_bytes());
        Ok(*current != ConfigVersion::Hash(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("proxyhost-{}-{name}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn load_and_detect_change() {
        let path = temp_path("source.json");
        tokio::fs::write(&path, r#"{"routes":[]}"#).await.unwrap();

        let source = FileSource::new(path.clone(), "json");
        let (raw, version) = source.load().await.unwrap();
        assert!(raw.routes.is_empty());
        assert!(!source.has_changed(&version).await.unwrap());

        tokio::fs::write(&path, r#"{"routes":[{"match":"/a","upstream":"http://a:1"}]}"#)
            .await
            .unwrap();
        assert!(source.has_changed(&version).await.unwrap());

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let source = FileSource::new(temp_path("missing.json"), "json");
        assert!(matches!(
            source.load().await,
            Err(ProxyHostError::ConfigFileNotFound { .. })
        ));
    }
}
