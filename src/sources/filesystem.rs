//! Filesystem source handler.
//!
//! Loads files from a configured base directory. Paths must stay inside
//! the base and carry an allow-listed extension; anything else is rejected
//! at validation time.

use crate::sources::handler::{SourceContent, SourceContext, SourceError, SourceHandler};
use crate::config::types::SourceConfig;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};

const ALLOWED_EXTENSIONS: &[&str] = &["md", "txt", "json", "csv", "html"];

pub struct FilesystemHandler {
    base_dir: PathBuf,
}

impl FilesystemHandler {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn relative_path(config: &SourceConfig) -> Result<&str, SourceError> {
        config
            .config
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::InvalidConfig("filesystem source needs a 'path'".into()))
    }

    /// Reject absolute paths and any traversal out of the base.
    fn check_confinement(path: &str) -> Result<(), SourceError> {
        let path = Path::new(path);
        if path.is_absolute() {
            return Err(SourceError::InvalidConfig(
                "path must be relative to the source base".into(),
            ));
        }
        for component in path.components() {
            if matches!(component, Component::ParentDir) {
                return Err(SourceError::InvalidConfig(
                    "path must not traverse outside the source base".into(),
                ));
            }
        }
        Ok(())
    }

    fn check_extension(path: &str) -> Result<(), SourceError> {
        let allowed = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| ALLOWED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if allowed {
            Ok(())
        } else {
            Err(SourceError::InvalidConfig(format!(
                "extension not allowed (permitted: {})",
                ALLOWED_EXTENSIONS.join(", ")
            )))
        }
    }
}

#[async_trait::async_trait]
impl SourceHandler for FilesystemHandler {
    fn default_ttl(&self) -> u64 {
        60
    }

    fn validate(&self, config: &SourceConfig) -> Result<(), SourceError> {
        let rel = Self::relative_path(config)?;
        Self::check_confinement(rel)?;
        Self::check_extension(rel)
    }

    async fn load(
        &self,
        config: &SourceConfig,
        _ctx: &SourceContext,
    ) -> Result<SourceContent, SourceError> {
        self.validate(config)?;
        let rel = Self::relative_path(config)?;
        let path = self.base_dir.join(rel);

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => SourceError::NotFound(config.id.clone()),
                _ => SourceError::Load(format!("{}: {}", path.display(), err)),
            })?;

        Ok(SourceContent {
            content,
            meta: json!({ "path": rel, "bytes": path.metadata().map(|m| m.len()).unwrap_or(0) }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::User;

    fn source(path: &str) -> SourceConfig {
        serde_json::from_value(json!({
            "id": "docs",
            "type": "filesystem",
            "config": {"path": path}
        }))
        .unwrap()
    }

    fn ctx() -> SourceContext {
        SourceContext::for_user(User::anonymous(), "en")
    }

    #[tokio::test]
    async fn test_load_within_base() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# Notes").unwrap();

        let handler = FilesystemHandler::new(dir.path());
        let loaded = handler.load(&source("notes.md"), &ctx()).await.unwrap();
        assert_eq!(loaded.content, "# Notes");
        assert_eq!(loaded.meta["path"], "notes.md");
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FilesystemHandler::new(dir.path());
        assert!(matches!(
            handler.load(&source("../secrets.txt"), &ctx()).await,
            Err(SourceError::InvalidConfig(_))
        ));
        assert!(matches!(
            handler.load(&source("/etc/passwd.txt"), &ctx()).await,
            Err(SourceError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_disallowed_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FilesystemHandler::new(dir.path());
        assert!(matches!(
            handler.load(&source("binary.exe"), &ctx()).await,
            Err(SourceError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let handler = FilesystemHandler::new(dir.path());
        assert!(matches!(
            handler.load(&source("absent.md"), &ctx()).await,
            Err(SourceError::NotFound(_))
        ));
    }
}
