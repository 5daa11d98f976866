//! Launch-command catalog.
//!
//! Lets adapters reference a known server by id instead of carrying an inline
//! `docker run` command. The static catalog is a TOML file:
//!
//! ```toml
//! [[server]]
//! id = "uyuni"
//! command = "docker run -it --rm -e UYUNI_SERVER=http://uyuni.local ghcr.io/uyuni-project/mcp-server-uyuni:latest"
//! port = 8000
//! description = "Uyuni systems management"
//! ```

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub command: String,
    /// Container port to assume when the command declares none.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults merged under the adapter's own environment overrides.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Catalog entry '{id}' not found")]
    NotFound { id: String },

    #[error("Failed to read catalog {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Invalid catalog: {reason}")]
    Invalid { reason: String },
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::InvalidAdapter,
            Self::Unreadable { .. } | Self::Invalid { .. } => ErrorKind::ConfigurationFatal,
        }
    }
}

/// Where launch commands for catalog ids come from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn resolve_launch_spec_source(&self, id: &str) -> Result<CatalogEntry, CatalogError>;

    async fn entries(&self) -> Vec<CatalogEntry>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "server")]
    servers: Vec<CatalogEntry>,
}

/// Catalog loaded once from TOML.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl StaticCatalog {
    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw).map_err(|e| CatalogError::Invalid {
            reason: e.to_string(),
        })?;

        let mut entries = HashMap::new();
        for entry in file.servers {
            if entry.id.trim().is_empty() {
                return Err(CatalogError::Invalid {
                    reason: "entry with empty id".to_string(),
                });
            }
            if let Some(dup) = entries.insert(entry.id.clone(), entry) {
                return Err(CatalogError::Invalid {
                    reason: format!("duplicate id '{}'", dup.id),
                });
            }
        }
        Ok(Self { entries })
    }

    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CatalogError::Unreadable {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        let catalog = Self::from_toml_str(&raw)?;
        tracing::info!(path = %path.display(), entries = catalog.entries.len(), "Loaded catalog");
        Ok(catalog)
    }
}

#[async_trait]
impl CatalogSource for StaticCatalog {
    async fn resolve_launch_spec_source(&self, id: &str) -> Result<CatalogEntry, CatalogError> {
        self.entries
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound { id: id.to_string() })
    }

    async fn entries(&self) -> Vec<CatalogEntry> {
        let mut all: Vec<CatalogEntry> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[[server]]
id = "uyuni"
command = "docker run -e UYUNI_SERVER=http://dummy.domain.com ghcr.io/example/server:latest"
port = 8000

[[server]]
id = "echo"
command = "docker run echo/img"
env = { LOG_LEVEL = "debug" }
"#;

    #[tokio::test]
    async fn test_resolve() {
        let catalog = StaticCatalog::from_toml_str(SAMPLE).unwrap();
        let entry = catalog.resolve_launch_spec_source("uyuni").await.unwrap();
        assert_eq!(entry.port, Some(8000));
        assert!(entry.command.starts_with("docker run"));

        let echo = catalog.resolve_launch_spec_source("echo").await.unwrap();
        assert_eq!(echo.env.get("LOG_LEVEL").map(String::as_str), Some("debug"));

        assert!(matches!(
            catalog.resolve_launch_spec_source("missing").await,
            Err(CatalogError::NotFound { .. })
        ));
        assert_eq!(catalog.entries().await.len(), 2);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let raw = "[[server]]\nid = \"a\"\ncommand = \"docker run x\"\n[[server]]\nid = \"a\"\ncommand = \"docker run y\"\n";
        assert!(matches!(
            StaticCatalog::from_toml_str(raw),
            Err(CatalogError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let catalog = StaticCatalog::load(file.path()).await.unwrap();
        assert!(catalog.resolve_launch_spec_source("echo").await.is_ok());

        let missing = StaticCatalog::load(Path::new("/nonexistent/catalog.toml")).await;
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::ConfigurationFatal);
    }
}
