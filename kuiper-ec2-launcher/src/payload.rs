//! Agent payload read from the local filesystem.

use std::path::PathBuf;

use async_trait::async_trait;
use kuiper_launcher::PayloadProvider;
use tracing::debug;

/// Serves the agent payload from a fixed local file.
#[derive(Debug, Clone)]
pub struct FilePayloadProvider {
    path: PathBuf,
}

impl FilePayloadProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl PayloadProvider for FilePayloadProvider {
    async fn fetch(&self, name: &str) -> std::io::Result<Vec<u8>> {
        let bytes = tokio::fs::read(&self.path).await?;
        debug!("Read {} ({} bytes) from {}", name, bytes.len(), self.path.display());
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_reads_file() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("agent.jar");
        std::fs::write(&path, b"PK\x03\x04").expect("Failed to write payload");

        let provider = FilePayloadProvider::new(path);
        assert_eq!(provider.fetch("agent.jar").await.expect("fetch"), b"PK\x03\x04");
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let provider = FilePayloadProvider::new(dir.path().join("missing.jar"));
        assert!(provider.fetch("agent.jar").await.is_err());
    }
}
