use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path))
    }
}
