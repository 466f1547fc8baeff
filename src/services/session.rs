use anyhow::Result;
use async_trait::async_trait;
use log::warn;

/// Gate consulted before a story is launched.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate(&self) -> Result<bool>;
}

/// Accepts the session when a non-blank API key is configured.
#[derive(Debug, Clone)]
pub struct ApiKeyValidator {
    api_key: Option<String>,
}

impl ApiKeyValidator {
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            api_key: api_key.map(str::to_string),
        }
    }
}

#[async_trait]
impl SessionValidator for ApiKeyValidator {
    async fn validate(&self) -> Result<bool> {
        let ok = self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if !ok {
            warn!("No API key configured; refusing to start a story");
        }
        Ok(ok)
    }
}

/// Validator that always answers the same way.
#[derive(Debug, Clone, Copy)]
pub struct StaticValidator(pub bool);

#[async_trait]
impl SessionValidator for StaticValidator {
    async fn validate(&self) -> Result<bool> {
        Ok(self.0)
    }
}
