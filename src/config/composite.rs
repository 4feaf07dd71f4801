//! Layered configuration: earlier providers shadow later ones.

use std::collections::BTreeSet;

use super::ConfigResult;
use super::env::EnvConfigProvider;
use super::memory::MemoryConfigProvider;
use super::provider::ConfigProvider;

pub struct CompositeConfigProvider {
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    /// Runtime overrides first, then `LLM_INVOKE_*` environment variables.
    pub fn standard(overrides: MemoryConfigProvider) -> Self {
        Self::new()
            .provider(Box::new(overrides))
            .provider(Box::new(EnvConfigProvider::default()))
    }

    /// Append a provider with lower priority than those already added.
    pub fn provider(mut self, provider: Box<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

impl Default for CompositeConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ConfigProvider for CompositeConfigProvider {
    fn name(&self) -> &str {
        "composite"
    }

    async fn get_raw(&self, key: &str) -> ConfigResult<Option<String>> {
        for provider in &self.providers {
            if let Some(value) = provider.get_raw(key).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Writes go to the highest-priority provider.
    async fn set_raw(&self, key: &str, value: &str) -> ConfigResult<()> {
        if let Some(provider) = self.providers.first() {
            provider.set_raw(key, value).await?;
        }
        Ok(())
    }

    /// Removes the key from every writable layer. Read-only layers are skipped.
    async fn delete(&self, key: &str) -> ConfigResult<bool> {
        let mut deleted = false;
        for provider in &self.providers {
            match provider.delete(key).await {
                Ok(removed) => deleted |= removed,
                Err(e) => tracing::debug!(provider = provider.name(), error = %e, "delete skipped"),
            }
        }
        Ok(deleted)
    }

    async fn list_keys(&self, prefix: &str) -> ConfigResult<Vec<String>> {
        let mut all = BTreeSet::new();
        for provider in &self.providers {
            all.extend(provider.list_keys(prefix).await?);
        }
        Ok(all.into_iter().collect())
    }
}

impl std::fmt::Debug for CompositeConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeConfigProvider")
            .field("providers", &self.provider_names())
            .finish()
    }
}
