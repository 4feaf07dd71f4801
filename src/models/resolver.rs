use super::ModelId;
use super::normalize::normalize_model_name;
use super::table::ContextWindowTable;
use crate::{Error, Result};

/// A successful context window lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub limit: u64,
    /// Normalized form of the requested identifier.
    pub key: String,
    /// Table key that produced the limit; shorter than `key` after a prefix fallback.
    pub matched: String,
}

impl Resolution {
    pub fn is_exact(&self) -> bool {
        self.key == self.matched
    }
}

/// Resolves model identifiers to context window sizes.
///
/// Every call re-reads the table file; nothing is cached between lookups.
#[derive(Debug, Clone)]
pub struct ContextWindowResolver {
    table: ContextWindowTable,
}

impl ContextWindowResolver {
    pub fn new(table: ContextWindowTable) -> Self {
        Self { table }
    }

    /// Resolver over the platform default table location.
    pub fn from_default_path() -> Result<Self> {
        ContextWindowTable::default_path()
            .map(|path| Self::new(ContextWindowTable::new(path)))
            .ok_or_else(|| Error::Config("no home directory for the context window table".into()))
    }

    pub fn table(&self) -> &ContextWindowTable {
        &self.table
    }

    pub async fn resolve(&self, model: &ModelId) -> Result<Resolution> {
        let map = self.table.load().await?;
        let key = normalize_model_name(model.as_str());

        match map.lookup(&key) {
            Some((matched, limit)) => {
                if matched != key {
                    tracing::debug!(
                        model = %model,
                        key = %key,
                        matched = %matched,
                        "context window resolved via prefix fallback"
                    );
                }
                Ok(Resolution {
                    limit,
                    matched: matched.to_string(),
                    key,
                })
            }
            None => Err(Error::ContextWindowUnresolved {
                model: model.to_string(),
                key,
            }),
        }
    }

    /// Record `limit` under the model's normalized key so later lookups are exact.
    pub async fn remember(&self, model: &ModelId, limit: u64) -> Result<()> {
        self.table.insert(model.as_str(), limit).await
    }

    /// Resolve, and pin fallback matches into the table.
    pub async fn resolve_and_remember(&self, model: &ModelId) -> Result<Resolution> {
        let resolution = self.resolve(model).await?;
        if !resolution.is_exact() {
            self.remember(model, resolution.limit).await?;
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::table::TABLE_FILE_NAME;
    use tempfile::TempDir;

    fn resolver(dir: &TempDir) -> ContextWindowResolver {
        ContextWindowResolver::new(ContextWindowTable::new(dir.path().join(TABLE_FILE_NAME)))
    }

    #[tokio::test]
    async fn test_prefixed_dated_id_matches_plain_key() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);

        let dated = resolver
            .resolve(&"anthropic/claude-sonnet-4-5-20250929".into())
            .await
            .unwrap();
        let plain = resolver.resolve(&"claude-sonnet-4-5".into()).await.unwrap();

        assert_eq!(dated.matched, plain.matched);
        assert_eq!(dated.limit, plain.limit);
        assert!(dated.is_exact());
    }

    #[tokio::test]
    async fn test_unknown_model_is_unresolved() {
        let dir = TempDir::new().unwrap();
        let err = resolver(&dir)
            .resolve(&"acme/totally-unknown".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ContextWindowUnresolved { ref key, .. } if key == "totally-unknown"
        ));
    }

    #[tokio::test]
    async fn test_edits_visible_on_next_lookup() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);
        let model: ModelId = "gpt-4o".into();

        assert_eq!(resolver.resolve(&model).await.unwrap().limit, 128_000);

        tokio::fs::write(resolver.table().path(), r#"{"gpt-4o": 32000}"#)
            .await
            .unwrap();
        assert_eq!(resolver.resolve(&model).await.unwrap().limit, 32_000);
    }

    #[tokio::test]
    async fn test_resolve_and_remember_pins_fallback() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(&dir);
        let model: ModelId = "openrouter/claude-sonnet-4-5-thinking".into();

        let first = resolver.resolve_and_remember(&model).await.unwrap();
        assert!(!first.is_exact());

        let second = resolver.resolve(&model).await.unwrap();
        assert!(second.is_exact());
        assert_eq!(second.limit, first.limit);
    }
}
