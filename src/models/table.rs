//! File-backed context window table.
//!
//! The table is a JSON object mapping model keys to token limits. It lives in
//! a user-writable location, is seeded once from the built-in defaults, and is
//! re-read on every lookup so out-of-band edits take effect immediately.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use directories::ProjectDirs;
use tokio::sync::Mutex;

use super::normalize::{fallback_keys, normalize_model_name};
use crate::{Error, Result};

/// Built-in defaults, copied verbatim into the user table on first use.
pub const BUILTIN_TABLE: &str = include_str!("context_windows.json");

pub const TABLE_FILE_NAME: &str = "context_windows.json";

/// Serializes read-modify-write cycles on table files within this process.
fn write_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// A loaded snapshot of the table with every key normalized.
#[derive(Debug, Clone, Default)]
pub struct ContextWindowMap {
    entries: HashMap<String, u64>,
}

impl ContextWindowMap {
    /// Parse a table document. Entries whose value is not a non-negative
    /// integer are skipped. When two raw keys normalize to the same key, the
    /// one that was already normalized wins.
    pub fn parse(document: &str) -> Result<Self> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(document)?;
        let mut entries = HashMap::with_capacity(raw.len());
        let mut exact = HashMap::with_capacity(raw.len());

        for (key, value) in raw {
            let Some(limit) = value.as_u64() else {
                tracing::warn!(key = %key, value = %value, "ignoring non-integer context window entry");
                continue;
            };
            let normalized = normalize_model_name(&key);
            if normalized == key {
                exact.insert(normalized, limit);
            } else {
                entries.entry(normalized).or_insert(limit);
            }
        }
        entries.extend(exact);
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<u64> {
        self.entries.get(key).copied()
    }

    /// Exact match on `key`, then progressively shorter prefixes.
    pub fn lookup<'a>(&self, key: &'a str) -> Option<(&'a str, u64)> {
        std::iter::once(key)
            .chain(fallback_keys(key))
            .find_map(|candidate| self.get(candidate).map(|limit| (candidate, limit)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Location of the user-owned table file.
#[derive(Debug, Clone)]
pub struct ContextWindowTable {
    path: PathBuf,
}

impl ContextWindowTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<platform config dir>/llm-invoke/context_windows.json`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "llm-invoke").map(|dirs| dirs.config_dir().join(TABLE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the built-in table if no file exists yet.
    ///
    /// Returns `true` when this call created the file. An existing file is
    /// never touched, so user edits survive any number of seeding attempts.
    /// The table is written to a temporary sibling and then hard-linked into
    /// place, so the file never appears partially written.
    pub async fn ensure_seeded(&self) -> Result<bool> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.temp_sibling();
        tokio::fs::write(&tmp, BUILTIN_TABLE).await?;
        let linked = tokio::fs::hard_link(&tmp, &self.path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "seeded context window table");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Seed if needed, then read and parse the current file contents.
    pub async fn load(&self) -> Result<ContextWindowMap> {
        self.ensure_seeded().await?;
        let document = tokio::fs::read_to_string(&self.path).await?;
        ContextWindowMap::parse(&document).map_err(|e| {
            Error::Parse(format!(
                "context window table {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Insert or overwrite one entry, keyed by the normalized model name.
    ///
    /// The file is rewritten through a temporary sibling and an atomic rename,
    /// so concurrent readers never observe a half-written table. Inserts from
    /// the same process are serialized so none of them is lost.
    pub async fn insert(&self, model: &str, limit: u64) -> Result<()> {
        let _guard = write_lock().lock().await;
        self.ensure_seeded().await?;
        let document = tokio::fs::read_to_string(&self.path).await?;
        let mut raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(&document)?;
        raw.insert(normalize_model_name(model), serde_json::Value::from(limit));

        let tmp = self.temp_sibling();
        let content = serde_json::to_string_pretty(&raw)?;
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    fn temp_sibling(&self) -> PathBuf {
        self.path
            .with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_table_parses_and_is_normalized() {
        let map = ContextWindowMap::parse(BUILTIN_TABLE).unwrap();
        let raw: BTreeMap<String, u64> = serde_json::from_str(BUILTIN_TABLE).unwrap();
        assert_eq!(map.len(), raw.len());
        for key in raw.keys() {
            assert_eq!(&normalize_model_name(key), key);
        }
    }

    #[test]
    fn test_parse_normalizes_user_keys() {
        let map = ContextWindowMap::parse(r#"{"openai/GPT-4o-2024-08-06": 64000}"#).unwrap();
        assert_eq!(map.get("gpt-4o"), Some(64_000));
    }

    #[test]
    fn test_exact_key_beats_normalized_duplicate() {
        let map =
            ContextWindowMap::parse(r#"{"gpt-4o": 128000, "openai/gpt-4o-latest": 1}"#).unwrap();
        assert_eq!(map.get("gpt-4o"), Some(128_000));
    }

    #[test]
    fn test_parse_skips_invalid_values() {
        let map = ContextWindowMap::parse(r#"{"a": "lots", "b": -1, "c": 4096}"#).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("c"), Some(4096));
    }

    #[test]
    fn test_lookup_falls_back_to_prefix() {
        let map = ContextWindowMap::parse(r#"{"claude-sonnet-4-5": 200000}"#).unwrap();
        assert_eq!(
            map.lookup("claude-sonnet-4-5-thinking"),
            Some(("claude-sonnet-4-5", 200_000))
        );
        assert_eq!(map.lookup("gpt-4o"), None);
    }

    #[tokio::test]
    async fn test_seeding_writes_builtin_verbatim() {
        let dir = TempDir::new().unwrap();
        let table = ContextWindowTable::new(dir.path().join("nested").join(TABLE_FILE_NAME));

        assert!(table.ensure_seeded().await.unwrap());
        let written = tokio::fs::read_to_string(table.path()).await.unwrap();
        assert_eq!(written, BUILTIN_TABLE);
    }

    #[tokio::test]
    async fn test_seeding_twice_keeps_user_edits() {
        let dir = TempDir::new().unwrap();
        let table = ContextWindowTable::new(dir.path().join(TABLE_FILE_NAME));

        assert!(table.ensure_seeded().await.unwrap());
        tokio::fs::write(table.path(), r#"{"my-model": 4096}"#)
            .await
            .unwrap();
        assert!(!table.ensure_seeded().await.unwrap());

        let map = table.load().await.unwrap();
        assert_eq!(map.get("my-model"), Some(4096));
        assert_eq!(map.get("gpt-4o"), None);
    }

    #[tokio::test]
    async fn test_insert_preserves_other_entries() {
        let dir = TempDir::new().unwrap();
        let table = ContextWindowTable::new(dir.path().join(TABLE_FILE_NAME));
        tokio::fs::write(table.path(), r#"{"a-model": 1000}"#)
            .await
            .unwrap();

        table.insert("vendor/B-Model-20250101", 2000).await.unwrap();

        let map = table.load().await.unwrap();
        assert_eq!(map.get("a-model"), Some(1000));
        assert_eq!(map.get("b-model"), Some(2000));
    }

    #[tokio::test]
    async fn test_load_reports_malformed_file() {
        let dir = TempDir::new().unwrap();
        let table = ContextWindowTable::new(dir.path().join(TABLE_FILE_NAME));
        tokio::fs::write(table.path(), "not json").await.unwrap();

        let err = table.load().await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn test_concurrent_inserts_are_all_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(TABLE_FILE_NAME);
        tokio::fs::write(&path, "{}").await.unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let table = ContextWindowTable::new(path.clone());
                tokio::spawn(async move { table.insert(&format!("model-{i}"), 1000 + i).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let map = ContextWindowTable::new(path).load().await.unwrap();
        assert_eq!(map.len(), 16);
        assert_eq!(map.get("model-7"), Some(1007));
    }

    #[tokio::test]
    async fn test_seeding_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let table = ContextWindowTable::new(dir.path().join(TABLE_FILE_NAME));
        table.ensure_seeded().await.unwrap();
        table.ensure_seeded().await.unwrap();

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec![TABLE_FILE_NAME.to_string()]);
    }
}
