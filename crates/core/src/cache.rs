use crate::error::ProcessingError;
use crate::models::SHEET_SEPARATOR;
use crate::table::Table;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct CachedTable {
    key: String,
    /// Sheet position within its source file.
    #[serde(default)]
    position: usize,
    stored_at: DateTime<Utc>,
    table: Table,
}

/// One JSON file per dataframe key under `root`.
#[derive(Debug, Clone)]
pub struct TableCache {
    root: PathBuf,
}

impl TableCache {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ProcessingError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        let name: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        self.root.join(format!("{name}.json"))
    }

    /// Stores `table` under `key`. `position` is the sheet's place in its
    /// workbook and restores sheet order on reload.
    pub async fn store(&self, key: &str, position: usize, table: &Table) -> Result<(), ProcessingError> {
        let entry = CachedTable {
            key: key.to_string(),
            position,
            stored_at: Utc::now(),
            table: table.clone(),
        };
        let path = self.path_for(key);
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, serde_json::to_vec(&entry)?).await?;
        tokio::fs::rename(&temp, &path).await?;
        debug!(key, rows = table.row_count(), "cached table");
        Ok(())
    }

    pub async fn load(&self, key: &str) -> Result<Option<Table>, ProcessingError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice::<CachedTable>(&bytes)?.table)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Returns whether a table was stored under `key`.
    pub async fn remove(&self, key: &str) -> Result<bool, ProcessingError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Removes `key` and, for a bare source, every `source#sheet` under it.
    pub async fn remove_document(&self, key: &str) -> Result<usize, ProcessingError> {
        let prefix = format!("{key}{SHEET_SEPARATOR}");
        let mut removed = 0;
        for (cached_key, _) in self.load_all().await? {
            if (cached_key == key || cached_key.starts_with(&prefix)) && self.remove(&cached_key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every readable cached table, grouped by source with each workbook's
    /// sheets in their stored order. Unreadable or ragged files are logged
    /// and skipped.
    pub async fn load_all(&self) -> Result<Vec<(String, Table)>, ProcessingError> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<CachedTable>(&bytes).map_err(ProcessingError::from),
                Err(error) => Err(error.into()),
            };
            match parsed {
                Ok(cached) => entries.push(cached),
                Err(error) => warn!(path = %path.display(), %error, "skipping unreadable cached table"),
            }
        }
        entries.sort_by(|a, b| {
            source_of(&a.key)
                .cmp(source_of(&b.key))
                .then(a.position.cmp(&b.position))
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(entries.into_iter().map(|cached| (cached.key, cached.table)).collect())
    }
}

fn source_of(key: &str) -> &str {
    key.split_once(SHEET_SEPARATOR).map_or(key, |(source, _)| source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn table(value: &str) -> Table {
        Table::new(vec!["Name".to_string()], vec![vec![Cell::from(value)]]).expect("one column")
    }

    #[tokio::test]
    async fn tables_round_trip_by_key() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let cache = TableCache::open(dir.path()).await?;
        cache.store("book.xlsx#Revenue", 0, &table("Ada")).await?;

        assert_eq!(cache.load("book.xlsx#Revenue").await?, Some(table("Ada")));
        assert_eq!(cache.load("book.xlsx#Notes").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn load_all_skips_garbage_and_sorts() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let cache = TableCache::open(dir.path()).await?;
        cache.store("b.csv", 0, &table("B")).await?;
        cache.store("a.csv", 0, &table("A")).await?;
        tokio::fs::write(dir.path().join("junk.json"), b"{not json").await?;

        let keys: Vec<String> = cache.load_all().await?.into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["a.csv".to_string(), "b.csv".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn workbook_sheets_reload_in_stored_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let cache = TableCache::open(dir.path()).await?;
        cache.store("book.xlsx#Summary", 0, &table("s")).await?;
        cache.store("book.xlsx#Appendix", 1, &table("a")).await?;
        cache.store("archive.csv", 0, &table("c")).await?;

        let keys: Vec<String> = cache.load_all().await?.into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["archive.csv", "book.xlsx#Summary", "book.xlsx#Appendix"]);
        Ok(())
    }

    #[tokio::test]
    async fn ragged_cached_tables_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let cache = TableCache::open(dir.path()).await?;
        cache.store("good.csv", 0, &table("ok")).await?;
        let ragged = serde_json::json!({
            "key": "bad.csv",
            "stored_at": Utc::now(),
            "table": {"columns": ["A", "B"], "rows": [["1"]]},
        });
        tokio::fs::write(dir.path().join("ragged.json"), serde_json::to_vec(&ragged)?).await?;

        let loaded = cache.load_all().await?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "good.csv");
        Ok(())
    }

    #[tokio::test]
    async fn removing_a_source_drops_its_sheets() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let cache = TableCache::open(dir.path()).await?;
        cache.store("book.xlsx#Revenue", 0, &table("1")).await?;
        cache.store("book.xlsx#Notes", 1, &table("2")).await?;
        cache.store("bookkeeping.csv", 0, &table("3")).await?;

        assert_eq!(cache.remove_document("book.xlsx").await?, 2);
        assert!(!cache.remove("book.xlsx#Revenue").await?);
        assert_eq!(cache.load_all().await?.len(), 1);
        Ok(())
    }
}
