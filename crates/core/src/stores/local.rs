use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::IndexError;
use crate::index::{MetadataFilter, DEFAULT_BATCH_SIZE};
use crate::models::{ChunkMetadata, IndexRecord, RetrievalResult, StoredChunk};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub const SNAPSHOT_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    id: String,
    text: String,
    metadata: ChunkMetadata,
    embedding: Vec<f32>,
    content_hash: String,
    added_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimensions: usize,
    records: Vec<StoredRecord>,
}

/// In-process index with brute-force cosine search, persisted as a JSON
/// snapshot that is rewritten after every mutation.
pub struct LocalVectorIndex {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    records: RwLock<Vec<StoredRecord>>,
    batch_size: usize,
}

impl LocalVectorIndex {
    pub async fn open(data_dir: impl AsRef<Path>, embedder: Arc<dyn Embedder>) -> Result<Self, IndexError> {
        let data_dir = data_dir.as_ref();
        tokio::fs::create_dir_all(data_dir).await?;
        let path = data_dir.join(SNAPSHOT_FILE);

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                if !snapshot.records.is_empty() && snapshot.dimensions != embedder.dimensions() {
                    return Err(IndexError::BackendResponse {
                        backend: "local".to_string(),
                        details: format!(
                            "snapshot holds {}-dimensional vectors but the embedder produces {}",
                            snapshot.dimensions,
                            embedder.dimensions()
                        ),
                    });
                }
                snapshot.records
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        info!(path = %path.display(), chunks = records.len(), "opened local index");
        Ok(Self {
            path,
            embedder,
            records: RwLock::new(records),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, records: &[StoredRecord]) -> Result<(), IndexError> {
        let snapshot = Snapshot {
            dimensions: self.embedder.dimensions(),
            records: records.to_vec(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        let temp = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp, bytes).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        debug!(chunks = records.len(), "persisted local index");
        Ok(())
    }
}

fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn insert_batch(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::new();
        for record in records {
            if !seen.insert(record.id.as_str()) {
                return Err(IndexError::DuplicateId(record.id.clone()));
            }
        }

        let texts: Vec<String> = records.iter().map(|record| record.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != records.len() {
            return Err(IndexError::Embedding(format!(
                "expected {} embeddings, got {}",
                records.len(),
                embeddings.len()
            )));
        }

        let mut stored = self.records.write().await;
        if let Some(existing) = records
            .iter()
            .find(|record| stored.iter().any(|s| s.id == record.id))
        {
            return Err(IndexError::DuplicateId(existing.id.clone()));
        }

        let previous_len = stored.len();
        let now = Utc::now();
        stored.extend(records.iter().zip(embeddings).map(|(record, embedding)| StoredRecord {
            id: record.id.clone(),
            text: record.text.clone(),
            metadata: record.metadata.clone(),
            embedding,
            content_hash: content_hash(&record.text),
            added_at: now,
        }));

        if let Err(error) = self.persist(&stored).await {
            stored.truncate(previous_len);
            return Err(error);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Embedding("no vector returned for query".to_string()))?;

        let stored = self.records.read().await;
        let mut results: Vec<RetrievalResult> = stored
            .iter()
            .filter(|record| filter.map_or(true, |f| f.matches(&record.metadata)))
            .map(|record| RetrievalResult {
                id: record.id.clone(),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                distance: Some(1.0 - cosine_similarity(&query_vector, &record.embedding)),
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);
        Ok(results)
    }

    async fn scan(&self) -> Result<Vec<StoredChunk>, IndexError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|record| StoredChunk {
                id: record.id.clone(),
                metadata: record.metadata.clone(),
            })
            .collect())
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<usize, IndexError> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut stored = self.records.write().await;
        let remaining: Vec<StoredRecord> = stored
            .iter()
            .filter(|record| !doomed.contains(record.id.as_str()))
            .cloned()
            .collect();
        let deleted = stored.len() - remaining.len();
        if deleted == 0 {
            return Ok(0);
        }

        self.persist(&remaining).await?;
        *stored = remaining;
        Ok(deleted)
    }

    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.records.read().await.len())
    }
}
