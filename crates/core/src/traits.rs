use crate::error::{AnswerError, IndexError};
use crate::index::{self, MetadataFilter, DEFAULT_BATCH_SIZE};
use crate::models::{Chunk, ChunkMetadata, IndexRecord, IndexStats, IndexedDocument, RetrievalResult, StoredChunk};
use crate::table::Table;
use async_trait::async_trait;

/// Similarity-searchable store of embedded chunks.
///
/// Backends implement the primitives; batching, per-item fallback and
/// source-keyed deletion/enumeration are shared provided methods.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn batch_size(&self) -> usize {
        DEFAULT_BATCH_SIZE
    }

    /// Stores every record or none of them.
    async fn insert_batch(&self, records: &[IndexRecord]) -> Result<(), IndexError>;

    /// Nearest chunks first, by cosine distance.
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>, IndexError>;

    async fn scan(&self) -> Result<Vec<StoredChunk>, IndexError>;

    async fn delete_ids(&self, ids: &[String]) -> Result<usize, IndexError>;

    async fn count(&self) -> Result<usize, IndexError>;

    async fn add(&self, chunks: Vec<Chunk>, ids: Option<Vec<String>>) -> Result<Vec<String>, IndexError> {
        index::add_in_batches(self, chunks, ids).await
    }

    async fn delete_by_source(&self, key: &str) -> Result<usize, IndexError> {
        index::delete_by_source(self, key).await
    }

    async fn enumerate_documents(&self) -> Result<Vec<IndexedDocument>, IndexError> {
        index::enumerate_documents(self).await
    }

    async fn stats(&self) -> Result<IndexStats, IndexError> {
        Ok(IndexStats {
            total_chunks: self.count().await?,
        })
    }

    async fn chunk_metadata(&self) -> Result<Vec<ChunkMetadata>, IndexError> {
        Ok(self.scan().await?.into_iter().map(|chunk| chunk.metadata).collect())
    }
}

/// Answers a natural-language question against one table.
#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, table: &Table, query: &str) -> Result<String, AnswerError>;
}
