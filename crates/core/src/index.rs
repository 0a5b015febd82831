use crate::error::{IndexError, ItemFailure};
use crate::models::{document_key, Chunk, ChunkMetadata, IndexRecord, IndexedDocument};
use crate::traits::VectorIndex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Eq { field: String, value: Value },
    In { field: String, values: Vec<Value> },
}

impl FilterCondition {
    pub fn field(&self) -> &str {
        match self {
            FilterCondition::Eq { field, .. } | FilterCondition::In { field, .. } => field,
        }
    }

    fn matches(&self, metadata: &ChunkMetadata) -> bool {
        let Some(actual) = metadata.field(self.field()) else {
            return false;
        };
        match self {
            FilterCondition::Eq { value, .. } => actual == *value,
            FilterCondition::In { values, .. } => values.contains(&actual),
        }
    }
}

/// Conjunction of equality and membership conditions on chunk metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetadataFilter {
    conditions: Vec<FilterCondition>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(FilterCondition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// A one-element set is stored as an equality.
    pub fn one_of<V: Into<Value>>(mut self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let field = field.into();
        let mut values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let condition = if values.len() == 1 {
            FilterCondition::Eq {
                field,
                value: values.remove(0),
            }
        } else {
            FilterCondition::In { field, values }
        };
        self.conditions.push(condition);
        self
    }

    pub fn conditions(&self) -> &[FilterCondition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.conditions.iter().all(|condition| condition.matches(metadata))
    }
}

/// Inserts `chunks` in `batch_size` batches. A failed batch is retried one
/// item at a time so the good items still land; items that fail on their
/// own are reported together in `IndexError::PartialInsert` once every
/// batch has been attempted. Committed items stay committed.
pub async fn add_in_batches<I: VectorIndex + ?Sized>(
    index: &I,
    chunks: Vec<Chunk>,
    ids: Option<Vec<String>>,
) -> Result<Vec<String>, IndexError> {
    let ids = match ids {
        Some(ids) if ids.len() != chunks.len() => {
            return Err(IndexError::Request(format!(
                "{} ids given for {} chunks",
                ids.len(),
                chunks.len()
            )))
        }
        Some(ids) => ids,
        None => chunks.iter().map(|_| Uuid::new_v4().to_string()).collect(),
    };

    let records: Vec<IndexRecord> = chunks
        .into_iter()
        .zip(ids)
        .map(|(chunk, id)| IndexRecord {
            id,
            text: chunk.text,
            metadata: chunk.metadata,
        })
        .collect();

    let batch_size = index.batch_size().max(1);
    let attempted = records.len();
    let mut committed = Vec::with_capacity(attempted);
    let mut failures = Vec::new();

    for (batch_number, batch) in records.chunks(batch_size).enumerate() {
        match index.insert_batch(batch).await {
            Ok(()) => committed.extend(batch.iter().map(|record| record.id.clone())),
            Err(batch_error) => {
                warn!(
                    batch = batch_number,
                    size = batch.len(),
                    error = %batch_error,
                    "batch insert failed, retrying items one by one"
                );
                for (offset, record) in batch.iter().enumerate() {
                    match index.insert_batch(std::slice::from_ref(record)).await {
                        Ok(()) => committed.push(record.id.clone()),
                        Err(item_error) => {
                            let position = batch_number * batch_size + offset;
                            error!(position, id = %record.id, error = %item_error, "chunk insert failed");
                            failures.push(ItemFailure {
                                position,
                                id: record.id.clone(),
                                reason: item_error.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    info!(
        committed = committed.len(),
        failed = failures.len(),
        "inserted chunks"
    );

    if failures.is_empty() {
        Ok(committed)
    } else {
        Err(IndexError::PartialInsert {
            committed,
            failures,
            attempted,
        })
    }
}

/// Deletes every chunk of `key` (`source` or `source#sheet`). Unknown keys
/// delete nothing.
pub async fn delete_by_source<I: VectorIndex + ?Sized>(index: &I, key: &str) -> Result<usize, IndexError> {
    let ids: Vec<String> = index
        .scan()
        .await?
        .into_iter()
        .filter(|chunk| chunk.metadata.matches_document_key(key))
        .map(|chunk| chunk.id)
        .collect();

    if ids.is_empty() {
        info!(key, "no chunks found to delete");
        return Ok(0);
    }

    let deleted = index.delete_ids(&ids).await?;
    info!(key, deleted, "deleted chunks");
    Ok(deleted)
}

/// One entry per `(source, sheet)` in first-seen order, described by the
/// first chunk of each group.
pub async fn enumerate_documents<I: VectorIndex + ?Sized>(index: &I) -> Result<Vec<IndexedDocument>, IndexError> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut documents: Vec<IndexedDocument> = Vec::new();

    for chunk in index.scan().await? {
        let metadata = chunk.metadata;
        let key = document_key(&metadata.source, metadata.sheet_name.as_deref());
        match positions.get(&key) {
            Some(&position) => documents[position].chunk_count += 1,
            None => {
                positions.insert(key.clone(), documents.len());
                documents.push(IndexedDocument {
                    id: key,
                    source: metadata.source,
                    source_type: metadata.source_type,
                    sheet_name: metadata.sheet_name,
                    rows: metadata.rows,
                    columns: metadata.columns,
                    chunking_strategy: metadata.chunking_strategy,
                    chunk_count: 1,
                });
            }
        }
    }

    Ok(documents)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{RetrievalResult, SourceType, StoredChunk};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Stores records in memory and rejects any batch containing "BAD".
    #[derive(Default)]
    pub(crate) struct FakeIndex {
        pub records: Mutex<Vec<IndexRecord>>,
        pub batch_calls: Mutex<usize>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn insert_batch(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
            *self.batch_calls.lock().expect("lock") += 1;
            if records.iter().any(|record| record.text.contains("BAD")) {
                return Err(IndexError::Embedding("rejected".to_string()));
            }
            self.records.lock().expect("lock").extend_from_slice(records);
            Ok(())
        }

        async fn search(
            &self,
            query: &str,
            k: usize,
            filter: Option<&MetadataFilter>,
        ) -> Result<Vec<RetrievalResult>, IndexError> {
            let records = self.records.lock().expect("lock");
            Ok(records
                .iter()
                .filter(|record| filter.map_or(true, |f| f.matches(&record.metadata)))
                .filter(|record| record.text.contains(query))
                .take(k)
                .map(|record| RetrievalResult {
                    id: record.id.clone(),
                    text: record.text.clone(),
                    metadata: record.metadata.clone(),
                    distance: Some(0.1),
                })
                .collect())
        }

        async fn scan(&self) -> Result<Vec<StoredChunk>, IndexError> {
            Ok(self
                .records
                .lock()
                .expect("lock")
                .iter()
                .map(|record| StoredChunk {
                    id: record.id.clone(),
                    metadata: record.metadata.clone(),
                })
                .collect())
        }

        async fn delete_ids(&self, ids: &[String]) -> Result<usize, IndexError> {
            let mut records = self.records.lock().expect("lock");
            let before = records.len();
            records.retain(|record| !ids.contains(&record.id));
            Ok(before - records.len())
        }

        async fn count(&self) -> Result<usize, IndexError> {
            Ok(self.records.lock().expect("lock").len())
        }
    }

    pub(crate) fn chunk(text: &str, source_type: SourceType, source: &str, sheet: Option<&str>) -> Chunk {
        let mut metadata = ChunkMetadata::new(source_type, source);
        metadata.sheet_name = sheet.map(str::to_string);
        Chunk {
            text: text.to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn one_bad_item_does_not_sink_its_batch() {
        let index = FakeIndex::default();
        let chunks: Vec<Chunk> = (0..150)
            .map(|i| {
                let text = if i == 73 { "BAD".to_string() } else { format!("chunk {i}") };
                chunk(&text, SourceType::Txt, "notes.txt", None)
            })
            .collect();

        match index.add(chunks, None).await {
            Err(IndexError::PartialInsert {
                committed,
                failures,
                attempted,
            }) => {
                assert_eq!(committed.len(), 149);
                assert_eq!(attempted, 150);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].position, 73);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(index.count().await.expect("count"), 149);
    }

    #[tokio::test]
    async fn clean_insert_returns_given_ids_in_order() -> Result<(), IndexError> {
        let index = FakeIndex::default();
        let chunks = vec![
            chunk("a", SourceType::Txt, "a.txt", None),
            chunk("b", SourceType::Txt, "a.txt", None),
        ];
        let ids = index
            .add(chunks, Some(vec!["x".to_string(), "y".to_string()]))
            .await?;
        assert_eq!(ids, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(*index.batch_calls.lock().expect("lock"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn mismatched_id_count_is_rejected() {
        let index = FakeIndex::default();
        let chunks = vec![chunk("a", SourceType::Txt, "a.txt", None)];
        assert!(matches!(
            index.add(chunks, Some(Vec::new())).await,
            Err(IndexError::Request(_))
        ));
    }

    #[tokio::test]
    async fn delete_by_sheet_key_leaves_other_sheets() -> Result<(), IndexError> {
        let index = FakeIndex::default();
        index
            .add(
                vec![
                    chunk("r1", SourceType::Excel, "book.xlsx", Some("Revenue")),
                    chunk("r2", SourceType::Excel, "book.xlsx", Some("Revenue")),
                    chunk("n1", SourceType::Excel, "book.xlsx", Some("Notes")),
                    chunk("d1", SourceType::Pdf, "doc.pdf", None),
                ],
                None,
            )
            .await?;

        assert_eq!(index.delete_by_source("book.xlsx#Revenue").await?, 2);
        assert_eq!(index.delete_by_source("missing.pdf").await?, 0);
        assert_eq!(index.delete_by_source("book.xlsx").await?, 1);
        assert_eq!(index.count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn documents_are_grouped_by_source_and_sheet() -> Result<(), IndexError> {
        let index = FakeIndex::default();
        index
            .add(
                vec![
                    chunk("d1", SourceType::Pdf, "doc.pdf", None),
                    chunk("r1", SourceType::Excel, "book.xlsx", Some("Revenue")),
                    chunk("d2", SourceType::Pdf, "doc.pdf", None),
                ],
                None,
            )
            .await?;

        let documents = index.enumerate_documents().await?;
        let keys: Vec<(&str, usize)> = documents
            .iter()
            .map(|document| (document.id.as_str(), document.chunk_count))
            .collect();
        assert_eq!(keys, vec![("doc.pdf", 2), ("book.xlsx#Revenue", 1)]);
        Ok(())
    }

    #[test]
    fn filter_conditions_are_anded() {
        let mut metadata = ChunkMetadata::new(SourceType::Pdf, "doc.pdf");
        metadata.page = Some(2);

        let filter = MetadataFilter::new()
            .one_of("source", ["doc.pdf", "other.txt"])
            .eq("source_type", "pdf");
        assert!(filter.matches(&metadata));
        assert!(!filter.clone().eq("page", 3).matches(&metadata));
        assert!(!MetadataFilter::new().eq("sheet_name", "x").matches(&metadata));
    }
}
