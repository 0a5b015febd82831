use crate::embeddings::Embedder;
use crate::error::IndexError;
use crate::index::{FilterCondition, MetadataFilter, DEFAULT_BATCH_SIZE};
use crate::models::{ChunkMetadata, IndexRecord, RetrievalResult, StoredChunk};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const SCROLL_PAGE: usize = 256;

pub struct QdrantVectorIndex {
    endpoint: String,
    collection: String,
    client: Client,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl QdrantVectorIndex {
    /// Connects and creates the collection (cosine distance) if it is missing.
    pub async fn connect(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, IndexError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)?;
        let store = Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
        };
        store.ensure_collection().await?;
        Ok(store)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn ensure_collection(&self) -> Result<(), IndexError> {
        let url = self.collection_url("");
        let response = self.client.get(&url).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(&url)
            .json(&json!({
                "vectors": {
                    "size": self.embedder.dimensions(),
                    "distance": "Cosine",
                }
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        info!(collection = %self.collection, "created qdrant collection");
        Ok(())
    }

    fn collection_url(&self, path: &str) -> String {
        format!("{}/collections/{}{}", self.endpoint, self.collection, path)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, IndexError> {
        let response = self
            .client
            .post(self.collection_url(path))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }
        Ok(response.json().await?)
    }
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::BackendResponse {
        backend: "qdrant".to_string(),
        details: status.to_string(),
    }
}

/// Qdrant point ids must be integers or UUIDs; chunk ids are arbitrary.
pub fn point_id(chunk_id: &str) -> String {
    let digest = Sha256::digest(chunk_id.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

pub fn filter_json(filter: &MetadataFilter) -> Value {
    let must: Vec<Value> = filter
        .conditions()
        .iter()
        .map(|condition| match condition {
            FilterCondition::Eq { field, value } => json!({ "key": field, "match": { "value": value } }),
            FilterCondition::In { field, values } => json!({ "key": field, "match": { "any": values } }),
        })
        .collect();
    json!({ "must": must })
}

fn payload(record: &IndexRecord) -> Result<Value, IndexError> {
    let mut payload = match serde_json::to_value(&record.metadata)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    payload.insert("document_key".to_string(), Value::from(record.metadata.document_key()));
    payload.insert("chunk_id".to_string(), Value::from(record.id.as_str()));
    payload.insert("text".to_string(), Value::from(record.text.as_str()));
    Ok(Value::Object(payload))
}

/// Splits a stored payload back into `(chunk id, text, metadata)`.
fn parse_payload(point: &Value) -> Result<(String, String, ChunkMetadata), IndexError> {
    let mut payload = point
        .pointer("/payload")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let chunk_id = payload
        .remove("chunk_id")
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();
    let text = payload
        .remove("text")
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();
    payload.remove("document_key");
    let metadata: ChunkMetadata = serde_json::from_value(Value::Object(payload))?;
    Ok((chunk_id, text, metadata))
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn insert_batch(&self, records: &[IndexRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }
        let texts: Vec<String> = records.iter().map(|record| record.text.clone()).collect();
        let embeddings = self.embedder.embed(&texts).await?;
        if embeddings.len() != records.len() {
            return Err(IndexError::Request(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                records.len()
            )));
        }

        let points = records
            .iter()
            .zip(embeddings.iter())
            .map(|(record, embedding)| {
                Ok(json!({
                    "id": point_id(&record.id),
                    "vector": embedding,
                    "payload": payload(record)?,
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
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

        let mut body = json!({
            "vector": query_vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = filter_json(filter);
        }

        let parsed = self.post("/points/search", body).await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        hits.iter()
            .map(|hit| {
                let (id, text, metadata) = parse_payload(hit)?;
                let distance = hit.pointer("/score").and_then(Value::as_f64).map(|score| 1.0 - score);
                Ok(RetrievalResult {
                    id,
                    text,
                    metadata,
                    distance,
                })
            })
            .collect()
    }

    async fn scan(&self) -> Result<Vec<StoredChunk>, IndexError> {
        let mut chunks = Vec::new();
        let mut offset = Value::Null;
        loop {
            let mut body = json!({
                "limit": SCROLL_PAGE,
                "with_payload": true,
                "with_vector": false,
            });
            if !offset.is_null() {
                body["offset"] = offset.clone();
            }

            let parsed = self.post("/points/scroll", body).await?;
            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for point in &points {
                let (id, _, metadata) = parse_payload(point)?;
                chunks.push(StoredChunk { id, metadata });
            }

            offset = parsed
                .pointer("/result/next_page_offset")
                .cloned()
                .unwrap_or(Value::Null);
            if offset.is_null() || points.is_empty() {
                return Ok(chunks);
            }
        }
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<usize, IndexError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let points: Vec<String> = ids.iter().map(|id| point_id(id)).collect();
        self.post("/points/delete?wait=true", json!({ "points": points }))
            .await?;
        Ok(ids.len())
    }

    async fn count(&self) -> Result<usize, IndexError> {
        let parsed = self.post("/points/count", json!({ "exact": true })).await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| IndexError::BackendResponse {
                backend: "qdrant".to_string(),
                details: "count missing from response".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    #[test]
    fn point_ids_are_stable_uuids() {
        let first = point_id("chunk-1");
        assert_eq!(first, point_id("chunk-1"));
        assert_ne!(first, point_id("chunk-2"));
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn filters_become_must_clauses() {
        let filter = MetadataFilter::new()
            .one_of("source", ["a.pdf", "b.txt"])
            .eq("source_type", "pdf");
        let value = filter_json(&filter);
        assert_eq!(value["must"][0]["match"]["any"], json!(["a.pdf", "b.txt"]));
        assert_eq!(value["must"][1]["match"]["value"], json!("pdf"));
    }

    #[test]
    fn payload_round_trips_metadata() -> Result<(), IndexError> {
        let mut metadata = ChunkMetadata::new(SourceType::Excel, "book.xlsx");
        metadata.sheet_name = Some("Revenue".to_string());
        let record = IndexRecord {
            id: "c1".to_string(),
            text: "| Region |".to_string(),
            metadata: metadata.clone(),
        };

        let point = json!({ "payload": payload(&record)? });
        assert_eq!(point["payload"]["document_key"], json!("book.xlsx#Revenue"));
        let (id, text, parsed) = parse_payload(&point)?;
        assert_eq!((id.as_str(), text.as_str()), ("c1", "| Region |"));
        assert_eq!(parsed, metadata);
        Ok(())
    }
}
