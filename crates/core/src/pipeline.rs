use crate::error::IndexError;
use crate::index::MetadataFilter;
use crate::models::{
    DocumentStats, IndexedDocument, RetrievalConfig, RetrievalResult, SourceType,
};
use crate::traits::VectorIndex;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Smallest leftover budget worth filling with a truncated fragment.
const MIN_USEFUL_REMAINDER: usize = 100;

/// Context string, the sources behind it and the results it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedContext {
    pub context: String,
    pub references: Vec<String>,
    pub results: Vec<RetrievalResult>,
}

pub struct RetrievalPipeline<I>
where
    I: VectorIndex,
{
    index: I,
    config: RetrievalConfig,
}

impl<I> RetrievalPipeline<I>
where
    I: VectorIndex,
{
    pub fn new(index: I) -> Self {
        Self::with_config(index, RetrievalConfig::default())
    }

    pub fn with_config(index: I, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RetrievalConfig) {
        info!(?config, "updated retrieval config");
        self.config = config;
    }

    /// Searches the index and drops results below the similarity threshold.
    ///
    /// `filter_sources` takes document keys; `source#sheet` keys restrict the
    /// results to that sheet. `k` defaults to the configured value and is
    /// capped at `max_k`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: Option<usize>,
        filter_sources: Option<&[String]>,
        filter_source_type: Option<SourceType>,
    ) -> Result<Vec<RetrievalResult>, IndexError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let k = k.unwrap_or(self.config.default_k).min(self.config.max_k);
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut filter = MetadataFilter::new();
        if let Some(keys) = filter_sources.filter(|keys| !keys.is_empty()) {
            filter = filter.one_of("document_key", self.document_keys(keys).await?);
        }
        if let Some(source_type) = filter_source_type {
            filter = filter.eq("source_type", source_type.as_str());
        }

        let filter = (!filter.is_empty()).then_some(filter);
        let mut results = self.index.search(query, k, filter.as_ref()).await?;
        let found = results.len();

        let threshold = self.config.similarity_threshold;
        results.retain(|result| result.distance.map_or(true, |distance| 1.0 - distance >= threshold));

        debug!(found, kept = results.len(), threshold, "retrieved chunks");
        Ok(results)
    }

    /// Expands filter keys to the document keys stored with each chunk. A bare
    /// source stands for every sheet indexed under it.
    async fn document_keys(&self, keys: &[String]) -> Result<Vec<String>, IndexError> {
        let documents = self.index.enumerate_documents().await?;
        let mut expanded: Vec<String> = Vec::new();
        for key in keys {
            let mut matched = documents
                .iter()
                .filter(|document| document.id == *key || document.source == *key)
                .map(|document| document.id.clone())
                .peekable();
            if matched.peek().is_none() {
                expanded.push(key.clone());
            }
            for id in matched {
                if !expanded.contains(&id) {
                    expanded.push(id);
                }
            }
        }
        Ok(expanded)
    }

    pub fn build_context(&self, results: &[RetrievalResult]) -> (String, Vec<String>) {
        build_context(results, self.config.max_context_length)
    }

    pub async fn retrieve_and_rank(
        &self,
        query: &str,
        k: Option<usize>,
        filter_sources: Option<&[String]>,
    ) -> Result<RankedContext, IndexError> {
        let results = self.retrieve(query, k, filter_sources, None).await?;
        if results.is_empty() {
            warn!(query, "no relevant chunks found");
        }
        let (context, references) = self.build_context(&results);
        Ok(RankedContext {
            context,
            references,
            results,
        })
    }

    /// Keeps the requested ids that name an indexed document.
    pub async fn validate_filter_sources(&self, requested: &[String]) -> Result<Vec<String>, IndexError> {
        if requested.is_empty() {
            return Ok(Vec::new());
        }
        let known: HashSet<String> = self
            .index
            .enumerate_documents()
            .await?
            .into_iter()
            .flat_map(|document| [document.id, document.source])
            .collect();

        let valid: Vec<String> = requested
            .iter()
            .filter(|id| known.contains(id.as_str()))
            .cloned()
            .collect();
        if valid.len() < requested.len() {
            warn!(
                removed = requested.len() - valid.len(),
                "dropped unknown filter sources"
            );
        }
        Ok(valid)
    }

    pub async fn available_sources(&self) -> Result<BTreeMap<String, Vec<IndexedDocument>>, IndexError> {
        let mut by_type: BTreeMap<String, Vec<IndexedDocument>> = BTreeMap::new();
        for document in self.index.enumerate_documents().await? {
            by_type
                .entry(document.source_type.as_str().to_string())
                .or_default()
                .push(document);
        }
        Ok(by_type)
    }

    pub async fn document_stats(&self) -> Result<DocumentStats, IndexError> {
        let documents = self.index.enumerate_documents().await?;
        let stats = self.index.stats().await?;

        let mut by_type = BTreeMap::new();
        for document in &documents {
            *by_type
                .entry(document.source_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut by_chunking_strategy = BTreeMap::new();
        for metadata in self.index.chunk_metadata().await? {
            let strategy = metadata
                .chunking_strategy
                .map_or("unknown", |strategy| strategy.as_str());
            *by_chunking_strategy.entry(strategy.to_string()).or_insert(0) += 1;
        }

        Ok(DocumentStats {
            unique_documents: documents.len(),
            total_chunks: stats.total_chunks,
            by_type,
            by_chunking_strategy,
            sources: documents,
        })
    }
}

/// Joins `[Source: ..]` blocks in rank order until the text budget runs out.
///
/// Only fragment text counts against `max_length`. The fragment that would
/// overflow is cut to the remaining budget with an ellipsis when more than
/// a hundred characters remain, and assembly stops there. References are
/// unique and in first-seen order.
pub fn build_context(results: &[RetrievalResult], max_length: usize) -> (String, Vec<String>) {
    let mut parts = Vec::new();
    let mut references: Vec<String> = Vec::new();
    let mut total = 0usize;

    for result in results {
        let source = result.metadata.source.as_str();
        let length = result.text.chars().count();
        let text = if total + length > max_length {
            let remaining = max_length.saturating_sub(total);
            if remaining <= MIN_USEFUL_REMAINDER {
                break;
            }
            let mut cut: String = result.text.chars().take(remaining).collect();
            cut.push_str("...");
            cut
        } else {
            result.text.clone()
        };

        let truncated = total + length > max_length;
        parts.push(format!("[Source: {source}]\n{text}\n"));
        if !references.iter().any(|known| known == source) {
            references.push(source.to_string());
        }
        if truncated {
            break;
        }
        total += length;
    }

    let context = parts.join("\n");
    info!(chars = context.len(), fragments = parts.len(), "built context");
    (context, references)
}
