use crate::cache::TableCache;
use crate::chunking::{chunk_sheet_by_rows, chunk_table_by_rows, char_len, TextSplitter};
use crate::embeddings::MAX_EMBED_CHARS;
use crate::error::{EngineError, IndexError, ProcessingError, ValidationError};
use crate::loader::{discover_files, load_file};
use crate::models::{Chunk, ChunkingStrategy, IngestionOptions, RawDocument};
use crate::table::Table;
use crate::traits::VectorIndex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Splits loaded documents into indexable chunks. Text is split by
/// characters, tables by row windows; no chunk exceeds the embedding limit.
pub fn chunk_raw_documents(
    documents: Vec<RawDocument>,
    options: &IngestionOptions,
) -> Result<Vec<Chunk>, ProcessingError> {
    let splitter = TextSplitter::from_options(options)?;
    let oversize_splitter = TextSplitter::new(
        options.max_table_chunk_chars.min(MAX_EMBED_CHARS),
        options.chunk_overlap_chars,
    )?;

    let mut chunks = Vec::new();
    for document in documents {
        let (pieces, strategy) = match (&document.text, &document.table) {
            (_, Some(table)) => {
                let windows = match document.metadata.sheet_name.as_deref() {
                    Some(sheet) => chunk_sheet_by_rows(
                        table,
                        sheet,
                        options.rows_per_chunk,
                        options.max_table_chunk_chars,
                    )?,
                    None => chunk_table_by_rows(table, options.rows_per_chunk, options.max_table_chunk_chars)?,
                };
                let pieces = windows
                    .into_iter()
                    .flat_map(|window| {
                        if char_len(&window) > MAX_EMBED_CHARS {
                            oversize_splitter.split(&window)
                        } else {
                            vec![window]
                        }
                    })
                    .collect::<Vec<_>>();
                (pieces, ChunkingStrategy::RowBased)
            }
            (Some(text), None) => (splitter.split(text), ChunkingStrategy::CharacterBased),
            (None, None) => {
                warn!(source = %document.metadata.source, "raw document has neither text nor table");
                continue;
            }
        };

        debug!(
            source = %document.metadata.source,
            chunks = pieces.len(),
            strategy = strategy.as_str(),
            "chunked document"
        );
        for (position, text) in pieces.into_iter().enumerate() {
            let mut metadata = document.metadata.clone();
            metadata.chunk_index = Some(position as u64);
            metadata.chunking_strategy = Some(strategy);
            chunks.push(Chunk { text, metadata });
        }
    }
    Ok(chunks)
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestionSummary {
    pub source: String,
    pub documents: usize,
    pub chunk_ids: Vec<String>,
    pub tables_cached: usize,
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub ingested: Vec<IngestionSummary>,
    pub skipped_files: Vec<SkippedFile>,
}

/// Loads, chunks and indexes one file, caching its tables by document key.
/// `source_name` replaces the file name as the source.
pub async fn ingest_file<I>(
    index: &I,
    cache: Option<&TableCache>,
    path: &Path,
    source_name: Option<&str>,
    options: &IngestionOptions,
) -> Result<IngestionSummary, EngineError>
where
    I: VectorIndex + ?Sized,
{
    let owned = path.to_path_buf();
    let mut documents = tokio::task::spawn_blocking(move || load_file(&owned))
        .await
        .map_err(|error| ProcessingError::Io(std::io::Error::other(error)))??;

    if let Some(name) = source_name {
        for document in &mut documents {
            document.metadata.source = name.to_string();
        }
    }
    let source = documents
        .first()
        .map(|document| document.metadata.source.clone())
        .or_else(|| source_name.map(str::to_string))
        .unwrap_or_else(|| path.display().to_string());

    let tables: Vec<(String, Table)> = documents
        .iter()
        .filter_map(|document| {
            document
                .table
                .as_ref()
                .map(|table| (document.metadata.document_key(), table.clone()))
        })
        .collect();
    let document_count = documents.len();

    let chunks = chunk_raw_documents(documents, options)?;
    if chunks.is_empty() {
        warn!(source = %source, "no chunks produced");
        return Ok(IngestionSummary {
            source,
            documents: document_count,
            chunk_ids: Vec::new(),
            tables_cached: 0,
        });
    }
    let chunk_ids = index.add(chunks, None).await?;

    let mut tables_cached = 0;
    if let Some(cache) = cache {
        for (position, (key, table)) in tables.iter().enumerate() {
            match cache.store(key, position, table).await {
                Ok(()) => tables_cached += 1,
                Err(error) => warn!(key = %key, %error, "failed to cache table"),
            }
        }
    }

    info!(
        source = %source,
        documents = document_count,
        chunks = chunk_ids.len(),
        tables_cached,
        "ingested file"
    );
    Ok(IngestionSummary {
        source,
        documents: document_count,
        chunk_ids,
        tables_cached,
    })
}

pub async fn ingest_folder_best_effort<I>(
    index: &I,
    cache: Option<&TableCache>,
    folder: &Path,
    options: &IngestionOptions,
) -> Result<IngestionReport, ValidationError>
where
    I: VectorIndex + ?Sized,
{
    let files = discover_files(folder);

    if files.is_empty() {
        return Err(ValidationError::NoSupportedFiles(folder.display().to_string()));
    }

    let mut ingested = Vec::new();
    let mut skipped_files = Vec::new();

    for path in files {
        match ingest_file(index, cache, &path, None, options).await {
            Ok(summary) => ingested.push(summary),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping file");
                skipped_files.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(IngestionReport {
        ingested,
        skipped_files,
    })
}

/// Removes a document's chunks, then its cached tables. Cache failures are
/// logged and never fail the deletion.
pub async fn delete_document<I>(index: &I, cache: Option<&TableCache>, key: &str) -> Result<usize, IndexError>
where
    I: VectorIndex + ?Sized,
{
    let deleted = index.delete_by_source(key).await?;
    if let Some(cache) = cache {
        match cache.remove_document(key).await {
            Ok(removed) => debug!(key, removed, "removed cached tables"),
            Err(error) => warn!(key, %error, "failed to remove cached tables"),
        }
    }
    Ok(deleted)
}
