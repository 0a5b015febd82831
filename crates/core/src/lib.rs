pub mod cache;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod fallback;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod ooxml;
pub mod pipeline;
pub mod preprocess;
pub mod query;
pub mod ranking;
pub mod session;
pub mod stores;
pub mod table;
pub mod traits;

pub use cache::TableCache;
pub use chunking::{chunk_sheet_by_rows, chunk_table_by_rows, split_text, TextSplitter};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS, MAX_EMBED_CHARS,
};
pub use error::{
    AnswerError, EngineError, IndexError, ItemFailure, ProcessingError, UnanswerableError,
    ValidationError,
};
pub use fallback::{FallbackAnswer, FallbackController};
pub use index::{FilterCondition, MetadataFilter, DEFAULT_BATCH_SIZE};
pub use ingest::{
    chunk_raw_documents, delete_document, ingest_file, ingest_folder_best_effort,
    IngestionReport, IngestionSummary, SkippedFile,
};
pub use loader::{discover_files, load_file, load_table_set};
pub use models::{
    document_key, Chunk, ChunkMetadata, ChunkingStrategy, DocumentStats, IndexedDocument,
    IngestionOptions, RawDocument, RetrievalConfig, RetrievalResult, SheetScore, SourceType,
};
pub use pipeline::{build_context, RankedContext, RetrievalPipeline};
pub use preprocess::preprocess;
pub use query::{execute, QueryAnswerer, QueryOutput, TableQuery};
pub use ranking::{rank_sheets, score_sheets, sheet_relevance};
pub use session::TableSession;
pub use stores::{LocalVectorIndex, QdrantVectorIndex};
pub use table::{ActiveSheet, Cell, Table, TableSet, DEFAULT_SHEET};
pub use traits::{Answerer, VectorIndex};
