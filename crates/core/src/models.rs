use crate::error::ValidationError;
use crate::table::Table;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Separator between a source name and a sheet name in document keys.
pub const SHEET_SEPARATOR: char = '#';

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Txt,
    Markdown,
    Docx,
    Json,
    Csv,
    Excel,
    Web,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Pdf => "pdf",
            SourceType::Txt => "txt",
            SourceType::Markdown => "markdown",
            SourceType::Docx => "docx",
            SourceType::Json => "json",
            SourceType::Csv => "csv",
            SourceType::Excel => "excel",
            SourceType::Web => "web",
        }
    }

    pub fn is_tabular(&self) -> bool {
        matches!(self, SourceType::Csv | SourceType::Excel)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pdf" => Ok(SourceType::Pdf),
            "txt" | "text" => Ok(SourceType::Txt),
            "md" | "markdown" => Ok(SourceType::Markdown),
            "docx" => Ok(SourceType::Docx),
            "json" => Ok(SourceType::Json),
            "csv" => Ok(SourceType::Csv),
            "excel" | "xlsx" => Ok(SourceType::Excel),
            "web" => Ok(SourceType::Web),
            other => Err(ValidationError::InvalidArgument(format!(
                "unknown source type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChunkingStrategy {
    #[serde(rename = "character-based")]
    CharacterBased,
    #[serde(rename = "row-based")]
    RowBased,
}

impl ChunkingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkingStrategy::CharacterBased => "character-based",
            ChunkingStrategy::RowBased => "row-based",
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_type: SourceType,
    pub source: String,
    pub sheet_name: Option<String>,
    pub chunk_index: Option<u64>,
    pub chunking_strategy: Option<ChunkingStrategy>,
    pub page: Option<u32>,
    pub rows: Option<u64>,
    pub columns: Option<u64>,
    pub record_id: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChunkMetadata {
    pub fn new(source_type: SourceType, source: impl Into<String>) -> Self {
        Self {
            source_type,
            source: source.into(),
            sheet_name: None,
            chunk_index: None,
            chunking_strategy: None,
            page: None,
            rows: None,
            columns: None,
            record_id: None,
            url: None,
            title: None,
            extra: Map::new(),
        }
    }

    /// `source` or `source#sheet_name`; the identity of the logical document
    /// this chunk belongs to, and the key its table is cached under.
    pub fn document_key(&self) -> String {
        document_key(&self.source, self.sheet_name.as_deref())
    }

    /// Looks a field up by its serialized name, the way metadata filters see it.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "source_type" => Some(Value::from(self.source_type.as_str())),
            "source" => Some(Value::from(self.source.as_str())),
            "document_key" => Some(Value::from(self.document_key())),
            "sheet_name" => self.sheet_name.as_deref().map(Value::from),
            "chunk_index" => self.chunk_index.map(Value::from),
            "chunking_strategy" => self.chunking_strategy.map(|s| Value::from(s.as_str())),
            "page" => self.page.map(Value::from),
            "rows" => self.rows.map(Value::from),
            "columns" => self.columns.map(Value::from),
            "record_id" => self.record_id.as_deref().map(Value::from),
            "url" => self.url.as_deref().map(Value::from),
            "title" => self.title.as_deref().map(Value::from),
            other => self.extra.get(other).cloned(),
        }
    }

    /// True when this chunk belongs to the document identified by `key`.
    ///
    /// A `source#sheet` key matches exactly that sheet; a bare key matches
    /// every chunk whose source equals it, sheets included.
    pub fn matches_document_key(&self, key: &str) -> bool {
        if let (Some(sheet), Some((source_part, sheet_part))) =
            (self.sheet_name.as_deref(), key.split_once(SHEET_SEPARATOR))
        {
            if self.source == source_part && sheet == sheet_part {
                return true;
            }
        }
        self.source == key
    }
}

pub fn document_key(source: &str, sheet_name: Option<&str>) -> String {
    match sheet_name {
        Some(sheet) => format!("{source}{SHEET_SEPARATOR}{sheet}"),
        None => source.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Output of a document loader before chunking: either free text or a table.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub text: Option<String>,
    pub table: Option<Table>,
    pub metadata: ChunkMetadata,
}

impl RawDocument {
    pub fn text(text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            text: Some(text.into()),
            table: None,
            metadata,
        }
    }

    pub fn table(table: Table, mut metadata: ChunkMetadata) -> Self {
        metadata.rows = Some(table.row_count() as u64);
        metadata.columns = Some(table.column_count() as u64);
        Self {
            text: None,
            table: Some(table),
            metadata,
        }
    }
}

/// A chunk ready for insertion, with its final id assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: Option<f64>,
}

impl RetrievalResult {
    pub fn similarity(&self) -> Option<f64> {
        self.distance.map(|distance| 1.0 - distance)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    pub source: String,
    pub source_type: SourceType,
    pub sheet_name: Option<String>,
    pub rows: Option<u64>,
    pub columns: Option<u64>,
    pub chunking_strategy: Option<ChunkingStrategy>,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub unique_documents: usize,
    pub total_chunks: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_chunking_strategy: BTreeMap<String, usize>,
    pub sources: Vec<IndexedDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetScore {
    pub sheet_name: String,
    pub relevance: f64,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub rows_per_chunk: usize,
    pub max_table_chunk_chars: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_max_chars: 1_000,
            chunk_overlap_chars: 200,
            rows_per_chunk: 20,
            max_table_chunk_chars: 25_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub max_k: usize,
    pub similarity_threshold: f64,
    pub max_context_length: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 5,
            max_k: 20,
            similarity_threshold: 0.3,
            max_context_length: 3_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet_chunk(source: &str, sheet: &str) -> ChunkMetadata {
        let mut metadata = ChunkMetadata::new(SourceType::Excel, source);
        metadata.sheet_name = Some(sheet.to_string());
        metadata
    }

    #[test]
    fn document_key_includes_sheet() {
        assert_eq!(sheet_chunk("book.xlsx", "Revenue").document_key(), "book.xlsx#Revenue");
        assert_eq!(ChunkMetadata::new(SourceType::Pdf, "doc.pdf").document_key(), "doc.pdf");
    }

    #[test]
    fn sheet_key_matches_only_that_sheet() {
        let revenue = sheet_chunk("book.xlsx", "Revenue");
        let notes = sheet_chunk("book.xlsx", "Notes");
        assert!(revenue.matches_document_key("book.xlsx#Revenue"));
        assert!(!notes.matches_document_key("book.xlsx#Revenue"));
        assert!(notes.matches_document_key("book.xlsx"));
    }

    #[test]
    fn metadata_serializes_without_empty_fields() -> Result<(), Box<dyn std::error::Error>> {
        let mut metadata = ChunkMetadata::new(SourceType::Csv, "people.csv");
        metadata.chunking_strategy = Some(ChunkingStrategy::RowBased);
        let value = serde_json::to_value(&metadata)?;
        assert_eq!(value["source_type"], "csv");
        assert_eq!(value["chunking_strategy"], "row-based");
        assert!(value.get("page").is_none());
        Ok(())
    }

    #[test]
    fn unknown_fields_are_reachable_through_extra() -> Result<(), Box<dyn std::error::Error>> {
        let metadata: ChunkMetadata = serde_json::from_value(serde_json::json!({
            "source_type": "web",
            "source": "https://example.com",
            "crawl_depth": 2
        }))?;
        assert_eq!(metadata.field("crawl_depth"), Some(Value::from(2)));
        assert_eq!(metadata.field("source_type"), Some(Value::from("web")));
        Ok(())
    }
}
