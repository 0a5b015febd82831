use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("malformed json in {source_name}: {reason}")]
    MalformedJson { source_name: String, reason: String },

    #[error("sheet '{sheet}' not found; available sheets: {available:?}")]
    SheetNotFound {
        sheet: String,
        available: Vec<String>,
    },

    #[error("table set '{0}' is not loaded")]
    TableSetNotLoaded(String),

    #[error("column '{0}' not found")]
    UnknownColumn(String),

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("no supported files found in {0}")]
    NoSupportedFiles(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("spreadsheet parse error: {0}")]
    Spreadsheet(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("no usable table data in {0}")]
    EmptyTable(String),

    #[error("input is not tabular: {0}")]
    NotTabular(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A single chunk that could not be committed even when inserted on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub position: usize,
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("text {position} is {length} chars, above the {limit} char embedding limit")]
    TextTooLong {
        position: usize,
        length: usize,
        limit: usize,
    },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index request rejected: {0}")]
    Request(String),

    #[error("duplicate chunk id: {0}")]
    DuplicateId(String),

    #[error("{} of {attempted} chunks failed to insert", .failures.len())]
    PartialInsert {
        committed: Vec<String>,
        failures: Vec<ItemFailure>,
        attempted: usize,
    },
}

#[derive(Debug, Error)]
#[error("no sheet produced a conclusive answer for '{query}' after {attempts} attempt(s)")]
pub struct UnanswerableError {
    pub query: String,
    pub attempts: usize,
    pub last_response: Option<String>,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct AnswerError(pub String);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Unanswerable(#[from] UnanswerableError),
}

impl EngineError {
    /// Message safe to show a caller. Only validation errors carry detail,
    /// everything else is reported generically and logged in full.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::Validation(error) => error.to_string(),
            EngineError::Processing(_) => "failed to process the document".to_string(),
            EngineError::Index(_) => "the document index is unavailable".to_string(),
            EngineError::Unanswerable(_) => {
                "no loaded table could answer the question".to_string()
            }
        }
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_shown_in_full() {
        let error = EngineError::from(ValidationError::UnsupportedFileType(".exe".to_string()));
        assert!(error.public_message().contains(".exe"));
    }

    #[test]
    fn index_errors_are_reported_generically() {
        let error = EngineError::from(IndexError::Request("socket closed at 10.0.0.3".to_string()));
        let message = error.public_message();
        assert!(!message.contains("10.0.0.3"));
    }

    #[test]
    fn partial_insert_message_counts_failures() {
        let error = IndexError::PartialInsert {
            committed: vec!["a".to_string()],
            failures: vec![ItemFailure {
                position: 1,
                id: "b".to_string(),
                reason: "too long".to_string(),
            }],
            attempted: 2,
        };
        assert_eq!(error.to_string(), "1 of 2 chunks failed to insert");
    }
}
