use crate::error::{EngineError, ProcessingError, ValidationError};
use crate::models::{ChunkMetadata, RawDocument, SourceType};
use crate::ooxml;
use crate::preprocess::{placeholder_label, preprocess};
use crate::table::{Cell, Table, TableSet};
use lopdf::Document;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: [&str; 8] = ["pdf", "txt", "md", "markdown", "docx", "json", "csv", "xlsx"];

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

pub fn source_type_for(path: &Path) -> Result<SourceType, ValidationError> {
    match extension_of(path).as_str() {
        "pdf" => Ok(SourceType::Pdf),
        "txt" => Ok(SourceType::Txt),
        "md" | "markdown" => Ok(SourceType::Markdown),
        "docx" => Ok(SourceType::Docx),
        "json" => Ok(SourceType::Json),
        "csv" => Ok(SourceType::Csv),
        "xlsx" => Ok(SourceType::Excel),
        "" => Err(ValidationError::UnsupportedFileType(path.display().to_string())),
        other => Err(ValidationError::UnsupportedFileType(format!(".{other}"))),
    }
}

fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

/// Reads one file into raw documents, dispatching on its extension.
pub fn load_file(path: &Path) -> Result<Vec<RawDocument>, EngineError> {
    let source_type = source_type_for(path)?;
    let source = source_name(path);

    let documents = match source_type {
        SourceType::Pdf => load_pdf(path, &source)?,
        SourceType::Txt | SourceType::Markdown => {
            let text = fs::read_to_string(path).map_err(ProcessingError::from)?;
            vec![RawDocument::text(text, ChunkMetadata::new(source_type, &source))]
        }
        SourceType::Docx => {
            let bytes = fs::read(path).map_err(ProcessingError::from)?;
            let text = ooxml::read_docx(&bytes)?;
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![RawDocument::text(text, ChunkMetadata::new(SourceType::Docx, &source))]
            }
        }
        SourceType::Json => {
            let text = fs::read_to_string(path).map_err(ProcessingError::from)?;
            let value: Value = serde_json::from_str(&text).map_err(|error| ValidationError::MalformedJson {
                source_name: source.clone(),
                reason: error.to_string(),
            })?;
            json_documents(&value, &source)?
        }
        SourceType::Csv => {
            let table = preprocess(read_csv(path)?);
            if table.is_empty() {
                warn!(source = %source, "csv is empty after preprocessing");
                Vec::new()
            } else {
                vec![RawDocument::table(table, ChunkMetadata::new(SourceType::Csv, &source))]
            }
        }
        SourceType::Excel => load_xlsx_sheets(path)?
            .into_iter()
            .map(|(sheet, table)| {
                let mut metadata = ChunkMetadata::new(SourceType::Excel, &source);
                metadata.sheet_name = Some(sheet);
                RawDocument::table(table, metadata)
            })
            .collect(),
        SourceType::Web => {
            return Err(ValidationError::UnsupportedFileType(path.display().to_string()).into())
        }
    };

    info!(source = %source, documents = documents.len(), "loaded file");
    Ok(documents)
}

fn load_pdf(path: &Path, source: &str) -> Result<Vec<RawDocument>, ProcessingError> {
    let document = Document::load(path).map_err(|error| ProcessingError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| ProcessingError::PdfParse(error.to_string()))?;

        if !text.trim().is_empty() {
            let mut metadata = ChunkMetadata::new(SourceType::Pdf, source);
            metadata.page = Some(page_no);
            pages.push(RawDocument::text(text, metadata));
        }
    }

    if pages.is_empty() {
        return Err(ProcessingError::PdfParse(format!(
            "pdf had no readable page text: {}",
            path.display()
        )));
    }
    Ok(pages)
}

/// Objects become pretty-printed text, arrays one document per element,
/// anything else its plain text.
pub fn json_documents(value: &Value, source: &str) -> Result<Vec<RawDocument>, ProcessingError> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                let mut metadata = ChunkMetadata::new(SourceType::Json, source);
                metadata.record_id = Some(position.to_string());
                Ok(RawDocument::text(serde_json::to_string_pretty(item)?, metadata))
            })
            .collect(),
        Value::Object(_) => Ok(vec![RawDocument::text(
            serde_json::to_string_pretty(value)?,
            ChunkMetadata::new(SourceType::Json, source),
        )]),
        Value::String(text) => Ok(vec![RawDocument::text(
            text.clone(),
            ChunkMetadata::new(SourceType::Json, source),
        )]),
        other => Ok(vec![RawDocument::text(
            other.to_string(),
            ChunkMetadata::new(SourceType::Json, source),
        )]),
    }
}

/// Raw CSV with the first record as labels. Short records are padded,
/// over-long records skipped.
pub fn read_csv(path: &Path) -> Result<Table, ProcessingError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut records = reader.byte_records();
    let Some(header) = records.next().transpose()? else {
        return Ok(Table::default());
    };
    let columns: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(position, field)| {
            let label = String::from_utf8_lossy(field).trim().to_string();
            if label.is_empty() {
                placeholder_label(position)
            } else {
                label
            }
        })
        .collect();

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in records {
        let record = record?;
        if record.len() > columns.len() {
            skipped += 1;
            continue;
        }
        let mut row: Vec<Cell> = record
            .iter()
            .map(|field| Cell::parse(&String::from_utf8_lossy(field)))
            .collect();
        row.resize(columns.len(), Cell::Null);
        rows.push(row);
    }
    if skipped > 0 {
        warn!(path = %path.display(), skipped, "skipped malformed csv lines");
    }

    Table::new(columns, rows)
}

/// Preprocessed non-empty worksheets in workbook order.
fn load_xlsx_sheets(path: &Path) -> Result<Vec<(String, Table)>, ProcessingError> {
    let bytes = fs::read(path)?;
    let mut sheets = Vec::new();
    for (name, raw) in ooxml::read_xlsx(&bytes)? {
        let table = preprocess(raw);
        if table.is_empty() {
            warn!(sheet = %name, "sheet is empty after preprocessing");
            continue;
        }
        sheets.push((name, table));
    }
    if sheets.is_empty() {
        return Err(ProcessingError::EmptyTable(path.display().to_string()));
    }
    Ok(sheets)
}

/// The sheets of a tabular file: `default` for CSV, one per worksheet for
/// `.xlsx`.
pub fn load_table_set(path: &Path) -> Result<TableSet, EngineError> {
    let source = source_name(path);
    match source_type_for(path)? {
        SourceType::Csv => {
            let table = preprocess(read_csv(path)?);
            if table.is_empty() {
                return Err(ProcessingError::EmptyTable(source).into());
            }
            Ok(TableSet::single(source, table))
        }
        SourceType::Excel => {
            let mut set = TableSet::new(source);
            for (sheet, table) in load_xlsx_sheets(path)? {
                set.insert(sheet, table);
            }
            Ok(set)
        }
        _ => Err(ProcessingError::NotTabular(source).into()),
    }
}

pub fn discover_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let supported = SUPPORTED_EXTENSIONS.contains(&extension_of(entry.path()).as_str());
        if supported {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ooxml::tests::workbook_bytes;

    #[test]
    fn unsupported_extensions_are_validation_errors() {
        for name in ["legacy.xls", "image.png", "README"] {
            assert!(matches!(
                load_file(Path::new(name)),
                Err(EngineError::Validation(ValidationError::UnsupportedFileType(_)))
            ));
        }
    }

    #[test]
    fn json_arrays_become_records() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("people.json");
        fs::write(&path, r#"[{"name":"Ada"},{"name":"Grace"}]"#)?;

        let documents = load_file(&path)?;
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1].metadata.record_id.as_deref(), Some("1"));
        assert!(documents[0].text.as_deref().is_some_and(|t| t.contains("Ada")));
        Ok(())
    }

    #[test]
    fn malformed_json_names_the_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.json");
        fs::write(&path, "{oops")?;

        match load_file(&path) {
            Err(EngineError::Validation(ValidationError::MalformedJson { source_name, .. })) => {
                assert_eq!(source_name, "broken.json");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn csv_is_padded_cleaned_and_counted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("people.csv");
        fs::write(&path, "Name,Dept,\nAda,Eng\nGrace,Ops,x,extra\n,,\nLinus,Eng\n")?;

        let documents = load_file(&path)?;
        assert_eq!(documents.len(), 1);
        let table = documents[0].table.as_ref().ok_or("table document")?;
        assert_eq!(table.columns(), ["Name", "Dept"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(documents[0].metadata.rows, Some(2));
        Ok(())
    }

    #[test]
    fn xlsx_loads_one_document_per_non_empty_sheet() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("book.xlsx");
        fs::write(&path, workbook_bytes())?;

        let documents = load_file(&path)?;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].metadata.sheet_name.as_deref(), Some("Revenue"));

        let set = load_table_set(&path)?;
        assert_eq!(set.sheet_names(), vec!["Revenue".to_string()]);
        Ok(())
    }

    #[test]
    fn discovery_keeps_supported_files_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        fs::create_dir(dir.path().join("nested"))?;
        fs::write(dir.path().join("b.txt"), "b")?;
        fs::write(dir.path().join("nested").join("a.md"), "a")?;
        fs::write(dir.path().join("skip.xls"), "x")?;

        let files = discover_files(dir.path());
        let names: Vec<String> = files.iter().map(|path| source_name(path)).collect();
        assert_eq!(files.len(), 2);
        assert!(names.contains(&"a.md".to_string()) && names.contains(&"b.txt".to_string()));
        Ok(())
    }
}
