use crate::error::ProcessingError;
use crate::models::IngestionOptions;
use crate::table::{Cell, Table};
use std::collections::VecDeque;
use std::ops::Range;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ProcessingError> {
        if chunk_size == 0 {
            return Err(ProcessingError::InvalidChunkConfig(
                "chunk size must be positive".to_string(),
            ));
        }
        if overlap >= chunk_size {
            return Err(ProcessingError::InvalidChunkConfig(format!(
                "overlap {overlap} must be smaller than chunk size {chunk_size}"
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn from_options(options: &IngestionOptions) -> Result<Self, ProcessingError> {
        Self::new(options.chunk_max_chars, options.chunk_overlap_chars)
    }

    /// Splits on paragraph breaks first, then lines, then words, then
    /// characters, merging neighbouring pieces back up to the chunk size.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let position = separators
            .iter()
            .position(|separator| separator.is_empty() || text.contains(separator))
            .unwrap_or(separators.len().saturating_sub(1));
        let separator = separators.get(position).copied().unwrap_or("");
        let finer = separators.get(position + 1..).unwrap_or(&[]);

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(start, ch)| &text[start..start + ch.len_utf8()])
                .collect()
        } else {
            text.split(separator).filter(|piece| !piece.is_empty()).collect()
        };

        let mut small = Vec::new();
        let mut chunks = Vec::new();
        for piece in pieces {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge(&small, separator));
                small.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge(&small, separator));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut merged = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joint = if window.is_empty() { 0 } else { separator_len };

            if total + len + joint > self.chunk_size && !window.is_empty() {
                merged.extend(join_window(&window, separator));
                loop {
                    let joint = if window.is_empty() { 0 } else { separator_len };
                    let over_budget = total + len + joint > self.chunk_size && total > 0;
                    if total <= self.overlap && !over_budget {
                        break;
                    }
                    let trailing = if window.len() > 1 { separator_len } else { 0 };
                    match window.pop_front() {
                        Some((_, first_len)) => total -= first_len + trailing,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len + if window.len() > 1 { separator_len } else { 0 };
        }

        merged.extend(join_window(&window, separator));
        merged
    }
}

fn join_window(window: &VecDeque<(&str, usize)>, separator: &str) -> Option<String> {
    let joined = window
        .iter()
        .map(|(piece, _)| *piece)
        .collect::<Vec<_>>()
        .join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, ProcessingError> {
    Ok(TextSplitter::new(chunk_size, overlap)?.split(text))
}

/// One rendered window of consecutive table rows.
#[derive(Debug, Clone, PartialEq)]
pub struct TableChunk {
    pub rows: Range<usize>,
    pub text: String,
}

/// Renders `rows_per_chunk`-row windows of `table`, each with the header.
///
/// A window whose rendering exceeds `max_chunk_size` characters is split in
/// half and retried until it fits; a single row is emitted even when it is
/// still too large. Windows never split a row and together cover every row
/// exactly once, in order.
pub fn table_row_chunks(
    table: &Table,
    rows_per_chunk: usize,
    max_chunk_size: usize,
    sheet_name: Option<&str>,
) -> Result<Vec<TableChunk>, ProcessingError> {
    if rows_per_chunk == 0 {
        return Err(ProcessingError::InvalidChunkConfig(
            "rows per chunk must be positive".to_string(),
        ));
    }
    table.validate()?;

    let mut chunks = Vec::new();
    collect_windows(
        table,
        0..table.row_count(),
        rows_per_chunk,
        max_chunk_size,
        sheet_name,
        &mut chunks,
    );
    Ok(chunks)
}

pub fn chunk_table_by_rows(
    table: &Table,
    rows_per_chunk: usize,
    max_chunk_size: usize,
) -> Result<Vec<String>, ProcessingError> {
    Ok(table_row_chunks(table, rows_per_chunk, max_chunk_size, None)?
        .into_iter()
        .map(|chunk| chunk.text)
        .collect())
}

pub fn chunk_sheet_by_rows(
    table: &Table,
    sheet_name: &str,
    rows_per_chunk: usize,
    max_chunk_size: usize,
) -> Result<Vec<String>, ProcessingError> {
    Ok(
        table_row_chunks(table, rows_per_chunk, max_chunk_size, Some(sheet_name))?
            .into_iter()
            .map(|chunk| chunk.text)
            .collect(),
    )
}

fn collect_windows(
    table: &Table,
    range: Range<usize>,
    rows_per_chunk: usize,
    max_chunk_size: usize,
    sheet_name: Option<&str>,
    chunks: &mut Vec<TableChunk>,
) {
    let mut start = range.start;
    while start < range.end {
        let end = (start + rows_per_chunk).min(range.end);
        let text = render_window(table, start..end, sheet_name);

        if char_len(&text) > max_chunk_size && end - start > 1 {
            let halved = ((end - start) / 2).max(1);
            collect_windows(table, start..end, halved, max_chunk_size, sheet_name, chunks);
        } else {
            chunks.push(TableChunk {
                rows: start..end,
                text,
            });
        }
        start = end;
    }
}

fn render_window(table: &Table, rows: Range<usize>, sheet_name: Option<&str>) -> String {
    let rendered = render_pipe_table(table.columns(), &table.rows()[rows.clone()]);
    match sheet_name {
        Some(sheet) => format!(
            "## Sheet: {sheet} (Rows {}-{})\n\n{rendered}",
            rows.start + 1,
            rows.end
        ),
        None => rendered,
    }
}

/// Markdown pipe table; numeric columns are right aligned.
pub fn render_pipe_table(columns: &[String], rows: &[Vec<Cell>]) -> String {
    let header: Vec<String> = columns.iter().map(|label| escape_cell(label)).collect();
    let body: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(|cell| escape_cell(&cell.to_string())).collect())
        .collect();

    let widths: Vec<usize> = header
        .iter()
        .enumerate()
        .map(|(column, label)| {
            body.iter()
                .filter_map(|row| row.get(column))
                .map(|value| char_len(value))
                .chain(std::iter::once(char_len(label)))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let numeric: Vec<bool> = (0..columns.len())
        .map(|column| {
            let mut values = rows
                .iter()
                .filter_map(|row| row.get(column))
                .filter(|cell| !cell.is_empty())
                .peekable();
            values.peek().is_some() && values.all(|cell| matches!(cell, Cell::Number(_)))
        })
        .collect();

    let mut out = String::new();
    out.push_str(&render_line(&header, &widths, &numeric));
    out.push('\n');

    let rule: Vec<String> = widths
        .iter()
        .zip(numeric.iter())
        .map(|(width, right)| {
            if *right {
                format!("{}:", "-".repeat(width + 1))
            } else {
                format!(":{}", "-".repeat(width + 1))
            }
        })
        .collect();
    out.push('|');
    out.push_str(&rule.join("|"));
    out.push('|');

    for row in &body {
        out.push('\n');
        out.push_str(&render_line(row, &widths, &numeric));
    }
    out
}

fn render_line(values: &[String], widths: &[usize], numeric: &[bool]) -> String {
    let cells: Vec<String> = values
        .iter()
        .zip(widths.iter().zip(numeric.iter()))
        .map(|(value, (width, right))| {
            let padding = " ".repeat(width.saturating_sub(char_len(value)));
            if *right {
                format!(" {padding}{value} ")
            } else {
                format!(" {value}{padding} ")
            }
        })
        .collect();
    format!("|{}|", cells.join("|"))
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|").replace(['\r', '\n'], " ")
}

pub(crate) fn char_len(text: &str) -> usize {
    text.chars().count()
}
