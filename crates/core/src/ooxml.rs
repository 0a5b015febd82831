use crate::error::ProcessingError;
use crate::preprocess::placeholder_label;
use crate::table::{Cell, Table};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use tracing::warn;

const MAX_XML_ENTRY_BYTES: u64 = 64 * 1024 * 1024;
const MAX_CELLS_PER_SHEET: usize = 2_000_000;

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn ooxml_error(error: impl std::fmt::Display) -> ProcessingError {
    ProcessingError::Spreadsheet(error.to_string())
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ProcessingError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(ooxml_error)
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Option<Vec<u8>>, ProcessingError> {
    let entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(error) => return Err(ooxml_error(error)),
    };
    let mut out = Vec::new();
    entry.take(MAX_XML_ENTRY_BYTES).read_to_end(&mut out)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ProcessingError::Spreadsheet(format!(
            "zip entry {name} exceeds {MAX_XML_ENTRY_BYTES} bytes"
        )));
    }
    Ok(Some(out))
}

fn attribute(element: &BytesStart<'_>, local_name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == local_name)
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

/// Paragraph text of a `.docx`, one line per paragraph.
pub fn read_docx(bytes: &[u8]) -> Result<String, ProcessingError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?
        .ok_or_else(|| ProcessingError::Spreadsheet("word/document.xml not found".to_string()))?;

    let mut out = String::new();
    let mut reader = Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => out.push_str(&te.unescape().map_err(ooxml_error)?),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(ooxml_error(error)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Every worksheet of an `.xlsx` in workbook order, first row as labels.
/// Tables are returned raw; callers preprocess them.
pub fn read_xlsx(bytes: &[u8]) -> Result<Vec<(String, Table)>, ProcessingError> {
    let mut archive = open_archive(bytes)?;
    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => read_shared_strings(&xml)?,
        None => Vec::new(),
    };

    let mut sheets = Vec::new();
    for (name, path) in list_worksheets(&mut archive)? {
        let Some(xml) = read_entry(&mut archive, &path)? else {
            warn!(sheet = %name, path = %path, "worksheet part missing");
            continue;
        };
        let rows = read_sheet_rows(&xml, &shared)?;
        sheets.push((name, rows_to_table(rows)?));
    }
    Ok(sheets)
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ProcessingError> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_text => {
                if let Some(text) = current.as_mut() {
                    text.push_str(&te.unescape().map_err(ooxml_error)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"si" => strings.extend(current.take()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(ooxml_error(error)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// `(sheet name, part path)` pairs from the workbook and its relationships.
fn list_worksheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ProcessingError> {
    let workbook = read_entry(archive, "xl/workbook.xml")?
        .ok_or_else(|| ProcessingError::Spreadsheet("xl/workbook.xml not found".to_string()))?;
    let targets = match read_entry(archive, "xl/_rels/workbook.xml.rels")? {
        Some(xml) => read_relationships(&xml)?,
        None => HashMap::new(),
    };

    let mut sheets = Vec::new();
    let mut reader = Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(&e, b"name").unwrap_or_default();
                let position = sheets.len() + 1;
                let path = attribute(&e, b"id")
                    .and_then(|id| targets.get(&id).cloned())
                    .unwrap_or_else(|| format!("xl/worksheets/sheet{position}.xml"));
                sheets.push((name, path));
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(ooxml_error(error)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn read_relationships(xml: &[u8]) -> Result<HashMap<String, String>, ProcessingError> {
    let mut targets = HashMap::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attribute(&e, b"Id"), attribute(&e, b"Target")) {
                    let path = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{target}"),
                    };
                    targets.insert(id, path);
                }
            }
            Ok(Event::Eof) => break,
            Err(error) => return Err(ooxml_error(error)),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// Zero-based column of a cell reference such as `AB12`.
fn column_of(reference: &str) -> Option<usize> {
    let letters: Vec<char> = reference.chars().take_while(char::is_ascii_alphabetic).collect();
    if letters.is_empty() {
        return None;
    }
    let number = letters
        .iter()
        .fold(0usize, |acc, ch| acc * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1));
    Some(number - 1)
}

struct PendingCell {
    column: usize,
    kind: Option<String>,
    value: String,
}

impl PendingCell {
    fn finish(self, shared: &[String]) -> Cell {
        match self.kind.as_deref() {
            Some("s") => self
                .value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|index| shared.get(index))
                .map_or(Cell::Null, |text| Cell::parse(text)),
            Some("b") => Cell::Bool(self.value.trim() == "1"),
            _ => Cell::parse(&self.value),
        }
    }
}

fn read_sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<Vec<(usize, Cell)>>, ProcessingError> {
    let mut rows = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut row: Vec<(usize, Cell)> = Vec::new();
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;
    let mut cells = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    let column = attribute(&e, b"r")
                        .and_then(|reference| column_of(&reference))
                        .unwrap_or_else(|| row.last().map_or(0, |(c, _)| c + 1));
                    cell = Some(PendingCell {
                        column,
                        kind: attribute(&e, b"t"),
                        value: String::new(),
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => rows.push(Vec::new()),
            Ok(Event::Text(te)) if in_value => {
                if let Some(pending) = cell.as_mut() {
                    pending.value.push_str(&te.unescape().map_err(ooxml_error)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(pending) = cell.take() {
                        let column = pending.column;
                        row.push((column, pending.finish(shared)));
                        cells += 1;
                    }
                }
                b"row" => rows.push(std::mem::take(&mut row)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(ooxml_error(error)),
            _ => {}
        }
        buf.clear();

        if cells >= MAX_CELLS_PER_SHEET {
            warn!(cells, "worksheet truncated at cell limit");
            break;
        }
    }
    Ok(rows)
}

fn rows_to_table(rows: Vec<Vec<(usize, Cell)>>) -> Result<Table, ProcessingError> {
    let width = rows
        .iter()
        .flat_map(|row| row.iter().map(|(column, _)| column + 1))
        .max()
        .unwrap_or(0);
    if width == 0 {
        return Ok(Table::default());
    }

    let mut dense = rows.into_iter().map(|sparse| {
        let mut row = vec![Cell::Null; width];
        for (column, value) in sparse {
            row[column] = value;
        }
        row
    });

    let columns: Vec<String> = match dense.next() {
        Some(header) => header
            .iter()
            .enumerate()
            .map(|(position, cell)| {
                if cell.is_empty() {
                    placeholder_label(position)
                } else {
                    cell.to_string().trim().to_string()
                }
            })
            .collect(),
        None => return Ok(Table::default()),
    };
    Table::new(columns, dense.collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .expect("start entry");
            writer.write_all(body.as_bytes()).expect("write entry");
        }
        writer.finish().expect("finish zip").into_inner()
    }

    pub(crate) fn workbook_bytes() -> Vec<u8> {
        zip_bytes(&[
            (
                "xl/workbook.xml",
                r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Revenue" sheetId="1" r:id="rId1"/><sheet name="Notes" sheetId="2" r:id="rId2"/></sheets></workbook>"#,
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Target="/xl/worksheets/sheet2.xml"/></Relationships>"#,
            ),
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>Region</t></si><si><t>Total</t></si><si><r><t>No</t></r><r><t>rth</t></r></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row><row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>10</v></c></row><row r="3"><c r="A3" t="inlineStr"><is><t>South</t></is></c><c r="C3" t="b"><v>1</v></c></row></sheetData></worksheet>"#,
            ),
            (
                "xl/worksheets/sheet2.xml",
                r#"<worksheet><sheetData/></worksheet>"#,
            ),
        ])
    }

    #[test]
    fn worksheets_follow_workbook_order() -> Result<(), ProcessingError> {
        let sheets = read_xlsx(&workbook_bytes())?;
        let names: Vec<&str> = sheets.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["Revenue", "Notes"]);

        let revenue = &sheets[0].1;
        assert_eq!(revenue.columns(), ["Region", "Total", "Unnamed: 2"]);
        assert_eq!(revenue.rows()[0][0], Cell::from("North"));
        assert_eq!(revenue.rows()[0][1], Cell::Number(10.0));
        assert_eq!(revenue.rows()[1][2], Cell::Bool(true));
        assert!(sheets[1].1.is_empty());
        Ok(())
    }

    #[test]
    fn column_letters_are_decoded() {
        assert_eq!(column_of("A1"), Some(0));
        assert_eq!(column_of("Z9"), Some(25));
        assert_eq!(column_of("AB12"), Some(27));
        assert_eq!(column_of("12"), None);
    }

    #[test]
    fn docx_paragraphs_become_lines() -> Result<(), ProcessingError> {
        let bytes = zip_bytes(&[(
            "word/document.xml",
            r#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> world</w:t></w:r></w:p><w:p><w:r><w:t>Second</w:t></w:r></w:p></w:body></w:document>"#,
        )]);
        assert_eq!(read_docx(&bytes)?, "Hello world\nSecond\n");
        Ok(())
    }

    #[test]
    fn garbage_is_a_spreadsheet_error() {
        assert!(matches!(
            read_xlsx(b"not a zip"),
            Err(ProcessingError::Spreadsheet(_))
        ));
    }
}
