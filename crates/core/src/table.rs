use crate::error::{ProcessingError, ValidationError};
use crate::models::SheetScore;
use crate::ranking;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sheet name used for single-table sources such as CSV files.
pub const DEFAULT_SHEET: &str = "default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Cell {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Cell {
    /// Interprets raw spreadsheet text: blank becomes `Null`, numerals become
    /// numbers, anything else is kept verbatim.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Null;
        }
        match trimmed.parse::<f64>() {
            Ok(number) if number.is_finite() => Cell::Number(number),
            _ => Cell::Text(raw.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Text(text) => text.trim().is_empty(),
            Cell::Bool(_) | Cell::Number(_) => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(number) => Some(*number),
            Cell::Text(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Cell::Null | Cell::Bool(_) => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(value) => write!(f, "{value}"),
            Cell::Number(number) => {
                if number.fract() == 0.0 && number.abs() < 1e15 {
                    write!(f, "{}", *number as i64)
                } else {
                    write!(f, "{number}")
                }
            }
            Cell::Text(text) => f.write_str(text),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Number(value as f64)
    }
}

/// Column labels plus rows of cells, every row as wide as the label list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<Vec<Cell>>,
}

impl TryFrom<RawTable> for Table {
    type Error = ProcessingError;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        Table::new(raw.columns, raw.rows)
    }
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self, ProcessingError> {
        let table = Self { columns, rows };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), ProcessingError> {
        if self.columns.is_empty() && !self.rows.is_empty() {
            return Err(ProcessingError::NotTabular(format!(
                "{} row(s) without any column labels",
                self.rows.len()
            )));
        }
        if let Some((position, row)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.columns.len())
        {
            return Err(ProcessingError::NotTabular(format!(
                "row {} has {} cells but the table has {} columns",
                position + 1,
                row.len(),
                self.columns.len()
            )));
        }
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// A table without rows is empty regardless of its labels.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.columns
            .iter()
            .position(|column| column == wanted)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|column| column.eq_ignore_ascii_case(wanted))
            })
    }

    pub fn require_column(&self, name: &str) -> Result<usize, ValidationError> {
        self.column_index(name)
            .ok_or_else(|| ValidationError::UnknownColumn(name.to_string()))
    }

    pub(crate) fn from_parts(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { columns, rows }
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, Vec<Vec<Cell>>) {
        (self.columns, self.rows)
    }
}

/// The sheets of one tabular source, in the order they were loaded.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSet {
    name: String,
    sheets: Vec<(String, Table)>,
}

impl TableSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sheets: Vec::new(),
        }
    }

    pub fn single(name: impl Into<String>, table: Table) -> Self {
        let mut set = Self::new(name);
        set.insert(DEFAULT_SHEET, table);
        set
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a sheet, replacing an existing sheet of the same name in place.
    pub fn insert(&mut self, sheet: impl Into<String>, table: Table) {
        let sheet = sheet.into();
        match self.sheets.iter_mut().find(|(name, _)| *name == sheet) {
            Some(slot) => slot.1 = table,
            None => self.sheets.push((sheet, table)),
        }
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn sheets(&self) -> impl Iterator<Item = (&str, &Table)> {
        self.sheets.iter().map(|(name, table)| (name.as_str(), table))
    }

    pub fn get(&self, sheet: &str) -> Option<&Table> {
        self.sheets
            .iter()
            .find(|(name, _)| name == sheet)
            .map(|(_, table)| table)
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    /// The sheet that is current right after loading: the first one.
    pub fn default_sheet(&self) -> Option<ActiveSheet<'_>> {
        self.sheets.first().map(|(name, table)| ActiveSheet {
            set: self,
            sheet: name,
            table,
        })
    }

    /// Returns a handle on `sheet`. The set itself is not modified, so other
    /// holders of the set keep whatever sheet they were looking at.
    pub fn switch(&self, sheet: &str) -> Result<ActiveSheet<'_>, ValidationError> {
        self.sheets
            .iter()
            .find(|(name, _)| name == sheet)
            .map(|(name, table)| ActiveSheet {
                set: self,
                sheet: name,
                table,
            })
            .ok_or_else(|| ValidationError::SheetNotFound {
                sheet: sheet.to_string(),
                available: self.sheet_names(),
            })
    }

    pub fn score_sheets(&self, query: &str) -> Vec<SheetScore> {
        ranking::score_sheets(self, query)
    }

    pub fn rank_sheets(&self, query: &str, top_n: usize) -> Vec<String> {
        ranking::rank_sheets(self, query, top_n)
    }
}

/// A `(TableSet, sheet)` pair: the current sheet for one caller.
#[derive(Debug, Clone, Copy)]
pub struct ActiveSheet<'a> {
    set: &'a TableSet,
    sheet: &'a str,
    table: &'a Table,
}

impl<'a> ActiveSheet<'a> {
    pub fn set(&self) -> &'a TableSet {
        self.set
    }

    pub fn sheet_name(&self) -> &'a str {
        self.sheet
    }

    pub fn table(&self) -> &'a Table {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|cell| Cell::parse(cell)).collect())
                .collect(),
        )
        .expect("test table should be rectangular")
    }

    #[test]
    fn cells_parse_numbers_and_blanks() {
        assert_eq!(Cell::parse("  "), Cell::Null);
        assert_eq!(Cell::parse("42"), Cell::Number(42.0));
        assert_eq!(Cell::parse("4.5"), Cell::Number(4.5));
        assert_eq!(Cell::parse("Sales"), Cell::Text("Sales".to_string()));
        assert_eq!(Cell::Number(42.0).to_string(), "42");
        assert_eq!(Cell::Number(4.25).to_string(), "4.25");
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let result = Table::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![Cell::from("x")]],
        );
        assert!(matches!(result, Err(ProcessingError::NotTabular(_))));
    }

    #[test]
    fn ragged_tables_are_rejected_when_deserialized() {
        let ragged = serde_json::json!({"columns": ["A", "B"], "rows": [["1"]]});
        assert!(serde_json::from_value::<Table>(ragged).is_err());

        let square = serde_json::json!({"columns": ["A", "B"], "rows": [["1", 2]]});
        let table = serde_json::from_value::<Table>(square).expect("rectangular table");
        assert_eq!(table.rows()[0], vec![Cell::from("1"), Cell::Number(2.0)]);
    }

    #[test]
    fn switching_sheets_leaves_the_set_untouched() -> Result<(), Box<dyn std::error::Error>> {
        let mut set = TableSet::new("book.xlsx");
        set.insert("Revenue", table(&["Region", "Total"], &[&["North", "10"]]));
        set.insert("Notes", table(&["Note"], &[&["draft"]]));

        let first = set.default_sheet().ok_or("set should have a first sheet")?;
        let notes = set.switch("Notes")?;

        assert_eq!(first.sheet_name(), "Revenue");
        assert_eq!(notes.sheet_name(), "Notes");
        assert_eq!(set.default_sheet().map(|s| s.sheet_name()), Some("Revenue"));
        Ok(())
    }

    #[test]
    fn switching_to_a_missing_sheet_names_the_alternatives() {
        let set = TableSet::single("people.csv", table(&["Name"], &[&["Ada"]]));
        match set.switch("Payroll") {
            Err(ValidationError::SheetNotFound { sheet, available }) => {
                assert_eq!(sheet, "Payroll");
                assert_eq!(available, vec![DEFAULT_SHEET.to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn inserting_an_existing_sheet_keeps_its_position() {
        let mut set = TableSet::new("book.xlsx");
        set.insert("A", table(&["x"], &[&["1"]]));
        set.insert("B", table(&["x"], &[&["2"]]));
        set.insert("A", table(&["x"], &[&["3"]]));
        assert_eq!(set.sheet_names(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(set.get("A").map(|t| t.rows()[0][0].clone()), Some(Cell::Number(3.0)));
    }
}
