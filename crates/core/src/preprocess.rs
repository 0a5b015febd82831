use crate::table::{Cell, Table};
use tracing::debug;

const MAX_HEADER_REPAIRS: usize = 10;
const PLACEHOLDER_PREFIX: &str = "Unnamed";

/// Cleans a raw sheet: drops blank rows and sparse columns, repairs missing
/// headers from the first data rows, and drops rows that echo the header.
///
/// The cleaning pass is repeated until it no longer changes the table, so
/// running `preprocess` on its own output is a no-op. Returns an empty table
/// when nothing usable survives.
pub fn preprocess(raw: Table) -> Table {
    let mut current = raw;
    loop {
        let next = preprocess_pass(current.clone());
        if next == current {
            return next;
        }
        current = next;
    }
}

pub fn count_valid(cells: &[&Cell]) -> usize {
    cells.iter().filter(|cell| !cell.is_empty()).count()
}

pub fn count_invalid(cells: &[&Cell]) -> usize {
    cells.iter().filter(|cell| cell.is_empty()).count()
}

pub fn is_placeholder_label(label: &str) -> bool {
    label.trim().is_empty() || label.starts_with(PLACEHOLDER_PREFIX)
}

pub fn placeholder_label(position: usize) -> String {
    format!("{PLACEHOLDER_PREFIX}: {position}")
}

fn preprocess_pass(table: Table) -> Table {
    let (columns, rows) = table.into_parts();

    let rows: Vec<Vec<Cell>> = rows
        .into_iter()
        .filter(|row| !row.iter().all(Cell::is_empty))
        .collect();
    if rows.is_empty() {
        return Table::default();
    }

    let keep: Vec<usize> = (0..columns.len())
        .filter(|&column| {
            let cells: Vec<&Cell> = rows.iter().map(|row| &row[column]).collect();
            count_valid(&cells) > count_invalid(&cells)
        })
        .collect();
    if keep.is_empty() {
        return Table::default();
    }

    let mut columns: Vec<String> = keep.iter().map(|&i| columns[i].clone()).collect();
    let mut rows: Vec<Vec<Cell>> = rows
        .into_iter()
        .map(|row| keep.iter().map(|&i| row[i].clone()).collect())
        .collect();

    let mut repairs = 0;
    while !rows.is_empty()
        && repairs < MAX_HEADER_REPAIRS
        && columns.iter().any(|label| is_placeholder_label(label))
    {
        let promoted = rows.remove(0);
        columns = promoted
            .iter()
            .enumerate()
            .map(|(position, cell)| {
                if cell.is_empty() {
                    placeholder_label(position)
                } else {
                    cell.to_string().trim().to_string()
                }
            })
            .collect();
        repairs += 1;
    }
    if repairs > 0 {
        debug!(repairs, "promoted data rows to column labels");
    }

    rows.retain(|row| {
        !row.iter()
            .zip(columns.iter())
            .all(|(cell, label)| cell.to_string().trim() == label.trim())
    });

    if rows.is_empty() {
        return Table::default();
    }

    Table::from_parts(columns, rows)
}
