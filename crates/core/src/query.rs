use crate::chunking::render_pipe_table;
use crate::error::{AnswerError, ValidationError};
use crate::table::{Cell, Table};
use crate::traits::Answerer;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

const NO_ROWS: &str = "no relevant rows";

/// A query over one table, built from a fixed set of operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TableQuery {
    Filter {
        #[serde(default, rename = "where")]
        conditions: Vec<ColumnFilter>,
    },
    Reduce {
        #[serde(default, rename = "where")]
        conditions: Vec<ColumnFilter>,
        column: String,
        reducer: Reducer,
    },
    Group {
        #[serde(default, rename = "where")]
        conditions: Vec<ColumnFilter>,
        by: String,
        column: String,
        reducer: Reducer,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: String,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Equals(String),
    NotEquals(String),
    GreaterThan(f64),
    LessThan(f64),
    Contains(String),
    Matches(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Table),
    Scalar(Option<f64>),
    Groups(Vec<(String, Option<f64>)>),
}

impl QueryOutput {
    pub fn render(&self) -> String {
        match self {
            QueryOutput::Rows(table) if table.is_empty() => NO_ROWS.to_string(),
            QueryOutput::Rows(table) => render_pipe_table(table.columns(), table.rows()),
            QueryOutput::Scalar(value) => render_value(*value),
            QueryOutput::Groups(groups) if groups.is_empty() => NO_ROWS.to_string(),
            QueryOutput::Groups(groups) => groups
                .iter()
                .map(|(key, value)| format!("{key}: {}", render_value(*value)))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn render_value(value: Option<f64>) -> String {
    match value {
        Some(number) => Cell::Number(number).to_string(),
        None => "no relevant values".to_string(),
    }
}

impl TableQuery {
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(text).map_err(|error| ValidationError::MalformedJson {
            source_name: "table query".to_string(),
            reason: error.to_string(),
        })
    }

    fn conditions(&self) -> &[ColumnFilter] {
        match self {
            TableQuery::Filter { conditions }
            | TableQuery::Reduce { conditions, .. }
            | TableQuery::Group { conditions, .. } => conditions,
        }
    }
}

enum Compiled {
    Equals(String),
    NotEquals(String),
    GreaterThan(f64),
    LessThan(f64),
    Contains(String),
    Matches(Regex),
}

impl Compiled {
    fn new(predicate: &Predicate) -> Result<Self, ValidationError> {
        Ok(match predicate {
            Predicate::Equals(value) => Compiled::Equals(value.clone()),
            Predicate::NotEquals(value) => Compiled::NotEquals(value.clone()),
            Predicate::GreaterThan(value) => Compiled::GreaterThan(*value),
            Predicate::LessThan(value) => Compiled::LessThan(*value),
            Predicate::Contains(value) => Compiled::Contains(value.to_lowercase()),
            Predicate::Matches(pattern) => Compiled::Matches(Regex::new(pattern)?),
        })
    }

    fn test(&self, cell: &Cell) -> bool {
        match self {
            Compiled::Equals(value) => same_value(cell, value),
            Compiled::NotEquals(value) => !same_value(cell, value),
            Compiled::GreaterThan(bound) => cell.as_number().is_some_and(|n| n > *bound),
            Compiled::LessThan(bound) => cell.as_number().is_some_and(|n| n < *bound),
            Compiled::Contains(needle) => cell.to_string().to_lowercase().contains(needle.as_str()),
            Compiled::Matches(pattern) => pattern.is_match(&cell.to_string()),
        }
    }
}

fn same_value(cell: &Cell, value: &str) -> bool {
    if let (Some(left), Ok(right)) = (cell.as_number(), value.trim().parse::<f64>()) {
        return left == right;
    }
    cell.to_string().trim().to_lowercase() == value.trim().to_lowercase()
}

/// Runs `query` against `table`. Column names resolve exactly, then
/// case-insensitively.
pub fn execute(table: &Table, query: &TableQuery) -> Result<QueryOutput, ValidationError> {
    let filters = query
        .conditions()
        .iter()
        .map(|filter| Ok((table.require_column(&filter.column)?, Compiled::new(&filter.predicate)?)))
        .collect::<Result<Vec<_>, ValidationError>>()?;

    let matched: Vec<&Vec<Cell>> = table
        .rows()
        .iter()
        .filter(|row| filters.iter().all(|(column, filter)| filter.test(&row[*column])))
        .collect();

    match query {
        TableQuery::Filter { .. } => Ok(QueryOutput::Rows(Table::from_parts(
            table.columns().to_vec(),
            matched.into_iter().cloned().collect(),
        ))),
        TableQuery::Reduce {
            column, reducer, ..
        } => {
            let column = table.require_column(column)?;
            let cells: Vec<&Cell> = matched.iter().map(|row| &row[column]).collect();
            Ok(QueryOutput::Scalar(reduce(*reducer, &cells)))
        }
        TableQuery::Group {
            by,
            column,
            reducer,
            ..
        } => {
            let by = table.require_column(by)?;
            let column = table.require_column(column)?;
            let mut groups: Vec<(String, Vec<&Cell>)> = Vec::new();
            for row in matched {
                let key = row[by].to_string();
                match groups.iter_mut().find(|(existing, _)| *existing == key) {
                    Some((_, cells)) => cells.push(&row[column]),
                    None => groups.push((key, vec![&row[column]])),
                }
            }
            Ok(QueryOutput::Groups(
                groups
                    .into_iter()
                    .map(|(key, cells)| (key, reduce(*reducer, &cells)))
                    .collect(),
            ))
        }
    }
}

fn reduce(reducer: Reducer, cells: &[&Cell]) -> Option<f64> {
    if reducer == Reducer::Count {
        return Some(cells.iter().filter(|cell| !cell.is_empty()).count() as f64);
    }
    let numbers: Vec<f64> = cells.iter().filter_map(|cell| cell.as_number()).collect();
    if numbers.is_empty() {
        return None;
    }
    match reducer {
        Reducer::Sum => Some(numbers.iter().sum()),
        Reducer::Mean => Some(numbers.iter().sum::<f64>() / numbers.len() as f64),
        Reducer::Min => numbers.iter().copied().reduce(f64::min),
        Reducer::Max => numbers.iter().copied().reduce(f64::max),
        Reducer::Count => None,
    }
}

/// Answers by running a fixed plan against whichever table it is given.
#[derive(Debug, Clone)]
pub struct QueryAnswerer {
    pub plan: TableQuery,
}

impl QueryAnswerer {
    pub fn new(plan: TableQuery) -> Self {
        Self { plan }
    }
}

#[async_trait]
impl Answerer for QueryAnswerer {
    async fn answer(&self, table: &Table, _query: &str) -> Result<String, AnswerError> {
        execute(table, &self.plan)
            .map(|output| output.render())
            .map_err(|error| AnswerError(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sales() -> Table {
        Table::new(
            vec!["Region".to_string(), "Product".to_string(), "Units".to_string()],
            [
                ["North", "Pump", "10"],
                ["South", "Valve", "4"],
                ["North", "Valve", "6"],
                ["East", "Pump", ""],
            ]
            .iter()
            .map(|row| row.iter().map(|cell| Cell::parse(cell)).collect())
            .collect(),
        )
        .expect("sales table is rectangular")
    }

    #[test]
    fn plans_parse_from_json() -> Result<(), ValidationError> {
        let plan = TableQuery::from_json(
            r#"{"op":"reduce","where":[{"column":"region","predicate":{"equals":"north"}}],"column":"Units","reducer":"sum"}"#,
        )?;
        assert_eq!(execute(&sales(), &plan)?, QueryOutput::Scalar(Some(16.0)));
        Ok(())
    }

    #[test]
    fn malformed_plans_are_validation_errors() {
        assert!(matches!(
            TableQuery::from_json(r#"{"op":"explode"}"#),
            Err(ValidationError::MalformedJson { .. })
        ));
    }

    #[test]
    fn filter_combines_predicates() -> Result<(), ValidationError> {
        let plan = TableQuery::Filter {
            conditions: vec![
                ColumnFilter {
                    column: "Product".to_string(),
                    predicate: Predicate::Matches("^V".to_string()),
                },
                ColumnFilter {
                    column: "Units".to_string(),
                    predicate: Predicate::GreaterThan(5.0),
                },
            ],
        };
        match execute(&sales(), &plan)? {
            QueryOutput::Rows(rows) => {
                assert_eq!(rows.row_count(), 1);
                assert_eq!(rows.rows()[0][0], Cell::from("North"));
            }
            other => panic!("unexpected output: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn groups_keep_first_seen_order() -> Result<(), ValidationError> {
        let plan = TableQuery::Group {
            conditions: Vec::new(),
            by: "Region".to_string(),
            column: "Units".to_string(),
            reducer: Reducer::Count,
        };
        let output = execute(&sales(), &plan)?;
        assert_eq!(
            output,
            QueryOutput::Groups(vec![
                ("North".to_string(), Some(2.0)),
                ("South".to_string(), Some(1.0)),
                ("East".to_string(), Some(0.0)),
            ])
        );
        assert_eq!(output.render(), "North: 2\nSouth: 1\nEast: 0");
        Ok(())
    }

    #[test]
    fn unknown_columns_and_bad_patterns_are_rejected() {
        let unknown = TableQuery::Reduce {
            conditions: Vec::new(),
            column: "Price".to_string(),
            reducer: Reducer::Max,
        };
        assert!(matches!(
            execute(&sales(), &unknown),
            Err(ValidationError::UnknownColumn(_))
        ));

        let bad = TableQuery::Filter {
            conditions: vec![ColumnFilter {
                column: "Region".to_string(),
                predicate: Predicate::Matches("(".to_string()),
            }],
        };
        assert!(matches!(
            execute(&sales(), &bad),
            Err(ValidationError::InvalidPattern(_))
        ));
    }

    #[test]
    fn empty_results_render_as_inconclusive() -> Result<(), ValidationError> {
        let plan = TableQuery::Filter {
            conditions: vec![ColumnFilter {
                column: "Region".to_string(),
                predicate: Predicate::Equals("West".to_string()),
            }],
        };
        assert_eq!(execute(&sales(), &plan)?.render(), NO_ROWS);
        Ok(())
    }

    #[tokio::test]
    async fn answerer_reports_errors_as_answer_errors() {
        let answerer = QueryAnswerer::new(TableQuery::Reduce {
            conditions: Vec::new(),
            column: "Missing".to_string(),
            reducer: Reducer::Sum,
        });
        assert!(answerer.answer(&sales(), "total?").await.is_err());
    }
}
