use crate::error::UnanswerableError;
use crate::table::TableSet;
use crate::traits::Answerer;
use tracing::{debug, info, warn};

/// Case-insensitive fragments that mark a response as inconclusive.
pub const INCONCLUSIVE_PHRASES: [&str; 3] = ["error", "not found", "no relevant"];

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Position of the set in the slice the candidates were built from.
    pub set_index: usize,
    pub set_name: String,
    pub sheet_name: String,
    pub relevance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FallbackAnswer {
    pub set_name: String,
    pub sheet_name: String,
    pub response: String,
    pub attempts: usize,
}

pub fn is_conclusive(response: &str) -> bool {
    let lowered = response.to_lowercase();
    !lowered.trim().is_empty() && !INCONCLUSIVE_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

/// Every sheet of every set, most relevant first. Ties keep set order, then
/// sheet order.
pub fn candidates<'a>(sets: impl IntoIterator<Item = &'a TableSet>, query: &str) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = sets
        .into_iter()
        .enumerate()
        .flat_map(|(set_index, set)| {
            set.score_sheets(query).into_iter().map(move |score| Candidate {
                set_index,
                set_name: set.name().to_string(),
                sheet_name: score.sheet_name,
                relevance: score.relevance,
            })
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

/// Tries ranked sheets one at a time until the answerer gives a conclusive
/// response.
pub struct FallbackController<A>
where
    A: Answerer,
{
    answerer: A,
}

impl<A> FallbackController<A>
where
    A: Answerer,
{
    pub fn new(answerer: A) -> Self {
        Self { answerer }
    }

    pub async fn answer<'a>(
        &self,
        sets: impl IntoIterator<Item = &'a TableSet>,
        query: &str,
    ) -> Result<FallbackAnswer, UnanswerableError> {
        let sets: Vec<&TableSet> = sets.into_iter().collect();
        let ranked = candidates(sets.iter().copied(), query);
        let mut attempts = 0;
        let mut last_response = None;

        for candidate in ranked {
            let Some(set) = sets.get(candidate.set_index) else {
                continue;
            };
            let Ok(active) = set.switch(&candidate.sheet_name) else {
                continue;
            };
            if active.table().is_empty() {
                debug!(set = %candidate.set_name, sheet = %candidate.sheet_name, "skipping empty sheet");
                continue;
            }

            attempts += 1;
            info!(
                set = %candidate.set_name,
                sheet = %candidate.sheet_name,
                relevance = candidate.relevance,
                attempt = attempts,
                "trying sheet"
            );

            let response = match self.answerer.answer(active.table(), query).await {
                Ok(response) => response,
                Err(error) => format!("error: {error}"),
            };
            if is_conclusive(&response) {
                return Ok(FallbackAnswer {
                    set_name: candidate.set_name,
                    sheet_name: candidate.sheet_name,
                    response,
                    attempts,
                });
            }
            warn!(sheet = %candidate.sheet_name, %response, "inconclusive response");
            last_response = Some(response);
        }

        Err(UnanswerableError {
            query: query.to_string(),
            attempts,
            last_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnswerError;
    use crate::table::{Cell, Table};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers with the first cell of the table and records what it saw.
    #[derive(Default)]
    struct FirstCell {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Answerer for FirstCell {
        async fn answer(&self, table: &Table, _query: &str) -> Result<String, AnswerError> {
            let first = table.rows()[0][0].to_string();
            self.seen.lock().expect("lock").push(first.clone());
            if first == "boom" {
                return Err(AnswerError("backend down".to_string()));
            }
            Ok(first)
        }
    }

    fn sheet(header: &str, first: &str) -> Table {
        Table::new(vec![header.to_string()], vec![vec![Cell::from(first)]]).expect("one column")
    }

    fn workbook() -> TableSet {
        let mut set = TableSet::new("book.xlsx");
        set.insert("Notes", sheet("Note", "Not found here"));
        set.insert("Revenue", sheet("Revenue", "42"));
        set.insert("Empty", Table::default());
        set
    }

    #[test]
    fn inconclusive_phrases_are_case_insensitive() {
        assert!(!is_conclusive("No Relevant data"));
        assert!(!is_conclusive("  "));
        assert!(!is_conclusive("ERROR: bad column"));
        assert!(is_conclusive("42"));
    }

    #[tokio::test]
    async fn best_sheet_answers_first() {
        let controller = FallbackController::new(FirstCell::default());
        let set = workbook();
        let answer = controller.answer([&set], "revenue").await.expect("answer");
        assert_eq!(answer.sheet_name, "Revenue");
        assert_eq!(answer.response, "42");
        assert_eq!(answer.attempts, 1);
    }

    #[tokio::test]
    async fn inconclusive_sheets_fall_through_to_the_next() {
        let controller = FallbackController::new(FirstCell::default());
        let set = workbook();
        let answer = controller.answer([&set], "note").await.expect("answer");
        assert_eq!(answer.sheet_name, "Revenue");
        assert_eq!(answer.attempts, 2);
        assert_eq!(
            *controller.answerer.seen.lock().expect("lock"),
            vec!["Not found here".to_string(), "42".to_string()]
        );
    }

    #[tokio::test]
    async fn exhausted_candidates_are_unanswerable() {
        let controller = FallbackController::new(FirstCell::default());
        let mut set = TableSet::new("broken.xlsx");
        set.insert("A", sheet("A", "no relevant rows"));
        set.insert("B", sheet("B", "boom"));

        let error = controller.answer([&set], "anything").await.expect_err("unanswerable");
        assert_eq!(error.attempts, 2);
        assert!(error.last_response.is_some());
    }

    #[tokio::test]
    async fn same_named_sets_are_tried_separately() {
        let controller = FallbackController::new(FirstCell::default());
        let stale = TableSet::single("sales.csv", sheet("Total", "not found"));
        let fresh = TableSet::single("sales.csv", sheet("Total", "7"));

        let answer = controller.answer([&stale, &fresh], "total").await.expect("answer");
        assert_eq!(answer.response, "7");
        assert_eq!(answer.attempts, 2);
    }

    #[test]
    fn candidates_merge_across_sets() {
        let first = workbook();
        let second = TableSet::single("revenue.csv", sheet("Revenue", "7"));
        let ranked = candidates([&first, &second], "revenue");
        assert_eq!(ranked.len(), 4);
        assert!(ranked.windows(2).all(|pair| pair[0].relevance >= pair[1].relevance));
    }
}
