use crate::models::SheetScore;
use crate::table::{Table, TableSet};
use std::collections::{BTreeMap, BTreeSet};

/// Added when a query word appears in the sheet name.
pub const SHEET_NAME_BOOST: f64 = 0.15;
const SAMPLE_ROWS: usize = 10;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "across", "after", "afterwards", "again", "against", "all", "almost",
    "alone", "along", "already", "also", "although", "always", "am", "among", "amongst",
    "amoungst", "amount", "an", "and", "another", "any", "anyhow", "anyone", "anything", "anyway",
    "anywhere", "are", "around", "as", "at", "back", "be", "became", "because", "become",
    "becomes", "becoming", "been", "before", "beforehand", "behind", "being", "below", "beside",
    "besides", "between", "beyond", "bill", "both", "bottom", "but", "by", "call", "can",
    "cannot", "cant", "co", "con", "could", "couldnt", "cry", "de", "describe", "detail", "do",
    "done", "down", "due", "during", "each", "eg", "eight", "either", "eleven", "else",
    "elsewhere", "empty", "enough", "etc", "even", "ever", "every", "everyone", "everything",
    "everywhere", "except", "few", "fifteen", "fifty", "fill", "find", "fire", "first", "five",
    "for", "former", "formerly", "forty", "found", "four", "from", "front", "full", "further",
    "get", "give", "go", "had", "has", "hasnt", "have", "he", "hence", "her", "here",
    "hereafter", "hereby", "herein", "hereupon", "hers", "herself", "him", "himself", "his",
    "how", "however", "hundred", "i", "ie", "if", "in", "inc", "indeed", "interest", "into",
    "is", "it", "its", "itself", "keep", "last", "latter", "latterly", "least", "less", "ltd",
    "made", "many", "may", "me", "meanwhile", "might", "mill", "mine", "more", "moreover",
    "most", "mostly", "move", "much", "must", "my", "myself", "name", "namely", "neither",
    "never", "nevertheless", "next", "nine", "no", "nobody", "none", "noone", "nor", "not",
    "nothing", "now", "nowhere", "of", "off", "often", "on", "once", "one", "only", "onto",
    "or", "other", "others", "otherwise", "our", "ours", "ourselves", "out", "over", "own",
    "part", "per", "perhaps", "please", "put", "rather", "re", "same", "see", "seem", "seemed",
    "seeming", "seems", "serious", "several", "she", "should", "show", "side", "since",
    "sincere", "six", "sixty", "so", "some", "somehow", "someone", "something", "sometime",
    "sometimes", "somewhere", "still", "such", "system", "take", "ten", "than", "that", "the",
    "their", "them", "themselves", "then", "thence", "there", "thereafter", "thereby",
    "therefore", "therein", "thereupon", "these", "they", "thick", "thin", "third", "this",
    "those", "though", "three", "through", "throughout", "thru", "thus", "to", "together",
    "too", "top", "toward", "towards", "twelve", "twenty", "two", "un", "under", "until", "up",
    "upon", "us", "very", "via", "was", "we", "well", "were", "what", "whatever", "when",
    "whence", "whenever", "where", "whereafter", "whereas", "whereby", "wherein", "whereupon",
    "wherever", "whether", "which", "while", "whither", "who", "whoever", "whole", "whom",
    "whose", "why", "will", "with", "within", "without", "would", "yet", "you", "your",
    "yours", "yourself", "yourselves",
];

/// Relevance of one sheet to `query`: tf-idf cosine similarity between the
/// query and a text built from the sheet name, headers and first rows, plus
/// a boost when a query word occurs in the sheet name.
pub fn sheet_relevance(sheet_name: &str, table: &Table, query: &str) -> f64 {
    let name_text = sheet_name.replace(['_', '-'], " ");
    let document = sheet_document(&name_text, table);

    let Some(similarity) = tfidf_cosine(&document, query) else {
        return 0.0;
    };

    let name_lower = name_text.to_lowercase();
    let boosted = query
        .to_lowercase()
        .split_whitespace()
        .any(|word| name_lower.contains(word));
    if boosted {
        similarity + SHEET_NAME_BOOST
    } else {
        similarity
    }
}

/// Scores every sheet of the set, in sheet order.
pub fn score_sheets(set: &TableSet, query: &str) -> Vec<SheetScore> {
    set.sheets()
        .map(|(name, table)| SheetScore {
            sheet_name: name.to_string(),
            relevance: sheet_relevance(name, table, query),
        })
        .collect()
}

/// Up to `top_n` sheet names, most relevant first. Ties keep sheet order.
pub fn rank_sheets(set: &TableSet, query: &str, top_n: usize) -> Vec<String> {
    if set.len() == 1 {
        return set.sheet_names();
    }
    let mut scores = score_sheets(set, query);
    sort_by_relevance(&mut scores);
    scores
        .into_iter()
        .take(top_n)
        .map(|score| score.sheet_name)
        .collect()
}

pub(crate) fn sort_by_relevance(scores: &mut [SheetScore]) {
    scores.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn sheet_document(name_text: &str, table: &Table) -> String {
    let headers = table.columns().join(" ");
    let sample = table
        .rows()
        .iter()
        .take(SAMPLE_ROWS)
        .flat_map(|row| row.iter().map(|cell| cell.to_string()))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "{}{}{sample}",
        format!("{name_text} ").repeat(3),
        format!("{headers} ").repeat(2)
    )
}

/// Fits a vocabulary on the two texts and returns their cosine similarity,
/// or `None` when neither contains a usable term.
fn tfidf_cosine(left: &str, right: &str) -> Option<f64> {
    let counts = [term_counts(left), term_counts(right)];
    let vocabulary: BTreeSet<&String> = counts.iter().flat_map(|c| c.keys()).collect();
    if vocabulary.is_empty() {
        return None;
    }

    let documents = counts.len() as f64;
    let idf: BTreeMap<&String, f64> = vocabulary
        .iter()
        .map(|term| {
            let df = counts.iter().filter(|c| c.contains_key(*term)).count() as f64;
            (*term, ((1.0 + documents) / (1.0 + df)).ln() + 1.0)
        })
        .collect();

    let weigh = |c: &BTreeMap<String, usize>| -> BTreeMap<String, f64> {
        let mut weights: BTreeMap<String, f64> = c
            .iter()
            .map(|(term, count)| {
                let weight = *count as f64 * idf.get(term).copied().unwrap_or(1.0);
                (term.clone(), weight)
            })
            .collect();
        let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            weights.values_mut().for_each(|w| *w /= norm);
        }
        weights
    };

    let a = weigh(&counts[0]);
    let b = weigh(&counts[1]);
    Some(
        a.iter()
            .filter_map(|(term, weight)| b.get(term).map(|other| weight * other))
            .sum(),
    )
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .filter(|token| token.chars().count() >= 2)
        .filter(|token| !STOP_WORDS.contains(token))
        .map(str::to_string)
        .collect()
}

fn term_counts(text: &str) -> BTreeMap<String, usize> {
    let tokens = tokenize(text);
    let mut counts = BTreeMap::new();
    for token in &tokens {
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    for pair in tokens.windows(2) {
        *counts.entry(format!("{} {}", pair[0], pair[1])).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Cell;

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|row| row.iter().map(|cell| Cell::parse(cell)).collect())
                .collect(),
        )
        .expect("test table should be rectangular")
    }

    fn workbook() -> TableSet {
        let mut set = TableSet::new("book.xlsx");
        set.insert(
            "Notes",
            table(&["Note", "Author"], &[&["draft agenda", "Ada"]]),
        );
        set.insert(
            "Revenue",
            table(&["Region", "Revenue"], &[&["North", "10"], &["South", "12"]]),
        );
        set
    }

    #[test]
    fn tokens_skip_stop_words_and_single_characters() {
        assert_eq!(tokenize("The total_sales of Q3 in a region"), vec!["total_sales", "q3", "region"]);
    }

    #[test]
    fn matching_sheet_ranks_first() {
        let ranked = rank_sheets(&workbook(), "revenue by region", 3);
        assert_eq!(ranked, vec!["Revenue".to_string(), "Notes".to_string()]);
    }

    #[test]
    fn sheet_name_match_adds_boost() {
        let set = workbook();
        let notes = set.get("Notes").expect("notes sheet");
        let with_name = sheet_relevance("Notes", notes, "notes");
        let without_name = sheet_relevance("Memo", notes, "notes");
        assert!(with_name >= without_name + SHEET_NAME_BOOST - 1e-9);
    }

    #[test]
    fn empty_vocabulary_scores_zero_without_boost() {
        let sheet = table(&["x"], &[&["y"]]);
        assert_eq!(sheet_relevance("of", &sheet, "of"), 0.0);
    }

    #[test]
    fn single_sheet_is_returned_without_scoring() {
        let set = TableSet::single("people.csv", table(&["Name"], &[&["Ada"]]));
        assert_eq!(rank_sheets(&set, "anything", 3), vec!["default".to_string()]);
    }

    #[test]
    fn top_n_limits_the_ranking() {
        assert_eq!(rank_sheets(&workbook(), "revenue", 1).len(), 1);
    }

    #[test]
    fn scores_are_reported_for_every_sheet() {
        let scores = score_sheets(&workbook(), "revenue");
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().all(|score| score.relevance >= 0.0));
    }
}
