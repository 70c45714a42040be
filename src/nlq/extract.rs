//! Text helpers shared by the pipeline stages: pulling structured output
//! out of model completions, finding domain terms in user text, and
//! lexical checks over query text.

use crate::schema::SchemaDescriptor;

/// First JSON object in a completion, tolerating fences and prose around it
pub fn extract_json(response: &str) -> Option<serde_json::Value> {
    let trimmed = response.trim();
    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let bytes = trimmed.as_bytes();
    let mut search_from = 0;
    while let Some(offset) = trimmed[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = matching_brace(bytes, start) {
            if let Ok(value @ serde_json::Value::Object(_)) =
                serde_json::from_str(&trimmed[start..=end])
            {
                return Some(value);
            }
        }
        search_from = start + 1;
    }
    None
}

fn matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract a query from text that may contain markdown fences or prose
pub fn extract_cypher(response: &str) -> String {
    let trimmed = response.trim();

    // Fenced block: take the first one
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip language tag (e.g. "cypher\n")
        let code_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        if let Some(end) = after_fence[code_start..].find("```") {
            return after_fence[code_start..code_start + end].trim().to_string();
        }
    }

    // Prose around the query: keep the lines that look like clauses
    let clause_starts = [
        "MATCH", "OPTIONAL", "WHERE", "WITH", "UNWIND", "CREATE", "MERGE", "SET", "DELETE",
        "DETACH", "REMOVE", "RETURN", "ORDER", "SKIP", "LIMIT",
    ];
    let lines: Vec<&str> = trimmed
        .lines()
        .map(str::trim)
        .filter(|line| {
            let upper = line.to_uppercase();
            clause_starts.iter().any(|kw| upper.starts_with(kw))
        })
        .collect();

    if !lines.is_empty() {
        return lines.join(" ");
    }

    trimmed
        .trim_start_matches("```cypher")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .to_string()
}

/// Replace the contents of string literals so keyword checks only see code
pub fn strip_string_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in query.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                    out.push(c);
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
        }
    }
    out
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Byte offsets of whole-word, case-insensitive occurrences of `keyword`.
///
/// A keyword directly after `.` or `:` is a property, label or relationship
/// type (`n.set`, `(n:Drop)`), not a clause, and is skipped.
pub fn keyword_positions(text: &str, keyword: &str) -> Vec<usize> {
    let len = keyword.len();
    text.char_indices()
        .map(|(i, _)| i)
        .filter(|&i| {
            text.get(i..i + len)
                .map_or(false, |s| s.eq_ignore_ascii_case(keyword))
                && bounded(text, i, len)
        })
        .collect()
}

fn bounded(text: &str, start: usize, len: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text.get(start + len..).and_then(|s| s.chars().next());
    !before.map_or(false, |c| is_word_char(c) || c == '.' || c == ':')
        && !after.map_or(false, is_word_char)
}

pub fn contains_keyword(text: &str, keyword: &str) -> bool {
    !keyword_positions(text, keyword).is_empty()
}

/// Quote a value as a single-quoted query literal
pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Question words and fillers that are capitalized without naming anything
const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "at", "available", "by", "can", "could",
    "do", "does", "each", "every", "find", "for", "from", "get", "give", "how", "i", "in",
    "is", "it", "list", "many", "me", "my", "of", "on", "or", "our", "please", "show",
    "some", "tell", "that", "the", "their", "them", "there", "these", "this", "those", "to",
    "us", "we", "what", "which", "who", "why", "with", "within", "would", "you",
];

/// Prepositions whose lower-case object is treated as a domain term
const TERM_PREPOSITIONS: &[&str] = &["for", "in", "about", "within", "at"];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_lowercase().as_str())
}

/// Word spans: a letter or digit followed by letters, digits, `'`, `-` or `&`
fn words(text: &str) -> Vec<(usize, &str)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        let continues = c.is_alphanumeric() || matches!(c, '\'' | '-' | '&');
        match start {
            None if c.is_alphanumeric() => start = Some(i),
            Some(s) if !continues => {
                spans.push((s, &text[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, &text[s..]));
    }
    spans
        .into_iter()
        .map(|(s, w)| (s, w.trim_end_matches(|c: char| !c.is_alphanumeric())))
        .collect()
}

fn push_term(term: String, terms: &mut Vec<String>) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}

/// End the current run. A run that opens a sentence may start with an
/// ordinary capitalized word ("Describe Retail"), so its tail is kept too.
fn flush(current: &mut Vec<&str>, opens_sentence: bool, terms: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    push_term(current.join(" "), terms);
    if opens_sentence && current.len() > 1 {
        push_term(current[1..].join(" "), terms);
    }
    current.clear();
}

/// Runs of capitalized words that are neither stopwords nor schema vocabulary
/// ("What projects exist for Retail Banking?" → `["Retail Banking"]`)
pub fn capitalized_terms(text: &str, schema: &SchemaDescriptor) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut run_opens_sentence = false;
    let mut last_end = 0;

    for (start, word) in words(text) {
        let gap = &text[last_end..start];
        let sentence_start = last_end == 0 || gap.contains(['.', '?', '!']);
        last_end = start + word.len();

        // Punctuation between words ends a run
        if !gap.chars().all(char::is_whitespace) {
            flush(&mut current, run_opens_sentence, &mut terms);
        }

        let capitalized = word.chars().next().map_or(false, char::is_uppercase);
        if capitalized && !is_stopword(word) && !schema.is_schema_keyword(word) {
            if current.is_empty() {
                run_opens_sentence = sentence_start;
            }
            current.push(word);
        } else {
            flush(&mut current, run_opens_sentence, &mut terms);
        }
    }
    flush(&mut current, run_opens_sentence, &mut terms);
    terms
}

/// Capitalized terms plus the lower-case object of a trailing preposition
/// ("projects available for retail" → `["retail"]`)
pub fn candidate_terms(text: &str, schema: &SchemaDescriptor) -> Vec<String> {
    let mut terms = capitalized_terms(text, schema);
    let words: Vec<&str> = words(text).into_iter().map(|(_, w)| w).collect();

    for pair in words.windows(2) {
        let (prep, object) = (pair[0], pair[1]);
        if !TERM_PREPOSITIONS.contains(&prep.to_lowercase().as_str()) {
            continue;
        }
        let lower_initial = object.chars().next().map_or(false, char::is_lowercase);
        if lower_initial
            && object.len() > 2
            && !is_stopword(object)
            && !schema.is_schema_keyword(object)
            && !terms.iter().any(|t| t.eq_ignore_ascii_case(object))
        {
            terms.push(object.to_string());
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_variants() {
        let plain = extract_json(r#"{"query": "MATCH (n) RETURN n"}"#).unwrap();
        assert_eq!(plain["query"], "MATCH (n) RETURN n");

        let fenced = extract_json("Here you go:\n```json\n{\"a\": {\"b\": \"}\"}}\n```\nDone").unwrap();
        assert_eq!(fenced["a"]["b"], "}");

        let second = extract_json("{not json} then {\"ok\": true}").unwrap();
        assert_eq!(second["ok"], true);

        assert!(extract_json("no braces here").is_none());
        assert!(extract_json("[1, 2]").is_none());
    }

    #[test]
    fn test_extract_cypher() {
        assert_eq!(
            extract_cypher("```cypher\nMATCH (n) RETURN n\n```"),
            "MATCH (n) RETURN n"
        );
        assert_eq!(
            extract_cypher("Sure! Here it is:\nMATCH (n:Industry)\nRETURN n\nHope that helps"),
            "MATCH (n:Industry) RETURN n"
        );
    }

    #[test]
    fn test_strip_literals_and_keywords() {
        let stripped = strip_string_literals("MATCH (n {name: 'Set DELETE'}) RETURN n");
        assert_eq!(stripped, "MATCH (n {name: ''}) RETURN n");
        assert!(!contains_keyword(&stripped, "DELETE"));
        assert!(contains_keyword("match (n) return n", "RETURN"));
        assert!(!contains_keyword("MATCH (n) RETURN n.settings", "SET"));
        assert!(!contains_keyword("MATCH (n:Offset) RETURN n", "SET"));
        assert_eq!(keyword_positions("RETURN a RETURN b", "return"), vec![0, 9]);
        assert!(!contains_keyword("MATCH (n) RETURN n.set", "SET"));
        assert!(!contains_keyword("MATCH (n:Drop) RETURN n", "DROP"));
        assert!(!contains_keyword("MATCH (a)-[:CREATE]->(b) RETURN a", "CREATE"));
    }

    #[test]
    fn test_keywords_after_non_ascii_text() {
        // 'ß' upper-cases to "SS" with the same byte length
        assert!(!contains_keyword("MATCH (n) RETURN n.ßet", "SET"));
        assert!(!contains_keyword("MATCH (n) RETURN n.ßkip", "SKIP"));
        assert_eq!(keyword_positions("MATCH (s) WHERE s.name = 'Straße' RETURN s", "RETURN"), vec![35]);
        assert_eq!(keyword_positions("ßß return x", "RETURN"), vec![5]);
    }

    #[test]
    fn test_escape_literal() {
        assert_eq!(escape_literal("O'Brien"), r"'O\'Brien'");
        assert_eq!(escape_literal(r"a\b"), r"'a\\b'");
    }

    #[test]
    fn test_capitalized_terms() {
        let schema = SchemaDescriptor::default_registry();
        assert_eq!(
            capitalized_terms("What projects exist for Retail Banking?", &schema),
            vec!["Retail Banking"]
        );
        assert!(capitalized_terms("Show me all Industries", &schema).is_empty());
        assert_eq!(
            capitalized_terms("Compare Banking, Insurance and Healthcare", &schema),
            vec!["Compare Banking", "Banking", "Insurance", "Healthcare"]
        );
        assert_eq!(
            capitalized_terms("Describe Retail pain points", &schema),
            vec!["Describe Retail", "Retail"]
        );
        assert_eq!(
            capitalized_terms("Show sectors. Describe Retail Banking", &schema),
            vec!["Describe Retail Banking", "Retail Banking"]
        );
        // mid-sentence runs are kept whole
        assert_eq!(
            capitalized_terms("Which pain points does Retail Banking have?", &schema),
            vec!["Retail Banking"]
        );
    }

    #[test]
    fn test_candidate_terms_include_prepositional_objects() {
        let schema = SchemaDescriptor::default_registry();
        assert_eq!(
            candidate_terms("What projects are available for retail?", &schema),
            vec!["retail"]
        );
        assert!(candidate_terms("Show me all industries", &schema).is_empty());
        assert!(candidate_terms("pain points in sectors", &schema).is_empty());
    }
}
