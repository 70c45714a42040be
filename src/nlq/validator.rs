//! Query Validator
//!
//! Static checks over candidate query text. Deliberately minimal: anything
//! these rules let through and the engine still rejects is caught by the
//! execution-time fallback, while a false rejection would throw away a
//! working query.

use super::extract::{contains_keyword, keyword_positions, strip_string_literals};
use super::types::{CandidateQuery, ValidationResult};

/// Clauses that modify the graph
const WRITE_KEYWORDS: &[&str] = &["CREATE", "MERGE", "SET", "DELETE", "REMOVE", "DROP"];

/// Clauses that end a projection
const PROJECTION_TERMINATORS: &[&str] = &["ORDER", "SKIP", "LIMIT"];

/// Validate a candidate query
pub fn validate(candidate: &CandidateQuery) -> ValidationResult {
    validate_text(candidate.text())
}

pub fn validate_text(query: &str) -> ValidationResult {
    let query = query.trim();
    if query.is_empty() {
        return ValidationResult::from_errors(vec!["Query is empty".to_string()]);
    }

    let code = strip_string_literals(query);
    let mut errors = Vec::new();

    if !contains_keyword(&code, "MATCH") {
        errors.push("Query has no MATCH clause".to_string());
    }

    match return_projection(&code) {
        None => errors.push("Query has no RETURN clause".to_string()),
        Some(projection) => {
            if projects_relationship_pattern(projection) {
                errors.push(
                    "RETURN references a relationship pattern instead of a bound variable"
                        .to_string(),
                );
            }
            if mixes_wildcard_and_properties(projection) {
                errors.push("RETURN mixes a wildcard with named properties".to_string());
            }
        }
    }

    ValidationResult::from_errors(errors)
}

/// Write clauses present in the query, outside string literals
pub fn write_keywords(query: &str) -> Vec<&'static str> {
    let code = strip_string_literals(query);
    WRITE_KEYWORDS
        .iter()
        .copied()
        .filter(|kw| contains_keyword(&code, kw))
        .collect()
}

/// True when the query contains no write clause
pub fn is_read_only(query: &str) -> bool {
    write_keywords(query).is_empty()
}

/// Text of the last RETURN clause, up to ORDER BY / SKIP / LIMIT
fn return_projection(code: &str) -> Option<&str> {
    let start = *keyword_positions(code, "RETURN").last()? + "RETURN".len();
    let rest = &code[start..];
    let end = PROJECTION_TERMINATORS
        .iter()
        .filter_map(|kw| keyword_positions(rest, kw).first().copied())
        .min()
        .unwrap_or(rest.len());
    Some(rest[..end].trim())
}

fn projects_relationship_pattern(projection: &str) -> bool {
    ["-[", "]-", "->", "<-", ")--", ")-("]
        .iter()
        .any(|shape| projection.contains(shape))
}

fn mixes_wildcard_and_properties(projection: &str) -> bool {
    let projection = projection
        .strip_prefix("DISTINCT")
        .or_else(|| projection.strip_prefix("distinct"))
        .unwrap_or(projection);

    let items = split_top_level(projection);
    let wildcard = items.iter().any(|item| {
        let expr = strip_alias(item);
        expr == "*" || expr.ends_with(".*")
    });
    let named = items.iter().any(|item| is_property_access(strip_alias(item)));
    wildcard && named
}

/// Split on commas that are not nested in brackets
fn split_top_level(text: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                items.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(text[start..].trim());
    items.retain(|item| !item.is_empty());
    items
}

fn strip_alias(item: &str) -> &str {
    match keyword_positions(item, "AS").last() {
        Some(&pos) => item[..pos].trim(),
        None => item.trim(),
    }
}

/// `var.prop`
fn is_property_access(expr: &str) -> bool {
    let Some((var, prop)) = expr.split_once('.') else {
        return false;
    };
    let ident = |s: &str| {
        !s.is_empty()
            && s.chars().all(|c| c.is_alphanumeric() || c == '_')
            && !s.starts_with(|c: char| c.is_ascii_digit())
    };
    ident(var) && ident(prop.trim_matches('`'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors(query: &str) -> Vec<String> {
        validate_text(query).errors
    }

    #[test]
    fn test_accepts_common_shapes() {
        for query in [
            "MATCH (n:Industry) RETURN n LIMIT 50",
            "MATCH (s:Sector)-[r:HAS_OPPORTUNITY]->(p:ProjectOpportunity) WHERE s.name = 'Retail Banking' RETURN s, r, p",
            "MATCH p = (a)-[:HAS_SECTOR]->(b) RETURN p",
            "MATCH (n) RETURN n.name AS name, count(n) AS c ORDER BY c DESC",
            "MATCH (n) RETURN *",
            "match (n) return distinct n.name",
        ] {
            assert!(validate_text(query).valid, "{} should pass", query);
        }
    }

    #[test]
    fn test_missing_clauses() {
        assert_eq!(errors(""), vec!["Query is empty"]);
        assert_eq!(errors("   "), vec!["Query is empty"]);
        assert_eq!(errors("RETURN 1"), vec!["Query has no MATCH clause"]);
        assert_eq!(errors("MATCH (n:Industry)"), vec!["Query has no RETURN clause"]);
        // keywords inside literals do not count
        assert!(!validate_text("MATCH (n {name: 'RETURN'})").valid);
        assert!(!validate_text("CREATE (n {note: 'MATCH'}) RETURN n").valid);
    }

    #[test]
    fn test_relationship_pattern_in_projection() {
        assert!(!validate_text("MATCH (a)-[r]->(b) RETURN (a)-[r]->(b)").valid);
        assert!(!validate_text("MATCH (a)--(b) RETURN a, (a)--(b)").valid);
        assert!(validate_text("MATCH (a)-[r]->(b) RETURN a, r, b").valid);
    }

    #[test]
    fn test_wildcard_mixed_with_properties() {
        assert!(!validate_text("MATCH (n) RETURN n.*, n.name").valid);
        assert!(!validate_text("MATCH (n) RETURN *, n.name AS name").valid);
        assert!(validate_text("MATCH (n) RETURN n, n.name").valid);
    }

    #[test]
    fn test_read_only_gate() {
        assert!(is_read_only("MATCH (n) WHERE n.name = 'DELETE me' RETURN n"));
        assert!(is_read_only("MATCH (n) RETURN n.settings"));
        assert_eq!(write_keywords("MATCH (n:Role) DETACH DELETE n"), vec!["DELETE"]);
        assert_eq!(
            write_keywords("MATCH (n) SET n.x = 1 RETURN n"),
            vec!["SET"]
        );
        assert!(!is_read_only("merge (n:Role {name: 'X'})"));
    }

    #[test]
    fn test_property_and_label_names_are_not_clauses() {
        assert!(is_read_only("MATCH (n) RETURN n.set"));
        assert!(is_read_only("MATCH (n) RETURN n.create, n.remove"));
        assert!(is_read_only("MATCH (n:Drop) RETURN n"));
        assert!(is_read_only("MATCH (n)-[:MERGE]->(m) RETURN n, m"));
        assert!(!is_read_only("MATCH (n) SET n.set = 1"));
    }

    #[test]
    fn test_non_ascii_identifiers() {
        assert!(is_read_only("MATCH (n) RETURN n.ßet"));
        assert!(validate_text("MATCH (n) RETURN n.ßkip").valid);
        assert!(validate_text("MATCH (n:Straße) RETURN n ORDER BY n.größe LIMIT 5").valid);
    }
}
