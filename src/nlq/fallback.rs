//! Fallback Synthesizer
//!
//! Keyword-driven queries used whenever the model's query is unusable.
//! Every query produced here passes the validator; the resolution-assisted
//! variant only adds explanation text (or targets an exact hit) and never
//! fails.

use super::extract::{candidate_terms, escape_literal};
use super::resolver::EntityResolver;
use super::types::{CandidateQuery, QueryContext};
use crate::gateway::{quote_identifier, StoreHandle};
use crate::schema::SchemaDescriptor;
use tracing::{debug, warn};

pub const CATEGORY_LIMIT: usize = 50;
pub const DEFAULT_LIMIT: usize = 25;

/// What kind of listing the request asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackCategory {
    Relationships,
    EntityType(String),
    Everything,
}

pub struct FallbackSynthesizer<'a> {
    schema: &'a SchemaDescriptor,
}

impl<'a> FallbackSynthesizer<'a> {
    pub fn new(schema: &'a SchemaDescriptor) -> Self {
        Self { schema }
    }

    /// Relationship words win over entity words; the UI context is used
    /// only when the text names nothing.
    pub fn classify(&self, text: &str, context: Option<&QueryContext>) -> FallbackCategory {
        let words: Vec<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.iter().any(|w| SchemaDescriptor::is_relationship_word(w)) {
            return FallbackCategory::Relationships;
        }
        if let Some(entity) = words.iter().find_map(|w| self.schema.entity_type_for_word(w)) {
            return FallbackCategory::EntityType(entity.name.clone());
        }
        context
            .and_then(|c| c.current_entity_type.as_deref())
            .filter(|t| self.schema.has_entity_type(t))
            .map(|t| FallbackCategory::EntityType(t.to_string()))
            .unwrap_or(FallbackCategory::Everything)
    }

    /// Deterministic query for the request; no I/O
    pub fn synthesize(&self, text: &str, context: Option<&QueryContext>) -> CandidateQuery {
        self.category_query(&self.classify(text, context))
    }

    /// Like [`synthesize`](Self::synthesize), but resolves proper-noun terms
    /// first when the request is about one entity type.
    ///
    /// An exact hit narrows the query to that entity's neighbourhood; near
    /// matches are listed in the explanation while the query keeps returning
    /// the whole category.
    pub async fn synthesize_with_resolution(
        &self,
        text: &str,
        context: Option<&QueryContext>,
        handle: &dyn StoreHandle,
    ) -> CandidateQuery {
        let category = self.classify(text, context);
        let listing = self.category_query(&category);
        if !matches!(category, FallbackCategory::EntityType(_)) {
            return listing;
        }

        let terms = candidate_terms(text, self.schema);
        if terms.is_empty() {
            return listing;
        }

        let resolver = EntityResolver::new(self.schema, handle);
        let mut suggestions: Vec<String> = Vec::new();
        for term in terms.iter().take(3) {
            let types = self.schema.likely_types_for_term(term);
            let resolution = match resolver.resolve(term, &types).await {
                Ok(resolution) => resolution,
                Err(e) => {
                    warn!(term = %term, error = %e, "fallback term resolution failed");
                    continue;
                }
            };

            if let Some(hit) = resolution.matches.first().filter(|_| resolution.exact) {
                if let Some(candidate) = self.neighbourhood_query(&hit.entity_type, &hit.name) {
                    debug!(term = %term, entity_type = %hit.entity_type, "fallback targets exact match");
                    return candidate;
                }
            } else {
                for suggestion in resolution.describe_suggestions() {
                    if !suggestions.contains(&suggestion) {
                        suggestions.push(suggestion);
                    }
                }
            }
        }

        if suggestions.is_empty() {
            return listing;
        }
        CandidateQuery::new(
            listing.text(),
            format!(
                "{} Did you mean: {}?",
                listing.explanation(),
                suggestions.join(", ")
            ),
        )
    }

    fn category_query(&self, category: &FallbackCategory) -> CandidateQuery {
        match category {
            FallbackCategory::Relationships => CandidateQuery::new(
                format!("MATCH (a)-[r]->(b) RETURN a, r, b LIMIT {}", CATEGORY_LIMIT),
                format!("Showing up to {} relationships.", CATEGORY_LIMIT),
            ),
            FallbackCategory::EntityType(name) => match quote_identifier(name) {
                Ok(label) => CandidateQuery::new(
                    format!("MATCH (n:{}) RETURN n LIMIT {}", label, CATEGORY_LIMIT),
                    format!("Showing up to {} {} entities.", CATEGORY_LIMIT, name),
                ),
                Err(_) => self.category_query(&FallbackCategory::Everything),
            },
            FallbackCategory::Everything => CandidateQuery::new(
                format!("MATCH (n) RETURN n LIMIT {}", DEFAULT_LIMIT),
                format!("Showing up to {} entities from the graph.", DEFAULT_LIMIT),
            ),
        }
    }

    fn neighbourhood_query(&self, entity_type: &str, name: &str) -> Option<CandidateQuery> {
        let label = quote_identifier(entity_type).ok()?;
        let property = quote_identifier(self.schema.display_property(entity_type)).ok()?;
        Some(CandidateQuery::new(
            format!(
                "MATCH (n:{})-[r]-(m) WHERE n.{} = {} RETURN n, r, m LIMIT {}",
                label,
                property,
                escape_literal(name),
                CATEGORY_LIMIT
            ),
            format!("Showing '{}' ({}) and its direct connections.", name, entity_type),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Dataset, EmbeddedGateway, GraphGateway};
    use crate::graph::GraphStore;
    use crate::nlq::validator::validate;

    async fn handle() -> Box<dyn StoreHandle> {
        let mut store = GraphStore::new();
        Dataset::sample().load_into(&mut store).unwrap();
        let gateway = EmbeddedGateway::new(Vec::<String>::new()).with_graph("main", store);
        gateway.resolve_store_handle("main").await.unwrap()
    }

    #[test]
    fn test_classification() {
        let schema = SchemaDescriptor::default_registry();
        let fallback = FallbackSynthesizer::new(&schema);

        assert_eq!(
            fallback.classify("How are sectors connected to pain points?", None),
            FallbackCategory::Relationships
        );
        assert_eq!(
            fallback.classify("Which problems hurt hospitals?", None),
            FallbackCategory::EntityType("PainPoint".to_string())
        );
        assert_eq!(
            fallback.classify("list projects", None),
            FallbackCategory::EntityType("ProjectOpportunity".to_string())
        );

        let context = QueryContext {
            current_entity_type: Some("Role".to_string()),
            ..Default::default()
        };
        assert_eq!(
            fallback.classify("more of these", Some(&context)),
            FallbackCategory::EntityType("Role".to_string())
        );
        assert_eq!(fallback.classify("hello", None), FallbackCategory::Everything);
    }

    #[test]
    fn test_fallback_is_total_and_valid() {
        let schema = SchemaDescriptor::default_registry();
        let fallback = FallbackSynthesizer::new(&schema);
        let bogus_context = QueryContext {
            current_entity_type: Some("Nope".to_string()),
            ..Default::default()
        };

        for text in [
            "",
            "   ",
            "?!",
            "Show me all industries",
            "relationships please",
            "DROP EVERYTHING; MATCH",
            "ünïcödé téxt",
        ] {
            for context in [None, Some(&bogus_context)] {
                let candidate = fallback.synthesize(text, context);
                assert!(!candidate.is_empty());
                assert!(validate(&candidate).valid, "{:?} produced {}", text, candidate.text());
            }
        }
        assert_eq!(fallback.synthesize("", None).text(), "MATCH (n) RETURN n LIMIT 25");
    }

    #[tokio::test]
    async fn test_resolution_suggests_near_matches() {
        let schema = SchemaDescriptor::default_registry();
        let fallback = FallbackSynthesizer::new(&schema);
        let handle = handle().await;

        let candidate = fallback
            .synthesize_with_resolution("What projects are available for retail?", None, handle.as_ref())
            .await;
        assert_eq!(candidate.text(), "MATCH (n:ProjectOpportunity) RETURN n LIMIT 50");
        assert!(candidate.explanation().contains("Did you mean: 'Retail Banking' (Sector)?"));
        handle.close().await;
    }

    #[tokio::test]
    async fn test_resolution_targets_exact_match() {
        let schema = SchemaDescriptor::default_registry();
        let fallback = FallbackSynthesizer::new(&schema);
        let handle = handle().await;

        let candidate = fallback
            .synthesize_with_resolution("Which sectors belong to Banking?", None, handle.as_ref())
            .await;
        assert!(validate(&candidate).valid);
        assert_eq!(
            candidate.text(),
            "MATCH (n:Industry)-[r]-(m) WHERE n.name = 'Banking' RETURN n, r, m LIMIT 50"
        );

        let rows = handle
            .execute(candidate.text(), Default::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        handle.close().await;
    }
}
