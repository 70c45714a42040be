//! Entity Resolver
//!
//! Looks a free-text term up among the nodes of a few candidate entity
//! types, trying progressively looser matches and stopping at the first
//! tier that finds anything.

use crate::gateway::{GatewayResult, MatchMode, RawNode, StoreHandle};
use crate::schema::SchemaDescriptor;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Row cap for every tier query
pub const TIER_LIMIT: usize = 10;

/// Which lookup produced the matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    /// Case-sensitive equality with the display property
    Exact,
    /// Case-sensitive substring
    Partial,
    /// Case-insensitive substring
    Fuzzy,
    /// Nothing matched; the matches are a sample of what exists
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMatch {
    pub name: String,
    pub entity_type: String,
    pub element_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub term: String,
    pub exact: bool,
    pub tier: MatchTier,
    pub matches: Vec<EntityMatch>,
}

impl Resolution {
    /// Near matches worth offering back to the user; empty on an exact hit
    pub fn suggestions(&self) -> Vec<&EntityMatch> {
        if self.exact {
            Vec::new()
        } else {
            self.matches.iter().collect()
        }
    }

    /// `"Retail Banking" (Sector)` style rendering of the suggestions
    pub fn describe_suggestions(&self) -> Vec<String> {
        self.suggestions()
            .into_iter()
            .map(|m| format!("'{}' ({})", m.name, m.entity_type))
            .collect()
    }
}

/// Read-only term lookup against one store handle
pub struct EntityResolver<'a> {
    schema: &'a SchemaDescriptor,
    handle: &'a dyn StoreHandle,
}

impl<'a> EntityResolver<'a> {
    pub fn new(schema: &'a SchemaDescriptor, handle: &'a dyn StoreHandle) -> Self {
        Self { schema, handle }
    }

    /// Resolve `term` against `candidate_types`, tier by tier.
    ///
    /// Each tier is tried across all candidate types before moving to the
    /// next one, so an exact `Sector` hit beats a fuzzy `Industry` hit.
    /// Types unknown to the schema are ignored.
    pub async fn resolve(&self, term: &str, candidate_types: &[&str]) -> GatewayResult<Resolution> {
        let types: Vec<&str> = candidate_types
            .iter()
            .copied()
            .filter(|t| self.schema.has_entity_type(t))
            .collect();

        let term = term.trim();
        let tiers = [
            (MatchTier::Exact, MatchMode::Exact),
            (MatchTier::Partial, MatchMode::Contains),
            (MatchTier::Fuzzy, MatchMode::CaseInsensitive),
        ];

        if !term.is_empty() {
            for (tier, mode) in tiers {
                let mut matches = Vec::new();
                for label in &types {
                    let property = self.schema.display_property(label);
                    let nodes = self
                        .handle
                        .find_by_property(label, property, term, mode, TIER_LIMIT)
                        .await?;
                    self.collect(label, nodes, &mut matches);
                }
                if !matches.is_empty() {
                    matches.truncate(TIER_LIMIT);
                    debug!(term, ?tier, count = matches.len(), "term resolved");
                    return Ok(Resolution {
                        term: term.to_string(),
                        exact: tier == MatchTier::Exact,
                        tier,
                        matches,
                    });
                }
            }
        }

        let mut matches = Vec::new();
        for label in &types {
            if matches.len() >= TIER_LIMIT {
                break;
            }
            let nodes = self
                .handle
                .sample(label, TIER_LIMIT - matches.len())
                .await?;
            self.collect(label, nodes, &mut matches);
        }
        matches.truncate(TIER_LIMIT);
        debug!(term, count = matches.len(), "term unresolved, sampled existing entities");

        Ok(Resolution {
            term: term.to_string(),
            exact: false,
            tier: MatchTier::None,
            matches,
        })
    }

    fn collect(&self, label: &str, nodes: Vec<RawNode>, out: &mut Vec<EntityMatch>) {
        let property = self.schema.display_property(label);
        for node in nodes {
            if out.iter().any(|m| m.element_id == node.element_id) {
                continue;
            }
            let name = node
                .property_str(property)
                .map(str::to_string)
                .unwrap_or_else(|| node.element_id.clone());
            out.push(EntityMatch {
                name,
                entity_type: label.to_string(),
                element_id: node.element_id,
            });
        }
    }
}
