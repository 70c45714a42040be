//! Schema Registry
//!
//! Static catalogue of entity types, relationship types and their allowed
//! endpoints. Built once at start-up and shared read-only (behind an `Arc`)
//! by every request: it feeds prompt construction, the fallback keyword
//! classifier, term diagnosis and mutation-plan annotation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One node label known to the schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityType {
    pub name: String,
    /// Properties every node of this type carries
    pub required_properties: Vec<String>,
    /// Property shown as the node caption (`name` or `title`)
    pub display_property: String,
    pub description: String,
    /// Lower-case word stems that refer to this type in free text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl EntityType {
    pub fn new(name: &str, display_property: &str, description: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            required_properties: vec![display_property.to_string()],
            display_property: display_property.to_string(),
            description: description.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    /// Whether a lower-case word refers to this type
    fn matches_word(&self, word: &str) -> bool {
        word == self.name.to_lowercase() || self.keywords.iter().any(|k| word.starts_with(k.as_str()))
    }
}

/// Allowed (from)-[type]->(to) triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipEndpoint {
    pub from: String,
    pub relationship_type: String,
    pub to: String,
}

/// Immutable schema catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    pub entity_types: Vec<EntityType>,
    pub relationship_types: Vec<String>,
    pub relationship_endpoints: Vec<RelationshipEndpoint>,
}

/// Words that mark a relationship-oriented question
const RELATIONSHIP_STEMS: &[&str] = &["relationship", "connection", "connected", "link"];

impl SchemaDescriptor {
    /// Build a descriptor; relationship types are derived from the endpoints
    pub fn new(entity_types: Vec<EntityType>, endpoints: &[(&str, &str, &str)]) -> Self {
        let relationship_endpoints: Vec<RelationshipEndpoint> = endpoints
            .iter()
            .map(|(from, rel, to)| RelationshipEndpoint {
                from: from.to_string(),
                relationship_type: rel.to_string(),
                to: to.to_string(),
            })
            .collect();

        let mut seen = BTreeSet::new();
        let relationship_types = relationship_endpoints
            .iter()
            .filter(|e| seen.insert(e.relationship_type.clone()))
            .map(|e| e.relationship_type.clone())
            .collect();

        Self {
            entity_types,
            relationship_types,
            relationship_endpoints,
        }
    }

    /// The industry / sector / department / pain point / opportunity / role catalogue
    pub fn default_registry() -> Self {
        Self::new(
            vec![
                EntityType::new("Industry", "name", "A top-level industry", &["industr"]),
                EntityType::new("Sector", "name", "A sector within an industry", &["sector"]),
                EntityType::new(
                    "Department",
                    "name",
                    "An organisational department",
                    &["department"],
                ),
                EntityType::new(
                    "PainPoint",
                    "name",
                    "A problem experienced by a sector or department",
                    &["pain", "problem", "challenge"],
                ),
                EntityType::new(
                    "ProjectOpportunity",
                    "title",
                    "A project that addresses one or more pain points",
                    &["project", "opportunit"],
                ),
                EntityType::new("Role", "name", "A role required to deliver a project", &["role"]),
            ],
            &[
                ("Industry", "HAS_SECTOR", "Sector"),
                ("Sector", "EXPERIENCES", "PainPoint"),
                ("Department", "EXPERIENCES", "PainPoint"),
                ("ProjectOpportunity", "ADDRESSES", "PainPoint"),
                ("Sector", "HAS_OPPORTUNITY", "ProjectOpportunity"),
                ("Department", "HAS_OPPORTUNITY", "ProjectOpportunity"),
                ("ProjectOpportunity", "REQUIRES_ROLE", "Role"),
            ],
        )
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.iter().find(|t| t.name == name)
    }

    pub fn has_entity_type(&self, name: &str) -> bool {
        self.entity_type(name).is_some()
    }

    pub fn has_relationship_type(&self, name: &str) -> bool {
        self.relationship_types.iter().any(|r| r == name)
    }

    pub fn entity_type_names(&self) -> Vec<&str> {
        self.entity_types.iter().map(|t| t.name.as_str()).collect()
    }

    /// Caption property for a label; unknown labels fall back to `name`
    pub fn display_property(&self, label: &str) -> &str {
        self.entity_type(label)
            .map(|t| t.display_property.as_str())
            .unwrap_or("name")
    }

    /// First entity type a free-text word refers to (case-insensitive)
    pub fn entity_type_for_word(&self, word: &str) -> Option<&EntityType> {
        let word = word.to_lowercase();
        self.entity_types.iter().find(|t| t.matches_word(&word))
    }

    /// Whether a word is schema vocabulary rather than a domain term
    pub fn is_schema_keyword(&self, word: &str) -> bool {
        let lower = word.to_lowercase();
        self.entity_type_for_word(&lower).is_some()
            || RELATIONSHIP_STEMS.iter().any(|s| lower.starts_with(s))
            || self
                .relationship_types
                .iter()
                .any(|r| r.eq_ignore_ascii_case(word))
    }

    /// Whether a word asks about relationships in general
    pub fn is_relationship_word(word: &str) -> bool {
        let lower = word.to_lowercase();
        RELATIONSHIP_STEMS.iter().any(|s| lower.starts_with(s))
    }

    /// The entity types a proper-noun term most plausibly names, best first.
    ///
    /// Terms containing a type's keyword go to that type; everything else is
    /// checked against the organisational types, which is where free-standing
    /// names (e.g. "Retail", "Finance") live.
    pub fn likely_types_for_term(&self, term: &str) -> Vec<&str> {
        let mut types: Vec<&str> = Vec::new();
        for word in term.split_whitespace() {
            if let Some(t) = self.entity_type_for_word(word) {
                if !types.contains(&t.name.as_str()) {
                    types.push(&t.name);
                }
            }
        }
        if types.is_empty() {
            types = ["Industry", "Sector", "Department"]
                .into_iter()
                .filter(|name| self.has_entity_type(name))
                .collect();
            if types.is_empty() {
                types = self.entity_type_names().into_iter().take(3).collect();
            }
        }
        types.truncate(3);
        types
    }

    /// Schema entity types mentioned as labels (`:Type`) in a query
    pub fn labels_in_query(&self, query: &str) -> Vec<String> {
        let mut found = Vec::new();
        for entity in &self.entity_types {
            let needle = format!(":{}", entity.name);
            let mentioned = query.match_indices(&needle).any(|(idx, _)| {
                query[idx + needle.len()..]
                    .chars()
                    .next()
                    .map_or(true, |c| !(c.is_alphanumeric() || c == '_'))
            });
            if mentioned {
                found.push(entity.name.clone());
            }
        }
        found
    }

    /// Render the schema for inclusion in an LLM prompt
    pub fn to_prompt(&self) -> String {
        let mut out = String::from("Node labels:\n");
        for t in &self.entity_types {
            out.push_str(&format!(
                "- {} (properties: {}; display property: {}) - {}\n",
                t.name,
                t.required_properties.join(", "),
                t.display_property,
                t.description
            ));
        }
        out.push_str("Relationships:\n");
        for e in &self.relationship_endpoints {
            out.push_str(&format!(
                "- (:{})-[:{}]->(:{})\n",
                e.from, e.relationship_type, e.to
            ));
        }
        out
    }
}

impl Default for SchemaDescriptor {
    fn default() -> Self {
        Self::default_registry()
    }
}
