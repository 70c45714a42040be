//! Mutation Plan workflow
//!
//! `PROPOSED -> CONFIRMED | CANCELLED`. A [`ProposedMutation`] is consumed
//! by either transition, so one value can execute at most once; the
//! [`PlanLedger`] extends that guarantee to plans that come back over the
//! wire as JSON.

use super::extract::{contains_keyword, keyword_positions, strip_string_literals};
use super::types::{CandidateQuery, MutationPlan, RiskLevel};
use crate::gateway::{GatewayResult, QueryRows, StoreHandle};
use crate::schema::SchemaDescriptor;
use chrono::Utc;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Clauses that start the write part of a query
const WRITE_CLAUSES: &[&str] = &["CREATE", "MERGE", "SET", "DELETE", "DETACH", "REMOVE", "FOREACH"];

/// Properties that single out one entity
const IDENTITY_PROPERTIES: &[&str] = &["name", "title", "id"];

/// Heuristic risk of a graph-modifying query.
///
/// Deletes are HIGH. Writes that follow a MATCH on some node without an
/// identity filter, multi-node creates and iterated writes are MEDIUM.
/// Anything else is LOW.
pub fn classify_risk(query: &str) -> RiskLevel {
    let code = strip_string_literals(query);

    if ["DELETE", "DETACH", "DROP"]
        .iter()
        .any(|kw| contains_keyword(&code, kw))
    {
        return RiskLevel::High;
    }

    if ["UNWIND", "FOREACH"].iter().any(|kw| contains_keyword(&code, kw)) {
        return RiskLevel::Medium;
    }

    if matches_unfiltered_nodes(read_section(&code)) {
        return RiskLevel::Medium;
    }

    if created_node_count(&code) > 1 {
        return RiskLevel::Medium;
    }

    RiskLevel::Low
}

/// Query text before the first write clause
fn read_section(code: &str) -> &str {
    let end = WRITE_CLAUSES
        .iter()
        .filter_map(|kw| keyword_positions(code, kw).first().copied())
        .min()
        .unwrap_or(code.len());
    &code[..end]
}

/// True when some named node pattern in `section` is neither filtered
/// inline (`{name: ...}`) nor by an identity predicate in WHERE
fn matches_unfiltered_nodes(section: &str) -> bool {
    let text = squeeze(section);
    node_patterns(&text)
        .into_iter()
        .any(|(var, body)| !has_inline_identity(body) && !has_identity_predicate(&text, var))
}

/// Lower-cased text with whitespace kept only between two identifier
/// characters (`n.name = 'x'` → `n.name=''`, `where n` stays apart)
fn squeeze(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && is_ident_char(c) && out.chars().next_back().map_or(false, is_ident_char) {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out
}

/// `(var:Label {...})` patterns as (variable, text after the variable)
fn node_patterns(text: &str) -> Vec<(&str, &str)> {
    let mut patterns = Vec::new();
    for (i, _) in text.match_indices('(') {
        // `count(`, `elementid(` and friends are calls, not patterns
        let word = text[..i]
            .rsplit(|c: char| !is_ident_char(c))
            .next()
            .unwrap_or("");
        if !word.is_empty() && word != "match" {
            continue;
        }
        let rest = &text[i + 1..];
        let var_len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        let (var, after) = rest.split_at(var_len);
        if var.is_empty() || !after.starts_with([':', '{', ')']) {
            continue;
        }
        let body = &after[..after.find(')').unwrap_or(after.len())];
        patterns.push((var, body));
    }
    patterns
}

fn has_inline_identity(body: &str) -> bool {
    IDENTITY_PROPERTIES.iter().any(|prop| {
        body.contains(&format!("{{{}:", prop)) || body.contains(&format!(",{}:", prop))
    })
}

fn has_identity_predicate(text: &str, var: &str) -> bool {
    let mut needles: Vec<String> = IDENTITY_PROPERTIES
        .iter()
        .map(|prop| format!("{}.{}=", var, prop))
        .collect();
    needles.push(format!("elementid({})=", var));
    needles.push(format!("id({})=", var));

    needles.iter().any(|needle| {
        text.match_indices(needle.as_str()).any(|(i, _)| {
            let standalone = !text[..i].chars().next_back().map_or(false, is_ident_char);
            // `=~` is a pattern match, not equality
            let regex = text[i + needle.len()..].starts_with('~');
            standalone && !regex
        })
    })
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Labelled node patterns inside CREATE / MERGE clauses
fn created_node_count(code: &str) -> usize {
    let mut starts: Vec<usize> = ["CREATE", "MERGE"]
        .iter()
        .flat_map(|kw| keyword_positions(code, kw))
        .collect();
    starts.sort_unstable();

    let clause_ends = ["MATCH", "WITH", "RETURN", "SET", "WHERE"];
    starts
        .iter()
        .map(|&start| {
            let body = &code[start..];
            let end = clause_ends
                .iter()
                .filter_map(|kw| keyword_positions(body, kw).first().copied())
                .min()
                .unwrap_or(body.len());
            count_labelled_nodes(&body[..end])
        })
        .sum()
}

fn count_labelled_nodes(pattern: &str) -> usize {
    pattern
        .match_indices('(')
        .filter(|(i, _)| {
            let inner = &pattern[i + 1..];
            let head: String = inner
                .chars()
                .take_while(|c| *c != ')' && *c != '{')
                .collect();
            head.contains(':')
        })
        .count()
}

/// Wrap a synthesized write query in a plan awaiting confirmation
pub fn build_plan(candidate: &CandidateQuery, schema: &SchemaDescriptor, graph_version: &str) -> MutationPlan {
    MutationPlan {
        id: Uuid::new_v4(),
        query: candidate.text().to_string(),
        explanation: candidate.explanation().to_string(),
        risk_level: classify_risk(candidate.text()),
        affected_entity_types: schema.labels_in_query(candidate.text()),
        graph_version: graph_version.to_string(),
        proposed_at: Utc::now(),
    }
}

/// A plan in the PROPOSED state
#[derive(Debug)]
pub struct ProposedMutation {
    plan: MutationPlan,
}

/// Result of the CONFIRMED transition
#[derive(Debug)]
pub struct ExecutedMutation {
    pub plan: MutationPlan,
    pub rows: QueryRows,
}

impl ProposedMutation {
    /// Re-enter PROPOSED from a client-held plan; the risk is recomputed
    /// from the query text rather than trusted.
    pub fn from_plan(mut plan: MutationPlan) -> Self {
        plan.risk_level = classify_risk(&plan.query);
        Self { plan }
    }

    pub fn plan(&self) -> &MutationPlan {
        &self.plan
    }

    /// Execute exactly once
    pub async fn confirm(self, handle: &dyn StoreHandle) -> GatewayResult<ExecutedMutation> {
        info!(
            plan = %self.plan.id,
            risk = %self.plan.risk_level,
            version = %self.plan.graph_version,
            "executing confirmed mutation"
        );
        let rows = handle.execute_write(&self.plan.query).await?;
        Ok(ExecutedMutation {
            plan: self.plan,
            rows,
        })
    }

    /// Discard without executing
    pub fn cancel(self) -> MutationPlan {
        info!(plan = %self.plan.id, "mutation cancelled");
        self.plan
    }
}

/// Ids of plans already confirmed or cancelled.
///
/// Bounded: the oldest ids are forgotten once `capacity` is reached.
pub struct PlanLedger {
    inner: Mutex<LedgerInner>,
    capacity: usize,
}

#[derive(Default)]
struct LedgerInner {
    order: VecDeque<Uuid>,
    consumed: HashSet<Uuid>,
}

impl PlanLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LedgerInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Mark a plan consumed; false when it already was
    pub fn consume(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.consumed.insert(id) {
            return false;
        }
        inner.order.push_back(id);
        while inner.order.len() > self.capacity {
            if let Some(old) = inner.order.pop_front() {
                inner.consumed.remove(&old);
            }
        }
        true
    }

    /// Give a plan id back, e.g. when its execution could not start
    pub fn release(&self, id: Uuid) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.consumed.remove(&id) {
            inner.order.retain(|other| *other != id);
        }
    }

    pub fn is_consumed(&self, id: Uuid) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.consumed.contains(&id)
    }
}

impl Default for PlanLedger {
    fn default() -> Self {
        Self::new(10_000)
    }
}
