//! Abstract syntax tree for the embedded pattern-query language

use crate::graph::{EdgeType, Label, PropertyValue};

/// Complete query representation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// MATCH clauses, each with its own optional WHERE
    pub match_clauses: Vec<MatchClause>,
    /// CREATE / SET / DELETE clauses, applied in order
    pub update_clauses: Vec<UpdateClause>,
    /// RETURN clause with ordering and paging (optional for writes)
    pub return_clause: Option<ReturnClause>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the query only reads from the graph
    pub fn is_read_only(&self) -> bool {
        self.update_clauses.is_empty()
    }
}

/// MATCH clause: MATCH (n:Industry)-[:HAS_SECTOR]->(s) WHERE ...
#[derive(Debug, Clone, PartialEq)]
pub struct MatchClause {
    /// Pattern to match
    pub pattern: Pattern,
    /// Filter applied after the pattern is bound
    pub predicate: Option<Expression>,
}

/// Graph pattern: one or more comma-separated paths
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub paths: Vec<PathPattern>,
}

/// Path pattern: p = (a:Sector)-[:EXPERIENCES]->(b:PainPoint)
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    /// Path variable (e.g., "p")
    pub variable: Option<String>,
    /// Start node
    pub start: NodePattern,
    /// Edges and nodes
    pub segments: Vec<PathSegment>,
}

/// Segment of a path (edge + node)
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub edge: EdgePattern,
    pub node: NodePattern,
}

/// Node pattern: (n:Industry {name: "Banking"})
#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<Label>,
    /// Inline property constraints (values may be parameters)
    pub properties: Vec<(String, Expression)>,
}

/// Edge pattern: -[r:ADDRESSES|RELATES_TO]->
#[derive(Debug, Clone, PartialEq)]
pub struct EdgePattern {
    pub variable: Option<String>,
    /// Accepted edge types; empty means any type
    pub types: Vec<EdgeType>,
    pub direction: Direction,
    pub properties: Vec<(String, Expression)>,
}

/// Edge direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Outgoing: ->
    Outgoing,
    /// Incoming: <-
    Incoming,
    /// Both: -
    Both,
}

/// Write clause
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateClause {
    /// CREATE pattern; bound variables are reused, unbound ones are created
    Create(Pattern),
    /// SET var.prop = expr, ...
    Set(Vec<SetItem>),
    /// [DETACH] DELETE var, ...
    Delete { detach: bool, variables: Vec<String> },
}

/// SET item: n.priority = "High"
#[derive(Debug, Clone, PartialEq)]
pub struct SetItem {
    pub variable: String,
    pub property: String,
    pub value: Expression,
}

/// RETURN clause with the trailing ORDER BY / SKIP / LIMIT
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReturnClause {
    pub distinct: bool,
    pub items: Vec<ReturnItem>,
    pub order_by: Vec<OrderItem>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

/// RETURN item: expression [AS alias]
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub expression: Expression,
    pub alias: Option<String>,
    /// Source text of the expression, used as the column name without alias
    pub text: String,
}

impl ReturnItem {
    /// Column name as reported in results
    pub fn column_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.text)
    }
}

/// ORDER BY item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expression: Expression,
    pub ascending: bool,
}

/// Expression in WHERE, RETURN, SET or inline property maps
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Property access: n.name
    Property { variable: String, property: String },
    /// Bound variable: n
    Variable(String),
    /// Literal value
    Literal(PropertyValue),
    /// Query parameter: $term
    Parameter(String),
    /// List literal: ["a", "b"]
    List(Vec<Expression>),
    /// Function call: toLower(n.name)
    Function { name: String, args: Vec<Expression> },
    /// Binary operation
    Binary {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
    },
    /// NOT expr
    Not(Box<Expression>),
    /// expr IS [NOT] NULL
    IsNull { expr: Box<Expression>, negated: bool },
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
    /// `=~`, whole-string regular expression match
    RegexMatch,
    In,
    And,
    Or,
}
