//! Pattern-query parser using Pest

use crate::graph::{EdgeType, Label, PropertyValue};
use crate::query::ast::*;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "query/cypher.pest"]
struct CypherParser;

/// Parser errors
#[derive(Error, Debug)]
pub enum ParseError {
    /// Pest parsing error
    #[error("Parse error: {0}")]
    PestError(#[from] Box<pest::error::Error<Rule>>),

    /// Semantic error
    #[error("Semantic error: {0}")]
    SemanticError(String),
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse a query string into an AST
pub fn parse_query(input: &str) -> ParseResult<Query> {
    let pairs = CypherParser::parse(Rule::query, input).map_err(Box::new)?;

    let mut query = Query::new();

    for pair in pairs {
        if pair.as_rule() != Rule::query {
            continue;
        }
        for statement in pair.into_inner() {
            match statement.as_rule() {
                Rule::read_statement | Rule::create_statement => {
                    parse_statement(statement, &mut query)?;
                }
                _ => {}
            }
        }
    }

    Ok(query)
}

fn parse_statement(pair: Pair<Rule>, query: &mut Query) -> ParseResult<()> {
    let mut return_clause: Option<ReturnClause> = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::match_clause => query.match_clauses.push(parse_match_clause(inner)?),
            Rule::create_clause => query
                .update_clauses
                .push(UpdateClause::Create(parse_first_pattern(inner)?)),
            Rule::set_clause => query.update_clauses.push(parse_set_clause(inner)?),
            Rule::delete_clause => query.update_clauses.push(parse_delete_clause(inner)),
            Rule::return_clause => return_clause = Some(parse_return_clause(inner)?),
            Rule::order_clause => {
                if let Some(ret) = return_clause.as_mut() {
                    ret.order_by = parse_order_clause(inner)?;
                }
            }
            Rule::skip_clause => {
                if let Some(ret) = return_clause.as_mut() {
                    ret.skip = Some(parse_count(inner)?);
                }
            }
            Rule::limit_clause => {
                if let Some(ret) = return_clause.as_mut() {
                    ret.limit = Some(parse_count(inner)?);
                }
            }
            _ => {}
        }
    }

    query.return_clause = return_clause;
    Ok(())
}

fn parse_match_clause(pair: Pair<Rule>) -> ParseResult<MatchClause> {
    let mut pattern = None;
    let mut predicate = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::pattern => pattern = Some(parse_pattern(inner)?),
            Rule::where_clause => {
                for expr in inner.into_inner() {
                    if expr.as_rule() == Rule::expression {
                        predicate = Some(parse_expression(expr)?);
                    }
                }
            }
            _ => {}
        }
    }

    Ok(MatchClause {
        pattern: pattern
            .ok_or_else(|| ParseError::SemanticError("MATCH without a pattern".to_string()))?,
        predicate,
    })
}

fn parse_first_pattern(pair: Pair<Rule>) -> ParseResult<Pattern> {
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::pattern {
            return parse_pattern(inner);
        }
    }
    Err(ParseError::SemanticError("Clause without a pattern".to_string()))
}

fn parse_set_clause(pair: Pair<Rule>) -> ParseResult<UpdateClause> {
    let mut items = Vec::new();

    for item in pair.into_inner() {
        if item.as_rule() != Rule::set_item {
            continue;
        }
        let mut variable = None;
        let mut property = None;
        let mut value = None;
        for part in item.into_inner() {
            match part.as_rule() {
                Rule::variable => variable = Some(identifier_text(part.as_str())),
                Rule::property_key => property = Some(identifier_text(part.as_str())),
                Rule::expression => value = Some(parse_expression(part)?),
                _ => {}
            }
        }
        match (variable, property, value) {
            (Some(variable), Some(property), Some(value)) => items.push(SetItem {
                variable,
                property,
                value,
            }),
            _ => return Err(ParseError::SemanticError("Incomplete SET item".to_string())),
        }
    }

    Ok(UpdateClause::Set(items))
}

fn parse_delete_clause(pair: Pair<Rule>) -> UpdateClause {
    let mut detach = false;
    let mut variables = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::detach => detach = true,
            Rule::variable => variables.push(identifier_text(inner.as_str())),
            _ => {}
        }
    }

    UpdateClause::Delete { detach, variables }
}

fn parse_return_clause(pair: Pair<Rule>) -> ParseResult<ReturnClause> {
    let mut clause = ReturnClause::default();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::distinct => clause.distinct = true,
            Rule::return_item => clause.items.push(parse_return_item(inner)?),
            _ => {}
        }
    }

    Ok(clause)
}

fn parse_return_item(pair: Pair<Rule>) -> ParseResult<ReturnItem> {
    let mut expression = None;
    let mut text = String::new();
    let mut alias = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expression => {
                text = inner.as_str().trim().to_string();
                expression = Some(parse_expression(inner)?);
            }
            Rule::alias => alias = Some(identifier_text(inner.as_str().trim())),
            _ => {}
        }
    }

    Ok(ReturnItem {
        expression: expression.ok_or_else(|| {
            ParseError::SemanticError("Missing expression in RETURN".to_string())
        })?,
        alias,
        text,
    })
}

fn parse_order_clause(pair: Pair<Rule>) -> ParseResult<Vec<OrderItem>> {
    let mut items = Vec::new();

    for item in pair.into_inner() {
        if item.as_rule() != Rule::order_item {
            continue;
        }
        let mut expression = None;
        let mut ascending = true;
        for part in item.into_inner() {
            match part.as_rule() {
                Rule::expression => expression = Some(parse_expression(part)?),
                Rule::order_direction => {
                    ascending = !part.as_str().to_uppercase().starts_with("DESC");
                }
                _ => {}
            }
        }
        items.push(OrderItem {
            expression: expression.ok_or_else(|| {
                ParseError::SemanticError("Missing expression in ORDER BY".to_string())
            })?,
            ascending,
        });
    }

    Ok(items)
}

fn parse_count(pair: Pair<Rule>) -> ParseResult<usize> {
    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::integer {
            return inner.as_str().parse().map_err(|_| {
                ParseError::SemanticError(format!("Invalid row count: {}", inner.as_str()))
            });
        }
    }
    Err(ParseError::SemanticError("Missing row count".to_string()))
}

fn parse_pattern(pair: Pair<Rule>) -> ParseResult<Pattern> {
    let mut paths = Vec::new();

    for inner in pair.into_inner() {
        if inner.as_rule() == Rule::path {
            paths.push(parse_path(inner)?);
        }
    }

    Ok(Pattern { paths })
}

fn parse_path(pair: Pair<Rule>) -> ParseResult<PathPattern> {
    let mut variable = None;
    let mut nodes = Vec::new();
    let mut edges = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::path_variable => variable = Some(identifier_text(inner.as_str().trim())),
            Rule::node => nodes.push(parse_node(inner)?),
            Rule::incoming_edge => edges.push(parse_edge(inner, Direction::Incoming)?),
            Rule::outgoing_edge => edges.push(parse_edge(inner, Direction::Outgoing)?),
            Rule::undirected_edge => edges.push(parse_edge(inner, Direction::Both)?),
            _ => {}
        }
    }

    if nodes.is_empty() {
        return Err(ParseError::SemanticError(
            "Path must have at least one node".to_string(),
        ));
    }

    let start = nodes.remove(0);
    let segments = edges
        .into_iter()
        .zip(nodes)
        .map(|(edge, node)| PathSegment { edge, node })
        .collect();

    Ok(PathPattern {
        variable,
        start,
        segments,
    })
}

fn parse_node(pair: Pair<Rule>) -> ParseResult<NodePattern> {
    let mut variable = None;
    let mut labels = Vec::new();
    let mut properties = Vec::new();

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::variable => variable = Some(identifier_text(inner.as_str())),
            Rule::labels => {
                for label in inner.into_inner() {
                    if label.as_rule() == Rule::label {
                        labels.push(Label::new(identifier_text(label.as_str())));
                    }
                }
            }
            Rule::properties => properties = parse_properties(inner)?,
            _ => {}
        }
    }

    Ok(NodePattern {
        variable,
        labels,
        properties,
    })
}

fn parse_edge(pair: Pair<Rule>, direction: Direction) -> ParseResult<EdgePattern> {
    let mut variable = None;
    let mut types = Vec::new();
    let mut properties = Vec::new();

    for inner in pair.into_inner() {
        if inner.as_rule() != Rule::edge_detail {
            continue;
        }
        for detail in inner.into_inner() {
            match detail.as_rule() {
                Rule::variable => variable = Some(identifier_text(detail.as_str())),
                Rule::edge_types => {
                    for edge_type in detail.into_inner() {
                        if edge_type.as_rule() == Rule::edge_type {
                            types.push(EdgeType::new(identifier_text(edge_type.as_str())));
                        }
                    }
                }
                Rule::properties => properties = parse_properties(detail)?,
                _ => {}
            }
        }
    }

    Ok(EdgePattern {
        variable,
        types,
        direction,
        properties,
    })
}

fn parse_properties(pair: Pair<Rule>) -> ParseResult<Vec<(String, Expression)>> {
    let mut props = Vec::new();

    for prop in pair.into_inner() {
        if prop.as_rule() != Rule::property {
            continue;
        }
        let mut key = None;
        let mut value = None;
        for part in prop.into_inner() {
            match part.as_rule() {
                Rule::property_key => key = Some(identifier_text(part.as_str())),
                Rule::expression => value = Some(parse_expression(part)?),
                _ => {}
            }
        }
        if let (Some(key), Some(value)) = (key, value) {
            props.push((key, value));
        }
    }

    Ok(props)
}

fn parse_expression(pair: Pair<Rule>) -> ParseResult<Expression> {
    match pair.as_rule() {
        Rule::expression => single_child(pair).and_then(parse_expression),
        Rule::or_expr => fold_logical(pair, BinaryOp::Or),
        Rule::and_expr => fold_logical(pair, BinaryOp::And),
        Rule::not_expr => {
            let mut negations = 0;
            let mut inner_expr = None;
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::not_op => negations += 1,
                    _ => inner_expr = Some(parse_expression(inner)?),
                }
            }
            let mut expr = inner_expr.ok_or_else(|| {
                ParseError::SemanticError("NOT without an operand".to_string())
            })?;
            for _ in 0..negations {
                expr = Expression::Not(Box::new(expr));
            }
            Ok(expr)
        }
        Rule::comparison => parse_comparison(pair),
        _ => parse_operand(pair),
    }
}

fn fold_logical(pair: Pair<Rule>, op: BinaryOp) -> ParseResult<Expression> {
    let mut operands = Vec::new();
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::and_expr | Rule::not_expr => operands.push(parse_expression(inner)?),
            _ => {}
        }
    }

    let mut iter = operands.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| ParseError::SemanticError("Empty boolean expression".to_string()))?;
    Ok(iter.fold(first, |left, right| Expression::Binary {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }))
}

fn parse_comparison(pair: Pair<Rule>) -> ParseResult<Expression> {
    let mut left = None;
    let mut op = None;
    let mut right = None;
    let mut null_check = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::comp_op => op = Some(parse_op_str(inner.as_str())?),
            Rule::null_check => {
                let negated = inner.into_inner().any(|p| p.as_rule() == Rule::not_op);
                null_check = Some(negated);
            }
            _ => {
                let expr = parse_operand(inner)?;
                if left.is_none() {
                    left = Some(expr);
                } else {
                    right = Some(expr);
                }
            }
        }
    }

    let left = left.ok_or_else(|| ParseError::SemanticError("Missing operand".to_string()))?;
    if let Some(negated) = null_check {
        return Ok(Expression::IsNull {
            expr: Box::new(left),
            negated,
        });
    }
    match (op, right) {
        (Some(op), Some(right)) => Ok(Expression::Binary {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }),
        (None, None) => Ok(left),
        _ => Err(ParseError::SemanticError(
            "Comparison is missing an operand".to_string(),
        )),
    }
}

fn parse_op_str(op_str: &str) -> ParseResult<BinaryOp> {
    let normalized = op_str
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();
    Ok(match normalized.as_str() {
        "=" => BinaryOp::Eq,
        "=~" => BinaryOp::RegexMatch,
        "!=" | "<>" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "CONTAINS" => BinaryOp::Contains,
        "STARTS WITH" => BinaryOp::StartsWith,
        "ENDS WITH" => BinaryOp::EndsWith,
        "IN" => BinaryOp::In,
        _ => {
            return Err(ParseError::SemanticError(format!(
                "Unknown operator: {}",
                op_str
            )))
        }
    })
}

fn parse_operand(pair: Pair<Rule>) -> ParseResult<Expression> {
    match pair.as_rule() {
        Rule::expression => parse_expression(pair),
        Rule::string => Ok(Expression::Literal(PropertyValue::String(unescape(
            pair.into_inner().next().map(|p| p.as_str()).unwrap_or(""),
        )))),
        Rule::integer => pair
            .as_str()
            .parse()
            .map(|i| Expression::Literal(PropertyValue::Integer(i)))
            .map_err(|_| ParseError::SemanticError(format!("Invalid integer: {}", pair.as_str()))),
        Rule::float => pair
            .as_str()
            .parse()
            .map(|f| Expression::Literal(PropertyValue::Float(f)))
            .map_err(|_| ParseError::SemanticError(format!("Invalid float: {}", pair.as_str()))),
        Rule::boolean => Ok(Expression::Literal(PropertyValue::Boolean(
            pair.as_str().eq_ignore_ascii_case("true"),
        ))),
        Rule::null => Ok(Expression::Literal(PropertyValue::Null)),
        Rule::parameter => Ok(Expression::Parameter(
            pair.as_str().trim_start_matches('$').to_string(),
        )),
        Rule::list_literal => Ok(Expression::List(
            pair.into_inner()
                .filter(|p| p.as_rule() == Rule::expression)
                .map(parse_expression)
                .collect::<ParseResult<Vec<_>>>()?,
        )),
        Rule::function_call => {
            let mut name = String::new();
            let mut args = Vec::new();
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::function_name => name = identifier_text(inner.as_str()),
                    Rule::expression => args.push(parse_expression(inner)?),
                    _ => {}
                }
            }
            Ok(Expression::Function { name, args })
        }
        Rule::property_access => {
            let mut variable = String::new();
            let mut property = String::new();
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::variable => variable = identifier_text(inner.as_str()),
                    Rule::property_key => property = identifier_text(inner.as_str()),
                    _ => {}
                }
            }
            Ok(Expression::Property { variable, property })
        }
        Rule::variable_ref => Ok(Expression::Variable(identifier_text(pair.as_str().trim()))),
        other => Err(ParseError::SemanticError(format!(
            "Unexpected expression element: {:?}",
            other
        ))),
    }
}

fn single_child(pair: Pair<Rule>) -> ParseResult<Pair<Rule>> {
    pair.into_inner()
        .next()
        .ok_or_else(|| ParseError::SemanticError("Empty expression".to_string()))
}

/// Strip backtick quoting from an identifier
fn identifier_text(raw: &str) -> String {
    raw.trim_matches('`').to_string()
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
