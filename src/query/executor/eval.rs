//! Expression evaluation against a record

use super::record::{Record, Value};
use super::{ExecutionError, ExecutionResult, Params};
use crate::graph::{GraphStore, PropertyValue};
use crate::query::ast::{BinaryOp, Expression};
use regex::Regex;
use std::cmp::Ordering;

/// Evaluates expressions over records of one store
pub struct Evaluator<'a> {
    store: &'a GraphStore,
    params: &'a Params,
}

impl<'a> Evaluator<'a> {
    pub fn new(store: &'a GraphStore, params: &'a Params) -> Self {
        Self { store, params }
    }

    /// Evaluate a predicate; anything but boolean true rejects the record
    pub fn passes(&self, expr: &Expression, record: &Record) -> ExecutionResult<bool> {
        Ok(self.eval(expr, record)?.is_true())
    }

    /// Evaluate to a plain property value (pattern constraints, SET values)
    pub fn eval_property(&self, expr: &Expression, record: &Record) -> ExecutionResult<PropertyValue> {
        match self.eval(expr, record)? {
            Value::Property(p) => Ok(p),
            other => Err(ExecutionError::TypeError(format!(
                "expected a property value, got {:?}",
                other
            ))),
        }
    }

    pub fn eval(&self, expr: &Expression, record: &Record) -> ExecutionResult<Value> {
        match expr {
            Expression::Literal(value) => Ok(Value::Property(value.clone())),
            Expression::Parameter(name) => self
                .params
                .get(name)
                .cloned()
                .map(Value::Property)
                .ok_or_else(|| ExecutionError::ParameterMissing(name.clone())),
            Expression::Variable(name) => record
                .get(name)
                .cloned()
                .ok_or_else(|| ExecutionError::VariableNotFound(name.clone())),
            Expression::Property { variable, property } => self.property(variable, property, record),
            Expression::List(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval_property(item, record))
                    .collect::<ExecutionResult<Vec<_>>>()?;
                Ok(Value::Property(PropertyValue::Array(values)))
            }
            Expression::Function { name, args } => self.function(name, args, record),
            Expression::Not(inner) => Ok(match self.eval(inner, record)? {
                Value::Property(PropertyValue::Boolean(b)) => PropertyValue::Boolean(!b).into(),
                _ => Value::null(),
            }),
            Expression::IsNull { expr, negated } => {
                let is_null = self.eval(expr, record)?.is_null();
                Ok(PropertyValue::Boolean(is_null != *negated).into())
            }
            Expression::Binary { left, op, right } => {
                let left = self.eval(left, record)?;
                let right = self.eval(right, record)?;
                Ok(binary(*op, &left, &right))
            }
        }
    }

    fn property(&self, variable: &str, property: &str, record: &Record) -> ExecutionResult<Value> {
        let bound = record
            .get(variable)
            .ok_or_else(|| ExecutionError::VariableNotFound(variable.to_string()))?;
        let value = match bound {
            Value::Node(id) => self
                .store
                .get_node(*id)
                .and_then(|n| n.get_property(property).cloned()),
            Value::Edge(id) => self
                .store
                .get_edge(*id)
                .and_then(|e| e.properties.get(property).cloned()),
            Value::Property(PropertyValue::Null) => None,
            Value::Property(PropertyValue::Map(map)) => map.get(property).cloned(),
            other => {
                return Err(ExecutionError::TypeError(format!(
                    "cannot access property `{}` on {:?}",
                    property, other
                )))
            }
        };
        Ok(Value::Property(value.unwrap_or(PropertyValue::Null)))
    }

    fn function(&self, name: &str, args: &[Expression], record: &Record) -> ExecutionResult<Value> {
        let values = args
            .iter()
            .map(|arg| self.eval(arg, record))
            .collect::<ExecutionResult<Vec<_>>>()?;
        let first = values.first();

        let result: PropertyValue = match name.to_lowercase().as_str() {
            "tolower" | "lower" => map_string(first, |s| s.to_lowercase()),
            "toupper" | "upper" => map_string(first, |s| s.to_uppercase()),
            "trim" => map_string(first, |s| s.trim().to_string()),
            "tostring" => match first {
                Some(Value::Property(PropertyValue::String(s))) => PropertyValue::String(s.clone()),
                Some(Value::Property(PropertyValue::Null)) | None => PropertyValue::Null,
                Some(Value::Property(p)) => PropertyValue::String(p.to_string()),
                Some(other) => PropertyValue::String(other.distinct_key()),
            },
            "elementid" => match first {
                Some(Value::Node(id)) => id.element_id().into(),
                Some(Value::Edge(id)) => id.element_id().into(),
                _ => PropertyValue::Null,
            },
            "id" => match first {
                Some(Value::Node(id)) => PropertyValue::Integer(id.as_u64() as i64),
                Some(Value::Edge(id)) => PropertyValue::Integer(id.as_u64() as i64),
                _ => PropertyValue::Null,
            },
            "labels" => match first {
                Some(Value::Node(id)) => self
                    .store
                    .get_node(*id)
                    .map(|n| {
                        PropertyValue::Array(
                            n.labels.iter().map(|l| PropertyValue::from(l.as_str())).collect(),
                        )
                    })
                    .unwrap_or(PropertyValue::Null),
                _ => PropertyValue::Null,
            },
            "type" => match first {
                Some(Value::Edge(id)) => self
                    .store
                    .get_edge(*id)
                    .map(|e| PropertyValue::from(e.edge_type.as_str()))
                    .unwrap_or(PropertyValue::Null),
                _ => PropertyValue::Null,
            },
            "coalesce" => {
                return Ok(values
                    .into_iter()
                    .find(|v| !v.is_null())
                    .unwrap_or_else(Value::null))
            }
            "size" => match first {
                Some(Value::Property(PropertyValue::String(s))) => {
                    PropertyValue::Integer(s.chars().count() as i64)
                }
                Some(Value::Property(PropertyValue::Array(items))) => {
                    PropertyValue::Integer(items.len() as i64)
                }
                _ => PropertyValue::Null,
            },
            other => return Err(ExecutionError::UnknownFunction(other.to_string())),
        };

        Ok(Value::Property(result))
    }
}

fn map_string(value: Option<&Value>, f: impl Fn(&str) -> String) -> PropertyValue {
    match value {
        Some(Value::Property(PropertyValue::String(s))) => PropertyValue::String(f(s)),
        _ => PropertyValue::Null,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let result = match op {
        BinaryOp::And => Some(left.is_true() && right.is_true()),
        BinaryOp::Or => Some(left.is_true() || right.is_true()),
        BinaryOp::Eq => values_equal(left, right),
        BinaryOp::Ne => values_equal(left, right).map(|eq| !eq),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            compare_values(left, right).map(|ord| match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
        BinaryOp::Contains | BinaryOp::StartsWith | BinaryOp::EndsWith => {
            match (left, right) {
                (
                    Value::Property(PropertyValue::String(l)),
                    Value::Property(PropertyValue::String(r)),
                ) => Some(match op {
                    BinaryOp::Contains => l.contains(r.as_str()),
                    BinaryOp::StartsWith => l.starts_with(r.as_str()),
                    _ => l.ends_with(r.as_str()),
                }),
                _ => None,
            }
        }
        // An invalid pattern compares as null
        BinaryOp::RegexMatch => match (left, right) {
            (
                Value::Property(PropertyValue::String(l)),
                Value::Property(PropertyValue::String(r)),
            ) => Regex::new(&format!("^(?:{})$", r))
                .ok()
                .map(|re| re.is_match(l)),
            _ => None,
        },
        BinaryOp::In => match (left, right) {
            (l, _) if l.is_null() => None,
            (Value::Property(l), Value::Property(PropertyValue::Array(items))) => {
                Some(items.iter().any(|item| l.loose_eq(item)))
            }
            _ => None,
        },
    };

    result
        .map(|b| Value::Property(PropertyValue::Boolean(b)))
        .unwrap_or_else(Value::null)
}

/// Equality; `None` when either side is null
pub(crate) fn values_equal(left: &Value, right: &Value) -> Option<bool> {
    if left.is_null() || right.is_null() {
        return None;
    }
    Some(match (left, right) {
        (Value::Property(l), Value::Property(r)) => l.loose_eq(r),
        (l, r) => l == r,
    })
}

/// Ordering for comparisons and ORDER BY; `None` when incomparable
pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Property(l), Value::Property(r)) => l.compare(r),
        (Value::Node(l), Value::Node(r)) => Some(l.cmp(r)),
        (Value::Edge(l), Value::Edge(r)) => Some(l.cmp(r)),
        _ => None,
    }
}
