// src/condition.rs

//! Record match conditions
//!
//! Conditions gate conditional include/exclude rules and `Store::find`
//! queries. They are written as JSON objects keyed by dotted field paths:
//!
//! ```json
//! {"status": "published", "meta.kind": {"$in": ["a", "b"]}, "draft": {"$exists": false}}
//! ```
//!
//! Supported operators: `$eq`, `$ne`, `$in`, `$nin`, `$exists`, and the
//! top-level combinators `$and` / `$or`.

use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// A predicate over a plain record object
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Field { path: String, test: FieldTest },
}

/// Test applied to a single field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldTest {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Exists(bool),
}

impl Condition {
    /// Parse a condition from its JSON form
    pub fn parse(value: &Value) -> Result<Self> {
        let Value::Object(map) = value else {
            return Err(Error::InvalidCondition(format!(
                "expected an object, got {}",
                value
            )));
        };

        let mut clauses = Vec::with_capacity(map.len());
        for (key, spec) in map {
            match key.as_str() {
                "$and" => clauses.push(Condition::All(parse_list(key, spec)?)),
                "$or" => clauses.push(Condition::Any(parse_list(key, spec)?)),
                op if op.starts_with('$') => {
                    return Err(Error::InvalidCondition(format!("unknown operator {}", op)));
                }
                path => clauses.extend(parse_field(path, spec)?),
            }
        }

        Ok(match clauses.len() {
            1 => clauses.remove(0),
            _ => Condition::All(clauses),
        })
    }

    /// Evaluate against a plain object
    pub fn matches(&self, object: &Value) -> bool {
        match self {
            Condition::All(items) => items.iter().all(|c| c.matches(object)),
            Condition::Any(items) => items.iter().any(|c| c.matches(object)),
            Condition::Field { path, test } => {
                let value = lookup(object, path);
                match test {
                    FieldTest::Eq(expected) => value == Some(expected),
                    FieldTest::Ne(expected) => value != Some(expected),
                    FieldTest::In(options) => value.is_some_and(|v| options.contains(v)),
                    FieldTest::NotIn(options) => !value.is_some_and(|v| options.contains(v)),
                    FieldTest::Exists(wanted) => value.is_some() == *wanted,
                }
            }
        }
    }
}

fn parse_list(op: &str, spec: &Value) -> Result<Vec<Condition>> {
    let Value::Array(items) = spec else {
        return Err(Error::InvalidCondition(format!("{} expects a list", op)));
    };
    items.iter().map(Condition::parse).collect()
}

fn parse_field(path: &str, spec: &Value) -> Result<Vec<Condition>> {
    let field = |test| Condition::Field {
        path: path.to_string(),
        test,
    };

    let ops = match spec {
        Value::Object(map) if is_operator_object(map) => map,
        literal => return Ok(vec![field(FieldTest::Eq(literal.clone()))]),
    };

    ops.iter()
        .map(|(op, arg)| {
            let test = match op.as_str() {
                "$eq" => FieldTest::Eq(arg.clone()),
                "$ne" => FieldTest::Ne(arg.clone()),
                "$in" => FieldTest::In(list_arg(op, arg)?),
                "$nin" => FieldTest::NotIn(list_arg(op, arg)?),
                "$exists" => FieldTest::Exists(arg.as_bool().ok_or_else(|| {
                    Error::InvalidCondition(format!("$exists on {} expects a boolean", path))
                })?),
                other => {
                    return Err(Error::InvalidCondition(format!(
                        "unknown operator {} on {}",
                        other, path
                    )));
                }
            };
            Ok(field(test))
        })
        .collect()
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn list_arg(op: &str, arg: &Value) -> Result<Vec<Value>> {
    match arg {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(Error::InvalidCondition(format!("{} expects a list", op))),
    }
}

fn lookup<'a>(object: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(object, |current, segment| current.as_object()?.get(segment))
}
