//! Local evaluation of translated filters.
//!
//! Cache reads must agree with what the backend would return for the same
//! translated query. The wire filter is a JSON object that may legally carry
//! duplicate keys (`a > 1 && a < 5` emits two `"a"` entries), so parsing
//! goes through a duplicate-preserving node type instead of a plain map.

use std::cmp::Ordering;
use std::fmt;

use regex::Regex;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// JSON tree that keeps object entries in order, duplicates included.
#[derive(Debug, Clone)]
enum Node {
    Scalar(Value),
    Array(Vec<Node>),
    Object(Vec<(String, Node)>),
}

impl Node {
    fn into_value(self) -> Value {
        match self {
            Node::Scalar(v) => v,
            Node::Array(items) => Value::Array(items.into_iter().map(Node::into_value).collect()),
            Node::Object(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, v.into_value()))
                    .collect(),
            ),
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NodeVisitor;

        impl<'de> Visitor<'de> for NodeVisitor {
            type Value = Node;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("any JSON value")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Node, E> {
                Ok(Node::Scalar(Value::Bool(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Node, E> {
                Ok(Node::Scalar(Value::from(v)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Node, E> {
                Ok(Node::Scalar(Value::from(v)))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Node, E> {
                Ok(Node::Scalar(Value::from(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Node, E> {
                Ok(Node::Scalar(Value::String(v.to_string())))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Node, E> {
                Ok(Node::Scalar(Value::String(v)))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Node, E> {
                Ok(Node::Scalar(Value::Null))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Node, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(Node::Array(items))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Node, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, Node>()? {
                    entries.push((key, value));
                }
                Ok(Node::Object(entries))
            }
        }

        deserializer.deserialize_any(NodeVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Compiled filter, ready to test documents.
#[derive(Debug)]
pub(crate) enum Matcher {
    All(Vec<Matcher>),
    Any(Vec<Matcher>),
    Eq { field: String, value: Value },
    Cmp { field: String, op: RangeOp, value: Value },
    Regex { field: String, re: Regex },
}

/// Compile a translated filter string (`{...}`) into a [`Matcher`].
pub(crate) fn compile(filter: &str) -> StoreResult<Matcher> {
    let node: Node = serde_json::from_str(filter)
        .map_err(|e| StoreError::CacheQuery(format!("malformed filter: {}", e)))?;
    let Node::Object(entries) = node else {
        return Err(StoreError::CacheQuery(
            "filter must be a JSON object".to_string(),
        ));
    };
    lower_object(entries)
}

fn lower_object(entries: Vec<(String, Node)>) -> StoreResult<Matcher> {
    let mut matchers = Vec::with_capacity(entries.len());
    for (key, node) in entries {
        matchers.push(lower_clause(key, node)?);
    }
    Ok(Matcher::All(matchers))
}

fn lower_clause(key: String, node: Node) -> StoreResult<Matcher> {
    if key == "$or" {
        let Node::Array(items) = node else {
            return Err(StoreError::CacheQuery("$or requires an array".to_string()));
        };
        let mut branches = Vec::with_capacity(items.len());
        for item in items {
            let Node::Object(entries) = item else {
                return Err(StoreError::CacheQuery(
                    "$or branches must be objects".to_string(),
                ));
            };
            branches.push(lower_object(entries)?);
        }
        return Ok(Matcher::Any(branches));
    }
    if key.starts_with('$') {
        return Err(StoreError::CacheQuery(format!(
            "unsupported operator: {}",
            key
        )));
    }

    match node {
        Node::Object(entries) if entries.iter().any(|(k, _)| k.starts_with('$')) => {
            let mut matchers = Vec::with_capacity(entries.len());
            for (op, operand) in entries {
                matchers.push(lower_operator(&key, &op, operand)?);
            }
            if matchers.len() == 1 {
                Ok(matchers.remove(0))
            } else {
                Ok(Matcher::All(matchers))
            }
        }
        other => Ok(Matcher::Eq {
            field: key,
            value: other.into_value(),
        }),
    }
}

fn lower_operator(field: &str, op: &str, operand: Node) -> StoreResult<Matcher> {
    let range = match op {
        "$gt" => Some(RangeOp::Gt),
        "$gte" => Some(RangeOp::Gte),
        "$lt" => Some(RangeOp::Lt),
        "$lte" => Some(RangeOp::Lte),
        _ => None,
    };
    if let Some(range) = range {
        return Ok(Matcher::Cmp {
            field: field.to_string(),
            op: range,
            value: operand.into_value(),
        });
    }
    if op == "$regex" {
        let Node::Scalar(Value::String(pattern)) = operand else {
            return Err(StoreError::CacheQuery(
                "$regex requires a string pattern".to_string(),
            ));
        };
        let re = Regex::new(&pattern)
            .map_err(|e| StoreError::CacheQuery(format!("invalid $regex: {}", e)))?;
        return Ok(Matcher::Regex {
            field: field.to_string(),
            re,
        });
    }
    Err(StoreError::CacheQuery(format!(
        "unsupported operator: {}",
        op
    )))
}

impl Matcher {
    pub(crate) fn matches(&self, doc: &Value) -> bool {
        match self {
            Matcher::All(matchers) => matchers.iter().all(|m| m.matches(doc)),
            Matcher::Any(matchers) => matchers.iter().any(|m| m.matches(doc)),
            Matcher::Eq { field, value } => {
                value_eq(doc.get(field).unwrap_or(&Value::Null), value)
            }
            Matcher::Cmp { field, op, value } => {
                let Some(actual) = doc.get(field) else {
                    return false;
                };
                let Some(ordering) = compare_values(actual, value) else {
                    return false;
                };
                match op {
                    RangeOp::Gt => ordering == Ordering::Greater,
                    RangeOp::Gte => ordering != Ordering::Less,
                    RangeOp::Lt => ordering == Ordering::Less,
                    RangeOp::Lte => ordering != Ordering::Greater,
                }
            }
            Matcher::Regex { field, re } => doc
                .get(field)
                .and_then(Value::as_str)
                .map(|s| re.is_match(s))
                .unwrap_or(false),
        }
    }
}

/// Equality with numeric widening, so `3` matches `3.0`.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering across same-typed values; numbers widen to f64, strings compare
/// lexicographically (which is correct for canonical-format dates).
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Parsed URL modifier tokens, applied to locally matched rows.
#[derive(Debug, Default)]
pub(crate) struct Modifiers {
    sort: Vec<(String, bool)>,
    skip: Option<usize>,
    limit: Option<usize>,
    fields: Option<Vec<String>>,
}

impl Modifiers {
    pub(crate) fn parse(modifiers: &[String]) -> StoreResult<Self> {
        let mut parsed = Modifiers::default();
        for modifier in modifiers {
            if let Some(rest) = modifier.strip_prefix("&sort=") {
                parsed.sort = parse_sort(rest)?;
            } else if let Some(rest) = modifier.strip_prefix("&skip=") {
                parsed.skip = Some(parse_count(rest, "skip")?);
            } else if let Some(rest) = modifier.strip_prefix("&limit=") {
                parsed.limit = Some(parse_count(rest, "limit")?);
            } else if let Some(rest) = modifier.strip_prefix("&fields=") {
                parsed.fields = Some(rest.split(',').map(str::to_string).collect());
            } else {
                return Err(StoreError::CacheQuery(format!(
                    "unsupported modifier: {}",
                    modifier
                )));
            }
        }
        Ok(parsed)
    }

    pub(crate) fn apply(&self, mut rows: Vec<Value>) -> Vec<Value> {
        if !self.sort.is_empty() {
            rows.sort_by(|a, b| {
                for (field, ascending) in &self.sort {
                    let ordering = order_for_sort(a.get(field), b.get(field));
                    let ordering = if *ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        let mut rows: Vec<Value> = rows.into_iter().skip(skip).take(limit).collect();

        if let Some(fields) = &self.fields {
            for row in &mut rows {
                project_fields(row, fields);
            }
        }
        rows
    }
}

fn parse_sort(spec: &str) -> StoreResult<Vec<(String, bool)>> {
    let node: Node = serde_json::from_str(spec)
        .map_err(|e| StoreError::CacheQuery(format!("malformed sort modifier: {}", e)))?;
    let Node::Object(entries) = node else {
        return Err(StoreError::CacheQuery(
            "sort modifier must be a JSON object".to_string(),
        ));
    };
    let mut sort = Vec::with_capacity(entries.len());
    for (field, direction) in entries {
        let ascending = match direction.into_value().as_i64() {
            Some(1) => true,
            Some(-1) => false,
            _ => {
                return Err(StoreError::CacheQuery(format!(
                    "sort direction for '{}' must be 1 or -1",
                    field
                )));
            }
        };
        sort.push((field, ascending));
    }
    Ok(sort)
}

fn parse_count(value: &str, name: &str) -> StoreResult<usize> {
    value
        .parse()
        .map_err(|_| StoreError::CacheQuery(format!("{} must be a non-negative integer", name)))
}

/// Total order for sorting: missing values first, then by type rank, then by
/// value within a type.
fn order_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    let (ra, rb) = (rank(a), rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

fn project_fields(row: &mut Value, fields: &[String]) {
    if let Some(obj) = row.as_object_mut() {
        obj.retain(|key, _| key == crate::entity::FIELD_ID || fields.iter().any(|f| f == key));
    }
}
