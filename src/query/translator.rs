//! Translation of typed queries to the backend wire dialect.

use std::collections::HashMap;

use crate::entity::DATE_FORMAT;
use crate::error::{StoreError, StoreResult};

use super::ast::{CompareOp, FilterNode, Literal, Query, SortDirection};

/// Explicit member-name → wire-name mapping, supplied at translator
/// construction. Runtime reflection is deliberately absent: a member that is
/// not in the map fails the translation, not the backend round-trip.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    map: HashMap<String, String>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, member: &str, wire: &str) -> Self {
        self.map.insert(member.to_string(), wire.to_string());
        self
    }

    pub fn resolve(&self, member: &str) -> StoreResult<&str> {
        self.map
            .get(member)
            .map(String::as_str)
            .ok_or_else(|| {
                StoreError::Translation(format!("member '{}' has no wire-name mapping", member))
            })
    }
}

/// The translated wire form of a query: a `{...}` filter object plus the
/// literal modifier tokens appended after it.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedQuery {
    pub filter: String,
    pub modifiers: Vec<String>,
}

impl TranslatedQuery {
    /// The match-everything query.
    pub fn unfiltered() -> Self {
        Self {
            filter: "{}".to_string(),
            modifiers: Vec::new(),
        }
    }

    /// The exact string sent on the wire: filter followed by modifiers.
    pub fn query_string(&self) -> String {
        let mut out = self.filter.clone();
        for modifier in &self.modifiers {
            out.push_str(modifier);
        }
        out
    }

    pub fn is_unfiltered(&self) -> bool {
        self.filter == "{}" && self.modifiers.is_empty()
    }
}

/// Stateless query translator. Each call builds a fresh filter string, so a
/// single translator may serve concurrent translations.
#[derive(Debug, Clone)]
pub struct QueryTranslator {
    fields: FieldMap,
}

impl QueryTranslator {
    pub fn new(fields: FieldMap) -> Self {
        Self { fields }
    }

    pub fn translate(&self, query: &Query) -> StoreResult<TranslatedQuery> {
        let mut filter = String::new();
        for (i, node) in query.filters.iter().enumerate() {
            if i > 0 {
                filter.push(',');
            }
            self.visit(node, &mut filter)?;
        }

        let mut modifiers = Vec::new();
        if !query.sort.is_empty() {
            modifiers.push(self.sort_modifier(&query.sort)?);
        }
        if let Some(n) = query.skip {
            modifiers.push(format!("&skip={}", n));
        }
        if let Some(n) = query.take {
            modifiers.push(format!("&limit={}", n));
        }
        if !query.fields.is_empty() {
            modifiers.push(self.fields_modifier(&query.fields)?);
        }

        Ok(TranslatedQuery {
            filter: format!("{{{}}}", filter),
            modifiers,
        })
    }

    fn visit(&self, node: &FilterNode, out: &mut String) -> StoreResult<()> {
        match node {
            FilterNode::Compare { member, op, value } => {
                let wire = self.fields.resolve(member)?;
                match op {
                    CompareOp::Eq => {
                        out.push_str(&format!("\"{}\":{}", wire, literal_json(value)));
                    }
                    CompareOp::Gt | CompareOp::Gte | CompareOp::Lt | CompareOp::Lte => {
                        out.push_str(&format!(
                            "\"{}\":{{\"{}\":{}}}",
                            wire,
                            range_operator(*op),
                            literal_json(value)
                        ));
                    }
                }
            }
            // Conjunctions emit the right operand before the left. The comma
            // join is order-insensitive for the backend, but the emission
            // order is part of the wire contract and must not change.
            FilterNode::And(left, right) => {
                self.visit(right, out)?;
                out.push(',');
                self.visit(left, out)?;
            }
            FilterNode::Or(left, right) => {
                let mut lbuf = String::new();
                self.visit(left, &mut lbuf)?;
                let mut rbuf = String::new();
                self.visit(right, &mut rbuf)?;
                out.push_str(&format!("\"$or\":[{{{}}},{{{}}}]", lbuf, rbuf));
            }
            FilterNode::MemberIsTrue { member } => {
                let wire = self.fields.resolve(member)?;
                out.push_str(&format!("\"{}\":true", wire));
            }
            FilterNode::MethodCall {
                member,
                method,
                arg,
            } => {
                let wire = self.fields.resolve(member)?;
                match method.as_str() {
                    "startsWith" => {
                        let Literal::String(prefix) = arg else {
                            return Err(StoreError::Translation(
                                "startsWith requires a string argument".to_string(),
                            ));
                        };
                        let anchored = format!("^{}", regex::escape(prefix));
                        out.push_str(&format!(
                            "\"{}\":{{\"$regex\":{}}}",
                            wire,
                            json_string(&anchored)
                        ));
                    }
                    "equals" => match arg {
                        Literal::String(s) => {
                            out.push_str(&format!("\"{}\":{}", wire, json_string(s)));
                        }
                        Literal::Bool(b) => {
                            out.push_str(&format!("\"{}\":{}", wire, b));
                        }
                        _ => {
                            return Err(StoreError::Translation(
                                "equals supports string and boolean arguments".to_string(),
                            ));
                        }
                    },
                    other => {
                        return Err(StoreError::Translation(format!(
                            "unsupported method call: {}",
                            other
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn sort_modifier(&self, sort: &[(String, SortDirection)]) -> StoreResult<String> {
        let mut body = String::new();
        for (i, (member, direction)) in sort.iter().enumerate() {
            if i > 0 {
                body.push(',');
            }
            let wire = self.fields.resolve(member)?;
            let sign = match direction {
                SortDirection::Ascending => 1,
                SortDirection::Descending => -1,
            };
            body.push_str(&format!("\"{}\":{}", wire, sign));
        }
        Ok(format!("&sort={{{}}}", body))
    }

    fn fields_modifier(&self, fields: &[String]) -> StoreResult<String> {
        let mut wires = Vec::with_capacity(fields.len());
        for member in fields {
            wires.push(self.fields.resolve(member)?.to_string());
        }
        Ok(format!("&fields={}", wires.join(",")))
    }
}

fn range_operator(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Gt => "$gt",
        CompareOp::Gte => "$gte",
        CompareOp::Lt => "$lt",
        CompareOp::Lte => "$lte",
        CompareOp::Eq => unreachable!("Eq has no range operator"),
    }
}

fn literal_json(value: &Literal) -> String {
    match value {
        Literal::String(s) => json_string(s),
        Literal::Integer(i) => i.to_string(),
        Literal::Float(f) => {
            serde_json::to_string(&serde_json::json!(f)).unwrap_or_default()
        }
        Literal::Bool(b) => b.to_string(),
        Literal::Date(dt) => format!("\"{}\"", dt.format(DATE_FORMAT)),
        Literal::Null => "null".to_string(),
    }
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn translator() -> QueryTranslator {
        QueryTranslator::new(
            FieldMap::new()
                .field("id", "_id")
                .field("name", "name")
                .field("age", "age")
                .field("active", "active")
                .field("published_at", "published_at"),
        )
    }

    #[test]
    fn test_equality_filter() {
        let t = translator()
            .translate(&Query::new().eq("name", "James Dean"))
            .unwrap();
        assert_eq!(t.filter, r#"{"name":"James Dean"}"#);
        assert!(t.modifiers.is_empty());
    }

    #[test]
    fn test_sort_descending_on_id() {
        let t = translator()
            .translate(&Query::new().descending("id"))
            .unwrap();
        assert_eq!(t.filter, "{}");
        assert_eq!(t.modifiers, vec![r#"&sort={"_id":-1}"#.to_string()]);
    }

    #[test]
    fn test_or_filter() {
        let query = Query::new().filter(FilterNode::or(
            FilterNode::eq("name", "x"),
            FilterNode::eq("age", "y"),
        ));
        let t = translator().translate(&query).unwrap();
        assert_eq!(t.filter, r#"{"$or":[{"name":"x"},{"age":"y"}]}"#);
    }

    #[test]
    fn test_and_emits_right_then_left() {
        let query = Query::new().filter(FilterNode::and(
            FilterNode::eq("name", "a"),
            FilterNode::gt("age", 21),
        ));
        let t = translator().translate(&query).unwrap();
        assert_eq!(t.filter, r#"{"age":{"$gt":21},"name":"a"}"#);
    }

    #[test]
    fn test_multiple_clauses_conjoin_in_textual_order() {
        let query = Query::new().eq("name", "a").gt("age", 21);
        let t = translator().translate(&query).unwrap();
        assert_eq!(t.filter, r#"{"name":"a","age":{"$gt":21}}"#);
    }

    #[test]
    fn test_range_operators() {
        let t = translator()
            .translate(&Query::new().gte("age", 18).lt("age", 65))
            .unwrap();
        assert_eq!(t.filter, r#"{"age":{"$gte":18},"age":{"$lt":65}}"#);
    }

    #[test]
    fn test_date_literal_uses_canonical_format() {
        let dt = Utc.with_ymd_and_hms(2023, 4, 22, 14, 30, 0).unwrap();
        let t = translator()
            .translate(&Query::new().gt("published_at", dt))
            .unwrap();
        assert_eq!(
            t.filter,
            r#"{"published_at":{"$gt":"2023-04-22T14:30:00.000Z"}}"#
        );
    }

    #[test]
    fn test_boolean_member_access() {
        let t = translator()
            .translate(&Query::new().is_true("active"))
            .unwrap();
        assert_eq!(t.filter, r#"{"active":true}"#);
    }

    #[test]
    fn test_starts_with_escapes_regex_metacharacters() {
        let t = translator()
            .translate(&Query::new().starts_with("name", "a.b"))
            .unwrap();
        assert_eq!(t.filter, r#"{"name":{"$regex":"^a\\.b"}}"#);
    }

    #[test]
    fn test_equals_method_string_and_bool() {
        let t = translator()
            .translate(&Query::new().filter(FilterNode::equals("name", "Bob")))
            .unwrap();
        assert_eq!(t.filter, r#"{"name":"Bob"}"#);

        let t = translator()
            .translate(&Query::new().filter(FilterNode::equals("active", false)))
            .unwrap();
        assert_eq!(t.filter, r#"{"active":false}"#);
    }

    #[test]
    fn test_unsupported_method_fails_loud() {
        let query = Query::new().filter(FilterNode::MethodCall {
            member: "name".to_string(),
            method: "endsWith".to_string(),
            arg: Literal::String("x".to_string()),
        });
        let err = translator().translate(&query).unwrap_err();
        assert_eq!(err.code(), "TRANSLATION");
        assert!(err.to_string().contains("endsWith"));
    }

    #[test]
    fn test_unmapped_member_fails() {
        let err = translator()
            .translate(&Query::new().eq("unknown", 1))
            .unwrap_err();
        assert_eq!(err.code(), "TRANSLATION");
        assert!(err.to_string().contains("unknown"));
    }

    #[test]
    fn test_modifier_ordering_and_query_string() {
        let t = translator()
            .translate(
                &Query::new()
                    .eq("name", "a")
                    .ascending("age")
                    .skip(5)
                    .take(10)
                    .select(["name", "age"]),
            )
            .unwrap();
        assert_eq!(
            t.query_string(),
            r#"{"name":"a"}&sort={"age":1}&skip=5&limit=10&fields=name,age"#
        );
    }

    #[test]
    fn test_string_escaping() {
        let t = translator()
            .translate(&Query::new().eq("name", "he said \"hi\""))
            .unwrap();
        assert_eq!(t.filter, r#"{"name":"he said \"hi\""}"#);
    }
}
