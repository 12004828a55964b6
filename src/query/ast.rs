//! Query expression tree.

use chrono::{DateTime, Utc};

/// A literal operand in a filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    Null,
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::String(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::String(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Integer(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Integer(v as i64)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<DateTime<Utc>> for Literal {
    fn from(v: DateTime<Utc>) -> Self {
        Literal::Date(v)
    }
}

/// Comparison operators supported by the backend filter dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A node in the filter expression tree.
///
/// Method calls carry their name as data so an unsupported method reaches
/// the translator and fails loudly instead of being unrepresentable and
/// silently dropped by a caller-side workaround.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Compare {
        member: String,
        op: CompareOp,
        value: Literal,
    },
    And(Box<FilterNode>, Box<FilterNode>),
    Or(Box<FilterNode>, Box<FilterNode>),
    /// Bare boolean member access (`where active`).
    MemberIsTrue { member: String },
    MethodCall {
        member: String,
        method: String,
        arg: Literal,
    },
}

impl FilterNode {
    pub fn eq(member: &str, value: impl Into<Literal>) -> Self {
        FilterNode::Compare {
            member: member.to_string(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn gt(member: &str, value: impl Into<Literal>) -> Self {
        FilterNode::Compare {
            member: member.to_string(),
            op: CompareOp::Gt,
            value: value.into(),
        }
    }

    pub fn gte(member: &str, value: impl Into<Literal>) -> Self {
        FilterNode::Compare {
            member: member.to_string(),
            op: CompareOp::Gte,
            value: value.into(),
        }
    }

    pub fn lt(member: &str, value: impl Into<Literal>) -> Self {
        FilterNode::Compare {
            member: member.to_string(),
            op: CompareOp::Lt,
            value: value.into(),
        }
    }

    pub fn lte(member: &str, value: impl Into<Literal>) -> Self {
        FilterNode::Compare {
            member: member.to_string(),
            op: CompareOp::Lte,
            value: value.into(),
        }
    }

    pub fn and(left: FilterNode, right: FilterNode) -> Self {
        FilterNode::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: FilterNode, right: FilterNode) -> Self {
        FilterNode::Or(Box::new(left), Box::new(right))
    }

    pub fn is_true(member: &str) -> Self {
        FilterNode::MemberIsTrue {
            member: member.to_string(),
        }
    }

    pub fn starts_with(member: &str, prefix: &str) -> Self {
        FilterNode::MethodCall {
            member: member.to_string(),
            method: "startsWith".to_string(),
            arg: Literal::String(prefix.to_string()),
        }
    }

    pub fn equals(member: &str, arg: impl Into<Literal>) -> Self {
        FilterNode::MethodCall {
            member: member.to_string(),
            method: "equals".to_string(),
            arg: arg.into(),
        }
    }
}

/// Sort direction for an order-by clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A typed query over one collection: filter clauses (conjoined in textual
/// order), sort keys, paging, and an optional field projection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<FilterNode>,
    pub sort: Vec<(String, SortDirection)>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub fields: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter clause; multiple clauses are conjoined.
    pub fn filter(mut self, node: FilterNode) -> Self {
        self.filters.push(node);
        self
    }

    pub fn eq(self, member: &str, value: impl Into<Literal>) -> Self {
        self.filter(FilterNode::eq(member, value))
    }

    pub fn gt(self, member: &str, value: impl Into<Literal>) -> Self {
        self.filter(FilterNode::gt(member, value))
    }

    pub fn gte(self, member: &str, value: impl Into<Literal>) -> Self {
        self.filter(FilterNode::gte(member, value))
    }

    pub fn lt(self, member: &str, value: impl Into<Literal>) -> Self {
        self.filter(FilterNode::lt(member, value))
    }

    pub fn lte(self, member: &str, value: impl Into<Literal>) -> Self {
        self.filter(FilterNode::lte(member, value))
    }

    pub fn is_true(self, member: &str) -> Self {
        self.filter(FilterNode::is_true(member))
    }

    pub fn starts_with(self, member: &str, prefix: &str) -> Self {
        self.filter(FilterNode::starts_with(member, prefix))
    }

    pub fn ascending(mut self, member: &str) -> Self {
        self.sort.push((member.to_string(), SortDirection::Ascending));
        self
    }

    pub fn descending(mut self, member: &str) -> Self {
        self.sort
            .push((member.to_string(), SortDirection::Descending));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn take(mut self, n: u64) -> Self {
        self.take = Some(n);
        self
    }

    /// Project the result down to the given members (plus the id).
    pub fn select<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = members.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_accumulates_clauses() {
        let query = Query::new()
            .eq("name", "Alice")
            .gt("age", 21)
            .descending("age")
            .skip(10)
            .take(5)
            .select(["name", "age"]);

        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.sort.len(), 1);
        assert_eq!(query.skip, Some(10));
        assert_eq!(query.take, Some(5));
        assert_eq!(query.fields, vec!["name", "age"]);
    }

    #[test]
    fn test_literal_conversions() {
        assert_eq!(Literal::from("x"), Literal::String("x".to_string()));
        assert_eq!(Literal::from(3i64), Literal::Integer(3));
        assert_eq!(Literal::from(true), Literal::Bool(true));
    }
}
