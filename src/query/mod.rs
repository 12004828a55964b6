//! Typed query expressions and their translation to the backend dialect.
//!
//! A [`Query`] is built fluently against member names of the entity shape;
//! the [`QueryTranslator`] maps members to wire names through an explicit
//! [`FieldMap`] and emits the literal wire query string: a Mongo-style
//! filter object plus URL modifier tokens.

mod ast;
mod translator;

pub use ast::{CompareOp, FilterNode, Literal, Query, SortDirection};
pub use translator::{FieldMap, QueryTranslator, TranslatedQuery};
