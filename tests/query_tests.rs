//! Wire-format tests for query translation. The strings asserted here are
//! the backend's dialect verbatim; they must not drift.

use chrono::{TimeZone, Utc};
use nimbus_client::{FieldMap, FilterNode, Query, QueryTranslator};

fn translator() -> QueryTranslator {
    QueryTranslator::new(
        FieldMap::new()
            .field("id", "_id")
            .field("name", "name")
            .field("age", "age")
            .field("active", "active")
            .field("joined_at", "joined_at"),
    )
}

#[test]
fn test_equality_round_trip() {
    let translated = translator()
        .translate(&Query::new().eq("name", "James Dean"))
        .unwrap();
    assert_eq!(translated.filter, r#"{"name":"James Dean"}"#);
    assert_eq!(translated.query_string(), r#"{"name":"James Dean"}"#);
}

#[test]
fn test_descending_sort_on_mapped_id() {
    let translated = translator()
        .translate(&Query::new().descending("id"))
        .unwrap();
    assert_eq!(translated.filter, "{}");
    assert_eq!(translated.modifiers, vec![r#"&sort={"_id":-1}"#.to_string()]);
}

#[test]
fn test_or_shape() {
    let translated = translator()
        .translate(&Query::new().filter(FilterNode::or(
            FilterNode::eq("name", "x"),
            FilterNode::eq("age", "y"),
        )))
        .unwrap();
    assert_eq!(translated.filter, r#"{"$or":[{"name":"x"},{"age":"y"}]}"#);
}

#[test]
fn test_and_preserves_right_then_left_emission() {
    let translated = translator()
        .translate(&Query::new().filter(FilterNode::and(
            FilterNode::eq("name", "a"),
            FilterNode::lt("age", 30),
        )))
        .unwrap();
    assert_eq!(translated.filter, r#"{"age":{"$lt":30},"name":"a"}"#);
}

#[test]
fn test_full_query_string_with_all_modifiers() {
    let translated = translator()
        .translate(
            &Query::new()
                .gte("age", 18)
                .ascending("name")
                .descending("age")
                .skip(20)
                .take(10)
                .select(["name", "age"]),
        )
        .unwrap();
    assert_eq!(
        translated.query_string(),
        r#"{"age":{"$gte":18}}&sort={"name":1,"age":-1}&skip=20&limit=10&fields=name,age"#
    );
}

#[test]
fn test_date_range_uses_canonical_format() {
    let cutoff = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let translated = translator()
        .translate(&Query::new().lt("joined_at", cutoff))
        .unwrap();
    assert_eq!(
        translated.filter,
        r#"{"joined_at":{"$lt":"2024-03-01T12:00:00.000Z"}}"#
    );
}

#[test]
fn test_starts_with_emits_anchored_regex() {
    let translated = translator()
        .translate(&Query::new().starts_with("name", "Jam"))
        .unwrap();
    assert_eq!(translated.filter, r#"{"name":{"$regex":"^Jam"}}"#);
}

#[test]
fn test_boolean_member_access() {
    let translated = translator()
        .translate(&Query::new().is_true("active"))
        .unwrap();
    assert_eq!(translated.filter, r#"{"active":true}"#);
}

#[test]
fn test_unmapped_member_is_a_translation_error() {
    let err = translator()
        .translate(&Query::new().eq("nickname", "x"))
        .unwrap_err();
    assert_eq!(err.code(), "TRANSLATION");
    assert!(err.to_string().contains("nickname"));
}

#[test]
fn test_unsupported_method_is_a_translation_error() {
    use nimbus_client::Literal;

    let err = translator()
        .translate(&Query::new().filter(FilterNode::MethodCall {
            member: "name".to_string(),
            method: "contains".to_string(),
            arg: Literal::String("x".to_string()),
        }))
        .unwrap_err();
    assert_eq!(err.code(), "TRANSLATION");
}
