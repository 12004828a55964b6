//! Entity contract and wire-level document helpers.
//!
//! Domain records compose [`EntityMeta`] (flattened) to pick up the backend's
//! system fields instead of inheriting from a base entity type.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Wire name of the entity identifier field.
pub const FIELD_ID: &str = "_id";
/// Wire name of the access-control descriptor field.
pub const FIELD_ACL: &str = "_acl";
/// Wire name of the system metadata field.
pub const FIELD_META: &str = "_meta";

/// Prefix of client-generated identifiers assigned to entities created while
/// offline. Replaced by the server-assigned id on first successful push.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Canonical wire format for timestamps (UTC, millisecond precision).
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// A persistable record: serializable, cloneable, and aware of its own id.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn entity_id(&self) -> Option<&str>;
    fn set_entity_id(&mut self, id: String);
}

/// Access-control descriptor attached to every entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acl {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writers: Vec<String>,
}

/// System metadata: entity-created time and last-modified time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lmt: Option<String>,
}

/// The backend's required entity fields, for flattening into domain records:
///
/// ```
/// use nimbus_client::EntityMeta;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Book {
///     #[serde(flatten)]
///     meta: EntityMeta,
///     title: String,
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMeta {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "_acl", skip_serializing_if = "Option::is_none")]
    pub acl: Option<Acl>,
    #[serde(rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Metadata>,
}

impl EntityMeta {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_entity_id(&mut self, id: String) {
        self.id = Some(id);
    }
}

/// Generate a client-local temporary id.
pub fn temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4())
}

/// Whether an id is client-generated and not yet reconciled with the server.
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Current UTC time in the canonical wire format.
pub fn wire_now() -> String {
    Utc::now().format(DATE_FORMAT).to_string()
}

/// Extract the string `_id` of a wire document, if present.
pub fn entity_id_of(value: &Value) -> Option<&str> {
    value.get(FIELD_ID).and_then(Value::as_str)
}

/// Set the `_id` of a wire document in place.
pub fn set_entity_id(value: &mut Value, id: &str) {
    if let Some(obj) = value.as_object_mut() {
        obj.insert(FIELD_ID.to_string(), Value::String(id.to_string()));
    }
}

/// Remove the `_id` of a wire document, returning the removed id.
pub fn clear_entity_id(value: &mut Value) -> Option<String> {
    value
        .as_object_mut()
        .and_then(|obj| obj.remove(FIELD_ID))
        .and_then(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
}

/// Stamp `_meta.lmt` (and `_meta.ect` when absent) on a wire document.
/// The server overwrites both on a successful remote save; local stamps keep
/// cache reads meaningful while offline.
pub fn touch_metadata(value: &mut Value) {
    let now = wire_now();
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let meta = obj
        .entry(FIELD_META)
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    if let Some(meta) = meta.as_object_mut() {
        meta.entry("ect").or_insert_with(|| Value::String(now.clone()));
        meta.insert("lmt".to_string(), Value::String(now));
    }
}
