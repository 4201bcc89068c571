//! # Wire Value Model
//!
//! The tagged union transmitted inside message payloads. Plain JSON covers
//! primitives, lists, and maps; everything richer rides on reserved object
//! markers so any JSON peer can produce and consume it:
//!
//! - `{"__handle__": id, "__type__": t, "fields": {..}}`: a live host object
//! - `{"__ref__": {"type": t, "id": s}}`: a stable external reference
//! - `{"__value__": t, "fields": {..}}`: a by-value construction request
//! - `{"__uuid__": "..."}`: a UUID
//! - `{"__enum__": t, "name": n}`: an enum constant by name
//!
//! Conversion to and from `serde_json::Value` is total: unknown shapes decode
//! as plain maps rather than failing, which keeps older scripts working
//! against newer hosts.

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use serde_json::Value as Json;
use uuid::Uuid;

/// A value as it appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<WireValue>),
    Map(BTreeMap<String, WireValue>),
    Uuid(Uuid),
    /// Enum constant referenced by type and name.
    Enum { type_name: String, name: String },
    /// Reference to a live host object by registry handle. `fields` carries a
    /// best-effort projection the script can read without further calls.
    Handle {
        id: u64,
        type_name: Option<String>,
        fields: Option<BTreeMap<String, WireValue>>,
    },
    /// External reference resolved by a stable string key, independent of the
    /// handle registry (e.g. an actor's unique id).
    Ref { ref_type: String, id: String },
    /// Request to construct a fresh host value from a type tag and fields.
    Value {
        type_name: String,
        fields: BTreeMap<String, WireValue>,
    },
}

impl WireValue {
    /// Convenience constructor for string values.
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(n) => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Encode into plain JSON.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(n) => json!(n),
            Self::Float(n) => json!(n),
            Self::Str(s) => Json::String(s.clone()),
            Self::List(items) => Json::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => {
                let mut obj = serde_json::Map::new();
                for (key, value) in map {
                    obj.insert(key.clone(), value.to_json());
                }
                Json::Object(obj)
            }
            Self::Uuid(uuid) => json!({ "__uuid__": uuid.to_string() }),
            Self::Enum { type_name, name } => json!({ "__enum__": type_name, "name": name }),
            Self::Handle {
                id,
                type_name,
                fields,
            } => {
                let mut obj = serde_json::Map::new();
                obj.insert("__handle__".into(), json!(id));
                if let Some(type_name) = type_name {
                    obj.insert("__type__".into(), Json::String(type_name.clone()));
                }
                if let Some(fields) = fields {
                    let mut field_obj = serde_json::Map::new();
                    for (key, value) in fields {
                        field_obj.insert(key.clone(), value.to_json());
                    }
                    obj.insert("fields".into(), Json::Object(field_obj));
                }
                Json::Object(obj)
            }
            Self::Ref { ref_type, id } => json!({ "__ref__": { "type": ref_type, "id": id } }),
            Self::Value { type_name, fields } => {
                let mut field_obj = serde_json::Map::new();
                for (key, value) in fields {
                    field_obj.insert(key.clone(), value.to_json());
                }
                json!({ "__value__": type_name, "fields": field_obj })
            }
        }
    }

    /// Decode from plain JSON. Total: anything unrecognized stays a map.
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => Self::Str(s.clone()),
            Json::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            Json::Object(obj) => Self::from_object(obj),
        }
    }

    fn from_object(obj: &serde_json::Map<String, Json>) -> Self {
        if let Some(handle) = obj.get("__handle__").and_then(Json::as_u64) {
            return Self::Handle {
                id: handle,
                type_name: obj
                    .get("__type__")
                    .and_then(Json::as_str)
                    .map(str::to_string),
                fields: obj
                    .get("fields")
                    .and_then(Json::as_object)
                    .map(Self::fields_from_object),
            };
        }

        if let Some(reference) = obj.get("__ref__").and_then(Json::as_object) {
            let ref_type = reference.get("type").and_then(Json::as_str);
            let id = reference.get("id").and_then(Json::as_str);
            if let (Some(ref_type), Some(id)) = (ref_type, id) {
                return Self::Ref {
                    ref_type: ref_type.to_string(),
                    id: id.to_string(),
                };
            }
        }

        if let Some(type_name) = obj.get("__value__").and_then(Json::as_str) {
            let fields = obj
                .get("fields")
                .and_then(Json::as_object)
                .map(Self::fields_from_object)
                .unwrap_or_default();
            return Self::Value {
                type_name: type_name.to_string(),
                fields,
            };
        }

        if let Some(text) = obj.get("__uuid__").and_then(Json::as_str) {
            if let Ok(uuid) = Uuid::parse_str(text) {
                return Self::Uuid(uuid);
            }
        }

        if let Some(type_name) = obj.get("__enum__").and_then(Json::as_str) {
            if let Some(name) = obj.get("name").and_then(Json::as_str) {
                return Self::Enum {
                    type_name: type_name.to_string(),
                    name: name.to_string(),
                };
            }
        }

        Self::Map(Self::fields_from_object(obj))
    }

    fn fields_from_object(obj: &serde_json::Map<String, Json>) -> BTreeMap<String, WireValue> {
        obj.iter()
            .map(|(key, value)| (key.clone(), Self::from_json(value)))
            .collect()
    }
}

impl Default for WireValue {
    fn default() -> Self {
        Self::Null
    }
}

impl Serialize for WireValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WireValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Ok(Self::from_json(&json))
    }
}
