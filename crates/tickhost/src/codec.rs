//! # Value Codec
//!
//! Translates between host values and wire values against one session's
//! registry. Serialization registers objects on first sight and emits a
//! handle plus a field projection; if the same object reappears within one
//! serialization pass it degrades to a shallow handle with identity fields
//! only, which keeps cyclic object graphs finite on the wire.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::sync::Arc;

use tickwire::WireValue;

use crate::api::HostApi;
use crate::error::CallError;
use crate::error::CallResult;
use crate::registry::ObjectRegistry;
use crate::value::HostValue;
use crate::value::ObjectRef;

/// Host-to-wire conversion for one session.
pub struct Serializer<'a> {
    registry: &'a ObjectRegistry,
}

impl<'a> Serializer<'a> {
    pub fn new(registry: &'a ObjectRegistry) -> Self {
        Self { registry }
    }

    /// Serialize one value. Each call gets a fresh cycle-detection pass.
    pub fn serialize(&self, value: &HostValue) -> WireValue {
        let mut seen = HashSet::new();
        self.serialize_inner(value, &mut seen)
    }

    fn serialize_inner(&self, value: &HostValue, seen: &mut HashSet<usize>) -> WireValue {
        match value {
            HostValue::Null => WireValue::Null,
            HostValue::Bool(b) => WireValue::Bool(*b),
            HostValue::Int(n) => WireValue::Int(*n),
            HostValue::Float(n) => WireValue::Float(*n),
            HostValue::Str(s) => WireValue::Str(s.clone()),
            HostValue::Uuid(uuid) => WireValue::Uuid(*uuid),
            HostValue::Enum(e) => WireValue::Enum {
                type_name: e.type_name.clone(),
                name: e.name.clone(),
            },
            HostValue::List(items) => WireValue::List(
                items
                    .iter()
                    .map(|item| self.serialize_inner(item, seen))
                    .collect(),
            ),
            HostValue::Map(map) => WireValue::Map(self.serialize_fields(map, seen)),
            HostValue::Object(obj) => self.serialize_object(obj, seen),
        }
    }

    fn serialize_object(&self, obj: &ObjectRef, seen: &mut HashSet<usize>) -> WireValue {
        let handle = self.registry.register(obj);
        let key = Arc::as_ptr(obj) as *const () as usize;
        let fields = if seen.insert(key) {
            obj.fields()
        } else {
            obj.identity_fields()
        };
        WireValue::Handle {
            id: handle,
            type_name: Some(obj.type_name().to_string()),
            fields: Some(self.serialize_fields(&fields, seen)),
        }
    }

    fn serialize_fields(
        &self,
        fields: &BTreeMap<String, HostValue>,
        seen: &mut HashSet<usize>,
    ) -> BTreeMap<String, WireValue> {
        fields
            .iter()
            .map(|(key, value)| (key.clone(), self.serialize_inner(value, seen)))
            .collect()
    }
}

/// Wire-to-host conversion for one session.
pub struct Deserializer<'a> {
    registry: &'a ObjectRegistry,
    api: &'a dyn HostApi,
}

impl<'a> Deserializer<'a> {
    pub fn new(registry: &'a ObjectRegistry, api: &'a dyn HostApi) -> Self {
        Self { registry, api }
    }

    pub fn deserialize(&self, value: &WireValue) -> CallResult<HostValue> {
        match value {
            WireValue::Null => Ok(HostValue::Null),
            WireValue::Bool(b) => Ok(HostValue::Bool(*b)),
            WireValue::Int(n) => Ok(HostValue::Int(*n)),
            WireValue::Float(n) => Ok(HostValue::Float(*n)),
            WireValue::Str(s) => Ok(HostValue::Str(s.clone())),
            WireValue::Uuid(uuid) => Ok(HostValue::Uuid(*uuid)),
            WireValue::Enum { type_name, name } => {
                self.api.enum_value(type_name, name).ok_or_else(|| {
                    CallError::BadArgument(format!("unknown enum `{}`.`{}`", type_name, name))
                })
            }
            WireValue::List(items) => Ok(HostValue::List(
                items
                    .iter()
                    .map(|item| self.deserialize(item))
                    .collect::<CallResult<_>>()?,
            )),
            WireValue::Map(map) => Ok(HostValue::Map(self.deserialize_fields(map)?)),
            // A handle that no longer resolves decodes as null; only the
            // *target* of a call treats a dead handle as an error.
            WireValue::Handle { id, .. } => Ok(match self.registry.get(*id) {
                Some(obj) if !obj.is_gone() => HostValue::Object(obj),
                _ => HostValue::Null,
            }),
            WireValue::Ref { ref_type, id } => Ok(match self.api.resolve_ref(ref_type, id) {
                Some(obj) => HostValue::Object(obj),
                None => HostValue::Null,
            }),
            WireValue::Value { type_name, fields } => {
                let fields = self.deserialize_fields(fields)?;
                Ok(self
                    .api
                    .construct(type_name, &fields)
                    .unwrap_or(HostValue::Map(fields)))
            }
        }
    }

    fn deserialize_fields(
        &self,
        fields: &BTreeMap<String, WireValue>,
    ) -> CallResult<BTreeMap<String, HostValue>> {
        fields
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.deserialize(value)?)))
            .collect()
    }
}
