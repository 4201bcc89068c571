//! # Host API Surface
//!
//! The seam between the generic bridge machinery and a concrete game host.
//! The host supplies named singleton facades, resolves stable external
//! references, and constructs by-value types; everything else is generic.

use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::value::EnumValue;
use crate::value::HostValue;
use crate::value::ObjectRef;

/// What a concrete host must provide to back a bridge.
pub trait HostApi: Send + Sync {
    /// Look up a named singleton target, e.g. `"server"` or `"chat"`.
    fn facade(&self, name: &str) -> Option<ObjectRef>;

    /// Resolve a stable external reference, e.g. an actor by unique id.
    /// `None` means the thing does not exist right now.
    fn resolve_ref(&self, ref_type: &str, id: &str) -> Option<ObjectRef>;

    /// Build a by-value host type from a type tag and fields, e.g. a
    /// vector from `{x, y, z}`. `None` means the tag is unknown, in which
    /// case the raw fields flow through as a plain map.
    fn construct(&self, type_name: &str, fields: &BTreeMap<String, HostValue>) -> Option<HostValue>;

    /// Interpret an enum constant. The default keeps it symbolic, which is
    /// enough for hosts that match on type and name at the point of use.
    fn enum_value(&self, type_name: &str, name: &str) -> Option<HostValue> {
        Some(HostValue::Enum(EnumValue::new(type_name, name)))
    }

    /// A script registered a command. Hosts that route player commands
    /// hook their command table in here.
    fn command_registered(&self, _name: &str, _permission: Option<&str>) {}

    /// Session-level diagnostics worth surfacing to operators, beyond the
    /// logs.
    fn debug_broadcast(&self, _message: &str) {}
}

/// Simple facade directory for hosts that register singletons up front.
#[derive(Default)]
pub struct FacadeMap {
    facades: DashMap<String, ObjectRef>,
}

impl FacadeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, facade: ObjectRef) {
        self.facades.insert(name.into(), facade);
    }

    pub fn get(&self, name: &str) -> Option<ObjectRef> {
        self.facades.get(name).map(|entry| entry.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.facades.iter().map(|entry| entry.key().clone()).collect()
    }
}
