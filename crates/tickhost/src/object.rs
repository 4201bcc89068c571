//! # Host Objects
//!
//! Anything the script can hold a handle to implements [`HostObject`]. An
//! object advertises its callable surface through a [`CapabilityTable`]:
//! per method name, a list of overloads, each an accepted parameter shape
//! plus an invocation thunk. Dispatch picks the first overload whose shape
//! every argument converts into, mirroring arity-and-type overload
//! resolution without any runtime reflection.

use std::any::Any;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CallError;
use crate::error::CallResult;
use crate::value::HostValue;
use crate::value::ObjectRef;

/// A live object the script addresses by handle.
pub trait HostObject: Send + Sync {
    /// Short type tag shown to the script, e.g. `"Player"`.
    fn type_name(&self) -> &str;

    /// The callable surface of this object.
    fn capabilities(&self) -> &CapabilityTable;

    /// Whether the underlying thing has left the world. A gone object
    /// rejects every call except an idempotent `close`.
    fn is_gone(&self) -> bool {
        false
    }

    /// Projection sent alongside the handle the first time the object is
    /// serialized, so scripts can read common fields without a round trip.
    fn fields(&self) -> BTreeMap<String, HostValue> {
        BTreeMap::new()
    }

    /// Minimal projection used when the object is revisited inside one
    /// serialization pass. Keeping this shallow breaks reference cycles.
    fn identity_fields(&self) -> BTreeMap<String, HostValue> {
        BTreeMap::new()
    }

    /// Dynamic field read, used by the `get_attr` fallback.
    fn get_attr(&self, _name: &str) -> Option<HostValue> {
        None
    }

    /// Dynamic field write, used by the `set_attr` fallback.
    fn set_attr(&self, name: &str, _value: HostValue) -> CallResult<()> {
        Err(CallError::BadArgument(format!(
            "`{}` has no writable field `{}`",
            self.type_name(),
            name
        )))
    }

    fn as_any(&self) -> &dyn Any;
}

/// The shapes a parameter can accept. Conversion is deliberately small:
/// `Null` satisfies every shape, integers and floats convert into each
/// other, everything else must match exactly, and `Any` takes whatever
/// arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Any,
    Bool,
    Int,
    Float,
    Str,
    Uuid,
    Enum,
    List,
    Map,
    Object,
}

impl ParamKind {
    /// Convert an argument into this shape, or report that it does not fit.
    pub fn convert(&self, value: &HostValue) -> Option<HostValue> {
        if value.is_null() {
            return Some(HostValue::Null);
        }
        match (self, value) {
            (Self::Any, v) => Some(v.clone()),
            (Self::Bool, v @ HostValue::Bool(_)) => Some(v.clone()),
            (Self::Int, HostValue::Int(n)) => Some(HostValue::Int(*n)),
            (Self::Int, HostValue::Float(n)) => Some(HostValue::Int(*n as i64)),
            (Self::Float, HostValue::Float(n)) => Some(HostValue::Float(*n)),
            (Self::Float, HostValue::Int(n)) => Some(HostValue::Float(*n as f64)),
            (Self::Str, v @ HostValue::Str(_)) => Some(v.clone()),
            (Self::Uuid, v @ HostValue::Uuid(_)) => Some(v.clone()),
            (Self::Enum, v @ HostValue::Enum(_)) => Some(v.clone()),
            (Self::List, v @ HostValue::List(_)) => Some(v.clone()),
            (Self::Map, v @ HostValue::Map(_)) => Some(v.clone()),
            (Self::Object, v @ HostValue::Object(_)) => Some(v.clone()),
            _ => None,
        }
    }
}

type Invoke = dyn Fn(&ObjectRef, Vec<HostValue>) -> CallResult<HostValue> + Send + Sync;

/// One overload of a method: the parameter shapes it accepts and the thunk
/// that runs it.
pub struct Capability {
    pub params: Vec<ParamKind>,
    invoke: Arc<Invoke>,
}

impl Capability {
    pub fn invoke(&self, target: &ObjectRef, args: Vec<HostValue>) -> CallResult<HostValue> {
        (self.invoke)(target, args)
    }
}

/// Method name to overload list. Built once per object type and shared.
#[derive(Default)]
pub struct CapabilityTable {
    methods: HashMap<String, Vec<Capability>>,
}

impl CapabilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an overload. Overloads for one name are tried in
    /// registration order.
    pub fn method<F>(
        &mut self,
        name: impl Into<String>,
        params: impl Into<Vec<ParamKind>>,
        invoke: F,
    ) -> &mut Self
    where
        F: Fn(&ObjectRef, Vec<HostValue>) -> CallResult<HostValue> + Send + Sync + 'static,
    {
        self.methods.entry(name.into()).or_default().push(Capability {
            params: params.into(),
            invoke: Arc::new(invoke),
        });
        self
    }

    pub fn overloads(&self, name: &str) -> Option<&[Capability]> {
        self.methods.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Pick the first overload with matching arity whose shapes accept every
    /// argument, and return the converted arguments alongside it.
    pub fn select(&self, name: &str, args: &[HostValue]) -> Option<(&Capability, Vec<HostValue>)> {
        let overloads = self.methods.get(name)?;
        'outer: for capability in overloads {
            if capability.params.len() != args.len() {
                continue;
            }
            let mut converted = Vec::with_capacity(args.len());
            for (kind, arg) in capability.params.iter().zip(args) {
                match kind.convert(arg) {
                    Some(value) => converted.push(value),
                    None => continue 'outer,
                }
            }
            return Some((capability, converted));
        }
        None
    }
}

/// Downcast a target to its concrete type inside an invocation thunk.
pub fn downcast<T: 'static>(target: &ObjectRef) -> CallResult<&T> {
    target
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| CallError::app("capability bound to a different concrete type"))
}
