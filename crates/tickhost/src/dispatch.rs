//! # Call Dispatch
//!
//! Turns one inbound call request into one outbound response. Resolution
//! order: find the target (handle or named facade), check liveness, handle
//! the built-in `close` / `get_attr` / `set_attr` forms, then select a
//! capability overload by name, arity, and argument conversion.

use std::sync::Arc;

use tickwire::CallRequest;
use tickwire::Message;
use tickwire::WireValue;

use crate::api::HostApi;
use crate::codec::Deserializer;
use crate::codec::Serializer;
use crate::error::CallError;
use crate::error::CallResult;
use crate::registry::ObjectRegistry;
use crate::value::HostValue;
use crate::value::ObjectRef;

pub struct Dispatcher {
    registry: Arc<ObjectRegistry>,
    api: Arc<dyn HostApi>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ObjectRegistry>, api: Arc<dyn HostApi>) -> Self {
        Self { registry, api }
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    /// Execute one call and build its wire response.
    pub fn dispatch(&self, call: &CallRequest) -> Message {
        match self.execute(call) {
            Ok(result) => Message::ret(call.id, result),
            Err(err) => {
                tracing::debug!(id = call.id, method = %call.method, error = %err, "call failed");
                error_response(call.id, &err)
            }
        }
    }

    fn execute(&self, call: &CallRequest) -> CallResult<WireValue> {
        let target = match self.resolve_target(call)? {
            Resolved::Object(obj) => obj,
            Resolved::ClosedAlready => return Ok(WireValue::Null),
        };

        if target.is_gone() {
            // `close` stays idempotent even after the object left the world.
            if call.method == "close" {
                self.release_target(call);
                return Ok(WireValue::Null);
            }
            return Err(CallError::TargetGone);
        }

        let caps = target.capabilities();
        if !caps.contains(&call.method) {
            match call.method.as_str() {
                "close" => {
                    self.release_target(call);
                    return Ok(WireValue::Null);
                }
                "get_attr" => return self.get_attr(call, &target),
                "set_attr" => return self.set_attr(call, &target),
                _ => {}
            }
        }

        let deserializer = Deserializer::new(&self.registry, self.api.as_ref());
        let args = call
            .args_list
            .iter()
            .map(|arg| deserializer.deserialize(arg))
            .collect::<CallResult<Vec<_>>>()?;

        let Some((capability, args)) = caps.select(&call.method, &args) else {
            return Err(CallError::NoSuchMethod {
                type_name: target.type_name().to_string(),
                method: call.method.clone(),
                arity: args.len(),
            });
        };

        let result = capability.invoke(&target, args)?;
        Ok(Serializer::new(&self.registry).serialize(&result))
    }

    fn resolve_target(&self, call: &CallRequest) -> CallResult<Resolved> {
        if let Some(handle) = call.handle {
            return match self.registry.get(handle) {
                Some(obj) => Ok(Resolved::Object(obj)),
                // The handle was already dropped. Closing twice is fine,
                // anything else is an error the script must handle.
                None if call.method == "close" => Ok(Resolved::ClosedAlready),
                None => Err(CallError::TargetGone),
            };
        }
        if let Some(name) = &call.target {
            return self
                .api
                .facade(name)
                .map(Resolved::Object)
                .ok_or_else(|| CallError::UnknownTarget(name.clone()));
        }
        Err(CallError::BadArgument("call names no target".into()))
    }

    fn release_target(&self, call: &CallRequest) {
        if let Some(handle) = call.handle {
            self.registry.release(&[handle]);
        }
    }

    fn get_attr(&self, call: &CallRequest, target: &ObjectRef) -> CallResult<WireValue> {
        let field = required_field(call)?;
        let value = target.get_attr(field).ok_or_else(|| {
            CallError::BadArgument(format!(
                "`{}` has no readable field `{}`",
                target.type_name(),
                field
            ))
        })?;
        Ok(Serializer::new(&self.registry).serialize(&value))
    }

    fn set_attr(&self, call: &CallRequest, target: &ObjectRef) -> CallResult<WireValue> {
        let field = required_field(call)?;
        let value = match &call.value {
            Some(value) => {
                Deserializer::new(&self.registry, self.api.as_ref()).deserialize(value)?
            }
            None => HostValue::Null,
        };
        target.set_attr(field, value)?;
        Ok(WireValue::Null)
    }
}

enum Resolved {
    Object(ObjectRef),
    ClosedAlready,
}

fn required_field(call: &CallRequest) -> CallResult<&str> {
    call.field
        .as_deref()
        .ok_or_else(|| CallError::BadArgument("attribute access without a `field`".into()))
}

/// Build the wire error for a failed call, attaching a code when one exists.
pub fn error_response(id: i64, err: &CallError) -> Message {
    match err.code() {
        Some(code) => Message::error_with_code(id, err.to_string(), code),
        None => Message::error(id, err.to_string()),
    }
}
