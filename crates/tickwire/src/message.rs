//! # Message Envelope
//!
//! The framed unit exchanged between host and script, discriminated by a
//! `"type"` tag. Messages are constructed, serialized, framed, and sent;
//! never mutated after send. Unknown fields on inbound messages are ignored
//! for forward compatibility.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::value::WireValue;

/// One call in a `call` or `call_batch` message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallRequest {
    pub id: i64,
    /// Named singleton target. Mutually exclusive with `handle`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Registry handle of the target object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<u64>,
    pub method: String,
    /// Positional arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args_list: Vec<WireValue>,
    /// Keyword arguments, passed through to facade glue.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, WireValue>,
    /// Field name for `get_attr`/`set_attr`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// New value for `set_attr`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<WireValue>,
}

fn default_wait_ticks() -> u64 {
    1
}

/// Every message type on the wire, script→host and host→script.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    // script → host
    Auth {
        token: String,
    },
    Subscribe {
        event: String,
        #[serde(default)]
        once_per_tick: bool,
        #[serde(default)]
        throttle_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<String>,
    },
    Call(CallRequest),
    CallBatch {
        #[serde(default)]
        atomic: bool,
        messages: Vec<CallRequest>,
    },
    Wait {
        id: i64,
        #[serde(default = "default_wait_ticks")]
        ticks: u64,
    },
    RegisterCommand {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        permission: Option<String>,
    },
    EventDone {
        id: i64,
    },
    EventCancel {
        id: i64,
    },
    EventResult {
        id: i64,
        #[serde(default)]
        result: WireValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_type: Option<String>,
    },
    Release {
        handles: Vec<u64>,
    },
    Ready,
    ShutdownAck,

    // host → script
    Event {
        event: String,
        payload: WireValue,
    },
    EventBatch {
        event: String,
        payloads: Vec<WireValue>,
    },
    Return {
        id: i64,
        result: WireValue,
    },
    Error {
        id: i64,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },
    Shutdown,
}

impl Message {
    /// A successful call response.
    pub fn ret(id: i64, result: WireValue) -> Self {
        Self::Return { id, result }
    }

    /// A call error with just a message.
    pub fn error(id: i64, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// A call error with a machine-readable code.
    pub fn error_with_code(id: i64, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Error {
            id,
            message: message.into(),
            code: Some(code.into()),
            details: None,
        }
    }
}
