//! # Call Errors
//!
//! Failures produced while resolving and executing a script call. Each
//! variant maps onto the wire error envelope; variants with a stable
//! machine-readable code expose it through [`CallError::code`].

use std::fmt;

pub type CallResult<T> = std::result::Result<T, CallError>;

#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// The target handle refers to an object that left the world or was
    /// already released.
    TargetGone,
    /// A named singleton target the host does not provide.
    UnknownTarget(String),
    /// No method of this name accepts the given arguments.
    NoSuchMethod {
        type_name: String,
        method: String,
        arity: usize,
    },
    /// An argument could not be converted to any accepted parameter shape.
    BadArgument(String),
    /// A sibling call in an atomic batch failed, so this one was not run.
    AtomicAbort,
    /// Application-level failure raised by the method body itself.
    App(String),
}

impl CallError {
    /// Stable machine-readable code, where one exists.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::TargetGone => Some("ENTITY_GONE"),
            Self::AtomicAbort => Some("ATOMIC_ABORT"),
            _ => None,
        }
    }

    pub fn app(message: impl Into<String>) -> Self {
        Self::App(message.into())
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetGone => write!(f, "target object is no longer available"),
            Self::UnknownTarget(name) => write!(f, "unknown target `{}`", name),
            Self::NoSuchMethod {
                type_name,
                method,
                arity,
            } => write!(
                f,
                "no method `{}` on `{}` taking {} argument(s)",
                method, type_name, arity
            ),
            Self::BadArgument(detail) => write!(f, "bad argument: {}", detail),
            Self::AtomicAbort => write!(f, "aborted by a failing sibling in an atomic batch"),
            Self::App(message) => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for CallError {}
