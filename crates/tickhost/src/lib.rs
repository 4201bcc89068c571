//! # tickhost
//!
//! The host-side model of the bridge: object handles, call dispatch, batch
//! execution, the main-thread queue, and cancellable event delivery. This
//! crate knows nothing about sockets or processes; `tickrun` wires it to
//! the actual transport and script lifecycle.

pub mod api;
pub mod batch;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod object;
pub mod queue;
pub mod registry;
pub mod value;

pub use api::FacadeMap;
pub use api::HostApi;
pub use batch::run_batch;
pub use codec::Deserializer;
pub use codec::Serializer;
pub use dispatch::Dispatcher;
pub use error::CallError;
pub use error::CallResult;
pub use event::dispatch as dispatch_event;
pub use event::dispatch_batch as dispatch_event_batch;
pub use event::BatchOutcome;
pub use event::EventOutcome;
pub use event::EventOverride;
pub use event::EventTarget;
pub use event::EventWaiter;
pub use event::HostEvent;
pub use event::HostEventBatch;
pub use event::Projection;
pub use object::Capability;
pub use object::CapabilityTable;
pub use object::HostObject;
pub use object::ParamKind;
pub use queue::main_queue;
pub use queue::MainQueue;
pub use queue::MainQueueWorker;
pub use queue::TickClock;
pub use registry::ObjectRegistry;
pub use registry::NULL_HANDLE;
pub use value::EnumValue;
pub use value::HostValue;
pub use value::ObjectRef;
