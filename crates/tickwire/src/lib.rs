pub mod error;
pub mod frame;
pub mod message;
pub mod value;

pub use error::Result;
pub use error::WireError;
pub use frame::read_frame;
pub use frame::read_message;
pub use frame::write_message;
pub use frame::MAX_AUTH_FRAME_LEN;
pub use frame::MAX_FRAME_LEN;
pub use message::CallRequest;
pub use message::Message;
pub use value::WireValue;

#[cfg(test)]
mod tests;
