//! WebSocket transport: wire protocol, encoding and connection handling

pub mod codec;
pub mod handler;
pub mod protocol;

pub use codec::{CodecError, JsonCodec, WireCodec};
pub use protocol::{ClientMsg, ServerMsg, StateUpdate};
