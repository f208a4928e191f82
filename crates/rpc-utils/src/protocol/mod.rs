//! Wire protocol shared by the client and the server.
//!
//! - Frames: length-prefixed, typed, CRC32-checked
//! - Envelopes: CBOR-encoded requests and responses
//! - Arguments: positional CBOR values built from tuples

pub mod args;
pub mod codec;
pub mod framing;
pub mod message;

pub use framing::{Frame, FrameCodec, FrameType, MAX_FRAME_SIZE};
pub use message::{ErrorInfo, RequestEnvelope, ResponseEnvelope};
