//! Thin client and server wrappers for calling named functions across
//! processes, plus the small helpers that usually travel with them: a
//! process-wide logger, a stopwatch and endpoint validation.
//!
//! The wire protocol is a length-prefixed, checksummed frame carrying CBOR
//! envelopes. Applications only see function names, argument tuples, typed
//! results and typed errors.
//!
//! # Example
//!
//! ```no_run
//! use rpc_utils::{ClientWrapper, ServerWrapper};
//!
//! fn example() -> rpc_utils::Result<()> {
//!     let server = ServerWrapper::new(0)?;
//!     server.bind("add", |a: f64, b: f64| a + b)?;
//!     server.async_run(2)?;
//!
//!     let client = ClientWrapper::new("127.0.0.1", server.port(), 5000)?;
//!     let sum: f64 = client.call("add", (1.5, 2.0))?;
//!     assert_eq!(sum, 3.5);
//!
//!     server.stop();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod error;
pub mod handler;
pub mod logger;
pub mod protocol;
pub mod server;
pub mod timer;
pub mod validation;

// Re-export commonly used types
pub use client::{ClientConfig, ClientWrapper, ConnectionState, Payload, PendingCall};
pub use error::{CodecError, Error, HandlerError, ProtocolError, Result};
pub use handler::{FallibleHandler, Handler};
pub use logger::LogLevel;
pub use protocol::args::IntoArgs;
pub use server::{ServerConfig, ServerWrapper, StopHandle};
pub use timer::Timer;
pub use validation::{DEFAULT_PORT, default_port, format_error, is_valid_host, is_valid_port};

// Re-export dependencies that are part of our public API
pub use ciborium::Value;
