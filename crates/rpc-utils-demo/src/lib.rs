//! Arithmetic demo service for `rpc-utils` and the client walkthrough that
//! exercises it. The `example-server` and `example-client` binaries are thin
//! command-line shells around this library.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod scenario;
pub mod service;
pub mod signals;

pub use error::Error;
pub use scenario::{ScenarioReport, run_scenario};
pub use service::{FUNCTIONS, register_demo_functions};
