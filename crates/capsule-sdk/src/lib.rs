//! capsule-sdk: the capability interface contract
//!
//! Provides:
//! - Function schema types advertised to the model
//! - The line-delimited JSON protocol spoken between host and units
//! - `serve`, the request loop a unit's `main` hands control to
//!
//! A minimal unit:
//!
//! ```rust,ignore
//! use capsule_sdk::{serve, Capability, FunctionSchema, InitContext, ParameterSchema};
//!
//! struct Ping;
//!
//! impl Capability for Ping {
//!     fn init(&mut self, _ctx: &InitContext) -> anyhow::Result<()> { Ok(()) }
//!     fn id(&self) -> String { "ping".into() }
//!     fn description(&self) -> String { "Replies with pong".into() }
//!     fn function_schema(&self) -> FunctionSchema {
//!         FunctionSchema::new("ping", "Replies with pong", ParameterSchema::new())
//!     }
//!     fn execute(&mut self, _arguments: &str) -> anyhow::Result<String> { Ok("pong".into()) }
//! }
//!
//! fn main() -> std::io::Result<()> {
//!     serve(Ping)
//! }
//! ```

pub mod protocol;
pub mod schema;
pub mod serve;

pub use protocol::{is_valid_id, Descriptor, InitContext, Request, Response};
pub use schema::{FunctionSchema, ParameterProperty, ParameterSchema};
pub use serve::{serve, serve_io, Capability};
