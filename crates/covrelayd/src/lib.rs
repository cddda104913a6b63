//! covrelayd: public coverage API in front of the coverage registry
//!
//! Serves the registry's operations on a public port, runs the registry
//! itself on an ephemeral loopback port, and publishes every profile it
//! serves together with repository and CI provenance.

pub mod app;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod proxy;

pub use app::{run, serve};
pub use config::Config;
pub use error::RelayError;
pub use lifecycle::{CoverageServer, InternalServer};
pub use proxy::{ProfileResponse, Relay, RelaySettings};
