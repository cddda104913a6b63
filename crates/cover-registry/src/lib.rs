//! cover-registry: coverage collection engine
//!
//! Keeps a file-backed registry of instrumented services and aggregates
//! their cover profiles on demand. Exposes `register`, `profile`, `clear`,
//! `init`, `list` and `remove` over HTTP.

pub mod client;
pub mod error;
pub mod profile;
pub mod server;
pub mod store;

pub use client::CoverClient;
pub use error::{RegistryError, Result};
pub use profile::{Mode, Profile};
pub use server::{client_ip, ProfileParam, Registry, RegistrySettings, SelectParam};
pub use store::{FileStore, ServiceMap};
