//! Client, server and manifest model for wadm, the lattice application
//! manager.
//!
//! Operations live on `wadm.api.<lattice>.model.<op>[.<name>]` and answer
//! with the `{result, message, ...}` envelope. Manifests round-trip through
//! JSON and YAML with polymorphic `{type, properties}` traits.

mod client;
mod server;
mod types;

pub use client::Client;
pub use server::{Api, Server};
pub use types::*;

/// Subject prefix for the wadm API.
pub const PREFIX_WADM: &str = "wadm.api";
