//! End-to-end encrypted secrets channel for the lattice.
//!
//! Transport encryption uses curve25519 sealed boxes between
//! ed25519-derived curve keys (`nkeys` xkeys): requests are sealed from
//! the requesting host's key to the backend's long-lived key, responses
//! from a fresh ephemeral key back to the host. Identity rides along as
//! wascap-form ed25519 JWTs whose verification key is rebuilt from the
//! token's own `iss` claim.

mod api;
pub mod claims;
mod client;
mod server;

pub use api::*;
pub use client::{Client, ClientError};
pub use server::{Api, Server};
