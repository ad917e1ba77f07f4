//! Client and server bindings for the lattice control API.
//!
//! Every operation lives on `ctl.v1.<lattice>.<entity>.<op>[.<host-or-name>]`
//! and answers with the `{success, message, response}` envelope. The
//! [`Client`] issues one-shot requests plus the scatter-gather host ping;
//! the [`Server`] wires an [`Api`] implementation into a
//! [`wasmbus::Server`], one subject per operation.

mod api;
mod client;
mod server;

pub use api::*;
pub use client::{Client, ClientBuilder};
pub use server::Server;
