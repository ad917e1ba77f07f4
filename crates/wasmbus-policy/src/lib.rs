//! Server bindings for lattice policy engines.
//!
//! A policy engine listens on a single configured subject; every request
//! carries its operation as an in-body `kind` discriminator
//! (`startComponent`, `startProvider`, `performInvocation`) and is
//! answered with a `{requestId, permitted, message}` decision.

mod api;
mod server;

pub use api::*;
pub use server::Server;
