//! # wasmbus
//!
//! Lattice control-plane RPC conventions layered over a publish/subscribe
//! message bus. This crate provides the transport-agnostic building blocks
//! shared by every lattice API:
//!
//! - [`Bus`]: publish, correlated request/reply, and subscriptions with a
//!   bounded backlog. [`NatsBus`] is the default transport; [`InprocBus`] is
//!   an in-process transport used for embedding and tests.
//! - [`Message`]: the subject/reply/headers/data envelope, plus the
//!   mimetype-driven JSON/YAML codec in [`codec`].
//! - [`lattice_request`]: a typed one-shot request (encode, request,
//!   decode).
//! - [`Server`]: a subject-keyed handler registry with one worker per
//!   subscription, an out-of-band error stream, and graceful drain.
//! - [`RequestHandler`]: a generic `(Request, Response)` pipeline with
//!   injectable decode/pre/encode/post hooks.
//! - [`TypedHandler`]: dispatch over multiple request shapes sharing one
//!   subject, keyed on an in-body discriminator.
//!
//! Higher-level lattice APIs (control, wadm, events, secrets, policy) are
//! built on these primitives in their own crates.

mod bus;
mod client;
pub mod codec;
mod context;
mod error;
mod inproc;
mod message;
mod nats;
mod server;

pub use bus::{Bus, DrainTrigger, Subscription, NO_BACKLOG, PATTERN_ALL};
pub use client::lattice_request;
pub use codec::{decode, encode, encode_mimetype};
pub use context::Context;
pub use error::Error;
pub use inproc::InprocBus;
pub use message::Message;
pub use nats::NatsBus;
pub use server::{
    AnyServerHandler, RequestHandler, Server, ServerError, ServerHandlerFunc, TypedHandler,
};
