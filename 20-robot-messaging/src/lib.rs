//! Request/response messaging between simulation processes over TCP.
//!
//! Every exchange uses its own connection: the client connects, writes one
//! framed request, reads one framed response, and both sides close. Each
//! module focuses on one piece:
//!
//! - [`message`] defines [`Message`] and the [`MessageKind`] discriminant.
//! - [`codec`] frames messages as `[kind][length][body]` for tokio's
//!   `Framed` streams.
//! - [`service`] owns the runtime whose workers run every session.
//! - [`session`] holds the single-use server and client sessions.
//! - [`server`] accepts connections and spawns a session for each.
//! - [`client`] resolves, connects, and drives one session per dispatch.
//! - [`handler`] is the contract a domain object implements to take part.
//! - [`world`] is a small robot world implementing that contract.
//! - [`cli`] and [`config`] cover ports, limits and defaults.
//!
//! Integration tests use this crate directly to run real servers and
//! clients over loopback.

pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod server;
pub mod service;
pub mod session;
pub mod world;

pub use client::Client;
pub use error::MessagingError;
pub use handler::{RequestHandler, ResponseHandler};
pub use message::{Message, MessageKind};
pub use server::{Server, ServerHandle};
pub use service::CommunicationService;
