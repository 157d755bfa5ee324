//! REST surface (actix-web).
//!
//! Routes requests to per-tenant send orchestrators built on the shared
//! `sendgate-core` governance state. The chat-session client is reached
//! through a [`router::CapabilityFactory`] so tests can swap it out.

pub mod dto;
pub mod errors;
pub mod extract;
pub mod handlers;
pub mod router;

pub use router::{configure, serve, AppState};
