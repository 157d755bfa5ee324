//! Core domain + send governance for the sendgate messaging gateway.
//!
//! This crate is framework-agnostic. The chat-session client and the HTTP
//! surface live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod governance;
pub mod history;
pub mod logging;
pub mod messaging;
pub mod ports;

pub use errors::{Error, Result};
