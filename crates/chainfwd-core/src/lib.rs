//! Core of the chain-forward bot: relays link posts from a source channel through
//! a converter bot into a target channel.
//!
//! Framework-agnostic. Telegram lives behind the [`messaging::port::ChatTransport`]
//! port, implemented in the adapter crate.

pub mod chain;
pub mod chats;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod links;
pub mod logging;
pub mod messaging;
pub mod registry;
pub mod security;
pub mod store;
pub mod wizard;

#[cfg(test)]
mod test_support;

pub use errors::{Error, Result};
