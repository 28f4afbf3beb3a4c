//! Networked exchange transport over HTTP.
//!
//! The server side ([`server`]) hosts the mailbox table and exposes it as a
//! small JSON API; the client side ([`client`]) implements
//! [`super::ExchangeTransport`] against that API so agents and users
//! running in a different process (or on a different machine) can join
//! the same exchange.

pub mod auth;
pub mod client;
pub mod config;
pub mod server;

pub use auth::{AuthProvider, SharedSecretAuth};
pub use client::{HttpExchangeFactory, HttpTransport};
pub use config::ExchangeServerConfig;
pub use server::{build_router, ExchangeServerState};
