//! Minting exchange clients bound to a shared backend.
//!
//! A factory hides the details of constructing a concrete
//! [`super::ExchangeTransport`] behind a single entry point so user and
//! agent code can create clients without knowing which backend (in-memory,
//! HTTP) they are talking to.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ExchangeError;
use crate::exchange::transport::{AgentRegistration, ExchangeTransport};
use crate::identifier::EntityId;

/// Produces exchange clients bound to a particular backend.
///
/// Implementations must be cheaply cloneable: a factory is typically
/// shared between a launcher and every agent it starts so all clients
/// reach the same underlying exchange.
#[async_trait]
pub trait ExchangeFactory: Send + Sync {
    /// Creates a transport bound to `mailbox_id`, or to a freshly minted
    /// user mailbox if `mailbox_id` is `None`.
    async fn create_transport(
        &self,
        mailbox_id: Option<EntityId>,
        name: Option<String>,
        registration: Option<AgentRegistration>,
    ) -> Result<Arc<dyn ExchangeTransport>, ExchangeError>;
}
