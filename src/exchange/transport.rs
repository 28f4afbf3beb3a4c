//! Low-level exchange transport contract.
//!
//! An [`ExchangeTransport`] is bound to a single mailbox and speaks whatever
//! wire protocol a concrete implementation chooses (in-process shared
//! state, HTTP, or otherwise). [`ExchangeClient`] and its subtypes are built
//! on top of a transport and never manipulate mailboxes directly.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ExchangeError;
use crate::identifier::EntityId;
use crate::message::Message;

/// Lifecycle state of a mailbox, as observed from outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxStatus {
    /// The mailbox exists and accepts messages.
    Active,
    /// The mailbox has been permanently closed.
    Terminated,
    /// No mailbox is registered under the queried id.
    Missing,
}

/// Registration record returned by the exchange when an agent's mailbox is
/// created.
///
/// Opaque to the agent beyond carrying the id it was assigned; passed back
/// to [`super::ExchangeFactory::create_agent_client`] to attach a live
/// transport to an already-registered mailbox.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentRegistration {
    agent_id: crate::identifier::AgentId,
    /// Behavior type names, most-derived first, used for discovery
    /// filtering.
    behavior_mro: Vec<String>,
    created_at: DateTime<Utc>,
}

impl AgentRegistration {
    /// Builds a registration for `agent_id` implementing `behavior_mro`.
    #[must_use]
    pub fn new(agent_id: crate::identifier::AgentId, behavior_mro: Vec<String>) -> Self {
        Self {
            agent_id,
            behavior_mro,
            created_at: Utc::now(),
        }
    }

    /// The registered agent's id.
    #[must_use]
    pub fn agent_id(&self) -> &crate::identifier::AgentId {
        &self.agent_id
    }

    /// Behavior type names, most-derived first.
    #[must_use]
    pub fn behavior_mro(&self) -> &[String] {
        &self.behavior_mro
    }

    /// `true` if `behavior` appears in the MRO at the position required by
    /// `allow_subclasses` (any position when true, index 0 only otherwise).
    #[must_use]
    pub fn implements(&self, behavior: &str, allow_subclasses: bool) -> bool {
        if allow_subclasses {
            self.behavior_mro.iter().any(|b| b == behavior)
        } else {
            self.behavior_mro.first().is_some_and(|b| b == behavior)
        }
    }

    /// When the exchange created this registration.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Transport-level operations a concrete exchange backend must implement.
///
/// A transport instance is bound to exactly one mailbox (`mailbox_id`) but
/// can address any other mailbox registered with the same exchange for
/// `send`, `status`, `discover`, and `terminate`.
#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    /// The mailbox this transport instance is bound to.
    fn mailbox_id(&self) -> &EntityId;

    /// Registers a new agent mailbox and returns its registration.
    async fn register_agent(
        &self,
        behavior_mro: Vec<String>,
        name: Option<String>,
        preset_agent_id: Option<crate::identifier::AgentId>,
    ) -> Result<AgentRegistration, ExchangeError>;

    /// Enqueues `message` on its destination's mailbox.
    async fn send(&self, message: Message) -> Result<(), ExchangeError>;

    /// Dequeues the next message addressed to this transport's mailbox,
    /// waiting up to `timeout`.
    async fn recv(&self, timeout: Duration) -> Result<Message, ExchangeError>;

    /// Current status of a mailbox.
    async fn status(&self, uid: &EntityId) -> Result<MailboxStatus, ExchangeError>;

    /// Permanently closes a mailbox. A no-op if already terminated or
    /// missing.
    async fn terminate(&self, uid: &EntityId) -> Result<(), ExchangeError>;

    /// Returns agent ids whose mailbox is active and whose behavior MRO
    /// satisfies `behavior`/`allow_subclasses`.
    async fn discover(
        &self,
        behavior: &str,
        allow_subclasses: bool,
    ) -> Result<Vec<crate::identifier::AgentId>, ExchangeError>;

    /// Releases any resources held by this transport instance. Does not
    /// terminate the bound mailbox.
    async fn close(&self);
}
