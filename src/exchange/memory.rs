//! In-process exchange transport.
//!
//! Backs every mailbox with a shared [`MailboxRegistry`], but never records
//! an owner for any mailbox it creates: there is no separate authentication
//! concept in-process, so per spec every mailbox is unowned and any client
//! may access it.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::exchange::factory::ExchangeFactory;
use crate::exchange::registry::MailboxRegistry;
use crate::exchange::transport::{AgentRegistration, ExchangeTransport, MailboxStatus};
use crate::identifier::{AgentId, EntityId, UserId};
use crate::message::Message;

/// Registry of every in-memory exchange created in this process, keyed by
/// the id each [`MemoryExchangeFactory`] serializes as.
///
/// Genuine shared memory cannot cross a process boundary, so a factory
/// deserialized in a different process will only succeed if that process
/// also created (and therefore already holds) an exchange under the same
/// id — the typical case being a `Launcher` spawning worker tasks within
/// the same process rather than a separate one.
fn process_registries() -> &'static DashMap<Uuid, Arc<MailboxRegistry<EntityId>>> {
    static REGISTRIES: OnceLock<DashMap<Uuid, Arc<MailboxRegistry<EntityId>>>> = OnceLock::new();
    REGISTRIES.get_or_init(DashMap::new)
}

/// Shared, in-memory exchange state. Every [`MemoryTransport`] minted from
/// the same [`MemoryExchangeFactory`] sees the same mailboxes.
#[derive(Clone)]
pub struct MemoryExchangeFactory {
    id: Uuid,
    registry: Arc<MailboxRegistry<EntityId>>,
}

impl MemoryExchangeFactory {
    /// Creates a fresh, empty in-memory exchange and registers it in this
    /// process's exchange table so it can be re-resolved after a
    /// serialize/deserialize round trip.
    #[must_use]
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        let registry = Arc::new(MailboxRegistry::new());
        process_registries().insert(id, registry.clone());
        Self { id, registry }
    }
}

impl Default for MemoryExchangeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for MemoryExchangeFactory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MemoryExchangeFactory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let id = Uuid::deserialize(deserializer)?;
        let registry = process_registries()
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| {
                DeError::custom(format!(
                    "no in-memory exchange with id {id} in this process"
                ))
            })?;
        Ok(Self { id, registry })
    }
}

#[async_trait]
impl ExchangeFactory for MemoryExchangeFactory {
    async fn create_transport(
        &self,
        mailbox_id: Option<EntityId>,
        name: Option<String>,
        registration: Option<AgentRegistration>,
    ) -> Result<Arc<dyn ExchangeTransport>, ExchangeError> {
        let mailbox_id = match (mailbox_id, registration) {
            (Some(id), _) => id,
            (None, Some(registration)) => registration.agent_id().clone().into(),
            (None, None) => UserId::with_name(name.unwrap_or_default()).into(),
        };

        self.registry
            .create_mailbox(None, mailbox_id.clone(), None)
            .await?;

        Ok(Arc::new(MemoryTransport {
            mailbox_id,
            registry: self.registry.clone(),
        }))
    }
}

/// An [`ExchangeTransport`] bound to a mailbox in a [`MemoryExchangeFactory`]'s
/// shared registry.
pub struct MemoryTransport {
    mailbox_id: EntityId,
    registry: Arc<MailboxRegistry<EntityId>>,
}

#[async_trait]
impl ExchangeTransport for MemoryTransport {
    fn mailbox_id(&self) -> &EntityId {
        &self.mailbox_id
    }

    async fn register_agent(
        &self,
        behavior_mro: Vec<String>,
        name: Option<String>,
        preset_agent_id: Option<AgentId>,
    ) -> Result<AgentRegistration, ExchangeError> {
        let agent_id = preset_agent_id.unwrap_or_else(|| match name {
            Some(name) => AgentId::with_name(name),
            None => AgentId::new(),
        });
        let entity: EntityId = agent_id.clone().into();
        self.registry
            .create_mailbox(None, entity, Some(behavior_mro.clone()))
            .await?;
        Ok(AgentRegistration::new(agent_id, behavior_mro))
    }

    async fn send(&self, message: Message) -> Result<(), ExchangeError> {
        self.registry.put(Some(&self.mailbox_id), message).await
    }

    async fn recv(&self, timeout: Duration) -> Result<Message, ExchangeError> {
        self.registry
            .get(Some(&self.mailbox_id), &self.mailbox_id, timeout)
            .await
    }

    async fn status(&self, uid: &EntityId) -> Result<MailboxStatus, ExchangeError> {
        self.registry.check_mailbox(Some(&self.mailbox_id), uid).await
    }

    async fn terminate(&self, uid: &EntityId) -> Result<(), ExchangeError> {
        self.registry.terminate(Some(&self.mailbox_id), uid).await
    }

    async fn discover(
        &self,
        behavior: &str,
        allow_subclasses: bool,
    ) -> Result<Vec<AgentId>, ExchangeError> {
        Ok(self
            .registry
            .discover(Some(&self.mailbox_id), behavior, allow_subclasses)
            .await)
    }

    async fn close(&self) {}
}
