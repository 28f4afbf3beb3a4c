//! Shared mailbox bookkeeping used by both the in-memory and HTTP exchange
//! backends.
//!
//! Tracks, per [`EntityId`], which client "owns" the mailbox (the client
//! that created it), the mailbox queue itself, and — for agents — the
//! behavior MRO used for discovery. A mailbox with no recorded owner is
//! treated as unowned and permitted for any caller, matching the behavior
//! of a registry that has not yet recorded a creator for that id.
use dashmap::DashMap;

use crate::error::ExchangeError;
use crate::exchange::transport::MailboxStatus;
use crate::identifier::{AgentId, EntityId};
use crate::mailbox::{Mailbox, MailboxError};
use crate::message::Message;

/// Mailbox table with owner-based permission checks, generic over however
/// a particular transport identifies its calling clients (an `EntityId`
/// for the in-memory transport, an opaque bearer token for the HTTP one).
pub(crate) struct MailboxRegistry<C: Eq + std::hash::Hash + Clone> {
    owners: DashMap<EntityId, Option<C>>,
    mailboxes: DashMap<EntityId, Mailbox>,
    behaviors: DashMap<AgentId, Vec<String>>,
}

impl<C: Eq + std::hash::Hash + Clone> Default for MailboxRegistry<C> {
    fn default() -> Self {
        Self {
            owners: DashMap::new(),
            mailboxes: DashMap::new(),
            behaviors: DashMap::new(),
        }
    }
}

impl<C: Eq + std::hash::Hash + Clone> MailboxRegistry<C> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `true` if `client` may act on `entity`'s mailbox: either no owner is
    /// recorded yet, or the recorded owner matches.
    pub(crate) fn has_permission(&self, client: Option<&C>, entity: &EntityId) -> bool {
        match self.owners.get(entity) {
            None => true,
            Some(owner) => owner.as_ref() == client,
        }
    }

    pub(crate) async fn check_mailbox(
        &self,
        client: Option<&C>,
        uid: &EntityId,
    ) -> Result<MailboxStatus, ExchangeError> {
        let Some(mailbox) = self.mailboxes.get(uid).map(|entry| entry.clone()) else {
            return Ok(MailboxStatus::Missing);
        };
        if !self.has_permission(client, uid) {
            return Err(ExchangeError::Forbidden(uid.clone(), uid.clone()));
        }
        Ok(if mailbox.closed().await {
            MailboxStatus::Terminated
        } else {
            MailboxStatus::Active
        })
    }

    pub(crate) async fn create_mailbox(
        &self,
        client: Option<C>,
        uid: EntityId,
        behavior_mro: Option<Vec<String>>,
    ) -> Result<(), ExchangeError> {
        if !self.has_permission(client.as_ref(), &uid) {
            return Err(ExchangeError::Forbidden(uid.clone(), uid.clone()));
        }

        let needs_fresh = match self.mailboxes.get(&uid).map(|entry| entry.clone()) {
            None => true,
            Some(existing) => existing.closed().await,
        };
        if needs_fresh {
            self.mailboxes.insert(uid.clone(), Mailbox::new());
            self.owners.insert(uid.clone(), client);
            if let (EntityId::Agent(agent_id), Some(mro)) = (&uid, behavior_mro) {
                self.behaviors.insert(agent_id.clone(), mro);
            }
        }
        Ok(())
    }

    pub(crate) async fn terminate(&self, client: Option<&C>, uid: &EntityId) -> Result<(), ExchangeError> {
        if !self.has_permission(client, uid) {
            return Err(ExchangeError::Forbidden(uid.clone(), uid.clone()));
        }
        if let Some(mailbox) = self.mailboxes.get(uid) {
            mailbox.close().await;
        }
        Ok(())
    }

    pub(crate) async fn discover(
        &self,
        client: Option<&C>,
        behavior: &str,
        allow_subclasses: bool,
    ) -> Vec<AgentId> {
        let mut found = Vec::new();
        for entry in self.behaviors.iter() {
            let agent_id = entry.key();
            let mro = entry.value();
            let entity: EntityId = agent_id.clone().into();
            if !self.has_permission(client, &entity) {
                continue;
            }
            let Some(mailbox) = self.mailboxes.get(&entity).map(|entry| entry.clone()) else {
                continue;
            };
            if mailbox.closed().await {
                continue;
            }
            let matches = mro.first().is_some_and(|b| b == behavior)
                || (allow_subclasses && mro.iter().any(|b| b == behavior));
            if matches {
                found.push(agent_id.clone());
            }
        }
        found
    }

    pub(crate) async fn get(
        &self,
        client: Option<&C>,
        uid: &EntityId,
        timeout: std::time::Duration,
    ) -> Result<Message, ExchangeError> {
        if !self.has_permission(client, uid) {
            return Err(ExchangeError::Forbidden(uid.clone(), uid.clone()));
        }
        let mailbox = self
            .mailboxes
            .get(uid)
            .ok_or_else(|| ExchangeError::BadEntityId(uid.clone()))?
            .clone();
        mailbox.get(timeout).await.map_err(|err| match err {
            MailboxError::Closed => ExchangeError::MailboxClosed(uid.clone()),
            MailboxError::Timeout => ExchangeError::Timeout,
        })
    }

    pub(crate) async fn put(&self, client: Option<&C>, message: Message) -> Result<(), ExchangeError> {
        let dest = message.dest().clone();
        if !self.has_permission(client, &dest) {
            return Err(ExchangeError::Forbidden(dest.clone(), dest));
        }
        let mailbox = self
            .mailboxes
            .get(&dest)
            .ok_or_else(|| ExchangeError::BadEntityId(dest.clone()))?
            .clone();
        mailbox.put(message).await.map_err(|err| match err {
            MailboxError::Closed => ExchangeError::MailboxClosed(dest.clone()),
            MailboxError::Timeout => ExchangeError::Timeout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::UserId;
    use crate::message::RequestMessage;

    #[tokio::test]
    async fn owner_can_terminate_but_others_are_forbidden() {
        let registry: MailboxRegistry<EntityId> = MailboxRegistry::new();
        let owner: EntityId = UserId::new().into();
        let other: EntityId = UserId::new().into();
        registry
            .create_mailbox(Some(owner.clone()), owner.clone(), None)
            .await
            .unwrap();

        let err = registry.terminate(Some(&other), &owner).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Forbidden(_, _)));

        registry.terminate(Some(&owner), &owner).await.unwrap();
        assert_eq!(
            registry.check_mailbox(Some(&owner), &owner).await.unwrap(),
            MailboxStatus::Terminated
        );
    }

    #[tokio::test]
    async fn discovery_filters_by_behavior_position() {
        let registry: MailboxRegistry<EntityId> = MailboxRegistry::new();
        let x_agent = AgentId::<()>::new();
        let y_agent = AgentId::<()>::new();
        let z_agent = AgentId::<()>::new();
        for (agent, mro) in [
            (&x_agent, vec!["B".to_string(), "A".to_string()]),
            (&y_agent, vec!["A".to_string()]),
            (&z_agent, vec!["C".to_string()]),
        ] {
            let entity: EntityId = agent.clone().into();
            registry
                .create_mailbox(Some(entity.clone()), entity, Some(mro))
                .await
                .unwrap();
        }

        let with_subclasses = registry.discover(None, "A", true).await;
        assert_eq!(with_subclasses.len(), 2);

        let without_subclasses = registry.discover(None, "A", false).await;
        assert_eq!(without_subclasses, vec![y_agent]);
    }

    #[tokio::test]
    async fn get_on_unknown_mailbox_is_bad_entity_id() {
        let registry: MailboxRegistry<EntityId> = MailboxRegistry::new();
        let unknown: EntityId = UserId::new().into();
        let err = registry
            .get(None, &unknown, std::time::Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::BadEntityId(_)));
    }

    #[tokio::test]
    async fn put_then_get_round_trips_a_message() {
        let registry: MailboxRegistry<EntityId> = MailboxRegistry::new();
        let dest: EntityId = UserId::new().into();
        registry
            .create_mailbox(Some(dest.clone()), dest.clone(), None)
            .await
            .unwrap();
        let src: EntityId = UserId::new().into();
        let message = Message::request(src, dest.clone(), RequestMessage::PingRequest);

        registry.put(Some(&dest), message.clone()).await.unwrap();
        let received = registry
            .get(Some(&dest), &dest, std::time::Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(received, message);
    }
}
