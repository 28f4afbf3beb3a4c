//! High-level exchange clients built on top of an [`ExchangeTransport`].
//!
//! [`AgentExchangeClient`] is owned by a running [`crate::agent::Agent`];
//! [`UserExchangeClient`] is what application code outside any agent uses
//! to send actions and discover peers. Both share handle bookkeeping and a
//! receive loop through [`ExchangeClient`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::exchange::factory::ExchangeFactory;
use crate::exchange::transport::{AgentRegistration, ExchangeTransport, MailboxStatus};
use crate::handle::{BoundHandle, WaiterTable};
use crate::identifier::{AgentId, EntityId, UserId};
use crate::message::{Message, MessageBody, RequestMessage, ResponseMessage};

/// Default interval the receive loop polls its transport at; `recv`
/// blocks for this long before looping, so the loop can observe
/// cancellation promptly without busy-waiting.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A caller-supplied callback invoked for each [`RequestMessage`] an agent
/// client's receive loop dispatches.
pub type RequestHandler =
    Arc<dyn Fn(Message) -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

struct ClientInner {
    transport: Arc<dyn ExchangeTransport>,
    waiters: HashMap<Uuid, WaiterTable>,
}

/// Shared plumbing behind [`AgentExchangeClient`] and [`UserExchangeClient`]:
/// handle bookkeeping and the background receive loop.
struct ExchangeClientCore {
    inner: Mutex<ClientInner>,
    listener: CancellationToken,
    listener_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ExchangeClientCore {
    fn new(transport: Arc<dyn ExchangeTransport>) -> Self {
        Self {
            inner: Mutex::new(ClientInner {
                transport,
                waiters: HashMap::new(),
            }),
            listener: CancellationToken::new(),
            listener_task: Mutex::new(None),
        }
    }

    async fn transport(&self) -> Arc<dyn ExchangeTransport> {
        self.inner.lock().await.transport.clone()
    }

    /// Mints a bound handle addressing `agent_id`, registering a fresh
    /// [`WaiterTable`] for it.
    async fn get_handle<B>(self: &Arc<Self>, origin: EntityId, agent_id: AgentId<B>) -> BoundHandle<B> {
        let waiters = WaiterTable::new();
        {
            let mut inner = self.inner.lock().await;
            inner.waiters.insert(agent_id.uid(), waiters.clone());
        }
        let core = self.clone();
        let sender: Arc<
            dyn Fn(Message) -> futures::future::BoxFuture<'static, Result<(), ExchangeError>>
                + Send
                + Sync,
        > = Arc::new(move |message: Message| {
            let core = core.clone();
            Box::pin(async move { core.transport().await.send(message).await })
        });
        BoundHandle::new(agent_id, origin, waiters, sender)
    }

    async fn dispatch_response(&self, message: Message, response: ResponseMessage) {
        let label = message.label();
        let src_uid = message.src().uid();
        let waiters = self.inner.lock().await.waiters.get(&src_uid).cloned();
        match waiters {
            Some(table) if table.deliver(label, response).await => {}
            _ => {
                warn!(
                    %label,
                    src = %message.src(),
                    "received response with no corresponding handle; dropping"
                );
            }
        }
    }

    fn stop_listener(&self) {
        self.listener.cancel();
    }

    async fn join_listener(&self) {
        if let Some(handle) = self.listener_task.lock().await.take() {
            let _ = handle.await;
        }
    }
}

/// Exchange client owned by a running agent.
///
/// Its receive loop dispatches [`RequestMessage`]s to a caller-supplied
/// handler (the agent's own request dispatch) and [`ResponseMessage`]s to
/// whichever handle's waiter table is registered under the response's
/// source.
pub struct AgentExchangeClient {
    core: Arc<ExchangeClientCore>,
    agent_id: AgentId,
}

impl AgentExchangeClient {
    /// Creates an agent client and starts its receive loop immediately.
    #[instrument(skip(transport, request_handler), fields(agent_id = %agent_id))]
    pub fn start(
        agent_id: AgentId,
        transport: Arc<dyn ExchangeTransport>,
        request_handler: RequestHandler,
    ) -> Self {
        let core = Arc::new(ExchangeClientCore::new(transport));
        let listener = core.listener.clone();
        let loop_core = core.clone();
        let task = tokio::spawn(async move {
            loop {
                let transport = loop_core.transport().await;
                tokio::select! {
                    () = listener.cancelled() => break,
                    received = transport.recv(RECV_POLL_INTERVAL) => {
                        match received {
                            Ok(message) => {
                                debug!(src = %message.src(), "agent client received message");
                                match message.body() {
                                    MessageBody::Request(_) => request_handler(message).await,
                                    MessageBody::Response(response) => {
                                        let response = response.clone();
                                        loop_core.dispatch_response(message, response).await;
                                    }
                                }
                            }
                            Err(ExchangeError::Timeout) => continue,
                            Err(ExchangeError::MailboxClosed(_)) => break,
                            Err(error) => {
                                warn!(%error, "agent client receive loop error");
                                break;
                            }
                        }
                    }
                }
            }
        });
        *core.listener_task.try_lock().expect("uncontended at construction") = Some(task);
        Self { core, agent_id }
    }

    /// The agent this client is bound to.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Mints a handle to another agent.
    pub async fn get_handle<B>(&self, target: AgentId<B>) -> BoundHandle<B> {
        self.core.get_handle(self.agent_id.clone().into(), target).await
    }

    /// Sends a raw message via the underlying transport.
    pub async fn send(&self, message: Message) -> Result<(), ExchangeError> {
        self.core.transport().await.send(message).await
    }

    /// Current status of a mailbox.
    pub async fn status(&self, uid: &EntityId) -> Result<MailboxStatus, ExchangeError> {
        self.core.transport().await.status(uid).await
    }

    /// Permanently closes a mailbox, typically this client's own on
    /// shutdown: closing the agent's mailbox is what causes its receive
    /// loop to observe [`ExchangeError::MailboxClosed`] and exit.
    pub async fn terminate(&self, uid: &EntityId) -> Result<(), ExchangeError> {
        self.core.transport().await.terminate(uid).await
    }

    /// Re-registers this agent under its existing id, reopening its
    /// mailbox after [`Self::terminate`] closed it. Used to revive a
    /// mailbox that should outlive a single run.
    pub async fn register_agent(
        &self,
        behavior_mro: Vec<String>,
        preset_agent_id: AgentId,
    ) -> Result<AgentRegistration, ExchangeError> {
        self.core
            .transport()
            .await
            .register_agent(behavior_mro, None, Some(preset_agent_id))
            .await
    }

    /// Waits for the background receive loop to exit, without closing the
    /// transport. Resolves immediately if the loop has already exited or
    /// this client's loop was already joined.
    pub async fn join_listener(&self) {
        self.core.join_listener().await;
    }

    /// Closes the underlying transport and every handle this client minted.
    /// Does not terminate this agent's own mailbox — it may be restarted.
    pub async fn close(&self) {
        self.core.stop_listener();
        self.core.join_listener().await;
        self.core.transport().await.close().await;
        info!(agent_id = %self.agent_id, "closed agent exchange client");
    }
}

/// Exchange client used by application code outside any agent.
///
/// Unlike [`AgentExchangeClient`], a user client cannot fulfill requests:
/// its receive loop replies to any inbound request with an
/// [`ResponseMessage::ActionError`] rather than delivering it anywhere.
pub struct UserExchangeClient {
    core: Arc<ExchangeClientCore>,
    user_id: UserId,
}

impl UserExchangeClient {
    /// Creates a user client and starts its receive loop immediately.
    #[instrument(skip(transport), fields(user_id = %user_id))]
    pub fn start(user_id: UserId, transport: Arc<dyn ExchangeTransport>) -> Self {
        let core = Arc::new(ExchangeClientCore::new(transport));
        let listener = core.listener.clone();
        let loop_core = core.clone();
        let task = tokio::spawn(async move {
            loop {
                let transport = loop_core.transport().await;
                tokio::select! {
                    () = listener.cancelled() => break,
                    received = transport.recv(RECV_POLL_INTERVAL) => {
                        match received {
                            Ok(message) => match message.body() {
                                MessageBody::Request(_) => {
                                    warn!(src = %message.src(), "user client cannot fulfill requests");
                                    let response =
                                        message.error_response("users cannot fulfill requests");
                                    if let Err(error) = transport.send(response).await {
                                        warn!(%error, "failed to reply to unsupported request");
                                    }
                                }
                                MessageBody::Response(response) => {
                                    let response = response.clone();
                                    loop_core.dispatch_response(message, response).await;
                                }
                            },
                            Err(ExchangeError::Timeout) => continue,
                            Err(ExchangeError::MailboxClosed(_)) => break,
                            Err(error) => {
                                warn!(%error, "user client receive loop error");
                                break;
                            }
                        }
                    }
                }
            }
        });
        *core.listener_task.try_lock().expect("uncontended at construction") = Some(task);
        Self { core, user_id }
    }

    /// The user this client is bound to.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Mints a handle to an agent.
    pub async fn get_handle<B>(&self, target: AgentId<B>) -> BoundHandle<B> {
        self.core.get_handle(self.user_id.clone().into(), target).await
    }

    /// Sends a raw message via the underlying transport.
    pub async fn send(&self, message: Message) -> Result<(), ExchangeError> {
        self.core.transport().await.send(message).await
    }

    /// Registers a new agent mailbox with the exchange.
    pub async fn register_agent(
        &self,
        behavior_mro: Vec<String>,
        name: Option<String>,
    ) -> Result<AgentRegistration, ExchangeError> {
        self.core
            .transport()
            .await
            .register_agent(behavior_mro, name, None)
            .await
    }

    /// Finds agent ids implementing `behavior`.
    pub async fn discover(
        &self,
        behavior: &str,
        allow_subclasses: bool,
    ) -> Result<Vec<AgentId>, ExchangeError> {
        self.core
            .transport()
            .await
            .discover(behavior, allow_subclasses)
            .await
    }

    /// Closes this client: terminates the user's own mailbox, stops the
    /// receive loop, and closes the underlying transport.
    pub async fn close(&self) {
        self.core.stop_listener();
        let user_entity: EntityId = self.user_id.clone().into();
        let transport = self.core.transport().await;
        if let Err(error) = transport.terminate(&user_entity).await {
            warn!(%error, "failed to terminate user mailbox on close");
        }
        self.core.join_listener().await;
        transport.close().await;
        info!(user_id = %self.user_id, "closed user exchange client");
    }
}

/// Creates a new agent exchange client for an already-registered agent.
///
/// Mirrors `ExchangeFactory::create_agent_client`: fails if the agent's
/// mailbox is not active, e.g. because it was already terminated.
pub async fn create_agent_client(
    factory: &dyn ExchangeFactory,
    registration: AgentRegistration,
    request_handler: RequestHandler,
) -> Result<AgentExchangeClient, ExchangeError> {
    let agent_id = registration.agent_id().clone();
    let entity: EntityId = agent_id.clone().into();
    let transport = factory
        .create_transport(Some(entity.clone()), None, Some(registration))
        .await?;
    if transport.status(&entity).await? != MailboxStatus::Active {
        transport.close().await;
        return Err(ExchangeError::BadEntityId(entity));
    }
    Ok(AgentExchangeClient::start(agent_id, transport, request_handler))
}

/// Creates a new user exchange client, minting a fresh user mailbox.
pub async fn create_user_client(
    factory: &dyn ExchangeFactory,
    name: Option<String>,
) -> Result<UserExchangeClient, ExchangeError> {
    let transport = factory.create_transport(None, name, None).await?;
    let user_id = match transport.mailbox_id().clone() {
        EntityId::User(user_id) => user_id,
        EntityId::Agent(_) => unreachable!("create_transport with mailbox_id=None always mints a user"),
    };
    Ok(UserExchangeClient::start(user_id, transport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::memory::MemoryExchangeFactory;

    #[tokio::test]
    async fn user_client_discovers_registered_agent() {
        let factory = MemoryExchangeFactory::new();
        let user = create_user_client(&factory, Some("alice".into()))
            .await
            .unwrap();

        let registration = user
            .register_agent(vec!["Echo".into()], None)
            .await
            .unwrap();
        let found = user.discover("Echo", true).await.unwrap();
        assert_eq!(found, vec![registration.agent_id().clone()]);

        user.close().await;
    }

    #[tokio::test]
    async fn user_request_to_another_user_gets_action_error() {
        let factory = MemoryExchangeFactory::new();
        let alice = create_user_client(&factory, Some("alice".into()))
            .await
            .unwrap();
        let bob = create_user_client(&factory, Some("bob".into()))
            .await
            .unwrap();

        let message = Message::request(
            alice.user_id().clone().into(),
            bob.user_id().clone().into(),
            RequestMessage::PingRequest,
        );
        alice.send(message).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        alice.close().await;
        bob.close().await;
    }

    #[tokio::test]
    async fn agent_client_dispatches_ping_to_handler() {
        let factory = MemoryExchangeFactory::new();
        let user = create_user_client(&factory, Some("alice".into()))
            .await
            .unwrap();
        let registration = user
            .register_agent(vec!["Echo".into()], None)
            .await
            .unwrap();

        let handled = Arc::new(tokio::sync::Notify::new());
        let handled_clone = handled.clone();
        let handler: RequestHandler = Arc::new(move |message: Message| {
            let handled = handled_clone.clone();
            Box::pin(async move {
                assert!(matches!(message.body(), MessageBody::Request(RequestMessage::PingRequest)));
                handled.notify_one();
            })
        });

        let agent = create_agent_client(&factory, registration.clone(), handler)
            .await
            .unwrap();

        let agent_entity: EntityId = registration.agent_id().clone().into();
        let ping = Message::request(
            user.user_id().clone().into(),
            agent_entity,
            RequestMessage::PingRequest,
        );
        user.send(ping).await.unwrap();

        tokio::time::timeout(Duration::from_millis(500), handled.notified())
            .await
            .expect("handler was not invoked");

        agent.close().await;
        user.close().await;
    }
}
