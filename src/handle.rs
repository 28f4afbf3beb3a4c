//! References to remote agents held by exchange clients.
//!
//! A [`Handle`] starts out [`Handle::Unbound`] — serializable, with no live
//! transport — and becomes [`Handle::Bound`] once attached to a running
//! exchange client. Only a bound handle can send requests; binding happens
//! automatically when a handle is passed to a behavior that is starting up,
//! or explicitly via [`BoundHandle::from_unbound`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::error::{ExchangeError, HandleError};
use crate::identifier::AgentId;
use crate::message::{Message, MessageBody, RequestMessage, ResponseMessage};

/// A waiter registered for a single outstanding request, resolved when its
/// matching response arrives.
type Waiter = oneshot::Sender<ResponseMessage>;

/// Shared map of outstanding request labels to their waiters, owned by a
/// [`BoundHandle`] and drained by the owning exchange client's receive loop.
#[derive(Default, Clone)]
pub(crate) struct WaiterTable(Arc<Mutex<HashMap<Uuid, Waiter>>>);

impl WaiterTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn register(&self) -> (Uuid, oneshot::Receiver<ResponseMessage>) {
        let label = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.0.lock().await.insert(label, tx);
        (label, rx)
    }

    /// Delivers a response to its waiter, if one is still registered.
    /// Returns `false` if no waiter was found (already cancelled, or a
    /// stray response), in which case the caller should log and drop it.
    pub(crate) async fn deliver(&self, label: Uuid, response: ResponseMessage) -> bool {
        if let Some(tx) = self.0.lock().await.remove(&label) {
            let _ = tx.send(response);
            true
        } else {
            false
        }
    }

    /// Drops every outstanding waiter. Dropping the sender half causes the
    /// receiver to observe a channel closure, which callers surface as
    /// [`HandleError::Cancelled`].
    pub(crate) async fn cancel_all(&self) {
        self.0.lock().await.clear();
    }
}

/// A reference to a remote agent that has not yet been attached to a live
/// exchange client.
///
/// Unbound handles are plain data: serializable and safe to embed in a
/// behavior's fields before the owning agent starts. They carry no waiter
/// state and cannot send requests.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct UnboundHandle<B = ()> {
    agent_id: AgentId<B>,
}

impl<B> UnboundHandle<B> {
    /// Creates an unbound handle addressing `agent_id`.
    #[must_use]
    pub fn new(agent_id: AgentId<B>) -> Self {
        Self { agent_id }
    }

    /// The agent this handle addresses.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId<B> {
        &self.agent_id
    }
}

/// A handle bound to a specific exchange client, able to send requests and
/// await their responses.
///
/// `sender` is supplied by the owning client; it enqueues the request
/// message onto the transport. `waiters` is shared with the client's
/// receive loop, which delivers responses as they arrive.
pub struct BoundHandle<B = ()> {
    agent_id: AgentId<B>,
    origin: crate::identifier::EntityId,
    waiters: WaiterTable,
    sender: Arc<dyn Fn(Message) -> futures::future::BoxFuture<'static, Result<(), ExchangeError>> + Send + Sync>,
}

impl<B> BoundHandle<B> {
    /// Constructs a bound handle. Exchange clients call this when minting
    /// a handle for a caller; behaviors never construct one directly.
    pub(crate) fn new(
        agent_id: AgentId<B>,
        origin: crate::identifier::EntityId,
        waiters: WaiterTable,
        sender: Arc<
            dyn Fn(Message) -> futures::future::BoxFuture<'static, Result<(), ExchangeError>>
                + Send
                + Sync,
        >,
    ) -> Self {
        Self {
            agent_id,
            origin,
            waiters,
            sender,
        }
    }

    /// The agent this handle addresses.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId<B> {
        &self.agent_id
    }

    /// Detaches this handle back to its serializable [`UnboundHandle`] form.
    /// Outstanding waiters are cancelled.
    pub async fn unbind(self) -> UnboundHandle<B> {
        self.waiters.cancel_all().await;
        UnboundHandle::new(self.agent_id)
    }

    /// Invokes the named action with positional and keyword arguments,
    /// returning a future that resolves to the action's result.
    pub async fn action(
        &self,
        name: impl Into<String>,
        pargs: Vec<Value>,
        kargs: Map<String, Value>,
    ) -> Result<Value, HandleError> {
        let response = self
            .dispatch(RequestMessage::ActionRequest {
                action_name: name.into(),
                pargs,
                kargs,
            })
            .await?;
        match response {
            ResponseMessage::ActionResponse { result } => Ok(result),
            ResponseMessage::ActionError { exception } => Err(HandleError::ActionFailed(exception)),
            _ => Err(HandleError::UnexpectedResponse { label: Uuid::nil() }),
        }
    }

    /// Sends a liveness check and waits for the agent to answer.
    pub async fn ping(&self) -> Result<(), HandleError> {
        match self.dispatch(RequestMessage::PingRequest).await? {
            ResponseMessage::PingResponse => Ok(()),
            ResponseMessage::ActionError { exception } => Err(HandleError::ActionFailed(exception)),
            _ => Err(HandleError::UnexpectedResponse { label: Uuid::nil() }),
        }
    }

    /// Asks the remote agent to begin shutting down.
    pub async fn shutdown(&self) -> Result<(), HandleError> {
        match self.dispatch(RequestMessage::ShutdownRequest).await? {
            ResponseMessage::ShutdownResponse => Ok(()),
            ResponseMessage::ActionError { exception } => Err(HandleError::ActionFailed(exception)),
            _ => Err(HandleError::UnexpectedResponse { label: Uuid::nil() }),
        }
    }

    /// Closes this handle. With `wait_futures = true`, outstanding requests
    /// are left to resolve normally; with `false`, they are cancelled
    /// immediately and their callers observe [`HandleError::Cancelled`].
    pub async fn close(self, wait_futures: bool) {
        if !wait_futures {
            self.waiters.cancel_all().await;
        }
    }

    async fn dispatch(&self, body: RequestMessage) -> Result<ResponseMessage, HandleError> {
        let (label, rx) = self.waiters.register().await;
        let message =
            Message::request_with_label(self.origin.clone(), self.agent_id.erase().into(), label, body);
        (self.sender)(message).await?;
        rx.await.map_err(|_| HandleError::Cancelled { label })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::UserId;

    #[test]
    fn unbound_handle_round_trips_through_json() {
        let handle: UnboundHandle = UnboundHandle::new(AgentId::new());
        let json = serde_json::to_string(&handle).unwrap();
        let parsed: UnboundHandle = serde_json::from_str(&json).unwrap();
        assert_eq!(handle, parsed);
    }

    #[tokio::test]
    async fn closing_without_waiting_cancels_outstanding_waiter() {
        let agent_id: AgentId = AgentId::new();
        let origin = UserId::new().into();
        let waiters = WaiterTable::new();
        let sent = Arc::new(std::sync::Mutex::new(None));
        let sent_clone = sent.clone();
        let sender: Arc<
            dyn Fn(Message) -> futures::future::BoxFuture<'static, Result<(), ExchangeError>>
                + Send
                + Sync,
        > = Arc::new(move |msg: Message| {
            *sent_clone.lock().unwrap() = Some(msg);
            Box::pin(async { Ok(()) })
        });
        let handle = BoundHandle::new(agent_id, origin, waiters.clone(), sender);

        let action = tokio::spawn({
            let handle_waiters = waiters.clone();
            async move {
                let (label, rx) = handle_waiters.register().await;
                (label, rx)
            }
        });
        let (_label, rx) = action.await.unwrap();
        waiters.cancel_all().await;

        assert!(rx.await.is_err());
        let _ = handle;
    }
}
