//! Agent lifecycle engine.
//!
//! An [`Agent`] drives a single [`Behavior`] instance: it owns the
//! behavior's exchange client, dispatches inbound requests to registered
//! actions, and supervises the behavior's background loops. Unlike the
//! originating framework's thread-pool-per-agent design, every action and
//! loop here is a tokio task, and the request handler that the exchange
//! client dispatches into is wired up during construction rather than
//! after a separate `start()` phase — there is no thread pool to stand up
//! first, so the action path is simply gated by a semaphore from the
//! moment the agent exists.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::behavior::Behavior;
use crate::error::{AgentError, ExchangeError};
use crate::exchange::{create_agent_client, AgentExchangeClient, AgentRegistration, ExchangeFactory, RequestHandler};
use crate::handle::{BoundHandle, UnboundHandle};
use crate::identifier::{AgentId, EntityId};
use crate::message::{Message, MessageBody, RequestMessage, ResponseMessage};

/// Agent run configuration.
///
/// Mirrors the originating framework's `AgentRunConfig` field for field:
/// thread-pool sizing becomes a semaphore permit count, but the exit and
/// error-handling semantics are unchanged.
#[derive(Debug, Clone)]
pub struct AgentRunConfig {
    /// Close the exchange client when the agent exits. Should be `false`
    /// only when several agents share one exchange client in-process.
    pub close_exchange_on_exit: bool,
    /// Maximum number of concurrently executing action requests. `None`
    /// means unbounded.
    pub max_action_concurrency: Option<usize>,
    /// Permanently close the agent's mailbox if it exits due to a loop
    /// failure.
    pub terminate_on_error: bool,
    /// Permanently close the agent's mailbox when it exits normally.
    pub terminate_on_exit: bool,
}

impl Default for AgentRunConfig {
    fn default() -> Self {
        Self {
            close_exchange_on_exit: true,
            max_action_concurrency: None,
            terminate_on_error: true,
            terminate_on_exit: true,
        }
    }
}

/// Lifecycle state of a running [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentState {
    Initialized,
    Starting,
    Running,
    Terminating,
    Shutdown,
}

/// Context an [`Agent`] hands to its behavior's hooks, actions, and loops.
///
/// Replaces the originating framework's field-scanning handle binder: a
/// behavior acquires handles to other agents by calling [`Self::bind`] or
/// [`Self::get_handle`] wherever it needs one, rather than declaring
/// unbound handle fields the agent discovers and rewrites at startup.
#[derive(Clone)]
pub struct AgentContext {
    agent_id: AgentId,
    exchange: Arc<AgentExchangeClient>,
}

impl AgentContext {
    /// The id of the agent this context belongs to.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Mints a bound handle addressing `target`.
    pub async fn get_handle<B>(&self, target: AgentId<B>) -> BoundHandle<B> {
        self.exchange.get_handle(target).await
    }

    /// Binds a previously serialized [`UnboundHandle`] to this agent's
    /// exchange client.
    pub async fn bind<B>(&self, handle: UnboundHandle<B>) -> BoundHandle<B> {
        self.get_handle(handle.agent_id().clone()).await
    }

    /// Sends a raw message via this agent's exchange client.
    pub async fn send(&self, message: Message) -> Result<(), ExchangeError> {
        self.exchange.send(message).await
    }
}

#[cfg(test)]
impl AgentContext {
    /// Builds a standalone context against a fresh in-memory mailbox, for
    /// exercising behavior tables without a running [`Agent`].
    pub(crate) async fn for_test() -> Self {
        use crate::exchange::{create_user_client, MemoryExchangeFactory};

        let factory = MemoryExchangeFactory::new();
        let user = create_user_client(&factory, None)
            .await
            .expect("register test context mailbox");
        let registration = user
            .register_agent(vec!["test".to_string()], None)
            .await
            .expect("register test context agent");
        let handler: RequestHandler = Arc::new(|_message| Box::pin(async {}));
        let exchange = create_agent_client(&factory, registration.clone(), handler)
            .await
            .expect("create test context exchange client");

        Self {
            agent_id: registration.agent_id().clone(),
            exchange: Arc::new(exchange),
        }
    }
}

/// Drives a single behavior instance through its lifecycle: setup,
/// running actions and loops, and shutdown.
///
/// An agent can only be run once; calling [`Self::start`] after
/// [`Self::shutdown`] has completed returns [`AgentError::InvalidState`].
pub struct Agent<B: Behavior> {
    behavior: Arc<B>,
    registration: AgentRegistration,
    config: AgentRunConfig,
    exchange: Arc<AgentExchangeClient>,
    action_semaphore: Arc<Semaphore>,
    shutdown: CancellationToken,
    expected_shutdown: AtomicBool,
    state: Mutex<AgentState>,
    action_tasks: Mutex<JoinSet<()>>,
    loop_supervisor: Mutex<Option<tokio::task::JoinHandle<()>>>,
    loop_failures: Arc<Mutex<Vec<String>>>,
}

impl<B: Behavior> Agent<B> {
    /// Builds and wires up an agent for an already-registered mailbox.
    ///
    /// The exchange client (and its receive loop) is created here rather
    /// than in a later `start()` call, since nothing about request
    /// dispatch depends on loops having been spawned yet — only the
    /// action semaphore and behavior tables, both available immediately.
    pub async fn new(
        behavior: B,
        exchange_factory: Arc<dyn ExchangeFactory>,
        registration: AgentRegistration,
        config: AgentRunConfig,
    ) -> Result<Arc<Self>, AgentError> {
        let behavior = Arc::new(behavior);
        let action_semaphore = Arc::new(match config.max_action_concurrency {
            Some(permits) => Semaphore::new(permits),
            None => Semaphore::new(Semaphore::MAX_PERMITS),
        });

        let weak_cell: Arc<OnceLock<Weak<Agent<B>>>> = Arc::new(OnceLock::new());
        let handler_cell = weak_cell.clone();
        let request_handler: RequestHandler = Arc::new(move |message: Message| {
            let handler_cell = handler_cell.clone();
            Box::pin(async move {
                if let Some(agent) = handler_cell.get().and_then(Weak::upgrade) {
                    agent.handle_request(message).await;
                } else {
                    warn!("dropping request received before agent finished constructing");
                }
            })
        });

        let exchange = create_agent_client(exchange_factory.as_ref(), registration.clone(), request_handler)
            .await
            .map_err(AgentError::from)?;
        let exchange = Arc::new(exchange);

        let agent = Arc::new_cyclic(|weak| {
            let _ = weak_cell.set(weak.clone());
            Self {
                behavior,
                registration,
                config,
                exchange,
                action_semaphore,
                shutdown: CancellationToken::new(),
                expected_shutdown: AtomicBool::new(true),
                state: Mutex::new(AgentState::Initialized),
                action_tasks: Mutex::new(JoinSet::new()),
                loop_supervisor: Mutex::new(None),
                loop_failures: Arc::new(Mutex::new(Vec::new())),
            }
        });

        Ok(agent)
    }

    /// This agent's id.
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        self.registration.agent_id()
    }

    fn context(&self) -> AgentContext {
        AgentContext {
            agent_id: self.registration.agent_id().clone(),
            exchange: self.exchange.clone(),
        }
    }

    /// Starts the agent: runs `on_setup`, then spawns every registered
    /// loop.
    ///
    /// Idempotent while running; returns an error once the agent has been
    /// shut down.
    #[instrument(skip(self), fields(agent_id = %self.agent_id()))]
    pub async fn start(self: &Arc<Self>) -> Result<(), AgentError> {
        {
            let mut state = self.state.lock().await;
            match *state {
                AgentState::Shutdown => {
                    return Err(AgentError::InvalidState(
                        "agent has already been shut down".to_string(),
                    ));
                }
                AgentState::Running | AgentState::Starting => return Ok(()),
                AgentState::Initialized | AgentState::Terminating => *state = AgentState::Starting,
            }
        }

        debug!("starting agent");
        let ctx = self.context();
        self.behavior.on_setup(&ctx).await?;

        let tables = self.behavior.tables();
        let mut loop_tasks: JoinSet<(String, Result<(), String>)> = JoinSet::new();
        for (name, loop_fn) in tables.loops().clone() {
            let ctx = self.context();
            let token = self.shutdown.clone();
            loop_tasks.spawn(async move {
                let result = loop_fn(ctx, token).await;
                (name, result)
            });
        }

        let shutdown = self.shutdown.clone();
        let failures = self.loop_failures.clone();
        let supervisor = tokio::spawn(async move {
            while let Some(joined) = loop_tasks.join_next().await {
                match joined {
                    Ok((name, Ok(()))) => debug!(loop_name = %name, "loop exited"),
                    Ok((name, Err(message))) => {
                        warn!(loop_name = %name, error = %message, "loop failed; signaling shutdown");
                        failures.lock().await.push(format!("{name}: {message}"));
                        shutdown.cancel();
                    }
                    Err(join_error) => {
                        warn!(error = %join_error, "loop task panicked; signaling shutdown");
                        failures.lock().await.push(join_error.to_string());
                        shutdown.cancel();
                    }
                }
            }
        });
        *self.loop_supervisor.lock().await = Some(supervisor);

        *self.state.lock().await = AgentState::Running;
        info!("agent running");
        Ok(())
    }

    /// Signals that the agent should shut down. If the agent has not
    /// started yet, it will shut down immediately once it does.
    ///
    /// `expected = false` marks this as an unexpected exit (e.g. a loop
    /// failure), which flips the `terminate_on_error` vs
    /// `terminate_on_exit` decision made in [`Self::shutdown`].
    pub fn signal_shutdown(&self, expected: bool) {
        self.expected_shutdown.store(expected, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    /// Runs the agent until [`Self::signal_shutdown`] is called (by a
    /// handler, a loop failure, or another task), then shuts it down.
    pub async fn run(self: &Arc<Self>) -> Result<(), AgentError> {
        self.start().await?;
        self.shutdown.cancelled().await;
        self.shutdown().await
    }

    /// Shuts the agent down.
    ///
    /// 1. Cancels the shutdown token, signaling every loop to exit.
    /// 2. Closes the agent's own mailbox so its receive loop observes
    ///    [`ExchangeError::MailboxClosed`] and exits.
    /// 3. Waits for outstanding actions and loops to finish.
    /// 4. Reopens the mailbox if the configured policy says this agent
    ///    should survive the exit.
    /// 5. Runs `on_shutdown`, then optionally closes the exchange client.
    ///
    /// Idempotent.
    #[instrument(skip(self), fields(agent_id = %self.agent_id()))]
    pub async fn shutdown(self: &Arc<Self>) -> Result<(), AgentError> {
        {
            let mut state = self.state.lock().await;
            if *state == AgentState::Shutdown {
                return Ok(());
            }
            *state = AgentState::Terminating;
        }

        debug!("shutting down agent");
        self.shutdown.cancel();

        let agent_entity: EntityId = self.agent_id().clone().into();
        if let Err(error) = self.exchange.terminate(&agent_entity).await {
            warn!(%error, "failed to terminate own mailbox during shutdown");
        }
        self.exchange.join_listener().await;

        while self.action_tasks.lock().await.join_next().await.is_some() {}

        if let Some(supervisor) = self.loop_supervisor.lock().await.take() {
            let _ = supervisor.await;
        }

        let expected = self.expected_shutdown.load(Ordering::SeqCst);
        let should_revive = (expected && !self.config.terminate_on_exit)
            || (!expected && !self.config.terminate_on_error);
        if should_revive {
            let mro = self.registration.behavior_mro().to_vec();
            if let Err(error) = self
                .exchange
                .register_agent(mro, self.agent_id().clone())
                .await
            {
                warn!(%error, "failed to reopen mailbox after exit");
            }
        }

        let mut errors = std::mem::take(&mut *self.loop_failures.lock().await);
        if let Err(error) = self.behavior.on_shutdown(&self.context()).await {
            errors.push(error.to_string());
        }

        if self.config.close_exchange_on_exit {
            self.exchange.close().await;
        }

        *self.state.lock().await = AgentState::Shutdown;
        info!("agent shut down");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AgentError::LoopFailures(errors))
        }
    }

    async fn send_response(&self, response: Message) {
        let dest = response.dest().clone();
        if let Err(error) = self.exchange.send(response).await {
            match error {
                ExchangeError::BadEntityId(_) | ExchangeError::MailboxClosed(_) => {
                    warn!(%dest, %error, "failed to deliver response; destination mailbox missing or closed");
                }
                other => warn!(%dest, error = %other, "failed to deliver response"),
            }
        }
    }

    async fn handle_request(self: Arc<Self>, message: Message) {
        let MessageBody::Request(request) = message.body().clone() else {
            warn!("request handler received a response message; dropping");
            return;
        };
        match request {
            RequestMessage::ActionRequest { action_name, pargs, kargs } => {
                let agent = self.clone();
                let mut tasks = self.action_tasks.lock().await;
                tasks.spawn(async move {
                    agent.execute_action(message, action_name, pargs, kargs).await;
                });
            }
            RequestMessage::PingRequest => {
                info!(agent_id = %self.agent_id(), "ping received");
                self.send_response(message.respond(ResponseMessage::PingResponse)).await;
            }
            RequestMessage::ShutdownRequest => {
                self.signal_shutdown(true);
                self.send_response(message.respond(ResponseMessage::ShutdownResponse)).await;
            }
        }
    }

    async fn execute_action(
        &self,
        message: Message,
        action_name: String,
        pargs: crate::message::ActionArgs,
        kargs: crate::message::ActionKwargs,
    ) {
        let _permit = self.action_semaphore.acquire().await;
        let tables = self.behavior.tables();
        let response = match tables.action(&action_name) {
            Some(action) => match action(self.context(), pargs, kargs).await {
                Ok(result) => message.respond(ResponseMessage::ActionResponse { result }),
                Err(exception) => message.error_response(exception),
            },
            None => message.error_response(format!("no action named \"{action_name}\"")),
        };
        self.send_response(response).await;
    }
}

/// Type-erased handle to a running agent, used by a
/// [`crate::launcher::Launcher`] to manage agents of differing behaviors
/// uniformly.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// The id of the agent this handle controls.
    fn agent_id(&self) -> &AgentId;

    /// Starts the agent.
    async fn start(&self) -> Result<(), AgentError>;

    /// Signals the agent to shut down.
    fn signal_shutdown(&self, expected: bool);

    /// Shuts the agent down and waits for it to finish.
    async fn shutdown(&self) -> Result<(), AgentError>;

    /// Runs the agent to completion: starts it, blocks until shutdown is
    /// signaled, then shuts it down. This is the unit of work a
    /// [`crate::launcher::Launcher`] hands to an executor.
    async fn run(&self) -> Result<(), AgentError>;
}

#[async_trait]
impl<B: Behavior> AgentHandle for Arc<Agent<B>> {
    fn agent_id(&self) -> &AgentId {
        Agent::agent_id(self)
    }

    async fn start(&self) -> Result<(), AgentError> {
        Agent::start(self).await
    }

    fn signal_shutdown(&self, expected: bool) {
        Agent::signal_shutdown(self, expected);
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        Agent::shutdown(self).await
    }

    async fn run(&self) -> Result<(), AgentError> {
        Agent::run(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::{BehaviorBuilder, BehaviorTables};
    use crate::exchange::{MemoryExchangeFactory, UserExchangeClient};
    use serde_json::{Map, Value};
    use std::time::Duration;
    use test_log::test;

    struct Echo {
        tables: BehaviorTables,
    }

    impl Echo {
        fn new() -> Self {
            let tables = BehaviorBuilder::new()
                .action("echo", |_ctx, pargs, _kargs| async move {
                    Ok(pargs.into_iter().next().unwrap_or(Value::Null))
                })
                .action("boom", |_ctx, _pargs, _kargs| async move {
                    Err("boom".to_string())
                })
                .build();
            Self { tables }
        }
    }

    #[async_trait]
    impl Behavior for Echo {
        fn tables(&self) -> BehaviorTables {
            self.tables.clone()
        }
    }

    async fn spawn_echo_agent() -> (Arc<Agent<Echo>>, Arc<dyn ExchangeFactory>, UserExchangeClient) {
        let factory: Arc<dyn ExchangeFactory> = Arc::new(MemoryExchangeFactory::new());
        let user = crate::exchange::create_user_client(factory.as_ref(), Some("alice".into()))
            .await
            .unwrap();
        let registration = user.register_agent(vec!["Echo".into()], None).await.unwrap();

        let agent = Agent::new(Echo::new(), factory.clone(), registration, AgentRunConfig::default())
            .await
            .unwrap();
        agent.start().await.unwrap();
        (agent, factory, user)
    }

    #[test(tokio::test)]
    async fn action_request_is_dispatched_and_answered() {
        let (agent, _factory, user) = spawn_echo_agent().await;
        let agent_entity: EntityId = agent.agent_id().clone().into();

        let handle = user.get_handle::<()>(agent.agent_id().clone().erase()).await;
        let result = handle
            .action("echo", vec![Value::from("hi")], Map::new())
            .await
            .unwrap();
        assert_eq!(result, Value::from("hi"));

        let _ = agent_entity;
        agent.shutdown().await.unwrap();
        user.close().await;
    }

    #[test(tokio::test)]
    async fn failing_action_returns_action_failed() {
        let (agent, _factory, user) = spawn_echo_agent().await;
        let handle = user.get_handle::<()>(agent.agent_id().clone().erase()).await;

        let error = handle.action("boom", Vec::new(), Map::new()).await.unwrap_err();
        assert!(matches!(error, crate::error::HandleError::ActionFailed(_)));

        agent.shutdown().await.unwrap();
        user.close().await;
    }

    #[test(tokio::test)]
    async fn shutdown_request_stops_the_agent() {
        let (agent, _factory, user) = spawn_echo_agent().await;
        let handle = user.get_handle::<()>(agent.agent_id().clone().erase()).await;

        handle.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_millis(500), agent.shutdown.cancelled())
            .await
            .expect("agent did not observe shutdown signal");

        agent.shutdown().await.unwrap();
        user.close().await;
    }

    #[test(tokio::test)]
    async fn shutdown_is_idempotent() {
        let (agent, _factory, user) = spawn_echo_agent().await;
        agent.shutdown().await.unwrap();
        agent.shutdown().await.unwrap();
        user.close().await;
    }

    #[test(tokio::test)]
    async fn starting_after_shutdown_is_an_error() {
        let (agent, _factory, user) = spawn_echo_agent().await;
        agent.shutdown().await.unwrap();
        let error = agent.start().await.unwrap_err();
        assert!(matches!(error, AgentError::InvalidState(_)));
        user.close().await;
    }
}
