//! Supervisor that schedules agents onto an executor and restarts them on
//! failure.
//!
//! A [`Launcher`] owns one [`Acb`] (agent control block) per agent it has
//! launched: the agent's registration, a factory closure that can rebuild
//! the agent from that registration, a restart counter, and a completion
//! signal. Restart is driven entirely by the launcher's own completion
//! callback — it never reaches into a running agent to restart it, only
//! reconstructs a fresh one against the same registration once the prior
//! attempt's `run()` future resolves.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify};
use tracing::{info, instrument, warn};

use crate::agent::{Agent, AgentHandle, AgentRunConfig};
use crate::behavior::Behavior;
use crate::error::{AgentError, LauncherError};
use crate::exchange::{create_user_client, AgentRegistration, ExchangeFactory};
use crate::identifier::{AgentId, EntityId};

/// A scheduling target for agents: owns whatever "thread or process"
/// distinction a concrete launcher cares about.
///
/// Mirrors the originating framework's `ThreadLauncher`/process-executor
/// split at a single seam so the [`Launcher`] itself stays agnostic to how
/// an agent's `run()` future is actually driven.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Drives `agent` to completion and returns its terminal result.
    async fn run(&self, agent: Arc<dyn AgentHandle>) -> Result<(), AgentError>;
}

/// Default executor: runs each agent as a task on the ambient Tokio
/// runtime, same as every other concurrent unit in this crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioExecutor;

#[async_trait]
impl Executor for TokioExecutor {
    async fn run(&self, agent: Arc<dyn AgentHandle>) -> Result<(), AgentError> {
        match tokio::spawn(async move { agent.run().await }).await {
            Ok(result) => result,
            Err(join_error) => Err(AgentError::LoopFailures(vec![join_error.to_string()])),
        }
    }
}

/// Process-boundary analogue: runs each agent on a dedicated OS thread with
/// its own single-threaded Tokio runtime, isolating its resource usage from
/// the launcher's own runtime the way a worker process would.
///
/// A genuine multi-process worker needs a `Behavior` that can be shipped
/// across a process boundary and reconstructed there from an explicit
/// `AgentSpec` (see spec §9's re-architecture note); behaviors are a
/// user-supplied, out-of-scope collaborator in this core, so that wire
/// format is left to embedders. This executor gives the isolation half of
/// "threads or processes" without requiring serializable behaviors.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

#[async_trait]
impl Executor for ThreadExecutor {
    async fn run(&self, agent: Arc<dyn AgentHandle>) -> Result<(), AgentError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        std::thread::Builder::new()
            .name("agentex-agent-worker".to_string())
            .spawn(move || {
                let result = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime.block_on(agent.run()),
                    Err(error) => Err(AgentError::Behavior(error.to_string())),
                };
                let _ = tx.send(result);
            })
            .expect("failed to spawn agent worker thread");
        rx.await
            .unwrap_or_else(|_| Err(AgentError::Behavior("worker thread dropped its result".to_string())))
    }
}

/// Rebuilds a fresh, unstarted agent from its registration. Captures the
/// original behavior (by value, so `B: Clone`) and exchange factory so a
/// restart constructs an equivalent agent rather than reusing any state
/// from the failed attempt.
type AgentFactory = Arc<
    dyn Fn(AgentRegistration, AgentRunConfig) -> BoxFuture<'static, Result<Arc<dyn AgentHandle>, AgentError>>
        + Send
        + Sync,
>;

struct Acb {
    registration: AgentRegistration,
    launch_count: AtomicU32,
    done: Notify,
    is_done: AtomicBool,
    last_result: Mutex<Option<Result<(), AgentError>>>,
    factory: AgentFactory,
}

impl Acb {
    async fn mark_done(&self, result: Result<(), AgentError>) {
        *self.last_result.lock().await = Some(result);
        self.is_done.store(true, Ordering::SeqCst);
        self.done.notify_waiters();
    }
}

/// Supervises a set of agents: submits each to an [`Executor`], restarts it
/// on failure up to a bound, and lets callers wait for and collect terminal
/// results.
///
/// The launcher never signals an agent to stop — per spec §4.7, that is a
/// deliberate policy choice left to callers, who must signal shutdown
/// themselves (e.g. via a handle's `shutdown()`) before calling
/// [`Launcher::close`].
pub struct Launcher<E: Executor = TokioExecutor> {
    executor: Arc<E>,
    max_restarts: u32,
    close_exchange_on_worker_exit: bool,
    acbs: DashMap<AgentId, Arc<Acb>>,
}

impl Launcher<TokioExecutor> {
    /// Creates a launcher using the default [`TokioExecutor`].
    #[must_use]
    pub fn new(max_restarts: u32) -> Self {
        Self::with_executor(TokioExecutor, max_restarts)
    }
}

impl<E: Executor + 'static> Launcher<E> {
    /// Creates a launcher driven by a caller-supplied executor.
    #[must_use]
    pub fn with_executor(executor: E, max_restarts: u32) -> Self {
        Self {
            executor: Arc::new(executor),
            max_restarts,
            close_exchange_on_worker_exit: true,
            acbs: DashMap::new(),
        }
    }

    /// Controls whether each agent's exchange client is closed when its
    /// worker exits for good (after restarts are exhausted or it completed
    /// cleanly). Default `true`.
    #[must_use]
    pub fn close_exchange_on_worker_exit(mut self, close: bool) -> Self {
        self.close_exchange_on_worker_exit = close;
        self
    }

    /// Registers a new agent for `behavior` with `exchange_factory`, and
    /// submits it to the executor.
    ///
    /// `behavior` must be `Clone` because a restart reconstructs the agent
    /// from scratch against the same registration; the launcher keeps no
    /// reference to the agent's prior internal state across attempts.
    #[instrument(skip(self, behavior, exchange_factory), fields(behavior = std::any::type_name::<B>()))]
    pub async fn launch<B>(
        &self,
        behavior: B,
        exchange_factory: Arc<dyn ExchangeFactory>,
        name: Option<String>,
    ) -> Result<AgentId, LauncherError>
    where
        B: Behavior + Clone,
    {
        let user = create_user_client(exchange_factory.as_ref(), None).await?;
        let registration = user
            .register_agent(vec![std::any::type_name::<B>().to_string()], name)
            .await?;
        user.close().await;

        let agent_id = registration.agent_id().clone();
        let factory: AgentFactory = Arc::new(move |registration, config| {
            let behavior = behavior.clone();
            let exchange_factory = exchange_factory.clone();
            Box::pin(async move {
                let agent = Agent::new(behavior, exchange_factory, registration, config).await?;
                Ok(Arc::new(agent) as Arc<dyn AgentHandle>)
            })
        });

        let acb = Arc::new(Acb {
            registration,
            launch_count: AtomicU32::new(0),
            done: Notify::new(),
            is_done: AtomicBool::new(false),
            last_result: Mutex::new(None),
            factory,
        });
        self.acbs.insert(agent_id.clone(), acb.clone());

        self.launch_one(agent_id.clone(), acb);
        Ok(agent_id)
    }

    fn launch_one(&self, agent_id: AgentId, acb: Arc<Acb>) {
        let executor = self.executor.clone();
        let max_restarts = self.max_restarts;
        let close_exchange_on_worker_exit = self.close_exchange_on_worker_exit;
        tokio::spawn(run_attempts(
            executor,
            agent_id,
            acb,
            max_restarts,
            close_exchange_on_worker_exit,
        ));
    }

    /// Blocks until the agent's worker has finished (including all of its
    /// restarts), or `timeout` elapses.
    ///
    /// On completion, propagates the last attempt's error unless
    /// `ignore_error` is set.
    pub async fn wait(
        &self,
        agent_id: &AgentId,
        timeout: Duration,
        ignore_error: bool,
    ) -> Result<(), LauncherError> {
        let acb = self
            .acbs
            .get(agent_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| LauncherError::UnknownAgent(EntityId::from(agent_id.clone())))?;

        if !acb.is_done.load(Ordering::SeqCst) {
            let notified = acb.done.notified();
            tokio::pin!(notified);
            if tokio::time::timeout(timeout, &mut notified).await.is_err() && !acb.is_done.load(Ordering::SeqCst)
            {
                return Err(LauncherError::Timeout(EntityId::from(agent_id.clone())));
            }
        }

        let result = acb.last_result.lock().await.clone_result();
        if ignore_error {
            Ok(())
        } else {
            result.map_err(LauncherError::from)
        }
    }

    /// Agent ids whose worker (including restarts) has not yet finished.
    #[must_use]
    pub fn running(&self) -> Vec<AgentId> {
        self.acbs
            .iter()
            .filter(|entry| !entry.value().is_done.load(Ordering::SeqCst))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Surfaces any terminal errors from completed agents, then shuts down
    /// the executor's capacity to accept more work.
    ///
    /// Callers are responsible for signaling every running agent to stop
    /// before calling this — the launcher does not reach into agent
    /// internals to do so itself.
    pub async fn close(&self) -> Result<(), LauncherError> {
        let mut first_error = None;
        for entry in self.acbs.iter() {
            let acb = entry.value();
            if acb.is_done.load(Ordering::SeqCst) {
                if let Err(error) = acb.last_result.lock().await.clone_result() {
                    warn!(agent_id = %entry.key(), %error, "agent finished with an error");
                    first_error.get_or_insert(error);
                }
            }
        }
        if let Some(error) = first_error {
            return Err(LauncherError::Agent(error));
        }
        Ok(())
    }
}

/// Drives an agent through as many attempts as its restart budget allows,
/// marking the ACB done once an attempt succeeds or the budget is spent.
async fn run_attempts<E: Executor + 'static>(
    executor: Arc<E>,
    agent_id: AgentId,
    acb: Arc<Acb>,
    max_restarts: u32,
    close_exchange_on_worker_exit: bool,
) {
    loop {
        let attempt = acb.launch_count.fetch_add(1, Ordering::SeqCst) + 1;
        let terminate_on_error = attempt >= max_restarts;
        let config = AgentRunConfig {
            terminate_on_error,
            close_exchange_on_exit: close_exchange_on_worker_exit,
            ..AgentRunConfig::default()
        };
        let registration = acb.registration.clone();
        let outcome = match (acb.factory)(registration, config).await {
            Ok(agent) => executor.run(agent).await,
            Err(error) => Err(error),
        };

        match outcome {
            Err(error) if attempt < max_restarts => {
                warn!(
                    agent_id = %agent_id,
                    %error,
                    attempt,
                    max_restarts,
                    "agent exited with an error; restarting"
                );
                continue;
            }
            other => {
                match &other {
                    Ok(()) => info!(agent_id = %agent_id, "agent exited cleanly"),
                    Err(error) => warn!(agent_id = %agent_id, %error, "agent exhausted its restart budget"),
                }
                acb.mark_done(other).await;
                return;
            }
        }
    }
}

trait CloneResult {
    fn clone_result(&self) -> Result<(), AgentError>;
}

impl CloneResult for Option<Result<(), AgentError>> {
    fn clone_result(&self) -> Result<(), AgentError> {
        match self {
            Some(Ok(())) => Ok(()),
            Some(Err(error)) => Err(AgentError::Behavior(error.to_string())),
            None => Ok(()),
        }
    }
}
