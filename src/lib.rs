//! # agentex - a distributed multi-agent runtime
//!
//! agentex is a foundational runtime for long-lived, message-driven agents:
//! a typed identifier scheme, an async mailbox queue, a pluggable message
//! exchange (in-process or over HTTP), and an agent lifecycle engine with
//! restart-on-failure supervision.
//!
//! ## Architecture
//!
//! - **Identifiers** ([`identifier`]): typed, serializable agent and user
//!   ids, carried end to end on the wire.
//! - **Messages** ([`message`]): the request/response envelope agents and
//!   users exchange.
//! - **Mailboxes** ([`mailbox`]): the per-entity async FIFO queue underlying
//!   every exchange transport.
//! - **Handles** ([`handle`]): a typed, serializable reference to a remote
//!   agent, usable to invoke actions and await their responses.
//! - **Exchange** ([`exchange`]): the transport fabric — in-memory for a
//!   single process, HTTP for a distributed deployment — behind one
//!   [`exchange::ExchangeTransport`] trait.
//! - **Behaviors** ([`behavior`]): the user-authored logic an agent runs:
//!   named actions invoked by remote handles, and background loops that run
//!   for the agent's lifetime.
//! - **Agents** ([`agent`]): the state machine that drives a behavior
//!   through setup, concurrent action dispatch, background loops, and
//!   shutdown.
//! - **Launcher** ([`launcher`]): the supervisor that submits agents to an
//!   executor and restarts them on failure up to a configured bound.
//!
//! ```rust,ignore
//! use agentex::agent::{Agent, AgentRunConfig};
//! use agentex::behavior::{Behavior, BehaviorBuilder, BehaviorTables};
//! use agentex::exchange::MemoryExchangeFactory;
//! use agentex::launcher::Launcher;
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct Greeter {
//!     tables: BehaviorTables,
//! }
//!
//! #[async_trait::async_trait]
//! impl Behavior for Greeter {
//!     fn tables(&self) -> BehaviorTables {
//!         self.tables.clone()
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let tables = BehaviorBuilder::new()
//!     .action("greet", |_ctx, pargs, _kargs| async move {
//!         Ok(serde_json::json!(format!("hello, {}", pargs[0])))
//!     })
//!     .build();
//! let behavior = Greeter { tables };
//!
//! let launcher = Launcher::new(3);
//! let factory = Arc::new(MemoryExchangeFactory::new());
//! let agent_id = launcher.launch(behavior, factory, Some("greeter".into())).await?;
//! # let _ = agent_id;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod behavior;
pub mod error;
pub mod exchange;
pub mod handle;
pub mod identifier;
pub mod launcher;
pub mod mailbox;
pub mod message;
pub mod observability;

pub use crate::agent::{Agent, AgentContext, AgentHandle, AgentRunConfig};
pub use crate::behavior::{Behavior, BehaviorBuilder, BehaviorTables};
pub use crate::error::{AgentError, ExchangeError, HandleError, LauncherError};
pub use crate::handle::{BoundHandle, UnboundHandle};
pub use crate::identifier::{AgentId, EntityId, IdentifierParseError, UserId};
pub use crate::launcher::{Executor, Launcher, ThreadExecutor, TokioExecutor};
pub use crate::mailbox::{Mailbox, MailboxError};
pub use crate::message::{Message, MessageBody, RequestMessage, ResponseMessage};
