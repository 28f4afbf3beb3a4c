//! Top-level error types for the exchange and agent runtime.

use thiserror::Error;
use uuid::Uuid;

use crate::identifier::EntityId;

/// Failure modes surfaced by an [`crate::exchange::ExchangeTransport`] or
/// [`crate::exchange::ExchangeClient`].
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// No mailbox is registered for the given entity.
    #[error("no mailbox registered for {0}")]
    BadEntityId(EntityId),

    /// The mailbox exists but has been terminated.
    #[error("mailbox for {0} is closed")]
    MailboxClosed(EntityId),

    /// The caller is not permitted to act on the given mailbox.
    #[error("forbidden: {0} may not act on mailbox for {1}")]
    Forbidden(EntityId, EntityId),

    /// A blocking receive exceeded its deadline.
    #[error("receive timed out")]
    Timeout,

    /// Underlying mailbox queue error.
    #[error(transparent)]
    Mailbox(#[from] crate::mailbox::MailboxError),

    /// Failure to parse an identifier carried on the wire.
    #[error(transparent)]
    Identifier(#[from] crate::identifier::IdentifierParseError),

    /// Transport-level I/O failure (HTTP exchange only).
    #[error("exchange transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure encoding or decoding a message body.
    #[error("message serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The HTTP transport received a non-success status it could not map
    /// to a more specific variant.
    #[error("exchange server responded with unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code returned by the server.
        status: u16,
        /// Response body, if any, for diagnostics.
        body: String,
    },
}

/// Failure modes surfaced by a [`crate::handle::Handle`].
#[derive(Debug, Error)]
pub enum HandleError {
    /// The handle (or its owning client) was closed while a request was
    /// outstanding.
    #[error("handle was closed with action {label} still outstanding")]
    Cancelled {
        /// Correlation id of the cancelled request.
        label: Uuid,
    },

    /// The destination agent raised an error fulfilling the request.
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// The handle attempted to send on an exchange client that is closing
    /// or closed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// The response arrived but did not match the expected response kind
    /// for the request that was sent.
    #[error("unexpected response kind for request {label}")]
    UnexpectedResponse {
        /// Correlation id of the mismatched request.
        label: Uuid,
    },
}

/// Failure modes surfaced by the agent runtime's lifecycle operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// An action or setup/shutdown hook raised an error.
    #[error("behavior error: {0}")]
    Behavior(String),

    /// One or more background loops failed; their errors are aggregated
    /// here in the order they completed.
    #[error("{} agent loop(s) failed: {}", .0.len(), join_messages(.0))]
    LoopFailures(Vec<String>),

    /// The agent was asked to perform an operation outside its expected
    /// lifecycle state (e.g. `shutdown` before `start`).
    #[error("invalid agent state transition: {0}")]
    InvalidState(String),

    /// An exchange-level failure occurred while the agent was running.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

fn join_messages(messages: &[String]) -> String {
    messages.join("; ")
}

/// Failure modes surfaced by the [`crate::launcher::Launcher`].
#[derive(Debug, Error)]
pub enum LauncherError {
    /// No agent control block is registered under the given id.
    #[error("no running agent for {0}")]
    UnknownAgent(EntityId),

    /// The agent exhausted its configured restart budget.
    #[error("agent {0} exceeded its maximum restart count ({1})")]
    RestartsExhausted(EntityId, u32),

    /// `wait` did not observe completion before its deadline.
    #[error("timed out waiting for agent {0} to finish")]
    Timeout(EntityId),

    /// Propagated failure from the agent runtime itself.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Registering the agent with the exchange before launch failed.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}
