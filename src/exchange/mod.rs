//! Message exchange fabric: mailboxes, transports, and the clients built
//! on top of them.

pub mod client;
pub mod factory;
pub mod http;
pub mod memory;
pub(crate) mod registry;
pub mod transport;

pub use client::{
    create_agent_client, create_user_client, AgentExchangeClient, RequestHandler,
    UserExchangeClient,
};
pub use factory::ExchangeFactory;
pub use http::{HttpExchangeFactory, HttpTransport};
pub use memory::{MemoryExchangeFactory, MemoryTransport};
pub use transport::{AgentRegistration, ExchangeTransport, MailboxStatus};
