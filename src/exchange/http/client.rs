//! HTTP implementation of [`ExchangeTransport`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExchangeError;
use crate::exchange::factory::ExchangeFactory;
use crate::exchange::transport::{AgentRegistration, ExchangeTransport, MailboxStatus};
use crate::identifier::{AgentId, EntityId, UserId};
use crate::message::Message;

/// Transport that speaks to a remote `agentex` exchange server over HTTP.
pub struct HttpTransport {
    base_url: String,
    mailbox_id: EntityId,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Binds a transport to `mailbox_id` against the server at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, mailbox_id: EntityId, bearer_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            mailbox_id,
            bearer_token,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, ExchangeError> {
        self.request(method, path)
            .json(body)
            .send()
            .await
            .map_err(|err| ExchangeError::Io(std::io::Error::other(err)))
    }

    async fn map_error(response: reqwest::Response) -> ExchangeError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ExchangeError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl ExchangeTransport for HttpTransport {
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
        let response = self
            .send_json(
                reqwest::Method::POST,
                "/mailbox",
                &serde_json::json!({ "mailbox": entity, "behavior": behavior_mro }),
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }
        Ok(AgentRegistration::new(agent_id, behavior_mro))
    }

    async fn send(&self, message: Message) -> Result<(), ExchangeError> {
        let response = self
            .send_json(
                reqwest::Method::PUT,
                "/message",
                &serde_json::json!({ "message": message }),
            )
            .await?;
        match response.status() {
            reqwest::StatusCode::OK => Ok(()),
            reqwest::StatusCode::NOT_FOUND => Err(ExchangeError::BadEntityId(self.mailbox_id.clone())),
            reqwest::StatusCode::FORBIDDEN => Err(ExchangeError::MailboxClosed(self.mailbox_id.clone())),
            _ => Err(Self::map_error(response).await),
        }
    }

    async fn recv(&self, timeout: Duration) -> Result<Message, ExchangeError> {
        let response = self
            .send_json(
                reqwest::Method::GET,
                "/message",
                &serde_json::json!({
                    "mailbox": self.mailbox_id,
                    "timeout": timeout.as_secs_f64(),
                }),
            )
            .await?;
        match response.status() {
            reqwest::StatusCode::OK => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|err| ExchangeError::Io(std::io::Error::other(err)))?;
                serde_json::from_value(body["message"].clone()).map_err(ExchangeError::from)
            }
            reqwest::StatusCode::REQUEST_TIMEOUT => Err(ExchangeError::Timeout),
            reqwest::StatusCode::FORBIDDEN => Err(ExchangeError::MailboxClosed(self.mailbox_id.clone())),
            _ => Err(Self::map_error(response).await),
        }
    }

    async fn status(&self, uid: &EntityId) -> Result<MailboxStatus, ExchangeError> {
        let response = self
            .send_json(reqwest::Method::GET, "/mailbox", &serde_json::json!({ "mailbox": uid }))
            .await?;
        match response.status() {
            reqwest::StatusCode::OK => {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|err| ExchangeError::Io(std::io::Error::other(err)))?;
                serde_json::from_value(body["status"].clone()).map_err(ExchangeError::from)
            }
            reqwest::StatusCode::FORBIDDEN => Err(ExchangeError::Forbidden(uid.clone(), uid.clone())),
            _ => Err(Self::map_error(response).await),
        }
    }

    async fn terminate(&self, uid: &EntityId) -> Result<(), ExchangeError> {
        let response = self
            .send_json(
                reqwest::Method::DELETE,
                "/mailbox",
                &serde_json::json!({ "mailbox": uid }),
            )
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::map_error(response).await)
        }
    }

    async fn discover(
        &self,
        behavior: &str,
        allow_subclasses: bool,
    ) -> Result<Vec<AgentId>, ExchangeError> {
        let response = self
            .send_json(
                reqwest::Method::GET,
                "/discover",
                &serde_json::json!({ "behavior": behavior, "allow_subclasses": allow_subclasses }),
            )
            .await?;
        if !response.status().is_success() {
            return Err(Self::map_error(response).await);
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|err| ExchangeError::Io(std::io::Error::other(err)))?;
        serde_json::from_value(body["agent_ids"].clone()).map_err(ExchangeError::from)
    }

    async fn close(&self) {}
}

/// Mints [`HttpTransport`]s bound to a remote exchange server.
///
/// Unlike [`super::super::memory::MemoryExchangeFactory`], this needs no
/// process-local lookup table to survive serialization: the server address
/// and bearer token fully describe how to rejoin the exchange from any
/// process that can reach it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpExchangeFactory {
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpExchangeFactory {
    /// Creates a factory targeting the exchange server at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            bearer_token,
        }
    }
}

#[async_trait]
impl ExchangeFactory for HttpExchangeFactory {
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

        let transport = HttpTransport::new(&self.base_url, mailbox_id.clone(), self.bearer_token.clone());
        let response = transport
            .request(reqwest::Method::POST, "/mailbox")
            .json(&serde_json::json!({ "mailbox": mailbox_id }))
            .send()
            .await
            .map_err(|err| ExchangeError::Io(std::io::Error::other(err)))?;
        if !response.status().is_success() {
            return Err(HttpTransport::map_error(response).await);
        }
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::http::config::ExchangeServerConfig;
    use crate::exchange::http::server::{build_default_router, ExchangeServerState};
    use crate::identifier::UserId;

    async fn spawn_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = ExchangeServerState::new(&ExchangeServerConfig::development());
        let app = build_default_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn send_and_recv_round_trip_over_http() {
        let base_url = spawn_server().await;
        let dest: EntityId = UserId::new().into();
        let src: EntityId = UserId::new().into();

        let dest_transport = HttpTransport::new(&base_url, dest.clone(), None);
        let src_transport = HttpTransport::new(&base_url, src.clone(), None);

        // Both ends create their own mailbox, the way a user client does on
        // startup, before exchanging any messages.
        let client = reqwest::Client::new();
        for mailbox in [&dest, &src] {
            let response = client
                .post(format!("{base_url}/mailbox"))
                .json(&serde_json::json!({ "mailbox": mailbox }))
                .send()
                .await
                .unwrap();
            assert!(response.status().is_success());
        }

        let message = Message::request(src.clone(), dest.clone(), crate::message::RequestMessage::PingRequest);
        src_transport.send(message.clone()).await.unwrap();

        let received = dest_transport
            .recv(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(received.label(), message.label());
    }

    #[tokio::test]
    async fn recv_with_no_message_times_out() {
        let base_url = spawn_server().await;
        let mailbox: EntityId = UserId::new().into();
        let client = reqwest::Client::new();
        client
            .post(format!("{base_url}/mailbox"))
            .json(&serde_json::json!({ "mailbox": mailbox }))
            .send()
            .await
            .unwrap();

        let transport = HttpTransport::new(&base_url, mailbox, None);
        let err = transport.recv(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Timeout));
    }

    #[tokio::test]
    async fn status_reports_missing_for_unknown_mailbox() {
        let base_url = spawn_server().await;
        let mailbox: EntityId = UserId::new().into();
        let transport = HttpTransport::new(&base_url, mailbox.clone(), None);

        let status = transport.status(&mailbox).await.unwrap();
        assert_eq!(status, MailboxStatus::Missing);
    }

    #[tokio::test]
    async fn factory_creates_transport_and_registers_a_discoverable_agent() {
        let base_url = spawn_server().await;
        let factory = HttpExchangeFactory::new(&base_url, None);

        let user_transport = factory.create_transport(None, Some("alice".into()), None).await.unwrap();
        let registration = user_transport
            .register_agent(vec!["Echo".into()], None, None)
            .await
            .unwrap();

        let found = user_transport.discover("Echo", true).await.unwrap();
        assert_eq!(found, vec![registration.agent_id().clone()]);
    }

    #[test]
    fn factory_round_trips_through_json() {
        let factory = HttpExchangeFactory::new("http://example.invalid:8800", Some("secret".into()));
        let json = serde_json::to_string(&factory).unwrap();
        let rejoined: HttpExchangeFactory = serde_json::from_str(&json).unwrap();
        assert_eq!(rejoined.base_url, factory.base_url);
        assert_eq!(rejoined.bearer_token, factory.bearer_token);
    }
}
