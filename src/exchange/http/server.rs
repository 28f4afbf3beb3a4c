//! HTTP exchange server: axum routes backed by a [`MailboxRegistry`].

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::ExchangeError;
use crate::exchange::http::auth::{auth_middleware, AuthProvider, ImplicitPrincipal, Principal};
use crate::exchange::http::config::ExchangeServerConfig;
use crate::exchange::registry::MailboxRegistry;
use crate::exchange::transport::MailboxStatus;
use crate::identifier::{AgentId, EntityId};
use crate::message::Message;

/// Shared state behind every route.
#[derive(Clone)]
pub struct ExchangeServerState {
    registry: Arc<MailboxRegistry<String>>,
    recv_timeout_ceiling: Duration,
}

impl ExchangeServerState {
    /// Builds fresh, empty server state from `config`.
    #[must_use]
    pub fn new(config: &ExchangeServerConfig) -> Self {
        Self {
            registry: Arc::new(MailboxRegistry::new()),
            recv_timeout_ceiling: Duration::from_secs(config.recv_timeout_ceiling_secs.into_inner()),
        }
    }
}

fn error_response(error: &ExchangeError) -> Response {
    let status = match error {
        ExchangeError::BadEntityId(_) => StatusCode::NOT_FOUND,
        ExchangeError::MailboxClosed(_) | ExchangeError::Forbidden(..) => StatusCode::FORBIDDEN,
        ExchangeError::Timeout => StatusCode::REQUEST_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { error: error.to_string() })).into_response()
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct CreateMailboxRequest {
    mailbox: EntityId,
    behavior: Option<Vec<String>>,
}

#[instrument(skip_all)]
async fn create_mailbox(
    State(state): State<ExchangeServerState>,
    axum::extract::Extension(Principal(principal)): axum::extract::Extension<Principal>,
    Json(request): Json<CreateMailboxRequest>,
) -> Response {
    match state
        .registry
        .create_mailbox(Some(principal), request.mailbox, request.behavior)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct MailboxRequest {
    mailbox: EntityId,
}

#[instrument(skip_all)]
async fn terminate_mailbox(
    State(state): State<ExchangeServerState>,
    axum::extract::Extension(Principal(principal)): axum::extract::Extension<Principal>,
    Json(request): Json<MailboxRequest>,
) -> Response {
    // Idempotent: terminate never fails the caller, matching the
    // exchange's "once terminated, always terminated" semantics.
    let _ = state
        .registry
        .terminate(Some(&principal), &request.mailbox)
        .await;
    StatusCode::OK.into_response()
}

#[derive(Serialize)]
struct MailboxStatusResponse {
    status: MailboxStatus,
}

#[instrument(skip_all)]
async fn check_mailbox(
    State(state): State<ExchangeServerState>,
    axum::extract::Extension(Principal(principal)): axum::extract::Extension<Principal>,
    Json(request): Json<MailboxRequest>,
) -> Response {
    match state
        .registry
        .check_mailbox(Some(&principal), &request.mailbox)
        .await
    {
        Ok(status) => Json(MailboxStatusResponse { status }).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct PutMessageRequest {
    message: Message,
}

#[instrument(skip_all)]
async fn put_message(
    State(state): State<ExchangeServerState>,
    axum::extract::Extension(Principal(principal)): axum::extract::Extension<Principal>,
    Json(request): Json<PutMessageRequest>,
) -> Response {
    match state.registry.put(Some(&principal), request.message).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct GetMessageRequest {
    mailbox: EntityId,
    timeout: Option<f64>,
}

#[derive(Serialize)]
struct GetMessageResponse {
    message: Message,
}

#[instrument(skip_all)]
async fn get_message(
    State(state): State<ExchangeServerState>,
    axum::extract::Extension(Principal(principal)): axum::extract::Extension<Principal>,
    Json(request): Json<GetMessageRequest>,
) -> Response {
    let requested = request
        .timeout
        .map(Duration::from_secs_f64)
        .unwrap_or(state.recv_timeout_ceiling);
    let timeout = requested.min(state.recv_timeout_ceiling);

    match state
        .registry
        .get(Some(&principal), &request.mailbox, timeout)
        .await
    {
        Ok(message) => Json(GetMessageResponse { message }).into_response(),
        Err(error) => error_response(&error),
    }
}

#[derive(Deserialize)]
struct DiscoverRequest {
    behavior: String,
    allow_subclasses: bool,
}

#[derive(Serialize)]
struct DiscoverResponse {
    agent_ids: Vec<AgentId>,
}

#[instrument(skip_all)]
async fn discover(
    State(state): State<ExchangeServerState>,
    axum::extract::Extension(Principal(principal)): axum::extract::Extension<Principal>,
    Json(request): Json<DiscoverRequest>,
) -> Response {
    let agent_ids = state
        .registry
        .discover(Some(&principal), &request.behavior, request.allow_subclasses)
        .await;
    Json(DiscoverResponse { agent_ids }).into_response()
}

/// Assembles the exchange server's router, wiring in authentication and
/// shared state.
#[must_use]
pub fn build_router(state: ExchangeServerState, auth: Arc<dyn AuthProvider>) -> Router {
    Router::new()
        .route("/mailbox", post(create_mailbox))
        .route("/mailbox", delete(terminate_mailbox))
        .route("/mailbox", get(check_mailbox))
        .route("/message", put(put_message))
        .route("/message", get(get_message))
        .route("/discover", get(discover))
        .layer(axum::middleware::from_fn_with_state(auth, auth_middleware))
        .with_state(state)
}

/// Default router using [`ImplicitPrincipal`] — every caller shares one
/// principal, matching "absent an auth middleware, all callers share a
/// single implicit principal".
#[must_use]
pub fn build_default_router(state: ExchangeServerState) -> Router {
    build_router(state, Arc::new(ImplicitPrincipal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::UserId;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> ExchangeServerState {
        ExchangeServerState::new(&ExchangeServerConfig::development())
    }

    #[tokio::test]
    async fn create_then_check_mailbox_reports_active() {
        let app = build_default_router(test_state());
        let mailbox: EntityId = UserId::new().into();

        let create_body = serde_json::to_vec(&serde_json::json!({ "mailbox": mailbox })).unwrap();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/mailbox")
                    .header("content-type", "application/json")
                    .body(Body::from(create_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let check_body = serde_json::to_vec(&serde_json::json!({ "mailbox": mailbox })).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/mailbox")
                    .header("content-type", "application/json")
                    .body(Body::from(check_body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn put_message_to_unknown_mailbox_is_not_found() {
        let app = build_default_router(test_state());
        let src: EntityId = UserId::new().into();
        let dest: EntityId = UserId::new().into();
        let message = Message::request(src, dest, crate::message::RequestMessage::PingRequest);

        let body = serde_json::to_vec(&serde_json::json!({ "message": message })).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/message")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
