//! Pluggable authentication for the HTTP exchange server.
//!
//! An [`AuthProvider`] turns incoming request credentials into a principal
//! string, which the server then treats as the mailbox-owning client id —
//! the same role `client: str | None` plays in the in-process transport's
//! permission checks.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// The principal an [`AuthProvider`] resolved for a request, stashed in
/// the request's extensions for handlers to extract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal(pub String);

/// Resolves request credentials to a principal, or rejects the request.
pub trait AuthProvider: Send + Sync + 'static {
    /// Returns the principal for `request`, or `None` if credentials are
    /// absent or invalid.
    fn authenticate(&self, request: &Request) -> Option<String>;
}

/// No-op provider used when the server config carries no shared secret:
/// every caller is folded into a single implicit principal.
pub struct ImplicitPrincipal;

impl AuthProvider for ImplicitPrincipal {
    fn authenticate(&self, _request: &Request) -> Option<String> {
        Some("implicit".to_string())
    }
}

/// Accepts requests carrying `Authorization: Bearer <secret>` matching a
/// configured shared secret; the principal is always `"shared"` since the
/// secret does not distinguish individual callers.
pub struct SharedSecretAuth {
    secret: String,
}

impl SharedSecretAuth {
    /// Creates a provider that accepts only `secret`.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl AuthProvider for SharedSecretAuth {
    fn authenticate(&self, request: &Request) -> Option<String> {
        let header = request.headers().get(axum::http::header::AUTHORIZATION)?;
        let value = header.to_str().ok()?;
        let token = value.strip_prefix("Bearer ")?;
        (token == self.secret).then(|| "shared".to_string())
    }
}

/// Axum middleware that runs `provider.authenticate`, stashes the resolved
/// [`Principal`] in the request's extensions, and replies 401 when
/// authentication fails.
pub async fn auth_middleware(
    axum::extract::State(provider): axum::extract::State<std::sync::Arc<dyn AuthProvider>>,
    mut request: Request,
    next: Next,
) -> Response {
    match provider.authenticate(&request) {
        Some(principal) => {
            request.extensions_mut().insert(Principal(principal));
            next.run(request).await
        }
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn shared_secret_accepts_matching_bearer_token() {
        let auth = SharedSecretAuth::new("topsecret");
        let request = Request::builder()
            .header(axum::http::header::AUTHORIZATION, "Bearer topsecret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(auth.authenticate(&request), Some("shared".to_string()));
    }

    #[test]
    fn shared_secret_rejects_mismatched_token() {
        let auth = SharedSecretAuth::new("topsecret");
        let request = Request::builder()
            .header(axum::http::header::AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        assert_eq!(auth.authenticate(&request), None);
    }

    #[test]
    fn shared_secret_rejects_missing_header() {
        let auth = SharedSecretAuth::new("topsecret");
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(auth.authenticate(&request), None);
    }

    #[test]
    fn implicit_principal_always_authenticates() {
        let auth = ImplicitPrincipal;
        let request = Request::builder().body(Body::empty()).unwrap();
        assert!(auth.authenticate(&request).is_some());
    }
}
