//! Worker authentication for the coordinator API
//!
//! Workers present an identity and a shared secret on every request. The
//! coordinator keeps only the SHA-256 digest of each secret and compares
//! digests in constant time. There is no session state: every request is
//! checked against the credential store.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, error, warn};

use super::api::ErrorResponse;
use crate::models::digest_secret;
use crate::storage::{CredentialStore, StoreError};

/// Header carrying the worker identity
pub const WORKER_ID_HEADER: &str = "x-worker-id";

/// Header carrying the worker secret
pub const WORKER_SECRET_HEADER: &str = "x-worker-secret";

/// Authentication failures
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing worker credentials")]
    MissingCredentials,

    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    #[error("Invalid secret for worker {0}")]
    InvalidSecret(String),

    #[error("Credential store error: {0}")]
    Store(#[source] StoreError),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredentials | Self::UnknownWorker(_) | Self::InvalidSecret(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Unknown identity and wrong secret look the same to the caller
        let message = match &self {
            Self::Store(_) => "Authentication unavailable",
            Self::MissingCredentials => "Missing worker credentials",
            _ => "Invalid worker credentials",
        };
        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

/// Identity of an authenticated worker, attached to the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity(pub String);

impl WorkerIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks worker credentials against a [`CredentialStore`]
pub struct AuthGate<C: ?Sized> {
    store: Arc<C>,
}

impl<C: CredentialStore + ?Sized> AuthGate<C> {
    pub fn new(store: Arc<C>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<C> {
        &self.store
    }

    /// Verify `secret` for `identity`
    pub fn authenticate(&self, identity: &str, secret: &str) -> Result<WorkerIdentity, AuthError> {
        let credential = self
            .store
            .find(identity)
            .map_err(AuthError::Store)?
            .ok_or_else(|| AuthError::UnknownWorker(identity.to_string()))?;

        let presented = digest_secret(secret);
        if bool::from(presented.ct_eq(&credential.secret_digest)) {
            Ok(WorkerIdentity(credential.identity))
        } else {
            Err(AuthError::InvalidSecret(identity.to_string()))
        }
    }

    /// Verify the credentials carried by request headers
    pub fn authenticate_headers(&self, headers: &HeaderMap) -> Result<WorkerIdentity, AuthError> {
        let identity = header_value(headers, WORKER_ID_HEADER);
        let secret = header_value(headers, WORKER_SECRET_HEADER);

        match (identity, secret) {
            (Some(identity), Some(secret)) => self.authenticate(identity, secret),
            _ => Err(AuthError::MissingCredentials),
        }
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Middleware rejecting requests without valid worker credentials
///
/// On success the [`WorkerIdentity`] is available to handlers as an
/// `Extension`.
pub async fn require_worker(
    State(gate): State<Arc<AuthGate<dyn CredentialStore>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    match gate.authenticate_headers(request.headers()) {
        Ok(identity) => {
            debug!(worker = %identity, path = %request.uri().path(), "Worker authenticated");
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(e @ AuthError::Store(_)) => {
            error!(error = %e, "Credential lookup failed");
            Err(e)
        }
        Err(e) => {
            warn!(error = %e, path = %request.uri().path(), "Rejected worker request");
            Err(e)
        }
    }
}
