use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use uuid::Uuid;

use crate::{
    errors::AppError,
    handlers::AppState,
    services::orchestrator::JobOrchestrator,
};

/// A request carrying a live session token, bound to that session's
/// orchestrator.
#[derive(Clone)]
pub struct AuthenticatedSession {
    pub session_id: Uuid,
    pub token: String,
    /// Unix time the token stops being accepted.
    pub expires_at: i64,
    pub orchestrator: Arc<JobOrchestrator>,
}

pub fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Auth("Authentication required".to_string()))?
            .to_string();

        let identity = state.auth.check_session(&token).await?;
        let session_id = identity.session_id;
        let expires_at = identity.expires_at;
        let orchestrator = state.sessions.attach(identity).await?;

        Ok(AuthenticatedSession {
            session_id,
            token,
            expires_at,
            orchestrator,
        })
    }
}
