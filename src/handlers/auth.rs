use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

use crate::{
    errors::Result,
    handlers::AppState,
    middleware::auth::AuthenticatedSession,
    models::{AuthResponse, LoginRequest, RegisterRequest, UpdateProfileRequest},
};

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>)> {
    let session = state.auth.register(request).await?;

    let response = AuthResponse {
        token: session.token,
        user: session.user,
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "data": response
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>> {
    let session = state.auth.login(request).await?;

    let response = AuthResponse {
        token: session.token,
        user: session.user,
    };

    Ok(Json(json!({
        "message": "Login successful",
        "data": response
    })))
}

/// Ends the session and cancels its active job.
pub async fn logout(
    State(state): State<AppState>,
    session: AuthenticatedSession,
) -> Result<Json<serde_json::Value>> {
    let session_id = state.auth.logout(&session.token).await?;
    state.sessions.end(session_id, session.expires_at).await;

    Ok(Json(json!({
        "message": "Logged out successfully"
    })))
}

pub async fn current_session(session: AuthenticatedSession) -> Result<Json<serde_json::Value>> {
    let orchestrator = &session.orchestrator;

    Ok(Json(json!({
        "data": {
            "session_id": session.session_id,
            "user": orchestrator.session().user(),
            "usage": orchestrator.usage(),
            "job": orchestrator.current()
        }
    })))
}

pub async fn get_profile(session: AuthenticatedSession) -> Result<Json<serde_json::Value>> {
    Ok(Json(json!({
        "data": session.orchestrator.session().user()
    })))
}

/// Updates name and email. A taken email is answered with 409.
pub async fn update_profile(
    State(state): State<AppState>,
    session: AuthenticatedSession,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<serde_json::Value>> {
    let user_id = session.orchestrator.session().user_id();
    let user = state.auth.update_profile(user_id, request).await?;
    session.orchestrator.session().replace_user(user.clone());

    Ok(Json(json!({
        "message": "Profile updated successfully",
        "data": user
    })))
}
