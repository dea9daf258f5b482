use axum::{extract::State, response::Json};
use serde_json::json;

use crate::{
    errors::Result,
    handlers::AppState,
    middleware::auth::AuthenticatedSession,
    models::{PlanTier, PurchaseRequest, SubscriptionResponse, User},
};

pub async fn list_plans(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    Ok(Json(json!({
        "data": state.upgrades.catalog().list_plans()
    })))
}

fn subscription_view(state: &AppState, user: &User) -> SubscriptionResponse {
    SubscriptionResponse {
        plan: user.plan,
        plan_name: state.upgrades.catalog().get(user.plan).display_name,
        images_processed: user.images_processed,
        images_limit: user.images_limit,
        status: if user.plan == PlanTier::Free { "free" } else { "active" },
    }
}

pub async fn get_subscription(
    State(state): State<AppState>,
    session: AuthenticatedSession,
) -> Result<Json<serde_json::Value>> {
    let user = session.orchestrator.session().user();

    Ok(Json(json!({
        "data": subscription_view(&state, &user)
    })))
}

pub async fn purchase(
    State(state): State<AppState>,
    session: AuthenticatedSession,
    Json(request): Json<PurchaseRequest>,
) -> Result<Json<serde_json::Value>> {
    let user = session
        .orchestrator
        .upgrade(&state.upgrades, &request.plan, &request.payment_token)
        .await?;

    Ok(Json(json!({
        "message": "Plan purchased successfully",
        "data": subscription_view(&state, &user)
    })))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    session: AuthenticatedSession,
) -> Result<Json<serde_json::Value>> {
    let user = session.orchestrator.cancel_subscription(&state.upgrades).await?;

    Ok(Json(json!({
        "message": "Subscription cancelled",
        "data": subscription_view(&state, &user)
    })))
}

pub async fn usage(session: AuthenticatedSession) -> Result<Json<serde_json::Value>> {
    Ok(Json(json!({
        "data": session.orchestrator.usage()
    })))
}
