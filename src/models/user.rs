use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ImagesLimit, PlanTier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub plan: PlanTier,
    pub images_processed: u32,
    pub images_limit: ImagesLimit,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A freshly registered account on the free tier.
    pub fn new(name: &str, email: &str, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.trim().to_string(),
            email: email.trim().to_lowercase(),
            password_hash,
            plan: PlanTier::Free,
            images_processed: 0,
            images_limit: PlanTier::Free.images_limit(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Fields left out, or blank after trimming, keep their current value.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}
