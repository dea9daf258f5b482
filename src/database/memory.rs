use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    database::AccountStore,
    errors::{AppError, Result},
    models::User,
};

/// Account store kept in process memory, for tests and database-less runs.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<User> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.email == user.email) {
            return Err(AppError::Validation(
                "An account with this email already exists".to_string(),
            ));
        }
        users.insert(user.id, user.clone());
        Ok(user.clone())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|user| user.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn update_subscription(&self, user: &User) -> Result<User> {
        let mut users = self.users.write().await;
        let stored = users
            .get_mut(&user.id)
            .ok_or_else(|| AppError::Auth("account no longer exists".to_string()))?;

        stored.plan = user.plan;
        stored.images_limit = user.images_limit;
        stored.images_processed = user.images_processed;
        Ok(stored.clone())
    }

    async fn update_profile(&self, id: Uuid, name: &str, email: &str) -> Result<User> {
        let mut users = self.users.write().await;
        if users.values().any(|other| other.id != id && other.email == email) {
            return Err(AppError::Conflict("Email is already in use".to_string()));
        }

        let stored = users
            .get_mut(&id)
            .ok_or_else(|| AppError::Auth("account no longer exists".to_string()))?;
        stored.name = name.to_string();
        stored.email = email.to_string();
        Ok(stored.clone())
    }
}
