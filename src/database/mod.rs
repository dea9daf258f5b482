use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::{errors::Result, models::User};

pub mod memory;
pub mod queries;

pub use memory::MemoryStore;
use queries::UserQueries;

/// Authoritative account storage. Implementations serialize concurrent
/// writes; the job workflow only ever hands them whole user snapshots.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<User>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    /// Persists plan, limit and usage of `user`.
    async fn update_subscription(&self, user: &User) -> Result<User>;

    /// Replaces name and email. `AppError::Conflict` when another account
    /// already uses `email`.
    async fn update_profile(&self, id: Uuid, name: &str, email: &str) -> Result<User>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for Database {
    async fn create_user(&self, user: &User) -> Result<User> {
        UserQueries::create_user(&self.pool, user).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        UserQueries::find_by_email(&self.pool, email).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        UserQueries::find_by_id(&self.pool, id).await
    }

    async fn update_subscription(&self, user: &User) -> Result<User> {
        UserQueries::update_subscription(&self.pool, user).await
    }

    async fn update_profile(&self, id: Uuid, name: &str, email: &str) -> Result<User> {
        UserQueries::update_profile(&self.pool, id, name, email).await
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
